// src/pipeline/telemetry.rs
//
// Cross-thread event publishing for observers (dashboards, recorders).
// The pipeline must never block on a slow observer: the channel is bounded
// and overflow drops the oldest pending event. The publisher keeps its own
// receiver handle solely to pop the oldest event on overflow; the channel
// is meant for a single consumer.

use crate::pipeline::event_bus::PipelineEvent;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::warn;

pub struct TelemetryPublisher {
    tx: Sender<PipelineEvent>,
    rx: Receiver<PipelineEvent>,
    dropped: u64,
}

/// Create a telemetry channel of the given capacity. Hand the receiver to
/// the observer thread; the publisher stays with the pipeline.
pub fn telemetry_channel(capacity: usize) -> (TelemetryPublisher, Receiver<PipelineEvent>) {
    let (tx, rx) = bounded(capacity);
    (
        TelemetryPublisher {
            tx,
            rx: rx.clone(),
            dropped: 0,
        },
        rx,
    )
}

impl TelemetryPublisher {
    /// Non-blocking publish. On a full channel the oldest pending event is
    /// discarded to make room.
    pub fn publish(&mut self, event: PipelineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let _ = self.rx.try_recv();
                self.dropped += 1;
                if self.tx.try_send(event).is_err() {
                    warn!("Telemetry channel still full after dropping oldest");
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntersectionSnapshot;

    fn snapshot_event(t: f64) -> PipelineEvent {
        PipelineEvent::StatsSnapshot(IntersectionSnapshot {
            timestamp: t,
            lanes: Vec::new(),
            left_turn_count: 0,
            straight_count: 0,
            active_tracks: 0,
        })
    }

    #[test]
    fn test_publish_never_blocks_on_slow_observer() {
        let (mut publisher, rx) = telemetry_channel(4);
        // Nobody consumes; publishing far past capacity must return.
        for i in 0..100 {
            publisher.publish(snapshot_event(i as f64));
        }
        assert_eq!(publisher.dropped(), 96);

        // The observer sees the newest events, oldest were shed.
        let first = rx.try_recv().unwrap();
        match first {
            PipelineEvent::StatsSnapshot(s) => assert_eq!(s.timestamp, 96.0),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(rx.len(), 3);
    }

    #[test]
    fn test_events_flow_in_order_under_capacity() {
        let (mut publisher, rx) = telemetry_channel(8);
        publisher.publish(snapshot_event(1.0));
        publisher.publish(snapshot_event(2.0));
        let times: Vec<f64> = rx
            .try_iter()
            .map(|e| match e {
                PipelineEvent::StatsSnapshot(s) => s.timestamp,
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        assert_eq!(times, vec![1.0, 2.0]);
        assert_eq!(publisher.dropped(), 0);
    }
}
