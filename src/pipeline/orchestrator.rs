// src/pipeline/orchestrator.rs
//
// The frame-processing pipeline. One frame is fully processed (track
// update, statistics pass, controller tick) before the next is read;
// nothing else mutates the track table or the lane counters. Observers get
// events through the bus and the optional telemetry channel, never a live
// reference into pipeline state.
//
// Pause and stop are external atomics checked at the top of the frame
// loop. Stopping drops the detection source and leaves all tables
// read-safe for a final flush.

use crate::controller::CycleController;
use crate::detection_source::DetectionSource;
use crate::evaluator::TrafficEvaluator;
use crate::lane_geometry::LaneLayout;
use crate::lane_stats::LaneStatsTable;
use crate::pipeline::event_bus::{EventBus, PipelineEvent};
use crate::pipeline::metrics::PipelineMetrics;
use crate::pipeline::telemetry::TelemetryPublisher;
use crate::track_manager::TrackTable;
use crate::types::{Config, FrameDetections, IntersectionSnapshot};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Shared pause/stop switches. Clone the handle into whatever owns the
/// run (a control socket, a UI, a test) and flip the flags from there.
#[derive(Debug, Clone, Default)]
pub struct PipelineControl {
    pause: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl PipelineControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.pause.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.pause.store(false, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

pub struct PipelineOrchestrator {
    stride: u64,
    layout: LaneLayout,
    tracks: TrackTable,
    stats: LaneStatsTable,
    evaluator: TrafficEvaluator,
    controller: CycleController,
    bus: EventBus,
    metrics: PipelineMetrics,
    telemetry: Option<TelemetryPublisher>,
    control: PipelineControl,
    frame_index: u64,
    last_timestamp: f64,
    started: bool,
}

impl PipelineOrchestrator {
    pub fn new(config: &Config, layout: LaneLayout) -> Self {
        let lane_count = layout.len();
        Self {
            stride: config.pipeline.process_every_n_frames.max(1),
            layout,
            tracks: TrackTable::new(),
            stats: LaneStatsTable::new(lane_count, config.tracking.pixel_to_meter),
            evaluator: TrafficEvaluator::new(&config.evaluator),
            controller: CycleController::new(&config.signal),
            bus: EventBus::new(config.pipeline.max_pending_events),
            metrics: PipelineMetrics::new(),
            telemetry: None,
            control: PipelineControl::new(),
            frame_index: 0,
            last_timestamp: 0.0,
            started: false,
        }
    }

    pub fn with_telemetry(mut self, publisher: TelemetryPublisher) -> Self {
        self.telemetry = Some(publisher);
        self
    }

    pub fn control_handle(&self) -> PipelineControl {
        self.control.clone()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn stats(&self) -> &LaneStatsTable {
        &self.stats
    }

    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn decisions(&self) -> &[crate::types::DecisionRecord] {
        self.controller.decisions()
    }

    pub fn snapshot(&self) -> IntersectionSnapshot {
        self.stats.snapshot(self.last_timestamp, self.tracks.len())
    }

    /// Explicit statistics reset boundary.
    pub fn reset_statistics(&mut self) {
        self.stats.reset();
    }

    /// Emit the start-of-run decision. Called once, before the first frame.
    pub fn start_at(&mut self, timestamp: f64) {
        if self.started {
            return;
        }
        self.started = true;
        let decision = self.controller.start(timestamp);
        self.metrics.inc(&self.metrics.decisions_issued);
        self.bus.publish(PipelineEvent::DecisionIssued(decision));
        self.flush_events();
    }

    /// Process one frame of detections.
    pub fn step(&mut self, frame: &FrameDetections) {
        let t0 = Instant::now();
        self.metrics.inc(&self.metrics.total_frames);
        let index = self.frame_index;
        self.frame_index += 1;
        self.last_timestamp = frame.timestamp;

        if index % self.stride != 0 {
            return;
        }
        self.metrics.inc(&self.metrics.processed_frames);
        if !frame.detections.is_empty() {
            self.metrics.inc(&self.metrics.frames_with_detections);
        }

        // Track lifecycle, then the derived statistics over the updated
        // table. Order matters: the aggregator reads current state.
        let update = self
            .tracks
            .update(frame.timestamp, &frame.detections, &self.layout, &mut self.stats);
        self.stats.observe_speeds(&self.tracks);
        self.stats
            .record_occupancy(update.left_turn_count, update.straight_count);

        self.metrics.add(&self.metrics.tracks_created, update.created as u64);
        self.metrics
            .add(&self.metrics.tracks_completed, update.exited.len() as u64);
        for exit in &update.exited {
            self.bus.publish(PipelineEvent::TrackCompleted {
                track_id: exit.track_id,
                lane: exit.lane,
                wait_time: exit.wait_time,
            });
        }

        if let Some(decision) =
            self.controller
                .on_frame(frame.timestamp, index, &self.stats, &mut self.evaluator)
        {
            self.metrics.inc(&self.metrics.phase_switches);
            self.metrics.inc(&self.metrics.decisions_issued);
            self.bus.publish(PipelineEvent::PhaseSwitched {
                phase: self.controller.phase(),
                at: frame.timestamp,
            });
            self.bus.publish(PipelineEvent::DecisionIssued(decision));
        }

        self.bus.publish(PipelineEvent::StatsSnapshot(
            self.stats.snapshot(frame.timestamp, self.tracks.len()),
        ));

        self.metrics
            .set_timing(&self.metrics.frame_time_us, t0.elapsed().as_micros() as u64);
        self.flush_events();
    }

    /// Run the pipeline over a detection source until it ends or the stop
    /// flag is raised. The source is dropped (released) on return.
    pub fn run<S: DetectionSource>(&mut self, mut source: S) -> Result<()> {
        self.start_at(0.0);

        loop {
            if self.control.is_stopped() {
                info!("Stop requested, ending run");
                break;
            }
            while self.control.is_paused() && !self.control.is_stopped() {
                std::thread::sleep(Duration::from_millis(50));
            }
            if self.control.is_stopped() {
                info!("Stop requested, ending run");
                break;
            }

            let Some(frame) = source.next_frame()? else {
                debug!("Detection stream ended");
                break;
            };
            self.step(&frame);
        }

        self.finish();
        Ok(())
    }

    /// Final flush: one last snapshot for observers, plus the run summary.
    fn finish(&mut self) {
        self.bus.publish(PipelineEvent::StatsSnapshot(
            self.stats.snapshot(self.last_timestamp, self.tracks.len()),
        ));
        self.flush_events();

        let summary = self.metrics.summary();
        info!(
            "Run complete: {} frames ({} processed, {:.1} fps), {} tracks completed, {} decisions",
            summary.total_frames,
            summary.processed_frames,
            summary.fps,
            summary.tracks_completed,
            summary.decisions_issued
        );
    }

    fn flush_events(&mut self) {
        let events = self.bus.drain();
        self.metrics
            .add(&self.metrics.events_published, events.len() as u64);
        if let Some(telemetry) = self.telemetry.as_mut() {
            for event in events {
                telemetry.publish(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::telemetry::telemetry_channel;
    use crate::types::{
        Detection, EvaluatorConfig, GeometryConfig, InputConfig, LoggingConfig, PipelineConfig,
        SignalAction, SignalConfig, TrackingConfig,
    };

    struct VecSource(std::vec::IntoIter<FrameDetections>);

    impl DetectionSource for VecSource {
        fn next_frame(&mut self) -> Result<Option<FrameDetections>> {
            Ok(self.0.next())
        }
    }

    fn test_config(cycle_duration: f64) -> Config {
        Config {
            geometry: GeometryConfig {
                reference_width: 200.0,
                reference_height: 100.0,
                target_width: 200.0,
                target_height: 100.0,
                lanes_file: String::new(),
            },
            tracking: TrackingConfig { pixel_to_meter: 0.05 },
            signal: SignalConfig {
                cycle_duration,
                congestion_ratio_threshold: 0.4,
            },
            evaluator: EvaluatorConfig {
                history_capacity: 200,
                free_flow_speed: 15.0,
            },
            pipeline: PipelineConfig {
                process_every_n_frames: 1,
                max_pending_events: 64,
            },
            input: InputConfig {
                detections_dir: String::new(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    fn two_lane_layout() -> LaneLayout {
        LaneLayout::from_polygons(vec![
            vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)],
            vec![(100.0, 0.0), (200.0, 0.0), (200.0, 100.0), (100.0, 100.0)],
        ])
    }

    fn det(id: u64, cx: f32) -> Detection {
        Detection {
            bbox: [cx - 10.0, 30.0, cx + 10.0, 50.0],
            label: "car".to_string(),
            track_id: id,
        }
    }

    fn frame(t: f64, detections: Vec<Detection>) -> FrameDetections {
        FrameDetections {
            timestamp: t,
            detections,
        }
    }

    #[test]
    fn test_single_vehicle_pass_end_to_end() {
        // Lane 0 for frames 0..=4 at dt=0.5, outside at frame 5: one wait
        // credit of 2.5s, one passed vehicle, empty track table.
        let config = test_config(1000.0);
        let (publisher, rx) = telemetry_channel(256);
        let mut pipeline =
            PipelineOrchestrator::new(&config, two_lane_layout()).with_telemetry(publisher);

        let dt = 0.5;
        let mut frames: Vec<FrameDetections> = (0..5)
            .map(|i| frame(i as f64 * dt, vec![det(7, 50.0)]))
            .collect();
        frames.push(frame(5.0 * dt, vec![det(7, 500.0)]));

        pipeline.run(VecSource(frames.into_iter())).unwrap();

        assert_eq!(pipeline.stats().lane(0).passed_count, 1);
        assert_eq!(pipeline.stats().lane(0).wait_count, 1);
        assert!((pipeline.stats().lane(0).wait_sum - 2.5).abs() < 1e-9);
        assert_eq!(pipeline.active_tracks(), 0);

        // Initial decision only: no cycle boundary in this run.
        assert_eq!(pipeline.decisions().len(), 1);
        assert_eq!(pipeline.decisions()[0].action, SignalAction::ExtendPrimaryLeft);

        let events: Vec<PipelineEvent> = rx.try_iter().collect();
        let completed = events.iter().any(|e| {
            matches!(e, PipelineEvent::TrackCompleted { track_id: 7, lane: 0, wait_time }
                if (wait_time - 2.5).abs() < 1e-9)
        });
        assert!(completed, "missing TrackCompleted event");
    }

    #[test]
    fn test_alternating_vehicles_occupancy() {
        let config = test_config(1000.0);
        let mut pipeline = PipelineOrchestrator::new(&config, two_lane_layout());

        pipeline.start_at(0.0);
        pipeline.step(&frame(0.0, vec![det(1, 50.0), det(2, 150.0)]));
        assert_eq!(pipeline.snapshot().left_turn_count, 1);
        assert_eq!(pipeline.snapshot().straight_count, 1);

        pipeline.step(&frame(0.5, vec![det(1, 150.0), det(2, 50.0)]));
        assert_eq!(pipeline.snapshot().left_turn_count, 1);
        assert_eq!(pipeline.snapshot().straight_count, 1);

        pipeline.step(&frame(1.0, vec![det(1, 50.0), det(2, 60.0)]));
        assert_eq!(pipeline.snapshot().left_turn_count, 2);
        assert_eq!(pipeline.snapshot().straight_count, 0);
    }

    #[test]
    fn test_cycle_boundary_emits_decision() {
        let config = test_config(1.0);
        let (publisher, rx) = telemetry_channel(256);
        let mut pipeline =
            PipelineOrchestrator::new(&config, two_lane_layout()).with_telemetry(publisher);

        let frames: Vec<FrameDetections> = (0..6)
            .map(|i| frame(i as f64 * 0.5, vec![det(1, 50.0)]))
            .collect();
        pipeline.run(VecSource(frames.into_iter())).unwrap();

        // Boundaries at t=1.0 and t=2.5 (cycle restarts at each switch).
        let summary = pipeline.metrics().summary();
        assert!(summary.phase_switches >= 1);
        assert_eq!(
            summary.decisions_issued as usize,
            pipeline.decisions().len()
        );
        assert!(pipeline.decisions().len() >= 2);

        let events: Vec<PipelineEvent> = rx.try_iter().collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::PhaseSwitched { .. })));
        assert!(
            events
                .iter()
                .filter(|e| matches!(e, PipelineEvent::DecisionIssued(_)))
                .count()
                >= 2
        );
    }

    #[test]
    fn test_stop_flag_prevents_processing() {
        let config = test_config(1000.0);
        let mut pipeline = PipelineOrchestrator::new(&config, two_lane_layout());
        let control = pipeline.control_handle();
        control.stop();

        let frames = vec![frame(0.0, vec![det(1, 50.0)])];
        pipeline.run(VecSource(frames.into_iter())).unwrap();

        assert_eq!(pipeline.metrics().summary().processed_frames, 0);
        assert_eq!(pipeline.active_tracks(), 0);
    }

    #[test]
    fn test_pause_defers_processing_until_resume() {
        let config = test_config(1000.0);
        let mut pipeline = PipelineOrchestrator::new(&config, two_lane_layout());
        let control = pipeline.control_handle();
        control.pause();

        let resumer = {
            let control = control.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(120));
                control.resume();
            })
        };

        let frames = vec![
            frame(0.0, vec![det(1, 50.0)]),
            frame(0.5, vec![det(1, 50.0)]),
        ];
        pipeline.run(VecSource(frames.into_iter())).unwrap();
        resumer.join().unwrap();

        assert_eq!(pipeline.metrics().summary().processed_frames, 2);
    }

    #[test]
    fn test_frame_stride_skips_frames() {
        let mut config = test_config(1000.0);
        config.pipeline.process_every_n_frames = 2;
        let mut pipeline = PipelineOrchestrator::new(&config, two_lane_layout());

        pipeline.start_at(0.0);
        for i in 0..6 {
            pipeline.step(&frame(i as f64 * 0.5, vec![det(1, 50.0)]));
        }
        let summary = pipeline.metrics().summary();
        assert_eq!(summary.total_frames, 6);
        assert_eq!(summary.processed_frames, 3);
    }

    #[test]
    fn test_empty_detection_frames_are_valid() {
        let config = test_config(1000.0);
        let mut pipeline = PipelineOrchestrator::new(&config, two_lane_layout());
        let frames: Vec<FrameDetections> = (0..3).map(|i| frame(i as f64, vec![])).collect();
        pipeline.run(VecSource(frames.into_iter())).unwrap();

        let summary = pipeline.metrics().summary();
        assert_eq!(summary.processed_frames, 3);
        assert_eq!(summary.frames_with_detections, 0);
    }

    #[test]
    fn test_reset_statistics_boundary() {
        let config = test_config(1000.0);
        let mut pipeline = PipelineOrchestrator::new(&config, two_lane_layout());
        pipeline.start_at(0.0);
        pipeline.step(&frame(0.0, vec![det(1, 50.0)]));
        pipeline.step(&frame(0.5, vec![det(1, 500.0)]));
        assert_eq!(pipeline.stats().lane(0).passed_count, 1);

        pipeline.reset_statistics();
        assert_eq!(pipeline.stats().lane(0).passed_count, 0);
        assert_eq!(pipeline.snapshot().left_turn_count, 0);
    }
}
