// src/pipeline/event_bus.rs
//
// Decoupled event system. Subsystems publish events instead of
// reaching into each other's state.

use crate::types::{DecisionRecord, IntersectionSnapshot, Phase};
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    DecisionIssued(DecisionRecord),

    PhaseSwitched {
        phase: Phase,
        at: f64,
    },

    StatsSnapshot(IntersectionSnapshot),

    TrackCompleted {
        track_id: u64,
        lane: usize,
        wait_time: f64,
    },
}

pub struct EventBus {
    events: VecDeque<PipelineEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: PipelineEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }
}
