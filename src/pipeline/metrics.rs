// src/pipeline/metrics.rs
//
// Production observability. Tracks timing, counts, and rates
// for the frame pipeline. Export via logs or a snapshot struct.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub processed_frames: Arc<AtomicU64>,
    pub frames_with_detections: Arc<AtomicU64>,
    pub tracks_created: Arc<AtomicU64>,
    pub tracks_completed: Arc<AtomicU64>,
    pub phase_switches: Arc<AtomicU64>,
    pub decisions_issued: Arc<AtomicU64>,
    pub events_published: Arc<AtomicU64>,
    pub frame_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            processed_frames: Arc::new(AtomicU64::new(0)),
            frames_with_detections: Arc::new(AtomicU64::new(0)),
            tracks_created: Arc::new(AtomicU64::new(0)),
            tracks_completed: Arc::new(AtomicU64::new(0)),
            phase_switches: Arc::new(AtomicU64::new(0)),
            decisions_issued: Arc::new(AtomicU64::new(0)),
            events_published: Arc::new(AtomicU64::new(0)),
            frame_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.processed_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            processed_frames: self.processed_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            frames_with_detections: self.frames_with_detections.load(Ordering::Relaxed),
            tracks_created: self.tracks_created.load(Ordering::Relaxed),
            tracks_completed: self.tracks_completed.load(Ordering::Relaxed),
            phase_switches: self.phase_switches.load(Ordering::Relaxed),
            decisions_issued: self.decisions_issued.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            avg_frame_time_us: self.frame_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub processed_frames: u64,
    pub fps: f64,
    pub frames_with_detections: u64,
    pub tracks_created: u64,
    pub tracks_completed: u64,
    pub phase_switches: u64,
    pub decisions_issued: u64,
    pub events_published: u64,
    pub avg_frame_time_us: u64,
    pub elapsed_secs: f64,
}
