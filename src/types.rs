use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub geometry: GeometryConfig,
    pub tracking: TrackingConfig,
    pub signal: SignalConfig,
    pub evaluator: EvaluatorConfig,
    pub pipeline: PipelineConfig,
    pub input: InputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryConfig {
    /// Resolution the lane polygons were annotated at
    pub reference_width: f32,
    pub reference_height: f32,
    /// Working resolution the detector reports boxes in
    pub target_width: f32,
    pub target_height: f32,
    pub lanes_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Scale from working-resolution pixels to meters
    pub pixel_to_meter: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Seconds each phase holds right-of-way before the boundary check fires
    pub cycle_duration: f64,
    /// Left-turn flow ratio at or above which an axis counts as congested
    pub congestion_ratio_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    pub history_capacity: usize,
    /// Free-flow speed in m/s, the reference for the speed factor
    pub free_flow_speed: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Process every Nth frame (1 = every frame)
    pub process_every_n_frames: u64,
    pub max_pending_events: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub detections_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// One detector/tracker output box. The track id is assigned upstream and
/// assumed stable across consecutive frames for the same physical vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] working-resolution pixels
    pub label: String,
    pub track_id: u64,
}

impl Detection {
    /// Lane-assignment anchor: horizontal bbox midpoint on the bottom edge
    pub fn anchor(&self) -> (f32, f32) {
        ((self.bbox[0] + self.bbox[2]) * 0.5, self.bbox[3])
    }
}

/// All detections reported for one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameDetections {
    pub timestamp: f64,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Primary,   // conventionally east-west
    Secondary, // conventionally north-south
}

impl Phase {
    pub fn flipped(self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    ExtendPrimaryLeft,
    ExtendPrimaryThrough,
    ExtendSecondaryLeft,
    ExtendSecondaryThrough,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtendPrimaryLeft => "extend primary left-turn green",
            Self::ExtendPrimaryThrough => "extend primary through green",
            Self::ExtendSecondaryLeft => "extend secondary left-turn green",
            Self::ExtendSecondaryThrough => "extend secondary through green",
        }
    }
}

/// One signal decision, emitted at start-of-run and at every phase boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: f64,
    pub action: SignalAction,
    pub extension_seconds: i64,
    pub efficiency_improvement_pct: f64,
    pub wait_reduction_pct: f64,
}

/// Per-lane statistics as exposed to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneSnapshot {
    pub lane: usize,
    pub vehicle_count: usize,
    pub passed_count: u64,
    pub avg_wait_secs: f64,
    pub avg_speed_mps: f64,
}

/// Full per-frame statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntersectionSnapshot {
    pub timestamp: f64,
    pub lanes: Vec<LaneSnapshot>,
    pub left_turn_count: usize,
    pub straight_count: usize,
    pub active_tracks: usize,
}
