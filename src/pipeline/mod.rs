// src/pipeline/mod.rs

pub mod event_bus;
pub mod metrics;
pub mod orchestrator;
pub mod telemetry;

pub use event_bus::{EventBus, PipelineEvent};
pub use metrics::PipelineMetrics;
pub use orchestrator::{PipelineControl, PipelineOrchestrator};
pub use telemetry::{telemetry_channel, TelemetryPublisher};
