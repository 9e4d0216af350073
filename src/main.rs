// src/main.rs

mod config;
mod controller;
mod detection_source;
mod evaluator;
mod extension;
mod lane_geometry;
mod lane_stats;
mod pipeline;
mod track_manager;
mod types;

use anyhow::Result;
use detection_source::{find_detection_files, JsonlDetectionSource};
use lane_geometry::LaneLayout;
use pipeline::{telemetry_channel, PipelineEvent, PipelineOrchestrator};
use tracing::{debug, error, info};

fn main() -> Result<()> {
    let config = types::Config::load("config.yaml")?;

    tracing_subscriber::fmt()
        .with_env_filter(format!("signal_control={}", config.logging.level))
        .init();

    info!("🚦 Adaptive Signal Control Starting");
    info!("✓ Configuration loaded");
    info!(
        "Cycle duration: {:.0}s, congestion threshold: {:.2}, {} px/m scale",
        config.signal.cycle_duration,
        config.signal.congestion_ratio_threshold,
        config.tracking.pixel_to_meter
    );

    let layout = LaneLayout::load(&config.geometry)?;
    if layout.is_empty() {
        error!("No usable lane polygons in {}", config.geometry.lanes_file);
        return Ok(());
    }

    let files = find_detection_files(&config.input.detections_dir)?;
    if files.is_empty() {
        error!(
            "No detection streams found in {}",
            config.input.detections_dir
        );
        return Ok(());
    }

    for (idx, path) in files.iter().enumerate() {
        info!("\n========================================");
        info!(
            "Processing stream {}/{}: {}",
            idx + 1,
            files.len(),
            path.display()
        );
        info!("========================================\n");

        let source = JsonlDetectionSource::open(path)?;

        // Observer thread: consumes telemetry without ever back-pressuring
        // the pipeline. Ends when the pipeline (and its publisher) drops.
        let (publisher, events) = telemetry_channel(256);
        let observer = std::thread::spawn(move || {
            for event in events {
                match event {
                    PipelineEvent::DecisionIssued(d) => info!(
                        "Observer: {} {}s (efficiency +{:.1}%, wait -{:.1}%)",
                        d.action.as_str(),
                        d.extension_seconds,
                        d.efficiency_improvement_pct,
                        d.wait_reduction_pct
                    ),
                    PipelineEvent::TrackCompleted {
                        track_id,
                        lane,
                        wait_time,
                    } => debug!(
                        "Observer: vehicle {} cleared lane {} after {:.1}s",
                        track_id, lane, wait_time
                    ),
                    _ => {}
                }
            }
        });

        let mut pipeline =
            PipelineOrchestrator::new(&config, layout.clone()).with_telemetry(publisher);

        match pipeline.run(source) {
            Ok(()) => {
                let summary = pipeline.metrics().summary();
                info!("\n✓ Stream processed");
                info!(
                    "  Frames: {} total, {} processed ({:.1} fps)",
                    summary.total_frames, summary.processed_frames, summary.fps
                );
                info!(
                    "  Tracks: {} created, {} completed",
                    summary.tracks_created, summary.tracks_completed
                );
                info!(
                    "  Signal: {} phase switches, {} decisions",
                    summary.phase_switches, summary.decisions_issued
                );
                info!(
                    "  Final snapshot: {}",
                    serde_json::to_string(&pipeline.snapshot())?
                );
            }
            Err(e) => {
                error!("Stream failed: {:#}", e);
            }
        }

        drop(pipeline);
        let _ = observer.join();
    }

    info!("All streams processed");
    Ok(())
}
