// src/detection_source.rs
//
// Input seam for the pipeline. The detector/tracker lives out of process;
// this side only consumes its per-frame output. The JSONL source replays a
// recorded detection stream, one frame object per line.

use crate::types::FrameDetections;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

pub trait DetectionSource {
    /// Next frame of detections, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<FrameDetections>>;
}

/// Replays frames from a line-delimited JSON file.
pub struct JsonlDetectionSource {
    reader: BufReader<File>,
    path: PathBuf,
    line_no: usize,
}

impl JsonlDetectionSource {
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening detection stream: {}", path.display());
        let file =
            File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Ok(Self {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
            line_no: 0,
        })
    }
}

impl DetectionSource for JsonlDetectionSource {
    fn next_frame(&mut self) -> Result<Option<FrameDetections>> {
        let mut line = String::new();
        loop {
            line.clear();
            self.line_no += 1;
            let read = self.reader.read_line(&mut line)?;
            if read == 0 {
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }
            let frame: FrameDetections = serde_json::from_str(line.trim()).with_context(|| {
                format!("parsing {} line {}", self.path.display(), self.line_no)
            })?;
            return Ok(Some(frame));
        }
    }
}

/// Find all detection stream files under a directory.
pub fn find_detection_files(dir: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    info!("Found {} detection file(s)", files.len());
    Ok(files)
}
