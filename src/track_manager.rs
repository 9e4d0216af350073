// src/track_manager.rs
//
// Vehicle track lifecycle. Turns the stream of per-frame detections into
// durable per-vehicle records: a track is born the first frame its anchor
// point lands inside a lane polygon, refreshed while it stays in a lane,
// and retired the first frame it is observed outside every lane, at which
// point its wait time is folded into the statistics of the last lane it
// occupied.
//
// Single-writer: only this table mutates track state. The statistics
// aggregator reads the table between updates.

use crate::lane_geometry::LaneLayout;
use crate::lane_stats::LaneStatsTable;
use crate::types::Detection;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;

/// One position observation: anchor point, frame time, resolved lane.
#[derive(Debug, Clone, Copy)]
pub struct PositionSample {
    pub x: f32,
    pub y: f32,
    pub t: f64,
    pub lane: usize,
}

/// The in-lane presence record of one tracked vehicle.
#[derive(Debug, Clone)]
pub struct Track {
    pub enter_time: f64,
    pub exit_time: Option<f64>,
    pub history: Vec<PositionSample>,
}

impl Track {
    fn new(enter_time: f64) -> Self {
        Self {
            enter_time,
            exit_time: None,
            history: Vec::new(),
        }
    }

    pub fn last_lane(&self) -> Option<usize> {
        self.history.last().map(|s| s.lane)
    }
}

/// A retired track, reported so the pipeline can publish it.
#[derive(Debug, Clone, Copy)]
pub struct TrackExit {
    pub track_id: u64,
    pub lane: usize,
    pub wait_time: f64,
}

/// Result of one frame's track update.
#[derive(Debug, Clone, Default)]
pub struct FrameUpdate {
    /// Detections resolved to lane 0 this frame
    pub left_turn_count: usize,
    /// Detections resolved to any other lane this frame
    pub straight_count: usize,
    pub exited: Vec<TrackExit>,
    pub created: usize,
}

#[derive(Debug, Default)]
pub struct TrackTable {
    tracks: HashMap<u64, Track>,
}

impl TrackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one frame of detections. Lane polygons are tested in
    /// ascending index order and the first containing lane claims the
    /// detection. A tracked identifier observed outside every lane is an
    /// exit event: its wait time (enter to this frame) is credited to the
    /// last lane it was recorded in, and the track is deleted. Identifiers
    /// that were never inside a lane are dropped without credit.
    pub fn update(
        &mut self,
        frame_time: f64,
        detections: &[Detection],
        layout: &LaneLayout,
        stats: &mut LaneStatsTable,
    ) -> FrameUpdate {
        let mut update = FrameUpdate::default();

        for det in detections {
            let (x, y) = det.anchor();
            match layout.assign(x, y) {
                Some(lane) => {
                    stats.register_vehicle(lane, det.track_id);

                    let track = match self.tracks.entry(det.track_id) {
                        Entry::Occupied(e) => {
                            let t = e.into_mut();
                            t.exit_time = Some(frame_time);
                            t
                        }
                        Entry::Vacant(v) => {
                            update.created += 1;
                            debug!("Track {} created in lane {} at t={:.2}", det.track_id, lane, frame_time);
                            v.insert(Track::new(frame_time))
                        }
                    };
                    track.history.push(PositionSample { x, y, t: frame_time, lane });

                    if lane == 0 {
                        update.left_turn_count += 1;
                    } else {
                        update.straight_count += 1;
                    }
                }
                None => {
                    if let Some(track) = self.tracks.remove(&det.track_id) {
                        let wait_time = frame_time - track.enter_time;
                        let last_in_lane = track.exit_time.unwrap_or(track.enter_time);
                        if let Some(last) = track.history.last() {
                            if last.lane < stats.lane_count() {
                                stats.credit_exit(last.lane, wait_time);
                                update.exited.push(TrackExit {
                                    track_id: det.track_id,
                                    lane: last.lane,
                                    wait_time,
                                });
                                debug!(
                                    "Track {} exited lane {} after {:.2}s (last in-lane sighting t={:.2})",
                                    det.track_id, last.lane, wait_time, last_in_lane
                                );
                            }
                        }
                        stats.forget_track(det.track_id);
                    }
                    // No track record: a noise detection that never touched
                    // a lane. Nothing to credit.
                }
            }
        }

        update
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, track_id: u64) -> Option<&Track> {
        self.tracks.get(&track_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &Track)> {
        self.tracks.iter().map(|(id, t)| (*id, t))
    }
}
