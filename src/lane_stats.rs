// src/lane_stats.rs
//
// Per-lane traffic counters plus the derived views computed from the track
// table every frame. Wait/passed counters are credited by the track
// lifecycle on exit events; speed counters are credited here from the last
// two positions of each live track. Counters only reset on an explicit
// statistics reset.

use crate::track_manager::TrackTable;
use crate::types::{IntersectionSnapshot, LaneSnapshot};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::info;

/// How many frames of occupancy history are kept for telemetry.
const OCCUPANCY_HISTORY_LEN: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct LaneStats {
    pub vehicle_ids: HashSet<u64>,
    pub wait_sum: f64,
    pub wait_count: u64,
    pub speed_sum: f64,
    pub speed_count: u64,
    pub passed_count: u64,
}

impl LaneStats {
    pub fn avg_wait(&self) -> f64 {
        if self.wait_count > 0 {
            self.wait_sum / self.wait_count as f64
        } else {
            0.0
        }
    }

    pub fn avg_speed(&self) -> f64 {
        if self.speed_count > 0 {
            self.speed_sum / self.speed_count as f64
        } else {
            0.0
        }
    }
}

#[derive(Debug)]
pub struct LaneStatsTable {
    lanes: Vec<LaneStats>,
    pixel_to_meter: f64,
    /// Newest history timestamp already speed-credited, per track. Makes the
    /// speed pass a no-op when re-run on an unmutated table.
    credited: HashMap<u64, f64>,

    left_turn_count: usize,
    straight_count: usize,
    left_turn_history: VecDeque<usize>,
    straight_history: VecDeque<usize>,
}

impl LaneStatsTable {
    pub fn new(lane_count: usize, pixel_to_meter: f64) -> Self {
        Self {
            lanes: vec![LaneStats::default(); lane_count],
            pixel_to_meter,
            credited: HashMap::new(),
            left_turn_count: 0,
            straight_count: 0,
            left_turn_history: VecDeque::with_capacity(OCCUPANCY_HISTORY_LEN),
            straight_history: VecDeque::with_capacity(OCCUPANCY_HISTORY_LEN),
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn lane(&self, index: usize) -> &LaneStats {
        &self.lanes[index]
    }

    pub fn register_vehicle(&mut self, lane: usize, track_id: u64) {
        if let Some(stats) = self.lanes.get_mut(lane) {
            stats.vehicle_ids.insert(track_id);
        }
    }

    /// Fold a finished track's wait time into its last lane.
    pub fn credit_exit(&mut self, lane: usize, wait_time: f64) {
        if let Some(stats) = self.lanes.get_mut(lane) {
            stats.wait_sum += wait_time;
            stats.wait_count += 1;
            stats.passed_count += 1;
        }
    }

    pub fn forget_track(&mut self, track_id: u64) {
        self.credited.remove(&track_id);
    }

    /// Derived speed view: for every track with at least two position
    /// samples, the speed over its last segment is credited to the lane of
    /// the newest sample, at most once per sample, only for a positive time delta
    /// and an in-range lane.
    pub fn observe_speeds(&mut self, tracks: &TrackTable) {
        for (id, track) in tracks.iter() {
            let n = track.history.len();
            if n < 2 {
                continue;
            }
            let prev = track.history[n - 2];
            let last = track.history[n - 1];

            if self.credited.get(&id) == Some(&last.t) {
                continue;
            }

            let dt = last.t - prev.t;
            if dt > 0.0 && last.lane < self.lanes.len() {
                let dx = (last.x - prev.x) as f64;
                let dy = (last.y - prev.y) as f64;
                let distance = (dx * dx + dy * dy).sqrt() * self.pixel_to_meter;
                let speed = distance / dt;
                self.lanes[last.lane].speed_sum += speed;
                self.lanes[last.lane].speed_count += 1;
                self.credited.insert(id, last.t);
            }
        }
    }

    /// Record this frame's resolved occupancy (lane 0 vs the rest).
    pub fn record_occupancy(&mut self, left_turn: usize, straight: usize) {
        self.left_turn_count = left_turn;
        self.straight_count = straight;

        if self.left_turn_history.len() >= OCCUPANCY_HISTORY_LEN {
            self.left_turn_history.pop_front();
        }
        self.left_turn_history.push_back(left_turn);
        if self.straight_history.len() >= OCCUPANCY_HISTORY_LEN {
            self.straight_history.pop_front();
        }
        self.straight_history.push_back(straight);
    }

    pub fn left_turn_count(&self) -> usize {
        self.left_turn_count
    }

    pub fn straight_count(&self) -> usize {
        self.straight_count
    }

    pub fn occupancy_history(&self) -> (&VecDeque<usize>, &VecDeque<usize>) {
        (&self.left_turn_history, &self.straight_history)
    }

    /// Distinct-vehicle count per lane, for the balance factor.
    pub fn lane_vehicle_counts(&self) -> Vec<usize> {
        self.lanes.iter().map(|l| l.vehicle_ids.len()).collect()
    }

    /// Mean observed speed across all lanes, or `default` with no samples.
    pub fn overall_avg_speed(&self, default: f64) -> f64 {
        let sum: f64 = self.lanes.iter().map(|l| l.speed_sum).sum();
        let count: u64 = self.lanes.iter().map(|l| l.speed_count).sum();
        if count > 0 {
            sum / count as f64
        } else {
            default
        }
    }

    pub fn snapshot(&self, timestamp: f64, active_tracks: usize) -> IntersectionSnapshot {
        IntersectionSnapshot {
            timestamp,
            lanes: self
                .lanes
                .iter()
                .enumerate()
                .map(|(i, l)| LaneSnapshot {
                    lane: i,
                    vehicle_count: l.vehicle_ids.len(),
                    passed_count: l.passed_count,
                    avg_wait_secs: l.avg_wait(),
                    avg_speed_mps: l.avg_speed(),
                })
                .collect(),
            left_turn_count: self.left_turn_count,
            straight_count: self.straight_count,
            active_tracks,
        }
    }

    /// Explicit statistics reset. Lane geometry and configuration survive;
    /// every counter and history goes back to the initial state.
    pub fn reset(&mut self) {
        let lane_count = self.lanes.len();
        self.lanes = vec![LaneStats::default(); lane_count];
        self.credited.clear();
        self.left_turn_count = 0;
        self.straight_count = 0;
        self.left_turn_history.clear();
        self.straight_history.clear();
        info!("Lane statistics reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane_geometry::LaneLayout;
    use crate::track_manager::TrackTable;
    use crate::types::Detection;

    fn two_lane_layout() -> LaneLayout {
        LaneLayout::from_polygons(vec![
            vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)],
            vec![(100.0, 0.0), (200.0, 0.0), (200.0, 100.0), (100.0, 100.0)],
        ])
    }

    fn det(id: u64, cx: f32, bottom: f32) -> Detection {
        Detection {
            bbox: [cx - 10.0, bottom - 20.0, cx + 10.0, bottom],
            label: "car".to_string(),
            track_id: id,
        }
    }

    #[test]
    fn test_speed_credited_from_last_segment() {
        let layout = two_lane_layout();
        let mut stats = LaneStatsTable::new(2, 0.05);
        let mut table = TrackTable::new();

        table.update(0.0, &[det(1, 50.0, 50.0)], &layout, &mut stats);
        table.update(1.0, &[det(1, 80.0, 90.0)], &layout, &mut stats);
        stats.observe_speeds(&table);

        // 50px over 1s at 0.05 m/px = 2.5 m/s.
        assert_eq!(stats.lane(0).speed_count, 1);
        assert!((stats.lane(0).speed_sum - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_speed_pass_is_idempotent() {
        let layout = two_lane_layout();
        let mut stats = LaneStatsTable::new(2, 0.05);
        let mut table = TrackTable::new();

        table.update(0.0, &[det(1, 50.0, 50.0)], &layout, &mut stats);
        table.update(1.0, &[det(1, 80.0, 90.0)], &layout, &mut stats);

        stats.observe_speeds(&table);
        let (sum, count) = (stats.lane(0).speed_sum, stats.lane(0).speed_count);
        stats.observe_speeds(&table);
        assert_eq!(stats.lane(0).speed_sum, sum);
        assert_eq!(stats.lane(0).speed_count, count);
    }

    #[test]
    fn test_speed_credited_to_current_lane() {
        let layout = two_lane_layout();
        let mut stats = LaneStatsTable::new(2, 0.05);
        let mut table = TrackTable::new();

        table.update(0.0, &[det(1, 90.0, 50.0)], &layout, &mut stats);
        table.update(1.0, &[det(1, 150.0, 50.0)], &layout, &mut stats);
        stats.observe_speeds(&table);

        assert_eq!(stats.lane(0).speed_count, 0);
        assert_eq!(stats.lane(1).speed_count, 1);
    }

    #[test]
    fn test_zero_time_delta_guarded() {
        let layout = two_lane_layout();
        let mut stats = LaneStatsTable::new(2, 0.05);
        let mut table = TrackTable::new();

        table.update(1.0, &[det(1, 50.0, 50.0)], &layout, &mut stats);
        table.update(1.0, &[det(1, 80.0, 50.0)], &layout, &mut stats);
        stats.observe_speeds(&table);

        assert_eq!(stats.lane(0).speed_count, 0);
    }

    #[test]
    fn test_occupancy_history_bounded() {
        let mut stats = LaneStatsTable::new(2, 0.05);
        for i in 0..150 {
            stats.record_occupancy(i, i + 1);
        }
        let (left, straight) = stats.occupancy_history();
        assert_eq!(left.len(), OCCUPANCY_HISTORY_LEN);
        assert_eq!(straight.len(), OCCUPANCY_HISTORY_LEN);
        assert_eq!(*left.back().unwrap(), 149);
        assert_eq!(stats.left_turn_count(), 149);
    }

    #[test]
    fn test_reset_clears_counters() {
        let mut stats = LaneStatsTable::new(2, 0.05);
        stats.register_vehicle(0, 1);
        stats.credit_exit(0, 3.0);
        stats.record_occupancy(1, 0);

        stats.reset();
        assert_eq!(stats.lane(0).vehicle_ids.len(), 0);
        assert_eq!(stats.lane(0).wait_count, 0);
        assert_eq!(stats.lane(0).passed_count, 0);
        assert_eq!(stats.left_turn_count(), 0);
    }

    #[test]
    fn test_overall_avg_speed_default() {
        let stats = LaneStatsTable::new(2, 0.05);
        assert!((stats.overall_avg_speed(5.0) - 5.0).abs() < 1e-9);
    }
}
