// src/lane_geometry.rs
//
// Immutable lane polygon set. Polygons are annotated at a reference
// resolution, scaled to the working resolution once at load time, and
// ordered left-to-right so lane 0 is the left-turn lane. Containment uses
// even-odd ray casting with boundary points counting as inside, matching
// the upstream annotation tool's convention.

use crate::types::GeometryConfig;
use anyhow::{Context, Result};
use std::fs;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct LaneRegion {
    pub index: usize,
    pub polygon: Vec<(f32, f32)>,
}

impl LaneRegion {
    /// Boundary-inclusive point-in-polygon test (even-odd rule).
    pub fn contains(&self, x: f32, y: f32) -> bool {
        let pts = &self.polygon;
        let n = pts.len();
        if n < 3 {
            return false;
        }

        // Points on an edge count as inside.
        for i in 0..n {
            let (ax, ay) = pts[i];
            let (bx, by) = pts[(i + 1) % n];
            if on_segment(x, y, ax, ay, bx, by) {
                return true;
            }
        }

        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = pts[i];
            let (xj, yj) = pts[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    fn min_x(&self) -> f32 {
        self.polygon
            .iter()
            .map(|p| p.0)
            .fold(f32::INFINITY, f32::min)
    }
}

fn on_segment(px: f32, py: f32, ax: f32, ay: f32, bx: f32, by: f32) -> bool {
    const EPS: f32 = 1e-4;
    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    if cross.abs() > EPS * ((bx - ax).abs() + (by - ay).abs()).max(1.0) {
        return false;
    }
    px >= ax.min(bx) - EPS
        && px <= ax.max(bx) + EPS
        && py >= ay.min(by) - EPS
        && py <= ay.max(by) + EPS
}

/// The full lane set for one intersection approach. Read-only after load.
#[derive(Debug, Clone)]
pub struct LaneLayout {
    lanes: Vec<LaneRegion>,
}

impl LaneLayout {
    /// Load polygons from a JSON file (list of vertex lists at the
    /// reference resolution) and scale them to the working resolution.
    pub fn load(geometry: &GeometryConfig) -> Result<Self> {
        let contents = fs::read_to_string(&geometry.lanes_file)
            .with_context(|| format!("reading lane file {}", geometry.lanes_file))?;
        let raw: Vec<Vec<[f32; 2]>> = serde_json::from_str(&contents)
            .with_context(|| format!("parsing lane file {}", geometry.lanes_file))?;

        let sx = geometry.target_width / geometry.reference_width;
        let sy = geometry.target_height / geometry.reference_height;

        let polygons = raw
            .into_iter()
            .map(|poly| poly.iter().map(|[x, y]| (x * sx, y * sy)).collect())
            .collect();

        let layout = Self::from_polygons(polygons);
        info!("Loaded {} lane polygons", layout.len());
        Ok(layout)
    }

    /// Build a layout from working-resolution polygons. Degenerate polygons
    /// (fewer than 3 vertices) are skipped, not fatal. Lanes are ordered by
    /// their leftmost vertex so index 0 is the left-turn lane.
    pub fn from_polygons(polygons: Vec<Vec<(f32, f32)>>) -> Self {
        let mut lanes: Vec<LaneRegion> = polygons
            .into_iter()
            .enumerate()
            .filter_map(|(i, polygon)| {
                if polygon.len() < 3 {
                    warn!("Skipping degenerate lane polygon {} ({} vertices)", i, polygon.len());
                    return None;
                }
                Some(LaneRegion { index: 0, polygon })
            })
            .collect();

        lanes.sort_by(|a, b| {
            a.min_x()
                .partial_cmp(&b.min_x())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (i, lane) in lanes.iter_mut().enumerate() {
            lane.index = i;
        }

        Self { lanes }
    }

    /// Resolve a point to a lane: ascending index order, first match wins.
    pub fn assign(&self, x: f32, y: f32) -> Option<usize> {
        self.lanes.iter().find(|lane| lane.contains(x, y)).map(|l| l.index)
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f32, x1: f32) -> Vec<(f32, f32)> {
        vec![(x0, 0.0), (x1, 0.0), (x1, 100.0), (x0, 100.0)]
    }

    #[test]
    fn test_point_inside_square() {
        let layout = LaneLayout::from_polygons(vec![square(0.0, 100.0)]);
        assert_eq!(layout.assign(50.0, 50.0), Some(0));
        assert_eq!(layout.assign(150.0, 50.0), None);
    }

    #[test]
    fn test_boundary_point_counts_as_inside() {
        let layout = LaneLayout::from_polygons(vec![square(0.0, 100.0)]);
        // On the right edge and on a vertex.
        assert_eq!(layout.assign(100.0, 50.0), Some(0));
        assert_eq!(layout.assign(0.0, 0.0), Some(0));
    }

    #[test]
    fn test_first_match_wins_on_overlap() {
        // Two overlapping squares; the leftmost one becomes lane 0 and
        // claims points in the overlap region.
        let layout = LaneLayout::from_polygons(vec![square(50.0, 150.0), square(0.0, 100.0)]);
        assert_eq!(layout.assign(75.0, 50.0), Some(0));
        assert_eq!(layout.assign(125.0, 50.0), Some(1));
    }

    #[test]
    fn test_lanes_ordered_by_min_x() {
        let layout =
            LaneLayout::from_polygons(vec![square(200.0, 300.0), square(0.0, 100.0)]);
        assert_eq!(layout.assign(50.0, 50.0), Some(0));
        assert_eq!(layout.assign(250.0, 50.0), Some(1));
    }

    #[test]
    fn test_degenerate_polygon_skipped() {
        let layout = LaneLayout::from_polygons(vec![
            vec![(0.0, 0.0), (10.0, 10.0)], // two vertices, dropped
            square(0.0, 100.0),
        ]);
        assert_eq!(layout.len(), 1);
        assert_eq!(layout.assign(50.0, 50.0), Some(0));
    }

    #[test]
    fn test_concave_polygon() {
        // U-shaped lane region: the notch must be outside.
        let layout = LaneLayout::from_polygons(vec![vec![
            (0.0, 0.0),
            (60.0, 0.0),
            (60.0, 60.0),
            (40.0, 60.0),
            (40.0, 20.0),
            (20.0, 20.0),
            (20.0, 60.0),
            (0.0, 60.0),
        ]]);
        assert_eq!(layout.assign(30.0, 40.0), None);
        assert_eq!(layout.assign(10.0, 40.0), Some(0));
        assert_eq!(layout.assign(50.0, 40.0), Some(0));
    }
}
