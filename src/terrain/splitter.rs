//! Splits contour polylines into terrain-classified segments
//!
//! Each polyline is walked against the terrain polygons overlapping it and
//! rewritten into a run of segments covering it end-to-end, each tagged
//! `normal`, `glacier`, or `rock`. Precedence between overlapping polygons
//! is purely the order callers supply them in (callers wanting rock to win
//! over glacier pass rock first).

use super::grid::{grid_size, GridIndex};
use super::polygon::{point_in_polygon, preprocess, IndexedPolygon, PolygonSimplification, TerrainPolygon, TerrainType};
use crate::isoline::{IsolineSet, Polyline, Threshold};
use std::collections::BTreeMap;
use tracing::warn;

const MIN_RUN_VERTICES: usize = 10;
const MAX_CLASSIFICATION_SAMPLES: usize = 20;

/// What a classified segment represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentTerrain {
    Normal,
    Glacier,
    Rock,
}

impl SegmentTerrain {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentTerrain::Normal => "normal",
            SegmentTerrain::Glacier => "glacier",
            SegmentTerrain::Rock => "rock",
        }
    }

    fn from_terrain_type(t: TerrainType) -> Self {
        match t {
            TerrainType::Glacier => SegmentTerrain::Glacier,
            TerrainType::Rock => SegmentTerrain::Rock,
        }
    }
}

/// One contiguous run of a classified contour line.
#[derive(Debug, Clone)]
pub struct ClassifiedSegment {
    pub geometry: Polyline,
    pub terrain_type: SegmentTerrain,
}

/// Classified contour polylines, keyed by the same elevation thresholds as
/// the input [`IsolineSet`].
pub type ClassifiedIsolineSet = BTreeMap<Threshold, Vec<ClassifiedSegment>>;

#[derive(Clone)]
struct Working {
    vertices: Vec<(f64, f64)>,
    status: Option<TerrainType>,
}

/// Classify every polyline in `isolines` against `polygons`, at the given
/// destination `extent` and tile `zoom`.
pub fn split(
    isolines: &IsolineSet,
    polygons: Vec<TerrainPolygon>,
    extent: u32,
    zoom: u8,
    method: PolygonSimplification,
) -> ClassifiedIsolineSet {
    let preprocessed = preprocess(polygons, zoom, method);
    let grid = grid_size(zoom).map(|n| GridIndex::build(preprocessed.clone(), n));

    let mut out = ClassifiedIsolineSet::new();
    for (threshold, polylines) in isolines {
        let classified: Vec<ClassifiedSegment> = polylines
            .iter()
            .flat_map(|poly| classify_polyline(poly, &preprocessed, grid.as_ref(), extent))
            .collect();
        if !classified.is_empty() {
            out.insert(*threshold, classified);
        }
    }
    out
}

fn classify_polyline(
    poly: &Polyline,
    preprocessed: &[IndexedPolygon],
    grid: Option<&GridIndex>,
    extent: u32,
) -> Vec<ClassifiedSegment> {
    if poly.len() < 4 || extent == 0 {
        return vec![ClassifiedSegment {
            geometry: poly.clone(),
            terrain_type: SegmentTerrain::Normal,
        }];
    }

    let extent_f = extent as f64;
    let normalized: Vec<(f64, f64)> = poly
        .chunks(2)
        .map(|p| (p[0] as f64 / extent_f, p[1] as f64 / extent_f))
        .collect();

    let poly_bbox = bbox_of(&normalized);

    let candidates: Vec<&IndexedPolygon> = match grid {
        Some(g) => g.candidates(&normalized),
        None => preprocessed.iter().collect(),
    };
    let candidates: Vec<&IndexedPolygon> = candidates
        .into_iter()
        .filter(|p| bbox_intersects(p.bbox, poly_bbox))
        .collect();

    if candidates.is_empty() {
        return vec![ClassifiedSegment {
            geometry: poly.clone(),
            terrain_type: SegmentTerrain::Normal,
        }];
    }

    let mut working = vec![Working {
        vertices: normalized,
        status: None,
    }];

    for polygon in candidates {
        working = working
            .into_iter()
            .flat_map(|seg| split_against(seg, polygon))
            .collect();
        working = merge_short_runs(working);
        working = coalesce_adjacent(working);
    }

    working
        .into_iter()
        .map(|seg| ClassifiedSegment {
            geometry: rescale(&seg.vertices, extent_f),
            terrain_type: seg
                .status
                .map(SegmentTerrain::from_terrain_type)
                .unwrap_or(SegmentTerrain::Normal),
        })
        .collect()
}

fn split_against(seg: Working, polygon: &IndexedPolygon) -> Vec<Working> {
    if seg.status.is_some() {
        return vec![seg];
    }
    if !bbox_intersects(polygon.bbox, bbox_of(&seg.vertices)) {
        return vec![seg];
    }

    match try_split_against(&seg, polygon) {
        Ok(segments) => segments,
        Err(reason) => {
            warn!(reason, "terrain split failed, keeping segment unclassified");
            vec![seg]
        }
    }
}

fn try_split_against(seg: &Working, polygon: &IndexedPolygon) -> Result<Vec<Working>, &'static str> {
    if seg.vertices.len() < 2 {
        return Err("segment too short to classify");
    }

    let samples = sample_indices(seg.vertices.len(), MAX_CLASSIFICATION_SAMPLES);
    let mut all_inside = true;
    let mut all_outside = true;
    for &idx in &samples {
        if point_in_polygon(seg.vertices[idx], &polygon.polygon.ring) {
            all_outside = false;
        } else {
            all_inside = false;
        }
    }

    if all_inside {
        return Ok(vec![Working {
            vertices: seg.vertices.clone(),
            status: Some(polygon.polygon.terrain_type),
        }]);
    }
    if all_outside {
        return Ok(vec![seg.clone()]);
    }

    // Crossing: walk every vertex and split at state changes, inclusive of
    // the transition vertex on both sides.
    let flags: Vec<bool> = seg
        .vertices
        .iter()
        .map(|&v| point_in_polygon(v, &polygon.polygon.ring))
        .collect();

    let mut runs: Vec<Working> = Vec::new();
    let mut start = 0usize;
    let mut current = flags[0];
    for i in 1..flags.len() {
        if flags[i] != current {
            runs.push(Working {
                vertices: seg.vertices[start..=i].to_vec(),
                status: if current {
                    Some(polygon.polygon.terrain_type)
                } else {
                    None
                },
            });
            start = i;
            current = flags[i];
        }
    }
    runs.push(Working {
        vertices: seg.vertices[start..].to_vec(),
        status: if current {
            Some(polygon.polygon.terrain_type)
        } else {
            None
        },
    });

    Ok(runs)
}

/// Fold runs shorter than the minimum vertex count back into the preceding
/// run, discarding the sliver's own classification.
fn merge_short_runs(runs: Vec<Working>) -> Vec<Working> {
    let mut out: Vec<Working> = Vec::new();
    for run in runs {
        if run.vertices.len() < MIN_RUN_VERTICES && !out.is_empty() {
            let prev = out.last_mut().unwrap();
            // Skip the shared boundary vertex to avoid duplication.
            prev.vertices.extend(run.vertices.into_iter().skip(1));
        } else {
            out.push(run);
        }
    }
    out
}

/// Merge consecutive runs that ended up with the same classification.
fn coalesce_adjacent(runs: Vec<Working>) -> Vec<Working> {
    let mut out: Vec<Working> = Vec::new();
    for run in runs {
        let same_as_prev = out
            .last()
            .map(|p: &Working| p.status == run.status)
            .unwrap_or(false);
        if same_as_prev {
            let prev = out.last_mut().unwrap();
            prev.vertices.extend(run.vertices.into_iter().skip(1));
        } else {
            out.push(run);
        }
    }
    out
}

fn sample_indices(n: usize, max_samples: usize) -> Vec<usize> {
    if n <= max_samples {
        return (0..n).collect();
    }
    let step_count = (max_samples - 1).max(1);
    let mut idx: Vec<usize> = (0..step_count)
        .map(|k| k * (n - 1) / step_count)
        .collect();
    idx.push(n - 1);
    idx.dedup();
    idx
}

fn bbox_of(points: &[(f64, f64)]) -> (f64, f64, f64, f64) {
    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for &(x, y) in points {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    (min_x, min_y, max_x, max_y)
}

fn bbox_intersects(a: (f64, f64, f64, f64), b: (f64, f64, f64, f64)) -> bool {
    a.0 <= b.2 && a.2 >= b.0 && a.1 <= b.3 && a.3 >= b.1
}

fn rescale(vertices: &[(f64, f64)], extent: f64) -> Polyline {
    vertices
        .iter()
        .flat_map(|&(x, y)| [(x * extent).round() as i64, (y * extent).round() as i64])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isoline::Threshold;

    fn flat_line(y: i64, extent: i64) -> Polyline {
        (0..=20)
            .flat_map(|k| [k * extent / 20, y])
            .collect()
    }

    fn central_square(min: f64, max: f64, terrain_type: TerrainType) -> TerrainPolygon {
        TerrainPolygon::new(
            vec![(min, min), (max, min), (max, max), (min, max), (min, min)],
            terrain_type,
        )
    }

    #[test]
    fn test_no_polygons_is_identity_normal() {
        let mut isolines = IsolineSet::new();
        isolines.insert(Threshold(100.0), vec![flat_line(2048, 4096)]);

        let out = split(&isolines, vec![], 4096, 10, PolygonSimplification::None);
        let segs = out.get(&Threshold(100.0)).unwrap();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].terrain_type, SegmentTerrain::Normal);
    }

    #[test]
    fn test_central_square_splits_into_three_segments() {
        let mut isolines = IsolineSet::new();
        isolines.insert(Threshold(100.0), vec![flat_line(2048, 4096)]);

        let polygons = vec![central_square(0.25, 0.75, TerrainType::Glacier)];
        let out = split(&isolines, polygons, 4096, 8, PolygonSimplification::None);
        let segs = out.get(&Threshold(100.0)).unwrap();

        assert_eq!(segs.len(), 3);
        assert_eq!(segs[0].terrain_type, SegmentTerrain::Normal);
        assert_eq!(segs[1].terrain_type, SegmentTerrain::Glacier);
        assert_eq!(segs[2].terrain_type, SegmentTerrain::Normal);
    }

    #[test]
    fn test_sliver_below_minimum_run_is_suppressed() {
        // A 200-vertex polyline where the polygon only covers ~5 vertices'
        // worth of ground should not produce a separate classified run.
        let poly: Polyline = (0..200).flat_map(|k| [k * 4096 / 200, 2048]).collect();
        let mut isolines = IsolineSet::new();
        isolines.insert(Threshold(100.0), vec![poly]);

        // A sliver polygon covering x in roughly [0.1, 0.11] of the tile.
        let sliver = TerrainPolygon::new(
            vec![
                (0.10, 0.0),
                (0.11, 0.0),
                (0.11, 1.0),
                (0.10, 1.0),
                (0.10, 0.0),
            ],
            TerrainType::Rock,
        );

        let out = split(&isolines, vec![sliver], 4096, 8, PolygonSimplification::None);
        let segs = out.get(&Threshold(100.0)).unwrap();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].terrain_type, SegmentTerrain::Normal);
    }
}
