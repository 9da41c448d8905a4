//! Uniform-grid spatial index over terrain polygons
//!
//! Narrows the polygons a polyline needs to be tested against to the
//! handful sharing a grid cell with one of its vertices. Disabled
//! altogether at high zoom, where there are few enough polygons that a
//! full scan is cheaper than maintaining the index.

use super::polygon::IndexedPolygon;
use std::collections::{HashMap, HashSet};

/// Grid resolution (`N` of an `N x N` index) for a given zoom, or `None`
/// if the index should be skipped and every polygon tested directly.
pub fn grid_size(zoom: u8) -> Option<usize> {
    match zoom {
        0..=12 => Some(8),
        13 => Some(4),
        _ => None,
    }
}

/// A uniform `N x N` grid over normalized `[0, 1]^2` space, mapping cells
/// to the polygons that overlap them.
pub struct GridIndex {
    n: usize,
    cells: HashMap<(i64, i64), Vec<usize>>,
    polygons: Vec<IndexedPolygon>,
}

impl GridIndex {
    pub fn build(polygons: Vec<IndexedPolygon>, n: usize) -> Self {
        let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        let cell_size = 1.0 / n as f64;

        for (idx, poly) in polygons.iter().enumerate() {
            let (min_x, min_y, max_x, max_y) = poly.bbox;
            let min_cell = cell_of(min_x, min_y, cell_size);
            let max_cell = cell_of(max_x, max_y, cell_size);
            for cx in min_cell.0..=max_cell.0 {
                for cy in min_cell.1..=max_cell.1 {
                    cells.entry((cx, cy)).or_default().push(idx);
                }
            }
        }

        Self { n, cells, polygons }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Polygons whose bounding box touches any grid cell containing a
    /// vertex of `vertices` (normalized coordinates).
    pub fn candidates(&self, vertices: &[(f64, f64)]) -> Vec<&IndexedPolygon> {
        let cell_size = 1.0 / self.n as f64;
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for &(x, y) in vertices {
            let cell = cell_of(x, y, cell_size);
            if let Some(indices) = self.cells.get(&cell) {
                for &idx in indices {
                    if seen.insert(idx) {
                        out.push(&self.polygons[idx]);
                    }
                }
            }
        }
        out
    }
}

fn cell_of(x: f64, y: f64, cell_size: f64) -> (i64, i64) {
    ((x / cell_size).floor() as i64, (y / cell_size).floor() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::polygon::{TerrainPolygon, TerrainType};

    fn indexed_square(min: f64, max: f64) -> IndexedPolygon {
        let polygon = TerrainPolygon::new(
            vec![(min, min), (max, min), (max, max), (min, max), (min, min)],
            TerrainType::Rock,
        );
        let bbox = (min, min, max, max);
        IndexedPolygon { polygon, bbox }
    }

    #[test]
    fn test_grid_size_schedule() {
        assert_eq!(grid_size(5), Some(8));
        assert_eq!(grid_size(12), Some(8));
        assert_eq!(grid_size(13), Some(4));
        assert_eq!(grid_size(14), None);
    }

    #[test]
    fn test_candidates_finds_overlapping_polygon() {
        let poly = indexed_square(0.2, 0.3);
        let index = GridIndex::build(vec![poly], 8);
        let hits = index.candidates(&[(0.25, 0.25)]);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_candidates_empty_far_from_polygon() {
        let poly = indexed_square(0.2, 0.3);
        let index = GridIndex::build(vec![poly], 8);
        let hits = index.candidates(&[(0.9, 0.9)]);
        assert!(hits.is_empty());
    }
}
