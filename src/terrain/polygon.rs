//! Terrain polygon types and zoom-dependent pre-processing
//!
//! Polygons arrive in normalized `[0, 1]^2` tile-local coordinates (as
//! decoded from a companion vector tile by [`crate::vectortile`]). Before
//! they're used to classify contour polylines they're filtered by area and
//! optionally simplified, both governed by the requested zoom level.

use geo::algorithm::convex_hull::ConvexHull;
use geo::algorithm::simplify::Simplify;
use geo_types::{Coord, LineString, Polygon as GeoPolygon};

/// What a classified contour segment (or the source polygon that produced
/// the classification) represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerrainType {
    Glacier,
    Rock,
}

impl TerrainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerrainType::Glacier => "glacier",
            TerrainType::Rock => "rock",
        }
    }
}

/// A single terrain polygon in normalized `[0, 1]^2` tile coordinates. The
/// ring is closed (first point equals last).
#[derive(Debug, Clone)]
pub struct TerrainPolygon {
    pub ring: Vec<(f64, f64)>,
    pub terrain_type: TerrainType,
}

impl TerrainPolygon {
    pub fn new(ring: Vec<(f64, f64)>, terrain_type: TerrainType) -> Self {
        Self { ring, terrain_type }
    }

    fn area(&self) -> f64 {
        shoelace_area(&self.ring)
    }

    fn bbox(&self) -> (f64, f64, f64, f64) {
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for &(x, y) in &self.ring {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        (min_x, min_y, max_x, max_y)
    }
}

fn shoelace_area(ring: &[(f64, f64)]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for w in ring.windows(2) {
        sum += w[0].0 * w[1].1 - w[1].0 * w[0].1;
    }
    (sum / 2.0).abs()
}

/// A terrain polygon annotated with its bounding box, used by [`super::grid::GridIndex`]
/// to narrow candidate polygons for a given polyline.
#[derive(Debug, Clone)]
pub struct IndexedPolygon {
    pub polygon: TerrainPolygon,
    pub bbox: (f64, f64, f64, f64),
}

/// How a polygon's ring is reduced before it's used for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonSimplification {
    ConvexHull,
    DouglasPeucker,
    None,
}

/// Area threshold and simplification method for a given zoom level, per the
/// fixed schedule below. Convex-hull simplification is unavailable at zoom
/// 13 and above (auto-downgrades to Douglas-Peucker / none).
pub struct PreprocessingRule {
    pub min_area: f64,
    pub method: PolygonSimplification,
    pub tolerance: f64,
}

pub fn preprocessing_rule(zoom: u8, method: PolygonSimplification) -> PreprocessingRule {
    let (min_area, dp_tolerance) = match zoom {
        0..=11 => (5e-5, 0.01),
        12 => (2e-5, 0.005),
        13 => (1e-5, 0.002),
        _ => (5e-6, 0.001),
    };

    let method = if zoom >= 13 && method == PolygonSimplification::ConvexHull {
        PolygonSimplification::DouglasPeucker
    } else {
        method
    };

    PreprocessingRule {
        min_area,
        method,
        tolerance: dp_tolerance,
    }
}

/// Filter tiny polygons and simplify the survivors, in that order. Polygons
/// whose ring drops below four points after simplification are dropped.
pub fn preprocess(
    polygons: Vec<TerrainPolygon>,
    zoom: u8,
    method: PolygonSimplification,
) -> Vec<IndexedPolygon> {
    let rule = preprocessing_rule(zoom, method);

    polygons
        .into_iter()
        .filter(|p| p.area() >= rule.min_area)
        .filter_map(|p| simplify_polygon(p, &rule))
        .filter(|p| p.polygon.ring.len() >= 4)
        .collect()
}

fn simplify_polygon(polygon: TerrainPolygon, rule: &PreprocessingRule) -> Option<IndexedPolygon> {
    let ring = match rule.method {
        PolygonSimplification::None => polygon.ring.clone(),
        PolygonSimplification::DouglasPeucker => {
            let coords: Vec<Coord<f64>> = polygon
                .ring
                .iter()
                .map(|&(x, y)| Coord { x, y })
                .collect();
            let simplified = LineString::new(coords).simplify(&rule.tolerance);
            simplified.0.iter().map(|c| (c.x, c.y)).collect()
        }
        PolygonSimplification::ConvexHull => {
            let coords: Vec<Coord<f64>> = polygon
                .ring
                .iter()
                .map(|&(x, y)| Coord { x, y })
                .collect();
            let line = LineString::new(coords);
            let geo_polygon = GeoPolygon::new(line, vec![]);
            let hull = geo_polygon.convex_hull();
            hull.exterior().0.iter().map(|c| (c.x, c.y)).collect()
        }
    };

    if ring.len() < 4 {
        return None;
    }

    let terrain_type = polygon.terrain_type;
    let polygon = TerrainPolygon::new(ring, terrain_type);
    let bbox = polygon.bbox();
    Some(IndexedPolygon { polygon, bbox })
}

/// Point-in-polygon via the even-odd ray-casting rule. Ring must be closed.
pub fn point_in_polygon(point: (f64, f64), ring: &[(f64, f64)]) -> bool {
    let (px, py) = point;
    let mut inside = false;
    for w in ring.windows(2) {
        let (x0, y0) = w[0];
        let (x1, y1) = w[1];
        let crosses = (y0 > py) != (y1 > py);
        if crosses {
            let x_at_y = x0 + (py - y0) * (x1 - x0) / (y1 - y0);
            if px < x_at_y {
                inside = !inside;
            }
        }
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(min: f64, max: f64, terrain_type: TerrainType) -> TerrainPolygon {
        TerrainPolygon::new(
            vec![(min, min), (max, min), (max, max), (min, max), (min, min)],
            terrain_type,
        )
    }

    #[test]
    fn test_shoelace_area_unit_square() {
        let sq = square(0.0, 1.0, TerrainType::Glacier);
        assert!((sq.area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_point_in_polygon() {
        let sq = square(0.25, 0.75, TerrainType::Rock);
        assert!(point_in_polygon((0.5, 0.5), &sq.ring));
        assert!(!point_in_polygon((0.1, 0.1), &sq.ring));
    }

    #[test]
    fn test_preprocessing_rule_downgrades_convex_hull_at_high_zoom() {
        let rule = preprocessing_rule(14, PolygonSimplification::ConvexHull);
        assert_eq!(rule.method, PolygonSimplification::DouglasPeucker);
        let rule_low = preprocessing_rule(10, PolygonSimplification::ConvexHull);
        assert_eq!(rule_low.method, PolygonSimplification::ConvexHull);
    }

    #[test]
    fn test_preprocess_drops_tiny_polygon() {
        let tiny = square(0.0, 0.001, TerrainType::Glacier);
        let out = preprocess(vec![tiny], 10, PolygonSimplification::None);
        assert!(out.is_empty());
    }

    #[test]
    fn test_preprocess_keeps_large_polygon() {
        let big = square(0.0, 1.0, TerrainType::Glacier);
        let out = preprocess(vec![big], 10, PolygonSimplification::None);
        assert_eq!(out.len(), 1);
    }
}
