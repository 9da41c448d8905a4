//! Douglas-Peucker polyline simplification
//!
//! Coordinates arrive and leave as integer tile units, but the Douglas-Peucker
//! tolerance is most naturally expressed relative to the tile regardless of
//! its extent, so each polyline is rescaled to `[0, 1]^2`, simplified, then
//! rescaled and rounded back to integers.

use crate::isoline::Polyline;
use geo::algorithm::simplify::Simplify;
use geo_types::{Coord, LineString};

/// Simplify every polyline with at least two points. `tolerance <= 0`
/// returns the input unchanged. Polylines reduced below two points by
/// simplification are dropped; a polyline that can't be rescaled (for
/// example `extent == 0`) is passed through unmodified rather than lost.
pub fn simplify(polylines: &[Polyline], tolerance: f64, extent: u32) -> Vec<Polyline> {
    if tolerance <= 0.0 || extent == 0 {
        return polylines.to_vec();
    }

    let normalized_tolerance = tolerance / extent as f64;
    let extent = extent as f64;

    polylines
        .iter()
        .filter_map(|poly| simplify_one(poly, normalized_tolerance, extent))
        .collect()
}

fn simplify_one(poly: &Polyline, tolerance: f64, extent: f64) -> Option<Polyline> {
    if poly.len() < 4 {
        // Fewer than two (x, y) pairs: nothing to simplify.
        return if poly.len() >= 2 {
            Some(poly.clone())
        } else {
            None
        };
    }

    let coords: Vec<Coord<f64>> = poly
        .chunks(2)
        .map(|p| Coord {
            x: p[0] as f64 / extent,
            y: p[1] as f64 / extent,
        })
        .collect();
    let line = LineString::new(coords);

    let simplified = line.simplify(&tolerance);

    let mut out = Vec::with_capacity(simplified.0.len() * 2);
    for coord in simplified.0.iter() {
        out.push((coord.x * extent).round() as i64);
        out.push((coord.y * extent).round() as i64);
    }

    if out.len() < 4 {
        // Douglas-Peucker degenerated this polyline to a single point or
        // less; keep the original rather than silently dropping a feature.
        return Some(poly.clone());
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_tolerance_is_identity() {
        let input = vec![vec![0, 0, 100, 100, 200, 0]];
        let out = simplify(&input, 0.0, 4096);
        assert_eq!(out, input);
    }

    #[test]
    fn test_two_point_line_is_idempotent() {
        let input = vec![vec![0, 0, 4096, 4096]];
        let out = simplify(&input, 1.0, 4096);
        assert_eq!(out, input);
    }

    #[test]
    fn test_collinear_midpoint_removed() {
        // A straight line with a redundant midpoint should collapse to
        // just the two endpoints.
        let input = vec![vec![0, 0, 2048, 0, 4096, 0]];
        let out = simplify(&input, 1.0, 4096);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], vec![0, 0, 4096, 0]);
    }

    #[test]
    fn test_fidelity_within_tolerance() {
        // A near-straight line with a small kink under tolerance should be
        // flattened, and no retained vertex should come from thin air.
        let input = vec![vec![0, 0, 2048, 5, 4096, 0]];
        let out = simplify(&input, 10.0, 4096);
        assert_eq!(out[0], vec![0, 0, 4096, 0]);
    }

    #[test]
    fn test_short_polyline_dropped_if_degenerate() {
        let input = vec![vec![0, 0]];
        let out = simplify(&input, 1.0, 4096);
        assert!(out.is_empty());
    }
}
