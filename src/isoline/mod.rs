//! Marching-squares isoline extraction
//!
//! Produces, for every multiple of a minor interval present in a sampled
//! elevation grid, a set of polylines tracing that elevation. Each cell of
//! the grid is resolved independently into 0, 1, or 2 boundary segments
//! oriented so that the higher-elevation side stays on the left of travel;
//! segments are then stitched across cell boundaries into closed rings or
//! open chains that terminate at the sampled window's edge.

use crate::height::HeightTile;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

/// A flat sequence of integer tile coordinates: `[x0, y0, x1, y1, ...]`.
pub type Polyline = Vec<i64>;

/// An elevation value used as an isoline key. Wraps `f64` with a total
/// order so it can key a `BTreeMap`; only ever constructed from finite
/// multiples of a threshold interval.
#[derive(Debug, Clone, Copy)]
pub struct Threshold(pub f64);

impl PartialEq for Threshold {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}
impl Eq for Threshold {}
impl PartialOrd for Threshold {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Threshold {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}
impl Hash for Threshold {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// Polylines for every threshold that crossed the sampled data, keyed by
/// elevation. Thresholds with no crossing polylines are omitted.
pub type IsolineSet = std::collections::BTreeMap<Threshold, Vec<Polyline>>;

/// A grid edge, identified so that the same physical edge shared by two
/// adjacent cells resolves to the same key regardless of which cell
/// computed the crossing first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EdgeId {
    /// Horizontal edge spanning x in [i, i+1) at row j.
    H(i64, i64),
    /// Vertical edge spanning y in [j, j+1) at column i.
    V(i64, i64),
}

/// Generate isolines for every multiple of `minor_interval` present in the
/// sampled data range of `tile`, over the domain
/// `[-border, width+border) x [-border, height+border)`, rescaling sample
/// coordinates to `[0, extent]`.
///
/// `tile` must already be materialized with a border of at least 1 (see
/// `HeightTile::materialize`); `border` documents how far that
/// materialization extends so the generator knows the valid sampling
/// window. Choose `border` proportionally to the destination-unit buffer
/// the caller wants contour lines to extend past the tile edge.
pub fn generate(tile: &HeightTile, border: i64, minor_interval: f64, extent: u32) -> IsolineSet {
    let width = tile.width() as i64;
    let height = tile.height() as i64;

    let (min, max) = data_range(tile, border, width, height);
    if !min.is_finite() || !max.is_finite() {
        return IsolineSet::new();
    }

    let mut set = IsolineSet::new();
    let mut t = (min / minor_interval).ceil() * minor_interval;
    while t <= max {
        let polylines = generate_level(tile, border, width, height, t, extent);
        if !polylines.is_empty() {
            set.insert(Threshold(t), polylines);
        }
        t += minor_interval;
    }
    set
}

fn data_range(tile: &HeightTile, border: i64, width: i64, height: i64) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for j in -border..height + border {
        for i in -border..width + border {
            let v = tile.get(i, j) as f64;
            if v.is_finite() {
                min = min.min(v);
                max = max.max(v);
            }
        }
    }
    (min, max)
}

fn generate_level(
    tile: &HeightTile,
    border: i64,
    width: i64,
    height: i64,
    threshold: f64,
    extent: u32,
) -> Vec<Polyline> {
    let mut points: Vec<(f64, f64)> = Vec::new();
    let mut point_ids: HashMap<EdgeId, usize> = HashMap::new();
    let mut segments: Vec<(usize, usize)> = Vec::new();

    let above = |v: f64| v.is_finite() && v > threshold;

    let mut get_point = |points: &mut Vec<(f64, f64)>,
                          point_ids: &mut HashMap<EdgeId, usize>,
                          edge: EdgeId,
                          coord: (f64, f64)|
     -> usize {
        *point_ids.entry(edge).or_insert_with(|| {
            points.push(coord);
            points.len() - 1
        })
    };

    for j in -border..height + border {
        for i in -border..width + border {
            let v_nw = tile.get(i, j) as f64;
            let v_ne = tile.get(i + 1, j) as f64;
            let v_se = tile.get(i + 1, j + 1) as f64;
            let v_sw = tile.get(i, j + 1) as f64;

            if !v_nw.is_finite() || !v_ne.is_finite() || !v_se.is_finite() || !v_sw.is_finite() {
                continue;
            }

            let nw = above(v_nw);
            let ne = above(v_ne);
            let se = above(v_se);
            let sw = above(v_sw);
            let count = [nw, ne, se, sw].iter().filter(|x| **x).count();
            if count == 0 || count == 4 {
                continue;
            }

            let p_nw = (i as f64, j as f64);
            let p_ne = (i as f64 + 1.0, j as f64);
            let p_se = (i as f64 + 1.0, j as f64 + 1.0);
            let p_sw = (i as f64, j as f64 + 1.0);

            let n_point = (i as f64 + lerp(threshold, v_nw, v_ne), j as f64);
            let e_point = (i as f64 + 1.0, j as f64 + lerp(threshold, v_ne, v_se));
            let s_point = (i as f64 + lerp(threshold, v_sw, v_se), j as f64 + 1.0);
            let w_point = (i as f64, j as f64 + lerp(threshold, v_nw, v_sw));

            let n_id = EdgeId::H(i, j);
            let s_id = EdgeId::H(i, j + 1);
            let w_id = EdgeId::V(i, j);
            let e_id = EdgeId::V(i + 1, j);

            let is_saddle = count == 2 && nw == se;

            let mut push_segment =
                |points: &mut Vec<(f64, f64)>,
                 point_ids: &mut HashMap<EdgeId, usize>,
                 edge_a: EdgeId,
                 coord_a: (f64, f64),
                 edge_b: EdgeId,
                 coord_b: (f64, f64),
                 rep: (f64, f64),
                 rep_above: bool| {
                    let (from, to) = orient(coord_a, coord_b, rep, rep_above);
                    let (from_coord, to_coord, from_edge, to_edge) = if from == coord_a {
                        (coord_a, coord_b, edge_a, edge_b)
                    } else {
                        (coord_b, coord_a, edge_b, edge_a)
                    };
                    let from_id = get_point(points, point_ids, from_edge, from_coord);
                    let to_id = get_point(points, point_ids, to_edge, to_coord);
                    let _ = to;
                    segments.push((from_id, to_id));
                };

            if is_saddle {
                let center = bilerp4(v_nw, v_ne, v_se, v_sw);
                let center_above = above(center);
                if nw == center_above {
                    // NW/SE diagonal is contiguous with the center; NE and SW
                    // are each isolated lobes.
                    push_segment(
                        &mut points,
                        &mut point_ids,
                        n_id,
                        n_point,
                        e_id,
                        e_point,
                        p_ne,
                        ne,
                    );
                    push_segment(
                        &mut points,
                        &mut point_ids,
                        s_id,
                        s_point,
                        w_id,
                        w_point,
                        p_sw,
                        sw,
                    );
                } else {
                    push_segment(
                        &mut points,
                        &mut point_ids,
                        n_id,
                        n_point,
                        w_id,
                        w_point,
                        p_nw,
                        nw,
                    );
                    push_segment(
                        &mut points,
                        &mut point_ids,
                        e_id,
                        e_point,
                        s_id,
                        s_point,
                        p_se,
                        se,
                    );
                }
            } else {
                // Exactly one corner differs from its edge-adjacent neighbors.
                if nw != ne && nw != sw {
                    push_segment(
                        &mut points,
                        &mut point_ids,
                        n_id,
                        n_point,
                        w_id,
                        w_point,
                        p_nw,
                        nw,
                    );
                } else if ne != nw && ne != se {
                    push_segment(
                        &mut points,
                        &mut point_ids,
                        n_id,
                        n_point,
                        e_id,
                        e_point,
                        p_ne,
                        ne,
                    );
                } else if se != ne && se != sw {
                    push_segment(
                        &mut points,
                        &mut point_ids,
                        e_id,
                        e_point,
                        s_id,
                        s_point,
                        p_se,
                        se,
                    );
                } else {
                    push_segment(
                        &mut points,
                        &mut point_ids,
                        s_id,
                        s_point,
                        w_id,
                        w_point,
                        p_sw,
                        sw,
                    );
                }
            }
        }
    }

    stitch(&segments, &points, width, height, extent)
}

fn lerp(t: f64, v0: f64, v1: f64) -> f64 {
    if v1 == v0 {
        0.5
    } else {
        (t - v0) / (v1 - v0)
    }
}

fn bilerp4(nw: f64, ne: f64, se: f64, sw: f64) -> f64 {
    (nw + ne + se + sw) / 4.0
}

/// Orient `(p1, p2)` so that `rep` ends up on the left of the directed
/// segment if `rep_above` is true, or on the right if it's false.
fn orient(
    p1: (f64, f64),
    p2: (f64, f64),
    rep: (f64, f64),
    rep_above: bool,
) -> ((f64, f64), (f64, f64)) {
    let cross = (p2.0 - p1.0) * (rep.1 - p1.1) - (p2.1 - p1.1) * (rep.0 - p1.0);
    let rep_on_left = cross < 0.0;
    if rep_on_left == rep_above {
        (p1, p2)
    } else {
        (p2, p1)
    }
}

fn stitch(
    segments: &[(usize, usize)],
    points: &[(f64, f64)],
    width: i64,
    height: i64,
    extent: u32,
) -> Vec<Polyline> {
    let mut next: HashMap<usize, usize> = HashMap::new();
    let mut prev: HashMap<usize, usize> = HashMap::new();

    for &(from, to) in segments {
        if next.contains_key(&from) {
            tracing::warn!("isoline: degenerate branch at point {}, skipping segment", from);
            continue;
        }
        next.insert(from, to);
        prev.insert(to, from);
    }

    let mut visited: HashSet<usize> = HashSet::new();
    let mut chains: Vec<Vec<usize>> = Vec::new();

    // Open chains: any point that is a "from" but never a "to".
    let starts: Vec<usize> = next.keys().copied().filter(|p| !prev.contains_key(p)).collect();
    for start in starts {
        if visited.contains(&start) {
            continue;
        }
        let mut chain = vec![start];
        visited.insert(start);
        let mut cur = start;
        while let Some(&n) = next.get(&cur) {
            if visited.contains(&n) {
                break;
            }
            chain.push(n);
            visited.insert(n);
            cur = n;
        }
        chains.push(chain);
    }

    // Closed rings: everything left has both a prev and a next.
    let remaining: Vec<usize> = next.keys().copied().filter(|p| !visited.contains(p)).collect();
    for start in remaining {
        if visited.contains(&start) {
            continue;
        }
        let mut chain = vec![start];
        visited.insert(start);
        let mut cur = start;
        loop {
            let n = match next.get(&cur) {
                Some(&n) => n,
                None => break,
            };
            chain.push(n);
            if n == start {
                break;
            }
            if visited.contains(&n) {
                break;
            }
            visited.insert(n);
            cur = n;
        }
        chains.push(chain);
    }

    chains
        .into_iter()
        .filter(|chain| chain.len() >= 2)
        .map(|chain| {
            chain
                .into_iter()
                .flat_map(|idx| {
                    let (x, y) = points[idx];
                    let dest_x = (x / width as f64 * extent as f64).round() as i64;
                    let dest_y = (y / height as f64 * extent as f64).round() as i64;
                    [dest_x, dest_y]
                })
                .collect()
        })
        .collect()
}
