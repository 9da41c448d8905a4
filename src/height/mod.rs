//! Lazy, composable elevation sampler built from one or more DEM tiles
//!
//! `HeightTile` wraps a small family of samplers behind a single handle:
//! array-backed (a raw DEM), neighbor-stitched (a 3x3 halo of DEM tiles),
//! and a handful of lazy transforms (crop for overzoom, subsample, shift
//! pixel-centers to grid-corners, scale). Transforms compose without
//! touching memory until `materialize` forces a dense array.

use crate::dem::DemTile;
use std::sync::Arc;

/// Something that can answer elevation queries over an (i, j) integer
/// coordinate space. Out-of-domain queries return NaN rather than erroring.
trait HeightSampler: Send + Sync {
    fn sample(&self, i: i64, j: i64) -> f32;
    fn width(&self) -> usize;
    fn height(&self) -> usize;
}

/// Handle to a composed elevation sampler.
#[derive(Clone)]
pub struct HeightTile(Arc<dyn HeightSampler>);

impl HeightTile {
    /// Wrap a decoded DEM tile directly.
    pub fn from_raw_dem(dem: DemTile) -> Self {
        HeightTile(Arc::new(ArrayBacked { dem }))
    }

    pub fn get(&self, i: i64, j: i64) -> f32 {
        self.0.sample(i, j)
    }

    pub fn width(&self) -> usize {
        self.0.width()
    }

    pub fn height(&self) -> usize {
        self.0.height()
    }

    /// Stitch up to nine tiles (row-major, center at index 4) into one
    /// sampler whose halo reads into the neighbors. Returns `None` iff the
    /// center tile is missing; missing cardinals become NaN holes.
    pub fn combine_neighbors(tiles: [Option<HeightTile>; 9]) -> Option<HeightTile> {
        let center = tiles[4].clone()?;
        let width = center.width();
        let height = center.height();
        let samplers = tiles.map(|t| t.map(|t| t.0));
        Some(HeightTile(Arc::new(NeighborStitched {
            tiles: samplers,
            width,
            height,
        })))
    }

    /// Logical crop to the `(subX, subY)` cell of a `1/2^subZ`-sized
    /// partition of this tile, for sampling a coarser overzoom ancestor as
    /// if it were the requested tile's own region.
    pub fn split(&self, sub_z: u8, sub_x: u32, sub_y: u32) -> HeightTile {
        let scale = 1i64 << sub_z;
        let width = (self.width() as i64 / scale).max(1) as usize;
        let height = (self.height() as i64 / scale).max(1) as usize;
        HeightTile(Arc::new(SplitView {
            source: self.0.clone(),
            width,
            height,
            offset_x: sub_x as i64 * width as i64,
            offset_y: sub_y as i64 * height as i64,
        }))
    }

    /// Force a dense array covering `[-border, width+border) x [-border,
    /// height+border)`. After this, sampling inside the halo is defined;
    /// further out still returns NaN.
    pub fn materialize(&self, border: i64) -> HeightTile {
        let width = self.width();
        let height = self.height();
        let padded_w = width as i64 + 2 * border;
        let padded_h = height as i64 + 2 * border;
        let mut data = Vec::with_capacity((padded_w * padded_h).max(0) as usize);
        for j in -border..height as i64 + border {
            for i in -border..width as i64 + border {
                data.push(self.0.sample(i, j));
            }
        }
        HeightTile(Arc::new(Materialized {
            data,
            width,
            height,
            border,
        }))
    }

    /// Upsample by `factor` in each axis via bilinear interpolation between
    /// the nearest source pixel centers, so each original cell becomes
    /// `factor^2` cells.
    pub fn subsample_pixel_centers(&self, factor: u32) -> HeightTile {
        HeightTile(Arc::new(Subsampled {
            source: self.0.clone(),
            factor,
            width: self.width() * factor as usize,
            height: self.height() * factor as usize,
        }))
    }

    /// Shift measurements from pixel centers to pixel corners: each output
    /// point is the average of the four surrounding input centers. NaN in
    /// any of the four propagates to the output.
    pub fn average_pixel_centers_to_grid(&self) -> HeightTile {
        HeightTile(Arc::new(GridAveraged {
            source: self.0.clone(),
            width: self.width(),
            height: self.height(),
        }))
    }

    /// Multiply every sampled elevation by `factor`.
    pub fn scale_elevation(&self, factor: f32) -> HeightTile {
        HeightTile(Arc::new(Scaled {
            source: self.0.clone(),
            factor,
        }))
    }
}

struct ArrayBacked {
    dem: DemTile,
}

impl HeightSampler for ArrayBacked {
    fn sample(&self, i: i64, j: i64) -> f32 {
        self.dem.get(i, j)
    }
    fn width(&self) -> usize {
        self.dem.width()
    }
    fn height(&self) -> usize {
        self.dem.height()
    }
}

struct NeighborStitched {
    tiles: [Option<Arc<dyn HeightSampler>>; 9],
    width: usize,
    height: usize,
}

impl HeightSampler for NeighborStitched {
    fn sample(&self, i: i64, j: i64) -> f32 {
        let w = self.width as i64;
        let h = self.height as i64;

        let (col, local_i) = if i < 0 {
            (0, i + w)
        } else if i >= w {
            (2, i - w)
        } else {
            (1, i)
        };
        let (row, local_j) = if j < 0 {
            (0, j + h)
        } else if j >= h {
            (2, j - h)
        } else {
            (1, j)
        };

        let idx = row * 3 + col;
        match &self.tiles[idx] {
            Some(t) => t.sample(local_i, local_j),
            None => f32::NAN,
        }
    }

    fn width(&self) -> usize {
        self.width
    }
    fn height(&self) -> usize {
        self.height
    }
}

struct SplitView {
    source: Arc<dyn HeightSampler>,
    width: usize,
    height: usize,
    offset_x: i64,
    offset_y: i64,
}

impl HeightSampler for SplitView {
    fn sample(&self, i: i64, j: i64) -> f32 {
        self.source.sample(i + self.offset_x, j + self.offset_y)
    }
    fn width(&self) -> usize {
        self.width
    }
    fn height(&self) -> usize {
        self.height
    }
}

struct Materialized {
    data: Vec<f32>,
    width: usize,
    height: usize,
    border: i64,
}

impl HeightSampler for Materialized {
    fn sample(&self, i: i64, j: i64) -> f32 {
        let padded_w = self.width as i64 + 2 * self.border;
        let local_i = i + self.border;
        let local_j = j + self.border;
        if local_i < 0 || local_j < 0 || local_i >= padded_w {
            return f32::NAN;
        }
        let idx = local_j * padded_w + local_i;
        if idx < 0 || idx as usize >= self.data.len() {
            return f32::NAN;
        }
        self.data[idx as usize]
    }
    fn width(&self) -> usize {
        self.width
    }
    fn height(&self) -> usize {
        self.height
    }
}

fn bilerp(v00: f32, v10: f32, v01: f32, v11: f32, tx: f64, ty: f64) -> f32 {
    let top = v00 as f64 * (1.0 - tx) + v10 as f64 * tx;
    let bottom = v01 as f64 * (1.0 - tx) + v11 as f64 * tx;
    (top * (1.0 - ty) + bottom * ty) as f32
}

struct Subsampled {
    source: Arc<dyn HeightSampler>,
    factor: u32,
    width: usize,
    height: usize,
}

impl HeightSampler for Subsampled {
    fn sample(&self, i: i64, j: i64) -> f32 {
        let factor = self.factor as f64;
        let fx = i as f64 / factor;
        let fy = j as f64 / factor;
        let x0 = fx.floor() as i64;
        let y0 = fy.floor() as i64;
        let tx = fx - x0 as f64;
        let ty = fy - y0 as f64;

        let v00 = self.source.sample(x0, y0);
        let v10 = self.source.sample(x0 + 1, y0);
        let v01 = self.source.sample(x0, y0 + 1);
        let v11 = self.source.sample(x0 + 1, y0 + 1);
        bilerp(v00, v10, v01, v11, tx, ty)
    }
    fn width(&self) -> usize {
        self.width
    }
    fn height(&self) -> usize {
        self.height
    }
}

struct GridAveraged {
    source: Arc<dyn HeightSampler>,
    width: usize,
    height: usize,
}

impl HeightSampler for GridAveraged {
    fn sample(&self, i: i64, j: i64) -> f32 {
        let a = self.source.sample(i - 1, j - 1);
        let b = self.source.sample(i, j - 1);
        let c = self.source.sample(i - 1, j);
        let d = self.source.sample(i, j);
        ((a as f64 + b as f64 + c as f64 + d as f64) / 4.0) as f32
    }
    fn width(&self) -> usize {
        self.width
    }
    fn height(&self) -> usize {
        self.height
    }
}

struct Scaled {
    source: Arc<dyn HeightSampler>,
    factor: f32,
}

impl HeightSampler for Scaled {
    fn sample(&self, i: i64, j: i64) -> f32 {
        self.source.sample(i, j) * self.factor
    }
    fn width(&self) -> usize {
        self.source.width()
    }
    fn height(&self) -> usize {
        self.source.height()
    }
}
