//! DEM tile fetching and raster decoding
//!
//! Fetching raw bytes and decoding them into elevation grids are both
//! injectable ports: callers supply a [`TileTransport`] (how to get bytes
//! for a URL) and may optionally rely on the bundled [`ImageDemDecoder`]
//! (how to turn those bytes into elevations), or bring their own decoder.

use crate::error::{Error, Result};
use crate::tile::coordinate::TileCoordinate;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// RGB-to-elevation encoding used by a DEM tile source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemEncoding {
    /// `elevation = (R*256 + G + B/256) - 32768`
    Terrarium,
    /// `elevation = -10000 + (R*65536 + G*256 + B) * 0.1`
    Mapbox,
}

impl DemEncoding {
    /// Decode one RGB triple into an elevation in meters.
    pub fn decode_pixel(&self, r: u8, g: u8, b: u8) -> f32 {
        match self {
            DemEncoding::Terrarium => {
                (r as f32) * 256.0 + (g as f32) + (b as f32) / 256.0 - 32768.0
            }
            DemEncoding::Mapbox => {
                -10000.0 + ((r as f32) * 65536.0 + (g as f32) * 256.0 + (b as f32)) * 0.1
            }
        }
    }
}

/// A dense, immutable elevation grid decoded from one DEM raster tile.
#[derive(Debug, Clone)]
pub struct DemTile {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl DemTile {
    /// Build a DEM tile from a row-major elevation array.
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Sample elevation at (x, y). Out-of-bounds coordinates return NaN.
    pub fn get(&self, x: i64, y: i64) -> f32 {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return f32::NAN;
        }
        self.data[y as usize * self.width + x as usize]
    }
}

/// Bytes returned by a tile fetch, plus whatever cache bookkeeping metadata
/// the transport could recover from response headers.
#[derive(Debug, Clone)]
pub struct FetchedTile {
    pub bytes: Bytes,
    pub expires: Option<DateTime<Utc>>,
    pub cache_control: Option<String>,
}

impl FetchedTile {
    pub fn new(bytes: Bytes) -> Self {
        Self {
            bytes,
            expires: None,
            cache_control: None,
        }
    }
}

/// Injectable port: fetch raw tile bytes for a URL.
///
/// Deliberately does not specify a transport (core has no default HTTP
/// client); the reference server binary supplies a concrete implementation.
#[async_trait]
pub trait TileTransport: Send + Sync {
    async fn fetch(&self, url: &str, cancel: CancellationToken) -> Result<FetchedTile>;
}

/// Injectable port: decode raw raster bytes into a [`DemTile`].
#[async_trait]
pub trait DemDecoder: Send + Sync {
    async fn decode(
        &self,
        bytes: &[u8],
        encoding: DemEncoding,
        cancel: CancellationToken,
    ) -> Result<DemTile>;
}

/// Default [`DemDecoder`] built on the `image` crate's raster codecs.
pub struct ImageDemDecoder;

#[async_trait]
impl DemDecoder for ImageDemDecoder {
    async fn decode(
        &self,
        bytes: &[u8],
        encoding: DemEncoding,
        cancel: CancellationToken,
    ) -> Result<DemTile> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let img = image::load_from_memory(bytes)
            .map_err(|e| Error::decode_failed(format!("raster decode: {}", e)))?
            .into_rgb8();

        let (width, height) = (img.width() as usize, img.height() as usize);
        let mut data = Vec::with_capacity(width * height);
        for pixel in img.pixels() {
            let [r, g, b] = pixel.0;
            data.push(encoding.decode_pixel(r, g, b));
        }

        Ok(DemTile::new(width, height, data))
    }
}

/// Fetch a tile with a deadline. If the deadline elapses first, `cancel` is
/// cancelled so the transport can abandon the in-flight request, and
/// `Error::Timeout` is returned.
pub async fn fetch_with_timeout(
    transport: &dyn TileTransport,
    url: &str,
    cancel: CancellationToken,
    timeout: Duration,
) -> Result<FetchedTile> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = tokio::time::timeout(timeout, transport.fetch(url, cancel.clone())) => {
            match result {
                Ok(fetch_result) => fetch_result,
                Err(_) => {
                    warn!(url, "DEM fetch exceeded deadline");
                    cancel.cancel();
                    Err(Error::Timeout)
                }
            }
        }
    }
}

/// Resolve the DEM source tile to fetch for a requested tile under overzoom:
/// `z' = min(z - overzoom, max_zoom)`, walking up to the matching ancestor.
pub fn ancestor_tile(tile: TileCoordinate, overzoom: u8, max_zoom: u8) -> TileCoordinate {
    let target_z = tile.z.saturating_sub(overzoom).min(max_zoom);
    let mut current = tile;
    while current.z > target_z {
        match current.parent() {
            Some(p) => current = p,
            None => break,
        }
    }
    current
}

/// The 3x3 neighborhood of a tile in row-major order, center at index 4.
/// X wraps around the zoom's cylinder; tiles falling off the north/south
/// edge are `None`.
pub fn neighborhood(center: TileCoordinate) -> [Option<TileCoordinate>; 9] {
    let mut out = [None; 9];
    let mut idx = 0;
    for dy in -1i32..=1 {
        for dx in -1i32..=1 {
            out[idx] = center.neighbor(dx, dy);
            idx += 1;
        }
    }
    out
}
