//! Ties the pipeline together: DEM fetch -> height sampling -> isolines ->
//! simplification -> terrain split -> MVT encoding
//!
//! `TileOrchestrator::fetch_contour_tile` is the engine's single entry
//! point. It owns the three caches (raw bytes, decoded DEM, and finished
//! result) and threads one cancellation token through every sub-fetch so a
//! caller's withdrawal aborts in-flight work without leaving cache waiters
//! stranded. Every producer handed to a cache must be `'static`, so the
//! orchestrator is always held behind an `Arc` and its async steps clone
//! that `Arc` rather than borrowing `&self`.

use crate::cache::AsyncCache;
use crate::config::{ContourTileOptions, SplitMode};
use crate::dem::{self, DemDecoder, DemEncoding, DemTile, TileTransport};
use crate::error::{Error, Result};
use crate::height::HeightTile;
use crate::isoline;
use crate::simplify;
use crate::terrain::{self, ClassifiedSegment, PolygonSimplification, SegmentTerrain};
use crate::tile::coordinate::TileCoordinate;
use crate::vectortile::{self, ContourEncodeOptions, PolygonDecodeOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Where DEM and terrain-polygon tiles come from, and how their URLs are
/// built for a given tile coordinate.
pub struct SourceConfig {
    pub dem_url_template: String,
    pub dem_encoding: DemEncoding,
    pub max_zoom: u8,
    pub terrain_url_template: Option<String>,
    pub fetch_timeout: Duration,
}

fn fill_template(template: &str, tile: TileCoordinate) -> String {
    template
        .replace("{z}", &tile.z.to_string())
        .replace("{x}", &tile.x.to_string())
        .replace("{y}", &tile.y.to_string())
}

/// `DemTile` wrapped so it can live in a [`crate::cache::AsyncCache`], which
/// requires `Clone` values; `Arc` keeps the clone cheap.
#[derive(Clone)]
struct DemTileHandle(Arc<DemTile>);

/// The engine: injectable ports plus the three bounded caches the spec
/// calls out as the only shared mutable state. Always used behind an
/// `Arc` (see [`TileOrchestrator::new`]) so its async steps can be handed
/// to the caches as `'static` producers.
pub struct TileOrchestrator {
    transport: Arc<dyn TileTransport>,
    decoder: Arc<dyn DemDecoder>,
    sources: SourceConfig,
    raw_cache: AsyncCache<String, bytes::Bytes>,
    dem_cache: AsyncCache<String, DemTileHandle>,
    result_cache: AsyncCache<String, bytes::Bytes>,
}

impl TileOrchestrator {
    pub fn new(
        transport: Arc<dyn TileTransport>,
        decoder: Arc<dyn DemDecoder>,
        sources: SourceConfig,
        cache_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            decoder,
            sources,
            raw_cache: AsyncCache::new(cache_capacity),
            dem_cache: AsyncCache::new(cache_capacity),
            result_cache: AsyncCache::new(cache_capacity),
        })
    }

    /// Build and return an encoded contour MVT tile for `(z, x, y)`.
    #[instrument(skip(self, options, cancel), fields(z = tile.z, x = tile.x, y = tile.y))]
    pub async fn fetch_contour_tile(
        self: &Arc<Self>,
        tile: TileCoordinate,
        options: &ContourTileOptions,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>> {
        let result_key = format!("{}/{}", tile.to_zxy_string(), options.canonical_key());
        let this = self.clone();
        let options = options.clone();

        self.result_cache
            .get_or_insert_with(result_key, cancel, move |child| {
                async move { this.run(tile, &options, child).await }
            })
            .await
            .map(|bytes| bytes.to_vec())
    }

    async fn run(
        self: Arc<Self>,
        tile: TileCoordinate,
        options: &ContourTileOptions,
        cancel: CancellationToken,
    ) -> Result<bytes::Bytes> {
        let Some(thresholds) = options.thresholds_for_zoom(tile.z) else {
            debug!("no threshold schedule applies at this zoom, returning empty tile");
            return Ok(bytes::Bytes::new());
        };

        let dem_tile = dem::ancestor_tile(tile, options.overzoom, self.sources.max_zoom);
        let neighborhood = dem::neighborhood(dem_tile);

        let mut fetches = Vec::with_capacity(9);
        for neighbor in neighborhood {
            let cancel = cancel.clone();
            let this = self.clone();
            fetches.push(async move {
                match neighbor {
                    Some(coord) => match this.fetch_height_tile(coord, cancel).await {
                        Ok(tile) => Some(tile),
                        Err(e) => {
                            let err = Error::missing_neighbor(format!("{}: {}", coord, e));
                            warn!(error = %err, "neighbor DEM tile failed to resolve");
                            None
                        }
                    },
                    None => None,
                }
            });
        }
        let resolved: Vec<Option<HeightTile>> = futures::future::join_all(fetches).await;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let center_missing = resolved[4].is_none();
        let combined = if center_missing {
            None
        } else {
            let mut arr: [Option<HeightTile>; 9] = Default::default();
            for (i, t) in resolved.into_iter().enumerate() {
                arr[i] = t;
            }
            HeightTile::combine_neighbors(arr)
        };
        let Some(combined) = combined else {
            return Ok(bytes::Bytes::new());
        };

        let sub_z = tile.z.saturating_sub(dem_tile.z);
        let sub_scale = 1u32 << sub_z;
        let sub_x = tile.x % sub_scale;
        let sub_y = tile.y % sub_scale;
        let mut working = combined.split(sub_z, sub_x, sub_y);

        // `final_border` is the pixel-space halo isoline generation samples
        // past the tile edge, chosen proportionally to the caller's
        // destination-unit `buffer`; `intermediate_border` adds the extra
        // ring `average_pixel_centers_to_grid` and the subsample pass need
        // around it.
        let final_border = (options.buffer.max(0.0).ceil() as i64).max(1);
        let intermediate_border = final_border + 1;

        let border_tile = if working.width() as u32 >= options.subsample_below {
            working.materialize(intermediate_border)
        } else {
            loop {
                working = working
                    .subsample_pixel_centers(2)
                    .materialize(intermediate_border);
                if working.width() as u32 >= options.subsample_below {
                    break working;
                }
            }
        };

        let regridded = border_tile
            .average_pixel_centers_to_grid()
            .scale_elevation(options.multiplier as f32)
            .materialize(final_border);

        let minor = thresholds.minor();
        let mut isolines = isoline::generate(&regridded, final_border, minor, options.extent);

        if options.simplify > 0.0 {
            for polylines in isolines.values_mut() {
                *polylines = simplify::simplify(polylines, options.simplify, options.extent);
            }
        }

        let classified = match options.split_mode {
            SplitMode::NoSplit => to_all_normal(&isolines),
            SplitMode::Classic => match &self.sources.terrain_url_template {
                None => to_all_normal(&isolines),
                Some(template) => {
                    let polygons = self
                        .clone()
                        .fetch_terrain_polygons(template.clone(), tile, cancel.clone())
                        .await;
                    terrain::split(
                        &isolines,
                        polygons,
                        options.extent,
                        tile.z,
                        PolygonSimplification::ConvexHull,
                    )
                }
            },
        };

        let encode_options = ContourEncodeOptions {
            layer_name: options.contour_layer.clone(),
            extent: options.extent,
            elevation_key: options.elevation_key.clone(),
            level_key: options.level_key.clone(),
        };
        let encoded = vectortile::encode_contours(&classified, &thresholds.intervals, &encode_options)?;
        Ok(bytes::Bytes::from(encoded))
    }

    async fn fetch_height_tile(
        self: Arc<Self>,
        coord: TileCoordinate,
        cancel: CancellationToken,
    ) -> Result<HeightTile> {
        let dem = self.fetch_dem_tile(coord, cancel).await?;
        Ok(HeightTile::from_raw_dem((*dem.0).clone()))
    }

    async fn fetch_dem_tile(
        self: Arc<Self>,
        coord: TileCoordinate,
        cancel: CancellationToken,
    ) -> Result<DemTileHandle> {
        let url = fill_template(&self.sources.dem_url_template, coord);
        let this = self.clone();
        let url_for_producer = url.clone();

        self.dem_cache
            .get_or_insert_with(url, cancel, move |child| {
                let this2 = this.clone();
                let url = url_for_producer;
                async move {
                    let bytes = this2
                        .clone()
                        .fetch_raw_bytes(url, child.clone())
                        .await?;
                    let tile = this2
                        .decoder
                        .decode(&bytes, this2.sources.dem_encoding, child)
                        .await?;
                    Ok(DemTileHandle(Arc::new(tile)))
                }
            })
            .await
    }

    async fn fetch_raw_bytes(
        self: Arc<Self>,
        url: String,
        cancel: CancellationToken,
    ) -> Result<bytes::Bytes> {
        let this = self.clone();
        let url_for_producer = url.clone();
        self.raw_cache
            .get_or_insert_with(url, cancel, move |child| {
                let transport = this.transport.clone();
                let timeout = this.sources.fetch_timeout;
                let url = url_for_producer;
                async move {
                    dem::fetch_with_timeout(transport.as_ref(), &url, child, timeout)
                        .await
                        .map(|fetched| fetched.bytes)
                }
            })
            .await
    }

    async fn fetch_terrain_polygons(
        self: Arc<Self>,
        template: String,
        tile: TileCoordinate,
        cancel: CancellationToken,
    ) -> Vec<terrain::TerrainPolygon> {
        let url = fill_template(&template, tile);
        let fetched = dem::fetch_with_timeout(
            self.transport.as_ref(),
            &url,
            cancel,
            self.sources.fetch_timeout,
        )
        .await;

        match fetched {
            Ok(f) => vectortile::decode_terrain_polygons(&f.bytes, &PolygonDecodeOptions::default()),
            Err(e) => {
                warn!(error = %e, "terrain tile fetch failed, proceeding without polygons");
                Vec::new()
            }
        }
    }
}

fn to_all_normal(isolines: &isoline::IsolineSet) -> terrain::ClassifiedIsolineSet {
    isolines
        .iter()
        .map(|(threshold, polylines)| {
            let segments = polylines
                .iter()
                .map(|p| ClassifiedSegment {
                    geometry: p.clone(),
                    terrain_type: SegmentTerrain::Normal,
                })
                .collect();
            (*threshold, segments)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dem::FetchedTile;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailingTransport {
        fetches: AtomicU32,
    }

    #[async_trait]
    impl TileTransport for FailingTransport {
        async fn fetch(&self, _url: &str, _cancel: CancellationToken) -> Result<FetchedTile> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Err(Error::fetch_failed("no transport in this unit test"))
        }
    }

    struct FlatDecoder {
        elevation: f32,
    }

    #[async_trait]
    impl DemDecoder for FlatDecoder {
        async fn decode(
            &self,
            _bytes: &[u8],
            _encoding: DemEncoding,
            _cancel: CancellationToken,
        ) -> Result<DemTile> {
            Ok(DemTile::new(64, 64, vec![self.elevation; 64 * 64]))
        }
    }

    #[tokio::test]
    async fn test_no_thresholds_for_zoom_returns_empty() {
        let orchestrator = TileOrchestrator::new(
            Arc::new(FailingTransport {
                fetches: AtomicU32::new(0),
            }),
            Arc::new(FlatDecoder { elevation: -32768.0 }),
            SourceConfig {
                dem_url_template: "https://example.test/{z}/{x}/{y}.png".to_string(),
                dem_encoding: DemEncoding::Terrarium,
                max_zoom: 14,
                terrain_url_template: None,
                fetch_timeout: Duration::from_secs(5),
            },
            16,
        );

        let mut options = ContourTileOptions::default();
        options.thresholds = crate::config::parse_thresholds("11*200*1000").unwrap();

        let tile = TileCoordinate::new(5, 1, 1);
        let bytes = orchestrator
            .fetch_contour_tile(tile, &options, CancellationToken::new())
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_transport_yields_empty_tile_not_error() {
        let orchestrator = TileOrchestrator::new(
            Arc::new(FailingTransport {
                fetches: AtomicU32::new(0),
            }),
            Arc::new(FlatDecoder { elevation: -32768.0 }),
            SourceConfig {
                dem_url_template: "https://example.test/{z}/{x}/{y}.png".to_string(),
                dem_encoding: DemEncoding::Terrarium,
                max_zoom: 14,
                terrain_url_template: None,
                fetch_timeout: Duration::from_secs(5),
            },
            16,
        );

        let mut options = ContourTileOptions::default();
        options.thresholds = crate::config::parse_thresholds("0*10*100").unwrap();

        let tile = TileCoordinate::new(5, 1, 1);
        let bytes = orchestrator
            .fetch_contour_tile(tile, &options, CancellationToken::new())
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }
}
