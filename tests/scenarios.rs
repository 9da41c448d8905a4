//! End-to-end scenarios against `TileOrchestrator::fetch_contour_tile`,
//! exercised through the public API only (injectable `TileTransport` and
//! `DemDecoder` fakes stand in for a real DEM source).

use async_trait::async_trait;
use contour_tiles::config::{parse_thresholds, ContourTileOptions};
use contour_tiles::dem::{DemDecoder, DemEncoding, DemTile, FetchedTile, TileTransport};
use contour_tiles::orchestrator::{SourceConfig, TileOrchestrator};
use contour_tiles::tile::coordinate::TileCoordinate;
use prost::Message;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A transport that always fails, for scenarios with no reachable DEM data.
struct UnreachableTransport;

#[async_trait]
impl TileTransport for UnreachableTransport {
    async fn fetch(&self, _url: &str, _cancel: CancellationToken) -> contour_tiles::Result<FetchedTile> {
        Err(contour_tiles::Error::fetch_failed("host unreachable"))
    }
}

/// A transport that counts how many times each distinct URL is fetched, so
/// dedup behavior can be asserted on. Returns the same placeholder bytes for
/// every URL; the actual elevation data comes from the paired decoder.
struct CountingTransport {
    counts: Mutex<HashMap<String, u32>>,
}

impl CountingTransport {
    fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    fn count_for(&self, url: &str) -> u32 {
        *self.counts.lock().unwrap().get(url).unwrap_or(&0)
    }
}

#[async_trait]
impl TileTransport for CountingTransport {
    async fn fetch(&self, url: &str, _cancel: CancellationToken) -> contour_tiles::Result<FetchedTile> {
        *self.counts.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;
        tokio::time::sleep(Duration::from_millis(15)).await;
        Ok(FetchedTile::new(bytes::Bytes::from_static(b"placeholder")))
    }
}

/// Ignores whatever bytes it's handed and returns a west-to-east elevation
/// ramp, so isoline generation has real crossings to find.
struct RampDecoder {
    width: usize,
    height: usize,
    step: f32,
}

#[async_trait]
impl DemDecoder for RampDecoder {
    async fn decode(
        &self,
        _bytes: &[u8],
        _encoding: DemEncoding,
        _cancel: CancellationToken,
    ) -> contour_tiles::Result<DemTile> {
        let mut data = Vec::with_capacity(self.width * self.height);
        for _ in 0..self.height {
            for x in 0..self.width {
                data.push(x as f32 * self.step);
            }
        }
        Ok(DemTile::new(self.width, self.height, data))
    }
}

fn source_config(max_zoom: u8) -> SourceConfig {
    SourceConfig {
        dem_url_template: "https://dem.example.test/{z}/{x}/{y}.png".to_string(),
        dem_encoding: DemEncoding::Terrarium,
        max_zoom,
        terrain_url_template: None,
        fetch_timeout: Duration::from_secs(5),
    }
}

/// Minimal local re-implementation of the MVT wire structs, just enough to
/// read back what the engine produced, independent of its own encoder.
mod mvt_reader {
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    pub struct Tile {
        #[prost(message, repeated, tag = "3")]
        pub layers: Vec<Layer>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Layer {
        #[prost(uint32, required, tag = "15")]
        pub version: u32,
        #[prost(string, required, tag = "1")]
        pub name: String,
        #[prost(message, repeated, tag = "2")]
        pub features: Vec<Feature>,
        #[prost(string, repeated, tag = "3")]
        pub keys: Vec<String>,
        #[prost(message, repeated, tag = "4")]
        pub values: Vec<Value>,
        #[prost(uint32, optional, tag = "5")]
        pub extent: Option<u32>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Feature {
        #[prost(uint64, optional, tag = "1")]
        pub id: Option<u64>,
        #[prost(uint32, repeated, packed = "true", tag = "2")]
        pub tags: Vec<u32>,
        // Left as a plain int32 (rather than using prost's `enumeration`
        // attribute) since this reader only ever needs to compare it
        // against `LINESTRING`, not round-trip a Rust enum.
        #[prost(int32, optional, tag = "3")]
        pub r#type: Option<i32>,
        #[prost(uint32, repeated, packed = "true", tag = "4")]
        pub geometry: Vec<u32>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Value {
        #[prost(string, optional, tag = "1")]
        pub string_value: Option<String>,
        #[prost(int64, optional, tag = "4")]
        pub int_value: Option<i64>,
    }

    pub const LINESTRING: i32 = 2;
}

// S1: a tile whose DEM neighborhood is entirely unreachable produces an
// empty (zero-byte) tile rather than an error.
#[tokio::test]
async fn no_reachable_dem_data_yields_empty_tile() {
    let orchestrator = TileOrchestrator::new(
        Arc::new(UnreachableTransport),
        Arc::new(RampDecoder {
            width: 64,
            height: 64,
            step: 10.0,
        }),
        source_config(14),
        32,
    );

    let mut options = ContourTileOptions::default();
    options.thresholds = parse_thresholds("0*100*500").unwrap();
    options.subsample_below = 32;

    let bytes = orchestrator
        .fetch_contour_tile(
            TileCoordinate::new(5, 10, 10),
            &options,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(bytes.is_empty());
}

// S2: a monotonic elevation ramp through several threshold crossings
// produces a non-empty tile with one linestring feature per crossing,
// tagged with ascending elevation and level attributes.
#[tokio::test]
async fn elevation_ramp_produces_tagged_isoline_features() {
    let orchestrator = TileOrchestrator::new(
        Arc::new(CountingTransport::new()),
        Arc::new(RampDecoder {
            width: 64,
            height: 64,
            step: 10.0,
        }),
        source_config(14),
        32,
    );

    let mut options = ContourTileOptions::default();
    // Elevation ranges 0..630 across the tile; minor=100 crosses six times.
    options.thresholds = parse_thresholds("0*100*500").unwrap();
    options.subsample_below = 32;
    options.split_mode = contour_tiles::config::SplitMode::NoSplit;

    let bytes = orchestrator
        .fetch_contour_tile(
            TileCoordinate::new(5, 10, 10),
            &options,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!bytes.is_empty());

    let tile = mvt_reader::Tile::decode(bytes.as_slice()).unwrap();
    assert_eq!(tile.layers.len(), 1);
    let layer = &tile.layers[0];
    assert_eq!(layer.name, "contours");
    assert!(
        !layer.features.is_empty(),
        "expected at least one contour feature crossing the ramp"
    );

    // Every feature should carry distinct elevation values drawn from the
    // 100..600 crossing set, and the level attribute should distinguish
    // minor (0) from major (1) crossings.
    let elevation_key_idx = layer.keys.iter().position(|k| k == "ele").unwrap() as u32;
    let level_key_idx = layer.keys.iter().position(|k| k == "level").unwrap() as u32;

    let mut saw_major = false;
    for feature in &layer.features {
        assert_eq!(feature.r#type, Some(mvt_reader::LINESTRING));
        let mut elevation = None;
        let mut level = None;
        for pair in feature.tags.chunks(2) {
            if pair[0] == elevation_key_idx {
                elevation = layer.values[pair[1] as usize].int_value;
            }
            if pair[0] == level_key_idx {
                level = layer.values[pair[1] as usize].int_value;
            }
        }
        let elevation = elevation.expect("every feature tags an elevation");
        assert!(elevation >= 0 && elevation <= 600);
        if level == Some(1) {
            saw_major = true;
        }
    }
    assert!(saw_major, "expected at least one major (500m) crossing at this elevation range");
}

// S5: two concurrent requests for the same tile and options share a single
// underlying DEM fetch per neighbor URL rather than fetching twice.
#[tokio::test]
async fn concurrent_identical_requests_dedup_dem_fetches() {
    let transport = Arc::new(CountingTransport::new());
    let orchestrator = TileOrchestrator::new(
        transport.clone(),
        Arc::new(RampDecoder {
            width: 64,
            height: 64,
            step: 10.0,
        }),
        source_config(14),
        32,
    );

    let mut options = ContourTileOptions::default();
    options.thresholds = parse_thresholds("0*100*500").unwrap();
    options.subsample_below = 32;

    let tile = TileCoordinate::new(5, 20, 20);
    let a = orchestrator.clone();
    let b = orchestrator.clone();
    let options_a = options.clone();
    let options_b = options.clone();

    let (first, second) = tokio::join!(
        tokio::spawn(async move {
            a.fetch_contour_tile(tile, &options_a, CancellationToken::new()).await
        }),
        tokio::spawn(async move {
            b.fetch_contour_tile(tile, &options_b, CancellationToken::new()).await
        }),
    );

    let first = first.unwrap().unwrap();
    let second = second.unwrap().unwrap();
    assert_eq!(first, second);

    let center_url = "https://dem.example.test/5/20/20.png";
    assert_eq!(transport.count_for(center_url), 1);
}

// A caller that cancels its own token before the fetch completes gets
// `Error::Cancelled` back without corrupting the cache for anyone else.
#[tokio::test]
async fn cancelling_caller_does_not_poison_cache_for_other_waiters() {
    let transport = Arc::new(CountingTransport::new());
    let orchestrator = TileOrchestrator::new(
        transport.clone(),
        Arc::new(RampDecoder {
            width: 64,
            height: 64,
            step: 10.0,
        }),
        source_config(14),
        32,
    );

    let mut options = ContourTileOptions::default();
    options.thresholds = parse_thresholds("0*100*500").unwrap();
    options.subsample_below = 32;

    let tile = TileCoordinate::new(6, 3, 3);
    let impatient_cancel = CancellationToken::new();
    let patient = orchestrator.clone();
    let options_b = options.clone();

    let patient_handle = tokio::spawn(async move {
        patient
            .fetch_contour_tile(tile, &options_b, CancellationToken::new())
            .await
    });

    let impatient_cancel_clone = impatient_cancel.clone();
    let impatient_orchestrator = orchestrator.clone();
    let options_a = options.clone();
    let impatient_handle = tokio::spawn(async move {
        impatient_orchestrator
            .fetch_contour_tile(tile, &options_a, impatient_cancel_clone)
            .await
    });

    // Withdraw the impatient caller almost immediately; the patient one
    // should still complete successfully since it's still waiting.
    tokio::time::sleep(Duration::from_millis(2)).await;
    impatient_cancel.cancel();

    let impatient_result = impatient_handle.await.unwrap();
    assert!(impatient_result.is_err());

    let patient_result = patient_handle.await.unwrap();
    assert!(patient_result.is_ok());
}
