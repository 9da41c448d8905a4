//! # Contour Tiles
//!
//! On-demand topographic contour vector tile engine: samples a digital
//! elevation model, traces isolines with marching squares, simplifies them,
//! optionally splits them by terrain polygon (glacier/rock), and encodes the
//! result as a Mapbox Vector Tile.
//!
//! ## Example
//!
//! ```no_run
//! use contour_tiles::{
//!     config::ContourTileOptions,
//!     dem::{DemEncoding, ImageDemDecoder},
//!     orchestrator::{SourceConfig, TileOrchestrator},
//!     tile::coordinate::TileCoordinate,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(transport: Arc<dyn contour_tiles::dem::TileTransport>) -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = TileOrchestrator::new(
//!     transport,
//!     Arc::new(ImageDemDecoder),
//!     SourceConfig {
//!         dem_url_template: "https://example.com/dem/{z}/{x}/{y}.png".to_string(),
//!         dem_encoding: DemEncoding::Terrarium,
//!         max_zoom: 15,
//!         terrain_url_template: None,
//!         fetch_timeout: Duration::from_secs(10),
//!     },
//!     256,
//! );
//!
//! let mut options = ContourTileOptions::default();
//! options.thresholds = contour_tiles::config::parse_thresholds("11*200*1000")?;
//!
//! let mvt_bytes = orchestrator
//!     .fetch_contour_tile(TileCoordinate::new(11, 300, 700), &options, CancellationToken::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod dem;
pub mod error;
pub mod height;
pub mod isoline;
pub mod orchestrator;
pub mod server;
pub mod simplify;
pub mod terrain;
pub mod tile;
pub mod vectortile;

// Re-export commonly used types
pub use error::{Error, Result};
pub use orchestrator::{SourceConfig, TileOrchestrator};
pub use tile::coordinate::TileCoordinate;

/// Default tile extent (MVT specification)
pub const DEFAULT_EXTENT: u32 = 4096;

/// Maximum zoom level supported
pub const MAX_ZOOM_LEVEL: u8 = 24;

/// Minimum zoom level
pub const MIN_ZOOM_LEVEL: u8 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_EXTENT, 4096);
        assert_eq!(MAX_ZOOM_LEVEL, 24);
        assert_eq!(MIN_ZOOM_LEVEL, 0);
    }
}
