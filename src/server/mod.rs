//! Tile server module

pub mod handler;

pub use handler::AppState;

use crate::dem::{DemDecoder, DemEncoding, TileTransport};
use crate::orchestrator::{SourceConfig, TileOrchestrator};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Tile server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Enable CORS
    pub cors: bool,
    /// DEM tile source URL template (`{z}`/`{x}`/`{y}` placeholders)
    pub dem_url_template: String,
    /// RGB encoding used by the DEM source
    pub dem_encoding: DemEncoding,
    /// Highest zoom the DEM source actually provides; requests above this
    /// are served from the nearest ancestor
    pub dem_max_zoom: u8,
    /// Terrain polygon vector tile source URL template, if terrain
    /// splitting is enabled
    pub terrain_url_template: Option<String>,
    /// Timeout applied to each upstream fetch
    pub fetch_timeout: Duration,
    /// Capacity of each of the three orchestrator caches
    pub cache_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            cors: true,
            dem_url_template: String::new(),
            dem_encoding: DemEncoding::Terrarium,
            dem_max_zoom: 15,
            terrain_url_template: None,
            fetch_timeout: Duration::from_secs(10),
            cache_capacity: 512,
        }
    }
}

/// Tile server: wires [`TileOrchestrator`] behind an axum router.
pub struct TileServer {
    config: ServerConfig,
    orchestrator: Arc<TileOrchestrator>,
}

impl TileServer {
    /// Create a new tile server with the reference `reqwest`-based
    /// transport and `image`-based decoder.
    pub fn new(config: ServerConfig, transport: Arc<dyn TileTransport>, decoder: Arc<dyn DemDecoder>) -> Self {
        let orchestrator = TileOrchestrator::new(
            transport,
            decoder,
            SourceConfig {
                dem_url_template: config.dem_url_template.clone(),
                dem_encoding: config.dem_encoding,
                max_zoom: config.dem_max_zoom,
                terrain_url_template: config.terrain_url_template.clone(),
                fetch_timeout: config.fetch_timeout,
            },
            config.cache_capacity,
        );

        Self { config, orchestrator }
    }

    /// Create the router
    pub fn router(&self) -> Router {
        let state = AppState {
            orchestrator: self.orchestrator.clone(),
        };

        let mut router = Router::new()
            .route("/tiles/:z/:x/:y.mvt", get(handler::handle_tile))
            .route("/health", get(handler::handle_health))
            .with_state(state)
            .layer(CompressionLayer::new());

        if self.config.cors {
            router = router.layer(CorsLayer::permissive());
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Run the server
    pub async fn run(self) -> crate::error::Result<()> {
        let bind_addr = self.config.bind_addr;
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .map_err(|e| crate::error::Error::Io(e.to_string()))?;

        tracing::info!(%bind_addr, "contour tile server listening");

        axum::serve(listener, router)
            .await
            .map_err(|e| crate::error::Error::Io(e.to_string()))?;

        Ok(())
    }
}
