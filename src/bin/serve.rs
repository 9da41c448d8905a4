//! Reference HTTP server binary for the contour tile engine.

use async_trait::async_trait;
use clap::Parser;
use contour_tiles::dem::{DemEncoding, FetchedTile, ImageDemDecoder, TileTransport};
use contour_tiles::error::{Error, Result};
use contour_tiles::server::{ServerConfig, TileServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "contour-tile-server", about = "On-demand contour tile server")]
struct Cli {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// DEM tile URL template, e.g. https://example.com/dem/{z}/{x}/{y}.png
    #[arg(long)]
    dem_url: String,

    /// RGB elevation encoding used by the DEM source
    #[arg(long, default_value = "terrarium")]
    dem_encoding: String,

    /// Highest zoom the DEM source actually provides
    #[arg(long, default_value_t = 15)]
    dem_max_zoom: u8,

    /// Terrain polygon vector tile URL template, enabling terrain splitting
    #[arg(long)]
    terrain_url: Option<String>,

    /// Per-fetch timeout, in seconds
    #[arg(long, default_value_t = 10)]
    fetch_timeout_secs: u64,

    /// Capacity of each orchestrator cache (raw bytes, decoded DEM, results)
    #[arg(long, default_value_t = 512)]
    cache_capacity: usize,

    /// Disable CORS
    #[arg(long)]
    no_cors: bool,
}

struct ReqwestTransport {
    client: reqwest::Client,
}

#[async_trait]
impl TileTransport for ReqwestTransport {
    async fn fetch(&self, url: &str, cancel: CancellationToken) -> Result<FetchedTile> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.client.get(url).send() => {
                let response = result.map_err(|e| Error::fetch_failed(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(Error::fetch_failed(format!(
                        "{} returned status {}",
                        url,
                        response.status()
                    )));
                }
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| Error::fetch_failed(e.to_string()))?;
                Ok(FetchedTile::new(bytes))
            }
        }
    }
}

fn parse_dem_encoding(s: &str) -> Result<DemEncoding> {
    match s {
        "terrarium" => Ok(DemEncoding::Terrarium),
        "mapbox" => Ok(DemEncoding::Mapbox),
        other => Err(Error::config(format!("unknown DEM encoding: {}", other))),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let dem_encoding = parse_dem_encoding(&cli.dem_encoding)?;

    let config = ServerConfig {
        bind_addr: cli.bind,
        cors: !cli.no_cors,
        dem_url_template: cli.dem_url,
        dem_encoding,
        dem_max_zoom: cli.dem_max_zoom,
        terrain_url_template: cli.terrain_url,
        fetch_timeout: Duration::from_secs(cli.fetch_timeout_secs),
        cache_capacity: cli.cache_capacity,
    };

    let transport: Arc<dyn TileTransport> = Arc::new(ReqwestTransport {
        client: reqwest::Client::new(),
    });
    let decoder = Arc::new(ImageDemDecoder);

    let server = TileServer::new(config, transport, decoder);
    server.run().await
}
