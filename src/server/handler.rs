//! HTTP request handlers for the tile server

use crate::config::ContourTileOptions;
use crate::error::{Error, Result};
use crate::orchestrator::TileOrchestrator;
use crate::tile::coordinate::TileCoordinate;
use axum::{
    extract::{Path, RawQuery, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared handler state: axum requires `State` to be `Clone`, so this just
/// wraps the already-cheap-to-clone orchestrator handle.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TileOrchestrator>,
}

/// Handle `/tiles/:z/:x/:y.mvt` requests. The trailing `.mvt` lives inside
/// the `y` path segment (matchit only matches whole segments), so it's
/// split off here rather than captured as a separate route component.
pub async fn handle_tile(
    State(state): State<AppState>,
    Path((z, x, y_ext)): Path<(u8, u32, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response> {
    let y = y_ext
        .strip_suffix(".mvt")
        .ok_or_else(|| Error::config(format!("unsupported tile extension: {}", y_ext)))?
        .parse::<u32>()
        .map_err(|_| Error::config(format!("invalid y coordinate: {}", y_ext)))?;

    let tile = TileCoordinate::new(z, x, y);
    tile.validate()?;

    let options = match query {
        Some(q) => ContourTileOptions::from_query(&q)?,
        None => ContourTileOptions::default(),
    };

    let bytes = state
        .orchestrator
        .fetch_contour_tile(tile, &options, CancellationToken::new())
        .await?;

    if bytes.is_empty() {
        return Ok((StatusCode::NO_CONTENT, "").into_response());
    }

    Ok(create_tile_response(bytes))
}

/// Handle health check
pub async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn create_tile_response(data: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/vnd.mapbox-vector-tile"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        data,
    )
        .into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::EmptyResult => StatusCode::NO_CONTENT,
            Error::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Error::FetchFailed(_) | Error::MissingNeighbor(_) => StatusCode::BAD_GATEWAY,
            Error::DecodeFailed(_) | Error::VectorParseFailed(_) | Error::Protobuf(_) => {
                StatusCode::BAD_GATEWAY
            }
            Error::GeometryFailed(_) | Error::Io(_) | Error::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(serde_json::json!({
                "error": self.to_string(),
            })),
        )
            .into_response()
    }
}
