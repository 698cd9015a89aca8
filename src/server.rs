//! HTTP surface of the tile server.
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::Router;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::service::TileService;
use crate::tenant::{TenantContext, TenantResolver};
use crate::tile::TileCoordinate;

pub const MVT_CONTENT_TYPE: &str = "application/x-protobuf";

#[derive(Clone)]
pub struct AppState {
    service: TileService,
    tenants: Arc<dyn TenantResolver>,
}

impl AppState {
    fn tenant(&self, headers: &HeaderMap) -> Result<TenantContext> {
        self.tenants.resolve(headers).ok_or(Error::Unauthorized)
    }
}

pub fn router(service: TileService, tenants: Arc<dyn TenantResolver>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/{layer}/tiles", delete(invalidate_tiles))
        .route("/{layer}/{z}/{x}/{tile}", get(serve_tile))
        .with_state(AppState { service, tenants })
}

/// `GET /{layer}/{z}/{x}/{y}.mvt`
async fn serve_tile(
    State(state): State<AppState>,
    Path((layer, z, x, y)): Path<(String, String, String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    // Tenant, then layer, then address: nothing reaches the store unchecked
    let context = state.tenant(&headers)?;
    let layer = state.service.layer(&layer)?;
    let tile = TileCoordinate::from_path(&z, &x, &y)?;
    log::debug!("tile {} {} for tenant {}", layer.name, tile, context.tenant_id);

    let payload = state.service.tile(&context.tenant_id, &layer, tile).await?;
    Ok(tile_response(payload, state.service.cache_ttl()))
}

/// `DELETE /{layer}/tiles` drops the caller's cached tiles of a layer.
async fn invalidate_tiles(
    State(state): State<AppState>,
    Path(layer): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    let context = state.tenant(&headers)?;
    let removed = state.service.invalidate(&layer, &context.tenant_id)?;
    log::info!("dropped {} cached tiles of {} for tenant {}", removed, layer, context.tenant_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn health(State(state): State<AppState>) -> StatusCode {
    match state.service.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            log::warn!("health check failed: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

fn tile_response(payload: Bytes, ttl: Duration) -> Response {
    let cache_control = format!("private, max-age={}", ttl.as_secs());
    if payload.is_empty() {
        return (StatusCode::NO_CONTENT, [(header::CACHE_CONTROL, cache_control)]).into_response();
    }

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, String::from(MVT_CONTENT_TYPE)),
            (header::CACHE_CONTROL, cache_control),
        ],
        payload,
    )
        .into_response()
}
