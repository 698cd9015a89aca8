//! # Tenant Tiles
//!
//! A multi-tenant Mapbox vector tile server for infrastructure asset data.
//!
//! ## Current status
//!
//! The crate renders one MVT layer per request from a PostGIS table. The
//! interfaces are still 0.x: expect trait and method signatures to move as
//! other geometry stores or cache backends are added.
//!
//! ## Current features
//!
//! Given a PostGIS database and a YAML layer table, this crate resolves the
//! caller's tenant, fetches the tenant's geometries intersecting the buffered
//! tile, encodes them into a Mapbox Vector Tile and caches the result per
//! layer, tenant and tile.
//!
//! ## Known Limitations
//!
//! Source geometries are assumed to be stored in WGS84 (EPSG:4326). The cache
//! lives in process, so several server instances each keep their own copy and
//! invalidation only reaches the instance that receives it. Concurrent misses
//! for the same tile are not coalesced.

#![deny(warnings)]

// TODO: remove once async fn in dyn traits is stable
use async_trait::async_trait;

pub mod cache;
pub mod config;
pub mod error;
pub mod feature;
pub mod mvt;
pub mod postgis;
pub mod server;
pub mod service;
pub mod tenant;
pub mod tile;

#[cfg(test)]
mod testing;

pub use crate::config::{LayerCatalog, LayerDescriptor, TileServerConfig};
pub use crate::error::{Error, Result};
pub use crate::feature::{PropertyValue, SourceFeature};
pub use crate::tenant::{TenantContext, TenantId};
pub use crate::tile::{bounds_for_tile, GeoBoundingBox, TileCoordinate};

/// The seam between the tile pipeline and the spatial store.
#[async_trait]
pub trait GeometryFetcher: Send + Sync {
    /// Returns the features of `layer` that belong to `tenant`, are not soft
    /// deleted and intersect `bbox`. Order is unspecified.
    async fn fetch(
        &self,
        layer: &LayerDescriptor,
        tenant: &TenantId,
        bbox: &GeoBoundingBox,
    ) -> Result<Vec<SourceFeature>>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<()>;
}
