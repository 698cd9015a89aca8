//! The tile pipeline: cache lookup, tenant-scoped fetch, encoding and store.
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::cache::{TileCache, TileCacheKey};
use crate::config::{LayerCatalog, LayerDescriptor, TileServerConfig};
use crate::error::{Error, Result};
use crate::mvt::MvtEncoder;
use crate::tenant::TenantId;
use crate::tile::TileCoordinate;
use crate::GeometryFetcher;

#[derive(Clone)]
pub struct TileService {
    catalog: Arc<LayerCatalog>,
    fetcher: Arc<dyn GeometryFetcher>,
    cache: Arc<TileCache>,
    encoder: MvtEncoder,
    tile_size: u32,
    buffer_pixels: u32,
    cache_ttl: Duration,
    query_timeout: Duration,
}

impl TileService {
    pub fn new(
        config: &TileServerConfig,
        catalog: Arc<LayerCatalog>,
        fetcher: Arc<dyn GeometryFetcher>,
        cache: Arc<TileCache>,
    ) -> TileService {
        TileService {
            catalog,
            fetcher,
            cache,
            encoder: MvtEncoder::new(config.extent),
            tile_size: config.tile_size,
            buffer_pixels: config.buffer_pixels(),
            cache_ttl: config.cache_ttl(),
            query_timeout: config.query_timeout(),
        }
    }

    pub fn layer(&self, name: &str) -> Result<Arc<LayerDescriptor>> {
        self.catalog.get(name)
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Returns the encoded tile of `layer` for `tenant`. An empty payload
    /// means no feature of the tenant reaches into the tile.
    pub async fn tile(
        &self,
        tenant: &TenantId,
        layer: &LayerDescriptor,
        tile: TileCoordinate,
    ) -> Result<Bytes> {
        if !layer.serves_zoom(tile.zoom()) {
            return Err(Error::InvalidTileCoordinate(format!(
                "layer {} is served at zoom {}..={}, not {}",
                layer.name,
                layer.min_zoom,
                layer.max_zoom,
                tile.zoom()
            )));
        }

        let key = TileCacheKey::new(&layer.name, tenant, &tile);
        if let Some(payload) = self.cache.get(&key) {
            log::trace!("cache hit {} {} for tenant {}", layer.name, tile, tenant);
            return Ok(payload);
        }
        log::debug!("cache miss {} {} for tenant {}", layer.name, tile, tenant);

        let bbox = tile.buffered_bounds(self.tile_size, self.buffer_pixels);
        let features = tokio::time::timeout(self.query_timeout, self.fetcher.fetch(layer, tenant, &bbox))
            .await
            .map_err(|_| Error::StorageTimeout(self.query_timeout))??;

        let payload = Bytes::from(self.encoder.encode(
            &tile,
            &features,
            &layer.name,
            self.tile_size,
            self.buffer_pixels,
        ));
        self.cache.put(key, payload.clone(), self.cache_ttl);

        Ok(payload)
    }

    /// Drops the cached tiles of one layer for one tenant. Called after the
    /// tenant's geometries of that layer change.
    pub fn invalidate(&self, layer_name: &str, tenant: &TenantId) -> Result<usize> {
        let layer = self.catalog.get(layer_name)?;
        Ok(self.cache.invalidate(&layer.name, tenant))
    }

    pub async fn ping(&self) -> Result<()> {
        tokio::time::timeout(self.query_timeout, self.fetcher.ping())
            .await
            .map_err(|_| Error::StorageTimeout(self.query_timeout))?
    }
}
