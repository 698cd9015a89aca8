//! Tile server configuration (YAML).
//!
//! The layer table is loaded once at start up and shared read-only afterwards.
//! Every identifier that ends up in SQL is validated here, so nothing that
//! reaches the geometry store was influenced by a request.
use crate::error::{Error, Result};
use crate::tile::{buffer_pixels, DEFAULT_BUFFER_PERCENT, DEFAULT_TILE_SIZE, MAX_ZOOM};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

/// `jsonb_build_object` takes at most 100 arguments, i.e. 50 key/value pairs.
pub const MAX_ATTRIBUTE_COLUMNS: usize = 50;

#[derive(Clone, Deserialize, Debug)]
pub struct TileServerConfig {
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default = "default_buffer_percent")]
    pub buffer_percent: u32,
    #[serde(default = "default_extent")]
    pub extent: u32,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: u64,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_tenant_header")]
    pub tenant_header: String,
    pub layers: Vec<LayerDescriptor>,
}

/// One exposed layer and the table it is read from.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct LayerDescriptor {
    pub name: String,
    pub source_table: String,
    #[serde(default = "default_geometry_column")]
    pub geometry_column: String,
    #[serde(default)]
    pub attribute_columns: Vec<String>,
    #[serde(default = "default_tenant_column")]
    pub tenant_column: String,
    /// Rows with a non-null value here are treated as deleted. `null` disables the filter.
    #[serde(default = "default_soft_delete_column")]
    pub soft_delete_column: Option<String>,
    #[serde(rename = "minzoom", default)]
    pub min_zoom: u8,
    #[serde(rename = "maxzoom", default = "default_max_zoom")]
    pub max_zoom: u8,
}

/// Registered layers by name.
#[derive(Clone, Debug, Default)]
pub struct LayerCatalog {
    layers: HashMap<String, Arc<LayerDescriptor>>,
}

fn default_tile_size() -> u32 {
    DEFAULT_TILE_SIZE
}

fn default_buffer_percent() -> u32 {
    DEFAULT_BUFFER_PERCENT
}

fn default_extent() -> u32 {
    crate::mvt::DEFAULT_EXTENT
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_cache_max_entries() -> u64 {
    100_000
}

fn default_query_timeout_ms() -> u64 {
    5000
}

fn default_tenant_header() -> String {
    String::from("x-tenant-id")
}

fn default_geometry_column() -> String {
    String::from("geom")
}

fn default_tenant_column() -> String {
    String::from("tenant_id")
}

fn default_soft_delete_column() -> Option<String> {
    Some(String::from("deleted_at"))
}

fn default_max_zoom() -> u8 {
    MAX_ZOOM
}

impl TileServerConfig {
    /// Constructs a new configuration from a YAML string and validates it.
    pub fn from_yaml(data: &str) -> Result<TileServerConfig> {
        let config: TileServerConfig = serde_yaml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<TileServerConfig> {
        let data = std::fs::read_to_string(path)?;
        TileServerConfig::from_yaml(&data)
    }

    fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(Error::InvalidSetting(String::from("tile_size must be positive")));
        }
        if self.buffer_percent > 100 {
            return Err(Error::InvalidSetting(String::from(
                "buffer_percent must not exceed 100",
            )));
        }
        if self.extent == 0 {
            return Err(Error::InvalidSetting(String::from("extent must be positive")));
        }
        if self.cache_ttl_secs == 0 {
            return Err(Error::InvalidSetting(String::from("cache_ttl_secs must be positive")));
        }
        if self.cache_max_entries == 0 {
            return Err(Error::InvalidSetting(String::from(
                "cache_max_entries must be positive",
            )));
        }
        if self.query_timeout_ms == 0 {
            return Err(Error::InvalidSetting(String::from(
                "query_timeout_ms must be positive",
            )));
        }
        if axum::http::HeaderName::from_bytes(self.tenant_header.as_bytes()).is_err() {
            return Err(Error::InvalidSetting(format!(
                "tenant_header {:?} is not a valid header name",
                self.tenant_header
            )));
        }

        let mut seen = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            layer.validate()?;
            if seen.contains(&layer.name.as_str()) {
                return Err(Error::DuplicateLayer(layer.name.clone()));
            }
            seen.push(layer.name.as_str());
        }

        Ok(())
    }

    pub fn buffer_pixels(&self) -> u32 {
        buffer_pixels(self.tile_size, self.buffer_percent)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn catalog(&self) -> LayerCatalog {
        LayerCatalog::new(self.layers.iter().cloned())
    }
}

impl LayerDescriptor {
    fn validate(&self) -> Result<()> {
        if !is_layer_name(&self.name) {
            return Err(Error::InvalidIdentifier(self.name.clone()));
        }

        // Tables may be schema qualified
        if !self.source_table.split('.').all(is_sql_identifier)
            || self.source_table.split('.').count() > 2
        {
            return Err(Error::InvalidIdentifier(self.source_table.clone()));
        }

        let columns = [&self.geometry_column, &self.tenant_column]
            .into_iter()
            .chain(self.soft_delete_column.iter())
            .chain(self.attribute_columns.iter());
        for column in columns {
            if !is_sql_identifier(column) {
                return Err(Error::InvalidIdentifier(column.clone()));
            }
        }

        for (i, column) in self.attribute_columns.iter().enumerate() {
            if self.attribute_columns[..i].contains(column) {
                return Err(Error::InvalidSetting(format!(
                    "layer {} lists attribute column {} more than once",
                    self.name, column
                )));
            }
        }

        if self.attribute_columns.len() > MAX_ATTRIBUTE_COLUMNS {
            return Err(Error::InvalidSetting(format!(
                "layer {} exposes more than {} attribute columns",
                self.name, MAX_ATTRIBUTE_COLUMNS
            )));
        }

        if self.min_zoom > self.max_zoom || self.max_zoom > MAX_ZOOM {
            return Err(Error::InvalidSetting(format!(
                "layer {} has an invalid zoom range {}..={}",
                self.name, self.min_zoom, self.max_zoom
            )));
        }

        Ok(())
    }

    pub fn serves_zoom(&self, zoom: u8) -> bool {
        (self.min_zoom..=self.max_zoom).contains(&zoom)
    }
}

impl LayerCatalog {
    pub fn new<I: IntoIterator<Item = LayerDescriptor>>(layers: I) -> LayerCatalog {
        LayerCatalog {
            layers: layers
                .into_iter()
                .map(|layer| (layer.name.clone(), Arc::new(layer)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<LayerDescriptor>> {
        self.layers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownLayer(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &LayerDescriptor> + '_ {
        self.layers.values().map(|layer| layer.as_ref())
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

fn is_sql_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn is_layer_name(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
