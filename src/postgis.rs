//! PostGIS geometry store.
//!
//! Statements are rendered once per layer when the fetcher is built. Request
//! values (tenant and bounding box) only ever travel as bind parameters.
use std::collections::HashMap;

// TODO: remove once async fn in dyn traits is stable
use async_trait::async_trait;

use futures::TryStreamExt;
use geo::Geometry;
use sqlx::{query, PgPool, Row};
use wkt::TryFromWkt;

use crate::config::{LayerCatalog, LayerDescriptor};
use crate::error::{Error, Result};
use crate::feature::{PropertyValue, SourceFeature};
use crate::tenant::TenantId;
use crate::tile::GeoBoundingBox;
use crate::GeometryFetcher;

pub struct PostgisFetcher {
    pool: PgPool,
    statements: HashMap<String, String>,
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

/// Quotes every part of a possibly schema-qualified table name.
fn quote_table(table: &str) -> String {
    table.split('.').map(quote).collect::<Vec<_>>().join(".")
}

/// Builds the parameterised select for one layer.
///
/// `$1` is the tenant, `$2..$5` the WGS84 envelope (west, south, east, north).
pub fn select_statement(layer: &LayerDescriptor) -> String {
    let geom = quote(&layer.geometry_column);
    let attributes: Vec<String> = layer
        .attribute_columns
        .iter()
        .map(|column| format!("'{}', {}", column, quote(column)))
        .collect();

    let mut sql = format!(
        "SELECT ST_AsText({geom}) AS geometry, jsonb_build_object({attributes}) AS attributes \
         FROM {table} WHERE {tenant}::text = $1",
        geom = geom,
        attributes = attributes.join(", "),
        table = quote_table(&layer.source_table),
        tenant = quote(&layer.tenant_column),
    );

    if let Some(column) = &layer.soft_delete_column {
        sql.push_str(&format!(" AND {} IS NULL", quote(column)));
    }
    sql.push_str(&format!(
        " AND {geom} IS NOT NULL AND ST_Intersects({geom}, ST_MakeEnvelope($2, $3, $4, $5, 4326))",
        geom = geom
    ));

    sql
}

impl PostgisFetcher {
    pub fn new(pool: PgPool, catalog: &LayerCatalog) -> PostgisFetcher {
        let statements = catalog
            .iter()
            .map(|layer| (layer.name.clone(), select_statement(layer)))
            .collect();

        PostgisFetcher { pool, statements }
    }

    fn feature(layer: &LayerDescriptor, wkt: &str, attributes: serde_json::Value) -> Result<SourceFeature> {
        let geometry = Geometry::<f64>::try_from_wkt_str(wkt)
            .map_err(|e| Error::EncodingFailure(format!("undecodable geometry: {}", e)))?;

        let mut attributes = match attributes {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        // Keep the configured column order so tiles stay deterministic
        let mut feature = SourceFeature::new(geometry);
        for column in &layer.attribute_columns {
            let value = attributes.remove(column).and_then(PropertyValue::from_json);
            feature = feature.with_attribute(column.as_str(), value);
        }
        Ok(feature)
    }
}

#[async_trait]
impl GeometryFetcher for PostgisFetcher {
    async fn fetch(
        &self,
        layer: &LayerDescriptor,
        tenant: &TenantId,
        bbox: &GeoBoundingBox,
    ) -> Result<Vec<SourceFeature>> {
        let sql = self
            .statements
            .get(&layer.name)
            .ok_or_else(|| Error::UnknownLayer(layer.name.clone()))?;

        let mut stream = query(sql)
            .bind(tenant.as_str())
            .bind(bbox.min_lon)
            .bind(bbox.min_lat)
            .bind(bbox.max_lon)
            .bind(bbox.max_lat)
            .fetch(&self.pool);

        let mut features = Vec::new();
        while let Some(row) = stream.try_next().await? {
            let wkt: Option<String> = row.try_get("geometry")?;
            let attributes: Option<serde_json::Value> = row.try_get("attributes")?;
            let Some(wkt) = wkt else {
                continue;
            };

            match Self::feature(layer, &wkt, attributes.unwrap_or_default()) {
                Ok(feature) => features.push(feature),
                Err(e) => log::warn!("layer {}: skipping row for tenant {}: {}", layer.name, tenant, e),
            }
        }

        log::debug!("layer {}: fetched {} features for tenant {}", layer.name, features.len(), tenant);
        Ok(features)
    }

    async fn ping(&self) -> Result<()> {
        query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
