//! In-process cache of encoded tiles.
//!
//! Entries are keyed by layer, tenant and tile address, so a tile rendered for
//! one tenant can never be served to another. The cache holds at most
//! `max_entries` tiles; beyond that the least useful ones are evicted. Expiry
//! is checked on read against the cache's [`Clock`], and
//! [`TileCache::purge_expired`] reclaims memory held by stale entries.
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;

use crate::tenant::TenantId;
use crate::tile::TileCoordinate;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TileCacheKey {
    pub layer: String,
    pub tenant: TenantId,
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCacheKey {
    pub fn new(layer: &str, tenant: &TenantId, tile: &TileCoordinate) -> TileCacheKey {
        TileCacheKey {
            layer: layer.to_string(),
            tenant: tenant.clone(),
            zoom: tile.zoom(),
            x: tile.x(),
            y: tile.y(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TileCacheEntry {
    pub payload: Bytes,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl TileCacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Source of the current time for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub struct TileCache {
    entries: Cache<TileCacheKey, TileCacheEntry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TileCache {
    pub fn new(ttl: Duration, max_entries: u64) -> TileCache {
        TileCache::with_clock(ttl, max_entries, Arc::new(SystemClock))
    }

    /// Entries never outlive `ttl` of wall time, whatever the clock says.
    pub fn with_clock(ttl: Duration, max_entries: u64, clock: Arc<dyn Clock>) -> TileCache {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        TileCache {
            entries,
            ttl,
            clock,
        }
    }

    /// Default time to live of new entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached payload if present and not yet expired. Expired
    /// entries are removed on the way out.
    pub fn get(&self, key: &TileCacheKey) -> Option<Bytes> {
        let now = self.clock.now();
        let entry = self.entries.get(key)?;
        if !entry.is_expired(now) {
            return Some(entry.payload);
        }

        if self.remove_expired(key, now) {
            log::debug!("expired cache entry for {:?}", key);
        }
        None
    }

    /// Removes `key` only while it is still expired, so a concurrent `put`
    /// is never lost. Returns whether an entry was removed.
    fn remove_expired(&self, key: &TileCacheKey, now: Instant) -> bool {
        let result = self
            .entries
            .entry(key.clone())
            .and_compute_with(|current| match current {
                Some(entry) if entry.value().is_expired(now) => Op::Remove,
                _ => Op::Nop,
            });

        matches!(result, CompResult::Removed(_))
    }

    /// Stores a payload, replacing any previous entry for the key.
    pub fn put(&self, key: TileCacheKey, payload: Bytes, ttl: Duration) {
        let now = self.clock.now();
        self.entries.insert(
            key,
            TileCacheEntry {
                payload,
                created_at: now,
                expires_at: now + ttl,
            },
        );
    }

    /// Drops every entry of `layer` belonging to `tenant` and returns how many
    /// were removed. Other tenants and layers are left alone.
    pub fn invalidate(&self, layer: &str, tenant: &TenantId) -> usize {
        let mut removed = 0;
        for (key, _) in self.entries.iter() {
            if key.layer == layer && &key.tenant == tenant && self.entries.remove(key.as_ref()).is_some() {
                removed += 1;
            }
        }

        log::debug!("invalidated {} tiles of layer {} for tenant {}", removed, layer, tenant);
        removed
    }

    /// Removes all expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<Arc<TileCacheKey>> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key)
            .collect();

        expired
            .iter()
            .filter(|key| self.remove_expired(key, now))
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
