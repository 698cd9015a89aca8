//! Test doubles: an in-memory geometry store and a manual clock.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use geo::{BoundingRect, Intersects};

use crate::cache::Clock;
use crate::config::LayerDescriptor;
use crate::error::{Error, Result};
use crate::feature::SourceFeature;
use crate::tenant::TenantId;
use crate::tile::GeoBoundingBox;
use crate::GeometryFetcher;

#[derive(Default)]
pub struct InMemoryFetcher {
    records: Mutex<HashMap<(String, TenantId), Vec<SourceFeature>>>,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl InMemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        InMemoryFetcher {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn insert(&self, layer: &str, tenant: &str, feature: SourceFeature) {
        self.records
            .lock()
            .unwrap()
            .entry((layer.to_string(), TenantId::new(tenant)))
            .or_default()
            .push(feature);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeometryFetcher for InMemoryFetcher {
    async fn fetch(
        &self,
        layer: &LayerDescriptor,
        tenant: &TenantId,
        bbox: &GeoBoundingBox,
    ) -> Result<Vec<SourceFeature>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.ping().await?;

        let rect = bbox.to_rect();
        let records = self.records.lock().unwrap();
        Ok(records
            .get(&(layer.name.clone(), tenant.clone()))
            .map(|features| {
                features
                    .iter()
                    .filter(|f| {
                        f.geometry
                            .bounding_rect()
                            .map_or(false, |bounds| bounds.intersects(&rect))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::StorageUnavailable(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    offset_ms: AtomicU64,
}

impl Default for ManualClock {
    fn default() -> Self {
        ManualClock {
            start: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}
