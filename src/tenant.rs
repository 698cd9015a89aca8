//! Tenant resolution.
//!
//! Every tile request carries the caller's tenant; the server never renders a
//! tile without one.
use std::fmt;

use axum::http::{HeaderMap, HeaderName};

use crate::error::{Error, Result};

/// Opaque tenant identifier, compared by exact value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(String);

impl TenantId {
    pub fn new<S: Into<String>>(id: S) -> TenantId {
        TenantId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: TenantId,
}

/// Derives the tenant of a request from its headers.
pub trait TenantResolver: Send + Sync {
    /// Returns `None` when the request does not carry a usable tenant.
    fn resolve(&self, headers: &HeaderMap) -> Option<TenantContext>;
}

/// Reads the tenant from a single request header, as set by an upstream
/// authenticating proxy.
#[derive(Clone, Debug)]
pub struct HeaderTenantResolver {
    header: HeaderName,
}

impl HeaderTenantResolver {
    pub fn new(header: &str) -> Result<HeaderTenantResolver> {
        let header = HeaderName::try_from(header)
            .map_err(|_| Error::InvalidSetting(format!("{:?} is not a valid header name", header)))?;
        Ok(HeaderTenantResolver { header })
    }
}

impl TenantResolver for HeaderTenantResolver {
    fn resolve(&self, headers: &HeaderMap) -> Option<TenantContext> {
        let value = headers.get(&self.header)?.to_str().ok()?.trim();
        if value.is_empty() {
            return None;
        }

        Some(TenantContext {
            tenant_id: TenantId::new(value),
        })
    }
}
