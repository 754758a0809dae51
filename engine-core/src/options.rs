//! Typed configuration, with defaults, read by the engine on every request.

use std::collections::HashMap;

use crate::error::{CacheError, Result};
use crate::key::{default_key, KeyFn};
use crate::storage::Storage;

/// Engine configuration.
///
/// Unlike the dynamic string-keyed options map some caching middlewares
/// use, this is a typed struct with the fields enumerated in the component
/// design, plus an `extra` escape hatch reserved for extension-store
/// parameters a future `Metastore`/`Entitystore` backend might need.
#[derive(Clone)]
pub struct Config {
    /// Generates a cache key from a request. Defaults to [`default_key`].
    pub cache_key: KeyFn,
    /// Resolves metastore/entitystore URIs to store instances, memoizing
    /// resolutions.
    pub storage: Storage,
    /// URI of the metastore, e.g. `heap:/`, `file:/abs/path`,
    /// `memcached://host[:port]/namespace`.
    pub metastore: String,
    /// URI of the entitystore, same scheme set as `metastore`.
    pub entitystore: String,
    /// Seconds assigned to responses lacking freshness info.
    pub default_ttl: i64,
    /// Request headers whose presence forces private treatment.
    pub private_headers: Vec<String>,
    /// Honor `Cache-Control: no-cache` on the request (reload).
    pub allow_reload: bool,
    /// Honor `Cache-Control: max-age=0` on the request (revalidate).
    pub allow_revalidate: bool,
    /// Emit a per-request trace line via `log::info!`.
    pub verbose: bool,
    /// Escape hatch for store-specific extension parameters.
    pub extra: HashMap<String, String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("storage", &self.storage)
            .field("metastore", &self.metastore)
            .field("entitystore", &self.entitystore)
            .field("default_ttl", &self.default_ttl)
            .field("private_headers", &self.private_headers)
            .field("allow_reload", &self.allow_reload)
            .field("allow_revalidate", &self.allow_revalidate)
            .field("verbose", &self.verbose)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_key: std::sync::Arc::new(default_key),
            storage: Storage::new(),
            metastore: "heap:/".to_string(),
            entitystore: "heap:/".to_string(),
            default_ttl: 0,
            private_headers: vec![
                "Authorization".to_string(),
                "Cookie".to_string(),
            ],
            allow_reload: false,
            allow_revalidate: false,
            verbose: true,
            extra: HashMap::new(),
        }
    }
}

impl Config {
    /// Start from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the cache-key generator.
    pub fn with_cache_key(mut self, key: KeyFn) -> Self {
        self.cache_key = key;
        self
    }

    /// Override the metastore URI.
    pub fn with_metastore(mut self, uri: impl Into<String>) -> Self {
        self.metastore = uri.into();
        self
    }

    /// Override the entitystore URI.
    pub fn with_entitystore(mut self, uri: impl Into<String>) -> Self {
        self.entitystore = uri.into();
        self
    }

    /// Override the default TTL.
    pub fn with_default_ttl(mut self, seconds: i64) -> Self {
        self.default_ttl = seconds;
        self
    }

    /// Override the private-header set.
    pub fn with_private_headers(mut self, headers: Vec<String>) -> Self {
        self.private_headers = headers;
        self
    }

    /// Validate the configuration and resolve its stores eagerly, so an
    /// unknown URI scheme fails at startup rather than on first request.
    pub async fn build(self) -> Result<Self> {
        self.storage
            .metastore(&self.metastore)
            .await
            .map_err(|_| CacheError::Configuration(self.metastore.clone()))?;
        self.storage
            .entitystore(&self.entitystore)
            .await
            .map_err(|_| CacheError::Configuration(self.entitystore.clone()))?;
        Ok(self)
    }
}
