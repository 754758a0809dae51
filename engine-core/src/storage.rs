//! Resolves a metastore/entitystore URI to a backend instance, memoizing
//! resolutions so repeated lookups of the same URI share one instance (in
//! particular, so the `heap:/` scheme behaves as a real cache instead of a
//! fresh, empty map per call).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use url::Url;

use crate::entitystore::{Entitystore, FileEntitystore, HeapEntitystore};
use crate::error::{CacheError, Result};
use crate::metastore::{FileMetastore, HeapMetastore, Metastore};

#[cfg(feature = "manager-memcached")]
use crate::entitystore::MemcachedEntitystore;
#[cfg(feature = "manager-memcached")]
use crate::metastore::MemcachedMetastore;

/// The storage façade: given a `metastore`/`entitystore` URI, returns a
/// shared handle to the backend it names.
#[derive(Clone, Default)]
pub struct Storage {
    metastores: Arc<RwLock<HashMap<String, Arc<dyn Metastore>>>>,
    entitystores: Arc<RwLock<HashMap<String, Arc<dyn Entitystore>>>>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    /// A façade with no resolutions cached yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve (and memoize) the metastore named by `uri`.
    pub async fn metastore(&self, uri: &str) -> Result<Arc<dyn Metastore>> {
        if let Some(existing) = self.metastores.read().await.get(uri) {
            return Ok(existing.clone());
        }
        let store: Arc<dyn Metastore> = match parse_scheme(uri)? {
            Scheme::Heap => Arc::new(HeapMetastore::new()),
            Scheme::File(path) => Arc::new(FileMetastore::new(path)),
            #[cfg(feature = "manager-memcached")]
            Scheme::Memcached { addr, namespace } => {
                Arc::new(MemcachedMetastore::new(addr, namespace))
            }
            #[cfg(not(feature = "manager-memcached"))]
            Scheme::MemcachedUnsupported => {
                return Err(CacheError::Configuration(uri.to_string()))
            }
        };
        self.metastores.write().await.insert(uri.to_string(), store.clone());
        Ok(store)
    }

    /// Resolve (and memoize) the entitystore named by `uri`.
    pub async fn entitystore(&self, uri: &str) -> Result<Arc<dyn Entitystore>> {
        if let Some(existing) = self.entitystores.read().await.get(uri) {
            return Ok(existing.clone());
        }
        let store: Arc<dyn Entitystore> = match parse_scheme(uri)? {
            Scheme::Heap => Arc::new(HeapEntitystore::new()),
            Scheme::File(path) => Arc::new(FileEntitystore::new(path)),
            #[cfg(feature = "manager-memcached")]
            Scheme::Memcached { addr, namespace } => {
                Arc::new(MemcachedEntitystore::new(addr, namespace))
            }
            #[cfg(not(feature = "manager-memcached"))]
            Scheme::MemcachedUnsupported => {
                return Err(CacheError::Configuration(uri.to_string()))
            }
        };
        self.entitystores.write().await.insert(uri.to_string(), store.clone());
        Ok(store)
    }
}

enum Scheme {
    Heap,
    File(String),
    #[cfg(feature = "manager-memcached")]
    Memcached { addr: String, namespace: String },
    #[cfg(not(feature = "manager-memcached"))]
    #[allow(dead_code)]
    MemcachedUnsupported,
}

fn parse_scheme(uri: &str) -> Result<Scheme> {
    if let Some(rest) = uri.strip_prefix("heap:") {
        let _ = rest;
        return Ok(Scheme::Heap);
    }
    if let Some(path) = uri.strip_prefix("file:") {
        return Ok(Scheme::File(path.to_string()));
    }
    if uri.starts_with("memcached:") {
        let parsed = Url::parse(uri)
            .map_err(|_| CacheError::Configuration(uri.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| CacheError::Configuration(uri.to_string()))?;
        let addr = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => format!("{host}:11211"),
        };
        let namespace = parsed.path().trim_start_matches('/').to_string();
        #[cfg(feature = "manager-memcached")]
        return Ok(Scheme::Memcached { addr, namespace });
        #[cfg(not(feature = "manager-memcached"))]
        {
            let _ = (addr, namespace);
            return Ok(Scheme::MemcachedUnsupported);
        }
    }
    Err(CacheError::Configuration(uri.to_string()))
}
