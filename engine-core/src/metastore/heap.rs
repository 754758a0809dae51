use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{now, Variant};
use crate::entitystore::Entitystore;
use crate::error::Result;
use crate::request::Request;
use crate::response::Response;

#[derive(Default, Debug)]
struct State {
    variants: HashMap<String, Vec<Variant>>,
    /// Reference count per body digest, across all keys' variant lists.
    refcounts: HashMap<String, usize>,
}

impl State {
    fn incref(&mut self, digest: &str) {
        *self.refcounts.entry(digest.to_string()).or_insert(0) += 1;
    }

    fn decref(&mut self, digest: &str) -> bool {
        match self.refcounts.get_mut(digest) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.refcounts.remove(digest);
                true
            }
            None => true,
        }
    }
}

/// In-process volatile metastore (the `heap:/` metastore scheme).
#[derive(Clone, Default, Debug)]
pub struct HeapMetastore {
    state: Arc<RwLock<State>>,
}

impl HeapMetastore {
    /// Create an empty metastore.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl super::Metastore for HeapMetastore {
    async fn lookup(
        &self,
        key: &str,
        request: &Request,
        entitystore: &dyn Entitystore,
    ) -> Result<Option<Response>> {
        let variant = {
            let state = self.state.read().await;
            match state.variants.get(key) {
                Some(list) => list.iter().find(|v| v.matches(request)).cloned(),
                None => None,
            }
        };
        let Some(variant) = variant else { return Ok(None) };

        match entitystore.read(&variant.body_digest).await? {
            Some(body) => Ok(Some(variant.into_response(body)?)),
            None => {
                // Entitystore read failure on hit: treat as miss, drop the
                // stale entry opportunistically.
                let mut state = self.state.write().await;
                if let Some(list) = state.variants.get_mut(key) {
                    list.retain(|v| v.body_digest != variant.body_digest);
                }
                Ok(None)
            }
        }
    }

    async fn store(
        &self,
        key: &str,
        request: &Request,
        response: &Response,
        entitystore: &dyn Entitystore,
    ) -> Result<()> {
        if response.vary_is_star() {
            return Ok(());
        }
        let (digest, len) = entitystore.write(response.body()).await?;
        let variant = Variant::from_stored(request, response, digest.clone(), len);

        let mut state = self.state.write().await;
        state.incref(&digest);
        let list = state.variants.entry(key.to_string()).or_default();
        let mut superseded = Vec::new();
        list.retain(|existing| {
            if existing.vary_snapshot == variant.vary_snapshot {
                superseded.push(existing.body_digest.clone());
                false
            } else {
                true
            }
        });
        list.insert(0, variant);
        for digest in superseded {
            if state.decref(&digest) {
                entitystore.purge(&digest).await?;
            }
        }
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(list) = state.variants.get_mut(key) {
            let past = httpdate::fmt_http_date(
                std::time::UNIX_EPOCH + std::time::Duration::from_secs(1),
            );
            for variant in list.iter_mut() {
                let cc = variant
                    .headers
                    .iter()
                    .find(|(k, _)| k == "cache-control")
                    .map(|(_, v)| v.as_str());
                let cc = crate::response::force_stale_cache_control(cc);
                variant.headers.retain(|(k, _)| k != "expires" && k != "cache-control");
                variant.headers.push(("expires".to_string(), past.clone()));
                variant.headers.push(("cache-control".to_string(), cc));
            }
        }
        let _ = now();
        Ok(())
    }

    async fn purge(&self, key: &str, entitystore: &dyn Entitystore) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(list) = state.variants.remove(key) else { return Ok(()) };
        let digests: Vec<String> =
            list.into_iter().map(|v| v.body_digest).collect();
        for digest in digests {
            if state.decref(&digest) {
                entitystore.purge(&digest).await?;
            }
        }
        Ok(())
    }
}
