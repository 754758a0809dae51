use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::Variant;
use crate::entitystore::Entitystore;
use crate::entitystore::digest_of;
use crate::error::Result;
use crate::request::Request;
use crate::response::Response;

/// Directory-tree metastore (the `file:/...` scheme). One JSON file per
/// cache key, named by the SHA-1 hex digest of the key, holding the
/// key's variant list. A single process-wide lock serializes
/// `lookup`/`store`/`invalidate`/`purge` against each other, which
/// satisfies the per-key atomicity the engine depends on at the
/// cost of cross-key concurrency — acceptable for the file backend, which
/// isn't meant for high request volume.
#[derive(Debug, Clone)]
pub struct FileMetastore {
    root: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FileMetastore {
    /// Open (creating if necessary) a metastore rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), lock: Arc::new(Mutex::new(())) }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", digest_of(key.as_bytes())))
    }

    async fn read_variants(&self, key: &str) -> Result<Vec<Variant>> {
        match tokio::fs::read(self.entry_path(key)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_variants(&self, key: &str, variants: &[Variant]) -> Result<()> {
        let path = self.entry_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if variants.is_empty() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }
        let bytes = serde_json::to_vec(variants)?;
        let tmp = tmp_path(&path);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Whether any OTHER key's variant list still references `digest`.
    /// Used to decide whether a superseded/purged variant's body can be
    /// reclaimed (reference-counted, done here by
    /// scan rather than a persisted index).
    async fn digest_still_referenced(&self, digest: &str) -> Result<bool> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(false)
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }
            let bytes = tokio::fs::read(entry.path()).await?;
            let variants: Vec<Variant> =
                serde_json::from_slice(&bytes).unwrap_or_default();
            if variants.iter().any(|v| v.body_digest == digest) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl super::Metastore for FileMetastore {
    async fn lookup(
        &self,
        key: &str,
        request: &Request,
        entitystore: &dyn Entitystore,
    ) -> Result<Option<Response>> {
        let _guard = self.lock.lock().await;
        let variants = self.read_variants(key).await?;
        let Some(variant) = variants.iter().find(|v| v.matches(request)).cloned() else {
            return Ok(None);
        };
        match entitystore.read(&variant.body_digest).await? {
            Some(body) => Ok(Some(variant.into_response(body)?)),
            None => {
                let mut remaining = variants;
                remaining.retain(|v| v.body_digest != variant.body_digest);
                self.write_variants(key, &remaining).await?;
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
        let _guard = self.lock.lock().await;
        let (digest, len) = entitystore.write(response.body()).await?;
        let variant = Variant::from_stored(request, response, digest, len);

        let mut variants = self.read_variants(key).await?;
        let mut superseded = Vec::new();
        variants.retain(|existing| {
            if existing.vary_snapshot == variant.vary_snapshot {
                superseded.push(existing.body_digest.clone());
                false
            } else {
                true
            }
        });
        variants.insert(0, variant);
        self.write_variants(key, &variants).await?;

        for digest in superseded {
            if !self.digest_still_referenced(&digest).await? {
                entitystore.purge(&digest).await?;
            }
        }
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut variants = self.read_variants(key).await?;
        let past = httpdate::fmt_http_date(
            std::time::UNIX_EPOCH + std::time::Duration::from_secs(1),
        );
        for variant in variants.iter_mut() {
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
        self.write_variants(key, &variants).await
    }

    async fn purge(&self, key: &str, entitystore: &dyn Entitystore) -> Result<()> {
        let _guard = self.lock.lock().await;
        let variants = self.read_variants(key).await?;
        self.write_variants(key, &[]).await?;
        for variant in variants {
            if !self.digest_still_referenced(&variant.body_digest).await? {
                entitystore.purge(&variant.body_digest).await?;
            }
        }
        Ok(())
    }
}

fn tmp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp-{}", std::process::id()));
    target.with_file_name(name)
}
