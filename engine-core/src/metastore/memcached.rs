//! Network-attached metastore (the `memcached://host[:port][/namespace]`
//! scheme). Variant lists are JSON blobs keyed by a namespaced digest of
//! the cache key, stored through the same text protocol as
//! [`crate::entitystore::MemcachedEntitystore`].
//!
//! Memcached has no key-enumeration primitive, so unlike the heap and file
//! backends this implementation cannot scan for other keys still
//! referencing a digest before purging it. It falls back to the
//! best-effort purge this store allows: a digest is
//! purged as soon as its own key's variant list drops it, without
//! cross-key reference counting.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::Variant;
use crate::entitystore::{digest_of, Entitystore};
use crate::error::{CacheError, Result};
use crate::request::Request;
use crate::response::Response;

/// A metastore backed by a memcached server.
#[derive(Debug, Clone)]
pub struct MemcachedMetastore {
    addr: String,
    namespace: String,
}

impl MemcachedMetastore {
    /// `addr` is `host:port`; `namespace` prefixes every meta-key.
    pub fn new(addr: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { addr: addr.into(), namespace: namespace.into() }
    }

    fn meta_key(&self, key: &str) -> String {
        let digest = digest_of(key.as_bytes());
        if self.namespace.is_empty() {
            format!("meta:{digest}")
        } else {
            format!("{}:meta:{}", self.namespace, digest)
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        TcpStream::connect(&self.addr)
            .await
            .map_err(|e| CacheError::Backend(format!("memcached connect: {e}")))
    }

    async fn read_variants(&self, key: &str) -> Result<Vec<Variant>> {
        let mut stream = self.connect().await?;
        let cmd = format!("get {}\r\n", self.meta_key(key));
        stream
            .write_all(cmd.as_bytes())
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        let mut reader = BufReader::new(&mut stream);
        let header = read_line(&mut reader).await?;
        if header.starts_with("END") {
            return Ok(Vec::new());
        }
        let len: usize = header
            .split_whitespace()
            .nth(3)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let mut body = vec![0u8; len];
        reader
            .read_exact(&mut body)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(serde_json::from_slice(&body).unwrap_or_default())
    }

    async fn write_variants(&self, key: &str, variants: &[Variant]) -> Result<()> {
        let body = serde_json::to_vec(variants)?;
        let mut stream = self.connect().await?;
        let cmd =
            format!("set {} 0 0 {}\r\n", self.meta_key(key), body.len());
        stream
            .write_all(cmd.as_bytes())
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        stream
            .write_all(&body)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        stream
            .write_all(b"\r\n")
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        let mut reader = BufReader::new(&mut stream);
        let _ = read_line(&mut reader).await?;
        Ok(())
    }
}

async fn read_line<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<String> {
    use tokio::io::AsyncBufReadExt;
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .map_err(|e| CacheError::Backend(e.to_string()))?;
    Ok(line.trim_end().to_string())
}

#[async_trait]
impl super::Metastore for MemcachedMetastore {
    async fn lookup(
        &self,
        key: &str,
        request: &Request,
        entitystore: &dyn Entitystore,
    ) -> Result<Option<Response>> {
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
            entitystore.purge(&digest).await?;
        }
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
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
        let variants = self.read_variants(key).await?;
        self.write_variants(key, &[]).await?;
        for variant in variants {
            entitystore.purge(&variant.body_digest).await?;
        }
        Ok(())
    }
}
