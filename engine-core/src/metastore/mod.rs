//! Per-key list of stored `(request-vary-snapshot, response-headers,
//! body-handle)` variants.

mod file;
mod heap;
#[cfg(feature = "manager-memcached")]
mod memcached;

pub use file::FileMetastore;
pub use heap::HeapMetastore;
#[cfg(feature = "manager-memcached")]
pub use memcached::MemcachedMetastore;

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};

use crate::entitystore::Entitystore;
use crate::error::Result;
use crate::request::Request;
use crate::response::Response;

/// One stored `(request-vary-snapshot, response-headers, body-handle)`
/// tuple under a cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    /// Names of the headers this variant was selected on, lowercased.
    pub vary: Vec<String>,
    /// Snapshot of the storing request's headers named in `vary`.
    pub vary_snapshot: HashMap<String, String>,
    /// Serialized response headers (name, value) pairs, order-preserving.
    pub headers: Vec<(String, String)>,
    /// Response status code.
    pub status: u16,
    /// Digest of the response body in the paired entitystore.
    pub body_digest: String,
    /// Byte length of the response body, for diagnostics.
    pub body_len: usize,
    /// The method of the request that produced this response.
    pub request_method: String,
    /// When this variant was stored (Unix seconds) — used for "most
    /// recently stored wins" tie-breaks and for age recomputation.
    pub stored_at: i64,
}

impl Variant {
    fn matches(&self, request: &Request) -> bool {
        let incoming = request.vary_snapshot(&self.vary);
        incoming == self.vary_snapshot
    }

    /// Rebuild a `Response` and its body from this variant plus a body read
    /// from the entitystore, recomputing `Age` as of now.
    fn into_response(self, body: Vec<u8>) -> Result<Response> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                http::header::HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        let method = self
            .request_method
            .parse::<Method>()
            .unwrap_or(Method::GET);
        let status = StatusCode::from_u16(self.status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Ok(Response::new(
            status,
            headers,
            body,
            method,
            self.stored_at,
            self.stored_at,
        ))
    }

    fn from_stored(
        request: &Request,
        response: &Response,
        body_digest: String,
        body_len: usize,
    ) -> Self {
        let vary = response.vary_header_names();
        let vary_snapshot = request.vary_snapshot(&vary);
        let mut headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string()))
            })
            .collect();
        headers
            .retain(|(k, _)| !k.eq_ignore_ascii_case(http::header::AGE.as_str()));
        headers.push(("age".to_string(), "0".to_string()));

        Self {
            vary,
            vary_snapshot,
            headers,
            status: response.status().as_u16(),
            body_digest,
            body_len,
            request_method: response.request_method().as_str().to_string(),
            stored_at: now(),
        }
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Keyed store of response metadata and body references.
///
/// `lookup`, `store`, `invalidate`, and `purge` must be atomic with respect
/// to each other for a given key.
#[async_trait]
pub trait Metastore: Send + Sync + 'static {
    /// Select the variant (if any) whose vary-snapshot matches `request`,
    /// and bind its body from `entitystore`. Returns `None` on miss, on a
    /// `Vary: *` variant (never selectable), or if the body is missing from
    /// the entitystore (the stale entry is opportunistically dropped).
    async fn lookup(
        &self,
        key: &str,
        request: &Request,
        entitystore: &dyn Entitystore,
    ) -> Result<Option<Response>>;

    /// Write the response body through `entitystore`, then prepend
    /// `(request_snapshot, response_headers_with_digest, handle)` to the
    /// variant list. Variants sharing an identical vary-snapshot are
    /// superseded (removed) by the new one. A response with `Vary: *` is
    /// refused.
    async fn store(
        &self,
        key: &str,
        request: &Request,
        response: &Response,
        entitystore: &dyn Entitystore,
    ) -> Result<()>;

    /// Mark every stored variant under `key` as expired (e.g. rewrite
    /// `Expires` into the past), leaving bodies in place for revalidation.
    async fn invalidate(&self, key: &str) -> Result<()>;

    /// Drop every variant under `key`. Associated bodies become eligible
    /// for entitystore deletion; implementations reference-count digests
    /// across the variants they still hold and purge only digests with no
    /// remaining referrer.
    async fn purge(&self, key: &str, entitystore: &dyn Entitystore) -> Result<()>;
}
