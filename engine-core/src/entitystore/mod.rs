//! Content-addressed store of response bodies.

mod file;
mod heap;
#[cfg(feature = "manager-memcached")]
mod memcached;

pub use file::FileEntitystore;
pub use heap::HeapEntitystore;
#[cfg(feature = "manager-memcached")]
pub use memcached::MemcachedEntitystore;

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::Result;

/// A readable body, handed back by [`Entitystore::open`] instead of a
/// fully buffered `Vec<u8>`.
pub type BodyStream = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Content-addressed body storage, keyed by a digest of the body's bytes.
///
/// Writes are idempotent (writing the same bytes twice yields the same
/// digest and is a no-op the second time) and atomic against concurrent
/// readers: a reader never observes a partially written blob.
#[async_trait]
pub trait Entitystore: Send + Sync + 'static {
    /// Open a body by digest as a stream, or `None` if absent. Prefer this
    /// over `read` when the caller can consume the body incrementally
    /// instead of holding the whole thing in memory.
    async fn open(&self, digest: &str) -> Result<Option<BodyStream>>;

    /// Read a body by digest, or `None` if absent.
    async fn read(&self, digest: &str) -> Result<Option<Vec<u8>>>;

    /// Write a body, returning its digest and size. Idempotent.
    async fn write(&self, body: &[u8]) -> Result<(String, usize)>;

    /// Delete a body by digest. A missing digest is not an error.
    async fn purge(&self, digest: &str) -> Result<()>;
}

/// SHA-1 hex digest of the given bytes, the strong content address this store
/// calls for.
pub fn digest_of(body: &[u8]) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}
