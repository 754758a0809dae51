use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{digest_of, BodyStream, Entitystore};
use crate::error::Result;

/// In-process volatile body store (the `heap:/` entitystore scheme).
#[derive(Clone, Default, Debug)]
pub struct HeapEntitystore {
    blobs: Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>,
}

impl HeapEntitystore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Entitystore for HeapEntitystore {
    async fn open(&self, digest: &str) -> Result<Option<BodyStream>> {
        let blobs = self.blobs.read().await;
        Ok(blobs.get(digest).map(|b| {
            let stream: BodyStream = Box::pin(Cursor::new(b.as_ref().clone()));
            stream
        }))
    }

    async fn read(&self, digest: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(digest).map(|b| b.as_ref().clone()))
    }

    async fn write(&self, body: &[u8]) -> Result<(String, usize)> {
        let digest = digest_of(body);
        let mut blobs = self.blobs.write().await;
        blobs.entry(digest.clone()).or_insert_with(|| Arc::new(body.to_vec()));
        Ok((digest, body.len()))
    }

    async fn purge(&self, digest: &str) -> Result<()> {
        self.blobs.write().await.remove(digest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let store = HeapEntitystore::new();
        let (digest, size) = store.write(b"hello").await.unwrap();
        assert_eq!(size, 5);
        assert_eq!(store.read(&digest).await.unwrap().unwrap(), b"hello");
    }

    #[tokio::test]
    async fn write_is_idempotent() {
        let store = HeapEntitystore::new();
        let (d1, _) = store.write(b"same").await.unwrap();
        let (d2, _) = store.write(b"same").await.unwrap();
        assert_eq!(d1, d2);
    }

    #[tokio::test]
    async fn purge_removes_blob() {
        let store = HeapEntitystore::new();
        let (digest, _) = store.write(b"gone").await.unwrap();
        store.purge(&digest).await.unwrap();
        assert!(store.read(&digest).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_streams_the_same_bytes_as_read() {
        use tokio::io::AsyncReadExt;

        let store = HeapEntitystore::new();
        let (digest, _) = store.write(b"streamed").await.unwrap();

        let mut stream = store.open(&digest).await.unwrap().unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"streamed");
        assert!(store.open("missing").await.unwrap().is_none());
    }
}
