use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{digest_of, BodyStream, Entitystore};
use crate::error::Result;

/// Directory-tree body store (the `file:/...` entitystore scheme). One blob
/// per digest; writes land in a temp file beside the target and are renamed
/// into place so a reader never observes a partial body.
#[derive(Debug, Clone)]
pub struct FileEntitystore {
    root: PathBuf,
}

impl FileEntitystore {
    /// Open (creating if necessary) a body store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        // Shard by the first two hex chars so a single directory never
        // holds an unbounded number of entries.
        let (shard, rest) = digest.split_at(2.min(digest.len()));
        self.root.join(shard).join(rest)
    }
}

#[async_trait]
impl Entitystore for FileEntitystore {
    async fn open(&self, digest: &str) -> Result<Option<BodyStream>> {
        match tokio::fs::File::open(self.blob_path(digest)).await {
            Ok(file) => {
                let stream: BodyStream = Box::pin(file);
                Ok(Some(stream))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, digest: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.blob_path(digest)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, body: &[u8]) -> Result<(String, usize)> {
        let digest = digest_of(body);
        let path = self.blob_path(&digest);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::metadata(&path).await.is_ok() {
            // Idempotent: identical content already on disk.
            return Ok((digest, body.len()));
        }
        let tmp = tmp_path(&path);
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok((digest, body.len()))
    }

    async fn purge(&self, digest: &str) -> Result<()> {
        match tokio::fs::remove_file(self.blob_path(digest)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileEntitystore::new(dir.path());
        let (digest, size) = store.write(b"on disk").await.unwrap();
        assert_eq!(size, 7);
        assert_eq!(store.read(&digest).await.unwrap().unwrap(), b"on disk");
    }

    #[tokio::test]
    async fn missing_digest_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileEntitystore::new(dir.path());
        assert!(store.read("deadbeef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_is_a_no_op_for_missing_digest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileEntitystore::new(dir.path());
        store.purge("deadbeef").await.unwrap();
    }

    #[tokio::test]
    async fn open_streams_the_same_bytes_as_read() {
        use tokio::io::AsyncReadExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileEntitystore::new(dir.path());
        let (digest, _) = store.write(b"streamed from disk").await.unwrap();

        let mut stream = store.open(&digest).await.unwrap().unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"streamed from disk");
        assert!(store.open("deadbeef").await.unwrap().is_none());
    }
}
