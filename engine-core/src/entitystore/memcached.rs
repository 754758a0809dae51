//! Network-attached body store (the `memcached://host[:port][/namespace]`
//! entitystore scheme), speaking the memcached classic text protocol
//! directly over `tokio::net::TcpStream`.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::{digest_of, BodyStream, Entitystore};
use crate::error::{CacheError, Result};

/// A body store backed by a memcached server.
#[derive(Debug, Clone)]
pub struct MemcachedEntitystore {
    addr: String,
    namespace: String,
}

impl MemcachedEntitystore {
    /// `addr` is `host:port`; `namespace` prefixes every key.
    pub fn new(addr: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { addr: addr.into(), namespace: namespace.into() }
    }

    fn namespaced(&self, digest: &str) -> String {
        if self.namespace.is_empty() {
            digest.to_string()
        } else {
            format!("{}:{}", self.namespace, digest)
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        TcpStream::connect(&self.addr)
            .await
            .map_err(|e| CacheError::Backend(format!("memcached connect: {e}")))
    }
}

#[async_trait]
impl Entitystore for MemcachedEntitystore {
    async fn open(&self, digest: &str) -> Result<Option<BodyStream>> {
        let mut stream = self.connect().await?;
        let cmd = format!("get {}\r\n", self.namespaced(digest));
        stream
            .write_all(cmd.as_bytes())
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let mut reader = BufReader::new(stream);
        let header = read_line(&mut reader).await?;
        if header.starts_with("END") {
            return Ok(None);
        }
        // VALUE <key> <flags> <bytes>
        let len: u64 = header
            .split_whitespace()
            .nth(3)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                CacheError::Backend("malformed memcached VALUE line".into())
            })?;
        // The body is read through a bounded view over the connection;
        // the trailing "\r\nEND\r\n" is left unread and the connection
        // dropped once the caller finishes the stream.
        let stream: BodyStream = Box::pin(reader.take(len));
        Ok(Some(stream))
    }

    async fn read(&self, digest: &str) -> Result<Option<Vec<u8>>> {
        let mut stream = self.connect().await?;
        let cmd = format!("get {}\r\n", self.namespaced(digest));
        stream
            .write_all(cmd.as_bytes())
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let mut reader = BufReader::new(&mut stream);
        let header = read_line(&mut reader).await?;
        if header.starts_with("END") {
            return Ok(None);
        }
        // VALUE <key> <flags> <bytes>
        let len: usize = header
            .split_whitespace()
            .nth(3)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                CacheError::Backend("malformed memcached VALUE line".into())
            })?;
        let mut body = vec![0u8; len];
        reader
            .read_exact(&mut body)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        // Trailing \r\n and END\r\n
        let _ = read_line(&mut reader).await?;
        let _ = read_line(&mut reader).await?;
        Ok(Some(body))
    }

    async fn write(&self, body: &[u8]) -> Result<(String, usize)> {
        let digest = digest_of(body);
        let mut stream = self.connect().await?;
        let cmd = format!(
            "set {} 0 0 {}\r\n",
            self.namespaced(&digest),
            body.len()
        );
        stream
            .write_all(cmd.as_bytes())
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        stream
            .write_all(body)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        stream
            .write_all(b"\r\n")
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let mut reader = BufReader::new(&mut stream);
        let reply = read_line(&mut reader).await?;
        if !reply.starts_with("STORED") {
            return Err(CacheError::Backend(format!(
                "memcached set failed: {reply}"
            )));
        }
        Ok((digest, body.len()))
    }

    async fn purge(&self, digest: &str) -> Result<()> {
        let mut stream = self.connect().await?;
        let cmd = format!("delete {}\r\n", self.namespaced(digest));
        stream
            .write_all(cmd.as_bytes())
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
