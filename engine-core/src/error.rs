//! The crate's error type and `Result` alias.

use thiserror::Error;

/// A `Result` typedef to use with the [`CacheError`] type
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors surfaced by the caching engine.
///
/// Most of these are recoverable: a failing metastore or entitystore
/// degrades the request to a cache miss rather than failing it (see
/// `Context::lookup`/`Context::store`). Only configuration errors and
/// backend transport failures propagate to the caller.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Error from http
    #[error(transparent)]
    Http(#[from] http::Error),
    /// There was an error converting a header to a string
    #[error(transparent)]
    HeaderToStr(#[from] http::header::ToStrError),
    /// There was an error parsing an HTTP header value
    #[error(transparent)]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    /// There was an error parsing an HTTP header name
    #[error(transparent)]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),
    /// There was an error parsing the URL
    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),
    /// I/O error from a storage backend.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Error (de)serializing a stored metastore entry.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    /// The configured metastore or entitystore URI uses an unrecognized
    /// scheme, or a recognized scheme with a malformed body (missing host,
    /// unparsable path). Fails fast at `Config::build` or first resolution.
    #[error("unsupported storage URI `{0}`")]
    Configuration(String),
    /// The backend (origin server) call failed. Propagated unchanged; no
    /// cache write occurs for this request.
    #[error("backend request failed: {0}")]
    Backend(String),
}
