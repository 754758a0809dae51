#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! Caching decision engine for an HTTP reverse-proxy middleware, following
//! RFC 7234 freshness and validation semantics.
//!
//! This crate implements the engine's decision logic, not transport I/O.
//! It is driven by something that owns the actual request/response types
//! (see the `engine-tower` crate for a Tower integration): that driver
//! converts to and from [`Request`]/[`Response`], implements [`engine::Backend`]
//! to forward to the origin, and calls [`engine::Context::call`] once per
//! request.
//!
//! ## Components
//!
//! - [`options::Config`] — typed configuration (cache key, stores, TTL defaults).
//! - [`request::Request`] / [`response::Response`] — the engine's view of a
//!   request/response, with cache-control parsing and freshness arithmetic.
//! - [`key`] — derives a cache key from a request.
//! - [`storage::Storage`] — resolves metastore/entitystore URIs to backends.
//! - [`metastore`] — per-key variant lists (heap, file, memcached).
//! - [`entitystore`] — content-addressed body storage (heap, file, memcached).
//! - [`engine`] — the request state machine (`Context`) and its [`engine::Trace`].
//!
//! ```no_run
//! # async fn run() -> engine_core::error::Result<()> {
//! use engine_core::options::Config;
//! use engine_core::engine::Context;
//!
//! let config = Config::new().build().await?;
//! let ctx = Context::new(&config).await?;
//! # let _ = ctx;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod entitystore;
pub mod error;
pub mod key;
pub mod metastore;
pub mod options;
pub mod request;
pub mod response;
pub mod storage;

pub use engine::{Backend, Context, Event, Outcome, Trace};
pub use error::{CacheError, Result};
pub use options::Config;
pub use request::Request;
pub use response::Response;
