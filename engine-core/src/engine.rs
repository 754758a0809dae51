//! The request state machine: dispatches on method, consults the metastore,
//! forwards to the backend when needed, and decides what to store.

use async_trait::async_trait;
use http::{HeaderValue, Method, StatusCode};
use log::info;

use crate::entitystore::Entitystore;
use crate::error::Result;
use crate::metastore::Metastore;
use crate::options::Config;
use crate::request::{MethodClass, Request};
use crate::response::Response;

/// One decision the engine made while handling a request, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Forwarded unchanged; cache neither consulted nor written.
    Pass,
    /// Stored variants under the key were invalidated before passing.
    Invalidate,
    /// `no-cache` plus `allow_reload` forced a fetch past a fresh entry.
    Reload,
    /// A stored entry was fresh enough to serve directly.
    Fresh,
    /// A stored entry existed but needed revalidation.
    Stale,
    /// Revalidation confirmed the stored entry (backend returned 304).
    Valid,
    /// Revalidation found the stored entry outdated.
    Invalid,
    /// No stored entry existed for the key.
    Miss,
    /// A response was written to the metastore.
    Store,
    /// Stored variants under the key were dropped.
    Purge,
}

impl Event {
    fn as_str(&self) -> &'static str {
        match self {
            Event::Pass => "pass",
            Event::Invalidate => "invalidate",
            Event::Reload => "reload",
            Event::Fresh => "fresh",
            Event::Stale => "stale",
            Event::Valid => "valid",
            Event::Invalid => "invalid",
            Event::Miss => "miss",
            Event::Store => "store",
            Event::Purge => "purge",
        }
    }
}

/// Ordered log of the events the engine emitted for one request.
#[derive(Debug, Clone, Default)]
pub struct Trace(Vec<Event>);

impl Trace {
    fn push(&mut self, event: Event) {
        self.0.push(event);
    }

    /// The events in emission order.
    pub fn events(&self) -> &[Event] {
        &self.0
    }

    /// Render as the comma-separated `X-Rack-Cache` value.
    pub fn render(&self) -> String {
        self.0.iter().map(Event::as_str).collect::<Vec<_>>().join(", ")
    }
}

/// Forwards a request to the origin, the one I/O operation the engine cannot
/// do itself. Implemented by whatever drives the engine (a Tower service, a
/// test stub, ...).
#[async_trait]
pub trait Backend: Send + Sync {
    /// Forward `request` (with `body` as its entity, if any) to the origin.
    async fn forward(&self, request: &Request, body: &[u8]) -> Result<Response>;
}

/// The request state machine. Cheap to construct per request; the stores it
/// wraps are shared and internally synchronized.
pub struct Context<'a> {
    config: &'a Config,
    metastore: std::sync::Arc<dyn Metastore>,
    entitystore: std::sync::Arc<dyn Entitystore>,
}

impl std::fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("config", self.config).finish_non_exhaustive()
    }
}

/// Outcome of running a request through the engine: the response to return
/// to the client, plus the trace that produced it.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// The response to return, with `Age`/`X-Rack-Cache` already applied.
    pub response: Response,
    /// The events emitted while producing `response`.
    pub trace: Trace,
}

impl<'a> Context<'a> {
    /// Resolve this request's metastore/entitystore from `config` and build
    /// a `Context` ready to run one request.
    pub async fn new(config: &'a Config) -> Result<Self> {
        let metastore = config.storage.metastore(&config.metastore).await?;
        let entitystore = config.storage.entitystore(&config.entitystore).await?;
        Ok(Self { config, metastore, entitystore })
    }

    /// Run `request` (with body `body`) to completion, consulting the
    /// backend as needed, and return the response plus its trace.
    pub async fn call(
        &self,
        request: &Request,
        body: &[u8],
        backend: &dyn Backend,
    ) -> Result<Outcome> {
        let mut trace = Trace::default();
        let key = (self.config.cache_key)(request);

        let mut response = match request.method_class() {
            MethodClass::Purge => {
                self.metastore.purge(&key, self.entitystore.as_ref()).await?;
                trace.push(Event::Purge);
                let mut r = Response::from_backend(
                    StatusCode::OK,
                    http::HeaderMap::new(),
                    Vec::new(),
                    request.method().clone(),
                    now(),
                );
                r.set_status(StatusCode::OK);
                return Ok(self.finish(request, r, trace));
            }
            MethodClass::Invalidating => {
                self.metastore.invalidate(&key).await?;
                trace.push(Event::Invalidate);
                self.pass(request, body, backend, &mut trace).await?
            }
            MethodClass::Cacheable if request.has_expect() => {
                self.pass(request, body, backend, &mut trace).await?
            }
            MethodClass::Cacheable => {
                self.lookup(&key, request, body, backend, &mut trace).await?
            }
        };

        response.set_age_header();
        Ok(self.finish(request, response, trace))
    }

    async fn pass(
        &self,
        request: &Request,
        body: &[u8],
        backend: &dyn Backend,
        trace: &mut Trace,
    ) -> Result<Response> {
        trace.push(Event::Pass);
        backend.forward(request, body).await
    }

    async fn lookup(
        &self,
        key: &str,
        request: &Request,
        body: &[u8],
        backend: &dyn Backend,
        trace: &mut Trace,
    ) -> Result<Response> {
        if request.cache_control().no_cache && self.config.allow_reload {
            trace.push(Event::Reload);
            return self.fetch(key, request, body, backend, trace).await;
        }

        match self.metastore.lookup(key, request, self.entitystore.as_ref()).await {
            Ok(Some(entry)) => {
                if self.fresh_enough(request, &entry) {
                    trace.push(Event::Fresh);
                    Ok(entry)
                } else {
                    trace.push(Event::Stale);
                    self.validate(key, request, body, &entry, backend, trace).await
                }
            }
            Ok(None) => {
                trace.push(Event::Miss);
                self.fetch(key, request, body, backend, trace).await
            }
            Err(e) => {
                log::warn!("metastore lookup failed, treating as miss: {e}");
                trace.push(Event::Miss);
                self.fetch(key, request, body, backend, trace).await
            }
        }
    }

    /// `entry.fresh` must hold, and if `allow_revalidate` is set and the
    /// request names `max-age=m`, additionally `m > 0 ∧ m ≥ entry.age`.
    fn fresh_enough(&self, request: &Request, entry: &Response) -> bool {
        if !entry.fresh() {
            return false;
        }
        if self.config.allow_revalidate {
            if let Some(m) = request.cache_control().max_age {
                return m > 0 && m >= entry.age();
            }
        }
        true
    }

    async fn validate(
        &self,
        key: &str,
        request: &Request,
        body: &[u8],
        entry: &Response,
        backend: &dyn Backend,
        trace: &mut Trace,
    ) -> Result<Response> {
        let mut revalidation = request.clone();
        apply_validators(&mut revalidation, entry);

        let backend_response = backend.forward(&revalidation, body).await?;

        if backend_response.status() == StatusCode::NOT_MODIFIED {
            trace.push(Event::Valid);
            let mut merged = entry.clone();
            merged.merge_304_headers(&backend_response);
            if merged.cacheable() {
                self.metastore.store(key, request, &merged, self.entitystore.as_ref()).await?;
                trace.push(Event::Store);
            }
            Ok(merged)
        } else {
            trace.push(Event::Invalid);
            if backend_response.cacheable() {
                self.metastore
                    .store(key, request, &backend_response, self.entitystore.as_ref())
                    .await?;
                trace.push(Event::Store);
            }
            Ok(backend_response)
        }
    }

    async fn fetch(
        &self,
        key: &str,
        request: &Request,
        body: &[u8],
        backend: &dyn Backend,
        trace: &mut Trace,
    ) -> Result<Response> {
        let mut forward_request = request.clone();
        strip_validators(&mut forward_request);

        let mut response = backend.forward(&forward_request, body).await?;

        if request.is_private(&self.config.private_headers) && !response.is_public() {
            response.mark_private();
        } else if self.config.default_ttl > 0
            && response.ttl().is_none()
            && !response.must_revalidate()
        {
            response.set_ttl(self.config.default_ttl);
        }

        if response.cacheable() {
            match self.metastore.store(key, request, &response, self.entitystore.as_ref()).await {
                Ok(()) => trace.push(Event::Store),
                Err(e) => log::warn!("metastore store failed, serving uncached: {e}"),
            }
        }

        Ok(response)
    }

    fn finish(&self, request: &Request, mut response: Response, trace: Trace) -> Outcome {
        downgrade_to_not_modified(request, &mut response);
        if *request.method() == Method::HEAD {
            response.set_body(Vec::new());
        }
        if let Ok(v) = HeaderValue::from_str(&trace.render()) {
            response.headers_mut().insert(
                http::header::HeaderName::from_static("x-rack-cache"),
                v,
            );
        }
        if self.config.verbose {
            info!(
                "cache: [{} {}] {}",
                request.method(),
                request.path(),
                trace.render()
            );
        }
        Outcome { response, trace }
    }
}

fn apply_validators(request: &mut Request, entry: &Response) {
    *request.method_mut() = Method::GET;
    let (etag, last_modified) = entry.validators();
    if let Some(etag) = etag {
        request.set_header(http::header::IF_NONE_MATCH, &etag);
    }
    if let Some(lm) = last_modified {
        request.set_header(http::header::IF_MODIFIED_SINCE, &lm);
    }
}

fn strip_validators(request: &mut Request) {
    *request.method_mut() = Method::GET;
    request.remove_header(http::header::IF_MODIFIED_SINCE);
    request.remove_header(http::header::IF_NONE_MATCH);
}

/// Downgrade to 304 if the request's validators match the response.
fn downgrade_to_not_modified(request: &Request, response: &mut Response) {
    let (etag, last_modified) = response.validators();

    let none_match_hits = request
        .headers()
        .get(http::header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .zip(etag.as_deref())
        .is_some_and(|(requested, actual)| {
            requested.split(',').map(str::trim).any(|tag| tag == "*" || tag == actual)
        });

    let modified_since_hits = request
        .headers()
        .get(http::header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v).ok())
        .zip(
            last_modified
                .as_deref()
                .and_then(|v| httpdate::parse_http_date(v).ok()),
        )
        .is_some_and(|(since, actual)| actual <= since);

    if none_match_hits || modified_since_hits {
        response.set_status(StatusCode::NOT_MODIFIED);
        response.set_body(Vec::new());
    }
}

fn now() -> crate::response::UnixSeconds {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}
