//! Parsed view of an incoming request, as consulted by the engine.

use std::collections::HashMap;

use http::{HeaderMap, Method};

/// How a request's method is treated by the engine's initial dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodClass {
    /// `GET`/`HEAD` — may be served from cache.
    Cacheable,
    /// `PURGE` — the cache-extension method that drops stored variants.
    Purge,
    /// Any other method — invalidates the key, then passes through.
    Invalidating,
}

/// Classifies a method per the engine's dispatch table.
pub fn classify(method: &Method) -> MethodClass {
    if method == Method::GET || method == Method::HEAD {
        MethodClass::Cacheable
    } else if method.as_str() == "PURGE" {
        MethodClass::Purge
    } else {
        MethodClass::Invalidating
    }
}

/// Parsed `Cache-Control` request directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControlDirectives {
    /// `no-cache` was present.
    pub no_cache: bool,
    /// `no-store` was present.
    pub no_store: bool,
    /// `only-if-cached` was present.
    pub only_if_cached: bool,
    /// `max-age=N`, seconds.
    pub max_age: Option<i64>,
    /// `max-stale` (optionally with a value; `Some(None)` means bare `max-stale`).
    pub max_stale: Option<Option<i64>>,
    /// `min-fresh=N`, seconds.
    pub min_fresh: Option<i64>,
}

impl CacheControlDirectives {
    /// Parse a raw `Cache-Control` header value into directives. Unknown or
    /// malformed directives are ignored rather than rejected, matching the
    /// permissive stance RFC 2616 §13 caches take toward request headers.
    pub fn parse(raw: &str) -> Self {
        let mut out = Self::default();
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (name, value) = match part.split_once('=') {
                Some((n, v)) => (n.trim(), Some(v.trim().trim_matches('"'))),
                None => (part, None),
            };
            match name.to_ascii_lowercase().as_str() {
                "no-cache" => out.no_cache = true,
                "no-store" => out.no_store = true,
                "only-if-cached" => out.only_if_cached = true,
                "max-age" => {
                    out.max_age = value.and_then(|v| v.parse().ok());
                }
                "max-stale" => {
                    out.max_stale =
                        Some(value.and_then(|v| v.parse().ok()));
                }
                "min-fresh" => {
                    out.min_fresh = value.and_then(|v| v.parse().ok());
                }
                _ => {}
            }
        }
        out
    }
}

/// Immutable snapshot of an incoming request, as read by the engine.
///
/// `Request` owns a copy of method, URI parts, and headers rather than
/// borrowing from the transport's request type, so it survives being
/// stashed in a metastore variant's vary-snapshot and compared against
/// later requests.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    scheme: String,
    host: String,
    path: String,
    query: String,
    headers: HeaderMap,
    cache_control: CacheControlDirectives,
}

impl Request {
    /// Build a `Request` snapshot from transport-level parts.
    pub fn new(
        method: Method,
        scheme: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
        query: impl Into<String>,
        headers: HeaderMap,
    ) -> Self {
        let cache_control = headers
            .get(http::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map(CacheControlDirectives::parse)
            .unwrap_or_default();
        Self {
            method,
            scheme: scheme.into(),
            host: host.into(),
            path: path.into(),
            query: query.into(),
            headers,
            cache_control,
        }
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Mutable access to the method, used when forcing a revalidation or
    /// fetch request to `GET`.
    pub fn method_mut(&mut self) -> &mut Method {
        &mut self.method
    }

    /// Set (overwriting) a header, used when attaching validators to a
    /// revalidation request.
    pub fn set_header(&mut self, name: http::header::HeaderName, value: &str) {
        if let Ok(v) = http::HeaderValue::from_str(value) {
            self.headers.insert(name, v);
        }
    }

    /// Remove a header, used when stripping validators before a fetch.
    pub fn remove_header(&mut self, name: http::header::HeaderName) {
        self.headers.remove(name);
    }

    /// `scheme://host` portion, as used by the default key.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host (authority, no scheme/port normalization beyond what the caller
    /// supplied).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Path component, without query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string, without the leading `?`.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Case-insensitive header access.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Parsed request `Cache-Control` directives.
    pub fn cache_control(&self) -> &CacheControlDirectives {
        &self.cache_control
    }

    /// Whether the method is classified as safe-cacheable, purge, or
    /// invalidating.
    pub fn method_class(&self) -> MethodClass {
        classify(&self.method)
    }

    /// Whether the `Expect` header is present (forces `pass` even for a
    /// cacheable method, since the engine cannot safely buffer/replay a
    /// 100-continue exchange).
    pub fn has_expect(&self) -> bool {
        self.headers.contains_key(http::header::EXPECT)
    }

    /// A request is private if any header in `private_headers` is present.
    pub fn is_private(&self, private_headers: &[String]) -> bool {
        private_headers.iter().any(|h| {
            http::header::HeaderName::from_bytes(h.as_bytes())
                .map(|name| self.headers.contains_key(name))
                .unwrap_or(false)
        })
    }

    /// Snapshot the subset of headers named by a stored `Vary` value, for
    /// variant comparison. Header comparison is case-insensitive on names
    /// and byte-exact on values after trimming whitespace; an absent header
    /// is treated the same as an empty one.
    pub fn vary_snapshot(&self, vary_header_names: &[String]) -> HashMap<String, String> {
        vary_header_names
            .iter()
            .map(|name| {
                let value = self
                    .headers
                    .get(name.as_str())
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .trim()
                    .to_string();
                (name.to_ascii_lowercase(), value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_methods() {
        assert_eq!(classify(&Method::GET), MethodClass::Cacheable);
        assert_eq!(classify(&Method::HEAD), MethodClass::Cacheable);
        assert_eq!(
            classify(&Method::from_bytes(b"PURGE").unwrap()),
            MethodClass::Purge
        );
        assert_eq!(classify(&Method::POST), MethodClass::Invalidating);
    }

    #[test]
    fn parses_cache_control_directives() {
        let cc = CacheControlDirectives::parse(
            "no-cache, max-age=10, max-stale, min-fresh=5",
        );
        assert!(cc.no_cache);
        assert_eq!(cc.max_age, Some(10));
        assert_eq!(cc.max_stale, Some(None));
        assert_eq!(cc.min_fresh, Some(5));
    }

    #[test]
    fn detects_private_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::COOKIE, "a=b".parse().unwrap());
        let req = Request::new(
            Method::GET,
            "http",
            "example.com",
            "/",
            "",
            headers,
        );
        assert!(req.is_private(&["Cookie".to_string()]));
        assert!(!req.is_private(&["Authorization".to_string()]));
    }
}
