//! Response with age/TTL/freshness arithmetic and cacheability predicates.

use std::time::{SystemTime, UNIX_EPOCH};

use http::{HeaderMap, HeaderValue, StatusCode};

use crate::request::MethodClass;

/// Integer Unix seconds. All engine time arithmetic works in whole seconds,
/// per the freshness model: "All time values are integer
/// seconds; negative differences clamp to zero."
pub type UnixSeconds = i64;

fn now() -> UnixSeconds {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn clamp0(v: i64) -> i64 {
    v.max(0)
}

/// Status codes a response may be stored under, per the cacheability model.
const CACHEABLE_STATUSES: &[u16] = &[200, 203, 300, 301, 302, 404, 410];

/// Parsed response `Cache-Control` directives relevant to storage decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ResponseCacheControl {
    no_store: bool,
    no_cache: bool,
    private: bool,
    public: bool,
    must_revalidate: bool,
    proxy_revalidate: bool,
    max_age: Option<i64>,
    s_maxage: Option<i64>,
}

impl ResponseCacheControl {
    fn parse(raw: &str) -> Self {
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
                "no-store" => out.no_store = true,
                "no-cache" => out.no_cache = true,
                "private" => out.private = true,
                "public" => out.public = true,
                "must-revalidate" => out.must_revalidate = true,
                "proxy-revalidate" => out.proxy_revalidate = true,
                "max-age" => out.max_age = value.and_then(|v| v.parse().ok()),
                "s-maxage" => {
                    out.s_maxage = value.and_then(|v| v.parse().ok())
                }
                _ => {}
            }
        }
        out
    }

    fn render(&self) -> String {
        let mut parts = Vec::new();
        if self.no_store {
            parts.push("no-store".to_string());
        }
        if self.no_cache {
            parts.push("no-cache".to_string());
        }
        if self.private {
            parts.push("private".to_string());
        }
        if self.public {
            parts.push("public".to_string());
        }
        if self.must_revalidate {
            parts.push("must-revalidate".to_string());
        }
        if self.proxy_revalidate {
            parts.push("proxy-revalidate".to_string());
        }
        if let Some(ma) = self.max_age {
            parts.push(format!("max-age={ma}"));
        }
        if let Some(sm) = self.s_maxage {
            parts.push(format!("s-maxage={sm}"));
        }
        parts.join(", ")
    }
}

/// Rewrites a stored `Cache-Control` value so the entry it's attached to is
/// stale regardless of its own `max-age`/`s-maxage`, for invalidating a
/// variant in place without decoding it into a full `Response`.
pub(crate) fn force_stale_cache_control(raw: Option<&str>) -> String {
    let mut cc = raw.map(ResponseCacheControl::parse).unwrap_or_default();
    cc.max_age = Some(0);
    cc.s_maxage = None;
    cc.render()
}

/// A response flowing through the engine: status, headers, body, plus the
/// request context (method, fetch time) needed for freshness arithmetic.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    /// Method of the request that produced this response — cacheability
    /// depends on it.
    request_method: http::Method,
    /// When the request was issued (Unix seconds); used for `corrected_age`.
    request_time: UnixSeconds,
    /// When the response was received (Unix seconds).
    response_time: UnixSeconds,
}

impl Response {
    /// Construct a response as just received from the backend (or loaded
    /// fresh from a store at `now`). Synthesizes `Date` if the backend
    /// omitted it.
    pub fn new(
        status: StatusCode,
        mut headers: HeaderMap,
        body: Vec<u8>,
        request_method: http::Method,
        request_time: UnixSeconds,
        response_time: UnixSeconds,
    ) -> Self {
        if !headers.contains_key(http::header::DATE) {
            if let Ok(v) = HeaderValue::from_str(&httpdate::fmt_http_date(
                UNIX_EPOCH
                    + std::time::Duration::from_secs(response_time.max(0) as u64),
            )) {
                headers.insert(http::header::DATE, v);
            }
        }
        Self { status, headers, body, request_method, request_time, response_time }
    }

    /// Build directly at the current instant, as when the backend response
    /// is received synchronously.
    pub fn from_backend(
        status: StatusCode,
        headers: HeaderMap,
        body: Vec<u8>,
        request_method: http::Method,
        request_time: UnixSeconds,
    ) -> Self {
        Self::new(status, headers, body, request_method, request_time, now())
    }

    /// Status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Mutable status, used when downgrading to 304 in post-processing.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable response headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Response body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Replace the body (used for HEAD post-processing and 304 merges).
    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    fn header_str(&self, name: http::header::HeaderName) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    fn cache_control(&self) -> ResponseCacheControl {
        self.header_str(http::header::CACHE_CONTROL)
            .map(ResponseCacheControl::parse)
            .unwrap_or_default()
    }

    /// The `Date` header value, as Unix seconds. Always present after
    /// construction via `new`/`from_backend`.
    pub fn date(&self) -> UnixSeconds {
        self.header_str(http::header::DATE)
            .and_then(|v| httpdate::parse_http_date(v).ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(self.response_time)
    }

    fn header_age(&self) -> i64 {
        self.header_str(http::header::AGE)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// `age = max(apparent_age, corrected_age)`.
    pub fn age(&self) -> i64 {
        self.age_at(now())
    }

    /// Age as of a specific instant — used by stores that persist the
    /// response and need to recompute `age` on every subsequent read rather
    /// than at store time.
    pub fn age_at(&self, at: UnixSeconds) -> i64 {
        let apparent_age = clamp0(self.response_time - self.date());
        let corrected_age = self.header_age()
            + (self.response_time - self.request_time)
            + (at - self.response_time);
        clamp0(apparent_age.max(clamp0(corrected_age)))
    }

    fn freshness_lifetime(&self) -> Option<i64> {
        let cc = self.cache_control();
        if let Some(s) = cc.s_maxage {
            return Some(s);
        }
        if let Some(m) = cc.max_age {
            return Some(m);
        }
        let expires = self.header_str(http::header::EXPIRES)?;
        let expires = httpdate::parse_http_date(expires).ok()?;
        let expires =
            expires.duration_since(UNIX_EPOCH).ok()?.as_secs() as i64;
        Some(expires - self.date())
    }

    /// `ttl = freshness_lifetime - age`; `None` if no freshness info.
    pub fn ttl(&self) -> Option<i64> {
        self.freshness_lifetime().map(|lifetime| lifetime - self.age())
    }

    /// `ttl` exists and is positive.
    pub fn fresh(&self) -> bool {
        self.ttl().is_some_and(|t| t > 0)
    }

    /// `ETag`/`Last-Modified` validators, if present.
    pub fn validators(&self) -> (Option<String>, Option<String>) {
        (
            self.header_str(http::header::ETAG).map(str::to_string),
            self.header_str(http::header::LAST_MODIFIED).map(str::to_string),
        )
    }

    /// Whether the response carries a validator usable for a conditional
    /// request.
    pub fn has_validator(&self) -> bool {
        let (etag, lm) = self.validators();
        etag.is_some() || lm.is_some()
    }

    /// Cacheability predicate: status in the closed set,
    /// Cache-Control neither `no-store` nor `private`, fresh or validated,
    /// and the originating request's method must have been cacheable.
    pub fn cacheable(&self) -> bool {
        if crate::request::classify(&self.request_method)
            != MethodClass::Cacheable
        {
            return false;
        }
        if !CACHEABLE_STATUSES.contains(&self.status.as_u16()) {
            return false;
        }
        let cc = self.cache_control();
        if cc.no_store || cc.private {
            return false;
        }
        if self.vary_is_star() {
            return false;
        }
        self.fresh() || self.has_validator()
    }

    /// `Vary: *` makes the response unselectable by any subsequent request
    /// treated here as uncacheable at store time.
    pub fn vary_is_star(&self) -> bool {
        self.header_str(http::header::VARY).map(str::trim) == Some("*")
    }

    /// Names of headers listed in a stored `Vary`, normalized to lowercase.
    pub fn vary_header_names(&self) -> Vec<String> {
        self.header_str(http::header::VARY)
            .map(|v| {
                v.split(',')
                    .map(|h| h.trim().to_ascii_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `must-revalidate` directive present.
    pub fn must_revalidate(&self) -> bool {
        self.cache_control().must_revalidate
    }

    /// `proxy-revalidate` directive present.
    pub fn proxy_revalidate(&self) -> bool {
        self.cache_control().proxy_revalidate
    }

    /// `public` directive present.
    pub fn is_public(&self) -> bool {
        self.cache_control().public
    }

    /// `private` directive present.
    pub fn is_private(&self) -> bool {
        self.cache_control().private
    }

    /// `no-store` directive present.
    pub fn no_store(&self) -> bool {
        self.cache_control().no_store
    }

    /// Set `Age` to the current computed age, as done when returning a
    /// stored entry or right after a store.
    pub fn set_age_header(&mut self) {
        let age = self.age();
        if let Ok(v) = HeaderValue::from_str(&age.to_string()) {
            self.headers.insert(http::header::AGE, v);
        }
    }

    /// Assign a TTL: writes `Cache-Control: max-age=v` and removes any
    /// stale `Expires`.
    pub fn set_ttl(&mut self, seconds: i64) {
        let mut cc = self.cache_control();
        cc.max_age = Some(seconds);
        if let Ok(v) = HeaderValue::from_str(&cc.render()) {
            self.headers.insert(http::header::CACHE_CONTROL, v);
        }
        self.headers.remove(http::header::EXPIRES);
    }

    /// Mark the response private: clears `public`, sets `private`, per the
    /// private/public invariant.
    pub fn mark_private(&mut self) {
        let mut cc = self.cache_control();
        cc.public = false;
        cc.private = true;
        if let Ok(v) = HeaderValue::from_str(&cc.render()) {
            self.headers.insert(http::header::CACHE_CONTROL, v);
        }
    }

    /// Overwrite `Date, Expires, Cache-Control, ETag, Last-Modified` from a
    /// 304 response, as done when merging a revalidation result into a
    /// stored entry.
    pub fn merge_304_headers(&mut self, from: &Response) {
        for name in [
            http::header::DATE,
            http::header::EXPIRES,
            http::header::CACHE_CONTROL,
            http::header::ETAG,
            http::header::LAST_MODIFIED,
        ] {
            match from.headers.get(&name) {
                Some(v) => {
                    self.headers.insert(name, v.clone());
                }
                None => {
                    self.headers.remove(&name);
                }
            }
        }
        self.response_time = from.response_time;
        self.request_time = from.request_time;
    }

    /// The method of the request that produced this response.
    pub fn request_method(&self) -> &http::Method {
        &self.request_method
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(
                http::header::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        h
    }

    #[test]
    fn fresh_response_has_positive_ttl() {
        let r = Response::from_backend(
            StatusCode::OK,
            headers(&[("cache-control", "max-age=60")]),
            b"x".to_vec(),
            Method::GET,
            now(),
        );
        assert!(r.fresh());
        assert_eq!(r.ttl(), Some(60));
        assert!(r.cacheable());
    }

    #[test]
    fn no_store_is_never_cacheable() {
        let r = Response::from_backend(
            StatusCode::OK,
            headers(&[("cache-control", "no-store, max-age=60")]),
            b"x".to_vec(),
            Method::GET,
            now(),
        );
        assert!(!r.cacheable());
    }

    #[test]
    fn post_response_is_never_cacheable() {
        let r = Response::from_backend(
            StatusCode::OK,
            headers(&[("cache-control", "max-age=60")]),
            b"x".to_vec(),
            Method::POST,
            now(),
        );
        assert!(!r.cacheable());
    }

    #[test]
    fn age_grows_with_corrected_age() {
        let t0 = now();
        let r = Response::new(
            StatusCode::OK,
            headers(&[("age", "10")]),
            Vec::new(),
            Method::GET,
            t0 - 5,
            t0 - 2,
        );
        // corrected_age = 10 + (response_time - request_time) + (now - response_time)
        //               = 10 + 3 + 2 = 15 at t0
        assert_eq!(r.age_at(t0), 15);
    }

    #[test]
    fn set_ttl_rewrites_cache_control_and_clears_expires() {
        let mut r = Response::from_backend(
            StatusCode::OK,
            headers(&[("expires", "Thu, 01 Jan 1970 00:00:00 GMT")]),
            Vec::new(),
            Method::GET,
            now(),
        );
        r.set_ttl(30);
        assert_eq!(
            r.headers().get(http::header::CACHE_CONTROL).unwrap(),
            "max-age=30"
        );
        assert!(!r.headers().contains_key(http::header::EXPIRES));
    }

    #[test]
    fn mark_private_clears_public() {
        let mut r = Response::from_backend(
            StatusCode::OK,
            headers(&[("cache-control", "public, max-age=60")]),
            Vec::new(),
            Method::GET,
            now(),
        );
        r.mark_private();
        assert!(r.is_private());
        assert!(!r.is_public());
    }

    #[test]
    fn vary_star_is_never_cacheable() {
        let r = Response::from_backend(
            StatusCode::OK,
            headers(&[("cache-control", "max-age=60"), ("vary", "*")]),
            Vec::new(),
            Method::GET,
            now(),
        );
        assert!(!r.cacheable());
    }
}
