//! Advanced HTTP caching: a session-aware cache key, a default TTL for
//! responses that don't set their own, and purging a stored entry.
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --example axum_advanced
//! ```
//!
//! ### 1. Two different queries are two different cache entries
//! ```bash
//! curl -i http://localhost:3000/search?q=rust    # x-rack-cache: miss, store
//! curl -i http://localhost:3000/search?q=rust    # x-rack-cache: fresh
//! curl -i http://localhost:3000/search?q=cache   # x-rack-cache: miss, store
//! ```
//!
//! ### 2. Dashboard is marked private by its own Cache-Control and never shared
//! ```bash
//! curl -i http://localhost:3000/dashboard
//! ```
//!
//! ### 3. Product detail has no freshness info of its own, so the configured
//!    default TTL (10 minutes) applies
//! ```bash
//! curl -i http://localhost:3000/products/42
//! ```
//!
//! ### 4. PURGE drops a stored entry
//! ```bash
//! curl -i -X PURGE http://localhost:3000/search?q=rust
//! curl -i http://localhost:3000/search?q=rust    # x-rack-cache: miss, store
//! ```

use axum::{
    error_handling::HandleErrorLayer,
    extract::{Path, Query},
    response::{IntoResponse, Response},
    routing::get,
    BoxError, Router,
};
use engine_core::Config;
use engine_tower::EngineLayer;
use http::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;

/// Folds a session cookie into the cache key, so two sessions requesting the
/// same path never share an entry.
fn session_aware_key(request: &engine_core::Request) -> String {
    let session = request
        .headers()
        .get(http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .find_map(|c| c.trim().strip_prefix("session="))
        })
        .unwrap_or("anonymous");

    format!(
        "{} session:{session}",
        engine_core::key::default_key(request)
    )
}

#[tokio::main]
async fn main() {
    let config = Config::new()
        .with_cache_key(Arc::new(session_aware_key))
        .with_default_ttl(600)
        .build()
        .await
        .expect("storage resolution failed");

    let app = Router::new()
        .route("/search", get(search))
        .route("/dashboard", get(dashboard))
        .route("/products/{id}", get(get_product))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_cache_error))
                .layer(EngineLayer::new(config)),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .unwrap();

    println!("Server running at http://localhost:3000");
    println!();
    println!("Endpoints:");
    println!("  GET    /search?q=...   - cached per session, keyed by sorted query");
    println!("  GET    /dashboard      - private, never shared");
    println!("  GET    /products/:id   - no Cache-Control of its own, 10 minute default TTL");
    println!("  PURGE  /search?q=...   - drop a stored entry");

    axum::serve(listener, app).await.unwrap();
}

async fn handle_cache_error(err: BoxError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Cache error: {err}"),
    )
        .into_response()
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
}

async fn search(Query(params): Query<SearchQuery>) -> Response {
    tokio::time::sleep(Duration::from_millis(50)).await;

    (
        StatusCode::OK,
        [("cache-control", "public, max-age=300")],
        format!("Search results for: {}", params.q),
    )
        .into_response()
}

async fn dashboard() -> Response {
    (
        StatusCode::OK,
        [("cache-control", "private, max-age=60")],
        "User dashboard - private cache only",
    )
        .into_response()
}

async fn get_product(Path(id): Path<u32>) -> Response {
    tokio::time::sleep(Duration::from_millis(100)).await;

    (StatusCode::OK, format!("Product {id} details")).into_response()
}
