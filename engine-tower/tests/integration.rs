use bytes::Bytes;
use engine_core::Config;
use engine_tower::EngineLayer;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use std::sync::Arc;
use tower::{Layer, Service, ServiceExt};

#[derive(Debug, Clone, PartialEq)]
struct PathParams {
    id: String,
}

#[tokio::test]
async fn cache_miss_then_hit() {
    let config = Config::new().build().await.unwrap();
    let mut service =
        EngineLayer::new(config).layer(tower::service_fn(|_req: Request<Full<Bytes>>| async {
            Ok::<_, std::io::Error>(
                Response::builder()
                    .status(StatusCode::OK)
                    .header("cache-control", "max-age=60")
                    .body(Full::new(Bytes::from("Hello, World!")))
                    .unwrap(),
            )
        }));

    let req = Request::get("/test").body(Full::new(Bytes::new())).unwrap();
    let res = service.ready().await.unwrap().call(req).await.unwrap();
    assert_eq!(res.headers().get("x-rack-cache").unwrap(), "miss, store");

    let req = Request::get("/test").body(Full::new(Bytes::new())).unwrap();
    let res = service.ready().await.unwrap().call(req).await.unwrap();
    assert_eq!(res.headers().get("x-rack-cache").unwrap(), "fresh");
}

#[tokio::test]
async fn no_store_directive_is_never_cached() {
    let config = Config::new().build().await.unwrap();
    let mut service =
        EngineLayer::new(config).layer(tower::service_fn(|_req: Request<Full<Bytes>>| async {
            Ok::<_, std::io::Error>(
                Response::builder()
                    .status(StatusCode::OK)
                    .header("cache-control", "no-store")
                    .body(Full::new(Bytes::from("Don't cache me")))
                    .unwrap(),
            )
        }));

    let req = Request::get("/no-store")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let res = service.ready().await.unwrap().call(req).await.unwrap();
    assert_eq!(res.headers().get("x-rack-cache").unwrap(), "miss");

    let req = Request::get("/no-store")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let res = service.ready().await.unwrap().call(req).await.unwrap();
    assert_eq!(res.headers().get("x-rack-cache").unwrap(), "miss");
}

#[tokio::test]
async fn private_request_header_prevents_storage_as_a_shared_entry() {
    let config = Config::new().build().await.unwrap();
    let mut service =
        EngineLayer::new(config).layer(tower::service_fn(|_req: Request<Full<Bytes>>| async {
            Ok::<_, std::io::Error>(
                Response::builder()
                    .status(StatusCode::OK)
                    .header("cache-control", "max-age=60")
                    .body(Full::new(Bytes::from("Hello, World!")))
                    .unwrap(),
            )
        }));

    // Authorization is a configured private header, so the entry is served
    // but never stored as a shared entry.
    let req = Request::get("/account")
        .header("authorization", "Bearer token")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let res = service.ready().await.unwrap().call(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("x-rack-cache").unwrap(), "miss");

    let req = Request::get("/account")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let res = service.ready().await.unwrap().call(req).await.unwrap();
    assert_eq!(res.headers().get("x-rack-cache").unwrap(), "miss, store");
}

#[tokio::test]
async fn post_invalidates_then_passes_through() {
    let config = Config::new().build().await.unwrap();
    let mut service =
        EngineLayer::new(config).layer(tower::service_fn(|_req: Request<Full<Bytes>>| async {
            Ok::<_, std::io::Error>(
                Response::builder()
                    .status(StatusCode::OK)
                    .header("cache-control", "max-age=60")
                    .body(Full::new(Bytes::from("Hello, World!")))
                    .unwrap(),
            )
        }));

    let req = Request::get("/a").body(Full::new(Bytes::new())).unwrap();
    service.ready().await.unwrap().call(req).await.unwrap();

    let req = Request::post("/a").body(Full::new(Bytes::new())).unwrap();
    let res = service.ready().await.unwrap().call(req).await.unwrap();
    assert_eq!(
        res.headers().get("x-rack-cache").unwrap(),
        "invalidate, pass"
    );

    // The invalidated entry is forced stale, not dropped, so the follow-up
    // GET revalidates it rather than missing outright. The handler carries
    // no validator, so the revalidation comes back invalid and is restored.
    let req = Request::get("/a").body(Full::new(Bytes::new())).unwrap();
    let res = service.ready().await.unwrap().call(req).await.unwrap();
    assert_eq!(res.headers().get("x-rack-cache").unwrap(), "stale, invalid, store");
}

#[tokio::test]
async fn purge_drops_a_stored_entry() {
    let config = Config::new().build().await.unwrap();
    let mut service =
        EngineLayer::new(config).layer(tower::service_fn(|_req: Request<Full<Bytes>>| async {
            Ok::<_, std::io::Error>(
                Response::builder()
                    .status(StatusCode::OK)
                    .header("cache-control", "max-age=60")
                    .body(Full::new(Bytes::from("Hello, World!")))
                    .unwrap(),
            )
        }));

    let req = Request::get("/p").body(Full::new(Bytes::new())).unwrap();
    service.ready().await.unwrap().call(req).await.unwrap();

    let req = Request::builder()
        .method("PURGE")
        .uri("/p")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let res = service.ready().await.unwrap().call(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let req = Request::get("/p").body(Full::new(Bytes::new())).unwrap();
    let res = service.ready().await.unwrap().call(req).await.unwrap();
    assert_eq!(res.headers().get("x-rack-cache").unwrap(), "miss, store");
}

#[tokio::test]
async fn head_request_gets_empty_body_but_real_headers() {
    let config = Config::new().build().await.unwrap();
    let mut service =
        EngineLayer::new(config).layer(tower::service_fn(|_req: Request<Full<Bytes>>| async {
            Ok::<_, std::io::Error>(
                Response::builder()
                    .status(StatusCode::OK)
                    .header("cache-control", "max-age=60")
                    .body(Full::new(Bytes::from("Hello, World!")))
                    .unwrap(),
            )
        }));

    let req = Request::builder()
        .method("HEAD")
        .uri("/h")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let res = service.ready().await.unwrap().call(req).await.unwrap();
    assert_eq!(res.headers().get("x-rack-cache").unwrap(), "miss, store");
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
}

#[tokio::test]
async fn path_parameter_extension_is_preserved() {
    let config = Config::new().build().await.unwrap();
    let mut service =
        EngineLayer::new(config).layer(tower::service_fn(|req: Request<Full<Bytes>>| async move {
            let params = req.extensions().get::<PathParams>().cloned();
            Ok::<_, std::io::Error>(
                Response::builder()
                    .status(StatusCode::OK)
                    .header("cache-control", "max-age=60")
                    .body(Full::new(Bytes::from(format!("{params:?}"))))
                    .unwrap(),
            )
        }));

    let mut req = Request::get("/users/123")
        .body(Full::new(Bytes::new()))
        .unwrap();
    req.extensions_mut().insert(PathParams {
        id: "123".to_string(),
    });
    let res = service.ready().await.unwrap().call(req).await.unwrap();
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, &b"Some(PathParams { id: \"123\" })"[..]);
}

#[tokio::test]
async fn custom_cache_key_distinguishes_sessions() {
    let key = Arc::new(|req: &engine_core::Request| {
        let session = req
            .headers()
            .get("x-session")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("anon");
        format!("{}:{}", session, req.path())
    });
    let config = Config::new().with_cache_key(key).build().await.unwrap();
    let mut service =
        EngineLayer::new(config).layer(tower::service_fn(|_req: Request<Full<Bytes>>| async {
            Ok::<_, std::io::Error>(
                Response::builder()
                    .status(StatusCode::OK)
                    .header("cache-control", "max-age=60")
                    .body(Full::new(Bytes::from("Hello, World!")))
                    .unwrap(),
            )
        }));

    let req = Request::get("/shared")
        .header("x-session", "a")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let res = service.ready().await.unwrap().call(req).await.unwrap();
    assert_eq!(res.headers().get("x-rack-cache").unwrap(), "miss, store");

    let req = Request::get("/shared")
        .header("x-session", "b")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let res = service.ready().await.unwrap().call(req).await.unwrap();
    assert_eq!(res.headers().get("x-rack-cache").unwrap(), "miss, store");

    let req = Request::get("/shared")
        .header("x-session", "a")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let res = service.ready().await.unwrap().call(req).await.unwrap();
    assert_eq!(res.headers().get("x-rack-cache").unwrap(), "fresh");
}

#[tokio::test]
async fn default_ttl_applies_when_response_has_no_freshness_info() {
    let config = Config::new().with_default_ttl(120).build().await.unwrap();
    let mut service =
        EngineLayer::new(config).layer(tower::service_fn(|_req: Request<Full<Bytes>>| async {
            Ok::<_, std::io::Error>(
                Response::builder()
                    .status(StatusCode::OK)
                    .body(Full::new(Bytes::from("no cache-control of its own")))
                    .unwrap(),
            )
        }));

    let req = Request::get("/d").body(Full::new(Bytes::new())).unwrap();
    service.ready().await.unwrap().call(req).await.unwrap();

    let req = Request::get("/d").body(Full::new(Bytes::new())).unwrap();
    let res = service.ready().await.unwrap().call(req).await.unwrap();
    assert_eq!(res.headers().get("x-rack-cache").unwrap(), "fresh");
}
