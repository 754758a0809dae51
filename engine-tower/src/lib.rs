//! Tower middleware that drives [`engine_core`]'s decision engine against
//! your own handler.
//!
//! Unlike client-side caching middleware, this caches your own service's
//! responses: place it after routing so request extensions (path params,
//! application state) survive to the handler. The handler runs as the
//! engine's backend, called only when the state machine decides a fetch or
//! revalidation is needed.
//!
//! ```no_run
//! use bytes::Bytes;
//! use engine_core::Config;
//! use engine_tower::EngineLayer;
//! use http::{Request, Response};
//! use http_body_util::Full;
//! use tower::{Layer, ServiceBuilder};
//!
//! # async fn run() -> engine_core::Result<()> {
//! let config = Config::new().build().await?;
//! let layer = EngineLayer::new(config);
//!
//! let service = tower::service_fn(|_req: Request<Full<Bytes>>| async {
//!     Ok::<_, std::io::Error>(
//!         Response::builder()
//!             .header("cache-control", "max-age=60")
//!             .body(Full::new(Bytes::from("Hello, World!")))
//!             .unwrap(),
//!     )
//! });
//!
//! let _cached = ServiceBuilder::new().layer(layer).service(service);
//! # Ok(())
//! # }
//! ```
//!
//! # Shared cache behavior
//!
//! This is a **shared cache** as defined in RFC 9111: stored responses are
//! served to every caller whose request matches the cache key. The engine
//! rejects `private` responses, and marks a response private when the
//! request carries a configured private header (`Authorization`, `Cookie`
//! by default), but does not otherwise understand sessions. Use
//! [`engine_core::Config::with_cache_key`] to fold a session or user
//! identifier into the key for endpoints that must differ per caller.

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use engine_core::engine::{Backend, Context as EngineContext};
use engine_core::error::CacheError;
use engine_core::request::Request as EngineRequest;
use engine_core::response::Response as EngineResponse;
use engine_core::Config;
use http::{Request, Response};
use http_body::Body as HttpBody;
use http_body_util::{BodyExt, Full};
use tokio::sync::Mutex;
use tower::{Layer, Service};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Tower layer that wraps a service with the caching engine.
///
/// Clone cheaply: the wrapped [`Config`] shares its resolved stores across
/// every request.
#[derive(Clone)]
pub struct EngineLayer {
    config: Arc<Config>,
}

impl EngineLayer {
    /// Wrap a service with a prepared configuration. Call
    /// [`Config::build`] first so an unresolvable store fails at startup.
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for EngineLayer {
    type Service = EngineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        EngineService {
            inner,
            config: self.config.clone(),
        }
    }
}

/// Tower service produced by [`EngineLayer`].
#[derive(Clone)]
pub struct EngineService<S> {
    inner: S,
    config: Arc<Config>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for EngineService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    ReqBody: From<Bytes> + HttpBody<Data = Bytes> + Send + 'static,
    ReqBody::Error: Into<BoxError>,
    ResBody: HttpBody<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<Full<Bytes>>;
    type Error = BoxError;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let config = self.config.clone();
        let inner = self.inner.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body_bytes = body.collect().await.map_err(Into::into)?.to_bytes();
            let request = to_engine_request(&parts);

            let ctx = EngineContext::new(&config)
                .await
                .map_err(|e| Box::new(e) as BoxError)?;
            let handler = HandlerBackend::new(inner, parts);
            let outcome = ctx
                .call(&request, &body_bytes, &handler)
                .await
                .map_err(|e| Box::new(e) as BoxError)?;

            Ok(to_http_response(outcome.response))
        })
    }
}

/// Adapts the wrapped Tower service into the [`Backend`] the engine forwards
/// to, rebuilding the original request (method/URI/extensions preserved, so
/// path params and other routing-assigned extensions survive) with whatever
/// headers the engine set for a revalidation or fetch.
struct HandlerBackend<S, ReqBody> {
    inner: Mutex<S>,
    template: http::request::Parts,
    #[allow(dead_code)]
    _body: std::marker::PhantomData<fn() -> ReqBody>,
}

impl<S, ReqBody> HandlerBackend<S, ReqBody> {
    fn new(inner: S, template: http::request::Parts) -> Self {
        Self {
            inner: Mutex::new(inner),
            template,
            _body: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<S, ReqBody, ResBody> Backend for HandlerBackend<S, ReqBody>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Send,
    S::Future: Send,
    S::Error: Into<BoxError>,
    ReqBody: From<Bytes> + Send + 'static,
    ResBody: HttpBody<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    async fn forward(
        &self,
        request: &EngineRequest,
        body: &[u8],
    ) -> engine_core::error::Result<EngineResponse> {
        let mut parts = self.template.clone();
        parts.method = request.method().clone();
        parts.headers = request.headers().clone();
        let http_request = Request::from_parts(parts, ReqBody::from(Bytes::copy_from_slice(body)));

        let response = self
            .inner
            .lock()
            .await
            .call(http_request)
            .await
            .map_err(|e| CacheError::Backend(e.into().to_string()))?;

        let (resp_parts, resp_body) = response.into_parts();
        let bytes = resp_body
            .collect()
            .await
            .map_err(|e| CacheError::Backend(e.into().to_string()))?
            .to_bytes();

        Ok(EngineResponse::from_backend(
            resp_parts.status,
            resp_parts.headers,
            bytes.to_vec(),
            request.method().clone(),
            unix_now(),
        ))
    }
}

fn to_engine_request(parts: &http::request::Parts) -> EngineRequest {
    let scheme = parts.uri.scheme_str().unwrap_or("http").to_string();
    let host = parts
        .uri
        .authority()
        .map(|a| a.to_string())
        .or_else(|| {
            parts
                .headers
                .get(http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "localhost".to_string());
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().unwrap_or("").to_string();
    EngineRequest::new(
        parts.method.clone(),
        scheme,
        host,
        path,
        query,
        parts.headers.clone(),
    )
}

fn to_http_response(response: EngineResponse) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(response.status());
    for (name, value) in response.headers() {
        builder = builder.header(name, value);
    }
    builder
        .body(Full::new(Bytes::from(response.body().to_vec())))
        .unwrap()
}

fn unix_now() -> engine_core::response::UnixSeconds {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use engine_core::Config;
    use http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn second_request_is_a_cache_hit() {
        let config = Config::new().build().await.unwrap();
        let layer = EngineLayer::new(config);
        let mut service = layer.layer(tower::service_fn(|_req: Request<Full<Bytes>>| async {
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
    async fn no_store_response_is_never_served_from_cache() {
        let config = Config::new().build().await.unwrap();
        let layer = EngineLayer::new(config);
        let mut service = layer.layer(tower::service_fn(|_req: Request<Full<Bytes>>| async {
            Ok::<_, std::io::Error>(
                Response::builder()
                    .status(StatusCode::OK)
                    .header("cache-control", "no-store")
                    .body(Full::new(Bytes::from("nope")))
                    .unwrap(),
            )
        }));

        let req = Request::get("/x").body(Full::new(Bytes::new())).unwrap();
        let res = service.ready().await.unwrap().call(req).await.unwrap();
        assert_eq!(res.headers().get("x-rack-cache").unwrap(), "miss");

        let req = Request::get("/x").body(Full::new(Bytes::new())).unwrap();
        let res = service.ready().await.unwrap().call(req).await.unwrap();
        assert_eq!(res.headers().get("x-rack-cache").unwrap(), "miss");
    }

    #[tokio::test]
    async fn path_extension_is_preserved_through_the_layer() {
        #[derive(Clone, PartialEq, Debug)]
        struct PathParams {
            id: String,
        }

        let config = Config::new().build().await.unwrap();
        let layer = EngineLayer::new(config);
        let mut service = layer.layer(tower::service_fn(|req: Request<Full<Bytes>>| async move {
            let params = req.extensions().get::<PathParams>().unwrap();
            Ok::<_, std::io::Error>(
                Response::builder()
                    .status(StatusCode::OK)
                    .header("cache-control", "max-age=60")
                    .body(Full::new(Bytes::from(format!("user {}", params.id))))
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
        assert_eq!(body, "user 123");
    }

    #[tokio::test]
    async fn purge_drops_the_cached_entry() {
        let config = Config::new().build().await.unwrap();
        let layer = EngineLayer::new(config);
        let mut service = layer.layer(tower::service_fn(|_req: Request<Full<Bytes>>| async {
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
}
