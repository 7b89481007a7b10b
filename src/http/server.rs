//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up middleware (tracing, request ID, timeout, concurrency limit)
//! - Dispatch requests through the route table
//! - Forward requests to upstream targets
//! - Stop accepting on drain and refuse new requests on open connections
//! - Count a forward as in flight until its response body is done

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode, Uri, Version},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpListener;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxySettings;
use crate::dispatch::Dispatcher;
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionGuard;
use crate::routing::Target;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
/// Non-empty value turns on lookup tracing for the request.
pub const TRACE_HEADER: HeaderName = HeaderName::from_static("trace");

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub client: Client<HttpConnector, Body>,
    pub shutdown: Shutdown,
    pub response_header_timeout: Option<Duration>,
}

/// HTTP frontend of the router.
pub struct HttpServer {
    router: Router,
    shutdown: Shutdown,
}

impl HttpServer {
    pub fn new(
        dispatcher: Dispatcher,
        shutdown: Shutdown,
        settings: &ProxySettings,
        max_connections: usize,
    ) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(settings.dial_timeout()));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            dispatcher,
            client,
            shutdown: shutdown.clone(),
            response_header_timeout: settings.response_header_timeout(),
        };

        let router = Self::build_router(state, settings.request_timeout(), max_connections);
        Self { router, shutdown }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState, request_timeout: Duration, max_in_flight: usize) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(request_timeout))
            .layer(GlobalConcurrencyLimitLayer::new(max_in_flight))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
    }

    /// Serve until shutdown is requested, then let open requests finish.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.draining().await })
            .await?;

        tracing::info!(address = %addr, "HTTP server stopped");
        Ok(())
    }
}

/// Look up the target for the request and forward it.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    if state.shutdown.is_draining() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let in_flight = state.shutdown.track();

    let host = request_host(&request);
    let path = request.uri().path().to_string();
    let trace = request
        .headers()
        .get(TRACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Some(target) = state.dispatcher.lookup(&host, &path, trace.as_deref()) else {
        return (StatusCode::NOT_FOUND, "no route").into_response();
    };

    if target.url.scheme() != "http" {
        tracing::warn!(target = %target, "Target scheme not served over HTTP");
        return (StatusCode::BAD_GATEWAY, "unsupported target").into_response();
    }
    let Some(uri) = upstream_uri(&target, request.uri()) else {
        tracing::warn!(target = %target, path = %path, "Cannot build upstream uri");
        return (StatusCode::BAD_GATEWAY, "invalid target").into_response();
    };

    let (mut parts, body) = request.into_parts();
    parts.uri = uri;
    parts.version = Version::HTTP_11;
    set_forwarded_headers(&mut parts.headers, &host, peer);
    let upstream = Request::from_parts(parts, body);

    tracing::debug!(host = %host, path = %path, target = %target, "Forwarding request");

    let result = match state.response_header_timeout {
        Some(limit) => match tokio::time::timeout(limit, state.client.request(upstream)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("no response headers within {:?}", limit)),
        },
        None => state.client.request(upstream).await.map_err(|e| e.to_string()),
    };

    match result {
        Ok(response) => {
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(TrackedBody::new(body, in_flight)))
        }
        Err(error) => {
            tracing::error!(target = %target, error = %error, "Upstream error");
            (StatusCode::BAD_GATEWAY, "upstream request failed").into_response()
        }
    }
}

/// Upstream response body that keeps its forward counted as in flight until
/// the last frame is read or the body is dropped.
struct TrackedBody<B = Incoming> {
    inner: B,
    guard: Option<ConnectionGuard>,
}

impl<B> TrackedBody<B> {
    fn new(inner: B, guard: ConnectionGuard) -> Self {
        Self {
            inner,
            guard: Some(guard),
        }
    }
}

impl<B> HttpBody for TrackedBody<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
        let this = self.get_mut();
        let frame = Pin::new(&mut this.inner).poll_frame(cx);
        if matches!(frame, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            drop(this.guard.take());
        }
        frame
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Host header, or the URI authority for HTTP/2 requests.
fn request_host(request: &Request<Body>) -> String {
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

/// Target authority with the request path, minus the `strip` prefix and
/// below the target's own base path.
fn upstream_uri(target: &Target, original: &Uri) -> Option<Uri> {
    let mut path = original.path();
    if let Some(prefix) = target.strip_prefix() {
        if let Some(rest) = path.strip_prefix(prefix) {
            path = rest;
        }
    }

    let mut path_and_query = format!("{}{}", target.url.path().trim_end_matches('/'), path);
    if !path_and_query.starts_with('/') {
        path_and_query.insert(0, '/');
    }
    if let Some(query) = original.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }

    Uri::builder()
        .scheme("http")
        .authority(target.authority()?)
        .path_and_query(path_and_query)
        .build()
        .ok()
}

fn set_forwarded_headers(headers: &mut HeaderMap, host: &str, peer: SocketAddr) {
    let client_ip = peer.ip().to_string();
    let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, client_ip),
        None => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if !headers.contains_key(&X_FORWARDED_HOST) {
        if let Ok(value) = HeaderValue::from_str(host) {
            headers.insert(X_FORWARDED_HOST, value);
        }
    }
    if !headers.contains_key(header::HOST) {
        if let Ok(value) = HeaderValue::from_str(host) {
            headers.insert(header::HOST, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::parse;

    fn target(line: &str) -> Target {
        let table = parse(line).unwrap();
        let route = table.routes("")[0].clone();
        route.targets[0].as_ref().clone()
    }

    #[test]
    fn strips_configured_prefix() {
        let t = target("route add a /api http://10.0.0.1:8080 strip=/api");
        let uri: Uri = "/api/users?id=7".parse().unwrap();
        assert_eq!(
            upstream_uri(&t, &uri).unwrap().to_string(),
            "http://10.0.0.1:8080/users?id=7"
        );

        let bare: Uri = "/api".parse().unwrap();
        assert_eq!(upstream_uri(&t, &bare).unwrap().path(), "/");
    }

    #[test]
    fn keeps_target_base_path() {
        let t = target("route add a /api http://10.0.0.1/v2/");
        let uri: Uri = "/api/users".parse().unwrap();
        assert_eq!(
            upstream_uri(&t, &uri).unwrap().to_string(),
            "http://10.0.0.1:80/v2/api/users"
        );
    }

    #[tokio::test]
    async fn body_stays_in_flight_until_read() {
        let shutdown = Shutdown::new();
        let body = TrackedBody::new(Body::from("payload"), shutdown.track());
        assert_eq!(shutdown.in_flight(), 1);

        let bytes = axum::body::to_bytes(Body::new(body), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"payload");
        assert_eq!(shutdown.in_flight(), 0);
    }

    #[test]
    fn dropped_body_releases_in_flight() {
        let shutdown = Shutdown::new();
        let body = TrackedBody::new(Body::empty(), shutdown.track());
        assert_eq!(shutdown.in_flight(), 1);
        drop(body);
        assert_eq!(shutdown.in_flight(), 0);
    }

    #[test]
    fn appends_to_forwarded_for() {
        let peer: SocketAddr = "192.0.2.7:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("198.51.100.1"));
        set_forwarded_headers(&mut headers, "example.com", peer);

        assert_eq!(headers[&X_FORWARDED_FOR], "198.51.100.1, 192.0.2.7");
        assert_eq!(headers[&X_FORWARDED_HOST], "example.com");
        assert_eq!(headers[header::HOST], "example.com");
    }
}
