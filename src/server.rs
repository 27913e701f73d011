//! Metrics Server
//!
//! Serves the gauge store on `/metrics` in the Prometheus text format.

use crate::error::{Error, Result};
use crate::metrics::GaugeStore;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use async_trait::async_trait;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default bind address of the scrape endpoint
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:2112";

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Source of incoming scrape connections
#[async_trait]
trait Acceptor: Send {
    async fn accept(&mut self) -> std::io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn accept(&mut self) -> std::io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// Bind the export listener.
///
/// Callers treat failure here as fatal.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let socket_addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid metrics server address {}: {}", addr, e)))?;

    TcpListener::bind(socket_addr)
        .await
        .map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Accept scrape connections until `cancel` fires.
///
/// Accept errors (fd exhaustion, aborted handshakes) are logged and retried.
pub async fn serve(
    listener: TcpListener,
    store: Arc<GaugeStore>,
    cancel: CancellationToken,
) -> Result<()> {
    info!("Metrics server listening on {}", listener.local_addr()?);
    accept_loop(listener, store, cancel).await;
    info!("Metrics server shutting down");
    Ok(())
}

async fn accept_loop<A: Acceptor>(
    mut acceptor: A,
    store: Arc<GaugeStore>,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            accepted = acceptor.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Metrics server accept error: {}", e);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                }
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let store = Arc::clone(&store);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let store = Arc::clone(&store);
                async move { Ok::<_, Infallible>(handle(&store, &req)) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(%peer, "Metrics server connection error: {}", e);
            }
        });
    }
}

fn handle<B>(store: &GaugeStore, req: &Request<B>) -> Response<Full<Bytes>> {
    match req.uri().path() {
        "/metrics" => match store.encode() {
            Ok(buffer) => {
                let mut response = text(StatusCode::OK, buffer);
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(store.content_type()));
                response
            }
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics")
            }
        },
        "/healthz" => text(StatusCode::OK, "ok"),
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSnapshot;
    use assert_matches::assert_matches;
    use http_body_util::BodyExt;

    fn request(path: &str) -> Request<()> {
        Request::builder().uri(path).body(()).unwrap()
    }

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_route_renders_gauges() {
        let store = GaugeStore::new().unwrap();
        store.apply(&MetricsSnapshot::new(100, 10, 5));

        let response = handle(&store, &request("/metrics"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            prometheus::TEXT_FORMAT
        );

        let body = body_string(response).await;
        assert!(body.contains("http_requests_total 100"));
        assert!(body.contains("http_400_response_total 10"));
        assert!(body.contains("http_500_response_total 5"));
    }

    #[tokio::test]
    async fn test_healthz_route() {
        let store = GaugeStore::new().unwrap();
        let response = handle(&store, &request("/healthz"));

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "ok");
    }

    #[test]
    fn test_unknown_route_is_not_found() {
        let store = GaugeStore::new().unwrap();
        let response = handle(&store, &request("/index"));

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_address() {
        assert_matches!(bind("not-an-address").await, Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let first = bind("127.0.0.1:0").await.unwrap();
        let addr = first.local_addr().unwrap().to_string();

        assert_matches!(bind(&addr).await, Err(Error::Bind { .. }));
    }

    /// Fails the first `failures` accepts, then hands off to a real listener
    struct FlakyListener {
        inner: TcpListener,
        failures: usize,
    }

    #[async_trait]
    impl Acceptor for FlakyListener {
        async fn accept(&mut self) -> std::io::Result<(TcpStream, SocketAddr)> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(std::io::Error::from_raw_os_error(24));
            }
            self.inner.accept().await
        }
    }

    #[tokio::test]
    async fn test_accept_errors_do_not_stop_server() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(GaugeStore::new().unwrap());
        store.apply(&MetricsSnapshot::new(100, 10, 5));
        let cancel = CancellationToken::new();

        let flaky = FlakyListener {
            inner: listener,
            failures: 3,
        };
        let handle = tokio::spawn(accept_loop(flaky, store, cancel.clone()));

        let response = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert!(response.text().await.unwrap().contains("http_requests_total 100"));
        assert!(!handle.is_finished());

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("server did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_during_accept_retry_delay() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let store = Arc::new(GaugeStore::new().unwrap());
        let cancel = CancellationToken::new();

        let flaky = FlakyListener {
            inner: listener,
            failures: usize::MAX,
        };
        let handle = tokio::spawn(accept_loop(flaky, store, cancel.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("server did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let store = Arc::new(GaugeStore::new().unwrap());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(serve(listener, store, cancel.clone()));
        cancel.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
