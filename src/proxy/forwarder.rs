// src/proxy/forwarder.rs
use super::backend::{Backend, BackendState};
use super::error::ProxyError;
use super::headers::strip_hop_by_hop;
use super::transport::Transport;
use hyper::header::HOST;
use hyper::{Body, Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Forwards a single request to a single backend. The inbound body is
/// streamed through once, so there is never a second attempt.
pub struct RequestForwarder {
    transport: Arc<dyn Transport>,
    timeout: Option<Duration>,
}

impl RequestForwarder {
    pub fn new(transport: Arc<dyn Transport>, timeout: Option<Duration>) -> Self {
        Self { transport, timeout }
    }

    pub async fn forward(
        &self,
        req: Request<Body>,
        backend: &Backend,
    ) -> Result<Response<Body>, ProxyError> {
        let outbound = build_outbound(req, backend)?;
        debug!(backend = backend.base_url(), uri = %outbound.uri(), "forwarding request");

        let result = match self.timeout {
            Some(limit) => match timeout(limit, self.transport.send(outbound)).await {
                Ok(result) => result,
                Err(_) => Err(ProxyError::Timeout(limit)),
            },
            None => self.transport.send(outbound).await,
        };

        match result {
            Ok(mut response) => {
                strip_hop_by_hop(response.headers_mut());
                Ok(response)
            }
            Err(err) => {
                if err.is_transport() && backend.set_alive(false) == BackendState::Alive {
                    warn!(backend = backend.base_url(), error = %err, "backend marked down after failed forward");
                }
                Err(err)
            }
        }
    }
}

/// Same method, headers minus hop-by-hop and `Host`, body passed through;
/// path and query resolved against the backend base URL.
fn build_outbound(req: Request<Body>, backend: &Backend) -> Result<Request<Body>, ProxyError> {
    let (parts, body) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri = backend
        .target_uri(path_and_query)
        .map_err(|e| ProxyError::InvalidTarget(e.to_string()))?;

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(HOST);

    let mut outbound = Request::new(body);
    *outbound.method_mut() = parts.method;
    *outbound.uri_mut() = uri;
    *outbound.headers_mut() = headers;
    Ok(outbound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hyper::{Method, StatusCode};
    use std::sync::Mutex;
    use url::Url;

    fn backend(url: &str) -> Backend {
        Backend::new(Url::parse(url).unwrap()).unwrap()
    }

    /// Records what it was asked to send and answers with a canned response.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(Method, String, Vec<String>, Vec<u8>)>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
            let (parts, body) = req.into_parts();
            let bytes = hyper::body::to_bytes(body).await.unwrap().to_vec();
            let names = parts.headers.keys().map(|k| k.to_string()).collect();
            self.seen
                .lock()
                .unwrap()
                .push((parts.method, parts.uri.to_string(), names, bytes));

            Ok(Response::builder()
                .status(StatusCode::CREATED)
                .header("connection", "close")
                .header("x-upstream", "yes")
                .body(Body::from("relayed"))
                .unwrap())
        }
    }

    struct Failing(fn() -> ProxyError);

    #[async_trait]
    impl Transport for Failing {
        async fn send(&self, _req: Request<Body>) -> Result<Response<Body>, ProxyError> {
            Err((self.0)())
        }
    }

    struct Stalled;

    #[async_trait]
    impl Transport for Stalled {
        async fn send(&self, _req: Request<Body>) -> Result<Response<Body>, ProxyError> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn rewrites_target_and_strips_headers() {
        let recorder = Arc::new(Recorder::default());
        let forwarder = RequestForwarder::new(recorder.clone(), None);
        let b = backend("http://upstream:9000/base");

        let req = Request::builder()
            .method(Method::POST)
            .uri("http://lb.local/items?page=2")
            .header("host", "lb.local")
            .header("connection", "keep-alive")
            .header("keep-alive", "timeout=5")
            .header("upgrade", "h2c")
            .header("x-trace", "t1")
            .body(Body::from("payload"))
            .unwrap();

        let response = forwarder.forward(req, &b).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get("connection").is_none());
        assert_eq!(response.headers()["x-upstream"], "yes");
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"relayed");

        let seen = recorder.seen.lock().unwrap();
        let (method, uri, headers, body) = &seen[0];
        assert_eq!(*method, Method::POST);
        assert_eq!(uri, "http://upstream:9000/base/items?page=2");
        assert_eq!(headers, &["x-trace".to_string()]);
        assert_eq!(body, b"payload");
    }

    #[tokio::test]
    async fn transport_failure_marks_backend_down() {
        let forwarder = RequestForwarder::new(
            Arc::new(Failing(|| ProxyError::UpstreamTransport("connection refused".into()))),
            None,
        );
        let b = backend("http://u:1");

        let err = forwarder
            .forward(Request::new(Body::empty()), &b)
            .await
            .unwrap_err();

        assert!(err.is_transport());
        assert!(!b.is_alive());
    }

    #[tokio::test]
    async fn protocol_failure_leaves_backend_alive() {
        let forwarder = RequestForwarder::new(
            Arc::new(Failing(|| ProxyError::UpstreamProtocol("bad status line".into()))),
            None,
        );
        let b = backend("http://u:1");

        let err = forwarder
            .forward(Request::new(Body::empty()), &b)
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::UpstreamProtocol(_)));
        assert!(b.is_alive());
    }

    #[tokio::test]
    async fn timeout_marks_backend_down() {
        let forwarder =
            RequestForwarder::new(Arc::new(Stalled), Some(Duration::from_millis(20)));
        let b = backend("http://u:1");

        let err = forwarder
            .forward(Request::new(Body::empty()), &b)
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::Timeout(_)));
        assert!(!b.is_alive());
    }
}
