// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use anyhow::{anyhow, Context, Result};
use hyper::{server::conn::Http, Body, Request, Response};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::Service;

/// Builder pattern so `main.rs` can inject its handler.
pub struct ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    addr: SocketAddr,
    handler: Option<H>,
}

impl<H> ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, handler: None }
    }

    /// Inject the request handler (usually wraps `proxy::Dispatcher`).
    pub fn with_handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Bind the listener without serving yet, so callers can learn the
    /// actual port when binding to port 0.
    pub async fn bind(self) -> Result<BoundServer<H>> {
        let handler = self
            .handler
            .ok_or_else(|| anyhow!("handler must be set via with_handler()"))?;
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.addr))?;
        Ok(BoundServer { listener, handler })
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.bind().await?.serve_with_shutdown(shutdown).await
    }
}

pub struct BoundServer<H> {
    listener: TcpListener,
    handler: H,
}

impl<H> BoundServer<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until `shutdown` resolves. Connections already accepted keep
    /// running on their own tasks.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("HTTP server listening on {}", self.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = &mut shutdown => {
                    tracing::info!("HTTP server no longer accepting connections");
                    return Ok(());
                }
            };
            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(err) => {
                    let backoff = accept_backoff(&err);
                    tracing::warn!(%err, ?backoff, "accept failed, listener stays up");
                    if !backoff.is_zero() {
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = &mut shutdown => return Ok(()),
                        }
                    }
                    continue;
                }
            };
            let svc = self.handler.clone();

            // One Tokio task per connection.
            tokio::spawn(async move {
                if let Err(err) = Http::new().serve_connection(stream, svc).await {
                    tracing::warn!(%peer, %err, "connection error");
                }
            });
        }
    }
}

const FD_EXHAUSTED_BACKOFF: Duration = Duration::from_millis(100);

// EMFILE / ENFILE
const FD_EXHAUSTED_ERRNOS: [i32; 2] = [24, 23];

/// How long to pause before the next `accept()` after it failed. Running out
/// of descriptors gets a short pause so in-flight connections can close;
/// per-connection failures (aborted, reset) retry at once.
fn accept_backoff(err: &io::Error) -> Duration {
    match err.raw_os_error() {
        Some(code) if FD_EXHAUSTED_ERRNOS.contains(&code) => FD_EXHAUSTED_BACKOFF,
        _ => Duration::ZERO,
    }
}
