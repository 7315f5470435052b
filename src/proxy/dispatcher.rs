// ────────────────────────────────
// src/proxy/dispatcher.rs
// Entry point for every inbound request: pick a backend, forward, relay.
// ────────────────────────────────

use super::error::ProxyError;
use super::forwarder::RequestForwarder;
use super::pool::ServerPool;
use crate::metrics::MetricsCollector;
use hyper::{Body, Request, Response};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub struct Dispatcher {
    pool: Arc<ServerPool>,
    forwarder: RequestForwarder,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<ServerPool>,
        forwarder: RequestForwarder,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            pool,
            forwarder,
            metrics,
        }
    }

    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    /// Always produces a response; upstream failures become gateway statuses.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let span = info_span!(
            "request",
            id = %Uuid::new_v4(),
            method = %req.method(),
            path = %req.uri().path(),
        );
        self.dispatch(req).instrument(span).await
    }

    async fn dispatch(&self, req: Request<Body>) -> Response<Body> {
        let started = Instant::now();
        let method = req.method().clone();

        let Some(backend) = self.pool.next_available() else {
            warn!("no alive backend, rejecting request");
            let response: Response<Body> = ProxyError::NoBackendAvailable.into();
            self.record(method.as_str(), response.status().as_u16(), "none", started);
            return response;
        };

        let response = match self.forwarder.forward(req, &backend).await {
            Ok(response) => {
                debug!(backend = backend.base_url(), status = %response.status(), "relaying response");
                self.record_backend(backend.base_url(), "success");
                response
            }
            Err(err) => {
                warn!(backend = backend.base_url(), error = %err, "forwarding failed");
                let outcome = if err.is_transport() {
                    "transport_error"
                } else {
                    "protocol_error"
                };
                self.record_backend(backend.base_url(), outcome);
                if err.is_transport() {
                    self.refresh_health_gauges(backend.base_url());
                }
                err.into()
            }
        };

        self.record(
            method.as_str(),
            response.status().as_u16(),
            backend.base_url(),
            started,
        );
        response
    }

    fn record(&self, method: &str, status: u16, backend: &str, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_request(method, status, backend, started.elapsed());
        }
    }

    fn record_backend(&self, backend: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_backend_request(backend, outcome);
        }
    }

    fn refresh_health_gauges(&self, backend: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(backend, false);
            metrics.update_backend_counts(self.pool.alive_count(), self.pool.len());
        }
    }
}
