// src/health/checker.rs
use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::{Backend, BackendState, ServerPool};
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Probes every backend on a fixed interval and flips its alive flag.
/// Probe failures never leave this type; they only change backend state.
pub struct HealthChecker {
    config: HealthCheckConfig,
    pool: Arc<ServerPool>,
    client: Client,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct HealthCheckResult {
    pub backend: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

impl HealthChecker {
    pub fn new(
        config: HealthCheckConfig,
        pool: Arc<ServerPool>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to create health check HTTP client")?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Ok(Self {
            config,
            pool,
            client,
            metrics,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub async fn start(self: Arc<Self>) {
        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            interval = ?self.config.interval(),
            timeout = ?self.config.timeout(),
            max_concurrency = self.config.max_concurrency,
            "Starting health checker"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all_backends().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Run one round. At most `max_concurrency` probes are in flight and each
    /// is capped by the probe timeout, so a hung backend cannot hold up the
    /// verdict on the others.
    pub async fn check_all_backends(&self) -> Vec<HealthCheckResult> {
        let results: Vec<HealthCheckResult> = stream::iter(self.pool.backends().iter().cloned())
            .map(|backend| self.check_backend(backend))
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let healthy_count = results.iter().filter(|r| r.healthy).count();
        let unhealthy_count = results.len() - healthy_count;

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_counts(self.pool.alive_count(), self.pool.len());
        }

        debug!(
            healthy = healthy_count,
            unhealthy = unhealthy_count,
            "Health check round complete"
        );

        results
    }

    async fn check_backend(&self, backend: Arc<Backend>) -> HealthCheckResult {
        let start = Instant::now();
        let url = backend.endpoint(&self.config.path);

        let result = timeout(self.config.timeout(), self.client.get(&url).send()).await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        let (healthy, error) = match result {
            Ok(Ok(response)) if response.status() == StatusCode::OK => (true, None),
            Ok(Ok(response)) => (false, Some(format!("HTTP {}", response.status()))),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (false, Some("probe timed out".to_string())),
        };

        let previous = backend.record_probe(healthy);

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(backend.base_url(), healthy);
        }

        match (previous, healthy) {
            (BackendState::Dead, true) => {
                info!(backend = backend.base_url(), response_time_ms, "Backend marked up");
            }
            (BackendState::Alive, false) => {
                warn!(
                    backend = backend.base_url(),
                    error = error.as_deref().unwrap_or_default(),
                    "Backend marked down"
                );
            }
            _ => {
                debug!(backend = backend.base_url(), healthy, response_time_ms, "Probe complete");
            }
        }

        HealthCheckResult {
            backend: backend.base_url().to_string(),
            healthy,
            response_time_ms,
            error,
        }
    }
}
