//! Health prober.
//!
//! A cooperative background task that probes every registered backend on
//! a fixed interval and drives its health-state transitions. Mirrors the
//! thermal monitor's shape: one `run` loop, best-effort per backend,
//! shutdown via a watch channel.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::registry::BackendRegistry;
use super::types::HealthState;

pub type ProbeFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// Per-backend-kind cheap liveness check (e.g. list-models for HTTP
/// backends). Implemented by each backend adapter.
pub trait ProbeSource: Send + Sync {
    fn probe(&self, backend_id: &str) -> ProbeFuture;
}

/// Consecutive-failure threshold before a healthy backend is marked
/// unhealthy.
pub const UNHEALTHY_AFTER_FAILURES: u32 = 3;

pub struct HealthProber {
    registry: Arc<BackendRegistry>,
    source: Arc<dyn ProbeSource>,
    interval: Duration,
    consecutive_failures: std::sync::Mutex<HashMap<String, u32>>,
}

impl HealthProber {
    pub fn new(registry: Arc<BackendRegistry>, source: Arc<dyn ProbeSource>, interval: Duration) -> Self {
        Self {
            registry,
            source,
            interval,
            consecutive_failures: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run the probe loop until `shutdown` fires. On shutdown, every
    /// backend is marked draining.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("health prober shutting down");
                        self.registry.shutdown();
                        return;
                    }
                }
            }
        }
    }

    async fn probe_once(&self) {
        let ids: Vec<String> = self.registry.list(|_| true).into_iter().map(|b| b.id).collect();
        let results = futures_util::future::join_all(ids.iter().map(|id| self.source.probe(id))).await;
        for (id, result) in ids.into_iter().zip(results) {
            self.record(&id, result);
        }
    }

    fn record(&self, id: &str, result: Result<(), String>) {
        let Some(current) = self.registry.lookup(id).map(|b| b.health) else { return };
        let mut failures = self.consecutive_failures.lock().expect("health prober lock poisoned");

        let next = match (current, &result) {
            (_, Ok(())) => {
                failures.remove(id);
                HealthState::Healthy
            }
            (HealthState::Healthy, Err(_)) => {
                let count = failures.entry(id.to_string()).or_insert(0);
                *count += 1;
                if *count >= UNHEALTHY_AFTER_FAILURES {
                    HealthState::Unhealthy
                } else {
                    HealthState::Healthy
                }
            }
            (_, Err(_)) => HealthState::Unhealthy,
        };

        if let Err(e) = result {
            warn!(backend = %id, error = %e, "health probe failed");
        }
        let _ = self.registry.set_health(id, next);
    }
}
