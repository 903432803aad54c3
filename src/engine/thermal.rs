//! Thermal monitor.
//!
//! A cooperative background task that samples every registered backend's
//! hardware telemetry on a fixed period and publishes the result into a
//! concurrent map. Sampling is best-effort per backend: one failure never
//! blocks the others: the same poll, log-and-continue-on-failure,
//! never-propagate shape as the config-reload loop in `main.rs`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::registry::BackendRegistry;
use super::types::ThermalState;

/// One raw hardware reading, before it is stamped and published.
#[derive(Debug, Clone, Copy)]
pub struct RawTelemetry {
    pub temperature_c: f64,
    pub fan_percent: u8,
    pub power_draw_w: f64,
    pub utilization_percent: u8,
    pub throttling: bool,
}

pub type TelemetryFuture = Pin<Box<dyn Future<Output = anyhow::Result<RawTelemetry>> + Send>>;

/// Per-backend-kind hardware telemetry source.
///
/// Implementations are necessarily hardware/driver specific (NPU vendor
/// SDKs, `nvidia-smi`, `/sys/class/thermal`, a cloud API's no-op reading).
/// The monitor only depends on this trait.
pub trait TelemetrySource: Send + Sync {
    fn sample(&self, backend_id: &str) -> TelemetryFuture;
}

/// Background sampler. Construct with [`ThermalMonitor::new`] and drive
/// [`ThermalMonitor::run`] as a spawned task.
pub struct ThermalMonitor {
    registry: Arc<BackendRegistry>,
    source: Arc<dyn TelemetrySource>,
    states: Arc<DashMap<String, ThermalState>>,
    sample_period: Duration,
}

impl ThermalMonitor {
    pub fn new(registry: Arc<BackendRegistry>, source: Arc<dyn TelemetrySource>, sample_period: Duration) -> Self {
        Self {
            registry,
            source,
            states: Arc::new(DashMap::new()),
            sample_period,
        }
    }

    pub fn sample_period(&self) -> Duration {
        self.sample_period
    }

    /// A full-by-value snapshot of every published thermal state.
    pub fn snapshot(&self) -> HashMap<String, ThermalState> {
        self.states.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    /// The published state for one backend, if it has ever been sampled.
    pub fn state_for(&self, backend_id: &str) -> Option<ThermalState> {
        self.states.get(backend_id).map(|e| e.value().clone())
    }

    /// Run the sampling loop until `shutdown` fires. Intended to be spawned
    /// as its own task; holds no lock across any I/O.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.sample_period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sample_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("thermal monitor shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Sample every registered backend once. Each backend's sample runs
    /// independently; a failure is logged and the previous published state
    /// (if any) is left untouched.
    async fn sample_once(&self) {
        let ids: Vec<String> = self.registry.list(|_| true).into_iter().map(|b| b.id).collect();
        let samples = futures_util::future::join_all(ids.iter().map(|id| self.source.sample(id))).await;
        for (id, result) in ids.into_iter().zip(samples) {
            match result {
                Ok(raw) => {
                    self.states.insert(
                        id,
                        ThermalState {
                            temperature_c: raw.temperature_c,
                            fan_percent: raw.fan_percent,
                            power_draw_w: raw.power_draw_w,
                            utilization_percent: raw.utilization_percent,
                            throttling: raw.throttling,
                            sampled_at: Utc::now(),
                        },
                    );
                }
                Err(e) => {
                    warn!(backend = %id, error = %e, "thermal sample failed — keeping previous reading");
                }
            }
        }
    }
}

/// The scoring penalty contributed by a backend's current thermal state.
/// A missing or stale reading contributes zero penalty — policy-level
/// exclusion (the efficiency manager's hard limits) is where "unknown" is
/// actually handled conservatively, not here.
pub fn thermal_penalty(state: Option<&ThermalState>, sample_period: Duration) -> f64 {
    let Some(state) = state else { return 0.0 };
    if state.is_stale(sample_period) {
        return 0.0;
    }

    let mut penalty = 0.0;
    if state.temperature_c > 70.0 {
        let t = state.temperature_c.min(85.0);
        penalty += ((t - 70.0) / (85.0 - 70.0)).powi(2) * 1000.0;
    }
    if state.fan_percent > 85 {
        penalty += (state.fan_percent as f64 - 85.0) * 5.0;
    }
    if state.throttling {
        penalty += 2000.0;
    }
    if state.utilization_percent > 80 {
        penalty += (state.utilization_percent as f64 - 80.0) * 10.0;
    }
    penalty
}
