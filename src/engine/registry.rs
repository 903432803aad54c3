//! Backend registry.
//!
//! Owns every [`Backend`] behind a single `RwLock`-guarded map: reads
//! (selection, listing) take a read lock and clone a snapshot, writes
//! (register, metrics updates, health transitions) take a brief write
//! lock. No lock is ever held across a backend invocation.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use thiserror::Error;

use super::types::{Backend, BackendMetrics, HealthState};

/// Smoothing factor for the exponential moving average of backend latency.
///
/// Chosen over a windowed mean because it keeps `update_metrics` O(1) with
/// no per-backend ring buffer to size.
pub const LATENCY_EMA_ALPHA: f64 = 0.2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("backend `{0}` is already registered")]
    AlreadyExists(String),
    #[error("backend `{0}` failed its start probe: {1}")]
    ProbeFailed(String, String),
    #[error("backend `{0}` is not registered")]
    NotFound(String),
}

/// Thread-safe store of every known backend.
pub struct BackendRegistry {
    backends: RwLock<HashMap<String, Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new backend.
    ///
    /// `probe_result` is the outcome of the backend's own start probe,
    /// performed by the caller (the lifecycle layer owns the I/O; the
    /// registry only records the outcome). `Err` fails registration with
    /// [`RegistryError::ProbeFailed`] rather than admitting an unverified
    /// backend.
    pub fn register(
        &self,
        backend: Backend,
        probe_result: Result<(), String>,
    ) -> Result<(), RegistryError> {
        if let Err(reason) = probe_result {
            return Err(RegistryError::ProbeFailed(backend.id, reason));
        }
        let mut map = self.backends.write().expect("registry lock poisoned");
        if map.contains_key(&backend.id) {
            return Err(RegistryError::AlreadyExists(backend.id));
        }
        map.insert(backend.id.clone(), backend);
        Ok(())
    }

    /// Remove a backend entirely. No-op error if it was never registered.
    pub fn unregister(&self, id: &str) -> Result<(), RegistryError> {
        let mut map = self.backends.write().expect("registry lock poisoned");
        map.remove(id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Look up a single backend by id, cloned out from behind the lock.
    pub fn lookup(&self, id: &str) -> Option<Backend> {
        let map = self.backends.read().expect("registry lock poisoned");
        map.get(id).cloned()
    }

    /// Return a stable snapshot of every backend matching `filter`.
    pub fn list<F: Fn(&Backend) -> bool>(&self, filter: F) -> Vec<Backend> {
        let map = self.backends.read().expect("registry lock poisoned");
        map.values().filter(|b| filter(b)).cloned().collect()
    }

    /// Every backend currently healthy — the only set the router is ever
    /// allowed to choose from.
    pub fn healthy(&self) -> Vec<Backend> {
        self.list(Backend::is_healthy)
    }

    /// Atomically update the rolling metrics for one backend.
    ///
    /// Advances the latency EMA, increments the matching success/failure
    /// counter, and timestamps the call. Readers observing the counters
    /// through [`lookup`]/[`list`] always see a consistent (if possibly
    /// stale) snapshot — the whole struct is updated under one write lock
    /// acquisition.
    pub fn update_metrics(&self, id: &str, latency_ms: u64, success: bool) -> Result<(), RegistryError> {
        let mut map = self.backends.write().expect("registry lock poisoned");
        let backend = map.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let sample = latency_ms as f64;
        backend.metrics.avg_latency_ms = if backend.metrics.total_calls() == 0 {
            sample
        } else {
            LATENCY_EMA_ALPHA * sample + (1.0 - LATENCY_EMA_ALPHA) * backend.metrics.avg_latency_ms
        };
        if success {
            backend.metrics.success_count += 1;
        } else {
            backend.metrics.failure_count += 1;
        }
        backend.metrics.last_call = Some(Utc::now());
        Ok(())
    }

    /// Record a backend-reported queue depth (optional; absent = zero
    /// penalty in scoring).
    pub fn update_queue_depth(&self, id: &str, depth: Option<u32>) -> Result<(), RegistryError> {
        let mut map = self.backends.write().expect("registry lock poisoned");
        let backend = map.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        backend.metrics.queue_depth = depth;
        Ok(())
    }

    /// Set a backend's health state. Called by the health prober.
    pub fn set_health(&self, id: &str, health: HealthState) -> Result<(), RegistryError> {
        let mut map = self.backends.write().expect("registry lock poisoned");
        let backend = map.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        backend.health = health;
        Ok(())
    }

    /// Current metrics snapshot for a backend, if registered.
    pub fn metrics(&self, id: &str) -> Option<BackendMetrics> {
        let map = self.backends.read().expect("registry lock poisoned");
        map.get(id).map(|b| b.metrics.clone())
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.backends.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Quiesce every backend (mark draining) and drop the map. Called on
    /// shutdown; no further registry operations are meaningful afterwards.
    pub fn shutdown(&self) {
        let mut map = self.backends.write().expect("registry lock poisoned");
        for backend in map.values_mut() {
            backend.health = HealthState::Draining;
        }
        map.clear();
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
