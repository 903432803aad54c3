//! Shared data model for the routing/forwarding engine.
//!
//! These types mirror the data model in the engine design: backends,
//! thermal samples, caller annotations, mode presets, and the records
//! produced by a selection or a forwarding pass. Nothing here talks to
//! the network or the filesystem — that is left to `backends::` and
//! `config::`.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse hardware category a backend runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareClass {
    NeuralAccelerator,
    IntegratedGpu,
    DiscreteGpu,
    Cpu,
    Cloud,
}

impl fmt::Display for HardwareClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NeuralAccelerator => "neural-accelerator",
            Self::IntegratedGpu => "integrated-gpu",
            Self::DiscreteGpu => "discrete-gpu",
            Self::Cpu => "cpu",
            Self::Cloud => "cloud",
        })
    }
}

/// Lifecycle / health state of a registered backend.
///
/// Transitions: `Unknown` -> `Healthy` on first successful probe,
/// `Healthy` -> `Unhealthy` after N consecutive probe failures,
/// `Unhealthy` -> `Healthy` on a single successful probe, and any state
/// -> `Draining` on shutdown. See [`crate::engine::health`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
    Draining,
}

/// What models a backend can host.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModelCapability {
    /// Largest model size (in GB, derived from a trailing size tag such as
    /// `:7b`) this backend can host. `None` means no declared limit.
    #[serde(default)]
    pub max_model_size_gb: Option<f64>,
    /// Substring/glob-lite patterns a requested model must match at least
    /// one of (empty = accept anything not excluded).
    #[serde(default)]
    pub accept_patterns: Vec<String>,
    /// Substring/glob-lite patterns that reject a requested model outright.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Models this backend prefers, in priority order. Consulted by the
    /// matcher when proposing a substitute.
    #[serde(default)]
    pub preferred_models: Vec<String>,
}

/// Rolling metrics the registry maintains per backend.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendMetrics {
    /// Exponentially-weighted moving average of observed latency, in ms.
    ///
    /// See [`crate::engine::registry::LATENCY_EMA_ALPHA`] for the smoothing
    /// factor; EMA was chosen over a fixed window so `update_metrics` stays
    /// O(1) with no buffer to maintain.
    pub avg_latency_ms: f64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Queue depth reported by the backend, when it exposes one. Absent
    /// backends contribute zero penalty to scoring.
    pub queue_depth: Option<u32>,
    pub last_call: Option<DateTime<Utc>>,
}

impl BackendMetrics {
    pub fn total_calls(&self) -> u64 {
        self.success_count + self.failure_count
    }
}

/// A registered inference backend: static declaration plus live state.
#[derive(Debug, Clone)]
pub struct Backend {
    pub id: String,
    /// Opaque kind tag (e.g. `"ollama"`, `"openai"`, `"anthropic"`).
    pub kind: String,
    pub hardware_class: HardwareClass,
    pub nominal_power_watts: f64,
    pub nominal_latency_ms: u64,
    pub priority: i32,
    pub capability: ModelCapability,
    pub metrics: BackendMetrics,
    pub health: HealthState,
}

impl Backend {
    /// True if this backend may currently be handed to a caller.
    pub fn is_healthy(&self) -> bool {
        self.health == HealthState::Healthy
    }
}

/// Caller-supplied or classifier-derived workload category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Realtime,
    Audio,
    Code,
    Image,
    Text,
    #[default]
    Auto,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Realtime => "realtime",
            Self::Audio => "audio",
            Self::Code => "code",
            Self::Image => "image",
            Self::Text => "text",
            Self::Auto => "auto",
        })
    }
}

/// How demanding the classifier judged a prompt to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Simple,
    #[default]
    Moderate,
    Complex,
}

/// Structured caller intent attached to every request.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Annotations {
    /// Backend id the caller asked for, if any.
    #[serde(default)]
    pub explicit_target: Option<String>,
    #[serde(default)]
    pub latency_critical: bool,
    #[serde(default)]
    pub prefer_power_efficiency: bool,
    #[serde(default)]
    pub media_type: MediaType,
    #[serde(default)]
    pub max_latency_ms: Option<u64>,
    #[serde(default)]
    pub max_power_watts: Option<f64>,
    #[serde(default)]
    pub custom: HashMap<String, String>,
}

/// A named policy preset. See the mode table in the design for field meanings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModePreset {
    HighPerformance,
    #[default]
    Balanced,
    Efficiency,
    Quiet,
    UltraEfficiency,
    Auto,
}

impl fmt::Display for ModePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::HighPerformance => "high-performance",
            Self::Balanced => "balanced",
            Self::Efficiency => "efficiency",
            Self::Quiet => "quiet",
            Self::UltraEfficiency => "ultra-efficiency",
            Self::Auto => "auto",
        })
    }
}

impl std::str::FromStr for ModePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "high-performance" => Self::HighPerformance,
            "balanced" => Self::Balanced,
            "efficiency" => Self::Efficiency,
            "quiet" => Self::Quiet,
            "ultra-efficiency" => Self::UltraEfficiency,
            "auto" => Self::Auto,
            other => return Err(other.to_string()),
        })
    }
}

/// Thermal sample for one backend, published by [`crate::engine::thermal::ThermalMonitor`].
#[derive(Debug, Clone, Serialize)]
pub struct ThermalState {
    pub temperature_c: f64,
    pub fan_percent: u8,
    pub power_draw_w: f64,
    pub utilization_percent: u8,
    pub throttling: bool,
    pub sampled_at: DateTime<Utc>,
}

impl ThermalState {
    /// A state is stale (and treated as "unknown" for policy purposes) once
    /// its age exceeds `3 * sample_period`.
    pub fn is_stale(&self, sample_period: std::time::Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.sampled_at);
        let staleness_bound = chrono::Duration::from_std(sample_period * 3)
            .unwrap_or(chrono::Duration::max_value());
        age > staleness_bound
    }
}

/// One candidate considered-but-not-chosen during scoring, kept for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct AlternativeCandidate {
    pub backend_id: String,
    pub score: f64,
}

/// The record produced by every successful selection.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub chosen_backend: String,
    pub reason: String,
    pub estimated_power_watts: f64,
    pub estimated_latency_ms: u64,
    pub alternatives: Vec<AlternativeCandidate>,
    pub requested_model: String,
    pub model_used: String,
    pub model_substituted: bool,
    pub substitution_reason: Option<String>,
    pub media_type: MediaType,
    pub hints: Vec<String>,
}

/// One backend invocation made while handling a single request.
#[derive(Debug, Clone, Serialize)]
pub struct ForwardingAttempt {
    pub backend_id: String,
    pub success: bool,
    pub confidence: Option<f64>,
    pub confidence_reason: Option<String>,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub cancelled: bool,
}

impl ForwardingAttempt {
    pub fn failed(backend_id: impl Into<String>, latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            success: false,
            confidence: None,
            confidence_reason: None,
            latency_ms,
            error: Some(error.into()),
            cancelled: false,
        }
    }

    pub fn cancelled(backend_id: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            backend_id: backend_id.into(),
            success: false,
            confidence: None,
            confidence_reason: None,
            latency_ms,
            error: Some("deadline exceeded".into()),
            cancelled: true,
        }
    }

    pub fn succeeded(
        backend_id: impl Into<String>,
        latency_ms: u64,
        confidence: f64,
        confidence_reason: impl Into<String>,
    ) -> Self {
        Self {
            backend_id: backend_id.into(),
            success: true,
            confidence: Some(confidence),
            confidence_reason: Some(confidence_reason.into()),
            latency_ms,
            error: None,
            cancelled: false,
        }
    }
}
