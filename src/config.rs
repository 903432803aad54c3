//! Configuration types for inferno-dispatch.
//!
//! Config is loaded once at startup from a TOML file and validated before the
//! server opens any ports. Invalid configs are rejected with a clear error
//! rather than silently falling back to defaults. Unknown keys are rejected
//! too — the schema below is the closed set of recognised options.
//!
//! # Example
//! ```toml
//! [gateway]
//! client_port = 8080
//!
//! [backends.npu]
//! kind = "ollama"
//! base_url = "http://localhost:11434"
//! hardware_class = "neural-accelerator"
//! nominal_power_watts = 3.0
//! nominal_latency_ms = 800
//! priority = 1
//!
//! [efficiency]
//! default_mode = "balanced"
//!
//! [forwarding.default]
//! min_confidence = 0.75
//! max_attempts = 3
//! ```

use std::{collections::HashMap, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::engine::types::{HardwareClass, ModelCapability, ModePreset};

/// Which wire protocol a backend speaks.
///
/// inferno-dispatch normalises all inter-agent traffic to OpenAI's
/// chat-completions schema; each [`BackendKind`] variant maps to an adapter
/// that handles any necessary request/response translation at the edge.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Standard OpenAI `/v1/chat/completions` protocol.
    /// Also used by LM Studio, vLLM, LocalAI, and many others.
    #[default]
    OpenAI,
    /// Ollama local inference server.
    Ollama,
    /// Anthropic Messages API (`/v1/messages`).
    Anthropic,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::OpenAI => "openai",
            Self::Ollama => "ollama",
            Self::Anthropic => "anthropic",
        })
    }
}

/// A per-client API key binding.
///
/// The dispatcher reads the actual key value from the environment variable
/// named by `key_env` at startup. This keeps secrets out of the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Name of the environment variable whose value is this client's Bearer token.
    pub key_env: String,
    /// The forwarding policy to use when this client's key is matched.
    pub forwarding_policy: String,
}

/// Top-level dispatcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Declared backends, keyed by id.
    pub backends: HashMap<String, BackendConfig>,

    #[serde(default)]
    pub routing: RoutingDefaults,

    #[serde(default)]
    pub efficiency: EfficiencyDefaults,

    #[serde(default)]
    pub thermal: ThermalSettings,

    /// Named forwarding policies. `"default"` is used when a client's entry
    /// doesn't name one and none is given on the request.
    #[serde(default)]
    pub forwarding: HashMap<String, ForwardingPolicyConfig>,

    /// Per-client API key → forwarding-policy mappings.
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.backends.is_empty(), "at least one backend must be configured");
        for (id, backend) in &self.backends {
            anyhow::ensure!(!id.is_empty(), "backend ids must not be empty");
            anyhow::ensure!(
                backend.nominal_power_watts >= 0.0,
                "backend `{id}` nominal_power_watts must not be negative"
            );
        }

        anyhow::ensure!(self.gateway.client_port > 0, "client_port must be in the legal port range");
        anyhow::ensure!(self.gateway.admin_port > 0, "admin_port must be in the legal port range");
        anyhow::ensure!(
            self.gateway.client_port != self.gateway.admin_port,
            "client_port and admin_port must differ"
        );

        anyhow::ensure!(
            self.thermal.warning_temp_c < self.thermal.critical_temp_c
                && self.thermal.critical_temp_c < self.thermal.shutdown_temp_c,
            "thermal thresholds must satisfy warning < critical < shutdown"
        );

        let profile_names: std::collections::HashSet<&str> = self.forwarding.keys().map(|k| k.as_str()).collect();
        for client in &self.clients {
            anyhow::ensure!(
                profile_names.contains(client.forwarding_policy.as_str()) || client.forwarding_policy == "default",
                "[[clients]] entry with key_env `{}` references unknown forwarding policy `{}`",
                client.key_env,
                client.forwarding_policy
            );
        }

        for (name, policy) in &self.forwarding {
            for id in &policy.escalation_path {
                anyhow::ensure!(
                    self.backends.contains_key(id),
                    "forwarding policy `{name}` escalation_path references unknown backend `{id}`"
                );
            }
        }

        Ok(())
    }

    /// Return the named forwarding policy, falling back to `"default"`.
    pub fn forwarding_policy(&self, name: &str) -> Option<&ForwardingPolicyConfig> {
        self.forwarding.get(name).or_else(|| self.forwarding.get("default"))
    }
}

/// Core dispatcher settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Port for the agent-facing client API (default: 8080).
    #[serde(default = "defaults::client_port")]
    pub client_port: u16,

    /// Port for the admin API (default: 8081).
    #[serde(default = "defaults::admin_port")]
    pub admin_port: u16,

    /// Number of recent requests to keep in the in-memory traffic log (default: 500).
    #[serde(default = "defaults::traffic_log_capacity")]
    pub traffic_log_capacity: usize,

    #[serde(default)]
    pub log_level: Option<String>,

    /// Maximum requests per minute per client IP on the client port.
    /// Leave unset (or zero) to disable rate limiting.
    #[serde(default)]
    pub rate_limit_rpm: Option<u32>,

    /// Environment variable whose value is the Bearer token required for all
    /// admin API requests. Leave unset to disable admin authentication.
    #[serde(default)]
    pub admin_token_env: Option<String>,

    /// Default per-request deadline in milliseconds when the caller doesn't
    /// supply one (default: 30000).
    #[serde(default = "defaults::default_deadline_ms")]
    pub default_deadline_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            client_port: defaults::client_port(),
            admin_port: defaults::admin_port(),
            traffic_log_capacity: defaults::traffic_log_capacity(),
            log_level: None,
            rate_limit_rpm: None,
            admin_token_env: None,
            default_deadline_ms: defaults::default_deadline_ms(),
        }
    }
}

/// A declared inference backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Protocol adapter to use when talking to this backend.
    #[serde(default)]
    pub kind: BackendKind,

    /// Base URL — must end without a trailing `/v1` (added by the adapter).
    pub base_url: String,

    /// Environment variable name whose value is the API key. Leave unset
    /// for keyless local backends (e.g. Ollama with no auth).
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Request timeout in milliseconds (default: 30000).
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    pub hardware_class: HardwareClass,
    pub nominal_power_watts: f64,
    pub nominal_latency_ms: u64,

    /// Higher wins ties in scoring and is preferred within a tie-break.
    #[serde(default = "defaults::priority")]
    pub priority: i32,

    #[serde(default)]
    pub capability: ModelCapability,

    /// Set to `false` to keep a backend declared but excluded from
    /// registration (e.g. temporarily offline hardware).
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
}

impl BackendConfig {
    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env.as_deref().and_then(|var| std::env::var(var).ok())
    }
}

/// Routing policy defaults applied when a request doesn't override them.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingDefaults {
    #[serde(default)]
    pub default_backend: Option<String>,
    #[serde(default)]
    pub power_aware: bool,
}

/// Efficiency-manager defaults loaded from configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EfficiencyDefaults {
    #[serde(default = "defaults::default_mode")]
    pub default_mode: ModePreset,
    #[serde(default = "defaults::battery_critical")]
    pub battery_critical_percent: f64,
    #[serde(default = "defaults::battery_low")]
    pub battery_low_percent: f64,
    #[serde(default)]
    pub quiet_hours: Option<QuietHoursConfig>,
    #[serde(default = "defaults::high_temp")]
    pub high_temp_c: f64,
    #[serde(default = "defaults::loud_fan")]
    pub loud_fan_percent: u8,
    #[serde(default = "defaults::cool_temp")]
    pub cool_temp_c: f64,
}

impl Default for EfficiencyDefaults {
    fn default() -> Self {
        Self {
            default_mode: defaults::default_mode(),
            battery_critical_percent: defaults::battery_critical(),
            battery_low_percent: defaults::battery_low(),
            quiet_hours: None,
            high_temp_c: defaults::high_temp(),
            loud_fan_percent: defaults::loud_fan(),
            cool_temp_c: defaults::cool_temp(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QuietHoursConfig {
    pub start_hour: u32,
    pub end_hour: u32,
}

/// Thermal monitor settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ThermalSettings {
    #[serde(default = "defaults::sample_period_secs")]
    pub sample_period_secs: u64,
    #[serde(default = "defaults::warning_temp")]
    pub warning_temp_c: f64,
    #[serde(default = "defaults::critical_temp")]
    pub critical_temp_c: f64,
    #[serde(default = "defaults::shutdown_temp")]
    pub shutdown_temp_c: f64,
}

impl Default for ThermalSettings {
    fn default() -> Self {
        Self {
            sample_period_secs: defaults::sample_period_secs(),
            warning_temp_c: defaults::warning_temp(),
            critical_temp_c: defaults::critical_temp(),
            shutdown_temp_c: defaults::shutdown_temp(),
        }
    }
}

/// A named forwarding policy (minimum confidence, attempt budget, path).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardingPolicyConfig {
    #[serde(default = "defaults::min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: usize,
    #[serde(default)]
    pub escalation_path: Vec<String>,
    #[serde(default = "defaults::respect_thermal")]
    pub respect_thermal: bool,
    #[serde(default)]
    pub return_best_attempt: bool,
}

mod defaults {
    use crate::engine::types::ModePreset;

    pub fn client_port() -> u16 { 8080 }
    pub fn admin_port() -> u16 { 8081 }
    pub fn traffic_log_capacity() -> usize { 500 }
    pub fn timeout_ms() -> u64 { 30_000 }
    pub fn default_deadline_ms() -> u64 { 30_000 }
    pub fn priority() -> i32 { 0 }
    pub fn enabled() -> bool { true }
    pub fn default_mode() -> ModePreset { ModePreset::Balanced }
    pub fn battery_critical() -> f64 { 10.0 }
    pub fn battery_low() -> f64 { 25.0 }
    pub fn high_temp() -> f64 { 75.0 }
    pub fn loud_fan() -> u8 { 70 }
    pub fn cool_temp() -> f64 { 55.0 }
    pub fn sample_period_secs() -> u64 { 5 }
    pub fn warning_temp() -> f64 { 70.0 }
    pub fn critical_temp() -> f64 { 85.0 }
    pub fn shutdown_temp() -> f64 { 95.0 }
    pub fn min_confidence() -> f64 { 0.75 }
    pub fn max_attempts() -> usize { 3 }
    pub fn respect_thermal() -> bool { true }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        toml::from_str(
            r#"
            [backends.npu]
            kind = "ollama"
            base_url = "http://localhost:11434"
            hardware_class = "neural-accelerator"
            nominal_power_watts = 3.0
            nominal_latency_ms = 800
            priority = 1

            [backends.igpu]
            kind = "ollama"
            base_url = "http://localhost:11435"
            hardware_class = "integrated-gpu"
            nominal_power_watts = 12.0
            nominal_latency_ms = 350
            priority = 5

            [forwarding.default]
            min_confidence = 0.75
            max_attempts = 3
            "#,
        )
        .expect("minimal config should parse")
    }

    #[test]
    fn parse_example_config() {
        let content = include_str!("../config.example.toml");
        let config: Config = toml::from_str(content).expect("example config should parse");
        config.validate().expect("example config should be valid");
    }

    #[test]
    fn validation_rejects_empty_backend_set() {
        let mut config = minimal_config();
        config.backends.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_equal_client_and_admin_ports() {
        let mut config = minimal_config();
        config.gateway.admin_port = config.gateway.client_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_out_of_order_thermal_thresholds() {
        let mut config = minimal_config();
        config.thermal.critical_temp_c = config.thermal.warning_temp_c;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_forwarding_path_with_unknown_backend() {
        let mut config = minimal_config();
        config.forwarding.get_mut("default").unwrap().escalation_path.push("ghost".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_client_referencing_unknown_policy() {
        let mut config = minimal_config();
        config.clients.push(ClientConfig { key_env: "X".into(), forwarding_policy: "nope".into() });
        assert!(config.validate().is_err());
    }

    #[test]
    fn forwarding_policy_falls_back_to_default() {
        let config = minimal_config();
        assert!(config.forwarding_policy("nonexistent").is_some());
    }

    #[test]
    fn gateway_defaults_are_applied_when_section_is_absent() {
        let config = minimal_config();
        assert_eq!(config.gateway.client_port, 8080);
        assert_eq!(config.gateway.admin_port, 8081);
        assert_eq!(config.gateway.traffic_log_capacity, 500);
    }

    #[test]
    fn backend_kind_deserializes_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            kind: BackendKind,
        }
        let wrapper: Wrapper = toml::from_str("kind = \"anthropic\"").unwrap();
        assert_eq!(wrapper.kind, BackendKind::Anthropic);
    }
}
