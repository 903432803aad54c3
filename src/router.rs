//! Application wiring — builds the engine components from config and drives
//! one request through classify → select → forward.
//!
//! This is intentionally a thin layer: all routing logic lives in
//! `crate::engine`. [`RouterState`] owns the live engine components plus the
//! ambient concerns (traffic log, rate limiter, auth) the HTTP layer needs.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, RwLock},
    time::Duration,
};

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    api::rate_limit::RateLimiter,
    backends::{BackendClient, BackendFleet},
    config::Config,
    engine::{
        efficiency::{AutoModeThresholds, EfficiencyManager, QuietHours},
        forwarding::{self, ForwardingContext, ForwardingOutcome, ForwardingPolicy},
        health::HealthProber,
        registry::BackendRegistry,
        scoring::{self, ScoringContext},
        thermal::{RawTelemetry, TelemetryFuture, TelemetrySource, ThermalMonitor},
        types::{Annotations, Backend, HealthState, ModelCapability, RoutingDecision},
        EngineFailure,
    },
    traffic::{TrafficEntry, TrafficLog},
};

/// Telemetry source for backends with no hardware sensor to read (cloud
/// APIs, or local backends before a real sensor adapter exists). Always
/// reports a cool, idle reading so such backends never trip thermal limits.
struct NoopTelemetry;

impl TelemetrySource for NoopTelemetry {
    fn sample(&self, _backend_id: &str) -> TelemetryFuture {
        Box::pin(async {
            Ok(RawTelemetry {
                temperature_c: 40.0,
                fan_percent: 0,
                power_draw_w: 0.0,
                utilization_percent: 0,
                throttling: false,
            })
        })
    }
}

/// Shared application state injected into every request handler via [`axum::extract::State`].
pub struct RouterState {
    /// Atomically-swappable live config; the lock is held only for the duration
    /// of `Arc::clone`, so it never blocks request handling.
    config_lock: Arc<RwLock<Arc<Config>>>,
    /// Path to the config file on disk — used by the hot-reload background task.
    pub config_path: PathBuf,
    pub registry: Arc<BackendRegistry>,
    pub efficiency: Arc<EfficiencyManager>,
    pub thermal: Arc<ThermalMonitor>,
    pub health_prober: Arc<HealthProber>,
    pub fleet: Arc<BackendFleet>,
    /// In-memory ring-buffer of recent requests, exposed through the admin API.
    pub traffic: Arc<TrafficLog>,
    /// Gateway start time — used to compute uptime for the public status endpoint.
    pub started_at: std::time::Instant,
    /// Optional per-IP rate limiter. `None` means rate limiting is disabled.
    pub rate_limiter: Option<Arc<RateLimiter>>,
    /// Bearer token required for admin API access.
    pub admin_token: Option<String>,
    /// Maps resolved client API key values → forwarding policy names.
    pub client_map: HashMap<String, String>,
    pub shutdown_tx: watch::Sender<bool>,
}

fn thresholds_from(cfg: &Config) -> AutoModeThresholds {
    AutoModeThresholds {
        battery_critical_percent: cfg.efficiency.battery_critical_percent,
        battery_low_percent: cfg.efficiency.battery_low_percent,
        quiet_hours: cfg.efficiency.quiet_hours.map(|q| QuietHours {
            start_hour: q.start_hour,
            end_hour: q.end_hour,
        }),
        high_temp_c: cfg.efficiency.high_temp_c,
        loud_fan_percent: cfg.efficiency.loud_fan_percent,
        cool_temp_c: cfg.efficiency.cool_temp_c,
    }
}

fn backend_from_config(id: &str, cfg: &crate::config::BackendConfig) -> Backend {
    Backend {
        id: id.to_string(),
        kind: cfg.kind.to_string(),
        hardware_class: cfg.hardware_class,
        nominal_power_watts: cfg.nominal_power_watts,
        nominal_latency_ms: cfg.nominal_latency_ms,
        priority: cfg.priority,
        capability: cfg.capability.clone(),
        metrics: Default::default(),
        health: HealthState::Unknown,
    }
}

impl RouterState {
    /// Build every engine component fresh from config and probe each enabled
    /// backend once before admitting it to the registry.
    pub async fn new(config: Arc<Config>, config_path: PathBuf, traffic: Arc<TrafficLog>) -> anyhow::Result<Self> {
        let registry = Arc::new(BackendRegistry::new());
        let mut clients = HashMap::new();

        for (id, backend_cfg) in &config.backends {
            if !backend_cfg.enabled {
                debug!(backend = %id, "backend disabled in config — skipping registration");
                continue;
            }
            let client = BackendClient::new(backend_cfg)?;
            let probe_result = client.health_check().await.map_err(|e| e.to_string());
            if let Err(e) = &probe_result {
                warn!(backend = %id, error = %e, "backend failed its start probe");
            }
            registry.register(backend_from_config(id, backend_cfg), probe_result)?;
            clients.insert(id.clone(), client);
        }

        let fleet = Arc::new(BackendFleet::new(clients));
        let efficiency = Arc::new(EfficiencyManager::new(config.efficiency.default_mode, thresholds_from(&config)));
        let thermal_source: Arc<dyn TelemetrySource> = Arc::new(NoopTelemetry);
        let thermal = Arc::new(ThermalMonitor::new(
            registry.clone(),
            thermal_source,
            Duration::from_secs(config.thermal.sample_period_secs),
        ));
        let health_prober = Arc::new(HealthProber::new(registry.clone(), fleet.clone(), Duration::from_secs(30)));

        let rate_limiter = config
            .gateway
            .rate_limit_rpm
            .filter(|&rpm| rpm > 0)
            .map(|rpm| Arc::new(RateLimiter::new(rpm)));
        let admin_token = config
            .gateway
            .admin_token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty());
        let client_map: HashMap<String, String> = config
            .clients
            .iter()
            .filter_map(|c| {
                let key = std::env::var(&c.key_env).ok().filter(|k| !k.is_empty())?;
                Some((key, c.forwarding_policy.clone()))
            })
            .collect();
        if !client_map.is_empty() {
            tracing::info!(count = client_map.len(), "loaded client key mappings");
        }

        let (shutdown_tx, _rx) = watch::channel(false);

        Ok(Self {
            config_lock: Arc::new(RwLock::new(config)),
            config_path,
            registry,
            efficiency,
            thermal,
            health_prober,
            fleet,
            traffic,
            started_at: std::time::Instant::now(),
            rate_limiter,
            admin_token,
            client_map,
            shutdown_tx,
        })
    }

    /// Returns a snapshot of the current live config.
    pub fn config(&self) -> Arc<Config> {
        self.config_lock.read().expect("config lock poisoned").clone()
    }

    /// Atomically replaces the live config. Called only from the hot-reload task.
    pub fn replace_config(&self, new: Arc<Config>) {
        *self.config_lock.write().expect("config lock poisoned") = new;
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Route one `/v1/chat/completions`-shaped request through classify → select
/// → forward, recording a [`TrafficEntry`] along the way.
///
/// `forwarding_policy` names the policy to apply (from `[forwarding.*]`);
/// `None` resolves to `"default"`.
#[tracing::instrument(skip(state, request_body), fields(backend = tracing::field::Empty))]
pub async fn route(
    state: &RouterState,
    request_body: Value,
    forwarding_policy: Option<&str>,
    client: Option<&str>,
) -> Result<(Value, TrafficEntry), EngineFailure> {
    let config = state.config();
    let policy_name = forwarding_policy.unwrap_or("default");
    let policy_cfg = config.forwarding_policy(policy_name).cloned().unwrap_or_else(default_policy);

    let requested_model = request_body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("auto")
        .to_string();
    let prompt = extract_prompt(&request_body);
    let annotations = extract_annotations(&request_body);

    let thermal_snapshot = state.thermal.snapshot();
    let scoring_ctx = ScoringContext {
        registry: &state.registry,
        efficiency: &state.efficiency,
        thermal: &thermal_snapshot,
        sample_period: state.thermal.sample_period(),
    };

    let t0 = tokio::time::Instant::now();
    let decision = scoring::select(&scoring_ctx, &prompt, &requested_model, &annotations)?;
    tracing::Span::current().record("backend", decision.chosen_backend.as_str());

    let forwarding_policy = ForwardingPolicy {
        min_confidence: policy_cfg.min_confidence,
        max_attempts: policy_cfg.max_attempts,
        respect_thermal: policy_cfg.respect_thermal,
        return_best_attempt: policy_cfg.return_best_attempt,
        escalation_path: if policy_cfg.escalation_path.is_empty() {
            None
        } else {
            Some(policy_cfg.escalation_path.clone())
        },
    };
    let deadline = t0 + Duration::from_millis(config.gateway.default_deadline_ms);
    let forwarding_ctx = ForwardingContext {
        registry: &state.registry,
        thermal: &thermal_snapshot,
        invoker: state.fleet.as_ref(),
    };

    let outcome = forwarding::forward(&forwarding_ctx, &prompt, &decision.model_used, &forwarding_policy, deadline)
        .await
        .map_err(|mut failure| {
            failure.decision = Some(decision.clone());
            failure
        })?;

    let latency_ms = t0.elapsed().as_millis() as u64;
    for attempt in &outcome.attempts {
        let _ = state.registry.update_metrics(&attempt.backend_id, attempt.latency_ms, attempt.success);
    }

    let mut entry = TrafficEntry::from_decision(&decision, outcome.attempts.clone(), latency_ms, true);
    if let Some(c) = client {
        entry = entry.with_client(c);
    }
    state.traffic.push(entry.clone());

    let response = build_response(&decision, &outcome);

    Ok((response, entry))
}

fn default_policy() -> crate::config::ForwardingPolicyConfig {
    crate::config::ForwardingPolicyConfig {
        min_confidence: 0.75,
        max_attempts: 3,
        escalation_path: Vec::new(),
        respect_thermal: true,
        return_best_attempt: false,
    }
}

/// Pull a single prompt string out of an OpenAI-shaped `messages` array,
/// falling back to a bare `prompt` field.
fn extract_prompt(body: &Value) -> String {
    if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        return messages
            .iter()
            .filter_map(|m| m.get("content").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");
    }
    body.get("prompt").and_then(Value::as_str).unwrap_or_default().to_string()
}

/// Parse caller-supplied annotations from an optional `annotations` object
/// in the request body. Malformed annotations are ignored in favour of defaults.
fn extract_annotations(body: &Value) -> Annotations {
    body.get("annotations")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn build_response(decision: &RoutingDecision, outcome: &ForwardingOutcome) -> Value {
    serde_json::json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "object": "chat.completion",
        "model": decision.model_used,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": outcome.response_text },
            "finish_reason": "stop",
        }],
        "routing": {
            "backend": decision.chosen_backend,
            "reason": decision.reason,
            "model_substituted": decision.model_substituted,
            "hints": decision.hints,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, BackendKind};
    use crate::engine::types::HardwareClass;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server_uri: String) -> Config {
        let mut backends = HashMap::new();
        backends.insert(
            "igpu".to_string(),
            BackendConfig {
                kind: BackendKind::OpenAI,
                base_url: server_uri,
                api_key_env: None,
                timeout_ms: 5_000,
                hardware_class: HardwareClass::IntegratedGpu,
                nominal_power_watts: 12.0,
                nominal_latency_ms: 350,
                priority: 5,
                capability: ModelCapability::default(),
                enabled: true,
            },
        );
        let mut forwarding = HashMap::new();
        forwarding.insert(
            "default".to_string(),
            crate::config::ForwardingPolicyConfig {
                min_confidence: 0.5,
                max_attempts: 1,
                escalation_path: vec![],
                respect_thermal: true,
                return_best_attempt: true,
            },
        );
        Config {
            gateway: crate::config::GatewayConfig {
                client_port: 8080,
                admin_port: 8081,
                traffic_log_capacity: 100,
                log_level: None,
                rate_limit_rpm: None,
                admin_token_env: None,
                default_deadline_ms: 30_000,
            },
            backends,
            routing: Default::default(),
            efficiency: Default::default(),
            thermal: Default::default(),
            forwarding,
            clients: vec![],
        }
    }

    async fn mock_state(server: &MockServer) -> RouterState {
        let config = Arc::new(test_config(server.uri()));
        RouterState::new(config, PathBuf::default(), Arc::new(TrafficLog::new(100))).await.unwrap()
    }

    fn ok_body(content: &str) -> serde_json::Value {
        serde_json::json!({ "choices": [{ "message": { "content": content } }] })
    }

    #[tokio::test]
    async fn route_returns_response_from_selected_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(
                "A thorough, comprehensive answer that should clear the confidence bar easily.",
            )))
            .mount(&server)
            .await;

        let state = mock_state(&server).await;
        let body = serde_json::json!({ "model": "q:7b", "messages": [{"role": "user", "content": "hi"}] });

        let result = route(&state, body, None, None).await;
        assert!(result.is_ok(), "expected Ok, got: {result:?}");
        let (response, entry) = result.unwrap();
        assert_eq!(entry.backend, "igpu");
        assert!(response.pointer("/choices/0/message/content").is_some());
    }

    #[tokio::test]
    async fn route_reports_no_healthy_backends_when_registry_is_empty() {
        let config = Arc::new(test_config("http://localhost:1".to_string()));
        let mut config = (*config).clone();
        config.backends.clear();
        let state = RouterState::new(Arc::new(config), PathBuf::default(), Arc::new(TrafficLog::new(10)))
            .await
            .unwrap();

        let body = serde_json::json!({ "model": "q:7b", "messages": [] });
        let err = route(&state, body, None, None).await.unwrap_err();
        assert_eq!(err.error.tag(), "no-healthy-backends");
    }
}
