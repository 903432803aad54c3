//! Public status endpoint (`GET /status`, port 8080).
//!
//! Safe to expose publicly without authentication.
//! Returns dispatcher liveness and aggregate metrics only.
//!
//! What this endpoint **does not** include:
//! - Backend ids or URLs
//! - Routing configuration
//! - Any value that could reveal internal infrastructure
//!
//! This endpoint is enabled by default and intended to be the one public
//! window into the dispatcher's health. A future admin dashboard requiring
//! HTTPS will offer deeper introspection.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::router::RouterState;

/// `GET /status` — public liveness and metrics endpoint.
///
/// Example response:
/// ```json
/// {
///   "status": "ok",
///   "ready": true,
///   "uptime_secs": 3600,
///   "requests": {
///     "total": 1024,
///     "errors": 3,
///     "error_rate": 0.003,
///     "escalations": 42,
///     "avg_latency_ms": 87.4
///   }
/// }
/// ```
///
/// `ready` is `false` when one or more backends have `api_key_env` configured
/// but the environment variable is not set or is empty. No backend ids are
/// exposed — only the boolean. When `ready: false` a `setup_url` field is
/// included pointing to the setup documentation.
pub async fn status(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let uptime_secs = state.started_at.elapsed().as_secs();
    let stats = state.traffic.stats().await;
    let error_rate = if stats.total_requests == 0 {
        0.0_f64
    } else {
        stats.error_count as f64 / stats.total_requests as f64
    };

    // Count backends that require a key but don't have one resolved.
    // We expose the count, not the ids, to avoid leaking config detail.
    let config = state.config();
    let unconfigured = config
        .backends
        .values()
        .filter(|b| b.api_key_env.is_some() && b.api_key().map(|k| k.is_empty()).unwrap_or(true))
        .count();
    let ready = unconfigured == 0;

    let mut body = json!({
        "status": "ok",
        "ready": ready,
        "uptime_secs": uptime_secs,
        "requests": {
            "total": stats.total_requests,
            "errors": stats.error_count,
            "error_rate": error_rate,
            "escalations": stats.escalation_count,
            "avg_latency_ms": stats.avg_latency_ms,
        }
    });

    if !ready {
        body["setup_url"] = serde_json::Value::String(
            "https://github.com/inferno-dispatch/inferno-dispatch/blob/main/docs/setup.md".to_string(),
        );
    }

    Json(body)
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, path::PathBuf, sync::Arc};

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use crate::{
        config::{BackendConfig, BackendKind, Config, GatewayConfig},
        engine::types::{HardwareClass, ModelCapability},
        router::RouterState,
        traffic::{TrafficEntry, TrafficLog},
    };

    fn empty_config() -> Config {
        Config {
            gateway: GatewayConfig { client_port: 8080, admin_port: 8081, ..Default::default() },
            backends: HashMap::new(),
            routing: Default::default(),
            efficiency: Default::default(),
            thermal: Default::default(),
            forwarding: HashMap::new(),
            clients: vec![],
        }
    }

    async fn minimal_state() -> Arc<RouterState> {
        let config = Arc::new(empty_config());
        Arc::new(
            RouterState::new(config, PathBuf::default(), Arc::new(TrafficLog::new(100)))
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn status_returns_ok_with_zero_metrics_on_fresh_state() {
        let app = crate::api::client::router(minimal_state().await);
        let req = Request::builder().method("GET").uri("/status").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["status"], "ok");
        assert_eq!(json["requests"]["total"], 0);
        assert_eq!(json["requests"]["errors"], 0);
        assert_eq!(json["requests"]["error_rate"], 0.0);
    }

    #[tokio::test]
    async fn status_counts_errors_and_computes_error_rate() {
        let state = minimal_state().await;
        state.traffic.push(TrafficEntry::new("igpu".into(), 50, true));
        state.traffic.push(TrafficEntry::new("igpu".into(), 80, false));
        state.traffic.push(TrafficEntry::new("igpu".into(), 60, false));

        let app = crate::api::client::router(Arc::clone(&state));
        let req = Request::builder().method("GET").uri("/status").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["requests"]["total"], 3);
        assert_eq!(json["requests"]["errors"], 2);
        let rate = json["requests"]["error_rate"].as_f64().unwrap();
        assert!((rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn status_response_contains_no_backend_ids() {
        let state = minimal_state().await;
        state.traffic.push(TrafficEntry::new("igpu-secret-id".into(), 50, true));

        let app = crate::api::client::router(Arc::clone(&state));
        let req = Request::builder().method("GET").uri("/status").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(!body.contains("igpu-secret-id"), "backend id must not appear in /status");
    }

    #[tokio::test]
    async fn status_ready_false_when_backend_api_key_missing() {
        let env_var = "INFD_TEST_STATUS_FAKE_KEY_99XYZ";
        std::env::remove_var(env_var);

        let mut backends = HashMap::new();
        backends.insert(
            "cloud".to_string(),
            BackendConfig {
                kind: BackendKind::OpenAI,
                base_url: "https://api.example.com".into(),
                api_key_env: Some(env_var.into()),
                timeout_ms: 30_000,
                hardware_class: HardwareClass::Cloud,
                nominal_power_watts: 0.0,
                nominal_latency_ms: 500,
                priority: 0,
                capability: ModelCapability::default(),
                enabled: false,
            },
        );
        let config = Config { backends, ..empty_config() };
        let state = Arc::new(
            RouterState::new(Arc::new(config), PathBuf::default(), Arc::new(TrafficLog::new(100)))
                .await
                .unwrap(),
        );

        let app = crate::api::client::router(state);
        let req = Request::builder().method("GET").uri("/status").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["ready"], false, "ready must be false when a required API key is absent");
        assert!(json["setup_url"].as_str().is_some(), "setup_url must be present when ready is false");
    }
}
