//! Admin API (port 8081) — operator-facing introspection endpoints.
//!
//! These endpoints are separated onto a different port so they can be
//! network-restricted independently of the client API (e.g. accessible only
//! from the internal network, never exposed to the internet).

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    backends::BackendClient,
    engine::{efficiency::parse_mode_name, EngineError, EngineFailure},
    error::AppError,
    router::RouterState,
};

/// Build the admin-facing axum router (port 8081).
pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/admin/health", get(health))
        .route("/admin/traffic", get(traffic))
        .route("/admin/config", get(config))
        .route("/admin/backends", get(backends))
        .route("/admin/backends/health", get(backends_health))
        .route("/admin/mode", get(mode).post(set_mode))
        .with_state(state)
}

/// GET /admin/health — registry liveness at a glance.
pub async fn health(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "backends": state.registry.len(),
        "healthy_backends": state.registry.healthy().len(),
        "mode": state.efficiency.mode().to_string(),
    }))
}

#[derive(Deserialize)]
pub struct TrafficQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}
fn default_limit() -> usize {
    100
}

/// GET /admin/traffic?limit=N — recent N traffic entries (default 100)
pub async fn traffic(
    State(state): State<Arc<RouterState>>,
    Query(q): Query<TrafficQuery>,
) -> impl IntoResponse {
    let entries = state.traffic.recent(q.limit).await;
    let stats = state.traffic.stats().await;
    Json(json!({
        "stats": stats,
        "entries": entries,
    }))
}

/// GET /admin/config — returns the current config with secrets redacted
pub async fn config(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let cfg = state.config();

    // Redact secrets — show env var name but not its resolved value.
    let backends: Vec<Value> = cfg
        .backends
        .iter()
        .map(|(id, b)| {
            json!({
                "id": id,
                "kind": b.kind.to_string(),
                "base_url": b.base_url,
                "api_key_env": b.api_key_env,
                "hardware_class": b.hardware_class,
                "priority": b.priority,
                "enabled": b.enabled,
            })
        })
        .collect();

    let forwarding: Value = cfg
        .forwarding
        .iter()
        .map(|(name, p)| {
            (
                name.clone(),
                json!({
                    "min_confidence": p.min_confidence,
                    "max_attempts": p.max_attempts,
                    "escalation_path": p.escalation_path,
                    "respect_thermal": p.respect_thermal,
                }),
            )
        })
        .collect::<serde_json::Map<_, _>>()
        .into();

    Json(json!({
        "gateway": {
            "client_port": cfg.gateway.client_port,
            "admin_port": cfg.gateway.admin_port,
            "traffic_log_capacity": cfg.gateway.traffic_log_capacity,
        },
        "backends": backends,
        "forwarding": forwarding,
        "efficiency": {
            "default_mode": cfg.efficiency.default_mode.to_string(),
            "current_mode": state.efficiency.mode().to_string(),
        },
        "clients_configured": cfg.clients.len(),
    }))
}

/// GET /admin/backends/health — freshly probe every configured backend.
pub async fn backends_health(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let cfg = state.config();
    let mut results = Vec::new();

    for (id, backend_cfg) in &cfg.backends {
        if !backend_cfg.enabled {
            results.push(json!({ "backend": id, "status": "disabled" }));
            continue;
        }

        let client = match BackendClient::new(backend_cfg) {
            Ok(c) => c,
            Err(e) => {
                results.push(json!({
                    "backend": id,
                    "status": "error",
                    "error": e.to_string(),
                }));
                continue;
            }
        };

        match client.health_check().await {
            Ok(_) => results.push(json!({ "backend": id, "status": "ok" })),
            Err(e) => results.push(json!({
                "backend": id,
                "status": "unreachable",
                "error": e.to_string(),
            })),
        }
    }

    let all_ok = results.iter().all(|r| r["status"] == "ok" || r["status"] == "disabled");
    let status = if all_ok { StatusCode::OK } else { StatusCode::MULTI_STATUS };

    (status, Json(json!({ "backends": results })))
}

/// GET /admin/backends — registry snapshot (no live probing).
pub async fn backends(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let snapshot: Vec<Value> = state
        .registry
        .list(|_| true)
        .into_iter()
        .map(|b| {
            json!({
                "id": b.id,
                "kind": b.kind,
                "hardware_class": b.hardware_class,
                "nominal_power_watts": b.nominal_power_watts,
                "nominal_latency_ms": b.nominal_latency_ms,
                "priority": b.priority,
                "capability": b.capability,
                "metrics": b.metrics,
                "health": b.health,
            })
        })
        .collect();

    Json(json!({ "backends": snapshot }))
}

/// GET /admin/mode — current efficiency mode.
pub async fn mode(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    Json(json!({ "mode": state.efficiency.mode().to_string() }))
}

#[derive(Deserialize)]
pub struct SetModeRequest {
    mode: String,
}

/// POST /admin/mode — switch the live efficiency mode by name.
pub async fn set_mode(
    State(state): State<Arc<RouterState>>,
    Json(req): Json<SetModeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let parsed = parse_mode_name(&req.mode).map_err(|_| {
        AppError::from(EngineFailure {
            error: EngineError::UnknownMode(req.mode.clone()),
            decision: None,
        })
    })?;

    state.efficiency.set_mode(parsed);
    Ok(Json(json!({ "mode": parsed.to_string() })))
}
