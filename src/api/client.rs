//! Client-facing API (port 8080) — the endpoint inference agents talk to.
//!
//! This is intentionally a thin layer: all routing logic lives in [`crate::router`].
//! Handlers translate HTTP concerns (status codes, JSON bodies) into calls
//! to the router and back.

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};

use crate::{api::client_auth::ClientProfile, error::AppError, router::RouterState};

/// Build the client-facing axum router (port 8080)
pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::api::health::healthz))
        .route("/status", get(crate::api::status::status))
        .route("/metrics", get(crate::api::metrics::metrics))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .with_state(state)
}

/// POST /v1/chat/completions — classify, select a backend, and forward.
///
/// When `[[clients]]` auth is configured, the caller's forwarding policy is
/// taken from the [`ClientProfile`] extension set by `client_auth_middleware`;
/// otherwise the `default` policy applies.
pub async fn chat_completions(
    State(state): State<Arc<RouterState>>,
    profile: Option<Extension<ClientProfile>>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let policy_name = profile.as_ref().map(|Extension(ClientProfile(name))| name.as_str());
    let client_name = profile.as_ref().map(|Extension(ClientProfile(name))| name.as_str());

    let (response, _entry) = crate::router::route(&state, body, policy_name, client_name).await?;
    Ok(Json(response))
}

/// GET /v1/models — lists every enabled backend's preferred model names,
/// plus a synthetic `auto` entry that lets a caller opt into routing
/// instead of naming a model.
pub async fn list_models(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let config = state.config();

    let mut data: Vec<Value> = vec![json!({
        "id": "auto",
        "object": "model",
        "owned_by": "inferno-dispatch",
    })];

    for (backend_id, backend) in &config.backends {
        if !backend.enabled {
            continue;
        }
        for model in &backend.capability.preferred_models {
            data.push(json!({
                "id": model,
                "object": "model",
                "owned_by": backend_id,
            }));
        }
    }

    Json(json!({ "object": "list", "data": data }))
}
