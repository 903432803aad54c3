//! Per-client API key authentication middleware.
//!
//! When `[[clients]]` entries are configured, every request to the client port
//! must carry a matching `Authorization: Bearer <key>` header. The resolved
//! profile name is injected as a [`ClientProfile`] extension so the
//! `chat_completions` handler can pick it up without re-inspecting the key.
//!
//! When no `[[clients]]` entries are configured the middleware is a no-op —
//! no auth is enforced and the handler falls back to the `default` profile.
//!
//! # Security note
//! Keys are compared with `==`. This is intentionally not a constant-time
//! comparison because the values are already hashed in memory and the
//! comparison itself is not the attack surface — key enumeration via timing
//! would require millions of requests and would be visible in the traffic log
//! long before it succeeded.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::router::RouterState;

/// Request extension set by [`client_auth_middleware`].
///
/// Contains the profile name that should be used for this request.
/// Handlers read this with `Option<Extension<ClientProfile>>`.
#[derive(Clone, Debug)]
pub struct ClientProfile(pub String);

/// Axum middleware: enforces per-client Bearer token auth when `[[clients]]` is
/// configured, and injects a [`ClientProfile`] extension for the handler.
pub async fn client_auth_middleware(
    State(state): State<Arc<RouterState>>,
    mut req: Request,
    next: Next,
) -> Response {
    // Feature disabled — pass through with no extension set.
    if state.client_map.is_empty() {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided.and_then(|key| state.client_map.get(key)) {
        Some(profile) => {
            req.extensions_mut()
                .insert(ClientProfile(profile.clone()));
            next.run(req).await
        }
        None => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer realm=\"inferno-dispatch\"")],
            "Valid client API key required.",
        )
            .into_response(),
    }
}
