//! Unified HTTP error type for axum request handlers.
//!
//! [`AppError`] wraps [`anyhow::Error`] and converts it into an appropriate
//! HTTP response automatically via [`IntoResponse`]. This means every handler
//! that can fail can return `Result<T, AppError>` and propagate errors with `?`
//! — no manual `map_err`, no boilerplate.
//!
//! [`EngineFailure`] gets its own `From` impl so each tagged engine error
//! maps to the status code a caller should act on, rather than collapsing
//! everything to a bare 500.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::engine::{EngineError, EngineFailure};

/// Wraps [`anyhow::Error`] so it can be returned from axum handlers.
///
/// Any type that implements `Into<anyhow::Error>` (which includes `io::Error`,
/// `reqwest::Error`, and any `#[derive(thiserror::Error)]` type) can be
/// converted into an [`AppError`] via the blanket [`From`] implementation.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    tag: Option<&'static str>,
}

fn status_for(error: &EngineError) -> StatusCode {
    match error {
        EngineError::NoHealthyBackends => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::NoCompatibleBackend => StatusCode::NOT_FOUND,
        EngineError::PolicyExcludedAll | EngineError::ExplicitTargetUnavailable { .. } => StatusCode::CONFLICT,
        EngineError::AllBackendsFailed { .. } => StatusCode::BAD_GATEWAY,
        EngineError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        EngineError::InsufficientConfidence { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::UnknownMode(_) | EngineError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
    }
}

impl From<EngineFailure> for AppError {
    fn from(failure: EngineFailure) -> Self {
        Self {
            status: status_for(&failure.error),
            message: failure.error.to_string(),
            tag: Some(failure.error.tag()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::warn!(status = %self.status, tag = self.tag.unwrap_or("internal"), error = %self.message, "handler error");
        let mut body = json!({ "error": self.message });
        if let Some(tag) = self.tag {
            body["tag"] = json!(tag);
        }
        (self.status, Json(body)).into_response()
    }
}

/// Convert any other `Into<anyhow::Error>` into an [`AppError`] as a 500.
///
/// This is the idiomatic axum pattern — see
/// <https://docs.rs/axum/latest/axum/error_handling/index.html>.
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.into().to_string(),
            tag: None,
        }
    }
}
