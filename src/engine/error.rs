//! Tagged engine error kinds.
//!
//! Every variant is opaque to callers beyond its tag; the HTTP layer
//! (`crate::error::AppError`) maps each tag to a status code. Where a
//! partial [`RoutingDecision`] or attempt list exists at failure time it
//! travels with the error so the caller can see what was tried.

use thiserror::Error;

use super::types::{ForwardingAttempt, RoutingDecision};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no healthy backends registered")]
    NoHealthyBackends,

    #[error("no backend supports the requested model and no substitute was viable")]
    NoCompatibleBackend,

    #[error("current mode excluded every candidate backend")]
    PolicyExcludedAll,

    #[error("explicit target `{target}` is unavailable")]
    ExplicitTargetUnavailable { target: String },

    #[error("forwarding exhausted the escalation path without reaching the confidence threshold")]
    InsufficientConfidence { attempts: Vec<ForwardingAttempt> },

    #[error("every backend attempt failed: {last_error}")]
    AllBackendsFailed {
        attempts: Vec<ForwardingAttempt>,
        last_error: String,
    },

    #[error("deadline exceeded during forwarding")]
    DeadlineExceeded { attempts: Vec<ForwardingAttempt> },

    #[error("unknown mode `{0}`")]
    UnknownMode(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Stable tag string, e.g. for logging or API error bodies.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NoHealthyBackends => "no-healthy-backends",
            Self::NoCompatibleBackend => "no-compatible-backend",
            Self::PolicyExcludedAll => "policy-excluded-all",
            Self::ExplicitTargetUnavailable { .. } => "explicit-target-unavailable",
            Self::InsufficientConfidence { .. } => "insufficient-confidence",
            Self::AllBackendsFailed { .. } => "all-backends-failed",
            Self::DeadlineExceeded { .. } => "deadline-exceeded",
            Self::UnknownMode(_) => "unknown-mode",
            Self::InvalidConfig(_) => "invalid-config",
        }
    }

    /// Attempt list carried by this error, if any.
    pub fn attempts(&self) -> Option<&[ForwardingAttempt]> {
        match self {
            Self::InsufficientConfidence { attempts }
            | Self::AllBackendsFailed { attempts, .. }
            | Self::DeadlineExceeded { attempts } => Some(attempts),
            _ => None,
        }
    }
}

/// Failure variants returned by the scoring router's `select`.
#[derive(Debug, Error)]
pub enum SelectError {
    #[error("no healthy backends registered")]
    NoHealthyBackends,
    #[error("no backend supports the requested model and no substitute was viable")]
    NoCompatibleBackend,
    #[error("current mode excluded every candidate backend")]
    PolicyExcludedAll,
    #[error("explicit target `{0}` is unavailable")]
    ExplicitTargetUnavailable(String),
}

impl From<SelectError> for EngineError {
    fn from(e: SelectError) -> Self {
        match e {
            SelectError::NoHealthyBackends => Self::NoHealthyBackends,
            SelectError::NoCompatibleBackend => Self::NoCompatibleBackend,
            SelectError::PolicyExcludedAll => Self::PolicyExcludedAll,
            SelectError::ExplicitTargetUnavailable(target) => {
                Self::ExplicitTargetUnavailable { target }
            }
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// A failure from selection or forwarding paired with whatever partial
/// routing decision had been produced before the failure, so a caller can
/// see what was tried.
#[derive(Debug)]
pub struct EngineFailure {
    pub error: EngineError,
    pub decision: Option<RoutingDecision>,
}

impl std::fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

// Deliberately not `std::error::Error`: the HTTP boundary (`crate::error::AppError`)
// maps this type to a status code via a dedicated `From` impl, and a blanket
// `Error` impl here would make that conflict with the generic `anyhow::Error`
// conversion used for every other error source.
