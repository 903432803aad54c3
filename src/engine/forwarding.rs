//! Forwarding controller.
//!
//! Drives escalation across a path of backends for one request: invoke,
//! score the response's confidence, and either return it or move to the
//! next backend. Suspends only at the backend invocation itself.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::Instant;

use super::confidence::{self, ConfidenceInputs};
use super::efficiency::ABSOLUTE_MAX_TEMP_C;
use super::error::{EngineError, EngineFailure};
use super::registry::BackendRegistry;
use super::types::{Backend, ForwardingAttempt, ThermalState};

/// A backend invocation failed before producing a response.
#[derive(Debug, Clone)]
pub enum TransportError {
    Transport(String),
    ModelNotAvailable(String),
    ServerError(String),
    Cancelled,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::ModelNotAvailable(m) => write!(f, "model not available: {m}"),
            Self::ServerError(e) => write!(f, "server error: {e}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A completed backend response, before confidence scoring.
pub struct GenerationResult {
    pub text: String,
    pub token_count: u64,
}

pub type GenerateFuture = Pin<Box<dyn Future<Output = Result<GenerationResult, TransportError>> + Send>>;

/// The per-backend invocation contract the forwarding controller drives.
/// Implemented by each backend adapter.
pub trait BackendInvoker: Send + Sync {
    fn generate(&self, backend_id: &str, prompt: &str, model: &str, deadline: Instant) -> GenerateFuture;
}

/// Escalation and acceptance policy for one request.
pub struct ForwardingPolicy {
    pub min_confidence: f64,
    pub max_attempts: usize,
    pub respect_thermal: bool,
    pub return_best_attempt: bool,
    /// Explicit ordered backend ids, or `None` to auto-derive.
    pub escalation_path: Option<Vec<String>>,
}

pub struct ForwardingContext<'a> {
    pub registry: &'a BackendRegistry,
    pub thermal: &'a HashMap<String, ThermalState>,
    pub invoker: &'a dyn BackendInvoker,
}

/// The outcome of one successful forwarding pass.
pub struct ForwardingOutcome {
    pub chosen: ForwardingAttempt,
    pub response_text: String,
    pub attempts: Vec<ForwardingAttempt>,
}

/// Build the ordered list of backends to try, plus the reasons any
/// candidate was skipped before the first attempt.
fn escalation_path(ctx: &ForwardingContext<'_>, model: &str, policy: &ForwardingPolicy) -> (Vec<Backend>, Vec<String>) {
    let mut skipped = Vec::new();

    let candidates: Vec<Backend> = match &policy.escalation_path {
        Some(ids) => ids
            .iter()
            .filter_map(|id| match ctx.registry.lookup(id) {
                Some(b) => Some(b),
                None => {
                    skipped.push(format!("{id}: not registered"));
                    None
                }
            })
            .collect(),
        None => {
            let mut healthy = ctx.registry.healthy();
            healthy.sort_by(|a, b| a.nominal_power_watts.partial_cmp(&b.nominal_power_watts).unwrap_or(std::cmp::Ordering::Equal));
            healthy
        }
    };

    let filtered = candidates
        .into_iter()
        .filter(|b| {
            if !b.is_healthy() {
                skipped.push(format!("{}: unhealthy", b.id));
                return false;
            }
            if !super::matcher::supports(&b.capability, model) {
                skipped.push(format!("{}: does not support {model}", b.id));
                return false;
            }
            if policy.respect_thermal {
                if let Some(state) = ctx.thermal.get(&b.id) {
                    if state.throttling || state.temperature_c >= ABSOLUTE_MAX_TEMP_C {
                        skipped.push(format!("{}: over thermal limit", b.id));
                        return false;
                    }
                }
            }
            true
        })
        .collect();

    (filtered, skipped)
}

/// Run the escalation loop for one request.
///
/// Attempts proceed strictly in path order and stop at `max_attempts`.
/// If `deadline` elapses before or during an attempt, the in-flight
/// attempt (if any) is recorded as cancelled and the controller returns
/// `deadline-exceeded` without trying the next backend.
pub async fn forward(
    ctx: &ForwardingContext<'_>,
    prompt: &str,
    model: &str,
    policy: &ForwardingPolicy,
    deadline: Instant,
) -> Result<ForwardingOutcome, EngineFailure> {
    let (path, _skipped) = escalation_path(ctx, model, policy);

    let mut attempts: Vec<ForwardingAttempt> = Vec::new();
    let mut best: Option<(ForwardingAttempt, String)> = None;
    let mut last_transport_error: Option<String> = None;

    for backend in path.into_iter().take(policy.max_attempts) {
        if Instant::now() >= deadline {
            return Err(EngineFailure { error: EngineError::DeadlineExceeded { attempts }, decision: None });
        }

        let start = Instant::now();
        let invocation = ctx.invoker.generate(&backend.id, prompt, model, deadline);

        match tokio::time::timeout_at(deadline, invocation).await {
            Err(_elapsed) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                attempts.push(ForwardingAttempt::cancelled(backend.id.clone(), latency_ms));
                return Err(EngineFailure { error: EngineError::DeadlineExceeded { attempts }, decision: None });
            }
            Ok(Err(transport_err)) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                last_transport_error = Some(transport_err.to_string());
                attempts.push(ForwardingAttempt::failed(backend.id.clone(), latency_ms, transport_err.to_string()));
            }
            Ok(Ok(generation)) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                let (confidence, reason) = confidence::estimate(&ConfidenceInputs {
                    response_text: &generation.text,
                    model,
                    hardware_class: backend.hardware_class,
                });
                let attempt = ForwardingAttempt::succeeded(backend.id.clone(), latency_ms, confidence, reason);
                attempts.push(attempt.clone());

                let is_better = best.as_ref().map(|(a, _)| confidence > a.confidence.unwrap_or(0.0)).unwrap_or(true);
                if is_better {
                    best = Some((attempt.clone(), generation.text.clone()));
                }

                if confidence >= policy.min_confidence {
                    return Ok(ForwardingOutcome { chosen: attempt, response_text: generation.text, attempts });
                }
            }
        }
    }

    if let Some((attempt, text)) = best {
        if policy.return_best_attempt {
            return Ok(ForwardingOutcome { chosen: attempt, response_text: text, attempts });
        }
        return Err(EngineFailure { error: EngineError::InsufficientConfidence { attempts }, decision: None });
    }

    Err(EngineFailure {
        error: EngineError::AllBackendsFailed {
            attempts,
            last_error: last_transport_error.unwrap_or_else(|| "no backend was attempted".to_string()),
        },
        decision: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{BackendMetrics, HardwareClass, HealthState, ModelCapability};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn backend(id: &str, power: f64) -> Backend {
        Backend {
            id: id.into(),
            kind: "ollama".into(),
            hardware_class: HardwareClass::IntegratedGpu,
            nominal_power_watts: power,
            nominal_latency_ms: 100,
            priority: 1,
            capability: ModelCapability::default(),
            metrics: BackendMetrics::default(),
            health: HealthState::Healthy,
        }
    }

    struct ScriptedInvoker {
        responses: Vec<(&'static str, &'static str)>,
        calls: AtomicUsize,
    }

    impl BackendInvoker for ScriptedInvoker {
        fn generate(&self, backend_id: &str, _prompt: &str, _model: &str, _deadline: Instant) -> GenerateFuture {
            let text = self
                .responses
                .iter()
                .find(|(id, _)| *id == backend_id)
                .map(|(_, text)| text.to_string())
                .unwrap_or_default();
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(GenerationResult { text, token_count: 10 }) })
        }
    }

    fn long_confident_answer() -> &'static str {
        "This is a well-formed, reasonably detailed answer that explains the topic in full with several points of supporting context for the reader."
    }

    #[tokio::test]
    async fn escalates_until_confidence_threshold_is_met() {
        let registry = BackendRegistry::new();
        registry.register(backend("npu", 3.0), Ok(())).unwrap();
        registry.register(backend("igpu", 12.0), Ok(())).unwrap();
        let thermal = HashMap::new();
        let invoker = ScriptedInvoker {
            responses: vec![("npu", "I don't know, maybe."), ("igpu", long_confident_answer())],
            calls: AtomicUsize::new(0),
        };
        let ctx = ForwardingContext { registry: &registry, thermal: &thermal, invoker: &invoker };
        let policy = ForwardingPolicy {
            min_confidence: 0.75,
            max_attempts: 3,
            respect_thermal: false,
            return_best_attempt: false,
            escalation_path: Some(vec!["npu".into(), "igpu".into()]),
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        let outcome = forward(&ctx, "hi", "llama:7b", &policy, deadline).await.unwrap();
        assert_eq!(outcome.chosen.backend_id, "igpu");
        assert_eq!(outcome.attempts.len(), 2);
    }

    #[tokio::test]
    async fn returns_best_attempt_when_threshold_never_met() {
        let registry = BackendRegistry::new();
        registry.register(backend("a", 3.0), Ok(())).unwrap();
        let thermal = HashMap::new();
        let invoker = ScriptedInvoker {
            responses: vec![("a", "I don't know, maybe, perhaps it seems unclear to me honestly.")],
            calls: AtomicUsize::new(0),
        };
        let ctx = ForwardingContext { registry: &registry, thermal: &thermal, invoker: &invoker };
        let policy = ForwardingPolicy {
            min_confidence: 0.95,
            max_attempts: 1,
            respect_thermal: false,
            return_best_attempt: true,
            escalation_path: Some(vec!["a".into()]),
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        let outcome = forward(&ctx, "hi", "llama:7b", &policy, deadline).await.unwrap();
        assert_eq!(outcome.chosen.backend_id, "a");
    }

    #[tokio::test]
    async fn fails_insufficient_confidence_without_return_best_attempt() {
        let registry = BackendRegistry::new();
        registry.register(backend("a", 3.0), Ok(())).unwrap();
        let thermal = HashMap::new();
        let invoker = ScriptedInvoker {
            responses: vec![("a", "I don't know, maybe, perhaps it seems unclear to me honestly.")],
            calls: AtomicUsize::new(0),
        };
        let ctx = ForwardingContext { registry: &registry, thermal: &thermal, invoker: &invoker };
        let policy = ForwardingPolicy {
            min_confidence: 0.95,
            max_attempts: 1,
            respect_thermal: false,
            return_best_attempt: false,
            escalation_path: Some(vec!["a".into()]),
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = forward(&ctx, "hi", "llama:7b", &policy, deadline).await.unwrap_err();
        assert_eq!(err.error.tag(), "insufficient-confidence");
    }

    #[tokio::test]
    async fn no_attempts_made_reports_all_backends_failed_with_placeholder() {
        let registry = BackendRegistry::new();
        let thermal = HashMap::new();
        let invoker = ScriptedInvoker { responses: vec![], calls: AtomicUsize::new(0) };
        let ctx = ForwardingContext { registry: &registry, thermal: &thermal, invoker: &invoker };
        let policy = ForwardingPolicy {
            min_confidence: 0.5,
            max_attempts: 3,
            respect_thermal: false,
            return_best_attempt: false,
            escalation_path: None,
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = forward(&ctx, "hi", "llama:7b", &policy, deadline).await.unwrap_err();
        assert_eq!(err.error.tag(), "all-backends-failed");
    }

    #[tokio::test]
    async fn already_elapsed_deadline_stops_before_first_attempt() {
        let registry = BackendRegistry::new();
        registry.register(backend("a", 3.0), Ok(())).unwrap();
        let thermal = HashMap::new();
        let invoker = ScriptedInvoker { responses: vec![("a", long_confident_answer())], calls: AtomicUsize::new(0) };
        let ctx = ForwardingContext { registry: &registry, thermal: &thermal, invoker: &invoker };
        let policy = ForwardingPolicy {
            min_confidence: 0.5,
            max_attempts: 1,
            respect_thermal: false,
            return_best_attempt: false,
            escalation_path: Some(vec!["a".into()]),
        };
        let deadline = Instant::now() - Duration::from_millis(1);
        let err = forward(&ctx, "hi", "llama:7b", &policy, deadline).await.unwrap_err();
        assert_eq!(err.error.tag(), "deadline-exceeded");
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
    }
}
