//! Model-capability matcher.
//!
//! Decides whether a backend can host a requested model, and — when none
//! can — proposes a substitute drawn from the media type's profile.

use super::classifier::MediaProfile;
use super::types::{Backend, ModelCapability};

/// Extract a size tag in GB from a model name, e.g. `"llama:70b"` -> `70.0`.
/// Returns `None` when no recognisable size tag is present — an unknown
/// size is accepted by [`supports`], never rejected.
pub fn parse_model_size_gb(model: &str) -> Option<f64> {
    let tag = model.rsplit(':').next()?;
    let tag = tag.strip_suffix('b').or_else(|| tag.strip_suffix('B'))?;
    tag.parse::<f64>().ok()
}

/// Does `model` match any of `patterns` as a case-insensitive substring?
fn matches_any(model: &str, patterns: &[String]) -> bool {
    let lower = model.to_lowercase();
    patterns.iter().any(|p| lower.contains(&p.to_lowercase()))
}

/// Can this backend host `model`?
///
/// Exclusion wins first; then an empty or matching accept-pattern set
/// admits the model subject to the size ceiling; an unrecognised size tag
/// is treated as unknown and accepted.
pub fn supports(capability: &ModelCapability, model: &str) -> bool {
    if matches_any(model, &capability.exclude_patterns) {
        return false;
    }

    let pattern_ok = capability.accept_patterns.is_empty() || matches_any(model, &capability.accept_patterns);
    if !pattern_ok {
        return false;
    }

    match (capability.max_model_size_gb, parse_model_size_gb(model)) {
        (Some(limit), Some(size)) => size <= limit,
        _ => true,
    }
}

/// Filter `backends` down to those that support `model`.
pub fn filter_supporting<'a>(backends: &'a [Backend], model: &str) -> Vec<&'a Backend> {
    backends.iter().filter(|b| supports(&b.capability, model)).collect()
}

/// Result of attempting to resolve a request's model against the fleet.
pub enum MatchOutcome {
    /// At least one healthy backend supports the originally-requested model.
    Direct,
    /// No backend supports the original model, but `model` is a viable substitute.
    Substituted { model: String, reason: String },
    /// No backend supports the original model and no substitute was viable.
    NoCompatibleBackend,
}

/// Resolve `requested_model` against the currently-healthy backends.
///
/// If every backend fails [`supports`] for the requested model, consults
/// `profile`'s preferred substitute list in order and proposes the first
/// one at least one healthy backend supports. The ordering is fixed, not
/// adjustable per-request.
pub fn resolve_model(healthy: &[Backend], requested_model: &str, profile: &MediaProfile) -> MatchOutcome {
    if !filter_supporting(healthy, requested_model).is_empty() {
        return MatchOutcome::Direct;
    }

    for candidate in &profile.preferred_substitute_models {
        if candidate == requested_model {
            continue;
        }
        if !filter_supporting(healthy, candidate).is_empty() {
            return MatchOutcome::Substituted {
                model: candidate.clone(),
                reason: format!(
                    "no backend supports `{requested_model}`; substituted `{candidate}` from media profile"
                ),
            };
        }
    }

    MatchOutcome::NoCompatibleBackend
}
