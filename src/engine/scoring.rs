//! Scoring router.
//!
//! Turns a request (prompt + annotations) into a [`RoutingDecision`] by
//! running the full classify → match → filter → score → tie-break
//! pipeline over the currently-registered backends.

use std::collections::HashMap;
use std::time::Duration;

use super::classifier::{self, media_profile};
use super::efficiency::EfficiencyManager;
use super::error::{EngineFailure, SelectError};
use super::matcher::{self, MatchOutcome};
use super::registry::BackendRegistry;
use super::thermal::thermal_penalty;
use super::types::{
    AlternativeCandidate, Annotations, Backend, HardwareClass, MediaType, ModePreset, RoutingDecision, ThermalState,
};

/// Everything the scoring pipeline needs besides the request itself.
pub struct ScoringContext<'a> {
    pub registry: &'a BackendRegistry,
    pub efficiency: &'a EfficiencyManager,
    pub thermal: &'a HashMap<String, ThermalState>,
    pub sample_period: Duration,
}

/// Route one request to a backend.
///
/// `prompt` and `annotations` describe the request; `requested_model` is
/// the model name the caller asked for (possibly replaced by a substitute
/// before scoring — the decision records which).
pub fn select(
    ctx: &ScoringContext<'_>,
    prompt: &str,
    requested_model: &str,
    annotations: &Annotations,
) -> Result<RoutingDecision, EngineFailure> {
    let mut hints = Vec::new();

    // Stage 1: classify.
    let (media_type, complexity) = classifier::classify(prompt, annotations.media_type, annotations.latency_critical);
    let profile = media_profile(media_type);
    hints.push(format!("classified as {media_type}/{complexity:?}"));

    // Compute effective mode once up front; used by both filtering and scoring.
    let system = super::efficiency::SystemState {
        battery_percent: None,
        on_external_power: true,
        local_hour: 12,
    };
    let effective_mode = ctx.efficiency.effective_mode(&system, ctx.thermal);
    let (annotations, override_hints) = ctx.efficiency.apply(annotations, effective_mode, complexity);
    hints.extend(override_hints);

    let healthy = ctx.registry.healthy();
    if healthy.is_empty() {
        return Err(EngineFailure { error: SelectError::NoHealthyBackends.into(), decision: None });
    }

    // Stage 2: match model.
    let (model_used, model_substituted, substitution_reason) =
        match matcher::resolve_model(&healthy, requested_model, &profile) {
            MatchOutcome::Direct => (requested_model.to_string(), false, None),
            MatchOutcome::Substituted { model, reason } => {
                hints.push(reason.clone());
                (model, true, Some(reason))
            }
            MatchOutcome::NoCompatibleBackend => {
                return Err(EngineFailure { error: SelectError::NoCompatibleBackend.into(), decision: None });
            }
        };

    let supporting = matcher::filter_supporting(&healthy, &model_used);

    // Stage 3: policy filter.
    let constrained = ctx.efficiency.constrain(
        supporting.into_iter().cloned().collect(),
        effective_mode,
        ctx.thermal,
        ctx.sample_period,
    );

    let limits = ctx.efficiency.limits_for(effective_mode);
    let mut candidates: Vec<Backend> = constrained
        .into_iter()
        .filter(|b| {
            if let Some(max_latency) = annotations.max_latency_ms {
                if b.nominal_latency_ms > max_latency {
                    return false;
                }
            }
            if let Some(max_power) = annotations.max_power_watts {
                if b.nominal_power_watts > max_power {
                    return false;
                }
            }
            true
        })
        .collect();

    if candidates.is_empty() {
        return Err(EngineFailure { error: SelectError::PolicyExcludedAll.into(), decision: None });
    }

    if let Some(target) = &annotations.explicit_target {
        match candidates.iter().position(|b| &b.id == target) {
            Some(pos) => {
                let winner = candidates.swap_remove(pos);
                hints.push("explicit target, constraints met".to_string());
                return Ok(emit(winner, vec![], media_type, requested_model, model_used, model_substituted, substitution_reason, hints));
            }
            None => {
                // Unknown, unhealthy, or policy-excluded explicit target: fall
                // back to normal scoring over the surviving candidates rather
                // than failing the request.
                hints.push(format!("explicit target `{target}` unavailable — falling back to scoring"));
            }
        }
    }

    // Stage 4: score.
    let latency_weight = if annotations.latency_critical { 2.5 } else { 1.0 };
    let power_weight = if annotations.prefer_power_efficiency || profile.favours_power_efficiency() { 2.0 } else { 1.0 };

    let mut scored: Vec<(Backend, f64)> = candidates
        .into_iter()
        .map(|b| {
            let score = score_backend(&b, latency_weight, power_weight, &limits, effective_mode, ctx.thermal, ctx.sample_period);
            (b, score)
        })
        .collect();

    // Stage 5: tie-break. Higher score first, then tie-break rules.
    scored.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.nominal_latency_ms.cmp(&b.nominal_latency_ms))
            .then_with(|| a.nominal_power_watts.partial_cmp(&b.nominal_power_watts).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut iter = scored.into_iter();
    let (winner, _) = iter.next().expect("candidates non-empty, checked above");
    let alternatives = iter
        .map(|(b, s)| AlternativeCandidate { backend_id: b.id, score: s })
        .collect();

    hints.push(format!("scored {} candidate(s)", alternatives.len() + 1));
    Ok(emit(winner, alternatives, media_type, requested_model, model_used, model_substituted, substitution_reason, hints))
}

fn score_backend(
    b: &Backend,
    latency_weight: f64,
    power_weight: f64,
    limits: &super::efficiency::ModeLimits,
    mode: ModePreset,
    thermal: &HashMap<String, ThermalState>,
    sample_period: Duration,
) -> f64 {
    let latency_term = (1000.0 - b.metrics.avg_latency_ms).clamp(-500.0, 1000.0);
    let power_term = (1000.0 - b.nominal_power_watts * 10.0).clamp(0.0, 1000.0);
    let state = thermal.get(&b.id);
    let penalty = thermal_penalty(state, sample_period);
    let quiet_bonus = quiet_bonus(b, limits, mode, state);

    b.priority as f64 * 10.0 + latency_weight * latency_term + power_weight * power_term - penalty + quiet_bonus
}

fn quiet_bonus(
    b: &Backend,
    limits: &super::efficiency::ModeLimits,
    mode: ModePreset,
    state: Option<&ThermalState>,
) -> f64 {
    let quiet_modes = matches!(mode, ModePreset::Quiet | ModePreset::UltraEfficiency);
    if !quiet_modes {
        return 0.0;
    }
    if !limits.preferred_hardware.contains(&b.hardware_class) {
        return 0.0;
    }
    let fan_ok = state.map(|s| s.fan_percent <= limits.max_fan_percent).unwrap_or(true);
    if fan_ok { 200.0 } else { 0.0 }
}

#[allow(clippy::too_many_arguments)]
fn emit(
    winner: Backend,
    alternatives: Vec<AlternativeCandidate>,
    media_type: MediaType,
    requested_model: &str,
    model_used: String,
    model_substituted: bool,
    substitution_reason: Option<String>,
    hints: Vec<String>,
) -> RoutingDecision {
    RoutingDecision {
        chosen_backend: winner.id.clone(),
        reason: hints.last().cloned().unwrap_or_else(|| "scored".to_string()),
        estimated_power_watts: winner.nominal_power_watts,
        estimated_latency_ms: winner.nominal_latency_ms,
        alternatives,
        requested_model: requested_model.to_string(),
        model_used,
        model_substituted,
        substitution_reason,
        media_type,
        hints,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::efficiency::AutoModeThresholds;
    use crate::engine::types::{BackendMetrics, HealthState, ModelCapability};

    fn make_backend(id: &str, priority: i32, latency: u64, power: f64, hw: HardwareClass) -> Backend {
        Backend {
            id: id.into(),
            kind: "ollama".into(),
            hardware_class: hw,
            nominal_power_watts: power,
            nominal_latency_ms: latency,
            priority,
            capability: ModelCapability::default(),
            metrics: BackendMetrics { avg_latency_ms: latency as f64, ..Default::default() },
            health: HealthState::Healthy,
        }
    }

    fn ctx(registry: &BackendRegistry, efficiency: &EfficiencyManager, thermal: &HashMap<String, ThermalState>) -> ScoringContext<'_> {
        ScoringContext { registry, efficiency, thermal, sample_period: Duration::from_secs(5) }
    }

    #[test]
    fn selects_higher_scoring_backend_between_two_healthy_candidates() {
        let registry = BackendRegistry::new();
        registry.register(make_backend("fast", 9, 150, 55.0, HardwareClass::DiscreteGpu), Ok(())).unwrap();
        registry.register(make_backend("slow", 1, 800, 3.0, HardwareClass::NeuralAccelerator), Ok(())).unwrap();
        let efficiency = EfficiencyManager::new(ModePreset::HighPerformance, AutoModeThresholds::default());
        let thermal = HashMap::new();
        let decision = select(&ctx(&registry, &efficiency, &thermal), "hello", "llama:7b", &Annotations::default()).unwrap();
        assert_eq!(decision.chosen_backend, "fast");
    }

    #[test]
    fn no_healthy_backends_is_reported() {
        let registry = BackendRegistry::new();
        let efficiency = EfficiencyManager::new(ModePreset::Balanced, AutoModeThresholds::default());
        let thermal = HashMap::new();
        let err = select(&ctx(&registry, &efficiency, &thermal), "hi", "llama:7b", &Annotations::default()).unwrap_err();
        assert_eq!(err.error.tag(), "no-healthy-backends");
    }

    #[test]
    fn explicit_target_short_circuits_scoring() {
        let registry = BackendRegistry::new();
        registry.register(make_backend("a", 9, 100, 50.0, HardwareClass::DiscreteGpu), Ok(())).unwrap();
        registry.register(make_backend("b", 1, 900, 2.0, HardwareClass::NeuralAccelerator), Ok(())).unwrap();
        let efficiency = EfficiencyManager::new(ModePreset::HighPerformance, AutoModeThresholds::default());
        let thermal = HashMap::new();
        let mut annotations = Annotations::default();
        annotations.explicit_target = Some("b".into());
        let decision = select(&ctx(&registry, &efficiency, &thermal), "hi", "llama:7b", &annotations).unwrap();
        assert_eq!(decision.chosen_backend, "b");
        assert!(decision.alternatives.is_empty());
    }

    #[test]
    fn explicit_target_unavailable_falls_back_to_scoring() {
        let registry = BackendRegistry::new();
        registry.register(make_backend("a", 9, 100, 50.0, HardwareClass::DiscreteGpu), Ok(())).unwrap();
        let efficiency = EfficiencyManager::new(ModePreset::Balanced, AutoModeThresholds::default());
        let thermal = HashMap::new();
        let mut annotations = Annotations::default();
        annotations.explicit_target = Some("ghost".into());
        let decision = select(&ctx(&registry, &efficiency, &thermal), "hi", "llama:7b", &annotations).unwrap();
        assert_eq!(decision.chosen_backend, "a");
        assert!(decision.hints.iter().any(|h| h.contains("falling back to scoring")));
    }

    #[test]
    fn explicit_target_excluded_by_thermal_limit_falls_back_to_scoring() {
        let registry = BackendRegistry::new();
        registry.register(make_backend("nv", 9, 100, 120.0, HardwareClass::DiscreteGpu), Ok(())).unwrap();
        registry.register(make_backend("igpu", 3, 300, 12.0, HardwareClass::IntegratedGpu), Ok(())).unwrap();
        let efficiency = EfficiencyManager::new(ModePreset::HighPerformance, AutoModeThresholds::default());
        let mut thermal = HashMap::new();
        thermal.insert(
            "nv".to_string(),
            ThermalState {
                temperature_c: 88.0,
                fan_percent: 50,
                power_draw_w: 120.0,
                utilization_percent: 90,
                throttling: false,
                sampled_at: chrono::Utc::now(),
            },
        );
        let mut annotations = Annotations::default();
        annotations.explicit_target = Some("nv".into());
        let decision = select(&ctx(&registry, &efficiency, &thermal), "hi", "llama:7b", &annotations).unwrap();
        assert_eq!(decision.chosen_backend, "igpu");
        assert!(decision.hints.iter().any(|h| h.contains("falling back to scoring")));
    }

    #[test]
    fn no_compatible_backend_when_model_unsupported_and_no_substitute_fits() {
        let registry = BackendRegistry::new();
        let mut b = make_backend("tiny", 5, 100, 5.0, HardwareClass::NeuralAccelerator);
        b.capability.max_model_size_gb = Some(1.0);
        registry.register(b, Ok(())).unwrap();
        let efficiency = EfficiencyManager::new(ModePreset::Balanced, AutoModeThresholds::default());
        let thermal = HashMap::new();
        let err = select(&ctx(&registry, &efficiency, &thermal), "hi", "llama:70b", &Annotations::default()).unwrap_err();
        assert_eq!(err.error.tag(), "no-compatible-backend");
    }

    #[test]
    fn tie_break_prefers_higher_priority_then_lower_latency() {
        let registry = BackendRegistry::new();
        // Same nominal power & latency & avg_latency (so raw score ties); priority breaks it.
        registry.register(make_backend("low-pri", 1, 200, 10.0, HardwareClass::IntegratedGpu), Ok(())).unwrap();
        registry.register(make_backend("high-pri", 5, 200, 10.0, HardwareClass::IntegratedGpu), Ok(())).unwrap();
        let efficiency = EfficiencyManager::new(ModePreset::Balanced, AutoModeThresholds::default());
        let thermal = HashMap::new();
        let decision = select(&ctx(&registry, &efficiency, &thermal), "hi", "llama:7b", &Annotations::default()).unwrap();
        assert_eq!(decision.chosen_backend, "high-pri");
    }
}
