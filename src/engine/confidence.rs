//! Confidence estimator.
//!
//! Scores a completed response on how trustworthy it looks, without any
//! model-specific introspection: length, surface patterns, and which kind
//! of model produced it.

use super::types::HardwareClass;

const LENGTH_WEIGHT: f64 = 0.3;
const PATTERN_WEIGHT: f64 = 0.5;
const MODEL_WEIGHT: f64 = 0.2;

/// Inputs to one confidence estimate.
pub struct ConfidenceInputs<'a> {
    pub response_text: &'a str,
    pub model: &'a str,
    pub hardware_class: HardwareClass,
}

/// Estimate confidence in [0, 1] along with a reason trail.
pub fn estimate(inputs: &ConfidenceInputs<'_>) -> (f64, String) {
    let mut reasons = Vec::new();

    let length_score = length_component(inputs.response_text, inputs.model, &mut reasons);
    let pattern_score = pattern_component(inputs.response_text, &mut reasons);
    let model_score = model_component(inputs.model, inputs.response_text, inputs.hardware_class, &mut reasons);

    let total = LENGTH_WEIGHT * length_score + PATTERN_WEIGHT * pattern_score + MODEL_WEIGHT * model_score;
    let clamped = total.clamp(0.0, 1.0);
    (clamped, reasons.join("; "))
}

fn length_component(text: &str, model: &str, reasons: &mut Vec<String>) -> f64 {
    let len = text.trim().len();
    if len < 50 {
        reasons.push("response too short".to_string());
        return 0.2;
    }
    let small_model = small_model_implied_size_gb(model).map(|gb| gb < 2.0).unwrap_or(false);
    if (50..=2000).contains(&len) {
        if small_model && len > 1200 {
            reasons.push("long response from a small model".to_string());
            return 0.4;
        }
        return 1.0;
    }
    if small_model {
        reasons.push("long response from a small model".to_string());
        0.4
    } else {
        0.8
    }
}

fn small_model_implied_size_gb(model: &str) -> Option<f64> {
    super::matcher::parse_model_size_gb(model)
}

fn pattern_component(text: &str, reasons: &mut Vec<String>) -> f64 {
    let lower = text.to_lowercase();
    let mut score = 0.7;

    const STRONG_UNCERTAINTY: &[(&str, f64)] = &[("i don't know", 0.4), ("i am not sure", 0.35), ("i'm not sure", 0.35)];
    for (phrase, penalty) in STRONG_UNCERTAINTY {
        if lower.contains(phrase) {
            score -= penalty;
            reasons.push(format!("uncertainty phrase `{phrase}`"));
        }
    }

    const HEDGES: &[(&str, f64)] = &[("maybe", 0.05), ("perhaps", 0.05), ("i think", 0.08), ("it seems", 0.1)];
    for (phrase, penalty) in HEDGES {
        if lower.contains(phrase) {
            score -= penalty;
            reasons.push(format!("hedge `{phrase}`"));
        }
    }

    let mut structure_bonus = 0.0_f64;
    if text.contains("```") {
        structure_bonus += 0.1;
        reasons.push("fenced code block".to_string());
    }
    if text.lines().any(|l| {
        let t = l.trim_start();
        t.starts_with(|c: char| c.is_ascii_digit()) && t.get(1..2) == Some(".")
    }) {
        structure_bonus += 0.1;
        reasons.push("numbered list".to_string());
    }
    if text.lines().any(|l| l.trim_start().starts_with('#')) {
        structure_bonus += 0.1;
        reasons.push("heading".to_string());
    }
    score += structure_bonus.min(0.1);

    const ERROR_MARKERS: &[&str] = &["error:", "traceback", "exception occurred", "internal server error"];
    if ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
        reasons.push("explicit error text".to_string());
        return 0.0;
    }

    score.clamp(0.0, 1.0)
}

fn model_component(model: &str, text: &str, hardware_class: HardwareClass, reasons: &mut Vec<String>) -> f64 {
    if hardware_class == HardwareClass::Cloud {
        reasons.push("cloud model".to_string());
        return 0.9;
    }
    let size = small_model_implied_size_gb(model);
    let is_small = size.map(|gb| gb < 2.0).unwrap_or(false);
    if is_small && text.trim().len() < 200 {
        reasons.push("small local model at short response".to_string());
        return 0.5;
    }
    match size {
        Some(gb) if gb >= 30.0 => {
            reasons.push("large model".to_string());
            0.9
        }
        _ => 0.7,
    }
}
