//! Workload classifier.
//!
//! A pure function of the request: derives a [`MediaType`] and
//! [`ComplexityTier`] from the prompt and caller flags when the caller
//! didn't state them explicitly. No I/O, no shared state — safe to call
//! inline on the request path.

use super::types::{ComplexityTier, MediaType};

/// Per-media-type scoring preferences, consulted by the scoring router and
/// the model-capability matcher's substitution logic.
#[derive(Debug, Clone)]
pub struct MediaProfile {
    pub latency_priority_weight: f64,
    pub power_priority_weight: f64,
    /// Concrete substitute-model candidates, in priority order, consulted
    /// by [`crate::engine::matcher`] when no backend supports the
    /// originally-requested model.
    pub preferred_substitute_models: Vec<String>,
    pub max_recommended_model_size_gb: Option<f64>,
}

impl MediaProfile {
    /// True when this media type's declared weights favour power savings
    /// over raw latency — feeds the scoring router's `power_weight` boost.
    pub fn favours_power_efficiency(&self) -> bool {
        self.power_priority_weight > self.latency_priority_weight
    }
}

/// Static profile for one media type.
pub fn media_profile(media_type: MediaType) -> MediaProfile {
    match media_type {
        MediaType::Realtime => MediaProfile {
            latency_priority_weight: 2.0,
            power_priority_weight: 0.5,
            preferred_substitute_models: vec!["whisper:tiny".into(), "whisper:base".into()],
            max_recommended_model_size_gb: Some(2.0),
        },
        MediaType::Audio => MediaProfile {
            latency_priority_weight: 1.5,
            power_priority_weight: 0.8,
            preferred_substitute_models: vec!["whisper:base".into(), "whisper:small".into()],
            max_recommended_model_size_gb: Some(3.0),
        },
        MediaType::Code => MediaProfile {
            latency_priority_weight: 1.0,
            power_priority_weight: 1.0,
            preferred_substitute_models: vec!["qwen2.5-coder:7b".into(), "codellama:7b".into()],
            max_recommended_model_size_gb: Some(14.0),
        },
        MediaType::Image => MediaProfile {
            latency_priority_weight: 0.8,
            power_priority_weight: 1.2,
            preferred_substitute_models: vec!["llava:7b".into(), "qwen2-vl:7b".into()],
            max_recommended_model_size_gb: Some(8.0),
        },
        MediaType::Text | MediaType::Auto => MediaProfile {
            latency_priority_weight: 1.0,
            power_priority_weight: 1.0,
            preferred_substitute_models: vec!["llama:7b".into(), "qwen:7b".into()],
            max_recommended_model_size_gb: Some(8.0),
        },
    }
}

/// Classify a request when the caller left `media_type` as `auto`/unset.
///
/// Returns the detected (or caller-stated) media type and a complexity
/// tier derived from prompt length and a handful of keyword cues.
pub fn classify(prompt: &str, caller_media_type: MediaType, latency_critical: bool) -> (MediaType, ComplexityTier) {
    let media_type = if caller_media_type == MediaType::Auto {
        detect_media_type(prompt, latency_critical)
    } else {
        caller_media_type
    };
    let complexity = detect_complexity(prompt);
    (media_type, complexity)
}

fn detect_media_type(prompt: &str, latency_critical: bool) -> MediaType {
    let lower = prompt.to_lowercase();

    const REALTIME: &[&str] = &["realtime", "live voice", "transcribe now"];
    if REALTIME.iter().any(|p| lower.contains(p)) || latency_critical {
        return MediaType::Realtime;
    }

    const AUDIO: &[&str] = &["transcribe", "speech to text", "tts"];
    if AUDIO.iter().any(|p| lower.contains(p)) {
        return MediaType::Audio;
    }

    const CODE_LANGS: &[&str] = &[
        "python", "rust", "javascript", "typescript", "golang", "java", "c++",
    ];
    if lower.contains("write") && lower.contains("function")
        || lower.contains("implement")
        || lower.contains("```")
        || CODE_LANGS.iter().any(|l| lower.contains(l))
    {
        return MediaType::Code;
    }

    const IMAGE: &[&str] = &["image", "picture", "vision"];
    if IMAGE.iter().any(|p| lower.contains(p)) {
        return MediaType::Image;
    }

    MediaType::Text
}

fn detect_complexity(prompt: &str) -> ComplexityTier {
    let lower = prompt.to_lowercase();

    const SIMPLE_CUES: &[&str] = &["briefly", "short", "one line", "one-line"];
    if SIMPLE_CUES.iter().any(|c| lower.contains(c)) {
        return ComplexityTier::Simple;
    }

    const COMPLEX_CUES: &[&str] = &["detailed", "comprehensive", "step by step", "step-by-step"];
    if COMPLEX_CUES.iter().any(|c| lower.contains(c)) {
        return ComplexityTier::Complex;
    }

    match prompt.trim().len() {
        0..=40 => ComplexityTier::Simple,
        41..=400 => ComplexityTier::Moderate,
        _ => ComplexityTier::Complex,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_arithmetic_prompt_is_simple_text() {
        let (media, complexity) = classify("What is 2+2?", MediaType::Auto, false);
        assert_eq!(media, MediaType::Text);
        assert_eq!(complexity, ComplexityTier::Simple);
    }

    #[test]
    fn latency_critical_flag_forces_realtime() {
        let (media, _) = classify("translate this sentence", MediaType::Auto, true);
        assert_eq!(media, MediaType::Realtime);
    }

    #[test]
    fn transcribe_keyword_detects_audio() {
        let (media, _) = classify("please transcribe this recording", MediaType::Auto, false);
        assert_eq!(media, MediaType::Audio);
    }

    #[test]
    fn code_fence_detects_code() {
        let (media, _) = classify("fix this:\n```rust\nfn main() {}\n```", MediaType::Auto, false);
        assert_eq!(media, MediaType::Code);
    }

    #[test]
    fn image_keyword_detects_image() {
        let (media, _) = classify("describe this picture", MediaType::Auto, false);
        assert_eq!(media, MediaType::Image);
    }

    #[test]
    fn caller_stated_media_type_is_not_overridden() {
        let (media, _) = classify("describe this picture", MediaType::Code, false);
        assert_eq!(media, MediaType::Code);
    }

    #[test]
    fn comprehensive_keyword_forces_complex() {
        let (_, complexity) = classify("give me a comprehensive overview of rust lifetimes", MediaType::Auto, false);
        assert_eq!(complexity, ComplexityTier::Complex);
    }

    #[test]
    fn briefly_keyword_forces_simple_even_in_long_prompt() {
        let long_prefix = "a".repeat(500);
        let prompt = format!("{long_prefix} — answer briefly");
        let (_, complexity) = classify(&prompt, MediaType::Auto, false);
        assert_eq!(complexity, ComplexityTier::Simple);
    }
}
