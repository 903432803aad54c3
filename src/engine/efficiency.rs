//! Efficiency manager.
//!
//! Holds the requested mode and derives an effective mode from live system
//! state when the requested mode is `auto`. Also applies a mode's
//! annotation-overriding rules and its hard candidate-set limits.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use super::types::{Annotations, ComplexityTier, HardwareClass, ModePreset, ThermalState};
use crate::engine::types::Backend;

/// System inputs the `auto` mode decision tree reads. Passed in explicitly
/// rather than read from the clock/battery directly so the decision stays
/// pure and deterministic.
#[derive(Debug, Clone, Copy)]
pub struct SystemState {
    /// `None` means no battery present (desktop / server).
    pub battery_percent: Option<f64>,
    pub on_external_power: bool,
    /// Local hour-of-day, 0..24, used for the quiet-hours window.
    pub local_hour: u32,
}

/// Quiet-hours window, in local hour-of-day.
///
/// The boundary is `[start, end)` — inclusive of `start`, exclusive of
/// `end` — and wraps past midnight when `start > end` (e.g. `22..7` covers
/// 22:00 through 06:59).
#[derive(Debug, Clone, Copy)]
pub struct QuietHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl QuietHours {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour == self.end_hour {
            return false;
        }
        if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Thresholds that drive the `auto` mode decision tree.
#[derive(Debug, Clone, Copy)]
pub struct AutoModeThresholds {
    pub battery_critical_percent: f64,
    pub battery_low_percent: f64,
    pub quiet_hours: Option<QuietHours>,
    pub high_temp_c: f64,
    pub loud_fan_percent: u8,
    pub cool_temp_c: f64,
}

impl Default for AutoModeThresholds {
    fn default() -> Self {
        Self {
            battery_critical_percent: 10.0,
            battery_low_percent: 25.0,
            quiet_hours: None,
            high_temp_c: 75.0,
            loud_fan_percent: 70,
            cool_temp_c: 55.0,
        }
    }
}

/// Whether a mode allows falling back past an unavailable explicit target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplicitTargetPolicy {
    /// Respects the explicit target unless it fails thermal limits.
    AllExceptThermal,
    /// Respects the explicit target unless it fails thermal or power limits.
    ThermalAndPower,
    /// Respects the explicit target unless it fails thermal or fan limits.
    ThermalAndFan,
    /// Never honours an explicit target override — always falls back to scoring.
    Never,
}

/// Whether/when a mode overrides the caller's `latency_critical` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyOverride {
    Never,
    IfSimple,
    Always,
}

/// The concrete hard limits and preferences for one mode.
#[derive(Debug, Clone)]
pub struct ModeLimits {
    pub max_power_watts: f64,
    pub max_fan_percent: u8,
    pub max_temp_c: f64,
    pub preferred_hardware: Vec<HardwareClass>,
    pub latency_override: LatencyOverride,
    pub explicit_target_policy: ExplicitTargetPolicy,
}

/// Non-overridable safety ceiling applied regardless of mode.
pub const ABSOLUTE_MAX_TEMP_C: f64 = 85.0;

fn preset_limits(mode: ModePreset) -> ModeLimits {
    use HardwareClass::*;
    match mode {
        ModePreset::HighPerformance => ModeLimits {
            max_power_watts: f64::INFINITY,
            max_fan_percent: 100,
            max_temp_c: 90.0,
            preferred_hardware: vec![DiscreteGpu, IntegratedGpu, NeuralAccelerator],
            latency_override: LatencyOverride::Never,
            explicit_target_policy: ExplicitTargetPolicy::AllExceptThermal,
        },
        ModePreset::Balanced => ModeLimits {
            max_power_watts: 60.0,
            max_fan_percent: 80,
            max_temp_c: 85.0,
            preferred_hardware: vec![IntegratedGpu, DiscreteGpu, NeuralAccelerator],
            latency_override: LatencyOverride::IfSimple,
            explicit_target_policy: ExplicitTargetPolicy::AllExceptThermal,
        },
        ModePreset::Efficiency => ModeLimits {
            max_power_watts: 15.0,
            max_fan_percent: 60,
            max_temp_c: 75.0,
            preferred_hardware: vec![NeuralAccelerator, IntegratedGpu, DiscreteGpu],
            latency_override: LatencyOverride::Always,
            explicit_target_policy: ExplicitTargetPolicy::ThermalAndPower,
        },
        ModePreset::Quiet => ModeLimits {
            max_power_watts: 15.0,
            max_fan_percent: 40,
            max_temp_c: 70.0,
            preferred_hardware: vec![NeuralAccelerator, IntegratedGpu],
            latency_override: LatencyOverride::Always,
            explicit_target_policy: ExplicitTargetPolicy::ThermalAndFan,
        },
        ModePreset::UltraEfficiency => ModeLimits {
            max_power_watts: 5.0,
            max_fan_percent: 30,
            max_temp_c: 70.0,
            preferred_hardware: vec![NeuralAccelerator],
            latency_override: LatencyOverride::Always,
            explicit_target_policy: ExplicitTargetPolicy::Never,
        },
        ModePreset::Auto => unreachable!("auto must be resolved to a concrete mode before limits() is called"),
    }
}

/// Parse a control-plane mode name; unrecognised names are the
/// `unknown-mode` error.
pub fn parse_mode_name(name: &str) -> Result<ModePreset, String> {
    name.parse::<ModePreset>()
}

pub struct EfficiencyManager {
    requested: RwLock<ModePreset>,
    thresholds: AutoModeThresholds,
}

impl EfficiencyManager {
    pub fn new(default_mode: ModePreset, thresholds: AutoModeThresholds) -> Self {
        Self {
            requested: RwLock::new(default_mode),
            thresholds,
        }
    }

    pub fn mode(&self) -> ModePreset {
        *self.requested.read().expect("efficiency lock poisoned")
    }

    pub fn set_mode(&self, mode: ModePreset) {
        *self.requested.write().expect("efficiency lock poisoned") = mode;
    }

    pub fn limits_for(&self, mode: ModePreset) -> ModeLimits {
        preset_limits(mode)
    }

    /// Resolve the currently-requested mode to a concrete effective mode,
    /// given live system state and the thermal snapshot. Checks run in a
    /// fixed order — first match wins.
    pub fn effective_mode(
        &self,
        system: &SystemState,
        thermal: &HashMap<String, ThermalState>,
    ) -> ModePreset {
        let requested = self.mode();
        if requested != ModePreset::Auto {
            return requested;
        }

        if let Some(pct) = system.battery_percent {
            if pct < self.thresholds.battery_critical_percent {
                return ModePreset::UltraEfficiency;
            }
            if pct < self.thresholds.battery_low_percent || !system.on_external_power {
                return ModePreset::Efficiency;
            }
        } else if !system.on_external_power {
            return ModePreset::Efficiency;
        }

        if let Some(quiet) = self.thresholds.quiet_hours {
            if quiet.contains(system.local_hour) {
                return ModePreset::Quiet;
            }
        }

        if thermal.values().any(|t| t.temperature_c > self.thresholds.high_temp_c) {
            return ModePreset::Efficiency;
        }
        if thermal.values().any(|t| t.fan_percent > self.thresholds.loud_fan_percent) {
            return ModePreset::Quiet;
        }
        if system.on_external_power && thermal.values().all(|t| t.temperature_c < self.thresholds.cool_temp_c) {
            return ModePreset::HighPerformance;
        }
        ModePreset::Balanced
    }

    /// Apply a mode's annotation-transforming rules. Returns the
    /// (possibly-transformed) annotations plus a list of human-readable
    /// override descriptions, for the routing decision's hint trail.
    pub fn apply(
        &self,
        annotations: &Annotations,
        effective_mode: ModePreset,
        complexity: ComplexityTier,
    ) -> (Annotations, Vec<String>) {
        let limits = preset_limits(effective_mode);
        let mut out = annotations.clone();
        let mut overrides = Vec::new();

        let should_override = match limits.latency_override {
            LatencyOverride::Never => false,
            LatencyOverride::Always => true,
            LatencyOverride::IfSimple => complexity == ComplexityTier::Simple,
        };
        if should_override && out.latency_critical {
            out.latency_critical = false;
            overrides.push(match limits.latency_override {
                LatencyOverride::IfSimple => "simple query → critical-override".to_string(),
                _ => format!("{effective_mode} mode → critical-override"),
            });
        }

        (out, overrides)
    }

    /// Remove every backend violating `effective_mode`'s hard limits, using
    /// `thermal` as the live snapshot. Unconditionally drops unhealthy
    /// backends and anything at/above the absolute safety ceiling
    /// regardless of mode.
    pub fn constrain(
        &self,
        candidates: Vec<Backend>,
        effective_mode: ModePreset,
        thermal: &HashMap<String, ThermalState>,
        sample_period: Duration,
    ) -> Vec<Backend> {
        let limits = preset_limits(effective_mode);
        candidates
            .into_iter()
            .filter(|b| b.is_healthy())
            .filter(|b| b.nominal_power_watts <= limits.max_power_watts)
            .filter(|b| {
                let Some(t) = thermal.get(&b.id) else { return true };
                if t.is_stale(sample_period) {
                    return true;
                }
                t.temperature_c < ABSOLUTE_MAX_TEMP_C
                    && !t.throttling
                    && t.temperature_c < limits.max_temp_c
                    && t.fan_percent <= limits.max_fan_percent
            })
            .collect()
    }
}
