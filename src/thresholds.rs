//! Threshold configuration and the pure threshold evaluator.
//!
//! Ranges come from user settings (freshwater or saltwater profile) and are
//! treated as a slowly changing external snapshot. When no snapshot is
//! available the documented profile defaults apply.
//!
//! Evaluation order is fixed: critical band first, then the warning band.
//! A value inside `[min, max]` is always `normal`. A warning that lies within
//! the parameter's near margin of the breached bound is flagged as
//! `approaching`, which the generator reports at a lower severity than a full
//! breach.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{Direction, EvaluationResult, Parameter, Status};
use crate::store::KeyValueStore;

/// Storage key of the persisted threshold snapshot.
pub const THRESHOLD_CONFIG_KEY: &str = "threshold_config";

const DEFAULT_MARGIN_LOW: f64 = 0.3;
const DEFAULT_MARGIN_HIGH: f64 = 0.5;

// ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CriticalBand {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl CriticalBand {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }
}

/// Acceptable range for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterThreshold {
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub critical: CriticalBand,
    #[serde(default = "default_margin_low")]
    pub near_margin_low: f64,
    #[serde(default = "default_margin_high")]
    pub near_margin_high: f64,
}

fn default_margin_low() -> f64 {
    DEFAULT_MARGIN_LOW
}

fn default_margin_high() -> f64 {
    DEFAULT_MARGIN_HIGH
}

impl ParameterThreshold {
    pub fn new(min: f64, max: f64, critical: CriticalBand) -> Self {
        Self {
            min,
            max,
            critical,
            near_margin_low: DEFAULT_MARGIN_LOW,
            near_margin_high: DEFAULT_MARGIN_HIGH,
        }
    }

    pub fn with_margins(mut self, low: f64, high: f64) -> Self {
        self.near_margin_low = low;
        self.near_margin_high = high;
        self
    }
}

/// Named default range sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaterProfile {
    #[default]
    Freshwater,
    Saltwater,
}

impl FromStr for WaterProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "freshwater" | "fresh" => Ok(WaterProfile::Freshwater),
            "saltwater" | "salt" | "marine" => Ok(WaterProfile::Saltwater),
            other => Err(format!("unknown water profile '{other}'")),
        }
    }
}

/// Per-parameter thresholds for one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub profile: WaterProfile,
    pub parameters: BTreeMap<Parameter, ParameterThreshold>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self::for_profile(WaterProfile::Freshwater)
    }
}

impl ThresholdConfig {
    /// Documented default ranges. Critical bands are wider absolute bounds.
    pub fn for_profile(profile: WaterProfile) -> Self {
        // ---
        let band = |min, max| CriticalBand::new(min, max);
        let entries = match profile {
            WaterProfile::Freshwater => [
                (Parameter::Ph, ParameterThreshold::new(6.5, 8.5, band(Some(6.0), Some(9.0)))),
                (
                    Parameter::Temperature,
                    ParameterThreshold::new(26.0, 30.0, band(Some(24.0), Some(32.0))),
                ),
                (Parameter::Turbidity, ParameterThreshold::new(0.0, 50.0, band(None, Some(100.0)))),
                (Parameter::Salinity, ParameterThreshold::new(0.0, 5.0, band(None, Some(10.0)))),
            ],
            WaterProfile::Saltwater => [
                (Parameter::Ph, ParameterThreshold::new(7.8, 8.5, band(Some(7.5), Some(9.0)))),
                (
                    Parameter::Temperature,
                    ParameterThreshold::new(24.0, 28.0, band(Some(22.0), Some(31.0))),
                ),
                (Parameter::Turbidity, ParameterThreshold::new(0.0, 25.0, band(None, Some(50.0)))),
                (
                    Parameter::Salinity,
                    ParameterThreshold::new(30.0, 35.0, band(Some(25.0), Some(40.0))),
                ),
            ],
        };

        Self {
            profile,
            parameters: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, parameter: Parameter) -> Option<&ParameterThreshold> {
        self.parameters.get(&parameter)
    }

    /// Load the persisted snapshot, falling back to the profile defaults when
    /// it is missing or unreadable.
    pub async fn load_or_default(store: &dyn KeyValueStore, profile: WaterProfile) -> Self {
        // ---
        match store.get_json::<ThresholdConfig>(THRESHOLD_CONFIG_KEY).await {
            Ok(Some(config)) => {
                tracing::info!(profile = ?config.profile, "Loaded persisted threshold config");
                config
            }
            Ok(None) => {
                tracing::debug!(?profile, "No persisted threshold config, using defaults");
                Self::for_profile(profile)
            }
            Err(e) => {
                tracing::warn!(error = %e, ?profile, "Threshold config unreadable, using defaults");
                Self::for_profile(profile)
            }
        }
    }
}

// ---

/// Classify one value against its parameter's thresholds.
///
/// Returns `None` when the value is not a finite number or the parameter has
/// no configured range; callers skip those silently.
pub fn evaluate(
    parameter: Parameter,
    value: f64,
    config: &ThresholdConfig,
) -> Option<EvaluationResult> {
    // ---
    if !value.is_finite() {
        return None;
    }
    let t = config.get(parameter)?;

    let result = |status, direction, approaching, threshold| EvaluationResult {
        parameter,
        numeric_value: value,
        status,
        direction,
        approaching,
        threshold,
    };

    if let Some(cmin) = t.critical.min {
        if value < cmin {
            return Some(result(Status::Critical, Direction::Low, false, Some(cmin)));
        }
    }
    if let Some(cmax) = t.critical.max {
        if value > cmax {
            return Some(result(Status::Critical, Direction::High, false, Some(cmax)));
        }
    }

    if value < t.min {
        let approaching = t.min - value <= t.near_margin_low;
        return Some(result(Status::Warning, Direction::Low, approaching, Some(t.min)));
    }
    if value > t.max {
        let approaching = value - t.max <= t.near_margin_high;
        return Some(result(Status::Warning, Direction::High, approaching, Some(t.max)));
    }

    Some(result(Status::Normal, Direction::None, false, None))
}
