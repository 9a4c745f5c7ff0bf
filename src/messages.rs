//! Alert titles and message pools.
//!
//! Titles are deterministic per parameter, status and direction because they
//! are part of the dedup signature. Bodies are drawn from a pool so repeated
//! alerts do not read identically; the pick is a pure function of the seed.

use crate::models::{Direction, EvaluationResult, Parameter, Status};

/// Pick one entry of `pool` for `seed`. Returns `""` for an empty pool.
pub fn pick_message<'a>(pool: &[&'a str], seed: u64) -> &'a str {
    // ---
    if pool.is_empty() {
        return "";
    }
    pool[(seed % pool.len() as u64) as usize]
}

/// Fill `{label}`, `{value}` and `{threshold}` placeholders.
pub fn render(template: &str, parameter: Parameter, value: f64, threshold: Option<f64>) -> String {
    // ---
    let unit = parameter.unit();
    let threshold = threshold
        .map(|t| format!("{t:.2}{unit}"))
        .unwrap_or_else(|| "n/a".to_string());

    template
        .replace("{label}", parameter.label())
        .replace("{value}", &format!("{value:.2}{unit}"))
        .replace("{threshold}", &threshold)
}

/// Deterministic title for an evaluation.
pub fn title_for(result: &EvaluationResult) -> String {
    // ---
    let label = result.parameter.label();
    let side = match result.direction {
        Direction::Low => "low",
        Direction::High => "high",
        Direction::None => "normal",
    };
    match (result.status, result.approaching) {
        (Status::Critical, _) => format!("{label} critically {side}"),
        (Status::Warning, true) => format!("{label} nearing critical {side}"),
        (Status::Warning, false) => format!("{label} too {side}"),
        (Status::Normal, _) => format!("{label} normal"),
    }
}

/// Message pool for an evaluation.
pub fn pool_for(result: &EvaluationResult) -> &'static [&'static str] {
    // ---
    match (result.status, result.direction) {
        (Status::Critical, Direction::High) => &[
            "{label} has reached {value}, above the critical limit of {threshold}. Act now.",
            "Critical: {label} is at {value} (limit {threshold}). Check your water immediately.",
            "{label} spiked to {value}. This is beyond the safe limit of {threshold}.",
        ],
        (Status::Critical, _) => &[
            "{label} has dropped to {value}, below the critical limit of {threshold}. Act now.",
            "Critical: {label} is at {value} (limit {threshold}). Check your water immediately.",
            "{label} fell to {value}. This is beyond the safe limit of {threshold}.",
        ],
        (Status::Warning, Direction::High) => &[
            "{label} is {value}, above the recommended maximum of {threshold}.",
            "Heads up: {label} is running high at {value}.",
            "{label} climbed to {value}; keep an eye on it (max {threshold}).",
        ],
        (Status::Warning, _) => &[
            "{label} is {value}, below the recommended minimum of {threshold}.",
            "Heads up: {label} is running low at {value}.",
            "{label} dropped to {value}; keep an eye on it (min {threshold}).",
        ],
        (Status::Normal, _) => &["{label} is back to normal at {value}."],
    }
}

pub const LIGHT_RAIN_TITLE: &str = "Light rain detected";
pub const HEAVY_RAIN_TITLE: &str = "Heavy rain detected";

pub const LIGHT_RAIN_POOL: &[&str] = &[
    "Light rain is falling. Runoff may slowly change your water readings.",
    "It's drizzling. Readings may shift a little over the next hours.",
];

pub const HEAVY_RAIN_POOL: &[&str] = &[
    "Heavy rain detected. Expect turbidity and salinity to change quickly.",
    "Downpour in progress. Check covers and overflow, and watch your readings.",
];

pub const FORECAST_REMINDER_TITLE: &str = "Today's water forecast";
pub const FORECAST_REMINDER_BODY: &str =
    "Check today's weather outlook and how it may affect your water.";
pub const REPORT_REMINDER_TITLE: &str = "Daily water report";
pub const REPORT_REMINDER_BODY: &str = "Your daily water-quality summary is ready to review.";
pub const MONITORING_REMINDER_TITLE: &str = "Monitoring check-in";
pub const MONITORING_REMINDER_BODY: &str = "Take a moment to review the latest sensor readings.";
