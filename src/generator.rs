//! Turns sensor readings into fired and resolved alerts.
//!
//! One generator pass holds the active-alert lock for the whole batch, and
//! every admission goes through [`DeduplicationWindow::try_admit`], so no two
//! alerts with the same signature and severity can be admitted from the same
//! batch or from overlapping batches.
//!
//! Admitted alerts replace the active entry for their signature. Suppressed
//! repeats bump the existing entry's `occurrence_count` instead. Both branches
//! go through [`AlertGenerator::observe`] so a repeat is counted exactly once.
//! An active entry lives only as long as its pair is tracked by the window;
//! entries whose window has closed are pruned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dedup::DeduplicationWindow;
use crate::messages::{self, pick_message};
use crate::models::{Alert, AlertType, EvaluationResult, Parameter, Reading, Severity, Status};
use crate::signature::signature;
use crate::thresholds::{self, ThresholdConfig};

// ---

/// Alerts produced by one generator pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct GenerationOutcome {
    pub fired: Vec<Alert>,
    pub resolved: Vec<Alert>,
}

/// Candidate alert before admission.
struct Candidate {
    parameter: Parameter,
    alert_type: AlertType,
    severity: Severity,
    title: String,
    message: String,
    value: f64,
    threshold: Option<f64>,
    timestamp: DateTime<Utc>,
}

/// Source of message-pool seeds.
enum Seeds {
    Random(SmallRng),
    Fixed(u64),
}

impl Seeds {
    fn next(&mut self) -> u64 {
        match self {
            Seeds::Random(rng) => rng.random(),
            Seeds::Fixed(seed) => *seed,
        }
    }
}

pub struct AlertGenerator {
    // ---
    dedup: Arc<DeduplicationWindow>,
    active: Mutex<HashMap<String, Alert>>,
    seeds: Mutex<Seeds>,
}

/// Map an evaluation onto alert type and severity.
pub fn classify(result: &EvaluationResult) -> Option<(AlertType, Severity)> {
    // ---
    match (result.status, result.approaching) {
        (Status::Normal, _) => None,
        (Status::Critical, _) => Some((AlertType::Error, Severity::Critical)),
        (Status::Warning, false) => Some((AlertType::Warning, Severity::High)),
        (Status::Warning, true) => Some((AlertType::Warning, Severity::Medium)),
    }
}

impl AlertGenerator {
    pub fn new(dedup: Arc<DeduplicationWindow>) -> Self {
        Self {
            dedup,
            active: Mutex::new(HashMap::new()),
            seeds: Mutex::new(Seeds::Random(SmallRng::from_os_rng())),
        }
    }

    /// Use a fixed message seed so phrasing is reproducible.
    pub fn with_message_seed(self, seed: u64) -> Self {
        if let Ok(mut seeds) = self.seeds.lock() {
            *seeds = Seeds::Fixed(seed);
        }
        self
    }

    pub fn dedup(&self) -> &Arc<DeduplicationWindow> {
        &self.dedup
    }

    fn next_seed(&self) -> u64 {
        self.seeds.lock().map(|mut s| s.next()).unwrap_or(0)
    }

    /// Evaluate a batch of readings in order.
    pub fn generate(&self, readings: &[Reading], config: &ThresholdConfig) -> GenerationOutcome {
        // ---
        let mut outcome = GenerationOutcome::default();
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Active alert state poisoned, recovering");
                poisoned.into_inner()
            }
        };
        self.retain_tracked(&mut active);

        for reading in readings {
            for parameter in Parameter::MEASURED {
                let Some(value) = reading.get(parameter) else {
                    continue;
                };
                let Some(result) = thresholds::evaluate(parameter, value, config) else {
                    continue;
                };
                match classify(&result) {
                    None => self.resolve(&mut active, parameter, &mut outcome),
                    Some((alert_type, severity)) => {
                        let candidate =
                            self.candidate(&result, alert_type, severity, reading.timestamp);
                        self.observe(&mut active, candidate, &mut outcome);
                    }
                }
            }

            if let Some(level) = reading.get(Parameter::Raining) {
                match self.rain_candidate(level, reading.timestamp) {
                    Some(candidate) => self.observe(&mut active, candidate, &mut outcome),
                    None => self.resolve(&mut active, Parameter::Raining, &mut outcome),
                }
            }
        }

        if !outcome.fired.is_empty() || !outcome.resolved.is_empty() {
            info!(
                fired = outcome.fired.len(),
                resolved = outcome.resolved.len(),
                active = active.len(),
                "Alert generation pass complete"
            );
        }
        outcome
    }

    fn candidate(
        &self,
        result: &EvaluationResult,
        alert_type: AlertType,
        severity: Severity,
        timestamp: DateTime<Utc>,
    ) -> Candidate {
        // ---
        let template = pick_message(messages::pool_for(result), self.next_seed());
        Candidate {
            parameter: result.parameter,
            alert_type,
            severity,
            title: messages::title_for(result),
            message: messages::render(
                template,
                result.parameter,
                result.numeric_value,
                result.threshold,
            ),
            value: result.numeric_value,
            threshold: result.threshold,
            timestamp,
        }
    }

    /// Rain has no numeric range: 0 = none, 1 = light, 2 (or more) = heavy.
    fn rain_candidate(&self, level: f64, timestamp: DateTime<Utc>) -> Option<Candidate> {
        // ---
        let level = level.round();
        let (alert_type, severity, title, pool) = if level >= 2.0 {
            (
                AlertType::Warning,
                Severity::High,
                messages::HEAVY_RAIN_TITLE,
                messages::HEAVY_RAIN_POOL,
            )
        } else if level >= 1.0 {
            (
                AlertType::Info,
                Severity::Low,
                messages::LIGHT_RAIN_TITLE,
                messages::LIGHT_RAIN_POOL,
            )
        } else {
            return None;
        };

        Some(Candidate {
            parameter: Parameter::Raining,
            alert_type,
            severity,
            title: title.to_string(),
            message: pick_message(pool, self.next_seed()).to_string(),
            value: level,
            threshold: None,
            timestamp,
        })
    }

    /// Admit a candidate or count it against the active alert it repeats.
    fn observe(
        &self,
        active: &mut HashMap<String, Alert>,
        candidate: Candidate,
        outcome: &mut GenerationOutcome,
    ) {
        // ---
        let sig = signature(
            candidate.parameter,
            candidate.alert_type,
            &candidate.title,
            candidate.value,
        );

        if self.dedup.try_admit(&sig, candidate.severity) {
            let alert = Alert {
                id: uuid::Uuid::new_v4().to_string(),
                parameter: candidate.parameter,
                alert_type: candidate.alert_type,
                severity: candidate.severity,
                title: candidate.title,
                message: candidate.message,
                value: candidate.value,
                threshold: candidate.threshold,
                signature: sig.clone(),
                timestamp: candidate.timestamp,
                occurrence_count: 1,
            };
            debug!(signature = %sig, severity = %alert.severity, "Alert admitted");
            active.insert(sig, alert.clone());
            outcome.fired.push(alert);
        } else if let Some(existing) = active.get_mut(&sig) {
            existing.occurrence_count += 1;
            existing.timestamp = candidate.timestamp;
            debug!(
                signature = %sig,
                occurrences = existing.occurrence_count,
                "Repeat alert counted"
            );
        }
    }

    /// The parameter is back to normal: retire its active alerts and let
    /// them fire again on the next breach.
    fn resolve(
        &self,
        active: &mut HashMap<String, Alert>,
        parameter: Parameter,
        outcome: &mut GenerationOutcome,
    ) {
        // ---
        let resolved: Vec<String> = active
            .iter()
            .filter(|(_, alert)| alert.parameter == parameter)
            .map(|(sig, _)| sig.clone())
            .collect();

        for sig in resolved {
            if let Some(alert) = active.remove(&sig) {
                self.dedup.remove(&sig, alert.severity);
                debug!(signature = %sig, "Alert resolved");
                outcome.resolved.push(alert);
            }
        }
    }

    /// Drop active entries whose dedup window has closed.
    fn retain_tracked(&self, active: &mut HashMap<String, Alert>) {
        // ---
        let before = active.len();
        active.retain(|sig, alert| self.dedup.is_tracked(sig, alert.severity));
        let pruned = before - active.len();
        if pruned > 0 {
            debug!(pruned, remaining = active.len(), "Expired active alerts pruned");
        }
    }

    /// Prune expired active alerts. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        // ---
        let Ok(mut active) = self.active.lock() else {
            return 0;
        };
        let before = active.len();
        self.retain_tracked(&mut active);
        before - active.len()
    }

    /// Undo the admission of an alert that never reached the user.
    pub fn rollback(&self, alert: &Alert) {
        // ---
        self.dedup.remove(&alert.signature, alert.severity);
        if let Ok(mut active) = self.active.lock() {
            if active.get(&alert.signature).is_some_and(|a| a.id == alert.id) {
                active.remove(&alert.signature);
            }
        }
        warn!(
            signature = %alert.signature,
            alert_id = %alert.id,
            "Alert admission rolled back"
        );
    }

    /// Snapshot of currently active alerts, excluding expired ones.
    pub fn active_alerts(&self) -> Vec<Alert> {
        // ---
        let Ok(mut active) = self.active.lock() else {
            return Vec::new();
        };
        self.retain_tracked(&mut active);
        active.values().cloned().collect()
    }
}
