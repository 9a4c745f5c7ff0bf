//! The evaluate → dedup → dispatch → record pipeline.
//!
//! [`AlertEngine::process`] is the single entry point for a batch of readings.
//! Every fired alert is dispatched in turn; an alert whose delivery exhausts
//! every channel is rolled back out of the dedup window so the next reading
//! can alert again.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::dispatch::NotificationDispatcher;
use crate::error::DispatchError;
use crate::generator::AlertGenerator;
use crate::models::{Alert, NotificationRequest, Reading};
use crate::thresholds::ThresholdConfig;

// ---

/// Result of one pipeline pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ProcessReport {
    pub fired: Vec<Alert>,
    pub resolved: Vec<Alert>,
    /// Ids of fired alerts that reached the user.
    pub delivered: Vec<String>,
    /// Ids of fired alerts whose fallback was used.
    pub via_fallback: Vec<String>,
    /// Ids of fired alerts that failed on every channel (and were rolled back).
    pub failed: Vec<String>,
    /// Set when shutdown interrupted dispatching.
    pub cancelled: bool,
}

pub struct AlertEngine {
    // ---
    generator: Arc<AlertGenerator>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl AlertEngine {
    pub fn new(generator: Arc<AlertGenerator>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self { generator, dispatcher }
    }

    pub fn generator(&self) -> &Arc<AlertGenerator> {
        &self.generator
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    /// Run one batch of readings through the engine.
    pub async fn process(&self, readings: &[Reading], config: &ThresholdConfig) -> ProcessReport {
        // ---
        let outcome = self.generator.generate(readings, config);
        let mut report = ProcessReport {
            resolved: outcome.resolved,
            ..Default::default()
        };

        for alert in &outcome.fired {
            if report.cancelled {
                // Leave undelivered alerts re-fireable after a restart
                self.generator.rollback(alert);
                continue;
            }

            let request = NotificationRequest::from_alert(alert);
            match self.dispatcher.dispatch(&request).await {
                Ok(delivery) => {
                    if delivery.fallback_used {
                        report.via_fallback.push(alert.id.clone());
                    }
                    report.delivered.push(alert.id.clone());
                }
                Err(DispatchError::Exhausted { .. }) => {
                    self.generator.rollback(alert);
                    report.failed.push(alert.id.clone());
                }
                Err(DispatchError::Cancelled) => {
                    self.generator.rollback(alert);
                    report.cancelled = true;
                }
            }
        }
        report.fired = outcome.fired;

        if report.fired.is_empty() {
            debug!(readings = readings.len(), "No new alerts");
        } else {
            info!(
                fired = report.fired.len(),
                delivered = report.delivered.len(),
                via_fallback = report.via_fallback.len(),
                failed = report.failed.len(),
                "Alert batch processed"
            );
        }
        report
    }
}
