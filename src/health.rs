//! Delivery outcome aggregation and operator diagnostics.
//!
//! The monitor keeps an append-only ring of [`DeliveryRecord`]s. Only the last
//! hour counts toward the success rate; older records are pruned lazily when
//! new ones arrive. Crossing the session failure threshold raises a one-time
//! "frequent failures" signal. Nothing here disables a channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::models::{Channel, DeliveryRecord, DeliveryStatus};
use crate::store::KeyValueStore;

/// Storage key of the persisted health summary.
pub const DELIVERY_HEALTH_KEY: &str = "delivery_health";

pub const DEFAULT_FAILURE_ALERT_THRESHOLD: u64 = 10;

const MAX_RECORDS: usize = 1_000;

fn health_window() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    /// No deliveries inside the window.
    Unknown,
}

/// Health summary over the last hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    // ---
    pub state: HealthState,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub remote_failed: usize,
    pub local_failed: usize,
    pub success_rate: Option<f64>,
    pub session_failures: u64,
    pub frequent_failures: bool,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct DeliveryHealthMonitor {
    // ---
    records: Mutex<VecDeque<DeliveryRecord>>,
    session_failures: AtomicU64,
    failure_alert_threshold: u64,
    frequent_failures_signalled: AtomicBool,
}

impl Default for DeliveryHealthMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_ALERT_THRESHOLD)
    }
}

impl DeliveryHealthMonitor {
    pub fn new(failure_alert_threshold: u64) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            session_failures: AtomicU64::new(0),
            failure_alert_threshold,
            frequent_failures_signalled: AtomicBool::new(false),
        }
    }

    /// Append a delivery outcome.
    pub fn record(&self, record: DeliveryRecord) {
        // ---
        if record.status == DeliveryStatus::Failed {
            let failures = self.session_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if failures > self.failure_alert_threshold
                && !self.frequent_failures_signalled.swap(true, Ordering::Relaxed)
            {
                error!(
                    failures,
                    threshold = self.failure_alert_threshold,
                    channel = ?record.channel,
                    last_error = record.error.as_deref().unwrap_or(""),
                    "Frequent notification delivery failures this session"
                );
            }
        }

        let cutoff = record.timestamp - health_window();
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while records.front().is_some_and(|r| r.timestamp < cutoff) {
            records.pop_front();
        }
        records.push_back(record);
        if records.len() > MAX_RECORDS {
            records.pop_front();
        }
    }

    pub fn session_failures(&self) -> u64 {
        self.session_failures.load(Ordering::Relaxed)
    }

    /// Whether the frequent-failures signal has fired this session.
    pub fn frequent_failures(&self) -> bool {
        self.frequent_failures_signalled.load(Ordering::Relaxed)
    }

    pub fn health_status(&self) -> HealthStatus {
        self.health_status_at(Utc::now())
    }

    /// Health over the hour preceding `now`.
    pub fn health_status_at(&self, now: DateTime<Utc>) -> HealthStatus {
        // ---
        let cutoff = now - health_window();
        let (mut successful, mut remote_failed, mut local_failed) = (0, 0, 0);

        if let Ok(records) = self.records.lock() {
            for r in records.iter().filter(|r| r.timestamp >= cutoff && r.timestamp <= now) {
                match (r.status, r.channel) {
                    (DeliveryStatus::Delivered, _) => successful += 1,
                    (DeliveryStatus::Failed, Channel::Remote) => remote_failed += 1,
                    (DeliveryStatus::Failed, Channel::Local) => local_failed += 1,
                }
            }
        }

        let failed = remote_failed + local_failed;
        let total = successful + failed;
        let (state, success_rate) = if total == 0 {
            (HealthState::Unknown, None)
        } else {
            let state = if failed > successful {
                HealthState::Unhealthy
            } else {
                HealthState::Healthy
            };
            (state, Some(successful as f64 / total as f64))
        };

        HealthStatus {
            state,
            total,
            successful,
            failed,
            remote_failed,
            local_failed,
            success_rate,
            session_failures: self.session_failures(),
            frequent_failures: self.frequent_failures(),
            generated_at: now,
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        suggestions_for(&self.health_status())
    }

    /// Write the current summary to the store. Failures are logged only.
    pub async fn persist_summary(&self, store: &dyn KeyValueStore) {
        // ---
        let status = self.health_status();
        if let Err(e) = store.set_json(DELIVERY_HEALTH_KEY, &status).await {
            warn!(error = %e, "Failed to persist delivery health summary");
        }
    }
}

/// Advisory rules derived from a health summary.
pub fn suggestions_for(status: &HealthStatus) -> Vec<String> {
    // ---
    let mut out = Vec::new();

    if status.total == 0 {
        out.push(
            "No deliveries in the last hour; confirm readings are arriving and alerts are \
             being generated."
                .to_string(),
        );
        return out;
    }

    if status.successful == 0 {
        out.push(
            "All recent deliveries failed; check device registration and notification \
             channel initialization."
                .to_string(),
        );
    } else if status.state == HealthState::Unhealthy {
        out.push("Most recent deliveries failed; review channel errors in the logs.".to_string());
    }

    if status.remote_failed > 0 && status.local_failed == 0 && status.successful > 0 {
        out.push(
            "Remote push is failing and local fallback is carrying delivery; verify the push \
             provider and registration token."
                .to_string(),
        );
    }

    if status.local_failed > 0 {
        out.push(
            "Local notifications are failing; check on-device notification permissions."
                .to_string(),
        );
    }

    if status.frequent_failures {
        out.push(format!(
            "{} delivery failures this session; consider reinitializing the notification service.",
            status.session_failures
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn create_test_record(
        channel: Channel,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> DeliveryRecord {
        DeliveryRecord {
            notification_id: uuid::Uuid::new_v4().to_string(),
            channel,
            status,
            timestamp: at,
            severity: None,
            error: (status == DeliveryStatus::Failed).then(|| "boom".to_string()),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_unknown_without_deliveries() {
        // ---
        let monitor = DeliveryHealthMonitor::default();
        let status = monitor.health_status_at(now());

        assert_eq!(status.state, HealthState::Unknown);
        assert_eq!(status.success_rate, None);
        assert_eq!(suggestions_for(&status).len(), 1);
    }

    #[test]
    fn test_fallback_success_is_healthy() {
        // ---
        let monitor = DeliveryHealthMonitor::default();
        monitor.record(create_test_record(Channel::Remote, DeliveryStatus::Failed, now()));
        monitor.record(create_test_record(Channel::Local, DeliveryStatus::Delivered, now()));

        let status = monitor.health_status_at(now());
        assert_eq!(status.state, HealthState::Healthy);
        assert_eq!(status.failed, 1);
        assert_eq!(status.successful, 1);
        assert_eq!(status.success_rate, Some(0.5));
        assert!(suggestions_for(&status)
            .iter()
            .any(|s| s.contains("local fallback is carrying delivery")));
    }

    #[test]
    fn test_failures_exceeding_successes_is_unhealthy() {
        // ---
        let monitor = DeliveryHealthMonitor::default();
        monitor.record(create_test_record(Channel::Remote, DeliveryStatus::Failed, now()));
        monitor.record(create_test_record(Channel::Local, DeliveryStatus::Failed, now()));

        let status = monitor.health_status_at(now());
        assert_eq!(status.state, HealthState::Unhealthy);
        assert_eq!(status.success_rate, Some(0.0));
        assert!(suggestions_for(&status)[0].starts_with("All recent deliveries failed"));
    }

    #[test]
    fn test_records_older_than_an_hour_are_excluded() {
        // ---
        let monitor = DeliveryHealthMonitor::default();
        let old = now() - Duration::minutes(61);
        monitor.record(create_test_record(Channel::Remote, DeliveryStatus::Failed, old));
        monitor.record(create_test_record(Channel::Remote, DeliveryStatus::Delivered, now()));

        let status = monitor.health_status_at(now());
        assert_eq!(status.total, 1);
        assert_eq!(status.success_rate, Some(1.0));
        // Session counter still remembers the old failure
        assert_eq!(status.session_failures, 1);
    }

    #[test]
    fn test_frequent_failures_signal_trips_once() {
        // ---
        let monitor = DeliveryHealthMonitor::new(3);
        for _ in 0..3 {
            monitor.record(create_test_record(Channel::Local, DeliveryStatus::Failed, now()));
        }
        assert!(!monitor.frequent_failures());

        monitor.record(create_test_record(Channel::Local, DeliveryStatus::Failed, now()));
        monitor.record(create_test_record(Channel::Local, DeliveryStatus::Failed, now()));
        assert!(monitor.frequent_failures());
        assert_eq!(monitor.session_failures(), 5);
        assert!(suggestions_for(&monitor.health_status_at(now()))
            .iter()
            .any(|s| s.starts_with("5 delivery failures")));
    }
}
