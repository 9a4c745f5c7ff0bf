//! End-to-end engine scenarios with scripted channels.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_test::assert_ok;

use waterwatch_engine::dedup::DeduplicationWindow;
use waterwatch_engine::dispatch::{
    DispatchPolicy, InboxChannel, LocalChannel, NotificationDispatcher, RegistrationToken,
    RemoteChannel,
};
use waterwatch_engine::generator::AlertGenerator;
use waterwatch_engine::health::{DeliveryHealthMonitor, HealthState};
use waterwatch_engine::models::{
    AlertType, NotificationRequest, Parameter, RawReading, Reading, Severity,
};
use waterwatch_engine::thresholds::{ThresholdConfig, WaterProfile};
use waterwatch_engine::{AlertEngine, ChannelError};

// ---

struct FailingRemote {
    calls: AtomicU32,
}

#[async_trait]
impl RemoteChannel for FailingRemote {
    fn name(&self) -> &str {
        "failing-remote"
    }

    async fn send(
        &self,
        _token: &str,
        _request: &NotificationRequest,
    ) -> Result<String, ChannelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ChannelError::Rejected("device unreachable".to_string()))
    }
}

struct BrokenLocal;

impl LocalChannel for BrokenLocal {
    fn name(&self) -> &str {
        "broken-local"
    }

    fn present(&self, _request: &NotificationRequest) -> Result<String, ChannelError> {
        Err(ChannelError::Local("presentation refused".to_string()))
    }
}

struct Harness {
    engine: AlertEngine,
    inbox: Arc<InboxChannel>,
    remote: Arc<FailingRemote>,
    health: Arc<DeliveryHealthMonitor>,
}

fn harness() -> Harness {
    // ---
    let inbox = Arc::new(InboxChannel::default());
    let remote = Arc::new(FailingRemote { calls: AtomicU32::new(0) });
    let health = Arc::new(DeliveryHealthMonitor::default());

    let dispatcher = NotificationDispatcher::new(
        inbox.clone(),
        RegistrationToken::new(Some("device-token".to_string())),
        health.clone(),
    )
    .with_remote(remote.clone())
    .with_policy(DispatchPolicy {
        max_attempts: 3,
        backoff_step: Duration::from_millis(500),
        attempt_timeout: Duration::from_secs(10),
    });

    let dedup = Arc::new(DeduplicationWindow::new(Duration::from_secs(300), 10));
    let generator = Arc::new(AlertGenerator::new(dedup).with_message_seed(7));

    Harness {
        engine: AlertEngine::new(generator, Arc::new(dispatcher)),
        inbox,
        remote,
        health,
    }
}

fn reading(parameter: Parameter, value: f64) -> Reading {
    Reading::new(Utc::now()).with(parameter, value)
}

fn freshwater() -> ThresholdConfig {
    ThresholdConfig::for_profile(WaterProfile::Freshwater)
}

// ---

#[tokio::test(start_paused = true)]
async fn critical_ph_falls_back_to_local_after_remote_retries() {
    // ---
    let h = harness();

    let report = h.engine.process(&[reading(Parameter::Ph, 9.2)], &freshwater()).await;

    assert_eq!(report.fired.len(), 1);
    let alert = &report.fired[0];
    assert_eq!(alert.alert_type, AlertType::Error);
    assert_eq!(alert.severity, Severity::Critical);
    assert!(!alert.title.is_empty());
    assert!(!alert.message.is_empty());

    assert_eq!(report.delivered, vec![alert.id.clone()]);
    assert_eq!(report.via_fallback, vec![alert.id.clone()]);
    assert!(report.failed.is_empty());
    assert_eq!(h.remote.calls.load(Ordering::SeqCst), 3);

    let inbox = h.inbox.recent();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].request.category_id, "water_alert");

    let status = h.health.health_status();
    assert_eq!(status.failed, 1);
    assert_eq!(status.successful, 1);
    assert_eq!(status.remote_failed, 1);
    assert_eq!(status.state, HealthState::Healthy);
}

#[tokio::test(start_paused = true)]
async fn in_range_reading_raises_nothing() {
    // ---
    let h = harness();

    let report = h.engine.process(&[reading(Parameter::Ph, 7.2)], &freshwater()).await;

    assert!(report.fired.is_empty());
    assert!(h.inbox.recent().is_empty());
    assert_eq!(h.remote.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.health.health_status().state, HealthState::Unknown);
}

#[tokio::test(start_paused = true)]
async fn repeated_batch_is_suppressed_inside_window() {
    // ---
    let h = harness();
    let batch = [reading(Parameter::Ph, 9.2)];

    let first = h.engine.process(&batch, &freshwater()).await;
    let second = h.engine.process(&batch, &freshwater()).await;

    assert_eq!(first.fired.len(), 1);
    assert!(second.fired.is_empty());
    assert_eq!(h.inbox.recent().len(), 1);

    let active = h.engine.generator().active_alerts();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].occurrence_count, 2);
}

#[tokio::test(start_paused = true)]
async fn heavy_rain_alerts_and_dry_weather_is_silent() {
    // ---
    let h = harness();

    let raw: Vec<RawReading> = assert_ok!(serde_json::from_value(serde_json::json!([
        { "timestamp": "2025-03-26T18:45:00Z", "isRaining": 2 },
        { "timestamp": "2025-03-26T18:50:00Z", "isRaining": 0 }
    ])));
    let readings: Vec<Reading> = raw.into_iter().map(Reading::from).collect();

    let report = h.engine.process(&readings, &freshwater()).await;

    assert_eq!(report.fired.len(), 1);
    assert_eq!(report.fired[0].parameter, Parameter::Raining);
    assert_eq!(report.fired[0].alert_type, AlertType::Warning);
    assert_eq!(report.fired[0].severity, Severity::High);

    let quiet = h.engine.process(&readings[1..], &freshwater()).await;
    assert!(quiet.fired.is_empty());
}

#[tokio::test(start_paused = true)]
async fn total_failure_rolls_back_so_the_alert_can_fire_again() {
    // ---
    let health = Arc::new(DeliveryHealthMonitor::default());
    let dispatcher = NotificationDispatcher::new(
        Arc::new(BrokenLocal),
        RegistrationToken::default(),
        health.clone(),
    );
    let dedup = Arc::new(DeduplicationWindow::new(Duration::from_secs(300), 10));
    let generator = Arc::new(AlertGenerator::new(dedup.clone()));
    let engine = AlertEngine::new(generator, Arc::new(dispatcher));

    let batch = [reading(Parameter::Temperature, 35.0)];

    let first = engine.process(&batch, &freshwater()).await;
    assert_eq!(first.fired.len(), 1);
    assert_eq!(first.failed, vec![first.fired[0].id.clone()]);
    assert!(first.delivered.is_empty());
    assert!(dedup.is_empty());

    let second = engine.process(&batch, &freshwater()).await;
    assert_eq!(second.fired.len(), 1);

    let status = health.health_status();
    assert_eq!(status.local_failed, 2);
    assert_eq!(status.state, HealthState::Unhealthy);
}
