//! Explicitly constructed engine services and their lifecycle.
//!
//! [`App`] owns one instance of every engine component and hands out shared
//! references; there is no global state. `start` spawns the background work
//! (dedup cleanup, reading poller, reminder timers) under one cancellation
//! token and `stop` tears it down again.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::dedup::DeduplicationWindow;
use crate::dispatch::{HttpPushChannel, InboxChannel, NotificationDispatcher, RegistrationToken};
use crate::generator::AlertGenerator;
use crate::health::DeliveryHealthMonitor;
use crate::models::Reading;
use crate::pipeline::{AlertEngine, ProcessReport};
use crate::poller;
use crate::schedule::ScheduleManager;
use crate::store::KeyValueStore;
use crate::thresholds::ThresholdConfig;

// ---

pub struct App {
    // ---
    pub config: Config,
    pub store: Arc<dyn KeyValueStore>,
    pub thresholds: RwLock<ThresholdConfig>,
    pub dedup: Arc<DeduplicationWindow>,
    pub engine: AlertEngine,
    pub inbox: Arc<InboxChannel>,
    pub token: RegistrationToken,
    pub health: Arc<DeliveryHealthMonitor>,
    pub schedules: ScheduleManager,
    pub shutdown: CancellationToken,
}

impl App {
    /// Wire every component from `config` on top of `store`.
    pub fn build(config: Config, store: Arc<dyn KeyValueStore>) -> Self {
        // ---
        let shutdown = CancellationToken::new();

        let dedup = Arc::new(DeduplicationWindow::new(
            config.dedup_window,
            config.dedup_max_entries,
        ));
        let generator = Arc::new(AlertGenerator::new(dedup.clone()));

        let health = Arc::new(DeliveryHealthMonitor::new(config.failure_alert_threshold));
        let inbox = Arc::new(InboxChannel::default());
        let token = RegistrationToken::new(config.push_token.clone());

        let mut dispatcher =
            NotificationDispatcher::new(inbox.clone(), token.clone(), health.clone())
                .with_policy(config.dispatch)
                .with_shutdown(shutdown.clone());
        if let Some(url) = &config.push_url {
            dispatcher = dispatcher.with_remote(Arc::new(HttpPushChannel::new(url.clone())));
        }
        let dispatcher = Arc::new(dispatcher);

        let schedules = ScheduleManager::new(store.clone(), dispatcher.clone(), config.reminders)
            .with_shutdown(shutdown.clone());

        Self {
            thresholds: RwLock::new(ThresholdConfig::for_profile(config.water_profile)),
            engine: AlertEngine::new(generator, dispatcher),
            config,
            store,
            dedup,
            inbox,
            token,
            health,
            schedules,
            shutdown,
        }
    }

    /// Re-read the threshold snapshot from the store.
    pub async fn refresh_thresholds(&self) {
        let latest =
            ThresholdConfig::load_or_default(self.store.as_ref(), self.config.water_profile)
                .await;
        *self.thresholds.write().await = latest;
    }

    /// Run a batch of readings against the current threshold snapshot.
    pub async fn process(&self, readings: &[Reading]) -> ProcessReport {
        // ---
        let config = self.thresholds.read().await.clone();
        let report = self.engine.process(readings, &config).await;
        if !report.fired.is_empty() {
            self.health.persist_summary(self.store.as_ref()).await;
        }
        report
    }

    /// Spawn background work and arm reminders.
    pub async fn start(self: &Arc<Self>) {
        // ---
        self.refresh_thresholds().await;

        self.dedup
            .clone()
            .spawn_cleanup(self.config.dedup_cleanup_interval, self.shutdown.child_token());

        self.schedules.initialize().await;

        if let Some(url) = self.config.api_url.clone() {
            poller::spawn(self.clone(), url);
        }

        info!("Engine started");
    }

    /// Cancel background work and stop every reminder timer.
    pub async fn stop(&self) {
        // ---
        self.shutdown.cancel();
        self.schedules.destroy().await;
        self.health.persist_summary(self.store.as_ref()).await;
        info!("Engine stopped");
    }
}
