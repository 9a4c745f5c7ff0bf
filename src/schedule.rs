//! Recurring reminders that survive process restarts.
//!
//! Each logical reminder id owns at most one live timer. Arming a schedule
//! always cancels the previous timer for that id first, and the whole
//! cancel → arm → persist sequence runs under one async lock, so repeated
//! `initialize` or `reschedule_all` calls never leave two timers for the same
//! id.
//!
//! State per id: `unscheduled → active → (cancelled | active)`. Cancelling
//! stops the timer before the flag is persisted; persistence failures are
//! logged and the manager keeps running on its in-memory state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::NotificationDispatcher;
use crate::messages;
use crate::models::{ChannelPreference, NotificationRequest};
use crate::store::KeyValueStore;

pub const FORECAST_REMINDER: &str = "forecast_reminder";
pub const REPORT_REMINDER: &str = "report_reminder";
pub const MONITORING_REMINDER: &str = "monitoring_reminder";

/// Every reminder id the manager owns.
pub const REMINDER_IDS: [&str; 3] = [FORECAST_REMINDER, REPORT_REMINDER, MONITORING_REMINDER];

/// Storage key of the persisted schedule map.
pub const SCHEDULES_KEY: &str = "schedules";

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Fires every day at the given local time.
    Daily { hour: u32, minute: u32 },
    /// Fires every `hours` hours after arming.
    Interval { hours: u32 },
}

impl Trigger {
    /// Time until the next firing, measured from `now`.
    pub fn next_delay<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Duration {
        self.delay_after(now, None)
    }

    /// Time until the next firing after `last_fired`.
    ///
    /// Daily triggers never pick an occurrence earlier than one minute past
    /// the last scheduled firing, so a wall clock stepping backwards cannot
    /// fire the same reminder twice.
    pub fn delay_after<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
        last_fired: Option<&DateTime<Tz>>,
    ) -> Duration {
        // ---
        match *self {
            Trigger::Interval { hours } => Duration::from_secs(u64::from(hours.max(1)) * 3600),
            Trigger::Daily { hour, minute } => {
                let floor = match last_fired {
                    Some(at) => {
                        let earliest = at.clone() + chrono::Duration::minutes(1);
                        if earliest > *now {
                            earliest
                        } else {
                            now.clone()
                        }
                    }
                    None => now.clone(),
                };

                let tz = now.timezone();
                let next = floor
                    .date_naive()
                    .iter_days()
                    .take(3)
                    .filter_map(|date| date.and_hms_opt(hour, minute, 0))
                    .filter_map(|naive| tz.from_local_datetime(&naive).earliest())
                    .find(|candidate| *candidate > floor);

                match next {
                    Some(at) => at
                        .signed_duration_since(now.clone())
                        .to_std()
                        .unwrap_or(Duration::ZERO),
                    None => Duration::from_secs(24 * 3600),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Forecast,
    Report,
    Monitoring,
}

/// Persisted recurring reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    // ---
    pub id: String,
    #[serde(rename = "type")]
    pub schedule_type: ScheduleType,
    pub trigger: Trigger,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new(id: &str, schedule_type: ScheduleType, trigger: Trigger) -> Self {
        Self {
            id: id.to_string(),
            schedule_type,
            trigger,
            active: true,
            created_at: Utc::now(),
        }
    }

    /// Notification sent on each firing.
    pub fn request(&self) -> NotificationRequest {
        // ---
        let (title, body) = match self.schedule_type {
            ScheduleType::Forecast => (
                messages::FORECAST_REMINDER_TITLE,
                messages::FORECAST_REMINDER_BODY,
            ),
            ScheduleType::Report => (
                messages::REPORT_REMINDER_TITLE,
                messages::REPORT_REMINDER_BODY,
            ),
            ScheduleType::Monitoring => (
                messages::MONITORING_REMINDER_TITLE,
                messages::MONITORING_REMINDER_BODY,
            ),
        };
        NotificationRequest::new(title, body, "reminder")
            .with_channel_preference(ChannelPreference::LocalOnly)
            .with_data(serde_json::json!({
                "scheduleId": self.id,
                "type": self.schedule_type,
            }))
    }
}

/// Times and interval used when (re)creating reminders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderSettings {
    pub forecast_at: (u32, u32),
    pub report_at: (u32, u32),
    pub monitoring_interval_hours: u32,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            forecast_at: (7, 0),
            report_at: (18, 0),
            monitoring_interval_hours: 4,
        }
    }
}

// ---

struct Timer {
    cancel: CancellationToken,
    // Kept so the task is owned by the schedule it serves
    _handle: JoinHandle<()>,
}

impl Timer {
    fn stop(&self) {
        self.cancel.cancel();
    }

    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

struct Armed {
    schedule: Schedule,
    timer: Option<Timer>,
}

type State = HashMap<String, Armed>;

pub struct ScheduleManager {
    // ---
    store: Arc<dyn KeyValueStore>,
    dispatcher: Arc<NotificationDispatcher>,
    settings: ReminderSettings,
    state: Mutex<State>,
    shutdown: CancellationToken,
}

impl ScheduleManager {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        dispatcher: Arc<NotificationDispatcher>,
        settings: ReminderSettings,
    ) -> Self {
        Self {
            store,
            dispatcher,
            settings,
            state: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Parent token for every timer; cancelling it stops all of them.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn default_schedule(&self, id: &str, monitoring_hours: u32) -> Schedule {
        // ---
        let (hour, minute) = match id {
            FORECAST_REMINDER => self.settings.forecast_at,
            REPORT_REMINDER => self.settings.report_at,
            _ => {
                let trigger = Trigger::Interval {
                    hours: monitoring_hours,
                };
                return Schedule::new(id, ScheduleType::Monitoring, trigger);
            }
        };
        let schedule_type = if id == FORECAST_REMINDER {
            ScheduleType::Forecast
        } else {
            ScheduleType::Report
        };
        Schedule::new(id, schedule_type, Trigger::Daily { hour, minute })
    }

    /// Load persisted schedules and make sure every reminder id is armed.
    ///
    /// Persisted active schedules are re-armed as they were; missing or
    /// inactive ones are recreated from the current settings. Safe to call
    /// repeatedly.
    pub async fn initialize(&self) {
        // ---
        let mut state = self.state.lock().await;

        let persisted: HashMap<String, Schedule> = match self.store.get_json(SCHEDULES_KEY).await {
            Ok(map) => map.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Schedule store unreadable, continuing in memory");
                HashMap::new()
            }
        };

        for id in REMINDER_IDS {
            let schedule = match persisted.get(id) {
                Some(schedule) if schedule.active => schedule.clone(),
                _ => self.default_schedule(id, self.settings.monitoring_interval_hours),
            };
            self.arm(&mut state, schedule);
        }

        self.persist(&state).await;
        info!(schedules = state.len(), "Schedule manager initialized");
    }

    /// Create the forecast and report time-of-day reminders.
    pub async fn schedule_daily_reminders(&self) {
        // ---
        let mut state = self.state.lock().await;
        self.arm_daily(&mut state);
        self.persist(&state).await;
    }

    /// Create the interval-based monitoring reminder.
    pub async fn schedule_monitoring_reminders(&self, interval_hours: u32) {
        // ---
        let mut state = self.state.lock().await;
        self.arm(&mut state, self.default_schedule(MONITORING_REMINDER, interval_hours));
        self.persist(&state).await;
    }

    /// Cancel one reminder. Returns `false` for an unknown id.
    pub async fn cancel_notification(&self, id: &str) -> bool {
        // ---
        let mut state = self.state.lock().await;
        let Some(armed) = state.get_mut(id) else {
            return false;
        };

        if let Some(timer) = armed.timer.take() {
            timer.stop();
        }
        armed.schedule.active = false;
        self.persist(&state).await;

        info!(schedule_id = id, "Schedule cancelled");
        true
    }

    /// Cancel everything, then recreate the daily and monitoring reminders.
    pub async fn reschedule_all(&self) {
        // ---
        let mut state = self.state.lock().await;

        let monitoring_hours = match state.get(MONITORING_REMINDER).map(|a| a.schedule.trigger) {
            Some(Trigger::Interval { hours }) => hours,
            _ => self.settings.monitoring_interval_hours,
        };

        for armed in state.values_mut() {
            if let Some(timer) = armed.timer.take() {
                timer.stop();
            }
        }
        state.clear();

        self.arm_daily(&mut state);
        self.arm(&mut state, self.default_schedule(MONITORING_REMINDER, monitoring_hours));
        self.persist(&state).await;
        info!("All schedules rearmed");
    }

    /// Stop every timer and drop in-memory state. Persisted state is left
    /// as-is so the next process re-arms it.
    pub async fn destroy(&self) {
        // ---
        let mut state = self.state.lock().await;
        for armed in state.values() {
            if let Some(timer) = &armed.timer {
                timer.stop();
            }
        }
        state.clear();
        debug!("Schedule manager destroyed");
    }

    /// Snapshot of known schedules, sorted by id.
    pub async fn schedules(&self) -> Vec<Schedule> {
        let state = self.state.lock().await;
        let mut out: Vec<Schedule> = state.values().map(|a| a.schedule.clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Number of timers that will still fire.
    pub async fn live_timer_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .values()
            .filter(|a| a.timer.as_ref().is_some_and(Timer::is_live))
            .count()
    }

    // ---

    fn arm_daily(&self, state: &mut State) {
        for id in [FORECAST_REMINDER, REPORT_REMINDER] {
            self.arm(state, self.default_schedule(id, self.settings.monitoring_interval_hours));
        }
    }

    /// Cancel-before-create for one id.
    fn arm(&self, state: &mut State, mut schedule: Schedule) {
        // ---
        if let Some(previous) = state.remove(&schedule.id) {
            if let Some(timer) = previous.timer {
                timer.stop();
            }
        }

        schedule.active = true;
        let timer = self.spawn_timer(schedule.clone());
        debug!(schedule_id = %schedule.id, trigger = ?schedule.trigger, "Schedule armed");
        state.insert(
            schedule.id.clone(),
            Armed {
                schedule,
                timer: Some(timer),
            },
        );
    }

    fn spawn_timer(&self, schedule: Schedule) -> Timer {
        // ---
        let cancel = self.shutdown.child_token();
        let token = cancel.clone();
        let dispatcher = self.dispatcher.clone();

        let handle = tokio::spawn(async move {
            let mut last_fired: Option<DateTime<Local>> = None;
            loop {
                let now = Local::now();
                let delay = schedule.trigger.delay_after(&now, last_fired.as_ref());
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                last_fired = chrono::Duration::from_std(delay).ok().map(|d| now + d);

                // Delivery failures never retract the schedule
                match dispatcher.dispatch(&schedule.request()).await {
                    Ok(delivery) => debug!(
                        schedule_id = %schedule.id,
                        channel = ?delivery.channel,
                        "Reminder delivered"
                    ),
                    Err(e) => warn!(
                        schedule_id = %schedule.id,
                        error = %e,
                        "Reminder delivery failed"
                    ),
                }
            }
        });

        Timer {
            cancel,
            _handle: handle,
        }
    }

    async fn persist(&self, state: &State) {
        // ---
        let snapshot: HashMap<&str, &Schedule> = state
            .iter()
            .map(|(id, a)| (id.as_str(), &a.schedule))
            .collect();
        if let Err(e) = self.store.set_json(SCHEDULES_KEY, &snapshot).await {
            warn!(error = %e, "Failed to persist schedules, continuing in memory");
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::dispatch::{InboxChannel, RegistrationToken};
    use crate::error::StoreError;
    use crate::health::DeliveryHealthMonitor;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct FailingStore;

    #[async_trait]
    impl KeyValueStore for FailingStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            Err(codec_error(key))
        }

        async fn set(&self, key: &str, _value: String) -> Result<(), StoreError> {
            Err(codec_error(key))
        }

        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            Err(codec_error(key))
        }
    }

    fn codec_error(key: &str) -> StoreError {
        StoreError::Codec {
            key: key.to_string(),
            source: serde_json::from_str::<()>("not json").unwrap_err(),
        }
    }

    fn create_test_manager(
        store: Arc<dyn KeyValueStore>,
    ) -> (ScheduleManager, Arc<InboxChannel>) {
        // ---
        let inbox = Arc::new(InboxChannel::default());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            inbox.clone(),
            RegistrationToken::default(),
            Arc::new(DeliveryHealthMonitor::default()),
        ));
        (ScheduleManager::new(store, dispatcher, ReminderSettings::default()), inbox)
    }

    #[tokio::test]
    async fn test_initialize_twice_keeps_one_timer_per_id() {
        // ---
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let (manager, _) = create_test_manager(store.clone());

        manager.initialize().await;
        manager.initialize().await;

        let schedules = manager.schedules().await;
        assert_eq!(schedules.len(), 3);
        assert!(schedules.iter().all(|s| s.active));
        assert_eq!(manager.live_timer_count().await, 3);

        let persisted: HashMap<String, Schedule> =
            store.get_json(SCHEDULES_KEY).await.unwrap().unwrap();
        assert_eq!(persisted.len(), 3);

        manager.destroy().await;
    }

    #[tokio::test]
    async fn test_cancel_persists_before_returning() {
        // ---
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let (manager, _) = create_test_manager(store.clone());
        manager.initialize().await;

        assert!(manager.cancel_notification(REPORT_REMINDER).await);
        assert!(!manager.cancel_notification("unknown").await);

        assert_eq!(manager.live_timer_count().await, 2);
        let persisted: HashMap<String, Schedule> =
            store.get_json(SCHEDULES_KEY).await.unwrap().unwrap();
        assert!(!persisted[REPORT_REMINDER].active);
        assert!(persisted[FORECAST_REMINDER].active);

        manager.destroy().await;
    }

    #[tokio::test]
    async fn test_restart_rearms_persisted_schedules() {
        // ---
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let (first, _) = create_test_manager(store.clone());
        first.schedule_monitoring_reminders(6).await;
        first.initialize().await;
        first.destroy().await;
        assert_eq!(first.live_timer_count().await, 0);

        let (second, _) = create_test_manager(store.clone());
        second.initialize().await;

        let monitoring = second
            .schedules()
            .await
            .into_iter()
            .find(|s| s.id == MONITORING_REMINDER)
            .unwrap();
        // The persisted 6h interval survives, not the 4h default
        assert_eq!(monitoring.trigger, Trigger::Interval { hours: 6 });
        assert_eq!(second.live_timer_count().await, 3);

        second.destroy().await;
    }

    #[tokio::test]
    async fn test_reschedule_all_replaces_cancelled_schedules() {
        // ---
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let (manager, _) = create_test_manager(store);
        manager.initialize().await;
        manager.cancel_notification(FORECAST_REMINDER).await;

        manager.reschedule_all().await;

        assert_eq!(manager.live_timer_count().await, 3);
        assert!(manager.schedules().await.iter().all(|s| s.active));

        manager.destroy().await;
    }

    #[tokio::test]
    async fn test_unwritable_store_keeps_running_in_memory() {
        // ---
        let (manager, _) = create_test_manager(Arc::new(FailingStore));
        manager.initialize().await;

        assert_eq!(manager.live_timer_count().await, 3);
        assert!(manager.cancel_notification(MONITORING_REMINDER).await);
        assert_eq!(manager.live_timer_count().await, 2);

        manager.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_reminder_fires_and_stops_on_cancel() {
        // ---
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let (manager, inbox) = create_test_manager(store);
        manager.schedule_monitoring_reminders(1).await;

        tokio::time::sleep(Duration::from_secs(3 * 3600 + 60)).await;
        assert_eq!(inbox.recent().len(), 3);
        assert_eq!(
            inbox.recent()[0].request.title,
            messages::MONITORING_REMINDER_TITLE
        );

        manager.cancel_notification(MONITORING_REMINDER).await;
        tokio::time::sleep(Duration::from_secs(5 * 3600)).await;
        assert_eq!(inbox.recent().len(), 3);
    }

    #[test]
    fn test_daily_trigger_next_delay() {
        // ---
        let trigger = Trigger::Daily { hour: 7, minute: 0 };

        let before = Utc.with_ymd_and_hms(2025, 6, 1, 6, 30, 0).unwrap();
        assert_eq!(trigger.next_delay(&before), Duration::from_secs(30 * 60));

        let after = Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 0).unwrap();
        assert_eq!(trigger.next_delay(&after), Duration::from_secs(24 * 3600));

        let invalid = Trigger::Daily { hour: 25, minute: 0 };
        assert_eq!(invalid.next_delay(&before), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_daily_trigger_survives_wall_clock_stepping_back() {
        // ---
        let trigger = Trigger::Daily { hour: 7, minute: 0 };
        let fired_at = Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 0).unwrap();

        // Clock stepped back 30s right after the 07:00 firing
        let stepped_back = Utc.with_ymd_and_hms(2025, 6, 1, 6, 59, 30).unwrap();
        assert_eq!(trigger.next_delay(&stepped_back), Duration::from_secs(30));
        assert_eq!(
            trigger.delay_after(&stepped_back, Some(&fired_at)),
            Duration::from_secs(24 * 3600 + 30)
        );

        // A clock that kept running is unaffected
        let on_time = Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 1).unwrap();
        assert_eq!(
            trigger.delay_after(&on_time, Some(&fired_at)),
            Duration::from_secs(24 * 3600 - 1)
        );

        let interval = Trigger::Interval { hours: 2 };
        assert_eq!(
            interval.delay_after(&stepped_back, Some(&fired_at)),
            Duration::from_secs(2 * 3600)
        );
    }
}
