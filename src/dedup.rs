//! Sliding-window suppression of repeated alerts.
//!
//! The window remembers when each `(signature, severity)` pair last fired.
//! A pair may fire again once every entry for it has aged out of the window,
//! or once the entry is removed explicitly (resolution, failed delivery).
//!
//! All state lives in one mutex-guarded map. [`DeduplicationWindow::try_admit`]
//! performs the read-then-write admission under a single lock acquisition, so
//! concurrent producers and the background cleanup task can never both pass
//! the check for the same pair. A poisoned lock fails open: the window is
//! cleared and unpoisoned, so the next admission passes and suppression
//! resumes from an empty history.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::Severity;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_ENTRIES: usize = 10;
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Firing {
    at: Instant,
    severity: Severity,
}

type Entries = HashMap<String, Vec<Firing>>;

#[derive(Debug)]
pub struct DeduplicationWindow {
    // ---
    entries: Mutex<Entries>,
    window: Duration,
    max_entries: usize,
}

impl Default for DeduplicationWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_ENTRIES)
    }
}

impl DeduplicationWindow {
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window,
            max_entries: max_entries.max(1),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // ---
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Dedup state poisoned, clearing the window");
                let mut guard = poisoned.into_inner();
                guard.clear();
                self.entries.clear_poison();
                guard
            }
        }
    }

    fn expire(&self, entries: &mut Entries, signature: &str, now: Instant) {
        // ---
        if let Some(list) = entries.get_mut(signature) {
            list.retain(|f| now.saturating_duration_since(f.at) < self.window);
            if list.is_empty() {
                entries.remove(signature);
            }
        }
    }

    fn blocked(entries: &Entries, signature: &str, severity: Severity) -> bool {
        entries
            .get(signature)
            .is_some_and(|list| list.iter().any(|f| f.severity == severity))
    }

    fn push(&self, entries: &mut Entries, signature: &str, severity: Severity, now: Instant) {
        // ---
        let list = entries.entry(signature.to_string()).or_default();
        list.push(Firing { at: now, severity });
        if list.len() > self.max_entries {
            let excess = list.len() - self.max_entries;
            list.drain(..excess);
        }
    }

    /// Whether the pair may fire now. Expired entries are dropped first.
    pub fn can_fire(&self, signature: &str, severity: Severity) -> bool {
        // ---
        let mut entries = self.lock();
        self.expire(&mut entries, signature, Instant::now());
        !Self::blocked(&entries, signature, severity)
    }

    /// Whether the pair still has a firing inside the window. Read-only.
    pub fn is_tracked(&self, signature: &str, severity: Severity) -> bool {
        // ---
        let now = Instant::now();
        self.lock().get(signature).is_some_and(|list| {
            list.iter().any(|f| {
                f.severity == severity && now.saturating_duration_since(f.at) < self.window
            })
        })
    }

    /// Note that the pair fired now.
    pub fn record(&self, signature: &str, severity: Severity) {
        let mut entries = self.lock();
        self.push(&mut entries, signature, severity, Instant::now());
    }

    /// Check and record as one decision. Returns `true` when admitted.
    pub fn try_admit(&self, signature: &str, severity: Severity) -> bool {
        // ---
        let mut entries = self.lock();
        let now = Instant::now();
        self.expire(&mut entries, signature, now);
        if Self::blocked(&entries, signature, severity) {
            debug!(signature, %severity, "Alert suppressed inside dedup window");
            return false;
        }
        self.push(&mut entries, signature, severity, now);
        true
    }

    /// Forget every firing of the pair so it may fire again immediately.
    pub fn remove(&self, signature: &str, severity: Severity) {
        // ---
        let mut entries = self.lock();
        if let Some(list) = entries.get_mut(signature) {
            list.retain(|f| f.severity != severity);
            if list.is_empty() {
                entries.remove(signature);
            }
        }
    }

    /// Drop expired entries everywhere. Returns the number of signatures removed.
    pub fn cleanup(&self) -> usize {
        // ---
        let mut entries = self.lock();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, list| {
            list.retain(|f| now.saturating_duration_since(f.at) < self.window);
            !list.is_empty()
        });
        before - entries.len()
    }

    /// Number of signatures currently tracked.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`cleanup`](Self::cleanup) every `interval` until `shutdown` fires.
    pub fn spawn_cleanup(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        // ---
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Dedup cleanup stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = self.cleanup();
                        if removed > 0 {
                            debug!(removed, remaining = self.len(), "Dedup cleanup pass");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    const SIG: &str = "ph|error|pH critically high|9.20";

    #[tokio::test(start_paused = true)]
    async fn test_same_pair_suppressed_inside_window() {
        // ---
        let window = DeduplicationWindow::default();

        assert!(window.try_admit(SIG, Severity::Critical));
        assert!(!window.try_admit(SIG, Severity::Critical));
        assert!(!window.can_fire(SIG, Severity::Critical));

        // A different severity on the same signature is its own pair
        assert!(window.can_fire(SIG, Severity::High));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_fires_again_after_window() {
        // ---
        let window = DeduplicationWindow::new(Duration::from_secs(300), 10);
        window.record(SIG, Severity::Critical);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(!window.can_fire(SIG, Severity::Critical));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(window.can_fire(SIG, Severity::Critical));
        // Lazy expiry on read removed the signature entirely
        assert!(window.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_allows_refire() {
        // ---
        let window = DeduplicationWindow::default();
        window.record(SIG, Severity::Critical);
        window.record(SIG, Severity::High);

        window.remove(SIG, Severity::Critical);

        assert!(window.can_fire(SIG, Severity::Critical));
        assert!(!window.can_fire(SIG, Severity::High));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_capped_per_signature() {
        // ---
        let window = DeduplicationWindow::new(Duration::from_secs(300), 3);
        for severity in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
            window.record(SIG, severity);
        }

        // Oldest entry (Low) was trimmed
        assert!(window.can_fire(SIG, Severity::Low));
        assert!(!window.can_fire(SIG, Severity::Critical));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_fully_expired_signatures() {
        // ---
        let window = DeduplicationWindow::new(Duration::from_secs(60), 10);
        window.record("old", Severity::Low);
        tokio::time::advance(Duration::from_secs(45)).await;
        window.record("fresh", Severity::Low);
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(window.cleanup(), 1);
        assert_eq!(window.len(), 1);
        assert!(!window.can_fire("fresh", Severity::Low));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_cleanup_is_cancellable() {
        // ---
        let window = Arc::new(DeduplicationWindow::new(Duration::from_secs(10), 10));
        let shutdown = CancellationToken::new();
        let handle = window.clone().spawn_cleanup(Duration::from_secs(5), shutdown.clone());

        window.record(SIG, Severity::Low);
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(window.is_empty());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cleanup task should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_admission_admits_once() {
        // ---
        let window = Arc::new(DeduplicationWindow::default());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let window = window.clone();
            handles.push(tokio::spawn(async move {
                window.try_admit(SIG, Severity::Critical)
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poisoned_lock_fails_open_and_recovers() {
        // ---
        let window = Arc::new(DeduplicationWindow::default());
        window.record(SIG, Severity::Critical);

        let holder = window.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.entries.lock().unwrap();
            panic!("panic while holding dedup state");
        })
        .join();
        assert!(window.entries.is_poisoned());

        assert!(window.can_fire(SIG, Severity::Critical));
        assert!(!window.entries.is_poisoned());
        assert!(window.try_admit(SIG, Severity::Critical));

        // Suppression works again on the recovered window
        assert!(!window.try_admit(SIG, Severity::Critical));
        assert!(window.is_tracked(SIG, Severity::Critical));
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_tracked_follows_expiry() {
        // ---
        let window = DeduplicationWindow::new(Duration::from_secs(60), 10);
        window.record(SIG, Severity::High);

        assert!(window.is_tracked(SIG, Severity::High));
        assert!(!window.is_tracked(SIG, Severity::Critical));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!window.is_tracked(SIG, Severity::High));
    }
}
