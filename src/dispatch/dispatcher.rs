//! Reliable delivery of one notification across the channel chain.
//!
//! Remote push is tried first when a registration token exists, with a fixed
//! number of attempts, a per-attempt timeout, and linear backoff
//! (`attempt * step`). A remote success ends the dispatch; the local channel
//! is not fired as well. Otherwise the local channel presents the
//! notification exactly once. Every channel outcome is recorded with the
//! health monitor.
//!
//! Delivery is at-least-once: a timed-out remote attempt may still have been
//! delivered by the provider.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::channels::{LocalChannel, RegistrationToken, RemoteChannel};
use crate::error::{ChannelError, DispatchError};
use crate::health::DeliveryHealthMonitor;
use crate::models::{
    Channel, ChannelPreference, DeliveryRecord, DeliveryStatus, NotificationRequest,
};

// ---

/// Retry policy for the remote channel.
#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
    pub attempt_timeout: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

/// Successful dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub notification_id: String,
    pub channel: Channel,
    pub message_id: String,
    pub remote_attempts: u32,
    /// Remote was preferred but the local channel delivered.
    pub fallback_used: bool,
}

enum RemoteOutcome {
    Delivered { message_id: String, attempts: u32 },
    Failed { error: ChannelError, attempts: u32 },
    Cancelled,
}

pub struct NotificationDispatcher {
    // ---
    remote: Option<Arc<dyn RemoteChannel>>,
    local: Arc<dyn LocalChannel>,
    token: RegistrationToken,
    health: Arc<DeliveryHealthMonitor>,
    policy: DispatchPolicy,
    shutdown: CancellationToken,
}

impl NotificationDispatcher {
    pub fn new(
        local: Arc<dyn LocalChannel>,
        token: RegistrationToken,
        health: Arc<DeliveryHealthMonitor>,
    ) -> Self {
        Self {
            remote: None,
            local,
            token,
            health,
            policy: DispatchPolicy::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteChannel>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Token whose cancellation interrupts remote backoff.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn health(&self) -> &Arc<DeliveryHealthMonitor> {
        &self.health
    }

    pub fn token(&self) -> &RegistrationToken {
        &self.token
    }

    /// Deliver `request`, preferring remote push and falling back to local.
    pub async fn dispatch(&self, request: &NotificationRequest) -> Result<Delivery, DispatchError> {
        // ---
        let mut remote_error: Option<String> = None;
        let mut remote_attempts = 0;
        let prefers_remote = request.channel_preference == ChannelPreference::RemoteFirst;

        if prefers_remote {
            match (&self.remote, self.token.current()) {
                (Some(remote), Some(_)) => match self.send_remote(remote.as_ref(), request).await {
                    RemoteOutcome::Delivered { message_id, attempts } => {
                        self.record(request, Channel::Remote, DeliveryStatus::Delivered, None);
                        info!(
                            notification_id = %request.id,
                            channel = remote.name(),
                            attempts,
                            "Notification delivered"
                        );
                        return Ok(Delivery {
                            notification_id: request.id.clone(),
                            channel: Channel::Remote,
                            message_id,
                            remote_attempts: attempts,
                            fallback_used: false,
                        });
                    }
                    RemoteOutcome::Failed { error, attempts } => {
                        let message = error.to_string();
                        self.record(
                            request,
                            Channel::Remote,
                            DeliveryStatus::Failed,
                            Some(message.clone()),
                        );
                        warn!(
                            notification_id = %request.id,
                            channel = remote.name(),
                            attempts,
                            error = %message,
                            "Remote delivery failed, falling back to local"
                        );
                        remote_attempts = attempts;
                        remote_error = Some(message);
                    }
                    RemoteOutcome::Cancelled => {
                        debug!(notification_id = %request.id, "Dispatch cancelled during backoff");
                        return Err(DispatchError::Cancelled);
                    }
                },
                (None, _) => debug!(notification_id = %request.id, "No remote channel configured"),
                (_, None) => {
                    debug!(notification_id = %request.id, "No registration token, skipping remote");
                    remote_error = Some(ChannelError::MissingToken.to_string());
                }
            }
        }

        match self.local.present(request) {
            Ok(message_id) => {
                self.record(request, Channel::Local, DeliveryStatus::Delivered, None);
                debug!(
                    notification_id = %request.id,
                    channel = self.local.name(),
                    fallback = prefers_remote,
                    "Notification presented locally"
                );
                Ok(Delivery {
                    notification_id: request.id.clone(),
                    channel: Channel::Local,
                    message_id,
                    remote_attempts,
                    fallback_used: prefers_remote,
                })
            }
            Err(e) => {
                let local = e.to_string();
                self.record(request, Channel::Local, DeliveryStatus::Failed, Some(local.clone()));
                error!(
                    notification_id = %request.id,
                    title = %request.title,
                    category = %request.category_id,
                    severity = ?request.severity,
                    remote_error = remote_error.as_deref().unwrap_or("skipped"),
                    local_error = %local,
                    "Notification delivery failed on every channel"
                );
                Err(DispatchError::Exhausted {
                    remote: remote_error,
                    local,
                })
            }
        }
    }

    async fn send_remote(
        &self,
        remote: &dyn RemoteChannel,
        request: &NotificationRequest,
    ) -> RemoteOutcome {
        // ---
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = ChannelError::MissingToken;

        for attempt in 1..=max_attempts {
            // Re-read every attempt so a rotation mid-retry is picked up
            let Some(token) = self.token.current() else {
                return RemoteOutcome::Failed {
                    error: ChannelError::MissingToken,
                    attempts: attempt - 1,
                };
            };

            let result =
                tokio::time::timeout(self.policy.attempt_timeout, remote.send(&token, request))
                    .await;
            match result {
                Ok(Ok(message_id)) => {
                    return RemoteOutcome::Delivered {
                        message_id,
                        attempts: attempt,
                    }
                }
                Ok(Err(e)) => last_error = e,
                Err(_) => last_error = ChannelError::Timeout(self.policy.attempt_timeout),
            }

            debug!(
                notification_id = %request.id,
                attempt,
                max_attempts,
                error = %last_error,
                "Remote attempt failed"
            );

            if attempt < max_attempts {
                let delay = self.policy.backoff_step * attempt;
                tokio::select! {
                    _ = self.shutdown.cancelled() => return RemoteOutcome::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        RemoteOutcome::Failed {
            error: last_error,
            attempts: max_attempts,
        }
    }

    fn record(
        &self,
        request: &NotificationRequest,
        channel: Channel,
        status: DeliveryStatus,
        error: Option<String>,
    ) {
        self.health.record(DeliveryRecord {
            notification_id: request.id.clone(),
            channel,
            status,
            timestamp: chrono::Utc::now(),
            severity: request.severity,
            error,
        });
    }
}
