//! Delivery channels and the device registration token.
//!
//! The remote channel is network I/O and therefore async; the local channel
//! presents on-device and is synchronous, mirroring how the two behave on the
//! phone. Implementations here are the ones the service runs with; tests plug
//! in their own.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::ChannelError;
use crate::models::{NotificationRequest, Priority};

// ---

/// Remote push provider.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Send one notification to `token`. Returns the provider's message id.
    async fn send(
        &self,
        token: &str,
        request: &NotificationRequest,
    ) -> Result<String, ChannelError>;
}

/// On-device presentation. Fire-and-forget, never retried.
pub trait LocalChannel: Send + Sync {
    fn name(&self) -> &str;

    fn present(&self, request: &NotificationRequest) -> Result<String, ChannelError>;
}

// ---

/// Latest device registration token.
///
/// Readers always see the most recent value without waiting on a refresh in
/// progress; a rotation replaces the value atomically.
#[derive(Debug, Clone)]
pub struct RegistrationToken {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl Default for RegistrationToken {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RegistrationToken {
    pub fn new(initial: Option<String>) -> Self {
        let (tx, _rx) = watch::channel(initial.filter(|t| !t.is_empty()));
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Token-rotation event. An empty token clears registration.
    pub fn rotate(&self, token: Option<String>) {
        let token = token.filter(|t| !t.is_empty());
        tracing::info!(registered = token.is_some(), "Registration token rotated");
        self.tx.send_replace(token);
    }

    /// Subscribe to rotations.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

// ---

#[derive(Debug, Serialize)]
struct PushPayload<'a> {
    token: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a serde_json::Value,
    priority: Priority,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    #[serde(alias = "messageId", alias = "name")]
    id: Option<String>,
}

/// Remote push over HTTP: posts `{token, title, body, data, priority}` as JSON.
pub struct HttpPushChannel {
    client: reqwest::Client,
    url: String,
}

impl HttpPushChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl RemoteChannel for HttpPushChannel {
    fn name(&self) -> &str {
        "http-push"
    }

    async fn send(
        &self,
        token: &str,
        request: &NotificationRequest,
    ) -> Result<String, ChannelError> {
        // ---
        let payload = PushPayload {
            token,
            title: &request.title,
            body: &request.body,
            data: &request.data,
            priority: request.priority,
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ChannelError::Rejected(format!("{status}: {text}")));
        }

        // Providers that answer 2xx without a body still accepted the message
        let text = response.text().await?;
        let id = serde_json::from_str::<PushResponse>(&text).ok().and_then(|r| r.id);
        Ok(id.unwrap_or_else(|| request.id.clone()))
    }
}

// ---

/// A notification presented on the local channel.
#[derive(Debug, Clone, Serialize)]
pub struct PresentedNotification {
    pub id: String,
    pub request: NotificationRequest,
    pub presented_at: DateTime<Utc>,
}

/// Local channel that keeps the most recent presented notifications in an
/// in-process inbox, readable by the HTTP layer.
#[derive(Debug)]
pub struct InboxChannel {
    inbox: Mutex<VecDeque<PresentedNotification>>,
    capacity: usize,
}

impl Default for InboxChannel {
    fn default() -> Self {
        Self::new(200)
    }
}

impl InboxChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            inbox: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<PresentedNotification> {
        self.inbox
            .lock()
            .map(|inbox| inbox.iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}

impl LocalChannel for InboxChannel {
    fn name(&self) -> &str {
        "inbox"
    }

    fn present(&self, request: &NotificationRequest) -> Result<String, ChannelError> {
        // ---
        let mut inbox = self
            .inbox
            .lock()
            .map_err(|_| ChannelError::Local("inbox unavailable".to_string()))?;

        let id = uuid::Uuid::new_v4().to_string();
        inbox.push_back(PresentedNotification {
            id: id.clone(),
            request: request.clone(),
            presented_at: Utc::now(),
        });
        while inbox.len() > self.capacity {
            inbox.pop_front();
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_token_rotation_visible_to_readers() {
        // ---
        let token = RegistrationToken::new(Some("first".to_string()));
        let reader = token.clone();
        let rx = token.subscribe();

        token.rotate(Some("second".to_string()));
        assert_eq!(reader.current().as_deref(), Some("second"));
        assert!(rx.has_changed().unwrap());

        token.rotate(Some(String::new()));
        assert_eq!(reader.current(), None);
    }

    #[test]
    fn test_inbox_keeps_newest_within_capacity() {
        // ---
        let inbox = InboxChannel::new(2);
        for title in ["one", "two", "three"] {
            inbox.present(&NotificationRequest::new(title, "body", "test")).unwrap();
        }

        let recent = inbox.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].request.title, "three");
        assert_eq!(recent[1].request.title, "two");
    }
}
