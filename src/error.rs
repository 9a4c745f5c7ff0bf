//! Typed failures for the alert engine.
//!
//! Each stage of the evaluate → dedup → dispatch → record pipeline reports its
//! failures through one of these enums instead of logging and swallowing them.
//! The binary edge (`main.rs`, `config.rs`) converts them into `anyhow` errors.

use thiserror::Error;

/// Failure reading or writing the key-value persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to (de)serialize stored value for '{key}': {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure of a single delivery attempt on one channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("no device registration token available")]
    MissingToken,

    #[error("attempt timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider rejected notification: {0}")]
    Rejected(String),

    #[error("local notification failed: {0}")]
    Local(String),
}

/// Outcome of a dispatch that did not reach the user on any channel.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Both the remote chain (if attempted) and the local fallback failed.
    #[error(
        "all channels exhausted (remote: {}, local: {local})",
        .remote.as_deref().unwrap_or("skipped")
    )]
    Exhausted {
        remote: Option<String>,
        local: String,
    },

    /// Shutdown was requested while the remote retry loop was backing off.
    #[error("dispatch cancelled during shutdown")]
    Cancelled,
}
