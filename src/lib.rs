//! Water-quality alert evaluation and notification dispatch engine.
//!
//! Readings are evaluated against a threshold profile, deduplicated inside a
//! sliding window, turned into alerts and delivered through a remote push
//! channel with retry, falling back to a local inbox. Recurring reminders and
//! delivery health tracking run alongside.
//!
//! Modules are wired together explicitly in [`app::App`]; `main.rs` only loads
//! configuration, picks a store and serves [`routes::router`].

pub mod app;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod generator;
pub mod health;
pub mod messages;
pub mod models;
pub mod pipeline;
pub mod poller;
pub mod routes;
pub mod schedule;
pub mod schema;
pub mod signature;
pub mod store;
pub mod thresholds;

pub use app::App;
pub use config::Config;
pub use error::{ChannelError, DispatchError, StoreError};
pub use models::{Alert, NotificationRequest, RawReading, Reading};
pub use pipeline::{AlertEngine, ProcessReport};
