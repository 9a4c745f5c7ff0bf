//! Application entry point for the `waterwatch` alert engine service.
//!
//! This binary orchestrates the startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Choosing persistence (PostgreSQL when `DATABASE_URL` is set, memory otherwise)
//! - Creating the database schema if it does not exist
//! - Building the engine services and starting background work
//! - Binding the Axum HTTP server and serving until Ctrl-C
//!
//! # Environment Variables
//! - `DATABASE_URL` (optional) – PostgreSQL connection string; in-memory store when unset
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `SENSOR_API_URL` (optional) – reading feed to poll; poller disabled when unset
//! - `API_MAX_PAGES` (optional) – page limit per poll (default: 100)
//! - `POLL_INTERVAL_SECS` (optional) – poll period (default: 60)
//! - `PUSH_API_URL` (optional) – remote push endpoint; local-only delivery when unset
//! - `PUSH_REGISTRATION_TOKEN` (optional) – initial device token
//! - `WATER_PROFILE` (optional) – `freshwater` (default) or `saltwater`
//! - `DEDUP_WINDOW_SECS` / `DEDUP_CLEANUP_SECS` / `DEDUP_MAX_ENTRIES` (optional) – 300 / 60 / 10
//! - `PUSH_MAX_ATTEMPTS` / `PUSH_BACKOFF_MS` / `PUSH_TIMEOUT_MS` (optional) – 3 / 500 / 10000
//! - `FAILURE_ALERT_THRESHOLD` (optional) – failures before the operator signal (default: 10)
//! - `FORECAST_REMINDER_AT` / `REPORT_REMINDER_AT` (optional) – `HH:MM`, 07:00 / 18:00
//! - `MONITORING_INTERVAL_HOURS` (optional) – monitoring reminder period (default: 4)
//! - `LISTEN_PORT` (optional) – HTTP port (default: 8080)
//! - `WATERWATCH_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `WATERWATCH_SPAN_EVENTS` (optional) – span event mode for tracing
use std::{env, net::SocketAddr, sync::Arc};

use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

use waterwatch_engine::store::{KeyValueStore, MemoryStore, PgStore};
use waterwatch_engine::{config, routes, schema, App, Config};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let store = open_store(&cfg).await?;

    let app = Arc::new(App::build(cfg, store));
    app.start().await;

    let router: Router = routes::router(app.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], app.config.listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app.stop().await;
    Ok(())
}

/// PostgreSQL-backed store when configured, otherwise process memory.
async fn open_store(cfg: &Config) -> Result<Arc<dyn KeyValueStore>> {
    // ---
    let Some(db_url) = &cfg.db_url else {
        tracing::warn!("DATABASE_URL not set, state will not survive a restart");
        return Ok(Arc::new(MemoryStore::new()));
    };

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;
    Ok(Arc::new(PgStore::new(pool)))
}

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `WATERWATCH_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, else the `WATERWATCH_LOG_LEVEL` env var
///
/// Call once at startup before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("WATERWATCH_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("WATERWATCH_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
