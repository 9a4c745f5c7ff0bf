//! Database schema management for `waterwatch-engine`.
//!
//! Ensures the key-value table backing [`crate::store::PgStore`] exists before
//! the engine starts. Applied once on startup from `main.rs` (EMBP: single
//! gateway call), and only when `DATABASE_URL` is configured.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the `kv_store` table that holds schedule state, the threshold
/// snapshot and delivery-health summaries. Safe to call on every startup.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_store (
            key         TEXT        PRIMARY KEY,
            value       TEXT        NOT NULL,
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Operators look up recently touched keys when diagnosing restarts
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_kv_store_updated_at
            ON kv_store (updated_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
