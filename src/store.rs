//! Key-value persistence for schedule state, threshold snapshots and
//! delivery-health summaries.
//!
//! The engine only needs read-your-writes consistency within one process, so
//! the contract is a plain string key-value store. [`MemoryStore`] backs tests
//! and database-less runs; [`PgStore`] persists into the `kv_store` table
//! created by [`crate::schema::create_schema`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::error::StoreError;

// ---

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

impl<'a> dyn KeyValueStore + 'a {
    /// Read and decode a JSON value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        // ---
        let Some(raw) = self.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw).map(Some).map_err(|source| StoreError::Codec {
            key: key.to_string(),
            source,
        })
    }

    /// Encode and write a JSON value.
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        // ---
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Codec {
            key: key.to_string(),
            source,
        })?;
        self.set(key, raw).await
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// PostgreSQL-backed store over the `kv_store` table.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueStore for PgStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        // ---
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv_store WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_store_read_after_write() {
        // ---
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        assert_eq!(store.get("missing").await.unwrap(), None);

        store.set_json("numbers", &vec![1, 2, 3]).await.unwrap();
        let numbers: Option<Vec<i32>> = store.get_json("numbers").await.unwrap();
        assert_eq!(numbers, Some(vec![1, 2, 3]));

        store.remove("numbers").await.unwrap();
        assert_eq!(store.get("numbers").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_value_is_codec_error() {
        // ---
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store.set("schedules", "{not json".to_string()).await.unwrap();

        let result = store.get_json::<Vec<String>>("schedules").await;
        assert!(matches!(result, Err(StoreError::Codec { .. })));
    }
}
