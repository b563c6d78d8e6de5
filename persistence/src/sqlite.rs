//! SQLite-backed [`Persistence`] implementation: the same connection-pool
//! setup (WAL journal, busy timeout, foreign keys) and the same
//! atomic-`UPDATE ... WHERE` pattern used for task claiming, adapted here to
//! implement compare-and-set over a generic key-value row rather than a
//! single task-claim column.

use async_trait::async_trait;
use chrono::Utc;
use marcus_core::collaborators::{Persistence, StreamRecord};
use marcus_core::error::{MarcusError, Result};
use sqlx::{migrate::MigrateDatabase, Row, Sqlite, SqlitePool};

use crate::common::{parse_json, sqlx_error_to_marcus_error};

#[derive(Debug, Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Connect to `database_url` (a file path or `:memory:`), creating the
    /// database file if it does not already exist.
    pub async fn new(database_url: &str) -> Result<Self> {
        let db_url = if database_url.starts_with(":memory:") || database_url.starts_with("sqlite://") {
            database_url.to_string()
        } else {
            format!("sqlite://{database_url}")
        };

        if !db_url.contains(":memory:") && !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            Sqlite::create_database(&db_url).await.map_err(|e| {
                MarcusError::PersistenceError(format!("failed to create database: {e}"))
            })?;
        }

        let connect_options = if db_url.contains(":memory:") {
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(&db_url)
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Memory)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
        } else {
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(db_url.replace("sqlite://", ""))
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
        };

        let pool = SqlitePool::connect_with(connect_options).await.map_err(sqlx_error_to_marcus_error)?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(|e| MarcusError::PersistenceError(format!("migration failed: {e}")))?;
        tracing::info!("persistence migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn kv_get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_marcus_error)?;
        row.map(|r| parse_json(r.get::<String, _>("value").as_str())).transpose()
    }

    async fn kv_put(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let now = Utc::now();
        let raw = value.to_string();
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(raw)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_marcus_error)?;
        Ok(())
    }

    async fn kv_cas(
        &self,
        key: &str,
        expected: Option<serde_json::Value>,
        new_value: serde_json::Value,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_marcus_error)?;

        let current_row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(sqlx_error_to_marcus_error)?;
        let current = current_row.map(|r| parse_json(r.get::<String, _>("value").as_str())).transpose()?;

        if current != expected {
            tx.rollback().await.map_err(sqlx_error_to_marcus_error)?;
            return Ok(false);
        }

        let now = Utc::now();
        let raw = new_value.to_string();
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(raw)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(sqlx_error_to_marcus_error)?;

        tx.commit().await.map_err(sqlx_error_to_marcus_error)?;
        Ok(true)
    }

    async fn kv_delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_marcus_error)?;
        Ok(())
    }

    async fn kv_list_prefix(&self, prefix: &str) -> Result<Vec<(String, serde_json::Value)>> {
        let like_pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query("SELECT key, value FROM kv_store WHERE key LIKE ? ESCAPE '\\' ORDER BY key")
            .bind(like_pattern)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_marcus_error)?;
        rows.into_iter()
            .map(|r| {
                let key: String = r.get("key");
                let value = parse_json(r.get::<String, _>("value").as_str())?;
                Ok((key, value))
            })
            .collect()
    }

    async fn append(&self, stream: &str, payload: serde_json::Value) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_marcus_error)?;

        let next_seq: i64 = sqlx::query("SELECT COALESCE(MAX(seq), -1) + 1 AS next_seq FROM event_stream WHERE stream = ?")
            .bind(stream)
            .fetch_one(&mut *tx)
            .await
            .map_err(sqlx_error_to_marcus_error)?
            .get("next_seq");

        let now = Utc::now();
        let raw = payload.to_string();
        sqlx::query("INSERT INTO event_stream (stream, seq, payload, created_at) VALUES (?, ?, ?, ?)")
            .bind(stream)
            .bind(next_seq)
            .bind(raw)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(sqlx_error_to_marcus_error)?;

        tx.commit().await.map_err(sqlx_error_to_marcus_error)?;
        Ok(next_seq as u64)
    }

    async fn read_stream(&self, stream: &str, from_seq: u64) -> Result<Vec<StreamRecord>> {
        let rows = sqlx::query("SELECT seq, payload FROM event_stream WHERE stream = ? AND seq >= ? ORDER BY seq ASC")
            .bind(stream)
            .bind(from_seq as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_marcus_error)?;
        rows.into_iter()
            .map(|r| {
                let seq: i64 = r.get("seq");
                let payload = parse_json(r.get::<String, _>("payload").as_str())?;
                Ok(StreamRecord { seq: seq as u64, payload })
            })
            .collect()
    }
}
