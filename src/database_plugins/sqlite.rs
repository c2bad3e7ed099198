// ABOUTME: SQLite storage backend using sqlx with order-preserving encoded composite keys
// ABOUTME: Documents live in `records`, secondary index entries in `record_indexes`, bookkeeping in `kv`
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! SQLite storage backend
//!
//! Composite keys are stored as text produced by
//! [`encode_key`](super::encode_key), so SQLite's bytewise string
//! comparison orders rows exactly like the in-memory backend.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info};

use peaksync_core::errors::{AppError, AppResult};

use super::{encode_key, KeyPart, KeyRange, KeyValueStore, StoreBackend, StoreRow};

/// Persistent store over a SQLite database
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

fn db_error(context: &str) -> impl Fn(sqlx::Error) -> AppError + '_ {
    move |e| AppError::database(format!("{context}: {e}"))
}

fn parse_body(body: &str) -> AppResult<Value> {
    serde_json::from_str(body)
        .map_err(|e| AppError::serialization(format!("corrupt stored document: {e}")))
}

impl SqliteStore {
    /// Connect and create the schema
    ///
    /// # Errors
    ///
    /// Returns a database error if the connection or schema creation fails
    pub async fn new(database_url: &str) -> AppResult<Self> {
        let in_memory = database_url.contains(":memory:");
        // Ensure SQLite creates the database file if it doesn't exist
        let connection_url = if in_memory || database_url.contains('?') {
            database_url.to_owned()
        } else {
            format!("{database_url}?mode=rwc")
        };

        // An in-memory database exists per connection, so it must never be
        // recycled or shared across more than one connection
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = options
            .connect(&connection_url)
            .await
            .map_err(db_error("failed to open SQLite database"))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(in_memory, "SQLite store initialized");
        Ok(store)
    }

    /// Underlying pool
    #[must_use]
    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Create tables and indexes
    ///
    /// # Errors
    ///
    /// Returns a database error if a statement fails
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS records (
                store TEXT NOT NULL,
                pk TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (store, pk)
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(db_error("failed to create records table"))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS record_indexes (
                store TEXT NOT NULL,
                index_name TEXT NOT NULL,
                index_key TEXT NOT NULL,
                pk TEXT NOT NULL,
                PRIMARY KEY (store, index_name, index_key, pk)
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(db_error("failed to create record_indexes table"))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_record_indexes_pk ON record_indexes(store, pk)")
            .execute(&self.pool)
            .await
            .map_err(db_error("failed to create record_indexes pk index"))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(db_error("failed to create kv table"))?;

        debug!("SQLite schema ready");
        Ok(())
    }

    async fn matching_keys(
        &self,
        store: &str,
        index: &str,
        range: &KeyRange,
    ) -> AppResult<Vec<String>> {
        let (start, end) = range.encoded_bounds();
        let rows = sqlx::query(
            r"
            SELECT pk FROM record_indexes
            WHERE store = ? AND index_name = ? AND index_key >= ? AND index_key < ?
            ORDER BY index_key, pk
            ",
        )
        .bind(store)
        .bind(index)
        .bind(&start)
        .bind(&end)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("failed to scan index"))?;
        Ok(rows.iter().map(|row| row.get("pk")).collect())
    }
}

#[async_trait]
impl StoreBackend for SqliteStore {
    async fn get(&self, store: &str, key: &[KeyPart]) -> AppResult<Option<Value>> {
        let row = sqlx::query("SELECT body FROM records WHERE store = ? AND pk = ?")
            .bind(store)
            .bind(encode_key(key))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("failed to read record"))?;
        row.map(|row| parse_body(row.get("body"))).transpose()
    }

    async fn put_many(&self, store: &str, rows: Vec<StoreRow>) -> AppResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("failed to begin transaction"))?;

        for row in rows {
            let pk = encode_key(&row.key);
            let body = serde_json::to_string(&row.value)?;

            sqlx::query("DELETE FROM record_indexes WHERE store = ? AND pk = ?")
                .bind(store)
                .bind(&pk)
                .execute(&mut *tx)
                .await
                .map_err(db_error("failed to clear index entries"))?;

            sqlx::query("INSERT OR REPLACE INTO records (store, pk, body) VALUES (?, ?, ?)")
                .bind(store)
                .bind(&pk)
                .bind(&body)
                .execute(&mut *tx)
                .await
                .map_err(db_error("failed to write record"))?;

            for (index, index_key) in &row.indexes {
                sqlx::query(
                    "INSERT OR REPLACE INTO record_indexes (store, index_name, index_key, pk) VALUES (?, ?, ?, ?)",
                )
                .bind(store)
                .bind(*index)
                .bind(encode_key(index_key))
                .bind(&pk)
                .execute(&mut *tx)
                .await
                .map_err(db_error("failed to write index entry"))?;
            }
        }

        tx.commit()
            .await
            .map_err(db_error("failed to commit transaction"))
    }

    async fn delete(&self, store: &str, key: &[KeyPart]) -> AppResult<bool> {
        let pk = encode_key(key);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("failed to begin transaction"))?;

        sqlx::query("DELETE FROM record_indexes WHERE store = ? AND pk = ?")
            .bind(store)
            .bind(&pk)
            .execute(&mut *tx)
            .await
            .map_err(db_error("failed to delete index entries"))?;

        let result = sqlx::query("DELETE FROM records WHERE store = ? AND pk = ?")
            .bind(store)
            .bind(&pk)
            .execute(&mut *tx)
            .await
            .map_err(db_error("failed to delete record"))?;

        tx.commit()
            .await
            .map_err(db_error("failed to commit transaction"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn query(&self, store: &str, index: &str, range: &KeyRange) -> AppResult<Vec<Value>> {
        let (start, end) = range.encoded_bounds();
        let rows = sqlx::query(
            r"
            SELECT r.body FROM record_indexes i
            JOIN records r ON r.store = i.store AND r.pk = i.pk
            WHERE i.store = ? AND i.index_name = ? AND i.index_key >= ? AND i.index_key < ?
            ORDER BY i.index_key, i.pk
            ",
        )
        .bind(store)
        .bind(index)
        .bind(&start)
        .bind(&end)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("failed to query index"))?;

        rows.iter().map(|row| parse_body(row.get("body"))).collect()
    }

    async fn delete_range(&self, store: &str, index: &str, range: &KeyRange) -> AppResult<usize> {
        let keys = self.matching_keys(store, index, range).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("failed to begin transaction"))?;
        let mut deleted = 0;
        for pk in &keys {
            sqlx::query("DELETE FROM record_indexes WHERE store = ? AND pk = ?")
                .bind(store)
                .bind(pk)
                .execute(&mut *tx)
                .await
                .map_err(db_error("failed to delete index entries"))?;
            let result = sqlx::query("DELETE FROM records WHERE store = ? AND pk = ?")
                .bind(store)
                .bind(pk)
                .execute(&mut *tx)
                .await
                .map_err(db_error("failed to delete record"))?;
            if result.rows_affected() > 0 {
                deleted += 1;
            }
        }
        tx.commit()
            .await
            .map_err(db_error("failed to commit transaction"))?;
        Ok(deleted)
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get_value(&self, key: &str) -> AppResult<Option<Value>> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("failed to read kv entry"))?;
        row.map(|row| parse_body(row.get("value"))).transpose()
    }

    async fn set_value(&self, key: &str, value: &Value) -> AppResult<()> {
        sqlx::query("INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(serde_json::to_string(value)?)
            .execute(&self.pool)
            .await
            .map_err(db_error("failed to write kv entry"))?;
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_error("failed to delete kv entry"))?;
        Ok(())
    }
}
