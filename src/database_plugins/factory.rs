// ABOUTME: Storage factory selecting the in-memory or SQLite backend from a database URL
// ABOUTME: Wraps both behind one enum that implements the store and key-value contracts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Storage factory
//!
//! `memory` selects the process-local [`MemoryStore`]; any `sqlite:` URL,
//! including `sqlite::memory:`, selects [`SqliteStore`].

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use peaksync_core::errors::AppResult;

use super::memory::MemoryStore;
use super::sqlite::SqliteStore;
use super::{KeyPart, KeyRange, KeyValueStore, StoreBackend, StoreRow};
use crate::config::environment::DatabaseUrl;

/// Storage instance wrapper that delegates to the selected backend
#[derive(Debug, Clone)]
pub enum Database {
    /// Process-local maps
    Memory(MemoryStore),
    /// SQLite via sqlx
    SQLite(SqliteStore),
}

impl Database {
    /// Open the backend described by `url`
    ///
    /// # Errors
    ///
    /// Returns a database error if the SQLite connection or schema setup fails
    pub async fn new(url: &DatabaseUrl) -> AppResult<Self> {
        let database = match url {
            DatabaseUrl::Memory => Self::Memory(MemoryStore::new()),
            DatabaseUrl::SQLite { .. } | DatabaseUrl::SQLiteMemory => {
                Self::SQLite(SqliteStore::new(&url.to_connection_string()).await?)
            }
        };
        info!(backend = database.backend_info(), "storage initialized");
        Ok(database)
    }

    /// Descriptive backend name for logging
    #[must_use]
    pub const fn backend_info(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::SQLite(_) => "sqlite",
        }
    }
}

#[async_trait]
impl StoreBackend for Database {
    async fn get(&self, store: &str, key: &[KeyPart]) -> AppResult<Option<Value>> {
        match self {
            Self::Memory(db) => db.get(store, key).await,
            Self::SQLite(db) => db.get(store, key).await,
        }
    }

    async fn put_many(&self, store: &str, rows: Vec<StoreRow>) -> AppResult<()> {
        match self {
            Self::Memory(db) => db.put_many(store, rows).await,
            Self::SQLite(db) => db.put_many(store, rows).await,
        }
    }

    async fn delete(&self, store: &str, key: &[KeyPart]) -> AppResult<bool> {
        match self {
            Self::Memory(db) => db.delete(store, key).await,
            Self::SQLite(db) => db.delete(store, key).await,
        }
    }

    async fn query(&self, store: &str, index: &str, range: &KeyRange) -> AppResult<Vec<Value>> {
        match self {
            Self::Memory(db) => db.query(store, index, range).await,
            Self::SQLite(db) => db.query(store, index, range).await,
        }
    }

    async fn delete_range(&self, store: &str, index: &str, range: &KeyRange) -> AppResult<usize> {
        match self {
            Self::Memory(db) => db.delete_range(store, index, range).await,
            Self::SQLite(db) => db.delete_range(store, index, range).await,
        }
    }
}

#[async_trait]
impl KeyValueStore for Database {
    async fn get_value(&self, key: &str) -> AppResult<Option<Value>> {
        match self {
            Self::Memory(db) => db.get_value(key).await,
            Self::SQLite(db) => db.get_value(key).await,
        }
    }

    async fn set_value(&self, key: &str, value: &Value) -> AppResult<()> {
        match self {
            Self::Memory(db) => db.set_value(key, value).await,
            Self::SQLite(db) => db.set_value(key, value).await,
        }
    }

    async fn delete_value(&self, key: &str) -> AppResult<()> {
        match self {
            Self::Memory(db) => db.delete_value(key).await,
            Self::SQLite(db) => db.delete_value(key).await,
        }
    }
}
