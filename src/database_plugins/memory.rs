// ABOUTME: In-memory storage backend built on ordered maps behind a tokio RwLock
// ABOUTME: Used for tests and ephemeral runs; mirrors the SQLite backend's ordering semantics
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use peaksync_core::errors::AppResult;

use super::{IndexKey, KeyPart, KeyRange, KeyValueStore, StoreBackend, StoreRow};

#[derive(Debug)]
struct StoredRow {
    value: Value,
    indexes: Vec<(&'static str, IndexKey)>,
}

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<IndexKey, StoredRow>,
    /// index name -> (index key, primary key)
    indexes: HashMap<&'static str, BTreeSet<(IndexKey, IndexKey)>>,
}

impl Table {
    fn remove(&mut self, key: &[KeyPart]) -> bool {
        let Some(row) = self.rows.remove(key) else {
            return false;
        };
        for (index, index_key) in row.indexes {
            if let Some(entries) = self.indexes.get_mut(index) {
                entries.remove(&(index_key, key.to_vec()));
            }
        }
        true
    }

    fn insert(&mut self, row: StoreRow) {
        self.remove(&row.key);
        for (index, index_key) in &row.indexes {
            self.indexes
                .entry(*index)
                .or_default()
                .insert((index_key.clone(), row.key.clone()));
        }
        self.rows.insert(
            row.key,
            StoredRow {
                value: row.value,
                indexes: row.indexes,
            },
        );
    }

    /// Primary keys in `range` of `index`, in index order
    fn scan(&self, index: &str, range: &KeyRange) -> Vec<IndexKey> {
        let Some(entries) = self.indexes.get(index) else {
            return Vec::new();
        };
        let mut start = range.prefix.clone();
        start.extend(range.lower.clone());
        entries
            .range((Bound::Included((start, Vec::new())), Bound::Unbounded))
            .take_while(|(index_key, _)| index_key.starts_with(&range.prefix))
            .filter(|(index_key, _)| range.contains(index_key))
            .map(|(_, key)| key.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Table>,
    kv: HashMap<String, Value>,
}

/// Process-local store; clones share the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn get(&self, store: &str, key: &[KeyPart]) -> AppResult<Option<Value>> {
        let state = self.state.read().await;
        Ok(state
            .tables
            .get(store)
            .and_then(|table| table.rows.get(key))
            .map(|row| row.value.clone()))
    }

    async fn put_many(&self, store: &str, rows: Vec<StoreRow>) -> AppResult<()> {
        let mut state = self.state.write().await;
        let table = state.tables.entry(store.to_owned()).or_default();
        for row in rows {
            table.insert(row);
        }
        Ok(())
    }

    async fn delete(&self, store: &str, key: &[KeyPart]) -> AppResult<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .tables
            .get_mut(store)
            .is_some_and(|table| table.remove(key)))
    }

    async fn query(&self, store: &str, index: &str, range: &KeyRange) -> AppResult<Vec<Value>> {
        let state = self.state.read().await;
        let Some(table) = state.tables.get(store) else {
            return Ok(Vec::new());
        };
        Ok(table
            .scan(index, range)
            .iter()
            .filter_map(|key| table.rows.get(key))
            .map(|row| row.value.clone())
            .collect())
    }

    async fn delete_range(&self, store: &str, index: &str, range: &KeyRange) -> AppResult<usize> {
        let mut state = self.state.write().await;
        let Some(table) = state.tables.get_mut(store) else {
            return Ok(0);
        };
        let keys = table.scan(index, range);
        Ok(keys.iter().filter(|key| table.remove(key)).count())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_value(&self, key: &str) -> AppResult<Option<Value>> {
        Ok(self.state.read().await.kv.get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: &Value) -> AppResult<()> {
        self.state
            .write()
            .await
            .kv
            .insert(key.to_owned(), value.clone());
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> AppResult<()> {
        self.state.write().await.kv.remove(key);
        Ok(())
    }
}
