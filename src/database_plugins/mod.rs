// ABOUTME: Storage abstraction with composite-key indexes, range queries and a key-value side table
// ABOUTME: Generic Repository<E> maps typed entities onto in-memory or SQLite backends
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Storage Layer
//!
//! Every persisted entity lives in a named store keyed by a composite
//! primary key. Entities declare secondary indexes through an
//! [`EntityDescriptor`]; each index maps an entity to a composite
//! [`IndexKey`] that supports range queries of the form "fixed prefix plus
//! optional inclusive bounds on the next component".
//!
//! Backends only see JSON documents and encoded keys, which keeps
//! [`StoreBackend`] object safe. [`Repository`] adds typing and a per-key
//! async mutex so read-modify-write cycles on one record are linearized.

use std::cmp::Ordering;
use std::fmt::{self, Display, Write as _};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use peaksync_core::errors::{AppError, AppResult};
use peaksync_core::models::{Activity, Athlete, PeakRecord, StreamRecord};

pub mod factory;
pub mod memory;
pub mod sqlite;

pub use factory::Database;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Index names shared by entity descriptors and callers
pub mod indexes {
    /// Activities by `[athlete_id, start_time_ms]`
    pub const ATHLETE_TS: &str = "athlete-ts";
    /// Streams and peaks by `[activity_id]`
    pub const ACTIVITY: &str = "activity";
    /// Peaks by `[athlete_id, peak_type, period, timestamp]`
    pub const ATHLETE_TYPE_PERIOD_TS: &str = "athlete-type-period-ts";
}

/// One component of a composite key
///
/// Components of different kinds order `Int < Float < Text`; floats use
/// IEEE total ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeyPart {
    /// Integer component
    Int(i64),
    /// Floating point component
    Float(f64),
    /// Text component
    Text(String),
}

impl KeyPart {
    const fn rank(&self) -> u8 {
        match self {
            Self::Int(_) => 0,
            Self::Float(_) => 1,
            Self::Text(_) => 2,
        }
    }

    /// Append the order-preserving text encoding of this component.
    ///
    /// Encoded components compare bytewise in the same order as the parts
    /// themselves, and each ends in `.` so no encoding is a prefix of
    /// another.
    fn encode_into(&self, out: &mut String) {
        match self {
            Self::Int(v) => {
                let biased = (*v as u64) ^ (1 << 63);
                let _ = write!(out, "1{biased:016x}.");
            }
            Self::Float(v) => {
                let bits = v.to_bits();
                let ordered = if bits & (1 << 63) == 0 {
                    bits | (1 << 63)
                } else {
                    !bits
                };
                let _ = write!(out, "2{ordered:016x}.");
            }
            Self::Text(s) => {
                out.push('3');
                for byte in s.as_bytes() {
                    let _ = write!(out, "{byte:02x}");
                }
                out.push('.');
            }
        }
    }
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyPart {}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for KeyPart {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Composite key, compared lexicographically
pub type IndexKey = Vec<KeyPart>;

/// Order-preserving text encoding of a composite key
#[must_use]
pub fn encode_key(key: &[KeyPart]) -> String {
    let mut out = String::with_capacity(key.len() * 18);
    for part in key {
        part.encode_into(&mut out);
    }
    out
}

/// Range over an index: a fixed prefix plus optional inclusive bounds on
/// the component that follows it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    /// Components every matching key starts with
    pub prefix: IndexKey,
    /// Inclusive lower bound on the component after the prefix
    pub lower: Option<KeyPart>,
    /// Inclusive upper bound on the component after the prefix
    pub upper: Option<KeyPart>,
}

impl KeyRange {
    /// Every key starting with `prefix`
    #[must_use]
    pub fn prefix(prefix: impl IntoIterator<Item = KeyPart>) -> Self {
        Self {
            prefix: prefix.into_iter().collect(),
            lower: None,
            upper: None,
        }
    }

    /// Restrict the next component to `>= lower`
    #[must_use]
    pub fn lower(mut self, lower: impl Into<KeyPart>) -> Self {
        self.lower = Some(lower.into());
        self
    }

    /// Restrict the next component to `<= upper`
    #[must_use]
    pub fn upper(mut self, upper: impl Into<KeyPart>) -> Self {
        self.upper = Some(upper.into());
        self
    }

    /// Whether `key` falls inside this range
    #[must_use]
    pub fn contains(&self, key: &[KeyPart]) -> bool {
        if !key.starts_with(&self.prefix) {
            return false;
        }
        let next = key.get(self.prefix.len());
        if let Some(lower) = &self.lower {
            if next.is_none_or(|part| part < lower) {
                return false;
            }
        }
        if let Some(upper) = &self.upper {
            if next.is_none_or(|part| part > upper) {
                return false;
            }
        }
        true
    }

    /// Encoded `[start, end)` bounds for backends that compare encoded keys
    #[must_use]
    pub fn encoded_bounds(&self) -> (String, String) {
        let base = encode_key(&self.prefix);
        let start = self.lower.as_ref().map_or_else(
            || base.clone(),
            |lower| {
                let mut start = base.clone();
                lower.encode_into(&mut start);
                start
            },
        );
        let mut end = base;
        if let Some(upper) = &self.upper {
            upper.encode_into(&mut end);
        }
        end.push('~');
        (start, end)
    }
}

/// Static description of a persisted entity
#[derive(Debug, Clone, Copy)]
pub struct EntityDescriptor {
    /// Store (table) name
    pub store: &'static str,
    /// Secondary index names
    pub indexes: &'static [&'static str],
}

/// A typed record persisted through a [`Repository`]
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Store and index declaration
    const DESCRIPTOR: EntityDescriptor;

    /// Composite primary key
    fn primary_key(&self) -> IndexKey;

    /// Key of this entity in the named secondary index
    fn index_key(&self, index: &str) -> Option<IndexKey>;
}

/// One document ready for a backend write
#[derive(Debug, Clone)]
pub struct StoreRow {
    /// Primary key
    pub key: IndexKey,
    /// Secondary index entries
    pub indexes: Vec<(&'static str, IndexKey)>,
    /// Serialized entity
    pub value: Value,
}

impl StoreRow {
    /// Serialize an entity with all its index entries
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the entity cannot be encoded
    pub fn from_entity<E: Entity>(entity: &E) -> AppResult<Self> {
        let indexes = E::DESCRIPTOR
            .indexes
            .iter()
            .filter_map(|index| entity.index_key(index).map(|key| (*index, key)))
            .collect();
        Ok(Self {
            key: entity.primary_key(),
            indexes,
            value: serde_json::to_value(entity)?,
        })
    }
}

/// Backend contract for document stores with composite-key indexes
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Fetch one document by primary key
    async fn get(&self, store: &str, key: &[KeyPart]) -> AppResult<Option<Value>>;

    /// Insert or replace documents, rewriting their index entries
    async fn put_many(&self, store: &str, rows: Vec<StoreRow>) -> AppResult<()>;

    /// Insert or replace one document
    async fn put(&self, store: &str, row: StoreRow) -> AppResult<()> {
        self.put_many(store, vec![row]).await
    }

    /// Delete one document, returning whether it existed
    async fn delete(&self, store: &str, key: &[KeyPart]) -> AppResult<bool>;

    /// Documents whose `index` key falls in `range`, in index order
    async fn query(&self, store: &str, index: &str, range: &KeyRange) -> AppResult<Vec<Value>>;

    /// Delete every document whose `index` key falls in `range`
    async fn delete_range(&self, store: &str, index: &str, range: &KeyRange) -> AppResult<usize>;
}

/// Small JSON key-value table for bookkeeping state
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    async fn get_value(&self, key: &str) -> AppResult<Option<Value>>;

    /// Write a value
    async fn set_value(&self, key: &str, value: &Value) -> AppResult<()>;

    /// Remove a value
    async fn delete_value(&self, key: &str) -> AppResult<()>;
}

fn decode<E: Entity>(value: Value) -> AppResult<E> {
    serde_json::from_value(value).map_err(|e| {
        AppError::serialization(format!(
            "corrupt {} record: {e}",
            E::DESCRIPTOR.store
        ))
    })
}

/// Typed access to one entity store
pub struct Repository<E> {
    backend: Arc<dyn StoreBackend>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            locks: Arc::clone(&self.locks),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Repository<E> {
    /// Repository over `backend`
    #[must_use]
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            locks: Arc::new(DashMap::new()),
            _entity: PhantomData,
        }
    }

    /// Fetch by primary key
    ///
    /// # Errors
    ///
    /// Returns storage or decoding errors
    pub async fn get(&self, key: &[KeyPart]) -> AppResult<Option<E>> {
        self.backend
            .get(E::DESCRIPTOR.store, key)
            .await?
            .map(decode)
            .transpose()
    }

    /// Insert or replace one entity
    ///
    /// # Errors
    ///
    /// Returns storage or encoding errors
    pub async fn put(&self, entity: &E) -> AppResult<()> {
        self.backend
            .put(E::DESCRIPTOR.store, StoreRow::from_entity(entity)?)
            .await
    }

    /// Insert or replace many entities in one backend write
    ///
    /// # Errors
    ///
    /// Returns storage or encoding errors
    pub async fn put_many(&self, entities: &[E]) -> AppResult<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let rows = entities
            .iter()
            .map(StoreRow::from_entity)
            .collect::<AppResult<Vec<_>>>()?;
        self.backend.put_many(E::DESCRIPTOR.store, rows).await
    }

    /// Delete by primary key
    ///
    /// # Errors
    ///
    /// Returns storage errors
    pub async fn delete(&self, key: &[KeyPart]) -> AppResult<bool> {
        self.backend.delete(E::DESCRIPTOR.store, key).await
    }

    /// Range query on a secondary index
    ///
    /// # Errors
    ///
    /// Returns storage or decoding errors
    pub async fn query(&self, index: &str, range: &KeyRange) -> AppResult<Vec<E>> {
        self.backend
            .query(E::DESCRIPTOR.store, index, range)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    /// Delete every entity in a secondary index range
    ///
    /// # Errors
    ///
    /// Returns storage errors
    pub async fn delete_range(&self, index: &str, range: &KeyRange) -> AppResult<usize> {
        self.backend
            .delete_range(E::DESCRIPTOR.store, index, range)
            .await
    }

    /// Insert `entity` unless a record with its key already exists
    ///
    /// # Errors
    ///
    /// Returns storage or encoding errors
    pub async fn insert_if_absent(&self, entity: &E) -> AppResult<bool> {
        let key = entity.primary_key();
        let lock = self.lock_for(&key);
        let guard = lock.lock().await;
        let result = match self.get(&key).await {
            Ok(Some(_)) => Ok(false),
            Ok(None) => self.put(entity).await.map(|()| true),
            Err(e) => Err(e),
        };
        drop(guard);
        self.release(&key, lock);
        result
    }

    /// Atomically read, modify and write one record.
    ///
    /// Concurrent updates of the same key through this repository are
    /// serialized; `mutate` always sees the latest stored value. Returns the
    /// updated entity, or `None` when no record exists.
    ///
    /// # Errors
    ///
    /// Returns storage, encoding or decoding errors
    pub async fn update<F>(&self, key: &[KeyPart], mutate: F) -> AppResult<Option<E>>
    where
        F: FnOnce(&mut E) + Send,
    {
        let lock = self.lock_for(key);
        let guard = lock.lock().await;
        let result = match self.get(key).await {
            Ok(Some(mut entity)) => {
                mutate(&mut entity);
                self.put(&entity).await.map(|()| Some(entity))
            }
            other => other,
        };
        drop(guard);
        self.release(key, lock);
        result
    }

    fn lock_for(&self, key: &[KeyPart]) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(encode_key(key))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    fn release(&self, key: &[KeyPart], lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks
            .remove_if(&encode_key(key), |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl Entity for Activity {
    const DESCRIPTOR: EntityDescriptor = EntityDescriptor {
        store: "activities",
        indexes: &[indexes::ATHLETE_TS],
    };

    fn primary_key(&self) -> IndexKey {
        vec![self.id.into()]
    }

    fn index_key(&self, index: &str) -> Option<IndexKey> {
        (index == indexes::ATHLETE_TS)
            .then(|| vec![self.athlete_id.into(), self.start_time_ms.into()])
    }
}

impl Entity for StreamRecord {
    const DESCRIPTOR: EntityDescriptor = EntityDescriptor {
        store: "streams",
        indexes: &[indexes::ACTIVITY],
    };

    fn primary_key(&self) -> IndexKey {
        vec![self.activity_id.into(), self.stream.as_str().into()]
    }

    fn index_key(&self, index: &str) -> Option<IndexKey> {
        (index == indexes::ACTIVITY).then(|| vec![self.activity_id.into()])
    }
}

impl Entity for PeakRecord {
    const DESCRIPTOR: EntityDescriptor = EntityDescriptor {
        store: "peaks",
        indexes: &[indexes::ACTIVITY, indexes::ATHLETE_TYPE_PERIOD_TS],
    };

    fn primary_key(&self) -> IndexKey {
        vec![
            self.activity_id.into(),
            self.peak_type.as_str().into(),
            self.period.into(),
        ]
    }

    fn index_key(&self, index: &str) -> Option<IndexKey> {
        match index {
            indexes::ACTIVITY => Some(vec![self.activity_id.into()]),
            indexes::ATHLETE_TYPE_PERIOD_TS => Some(vec![
                self.athlete_id.into(),
                self.peak_type.as_str().into(),
                self.period.into(),
                self.timestamp.into(),
            ]),
            _ => None,
        }
    }
}

impl Entity for Athlete {
    const DESCRIPTOR: EntityDescriptor = EntityDescriptor {
        store: "athletes",
        indexes: &[],
    };

    fn primary_key(&self) -> IndexKey {
        vec![self.id.into()]
    }

    fn index_key(&self, _index: &str) -> Option<IndexKey> {
        None
    }
}
