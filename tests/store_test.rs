// ABOUTME: Integration tests for the storage backends and typed repositories
// ABOUTME: Runs the same range, update and key-value scenarios against memory and SQLite stores
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use std::sync::Arc;

use peaksync::config::DatabaseUrl;
use peaksync::database_plugins::{
    encode_key, indexes, Database, KeyPart, KeyRange, KeyValueStore, MemoryStore, Repository,
    SqliteStore, StoreBackend,
};
use peaksync::models::{
    Activity, ActivityBasetype, PeakExtra, PeakRecord, PeakType, StreamRecord, StreamType,
};
use serde_json::json;

fn activity(id: i64, athlete_id: i64, start: i64) -> Activity {
    Activity::new(id, athlete_id, start, ActivityBasetype::Ride, format!("Ride {id}"))
}

fn peak(activity_id: i64, period: f64, value: f64, timestamp: i64) -> PeakRecord {
    PeakRecord {
        activity_id,
        athlete_id: 7,
        basetype: ActivityBasetype::Ride,
        peak_type: PeakType::Power,
        period,
        value,
        rank: None,
        timestamp,
        extra: PeakExtra::default(),
    }
}

fn ids(activities: &[Activity]) -> Vec<i64> {
    activities.iter().map(|a| a.id).collect()
}

async fn exercise_activity_ranges(backend: Arc<dyn StoreBackend>) {
    let activities: Repository<Activity> = Repository::new(backend);
    activities
        .put_many(&[
            activity(3, 7, 3_000),
            activity(1, 7, 1_000),
            activity(2, 7, 2_000),
            activity(9, 8, 1_500),
        ])
        .await
        .unwrap();

    let athlete = KeyRange::prefix([KeyPart::from(7_i64)]);
    let all = activities.query(indexes::ATHLETE_TS, &athlete).await.unwrap();
    assert_eq!(ids(&all), vec![1, 2, 3]);

    let from = activities
        .query(indexes::ATHLETE_TS, &athlete.clone().lower(2_000_i64))
        .await
        .unwrap();
    assert_eq!(ids(&from), vec![2, 3]);

    let until = activities
        .query(indexes::ATHLETE_TS, &athlete.clone().upper(2_000_i64))
        .await
        .unwrap();
    assert_eq!(ids(&until), vec![1, 2]);

    let between = activities
        .query(
            indexes::ATHLETE_TS,
            &athlete.clone().lower(1_500_i64).upper(2_500_i64),
        )
        .await
        .unwrap();
    assert_eq!(ids(&between), vec![2]);

    let removed = activities
        .delete_range(indexes::ATHLETE_TS, &athlete)
        .await
        .unwrap();
    assert_eq!(removed, 3);
    assert!(activities
        .query(indexes::ATHLETE_TS, &athlete)
        .await
        .unwrap()
        .is_empty());
    assert!(activities.get(&[KeyPart::from(9_i64)]).await.unwrap().is_some());
}

async fn exercise_updates(backend: Arc<dyn StoreBackend>) {
    let activities: Repository<Activity> = Repository::new(backend);
    let key = [KeyPart::from(1_i64)];

    assert!(activities.insert_if_absent(&activity(1, 7, 1_000)).await.unwrap());
    let mut renamed = activity(1, 7, 1_000);
    renamed.name = "Duplicate".to_owned();
    assert!(!activities.insert_if_absent(&renamed).await.unwrap());
    assert_eq!(activities.get(&key).await.unwrap().unwrap().name, "Ride 1");

    let updated = activities
        .update(&key, |a| {
            a.peaks_exclude = true;
            a.start_time_ms = 5_000;
        })
        .await
        .unwrap()
        .unwrap();
    assert!(updated.peaks_exclude);

    // the moved entity must not linger under its old index key
    let athlete = KeyRange::prefix([KeyPart::from(7_i64)]);
    let stored = activities.query(indexes::ATHLETE_TS, &athlete).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].start_time_ms, 5_000);
    assert!(activities
        .query(indexes::ATHLETE_TS, &athlete.upper(4_000_i64))
        .await
        .unwrap()
        .is_empty());

    let missing = activities
        .update(&[KeyPart::from(404_i64)], |a| a.peaks_exclude = true)
        .await
        .unwrap();
    assert!(missing.is_none());

    assert!(activities.delete(&key).await.unwrap());
    assert!(!activities.delete(&key).await.unwrap());
}

async fn exercise_peaks_and_streams(backend: Arc<dyn StoreBackend>) {
    let peaks: Repository<PeakRecord> = Repository::new(Arc::clone(&backend));
    peaks
        .put_many(&[
            peak(1, 5.0, 300.0, 2_000),
            peak(2, 5.0, 320.0, 1_000),
            peak(2, 60.0, 250.0, 1_000),
        ])
        .await
        .unwrap();

    let five = KeyRange::prefix([
        KeyPart::from(7_i64),
        KeyPart::from(PeakType::Power.as_str()),
        KeyPart::from(5.0),
    ]);
    let found = peaks
        .query(indexes::ATHLETE_TYPE_PERIOD_TS, &five)
        .await
        .unwrap();
    let by_time: Vec<i64> = found.iter().map(|p| p.activity_id).collect();
    assert_eq!(by_time, vec![2, 1]);

    let of_activity = KeyRange::prefix([KeyPart::from(2_i64)]);
    assert_eq!(
        peaks.delete_range(indexes::ACTIVITY, &of_activity).await.unwrap(),
        2
    );
    let left = peaks
        .query(indexes::ATHLETE_TYPE_PERIOD_TS, &five)
        .await
        .unwrap();
    assert_eq!(left.len(), 1);

    let streams: Repository<StreamRecord> = Repository::new(backend);
    streams
        .put_many(&[
            StreamRecord {
                activity_id: 1,
                stream: StreamType::Time,
                data: vec![0.0, 1.0],
            },
            StreamRecord {
                activity_id: 1,
                stream: StreamType::Watts,
                data: vec![100.0, 110.0],
            },
        ])
        .await
        .unwrap();
    let records = streams
        .query(indexes::ACTIVITY, &KeyRange::prefix([KeyPart::from(1_i64)]))
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
}

async fn exercise_key_values(kv: Arc<dyn KeyValueStore>) {
    assert_eq!(kv.get_value("missing").await.unwrap(), None);
    kv.set_value("limiter", &json!({"count": 3})).await.unwrap();
    kv.set_value("limiter", &json!({"count": 4})).await.unwrap();
    assert_eq!(
        kv.get_value("limiter").await.unwrap(),
        Some(json!({"count": 4}))
    );
    kv.delete_value("limiter").await.unwrap();
    assert_eq!(kv.get_value("limiter").await.unwrap(), None);
}

#[tokio::test]
async fn test_memory_store() {
    exercise_activity_ranges(Arc::new(MemoryStore::new())).await;
    exercise_updates(Arc::new(MemoryStore::new())).await;
    exercise_peaks_and_streams(Arc::new(MemoryStore::new())).await;
    exercise_key_values(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_sqlite_memory_store() {
    exercise_activity_ranges(Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap())).await;
    exercise_updates(Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap())).await;
    exercise_peaks_and_streams(Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap())).await;
    exercise_key_values(Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap())).await;
}

#[tokio::test]
async fn test_sqlite_file_store_persists() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("peaks.db").display());

    {
        let store = SqliteStore::new(&url).await.unwrap();
        let activities: Repository<Activity> = Repository::new(Arc::new(store.clone()));
        activities.put(&activity(1, 7, 1_000)).await.unwrap();
        store.set_value("graph", &json!("v1")).await.unwrap();
        store.pool().close().await;
    }

    let reopened = SqliteStore::new(&url).await.unwrap();
    let activities: Repository<Activity> = Repository::new(Arc::new(reopened.clone()));
    assert!(activities.get(&[KeyPart::from(1_i64)]).await.unwrap().is_some());
    assert_eq!(reopened.get_value("graph").await.unwrap(), Some(json!("v1")));
}

#[tokio::test]
async fn test_database_factory_selects_backend() {
    let memory = Database::new(&DatabaseUrl::Memory).await.unwrap();
    assert_eq!(memory.backend_info(), "memory");
    let sqlite = Database::new(&DatabaseUrl::SQLiteMemory).await.unwrap();
    assert_eq!(sqlite.backend_info(), "sqlite");
    exercise_key_values(Arc::new(sqlite)).await;
}

#[test]
fn test_key_encoding_preserves_order() {
    let keys = [
        vec![KeyPart::from(-5_i64)],
        vec![KeyPart::from(0_i64)],
        vec![KeyPart::from(3_i64)],
        vec![KeyPart::from(3_i64), KeyPart::from("a")],
        vec![KeyPart::from(-1.5)],
        vec![KeyPart::from(2.0)],
        vec![KeyPart::from("power")],
        vec![KeyPart::from("pace")],
    ];
    for a in &keys {
        for b in &keys {
            assert_eq!(
                a.cmp(b),
                encode_key(a).cmp(&encode_key(b)),
                "{a:?} vs {b:?}"
            );
        }
    }
}
