// ABOUTME: Integration tests for the sync manifest graph
// ABOUTME: Covers validation, taint propagation, error backoff, and dependent clearing
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use peaksync::constants::sync::{
    MANIFEST_ACTIVITY_STATS, MANIFEST_ATHLETE_SETTINGS, MANIFEST_EXTRA_STREAMS, MANIFEST_FETCH,
    MANIFEST_PEAKS, PROCESSOR_LOCAL, PROCESSOR_STREAMS,
};
use peaksync::errors::ErrorCode;
use peaksync::models::{ActivitySyncState, SyncManifest};
use peaksync::sync::{NextManifest, SyncManifestGraph};

const NOW: i64 = 1_000_000;
const BASE: i64 = 1_000;

fn chain() -> SyncManifestGraph {
    SyncManifestGraph::new(vec![
        SyncManifest::new("p", "a", 1, BASE),
        SyncManifest::new("p", "b", 1, BASE).depends_on(["a"]),
        SyncManifest::new("p", "c", 1, BASE).depends_on(["b"]),
    ])
    .unwrap()
}

fn runnable_name<'a>(next: &NextManifest<'a>) -> Option<&'a str> {
    match next {
        NextManifest::Runnable(manifest) => Some(manifest.name.as_str()),
        _ => None,
    }
}

#[test]
fn test_pending_dependency_taints_dependents() {
    let graph = chain();
    let state = ActivitySyncState::default();

    let next = graph.next_available_manifest("p", &state, NOW).unwrap();
    assert_eq!(runnable_name(&next), Some("a"));
}

#[test]
fn test_completed_dependent_stays_tainted_while_dependency_pending() {
    let graph = chain();
    let mut state = ActivitySyncState::default();
    for name in ["a", "b", "c"] {
        graph.set_sync_success(&mut state, "p", name, false).unwrap();
    }

    // "b" keeps its completed version while "a" and "c" go pending
    graph.clear_sync_state(&mut state, "p", "a", true).unwrap();
    graph.clear_sync_state(&mut state, "p", "c", true).unwrap();
    assert!(state.get("p", "b").unwrap().has_success(1));
    assert!(!graph.is_synced("p", &state).unwrap());

    let next = graph.next_available_manifest("p", &state, NOW).unwrap();
    assert_eq!(runnable_name(&next), Some("a"));

    // a failing "a" must not let the tainted tail run
    graph.set_sync_error(&mut state, "p", "a", NOW, "boom").unwrap();
    let next = graph.next_available_manifest("p", &state, NOW).unwrap();
    assert!(matches!(next, NextManifest::NotYetAvailable { manifest, .. } if manifest.name == "a"));

    graph.set_sync_success(&mut state, "p", "a", true).unwrap();
    let next = graph.next_available_manifest("p", &state, NOW).unwrap();
    assert_eq!(runnable_name(&next), Some("c"));
    assert!(!graph.is_synced("p", &state).unwrap());
}

#[test]
fn test_dependents_become_runnable_in_order() {
    let graph = chain();
    let mut state = ActivitySyncState::default();

    graph.set_sync_success(&mut state, "p", "a", false).unwrap();
    let next = graph.next_available_manifest("p", &state, NOW).unwrap();
    assert_eq!(runnable_name(&next), Some("b"));

    graph.set_sync_success(&mut state, "p", "b", false).unwrap();
    graph.set_sync_success(&mut state, "p", "c", false).unwrap();
    assert_eq!(
        graph.next_available_manifest("p", &state, NOW).unwrap(),
        NextManifest::Synced
    );
    assert!(graph.is_synced("p", &state).unwrap());
}

#[test]
fn test_first_pending_candidate_waits_on_backoff() {
    let graph = SyncManifestGraph::new(vec![
        SyncManifest::new("p", "a", 1, BASE),
        SyncManifest::new("p", "b", 1, BASE).depends_on(["a"]),
        SyncManifest::new("p", "x", 1, BASE),
    ])
    .unwrap();
    let mut state = ActivitySyncState::default();
    graph.set_sync_error(&mut state, "p", "a", NOW, "boom").unwrap();

    // "a" is still the first pending candidate even though "x" is untainted
    let next = graph.next_available_manifest("p", &state, NOW).unwrap();
    assert!(matches!(next, NextManifest::NotYetAvailable { manifest, .. } if manifest.name == "a"));
}

#[test]
fn test_backoff_doubles_with_each_failure() {
    let graph = chain();
    let mut state = ActivitySyncState::default();

    graph.set_sync_error(&mut state, "p", "a", NOW, "first").unwrap();
    match graph.next_available_manifest("p", &state, NOW).unwrap() {
        NextManifest::NotYetAvailable { retry_at, .. } => assert_eq!(retry_at, NOW + 2 * BASE),
        other => panic!("expected backoff, got {other:?}"),
    }
    let next = graph
        .next_available_manifest("p", &state, NOW + 2 * BASE)
        .unwrap();
    assert_eq!(runnable_name(&next), Some("a"));

    graph.set_sync_error(&mut state, "p", "a", NOW, "second").unwrap();
    graph.set_sync_error(&mut state, "p", "a", NOW, "third").unwrap();
    match graph.next_available_manifest("p", &state, NOW).unwrap() {
        NextManifest::NotYetAvailable { retry_at, .. } => assert_eq!(retry_at, NOW + 8 * BASE),
        other => panic!("expected backoff, got {other:?}"),
    }
    let next = graph
        .next_available_manifest("p", &state, NOW + 8 * BASE - 1)
        .unwrap();
    assert!(matches!(next, NextManifest::NotYetAvailable { .. }));
}

#[test]
fn test_success_resets_backoff() {
    let graph = chain();
    let mut state = ActivitySyncState::default();
    graph.set_sync_error(&mut state, "p", "a", NOW, "boom").unwrap();
    graph.set_sync_success(&mut state, "p", "a", false).unwrap();

    let a = state.get("p", "a").unwrap();
    assert!(a.has_success(1));
    assert_eq!(a.error, None);
}

#[test]
fn test_success_clears_dependents_without_errors() {
    let graph = chain();
    let mut state = ActivitySyncState::default();
    for name in ["a", "b", "c"] {
        graph.set_sync_success(&mut state, "p", name, false).unwrap();
    }
    graph.set_sync_error(&mut state, "p", "c", NOW, "boom").unwrap();

    graph.set_sync_success(&mut state, "p", "a", false).unwrap();
    assert_eq!(state.get("p", "b").unwrap().version, None);
    // an active error survives so its backoff still applies
    assert!(state.get("p", "c").unwrap().has_error());

    let next = graph.next_available_manifest("p", &state, NOW).unwrap();
    assert_eq!(runnable_name(&next), Some("b"));
}

#[test]
fn test_success_without_recursion_keeps_dependents() {
    let graph = chain();
    let mut state = ActivitySyncState::default();
    for name in ["a", "b", "c"] {
        graph.set_sync_success(&mut state, "p", name, false).unwrap();
    }
    graph.set_sync_success(&mut state, "p", "a", true).unwrap();
    assert!(graph.is_synced("p", &state).unwrap());
}

#[test]
fn test_clear_keeps_error_count() {
    let graph = chain();
    let mut state = ActivitySyncState::default();
    graph.set_sync_error(&mut state, "p", "a", NOW, "one").unwrap();
    graph.set_sync_error(&mut state, "p", "a", NOW, "two").unwrap();
    graph.set_sync_success(&mut state, "p", "b", false).unwrap();

    graph.clear_sync_state(&mut state, "p", "a", false).unwrap();
    let a = state.get("p", "a").unwrap();
    assert_eq!(a.version, None);
    assert!(!a.has_error());
    assert_eq!(a.error.as_ref().map(|e| e.count), Some(2));
    assert_eq!(state.get("p", "b").unwrap().version, None);

    // cleared manifests run immediately
    let next = graph.next_available_manifest("p", &state, NOW).unwrap();
    assert_eq!(runnable_name(&next), Some("a"));
}

#[test]
fn test_version_bump_reruns_manifest() {
    let mut state = ActivitySyncState::default();
    chain()
        .set_sync_success(&mut state, "p", "a", false)
        .unwrap();

    let bumped = SyncManifestGraph::new(vec![
        SyncManifest::new("p", "a", 2, BASE),
        SyncManifest::new("p", "b", 1, BASE).depends_on(["a"]),
        SyncManifest::new("p", "c", 1, BASE).depends_on(["b"]),
    ])
    .unwrap();
    let next = bumped.next_available_manifest("p", &state, NOW).unwrap();
    assert_eq!(runnable_name(&next), Some("a"));
    assert_ne!(chain().fingerprint(), bumped.fingerprint());
}

#[test]
fn test_invalid_graphs_are_rejected() {
    let cases = vec![
        vec![
            SyncManifest::new("p", "a", 1, BASE).depends_on(["b"]),
            SyncManifest::new("p", "b", 1, BASE).depends_on(["a"]),
        ],
        vec![
            SyncManifest::new("p", "a", 1, BASE),
            SyncManifest::new("p", "a", 1, BASE),
        ],
        vec![SyncManifest::new("p", "a", 1, BASE).depends_on(["missing"])],
        vec![SyncManifest::new("p", "a", 0, BASE)],
        vec![SyncManifest::new("p", "a", 1, -1)],
        vec![SyncManifest::new("", "a", 1, BASE)],
    ];
    for manifests in cases {
        let err = SyncManifestGraph::new(manifests).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigError);
    }
}

#[test]
fn test_unknown_names_are_invalid_input() {
    let graph = chain();
    let mut state = ActivitySyncState::default();
    let err = graph
        .set_sync_success(&mut state, "p", "nope", false)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);
    let err = graph
        .next_available_manifest("other", &state, NOW)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);
}

#[test]
fn test_default_graph_pipeline() {
    let graph = SyncManifestGraph::default_graph().unwrap();
    let processors: Vec<&str> = graph.processors().collect();
    assert_eq!(processors, vec![PROCESSOR_STREAMS, PROCESSOR_LOCAL]);
    assert_eq!(
        graph.requirements(PROCESSOR_LOCAL).unwrap(),
        &[PROCESSOR_STREAMS.to_owned()]
    );

    let mut state = ActivitySyncState::default();
    assert!(!graph.requirements_met(PROCESSOR_LOCAL, &state).unwrap());

    graph
        .set_sync_success(&mut state, PROCESSOR_STREAMS, MANIFEST_FETCH, false)
        .unwrap();
    assert!(graph.requirements_met(PROCESSOR_LOCAL, &state).unwrap());

    let mut order = Vec::new();
    while let NextManifest::Runnable(manifest) = graph
        .next_available_manifest(PROCESSOR_LOCAL, &state, NOW)
        .unwrap()
    {
        order.push(manifest.name.clone());
        let name = manifest.name.clone();
        graph
            .set_sync_success(&mut state, PROCESSOR_LOCAL, &name, false)
            .unwrap();
    }
    assert_eq!(
        order,
        vec![
            MANIFEST_ATHLETE_SETTINGS,
            MANIFEST_EXTRA_STREAMS,
            MANIFEST_PEAKS,
            MANIFEST_ACTIVITY_STATS,
        ]
    );
    assert!(graph.is_synced(PROCESSOR_LOCAL, &state).unwrap());
}

#[test]
fn test_require_rejects_unknown_and_self() {
    let graph = chain();
    assert_eq!(
        graph.clone().require("p", "p").unwrap_err().code,
        ErrorCode::ConfigError
    );
    assert_eq!(
        graph.require("p", "ghost").unwrap_err().code,
        ErrorCode::ConfigError
    );
}
