// ABOUTME: Unit tests for config environment functionality
// ABOUTME: Validates environment parsing, defaults, overrides, and rejection of malformed values
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use std::env;
use std::time::Duration;

use peaksync::config::{DatabaseUrl, SyncConfig};
use peaksync::errors::ErrorCode;
use peaksync::intelligence::GapPolicy;
use peaksync::sync::SyncOptions;
use serial_test::serial;

fn clear_env() {
    for (key, _) in env::vars() {
        if key.starts_with("PEAKSYNC_") {
            env::remove_var(key);
        }
    }
}

#[test]
#[serial]
fn test_defaults_without_environment() {
    clear_env();
    let config = SyncConfig::from_env().unwrap();
    assert_eq!(config, SyncConfig::default());
    assert_eq!(config.database, DatabaseUrl::SQLiteMemory);
    assert_eq!(config.rate_limits.len(), 2);
    assert!(config.remote.access_token.is_none());
}

#[test]
#[serial]
fn test_environment_overrides() {
    clear_env();
    env::set_var("PEAKSYNC_DATABASE_URL", "memory");
    env::set_var("PEAKSYNC_PAGE_SIZE", "50");
    env::set_var("PEAKSYNC_ACCESS_TOKEN", "secret-token");
    env::set_var("PEAKSYNC_RATE_LIMITS", "short:10/1000:spread");
    env::set_var("PEAKSYNC_POWER_PERIODS", "5, 60");
    env::set_var("PEAKSYNC_POWER_GAP_POLICY", "interpolate");
    env::set_var("PEAKSYNC_LOCAL_CONCURRENCY", "8");
    env::set_var("PEAKSYNC_SYNC_INTERVAL_SECS", "60");
    env::set_var("PEAKSYNC_MAX_WORKERS", "3");

    let config = SyncConfig::from_env().unwrap();
    clear_env();

    assert_eq!(config.database, DatabaseUrl::Memory);
    assert_eq!(config.remote.page_size, 50);
    assert_eq!(config.remote.access_token.as_deref(), Some("secret-token"));
    assert_eq!(config.rate_limits.len(), 1);
    assert!(config.rate_limits[0].spread);
    assert_eq!(config.peaks.power_periods, vec![5.0, 60.0]);
    assert_eq!(config.peaks.power_gaps.gap_policy, GapPolicy::Interpolate);
    assert_eq!(config.sync.local_concurrency, 8);
    assert_eq!(config.sync.interval, Duration::from_secs(60));
    assert_eq!(config.worker_pool.max_workers, 3);

    let options = SyncOptions::from(&config);
    assert_eq!(options.listing.page_size, 50);
    assert_eq!(options.local_concurrency, 8);
    assert_eq!(options.peaks.power_periods, vec![5.0, 60.0]);
}

#[test]
#[serial]
fn test_blank_token_is_ignored() {
    clear_env();
    env::set_var("PEAKSYNC_ACCESS_TOKEN", "   ");
    let config = SyncConfig::from_env().unwrap();
    clear_env();
    assert!(config.remote.access_token.is_none());
}

#[test]
#[serial]
fn test_malformed_values_are_config_errors() {
    let cases = [
        ("PEAKSYNC_PAGE_SIZE", "lots"),
        ("PEAKSYNC_PAGE_SIZE", "5000"),
        ("PEAKSYNC_LOCAL_CONCURRENCY", "0"),
        ("PEAKSYNC_MAX_WORKERS", "0"),
        ("PEAKSYNC_DATABASE_URL", "postgres://localhost/peaks"),
        ("PEAKSYNC_RATE_LIMITS", "day:0/1000"),
        ("PEAKSYNC_POWER_PERIODS", "5,abc"),
        ("PEAKSYNC_HEART_RATE_GAP_POLICY", "hold"),
        ("PEAKSYNC_JOB_TIMEOUT_SECS", "0"),
    ];
    for (key, value) in cases {
        clear_env();
        env::set_var(key, value);
        let err = SyncConfig::from_env().unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigError, "{key}={value}");
    }
    clear_env();
}

#[test]
#[serial]
fn test_parse_error_names_variable() {
    clear_env();
    env::set_var("PEAKSYNC_RETRY_MAX_ATTEMPTS", "-1");
    let err = SyncConfig::from_env().unwrap_err();
    clear_env();
    assert!(err.to_string().contains("PEAKSYNC_RETRY_MAX_ATTEMPTS"));
}

#[test]
fn test_database_url_round_trip() {
    let file = DatabaseUrl::parse_url("sqlite:./data/peaks.db").unwrap();
    assert_eq!(file.to_string(), "sqlite:./data/peaks.db");
    assert!(!file.is_ephemeral());
    assert!(DatabaseUrl::Memory.is_ephemeral());
    assert!(DatabaseUrl::SQLiteMemory.is_ephemeral());
}
