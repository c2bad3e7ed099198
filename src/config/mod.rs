// ABOUTME: Configuration module for the sync engine
// ABOUTME: Re-exports the environment-driven SyncConfig and its component settings
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Configuration
//!
//! Configuration is environment-only. [`SyncConfig::from_env`] reads every
//! `PEAKSYNC_*` variable, falls back to typed defaults, and rejects malformed
//! values as configuration errors.

/// Environment variable parsing and typed settings
pub mod environment;

pub use environment::{DatabaseUrl, RemoteConfig, SyncConfig, SyncLoopConfig};
