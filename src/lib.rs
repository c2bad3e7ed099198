// ABOUTME: Main library entry point for the peaksync activity synchronization engine
// ABOUTME: Incremental rate-limited activity sync with rolling-window peak extraction
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # peaksync
//!
//! Keeps a local copy of an athlete's activities in sync with a
//! rate-limited remote and derives per-activity analytics from the
//! downloaded sample streams.
//!
//! ## Architecture
//!
//! - **Sync**: a validated graph of processors and manifests decides, per
//!   activity, what to run next; failures back off exponentially
//! - **Rate limiting**: stacked persistent windows gate every remote call
//! - **Worker pool**: elastic OS-thread pool for CPU-bound analysis
//! - **Intelligence**: rolling-window peak extraction and activity stats
//! - **Storage**: generic repositories over in-memory or `SQLite` backends
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use peaksync::config::SyncConfig;
//! use peaksync::errors::AppResult;
//! use peaksync::models::Athlete;
//! use peaksync::sync::SyncOrchestrator;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> AppResult<()> {
//!     let config = SyncConfig::from_env()?;
//!     let source = Arc::new(config.remote.http_source());
//!     let orchestrator = SyncOrchestrator::from_config(&config, source).await?;
//!
//!     let athlete = Athlete {
//!         id: 42,
//!         name: "Ada".to_owned(),
//!         ftp: Some(250.0),
//!         weight_kg: Some(60.0),
//!         sync_enabled: true,
//!     };
//!     let summary = orchestrator
//!         .sync_athlete(&athlete, &CancellationToken::new())
//!         .await?;
//!     println!("ran {} tasks", summary.tasks_run);
//!     Ok(())
//! }
//! ```

pub use peaksync_core::{constants, errors, models};
pub use peaksync_intelligence as intelligence;
pub use peaksync_providers as providers;

/// Wall-clock abstraction
pub mod clock;

/// Environment-based configuration
pub mod config;

/// Storage backends and generic repositories
pub mod database_plugins;

/// Structured logging setup
pub mod logging;

/// Persistent windowed rate limiters
pub mod rate_limiting;

/// Manifest graph, handlers and the sync orchestrator
pub mod sync;

/// Elastic thread pool for CPU-bound jobs
pub mod worker_pool;
