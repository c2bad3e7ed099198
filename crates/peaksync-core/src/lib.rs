// ABOUTME: Core types and constants for the peaksync activity synchronization engine
// ABOUTME: Foundation crate with error handling, data models, and sync state records
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # Peaksync Core
//!
//! Foundation crate providing shared types and constants for the peaksync
//! workspace. This crate is designed to change infrequently, enabling
//! incremental compilation benefits in the workspace.
//!
//! ## Modules
//!
//! - **errors**: Unified error handling with `AppError`, `ErrorCode`, and `ProviderError`
//! - **constants**: Peak periods, stream names, and sync defaults
//! - **models**: Activities, athletes, streams, peaks, manifests and sync state

/// Unified error handling system with standard error codes
pub mod errors;

/// Application constants organized by domain
pub mod constants;

/// Core data models (Activity, Athlete, StreamRecord, PeakRecord, SyncState)
pub mod models;
