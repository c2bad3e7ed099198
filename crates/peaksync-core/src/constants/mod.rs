// ABOUTME: Constants module with domain-separated organization
// ABOUTME: Peak periods, gap thresholds, sync manifest names, and limiter defaults
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Constants module
//!
//! Constants are grouped into logical domains rather than being in a single
//! flat namespace.

/// Candidate periods for peak extraction
pub mod peaks {
    /// Time periods (seconds) for power and heart-rate peaks
    pub const TIME_PERIODS: [f64; 11] = [
        5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0, 10800.0,
    ];

    /// Distances (metres) for pace peaks
    pub const DISTANCE_PERIODS: [f64; 8] = [
        400.0, 1000.0, 1609.344, 3000.0, 5000.0, 10000.0, 21097.5, 42195.0,
    ];

    /// Shortest window for which normalized power is reported
    pub const NP_MIN_PERIOD_SECS: f64 = 300.0;

    /// Shortest window for which effective (xPower) power is reported
    pub const XP_MIN_PERIOD_SECS: f64 = 300.0;

    /// Smoothing window for normalized power
    pub const NP_SMOOTHING_SECS: f64 = 30.0;

    /// Exponential time constant for effective power
    pub const XP_TIME_CONSTANT_SECS: f64 = 25.0;
}

/// Sampling gap handling for rolling windows
pub mod gaps {
    /// Expected spacing between samples
    pub const IDEAL_GAP: f64 = 1.0;

    /// Gaps longer than this are treated as dropouts instead of jitter
    pub const MAX_GAP: f64 = 4.0;
}

/// Activity stream names as used by the remote provider
pub mod streams {
    /// Seconds since activity start
    pub const TIME: &str = "time";
    /// Power in watts
    pub const WATTS: &str = "watts";
    /// Heart rate in bpm
    pub const HEARTRATE: &str = "heartrate";
    /// Cumulative distance in metres
    pub const DISTANCE: &str = "distance";
    /// Smoothed speed in m/s
    pub const VELOCITY_SMOOTH: &str = "velocity_smooth";
    /// Cadence (rpm or spm)
    pub const CADENCE: &str = "cadence";
    /// Altitude in metres
    pub const ALTITUDE: &str = "altitude";
    /// Derived moving mask (1.0 moving, 0.0 stopped)
    pub const ACTIVE: &str = "active";
}

/// Processor and manifest names of the default sync graph
pub mod sync {
    /// Remote stream fetching processor
    pub const PROCESSOR_STREAMS: &str = "streams";
    /// Local analysis processor
    pub const PROCESSOR_LOCAL: &str = "local";

    /// Fetch raw streams from the provider
    pub const MANIFEST_FETCH: &str = "fetch";
    /// Snapshot athlete settings onto the activity
    pub const MANIFEST_ATHLETE_SETTINGS: &str = "athlete-settings";
    /// Derive secondary streams
    pub const MANIFEST_EXTRA_STREAMS: &str = "extra-streams";
    /// Extract peak efforts
    pub const MANIFEST_PEAKS: &str = "peaks";
    /// Compute activity summary statistics
    pub const MANIFEST_ACTIVITY_STATS: &str = "activity-stats";

    /// Backoff base for remote manifests (ms)
    pub const STREAMS_ERROR_BACKOFF_MS: i64 = 60_000;
    /// Backoff base for local manifests (ms)
    pub const LOCAL_ERROR_BACKOFF_MS: i64 = 30_000;

    /// Key-value slot holding the graph fingerprint
    pub const GRAPH_VERSION_KEY: &str = "sync/graph-version";

    /// Remote pause after a quota rejection without `Retry-After` (seconds)
    pub const RATE_LIMIT_PAUSE_SECS: u64 = 15 * 60;
}

/// Remote quota defaults (Strava-style stacked limits)
pub mod rate_limits {
    /// Requests allowed per 15 minute window
    pub const FIFTEEN_MINUTE_LIMIT: u32 = 100;
    /// 15 minutes in milliseconds
    pub const FIFTEEN_MINUTE_PERIOD_MS: i64 = 15 * 60 * 1000;
    /// Requests allowed per day
    pub const DAILY_LIMIT: u32 = 1000;
    /// One day in milliseconds
    pub const DAILY_PERIOD_MS: i64 = 24 * 3600 * 1000;
    /// Key-value prefix for persisted limiter state
    pub const STATE_KEY_PREFIX: &str = "rate-limiter/";
}

/// Physiological calculation constants
pub mod metrics {
    /// TSS scaling factor (`hours x IF^2 x 100`)
    pub const TSS_BASE_MULTIPLIER: f64 = 100.0;
    /// Speed below which an athlete is considered stopped (m/s)
    pub const MOVING_SPEED_THRESHOLD: f64 = 0.1;
}
