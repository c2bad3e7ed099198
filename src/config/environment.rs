// ABOUTME: Environment configuration for the sync engine: storage, remote, limiter, pool and peak settings
// ABOUTME: Every value has a typed default; malformed values are rejected as configuration errors
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Environment-based configuration

use std::env;
use std::fmt::{self, Display};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use peaksync_core::errors::{AppError, AppResult};
use peaksync_intelligence::{GapPolicy, PeakConfig};
use peaksync_providers::{
    initialize_shared_client, HttpSource, RetryPolicy, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
    MIN_PAGE_SIZE,
};

use crate::rate_limiting::RateLimiterSpec;
use crate::worker_pool::{default_max_workers, WorkerPoolConfig, DEFAULT_JOB_TIMEOUT};

/// Default remote provider label
pub const DEFAULT_REMOTE_NAME: &str = "strava";

/// Default remote API base URL
pub const DEFAULT_REMOTE_BASE_URL: &str = "https://www.strava.com/api/v3";

/// Default seconds between sync passes of one athlete
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// Default number of concurrent local manifest tasks
pub const DEFAULT_LOCAL_CONCURRENCY: usize = 4;

/// Storage location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseUrl {
    /// Process-local maps, nothing persisted
    Memory,
    /// SQLite database file
    SQLite {
        /// Database file path
        path: PathBuf,
    },
    /// SQLite in-memory database
    SQLiteMemory,
}

impl DatabaseUrl {
    /// Parse from string with validation
    ///
    /// # Errors
    ///
    /// Returns a config error for empty or unsupported URLs
    pub fn parse_url(s: &str) -> AppResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AppError::config("database URL must not be empty"));
        }
        if s == "memory" {
            return Ok(Self::Memory);
        }
        if let Some(path) = s.strip_prefix("sqlite:") {
            if path == ":memory:" {
                return Ok(Self::SQLiteMemory);
            }
            if path.is_empty() {
                return Err(AppError::config("sqlite URL is missing a path"));
            }
            return Ok(Self::SQLite {
                path: PathBuf::from(path),
            });
        }
        if s.contains("://") {
            return Err(AppError::config(format!("unsupported database URL: {s}")));
        }
        // Fallback: treat as SQLite file path
        Ok(Self::SQLite {
            path: PathBuf::from(s),
        })
    }

    /// Convert to connection string
    #[must_use]
    pub fn to_connection_string(&self) -> String {
        match self {
            Self::Memory => "memory".to_owned(),
            Self::SQLite { path } => format!("sqlite:{}", path.display()),
            Self::SQLiteMemory => "sqlite::memory:".to_owned(),
        }
    }

    /// Whether data is lost when the process exits
    #[must_use]
    pub const fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Memory | Self::SQLiteMemory)
    }
}

impl Default for DatabaseUrl {
    fn default() -> Self {
        Self::SQLiteMemory
    }
}

impl Display for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_connection_string())
    }
}

/// Remote activity source settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Provider label used in logs and errors
    pub name: String,
    /// API base URL
    pub base_url: String,
    /// Bearer token, if any
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    /// Activities per listing page
    pub page_size: usize,
    /// Whole-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_REMOTE_NAME.to_owned(),
            base_url: DEFAULT_REMOTE_BASE_URL.to_owned(),
            access_token: None,
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl RemoteConfig {
    /// HTTP source for these settings. The first call also fixes the
    /// timeouts of the shared client.
    #[must_use]
    pub fn http_source(&self) -> HttpSource {
        initialize_shared_client(self.request_timeout_secs, self.connect_timeout_secs);
        HttpSource::new(
            self.name.clone(),
            self.base_url.clone(),
            self.access_token.clone().unwrap_or_default(),
        )
    }
}

/// Periodic sync loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLoopConfig {
    /// Idle sleep between passes of the periodic runner
    pub interval: Duration,
    /// Local manifest tasks run concurrently within one pass
    pub local_concurrency: usize,
    /// Timeout of one worker pool job
    pub job_timeout: Duration,
}

impl Default for SyncLoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            local_concurrency: DEFAULT_LOCAL_CONCURRENCY,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }
}

/// Complete sync engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Storage backend
    pub database: DatabaseUrl,
    /// Remote source
    pub remote: RemoteConfig,
    /// Limiters gating remote requests
    pub rate_limits: Vec<RateLimiterSpec>,
    /// Retry policy for transient remote failures
    pub retry: RetryPolicy,
    /// Worker pool sizing
    pub worker_pool: WorkerPoolConfig,
    /// Periodic runner and concurrency
    pub sync: SyncLoopConfig,
    /// Peak periods and gap handling
    pub peaks: PeakConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database: DatabaseUrl::default(),
            remote: RemoteConfig::default(),
            rate_limits: RateLimiterSpec::strava_defaults(),
            retry: RetryPolicy::default(),
            worker_pool: WorkerPoolConfig::default(),
            sync: SyncLoopConfig::default(),
            peaks: PeakConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns a config error naming the first malformed variable
    pub fn from_env() -> AppResult<Self> {
        info!("Loading configuration from environment variables");
        let defaults = Self::default();

        let database = match env::var("PEAKSYNC_DATABASE_URL") {
            Ok(raw) => DatabaseUrl::parse_url(&raw)?,
            Err(_) => defaults.database,
        };

        let remote = RemoteConfig {
            name: env_var_or("PEAKSYNC_REMOTE_NAME", DEFAULT_REMOTE_NAME),
            base_url: env_var_or("PEAKSYNC_REMOTE_BASE_URL", DEFAULT_REMOTE_BASE_URL),
            access_token: env::var("PEAKSYNC_ACCESS_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty()),
            page_size: parse_env("PEAKSYNC_PAGE_SIZE", defaults.remote.page_size)?,
            request_timeout_secs: parse_env(
                "PEAKSYNC_HTTP_TIMEOUT_SECS",
                defaults.remote.request_timeout_secs,
            )?,
            connect_timeout_secs: parse_env(
                "PEAKSYNC_HTTP_CONNECT_TIMEOUT_SECS",
                defaults.remote.connect_timeout_secs,
            )?,
        };

        let rate_limits = match env::var("PEAKSYNC_RATE_LIMITS") {
            Ok(raw) => parse_rate_limits(&raw)?,
            Err(_) => defaults.rate_limits,
        };

        let retry = RetryPolicy {
            max_retries: parse_env("PEAKSYNC_RETRY_MAX_ATTEMPTS", defaults.retry.max_retries)?,
            base_delay_ms: parse_env(
                "PEAKSYNC_RETRY_BASE_DELAY_MS",
                defaults.retry.base_delay_ms,
            )?,
        };

        let worker_pool = WorkerPoolConfig {
            max_workers: parse_env("PEAKSYNC_MAX_WORKERS", default_max_workers())?,
            idle_timeout: Duration::from_millis(parse_env(
                "PEAKSYNC_WORKER_IDLE_TIMEOUT_MS",
                duration_ms(defaults.worker_pool.idle_timeout),
            )?),
            poll_interval: Duration::from_millis(parse_env(
                "PEAKSYNC_WORKER_POLL_MS",
                duration_ms(defaults.worker_pool.poll_interval),
            )?),
        };

        let sync = SyncLoopConfig {
            interval: Duration::from_secs(parse_env(
                "PEAKSYNC_SYNC_INTERVAL_SECS",
                defaults.sync.interval.as_secs(),
            )?),
            local_concurrency: parse_env(
                "PEAKSYNC_LOCAL_CONCURRENCY",
                defaults.sync.local_concurrency,
            )?,
            job_timeout: Duration::from_secs(parse_env(
                "PEAKSYNC_JOB_TIMEOUT_SECS",
                defaults.sync.job_timeout.as_secs(),
            )?),
        };

        let mut peaks = defaults.peaks;
        if let Ok(raw) = env::var("PEAKSYNC_POWER_PERIODS") {
            peaks.power_periods = parse_periods("PEAKSYNC_POWER_PERIODS", &raw)?;
        }
        if let Ok(raw) = env::var("PEAKSYNC_HEART_RATE_PERIODS") {
            peaks.heart_rate_periods = parse_periods("PEAKSYNC_HEART_RATE_PERIODS", &raw)?;
        }
        if let Ok(raw) = env::var("PEAKSYNC_PACE_DISTANCES") {
            peaks.pace_distances = parse_periods("PEAKSYNC_PACE_DISTANCES", &raw)?;
        }
        if let Ok(raw) = env::var("PEAKSYNC_POWER_GAP_POLICY") {
            peaks.power_gaps.gap_policy = parse_gap_policy("PEAKSYNC_POWER_GAP_POLICY", &raw)?;
        }
        if let Ok(raw) = env::var("PEAKSYNC_HEART_RATE_GAP_POLICY") {
            peaks.heart_rate_gaps.gap_policy =
                parse_gap_policy("PEAKSYNC_HEART_RATE_GAP_POLICY", &raw)?;
        }
        if let Ok(raw) = env::var("PEAKSYNC_PACE_GAP_POLICY") {
            peaks.pace_gaps.gap_policy = parse_gap_policy("PEAKSYNC_PACE_GAP_POLICY", &raw)?;
        }

        let config = Self {
            database,
            remote,
            rate_limits,
            retry,
            worker_pool,
            sync,
            peaks,
        };
        config.validate()?;
        info!(
            database = %config.database,
            remote = %config.remote.name,
            limiters = config.rate_limits.len(),
            max_workers = config.worker_pool.max_workers,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Reject values the engine cannot run with
    ///
    /// # Errors
    ///
    /// Returns a config error describing the first invalid value
    pub fn validate(&self) -> AppResult<()> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.remote.page_size) {
            return Err(AppError::config(format!(
                "page size {} outside {MIN_PAGE_SIZE}..={MAX_PAGE_SIZE}",
                self.remote.page_size
            )));
        }
        if self.remote.base_url.trim().is_empty() {
            return Err(AppError::config("remote base URL must not be empty"));
        }
        for spec in &self.rate_limits {
            spec.validate()?;
        }
        if self.worker_pool.max_workers == 0 {
            return Err(AppError::config("max workers must be at least 1"));
        }
        if self.worker_pool.poll_interval.is_zero() {
            return Err(AppError::config("worker poll interval must be positive"));
        }
        if self.sync.local_concurrency == 0 {
            return Err(AppError::config("local concurrency must be at least 1"));
        }
        if self.sync.job_timeout.is_zero() {
            return Err(AppError::config("job timeout must be positive"));
        }
        Ok(())
    }
}

fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T>(key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::config(format!("Invalid {key} value {raw:?}: {e}"))),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Parse a comma-separated list of positive periods
///
/// # Errors
///
/// Returns a config error for empty lists, non-numbers or non-positive values
pub fn parse_periods(key: &str, raw: &str) -> AppResult<Vec<f64>> {
    let periods = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v > 0.0)
                .ok_or_else(|| AppError::config(format!("Invalid {key} entry {s:?}")))
        })
        .collect::<AppResult<Vec<_>>>()?;
    if periods.is_empty() {
        return Err(AppError::config(format!("{key} must list at least one period")));
    }
    Ok(periods)
}

/// Parse a gap policy name (`zero` or `interpolate`)
///
/// # Errors
///
/// Returns a config error for unknown names
pub fn parse_gap_policy(key: &str, raw: &str) -> AppResult<GapPolicy> {
    match raw.trim().to_lowercase().as_str() {
        "zero" => Ok(GapPolicy::Zero),
        "interpolate" => Ok(GapPolicy::Interpolate),
        other => Err(AppError::config(format!(
            "Invalid {key} value {other:?}: expected zero or interpolate"
        ))),
    }
}

/// Parse limiter specs of the form `label:limit/period_ms[:spread]`, comma separated
///
/// # Errors
///
/// Returns a config error for malformed entries
pub fn parse_rate_limits(raw: &str) -> AppResult<Vec<RateLimiterSpec>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_rate_limit)
        .collect()
}

fn parse_rate_limit(entry: &str) -> AppResult<RateLimiterSpec> {
    let invalid = || {
        AppError::config(format!(
            "Invalid rate limit {entry:?}: expected label:limit/period_ms[:spread]"
        ))
    };
    let mut parts = entry.split(':');
    let label = parts.next().map(str::trim).ok_or_else(invalid)?;
    let quota = parts.next().ok_or_else(invalid)?;
    let spread = match parts.next().map(str::trim) {
        None => false,
        Some("spread") => true,
        Some(_) => return Err(invalid()),
    };
    if parts.next().is_some() {
        return Err(invalid());
    }
    let (limit, period) = quota.split_once('/').ok_or_else(invalid)?;
    let limit: u32 = limit.trim().parse().map_err(|_| invalid())?;
    let period_ms: i64 = period.trim().parse().map_err(|_| invalid())?;

    let mut spec = RateLimiterSpec::new(label, limit, period_ms);
    spec.spread = spread;
    spec.validate()?;
    Ok(spec)
}
