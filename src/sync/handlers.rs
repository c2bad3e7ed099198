// ABOUTME: Manifest handlers performing the work behind each sync manifest
// ABOUTME: Remote stream fetch plus the local settings, extra streams, peaks and stats derivations
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Manifest Handlers
//!
//! A [`ManifestHandler`] runs one manifest for one activity. It may write
//! side records (streams, peaks) directly, and returns an
//! [`ActivityUpdate`] that the orchestrator applies to the activity together
//! with the sync state change in a single read-modify-write.
//!
//! Remote handlers are executed one at a time behind the rate limiter group;
//! local handlers run concurrently and push CPU work onto the worker pool.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use peaksync_core::constants::sync::{
    MANIFEST_ACTIVITY_STATS, MANIFEST_ATHLETE_SETTINGS, MANIFEST_EXTRA_STREAMS, MANIFEST_FETCH,
    MANIFEST_PEAKS, PROCESSOR_LOCAL, PROCESSOR_STREAMS,
};
use peaksync_core::errors::AppResult;
use peaksync_core::models::{
    Activity, ActivityStats, Athlete, PeakRecord, PeakType, StreamRecord, StreamSet,
};
use peaksync_intelligence::{compute_activity_stats, derive_extra_streams, PeakExtractor};
use peaksync_providers::{fetch_streams, RemoteSource, RetryPolicy};

use crate::database_plugins::{indexes, KeyPart, KeyRange, Repository};
use crate::rate_limiting::RateLimiterGroup;
use crate::worker_pool::WorkerPool;

/// Shared services available to every handler
pub struct SyncContext {
    /// Activity records
    pub activities: Repository<Activity>,
    /// Stream records
    pub streams: Repository<StreamRecord>,
    /// Peak records
    pub peaks: Repository<PeakRecord>,
    /// Remote holding the athlete's data
    pub source: Arc<dyn RemoteSource>,
    /// Admission control for remote calls
    pub limiters: Arc<RateLimiterGroup>,
    /// Thread pool for CPU-bound work
    pub pool: Arc<WorkerPool>,
    /// Retry policy for transient remote failures
    pub retry: RetryPolicy,
    /// Peak extraction settings
    pub extractor: PeakExtractor,
    /// Upper bound for one worker pool job
    pub job_timeout: Duration,
    /// Serializes rank assignment across concurrent peak writers
    pub(crate) rank_lock: Mutex<()>,
}

impl SyncContext {
    /// Stored streams of one activity
    ///
    /// # Errors
    ///
    /// Returns storage errors
    pub async fn load_streams(&self, activity_id: i64) -> AppResult<StreamSet> {
        let records = self
            .streams
            .query(indexes::ACTIVITY, &activity_range(activity_id))
            .await?;
        Ok(records.into_iter().collect())
    }
}

fn activity_range(activity_id: i64) -> KeyRange {
    KeyRange::prefix([KeyPart::from(activity_id)])
}

/// Inputs of one handler run
pub struct TaskInput<'a> {
    /// Shared services
    pub ctx: &'a SyncContext,
    /// Latest stored state of the activity
    pub activity: &'a Activity,
    /// Owning athlete
    pub athlete: &'a Athlete,
    /// Cancels rate limiter waits
    pub cancel: &'a CancellationToken,
}

/// Change to apply to the activity record when a handler succeeds
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ActivityUpdate {
    /// Only the sync state changes
    #[default]
    Unchanged,
    /// Athlete settings at processing time
    AthleteSnapshot {
        /// Functional threshold power
        ftp: Option<f64>,
        /// Body weight
        weight_kg: Option<f64>,
    },
    /// Summary statistics
    Stats(ActivityStats),
}

impl ActivityUpdate {
    /// Write the change into `activity`
    pub fn apply(self, activity: &mut Activity) {
        match self {
            Self::Unchanged => {}
            Self::AthleteSnapshot { ftp, weight_kg } => {
                activity.ftp = ftp;
                activity.weight_kg = weight_kg;
            }
            Self::Stats(stats) => activity.stats = Some(stats),
        }
    }
}

/// Work behind one manifest
#[async_trait]
pub trait ManifestHandler: Send + Sync {
    /// Processor the manifest belongs to
    fn processor(&self) -> &str;

    /// Manifest name
    fn manifest(&self) -> &str;

    /// Remote handlers run sequentially behind the rate limiters
    fn is_remote(&self) -> bool {
        false
    }

    /// Run the manifest for one activity
    ///
    /// # Errors
    ///
    /// Returns remote, storage or worker errors; the orchestrator records
    /// them against the activity
    async fn run(&self, input: TaskInput<'_>) -> AppResult<ActivityUpdate>;
}

impl fmt::Debug for dyn ManifestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.processor(), self.manifest())
    }
}

/// `streams/fetch`: download raw streams and replace the stored ones
#[derive(Debug, Default)]
pub struct FetchStreamsHandler;

#[async_trait]
impl ManifestHandler for FetchStreamsHandler {
    fn processor(&self) -> &str {
        PROCESSOR_STREAMS
    }

    fn manifest(&self) -> &str {
        MANIFEST_FETCH
    }

    fn is_remote(&self) -> bool {
        true
    }

    async fn run(&self, input: TaskInput<'_>) -> AppResult<ActivityUpdate> {
        let ctx = input.ctx;
        let activity_id = input.activity.id;
        let gate = ctx.limiters.gate(input.cancel);
        let streams = fetch_streams(ctx.source.as_ref(), &gate, activity_id, &ctx.retry).await?;

        let records = streams.into_records(activity_id);
        let removed = ctx
            .streams
            .delete_range(indexes::ACTIVITY, &activity_range(activity_id))
            .await?;
        ctx.streams.put_many(&records).await?;
        debug!(
            activity_id,
            streams = records.len(),
            replaced = removed,
            "stored activity streams"
        );
        Ok(ActivityUpdate::Unchanged)
    }
}

/// `local/athlete-settings`: snapshot ftp and weight onto the activity
#[derive(Debug, Default)]
pub struct AthleteSettingsHandler;

#[async_trait]
impl ManifestHandler for AthleteSettingsHandler {
    fn processor(&self) -> &str {
        PROCESSOR_LOCAL
    }

    fn manifest(&self) -> &str {
        MANIFEST_ATHLETE_SETTINGS
    }

    async fn run(&self, input: TaskInput<'_>) -> AppResult<ActivityUpdate> {
        Ok(ActivityUpdate::AthleteSnapshot {
            ftp: input.athlete.ftp,
            weight_kg: input.athlete.weight_kg,
        })
    }
}

/// `local/extra-streams`: derive velocity and the active mask
#[derive(Debug, Default)]
pub struct ExtraStreamsHandler;

#[async_trait]
impl ManifestHandler for ExtraStreamsHandler {
    fn processor(&self) -> &str {
        PROCESSOR_LOCAL
    }

    fn manifest(&self) -> &str {
        MANIFEST_EXTRA_STREAMS
    }

    async fn run(&self, input: TaskInput<'_>) -> AppResult<ActivityUpdate> {
        let ctx = input.ctx;
        let activity_id = input.activity.id;
        let streams = ctx.load_streams(activity_id).await?;

        let derived = ctx
            .pool
            .submit(
                move || {
                    let mut streams = streams;
                    let derived = derive_extra_streams(&mut streams);
                    Ok(streams
                        .into_records(activity_id)
                        .into_iter()
                        .filter(|record| derived.contains(&record.stream))
                        .collect::<Vec<_>>())
                },
                ctx.job_timeout,
            )
            .await?;

        ctx.streams.put_many(&derived).await?;
        debug!(activity_id, derived = derived.len(), "stored derived streams");
        Ok(ActivityUpdate::Unchanged)
    }
}

/// `local/peaks`: extract peak efforts and re-rank the athlete's bests
#[derive(Debug, Default)]
pub struct PeaksHandler;

#[async_trait]
impl ManifestHandler for PeaksHandler {
    fn processor(&self) -> &str {
        PROCESSOR_LOCAL
    }

    fn manifest(&self) -> &str {
        MANIFEST_PEAKS
    }

    async fn run(&self, input: TaskInput<'_>) -> AppResult<ActivityUpdate> {
        let ctx = input.ctx;
        let activity = input.activity;
        let range = activity_range(activity.id);

        let peaks = if activity.peaks_exclude {
            Vec::new()
        } else {
            let streams = ctx.load_streams(activity.id).await?;
            let extractor = ctx.extractor.clone();
            let snapshot = activity.clone();
            ctx.pool
                .submit(
                    move || Ok(extractor.extract(&snapshot, &streams)),
                    ctx.job_timeout,
                )
                .await?
        };

        let _ranking = ctx.rank_lock.lock().await;
        let previous = ctx.peaks.query(indexes::ACTIVITY, &range).await?;
        ctx.peaks.delete_range(indexes::ACTIVITY, &range).await?;
        ctx.peaks.put_many(&peaks).await?;

        let mut groups: Vec<(PeakType, f64)> = previous
            .iter()
            .chain(&peaks)
            .map(|peak| (peak.peak_type, peak.period))
            .collect();
        groups.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
        groups.dedup_by(|a, b| a.0 == b.0 && a.1.to_bits() == b.1.to_bits());
        for (peak_type, period) in groups {
            assign_ranks(ctx, activity.athlete_id, peak_type, period).await?;
        }

        debug!(
            activity_id = activity.id,
            excluded = activity.peaks_exclude,
            peaks = peaks.len(),
            replaced = previous.len(),
            "stored activity peaks"
        );
        Ok(ActivityUpdate::Unchanged)
    }
}

/// Recompute 1-based ranks of one athlete's peaks for a type and period;
/// higher values rank first, earlier activities win ties
async fn assign_ranks(
    ctx: &SyncContext,
    athlete_id: i64,
    peak_type: PeakType,
    period: f64,
) -> AppResult<()> {
    let range = KeyRange::prefix([
        KeyPart::from(athlete_id),
        KeyPart::from(peak_type.as_str()),
        KeyPart::from(period),
    ]);
    let mut peaks = ctx
        .peaks
        .query(indexes::ATHLETE_TYPE_PERIOD_TS, &range)
        .await?;
    peaks.sort_by(|a, b| {
        b.value
            .total_cmp(&a.value)
            .then(a.timestamp.cmp(&b.timestamp))
            .then(a.activity_id.cmp(&b.activity_id))
    });

    let changed: Vec<PeakRecord> = peaks
        .into_iter()
        .enumerate()
        .filter_map(|(position, mut peak)| {
            let rank = u32::try_from(position + 1).unwrap_or(u32::MAX);
            (peak.rank != Some(rank)).then(|| {
                peak.rank = Some(rank);
                peak
            })
        })
        .collect();
    ctx.peaks.put_many(&changed).await
}

/// `local/activity-stats`: summary statistics from the stored streams
#[derive(Debug, Default)]
pub struct ActivityStatsHandler;

#[async_trait]
impl ManifestHandler for ActivityStatsHandler {
    fn processor(&self) -> &str {
        PROCESSOR_LOCAL
    }

    fn manifest(&self) -> &str {
        MANIFEST_ACTIVITY_STATS
    }

    async fn run(&self, input: TaskInput<'_>) -> AppResult<ActivityUpdate> {
        let ctx = input.ctx;
        let streams = ctx.load_streams(input.activity.id).await?;
        let ftp = input.activity.ftp;
        let power_gaps = ctx.extractor.config().power_gaps;
        let stats = ctx
            .pool
            .submit(
                move || Ok(compute_activity_stats(&streams, ftp, power_gaps)),
                ctx.job_timeout,
            )
            .await?;
        Ok(ActivityUpdate::Stats(stats))
    }
}

/// Handlers for every manifest of the default graph
#[must_use]
pub fn default_handlers() -> Vec<Arc<dyn ManifestHandler>> {
    vec![
        Arc::new(FetchStreamsHandler),
        Arc::new(AthleteSettingsHandler),
        Arc::new(ExtraStreamsHandler),
        Arc::new(PeaksHandler),
        Arc::new(ActivityStatsHandler),
    ]
}
