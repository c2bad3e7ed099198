// ABOUTME: Per-athlete sync orchestration over the manifest graph
// ABOUTME: Refreshes the activity listing, then runs remote and local manifest passes until idle
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Sync Orchestrator
//!
//! One orchestrating task per athlete. A call to
//! [`SyncOrchestrator::sync_athlete`]:
//!
//! 1. stores the athlete and inserts newly listed activities,
//! 2. runs passes until no manifest is runnable. Each pass runs remote
//!    manifests one at a time behind the rate limiter group, then local
//!    manifests concurrently,
//! 3. writes every outcome back through an atomic per-activity update.
//!
//! A quota rejection pauses remote work until the remote's `Retry-After`
//! and is not recorded against the activity. Any other task failure is
//! recorded in the activity's sync state and retried after backoff.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use peaksync_core::constants::sync::{GRAPH_VERSION_KEY, RATE_LIMIT_PAUSE_SECS};
use peaksync_core::errors::{AppError, AppResult, ErrorCode};
use peaksync_core::models::{ActivitySyncState, Athlete};
use peaksync_intelligence::{PeakConfig, PeakExtractor};
use peaksync_providers::{create_activity_stream, RemoteSource, RetryPolicy, StreamConfig};

use super::handlers::{default_handlers, ManifestHandler, SyncContext, TaskInput};
use super::manifest::{NextManifest, SyncManifestGraph};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::database_plugins::{
    indexes, Database, KeyPart, KeyRange, KeyValueStore, Repository, StoreBackend,
};
use crate::rate_limiting::RateLimiterGroup;
use crate::worker_pool::{WorkerPool, DEFAULT_JOB_TIMEOUT};

/// Marker for "not paused"
const NOT_PAUSED: i64 = i64::MIN;

/// Long-lived services shared by every athlete's sync
#[derive(Clone)]
pub struct SyncServices {
    /// Record storage
    pub backend: Arc<dyn StoreBackend>,
    /// Key-value storage for limiter state and graph bookkeeping
    pub kv: Arc<dyn KeyValueStore>,
    /// Remote holding activities and streams
    pub source: Arc<dyn RemoteSource>,
    /// Limiters gating every remote request
    pub limiters: Arc<RateLimiterGroup>,
    /// Thread pool for CPU-bound manifest work
    pub pool: Arc<WorkerPool>,
    /// Time source for sync timestamps and pauses
    pub clock: Arc<dyn Clock>,
}

/// Tunables of the orchestrator
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Retry policy for transient remote failures
    pub retry: RetryPolicy,
    /// Listing page size and limits
    pub listing: StreamConfig,
    /// Local manifest tasks run concurrently within one pass
    pub local_concurrency: usize,
    /// Timeout of one worker pool job
    pub job_timeout: Duration,
    /// Peak periods and gap handling
    pub peaks: PeakConfig,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            listing: StreamConfig::default(),
            local_concurrency: 4,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            peaks: PeakConfig::default(),
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            listing: StreamConfig::with_page_size(config.remote.page_size),
            local_concurrency: config.sync.local_concurrency,
            job_timeout: config.sync.job_timeout,
            peaks: config.peaks.clone(),
        }
    }
}

/// Outcome of one `sync_athlete` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Correlates the log lines of this run
    pub run_id: Uuid,
    /// Athlete synced
    pub athlete_id: i64,
    /// Activities first seen in this run's listing
    pub activities_discovered: usize,
    /// Passes executed, the final idle pass included
    pub passes: usize,
    /// Manifest runs attempted
    pub tasks_run: usize,
    /// Manifest runs recorded as sync errors
    pub tasks_failed: usize,
    /// Manifests held back by error backoff after the last pass
    pub waiting_on_backoff: usize,
    /// Remote work is paused until this epoch millisecond
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_until: Option<i64>,
}

impl SyncSummary {
    const fn new(run_id: Uuid, athlete_id: i64) -> Self {
        Self {
            run_id,
            athlete_id,
            activities_discovered: 0,
            passes: 0,
            tasks_run: 0,
            tasks_failed: 0,
            waiting_on_backoff: 0,
            paused_until: None,
        }
    }
}

/// Records deleted by `remove_athlete`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalSummary {
    /// Activities deleted
    pub activities: usize,
    /// Stream records deleted
    pub streams: usize,
    /// Peak records deleted
    pub peaks: usize,
}

/// One manifest to run for one activity
#[derive(Debug, Clone)]
struct Task {
    activity_id: i64,
    processor: String,
    manifest: String,
    handler: Arc<dyn ManifestHandler>,
}

impl Task {
    fn key(&self) -> String {
        format!("{}/{}/{}", self.activity_id, self.processor, self.manifest)
    }
}

#[derive(Debug, Default)]
struct PassPlan {
    remote: Vec<Task>,
    local: Vec<Task>,
    waiting: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Succeeded,
    Failed,
    RateLimited,
    Skipped,
}

/// Drives the manifest graph for athletes
pub struct SyncOrchestrator {
    ctx: SyncContext,
    athletes: Repository<Athlete>,
    graph: SyncManifestGraph,
    handlers: HashMap<String, Arc<dyn ManifestHandler>>,
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    listing: StreamConfig,
    local_concurrency: usize,
    paused_until: AtomicI64,
    prepared: OnceCell<()>,
}

fn handler_key(processor: &str, manifest: &str) -> String {
    format!("{processor}/{manifest}")
}

impl SyncOrchestrator {
    /// Orchestrator over `graph` with the built-in handlers registered
    #[must_use]
    pub fn new(graph: SyncManifestGraph, services: SyncServices, options: SyncOptions) -> Self {
        let ctx = SyncContext {
            activities: Repository::new(Arc::clone(&services.backend)),
            streams: Repository::new(Arc::clone(&services.backend)),
            peaks: Repository::new(Arc::clone(&services.backend)),
            source: services.source,
            limiters: services.limiters,
            pool: services.pool,
            retry: options.retry,
            extractor: PeakExtractor::new(options.peaks),
            job_timeout: options.job_timeout,
            rank_lock: Mutex::new(()),
        };
        let mut orchestrator = Self {
            ctx,
            athletes: Repository::new(services.backend),
            graph,
            handlers: HashMap::new(),
            kv: services.kv,
            clock: services.clock,
            listing: options.listing,
            local_concurrency: options.local_concurrency.max(1),
            paused_until: AtomicI64::new(NOT_PAUSED),
            prepared: OnceCell::new(),
        };
        for handler in default_handlers() {
            orchestrator = orchestrator.with_handler(handler);
        }
        orchestrator
    }

    /// Build storage, limiters and the worker pool from configuration and
    /// use the default graph. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns config errors for invalid settings and database errors when
    /// storage cannot be opened
    pub async fn from_config(config: &SyncConfig, source: Arc<dyn RemoteSource>) -> AppResult<Self> {
        config.validate()?;
        let database = Arc::new(Database::new(&config.database).await?);
        let backend: Arc<dyn StoreBackend> = database.clone();
        let kv: Arc<dyn KeyValueStore> = database;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let limiters = Arc::new(RateLimiterGroup::new(
            config.rate_limits.clone(),
            &kv,
            &clock,
        )?);
        let pool = Arc::new(WorkerPool::new(config.worker_pool.clone()));
        let services = SyncServices {
            backend,
            kv,
            source,
            limiters,
            pool,
            clock,
        };
        Ok(Self::new(
            SyncManifestGraph::default_graph()?,
            services,
            SyncOptions::from(config),
        ))
    }

    /// Register or replace the handler for the manifest it names
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn ManifestHandler>) -> Self {
        self.handlers.insert(
            handler_key(handler.processor(), handler.manifest()),
            handler,
        );
        self
    }

    /// The manifest graph
    #[must_use]
    pub const fn graph(&self) -> &SyncManifestGraph {
        &self.graph
    }

    /// Repositories and services shared with the handlers
    #[must_use]
    pub const fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Athlete records
    #[must_use]
    pub const fn athletes(&self) -> &Repository<Athlete> {
        &self.athletes
    }

    /// End of the current remote pause, if one is active
    #[must_use]
    pub fn paused_until(&self) -> Option<i64> {
        let until = self.paused_until.load(Ordering::SeqCst);
        (until != NOT_PAUSED && until > self.clock.now_ms()).then_some(until)
    }

    fn pause_for(&self, error: &AppError) -> i64 {
        let secs = error.retry_after_secs().unwrap_or(RATE_LIMIT_PAUSE_SECS);
        let pause_ms = i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000);
        let until = self.clock.now_ms().saturating_add(pause_ms);
        self.paused_until.fetch_max(until, Ordering::SeqCst);
        warn!(
            retry_after_secs = secs,
            paused_until = until,
            "remote quota exhausted, pausing remote work"
        );
        until
    }

    /// Check handler coverage and the stored graph fingerprint, once
    async fn prepare(&self) -> AppResult<()> {
        self.prepared
            .get_or_try_init(|| async {
                for processor in self.graph.processors() {
                    for manifest in self.graph.manifests(processor)? {
                        if !self
                            .handlers
                            .contains_key(&handler_key(processor, &manifest.name))
                        {
                            return Err(AppError::config(format!(
                                "no handler registered for manifest {processor}/{}",
                                manifest.name
                            )));
                        }
                    }
                }

                let fingerprint = self.graph.fingerprint();
                match self.kv.get_value(GRAPH_VERSION_KEY).await? {
                    Some(Value::String(stored)) if stored == fingerprint => {
                        debug!("sync graph unchanged");
                        return Ok(());
                    }
                    Some(previous) => {
                        let stopped = self.ctx.pool.taint();
                        info!(
                            previous = %previous,
                            current = %fingerprint,
                            stopped_workers = stopped,
                            "sync graph changed, tainted worker pool"
                        );
                    }
                    None => debug!(current = %fingerprint, "recording sync graph version"),
                }
                self.kv
                    .set_value(GRAPH_VERSION_KEY, &Value::String(fingerprint))
                    .await
            })
            .await?;
        Ok(())
    }

    /// Sync one athlete until no manifest is runnable.
    ///
    /// # Errors
    ///
    /// Returns `OperationCancelled` when `cancel` fires, storage errors, and
    /// programming errors such as a manifest without a handler. Individual
    /// task failures are recorded on the activity instead.
    pub async fn sync_athlete(
        &self,
        athlete: &Athlete,
        cancel: &CancellationToken,
    ) -> AppResult<SyncSummary> {
        self.prepare().await?;
        let started = Instant::now();
        let mut summary = SyncSummary::new(Uuid::new_v4(), athlete.id);
        info!(run_id = %summary.run_id, athlete_id = athlete.id, "starting athlete sync");

        self.athletes.put(athlete).await?;
        summary.activities_discovered = self.refresh_listing(athlete, cancel).await?;

        let mut failed: HashSet<String> = HashSet::new();
        loop {
            ensure_active(cancel)?;
            summary.passes += 1;
            let plan = self.plan_pass(athlete.id, &failed).await?;
            summary.waiting_on_backoff = plan.waiting;
            if plan.remote.is_empty() && plan.local.is_empty() {
                break;
            }
            if !self
                .run_pass(plan, athlete, cancel, &mut summary, &mut failed)
                .await?
            {
                break;
            }
        }

        summary.paused_until = self.paused_until();
        info!(
            run_id = %summary.run_id,
            athlete_id = athlete.id,
            discovered = summary.activities_discovered,
            passes = summary.passes,
            tasks_run = summary.tasks_run,
            tasks_failed = summary.tasks_failed,
            waiting = summary.waiting_on_backoff,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "athlete sync finished"
        );
        Ok(summary)
    }

    /// Run one pass; returns whether any task made progress
    async fn run_pass(
        &self,
        plan: PassPlan,
        athlete: &Athlete,
        cancel: &CancellationToken,
        summary: &mut SyncSummary,
        failed: &mut HashSet<String>,
    ) -> AppResult<bool> {
        let mut progressed = false;
        for task in plan.remote {
            if self.paused_until().is_some() {
                break;
            }
            let outcome = self.execute(&task, athlete, cancel).await?;
            progressed |= self.tally(summary, failed, &task, outcome);
        }

        let outcomes: Vec<(Task, AppResult<TaskOutcome>)> = stream::iter(plan.local)
            .map(|task| async move {
                let outcome = self.execute(&task, athlete, cancel).await;
                (task, outcome)
            })
            .buffer_unordered(self.local_concurrency)
            .collect()
            .await;
        for (task, outcome) in outcomes {
            progressed |= self.tally(summary, failed, &task, outcome?);
        }
        Ok(progressed)
    }

    fn tally(
        &self,
        summary: &mut SyncSummary,
        failed: &mut HashSet<String>,
        task: &Task,
        outcome: TaskOutcome,
    ) -> bool {
        match outcome {
            TaskOutcome::Succeeded => {
                summary.tasks_run += 1;
                true
            }
            TaskOutcome::Failed => {
                summary.tasks_run += 1;
                summary.tasks_failed += 1;
                failed.insert(task.key());
                true
            }
            TaskOutcome::RateLimited => {
                summary.paused_until = self.paused_until();
                false
            }
            TaskOutcome::Skipped => false,
        }
    }

    /// Insert activities not seen before. Listing failures other than
    /// cancellation leave the stored activities to be processed.
    async fn refresh_listing(&self, athlete: &Athlete, cancel: &CancellationToken) -> AppResult<usize> {
        if let Some(until) = self.paused_until() {
            debug!(athlete_id = athlete.id, paused_until = until, "remote paused, skipping listing");
            return Ok(0);
        }

        let gate = self.ctx.limiters.gate(cancel);
        let mut listing = create_activity_stream(
            self.ctx.source.as_ref(),
            &gate,
            athlete.id,
            self.listing,
            &self.ctx.retry,
        );
        let mut discovered = 0;
        while let Some(item) = listing.next().await {
            let remote = match item {
                Ok(remote) => remote,
                Err(e) if e.code == ErrorCode::ExternalRateLimited => {
                    self.pause_for(&e);
                    break;
                }
                Err(e) if e.code == ErrorCode::OperationCancelled => return Err(e),
                Err(e) => {
                    warn!(athlete_id = athlete.id, error = %e, "activity listing failed");
                    break;
                }
            };
            if remote.athlete_id().is_some_and(|owner| owner != athlete.id) {
                warn!(
                    athlete_id = athlete.id,
                    activity_id = remote.id,
                    "listed activity belongs to another athlete, skipping"
                );
                continue;
            }
            if self
                .ctx
                .activities
                .insert_if_absent(&remote.into_activity(athlete.id))
                .await?
            {
                discovered += 1;
            }
        }
        debug!(athlete_id = athlete.id, discovered, "activity listing refreshed");
        Ok(discovered)
    }

    /// Pick the next manifest of every processor for every activity,
    /// newest activities first
    async fn plan_pass(&self, athlete_id: i64, failed: &HashSet<String>) -> AppResult<PassPlan> {
        let mut activities = self
            .ctx
            .activities
            .query(indexes::ATHLETE_TS, &athlete_range(athlete_id))
            .await?;
        activities.reverse();

        let now = self.clock.now_ms();
        let mut plan = PassPlan::default();
        for activity in &activities {
            for processor in self.graph.processors() {
                if !self.graph.requirements_met(processor, &activity.sync_state)? {
                    continue;
                }
                let next = self
                    .graph
                    .next_available_manifest(processor, &activity.sync_state, now)?;
                let manifest = match next {
                    NextManifest::Runnable(manifest) => manifest,
                    NextManifest::NotYetAvailable { .. } => {
                        plan.waiting += 1;
                        continue;
                    }
                    NextManifest::Synced => continue,
                };
                let handler = self
                    .handlers
                    .get(&handler_key(processor, &manifest.name))
                    .ok_or_else(|| {
                        AppError::config(format!(
                            "no handler registered for manifest {processor}/{}",
                            manifest.name
                        ))
                    })?;
                let task = Task {
                    activity_id: activity.id,
                    processor: processor.to_owned(),
                    manifest: manifest.name.clone(),
                    handler: Arc::clone(handler),
                };
                if failed.contains(&task.key()) {
                    continue;
                }
                if handler.is_remote() {
                    plan.remote.push(task);
                } else {
                    plan.local.push(task);
                }
            }
        }
        Ok(plan)
    }

    /// Run one task and write its outcome back to the activity
    async fn execute(
        &self,
        task: &Task,
        athlete: &Athlete,
        cancel: &CancellationToken,
    ) -> AppResult<TaskOutcome> {
        ensure_active(cancel)?;
        let key = [KeyPart::from(task.activity_id)];
        let Some(activity) = self.ctx.activities.get(&key).await? else {
            return Ok(TaskOutcome::Skipped);
        };

        let started = Instant::now();
        let result = task
            .handler
            .run(TaskInput {
                ctx: &self.ctx,
                activity: &activity,
                athlete,
                cancel,
            })
            .await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let graph = &self.graph;
        match result {
            Ok(update) => {
                self.ctx
                    .activities
                    .update(&key, |activity| {
                        update.apply(activity);
                        record_success(
                            graph,
                            &mut activity.sync_state,
                            &task.processor,
                            &task.manifest,
                        );
                    })
                    .await?;
                debug!(
                    activity_id = task.activity_id,
                    processor = %task.processor,
                    manifest = %task.manifest,
                    elapsed_ms,
                    "manifest succeeded"
                );
                Ok(TaskOutcome::Succeeded)
            }
            Err(e) if e.code == ErrorCode::ExternalRateLimited => {
                self.pause_for(&e);
                Ok(TaskOutcome::RateLimited)
            }
            Err(e) if e.code == ErrorCode::OperationCancelled || e.code.is_programming_error() => {
                Err(e)
            }
            Err(e) => {
                self.record_failure(task, &e).await?;
                warn!(
                    activity_id = task.activity_id,
                    processor = %task.processor,
                    manifest = %task.manifest,
                    elapsed_ms,
                    error = %e,
                    "manifest failed"
                );
                Ok(TaskOutcome::Failed)
            }
        }
    }

    async fn record_failure(&self, task: &Task, failure: &AppError) -> AppResult<()> {
        let now = self.clock.now_ms();
        let message = failure.to_string();
        let graph = &self.graph;
        self.ctx
            .activities
            .update(&[KeyPart::from(task.activity_id)], |activity| {
                if let Err(e) = graph.set_sync_error(
                    &mut activity.sync_state,
                    &task.processor,
                    &task.manifest,
                    now,
                    message,
                ) {
                    error!(error = %e, "failed to record sync error");
                }
            })
            .await?;
        Ok(())
    }

    /// Run `sync_athlete` every `interval` until `cancel` fires.
    ///
    /// Athletes with sync disabled return immediately.
    ///
    /// # Errors
    ///
    /// Returns programming errors; other failures are logged and retried on
    /// the next tick
    pub async fn run(
        &self,
        athlete: &Athlete,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        if !athlete.sync_enabled {
            info!(athlete_id = athlete.id, "sync disabled for athlete");
            return Ok(());
        }
        info!(
            athlete_id = athlete.id,
            interval_secs = interval.as_secs(),
            "starting periodic sync"
        );
        loop {
            let outcome = tokio::select! {
                () = cancel.cancelled() => break,
                outcome = self.sync_athlete(athlete, cancel) => outcome,
            };
            match outcome {
                Ok(_) => {}
                Err(e) if e.code == ErrorCode::OperationCancelled => break,
                Err(e) if e.code.is_programming_error() => return Err(e),
                Err(e) => warn!(athlete_id = athlete.id, error = %e, "athlete sync failed"),
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = sleep(interval) => {}
            }
        }
        info!(athlete_id = athlete.id, "periodic sync stopped");
        Ok(())
    }

    /// Delete the athlete with every activity, stream and peak
    ///
    /// # Errors
    ///
    /// Returns storage errors
    pub async fn remove_athlete(&self, athlete_id: i64) -> AppResult<RemovalSummary> {
        let range = athlete_range(athlete_id);
        let activities = self
            .ctx
            .activities
            .query(indexes::ATHLETE_TS, &range)
            .await?;

        let mut removed = RemovalSummary {
            peaks: self
                .ctx
                .peaks
                .delete_range(indexes::ATHLETE_TYPE_PERIOD_TS, &range)
                .await?,
            ..RemovalSummary::default()
        };
        for activity in &activities {
            removed.streams += self
                .ctx
                .streams
                .delete_range(
                    indexes::ACTIVITY,
                    &KeyRange::prefix([KeyPart::from(activity.id)]),
                )
                .await?;
        }
        removed.activities = self
            .ctx
            .activities
            .delete_range(indexes::ATHLETE_TS, &range)
            .await?;
        self.athletes.delete(&[KeyPart::from(athlete_id)]).await?;

        info!(
            athlete_id,
            activities = removed.activities,
            streams = removed.streams,
            peaks = removed.peaks,
            "removed athlete"
        );
        Ok(removed)
    }
}

fn athlete_range(athlete_id: i64) -> KeyRange {
    KeyRange::prefix([KeyPart::from(athlete_id)])
}

fn ensure_active(cancel: &CancellationToken) -> AppResult<()> {
    if cancel.is_cancelled() {
        Err(AppError::cancelled("athlete sync"))
    } else {
        Ok(())
    }
}

/// Mark the manifest done; processors requiring this one start over
fn record_success(
    graph: &SyncManifestGraph,
    state: &mut ActivitySyncState,
    processor: &str,
    manifest: &str,
) {
    if let Err(e) = graph.set_sync_success(state, processor, manifest, false) {
        error!(error = %e, "failed to record sync success");
        return;
    }
    let dependents: Vec<&str> = graph
        .processors()
        .filter(|candidate| {
            graph
                .requirements(candidate)
                .is_ok_and(|required| required.iter().any(|r| r == processor))
        })
        .collect();
    for dependent in dependents {
        if let Err(e) = graph.clear_processor(state, dependent) {
            error!(error = %e, "failed to reset dependent processor");
        }
    }
}
