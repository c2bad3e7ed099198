// ABOUTME: Bounded pool of reusable OS worker threads for CPU-bound activity processing
// ABOUTME: Grows on demand, retires idle and tainted workers, reports panics and timeouts as JobFailure
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Worker Pool
//!
//! Peak extraction and stream derivation are CPU bound and must not run on
//! the async executor. [`WorkerPool::submit`] hands a closure to a dedicated
//! thread and awaits its result through a per-job oneshot channel.
//!
//! Workers are created lazily up to `max_workers`. A finished worker puts
//! itself back on the idle list unless the pool was tainted or shut down
//! while it was busy. A periodic reaper retires workers that stayed idle for
//! longer than `idle_timeout`.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use peaksync_core::errors::{AppError, AppResult};

/// Default idle lifetime of a worker
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default sleep between attempts to claim a worker when the pool is full
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default per-job timeout used by the sync pipeline
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(120);

/// Worker pool sizing and timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Upper bound on live worker threads
    pub max_workers: usize,
    /// Idle workers older than this are retired
    pub idle_timeout: Duration,
    /// Sleep between claim attempts while every worker is busy
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Twice the available parallelism
#[must_use]
pub fn default_max_workers() -> usize {
    thread::available_parallelism().map_or(2, |n| n.get() * 2)
}

/// What went wrong with a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobFailureKind {
    /// The job returned an error
    Error,
    /// The job panicked
    Panic,
    /// The job did not finish within its timeout
    Timeout,
    /// The worker disappeared or the pool was shut down
    WorkerLost,
}

impl fmt::Display for JobFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Error => "job error",
            Self::Panic => "job panic",
            Self::Timeout => "job timeout",
            Self::WorkerLost => "worker lost",
        };
        f.write_str(label)
    }
}

/// Structured failure of a submitted job
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} on {worker}: {message}")]
pub struct JobFailure {
    /// Failure category
    pub kind: JobFailureKind,
    /// Human-readable detail
    pub message: String,
    /// Name of the worker thread involved
    pub worker: String,
}

impl JobFailure {
    fn new(kind: JobFailureKind, worker: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            worker: worker.to_owned(),
        }
    }

    /// Whether the job timed out
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind == JobFailureKind::Timeout
    }
}

impl From<JobFailure> for AppError {
    fn from(failure: JobFailure) -> Self {
        match failure.kind {
            JobFailureKind::Timeout => Self::timeout(failure.to_string()),
            _ => Self::internal(failure.to_string()),
        }
    }
}

/// Snapshot of pool occupancy and throughput
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerPoolStats {
    /// Live worker threads
    pub total_workers: usize,
    /// Workers waiting for a job
    pub idle_workers: usize,
    /// Current taint generation
    pub generation: u64,
    /// Jobs that returned a value
    pub jobs_completed: u64,
    /// Jobs that failed in any way
    pub jobs_failed: u64,
}

/// Sends a finished job's outcome to its submitter
type Deliver = Box<dyn FnOnce() + Send + 'static>;

/// Runs a job and returns the delivery of its outcome
type Job = Box<dyn FnOnce() -> Deliver + Send + 'static>;

enum WorkerMessage {
    Run(Job),
    Shutdown,
}

#[derive(Clone)]
struct WorkerHandle {
    name: String,
    generation: u64,
    sender: Sender<WorkerMessage>,
}

impl WorkerHandle {
    fn stop(&self) {
        if self.sender.send(WorkerMessage::Shutdown).is_err() {
            debug!(worker = %self.name, "worker already gone");
        }
    }
}

struct IdleWorker {
    handle: WorkerHandle,
    since: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<IdleWorker>,
    total: usize,
    next_id: usize,
    generation: u64,
    shutdown: bool,
}

struct Shared {
    config: WorkerPoolConfig,
    state: Mutex<PoolState>,
    completed: AtomicU64,
    failed: AtomicU64,
}

enum Claim {
    Idle(WorkerHandle),
    Spawn { id: usize, generation: u64 },
    Busy,
    Closed,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self) -> Claim {
        let mut state = self.lock();
        if state.shutdown {
            return Claim::Closed;
        }
        if let Some(worker) = state.idle.pop() {
            return Claim::Idle(worker.handle);
        }
        if state.total < self.config.max_workers {
            state.total += 1;
            let id = state.next_id;
            state.next_id += 1;
            return Claim::Spawn {
                id,
                generation: state.generation,
            };
        }
        Claim::Busy
    }

    /// Return a worker to the idle list; false when it should exit instead
    fn release(&self, handle: &WorkerHandle) -> bool {
        let mut state = self.lock();
        if state.shutdown || handle.generation != state.generation {
            state.total = state.total.saturating_sub(1);
            return false;
        }
        state.idle.push(IdleWorker {
            handle: handle.clone(),
            since: Instant::now(),
        });
        true
    }

    fn forget(&self) {
        let mut state = self.lock();
        state.total = state.total.saturating_sub(1);
    }

    /// Stop idle workers matching `predicate`, returning how many stopped
    fn stop_idle(&self, predicate: impl Fn(&IdleWorker) -> bool) -> usize {
        let stopped: Vec<IdleWorker> = {
            let mut state = self.lock();
            let (stop, keep): (Vec<IdleWorker>, Vec<IdleWorker>) =
                state.idle.drain(..).partition(&predicate);
            state.idle = keep;
            state.total = state.total.saturating_sub(stop.len());
            stop
        };
        for worker in &stopped {
            worker.handle.stop();
        }
        stopped.len()
    }

    fn reap(&self) {
        let idle_timeout = self.config.idle_timeout;
        let retired = self.stop_idle(|worker| worker.since.elapsed() >= idle_timeout);
        if retired > 0 {
            debug!(retired, "retired idle workers");
        }
    }
}

fn worker_loop(handle: &WorkerHandle, receiver: &Receiver<WorkerMessage>, shared: &Shared) {
    debug!(worker = %handle.name, generation = handle.generation, "worker started");
    while let Ok(message) = receiver.recv() {
        match message {
            WorkerMessage::Shutdown => break,
            WorkerMessage::Run(job) => {
                let deliver = job();
                // Rejoin the idle list before the submitter wakes up
                let keep = shared.release(handle);
                deliver();
                if !keep {
                    break;
                }
            }
        }
    }
    debug!(worker = %handle.name, "worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

/// Pool of reusable worker threads
pub struct WorkerPool {
    shared: Arc<Shared>,
    reaper: CancellationToken,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl WorkerPool {
    /// Create a pool and start its idle reaper.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(config: WorkerPoolConfig) -> Self {
        let config = WorkerPoolConfig {
            max_workers: config.max_workers.max(1),
            ..config
        };
        let reap_every = (config.idle_timeout / 2).max(Duration::from_millis(10));
        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(PoolState::default()),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });
        let reaper = CancellationToken::new();

        let reaper_shared = Arc::clone(&shared);
        let reaper_cancel = reaper.clone();
        tokio::spawn(async move {
            let mut ticker = interval(reap_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = reaper_cancel.cancelled() => {
                        debug!("worker reaper stopped");
                        break;
                    }
                    _ = ticker.tick() => reaper_shared.reap(),
                }
            }
        });

        Self { shared, reaper }
    }

    /// Pool configuration
    #[must_use]
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.shared.config
    }

    /// Run `job` on a worker thread and await its result.
    ///
    /// A job that outlives `job_timeout` yields a `Timeout` failure; its
    /// worker keeps running it and rejoins the pool once it finishes.
    ///
    /// # Errors
    ///
    /// Returns a [`JobFailure`] when the job errors, panics, times out, or
    /// no worker could run it
    pub async fn submit<T, F>(&self, job: F, job_timeout: Duration) -> Result<T, JobFailure>
    where
        T: Send + 'static,
        F: FnOnce() -> AppResult<T> + Send + 'static,
    {
        let result = self.dispatch(job, job_timeout).await;
        let counter = if result.is_ok() {
            &self.shared.completed
        } else {
            &self.shared.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
        result
    }

    async fn dispatch<T, F>(&self, job: F, job_timeout: Duration) -> Result<T, JobFailure>
    where
        T: Send + 'static,
        F: FnOnce() -> AppResult<T> + Send + 'static,
    {
        let handle = self.acquire_worker().await?;
        let worker = handle.name.clone();

        let (tx, rx) = oneshot::channel();
        let run: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            let deliver: Deliver = Box::new(move || {
                // The submitter may have timed out and dropped the receiver
                let _ = tx.send(outcome);
            });
            deliver
        });

        if handle.sender.send(WorkerMessage::Run(run)).is_err() {
            self.shared.forget();
            return Err(JobFailure::new(
                JobFailureKind::WorkerLost,
                &worker,
                "worker exited before accepting the job",
            ));
        }

        match timeout(job_timeout, rx).await {
            Err(_) => {
                let timeout_ms = u64::try_from(job_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(worker = %worker, timeout_ms, "job timed out");
                Err(JobFailure::new(
                    JobFailureKind::Timeout,
                    &worker,
                    format!("job exceeded {timeout_ms}ms"),
                ))
            }
            Ok(Err(_)) => Err(JobFailure::new(
                JobFailureKind::WorkerLost,
                &worker,
                "worker dropped the job",
            )),
            Ok(Ok(Err(payload))) => {
                let message = panic_message(payload.as_ref());
                warn!(worker = %worker, panic = %message, "job panicked");
                Err(JobFailure::new(JobFailureKind::Panic, &worker, message))
            }
            Ok(Ok(Ok(Err(e)))) => Err(JobFailure::new(JobFailureKind::Error, &worker, e.to_string())),
            Ok(Ok(Ok(Ok(value)))) => Ok(value),
        }
    }

    async fn acquire_worker(&self) -> Result<WorkerHandle, JobFailure> {
        loop {
            match self.shared.claim() {
                Claim::Idle(handle) => return Ok(handle),
                Claim::Spawn { id, generation } => return self.spawn_worker(id, generation),
                Claim::Closed => {
                    return Err(JobFailure::new(
                        JobFailureKind::WorkerLost,
                        "pool",
                        "worker pool is shut down",
                    ))
                }
                Claim::Busy => sleep(self.shared.config.poll_interval).await,
            }
        }
    }

    fn spawn_worker(&self, id: usize, generation: u64) -> Result<WorkerHandle, JobFailure> {
        let name = format!("peak-worker-{id}");
        let (sender, receiver) = unbounded();
        let handle = WorkerHandle {
            name: name.clone(),
            generation,
            sender,
        };

        let thread_handle = handle.clone();
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&thread_handle, &receiver, &shared))
            .map_err(|e| {
                self.shared.forget();
                JobFailure::new(
                    JobFailureKind::WorkerLost,
                    &name,
                    format!("failed to spawn worker thread: {e}"),
                )
            })?;

        debug!(worker = %name, generation, "spawned worker");
        Ok(handle)
    }

    /// Mark every existing worker stale. Idle workers stop now; busy workers
    /// stop after their current job. Returns the number of idle workers stopped.
    pub fn taint(&self) -> usize {
        let generation = {
            let mut state = self.shared.lock();
            state.generation += 1;
            state.generation
        };
        let stopped = self.shared.stop_idle(|_| true);
        info!(generation, stopped, "worker pool tainted");
        stopped
    }

    /// Stop the reaper and every idle worker; busy workers exit after their job
    pub fn shutdown(&self) {
        self.reaper.cancel();
        self.shared.lock().shutdown = true;
        let stopped = self.shared.stop_idle(|_| true);
        debug!(stopped, "worker pool shut down");
    }

    /// Whether `shutdown` has been called
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.lock().shutdown
    }

    /// Current occupancy and throughput
    #[must_use]
    pub fn stats(&self) -> WorkerPoolStats {
        let state = self.shared.lock();
        WorkerPoolStats {
            total_workers: state.total,
            idle_workers: state.idle.len(),
            generation: state.generation,
            jobs_completed: self.shared.completed.load(Ordering::Relaxed),
            jobs_failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
