//! Bounded background refresh pool.
//!
//! A fixed set of tokio workers drains a bounded FIFO of refresh jobs. A key
//! that is already queued is coalesced instead of queued twice, and a full
//! queue sheds load according to [`OverflowPolicy`] so a burst of stale keys
//! can never fan out into unbounded upstream fetches.

use std::collections::{HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::{counter, gauge, histogram};
use serde::Deserialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::diagnostics::{DiagnosticKind, Diagnostics};
use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::refresh::RefreshOutcome;

const SOURCE: &str = "cache::pool";
const METRIC_DROPPED: &str = "quire_refresh_dropped_total";
const METRIC_QUEUE_LEN: &str = "quire_refresh_queue_len";
const METRIC_REFRESH_MS: &str = "quire_refresh_ms";

/// Which job to discard when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the job that has waited longest and accept the new one.
    DropOldest,
    /// Reject the new job.
    DropNewest,
}

/// What happened to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// The key was already waiting in the queue.
    Coalesced,
    /// The queue was full and this job was rejected.
    Rejected,
    /// The queue was full and the oldest job, for the given key, was evicted.
    Evicted(CacheKey),
    /// The pool is shutting down.
    Closed,
}

struct RefreshJob {
    key: CacheKey,
    task: BoxFuture<'static, RefreshOutcome>,
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<RefreshJob>,
    queued: HashSet<CacheKey>,
    in_flight: usize,
    closed: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.jobs.is_empty() && self.in_flight == 0
    }
}

enum Next {
    Job(RefreshJob),
    Wait,
    Exit,
}

struct Shared {
    state: Mutex<QueueState>,
    available: Notify,
    idle: Notify,
    capacity: usize,
    overflow: OverflowPolicy,
    diagnostics: Arc<Diagnostics>,
}

impl Shared {
    fn next(&self) -> Next {
        let mut state = mutex_lock(&self.state, SOURCE, "next");
        if let Some(job) = state.jobs.pop_front() {
            state.queued.remove(&job.key);
            state.in_flight += 1;
            gauge!(METRIC_QUEUE_LEN).set(state.jobs.len() as f64);
            Next::Job(job)
        } else if state.closed {
            Next::Exit
        } else {
            Next::Wait
        }
    }

    fn finish(&self) {
        let mut state = mutex_lock(&self.state, SOURCE, "finish");
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.is_idle() {
            self.idle.notify_waiters();
        }
    }
}

/// Fixed-size worker set fed by a bounded queue.
pub struct RefreshPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RefreshPool {
    /// Spawn `workers` tasks on the current tokio runtime.
    pub fn start(
        workers: NonZeroUsize,
        capacity: NonZeroUsize,
        overflow: OverflowPolicy,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            idle: Notify::new(),
            capacity: capacity.get(),
            overflow,
            diagnostics,
        });

        let handles = (0..workers.get())
            .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&shared))))
            .collect();

        info!(
            workers = workers.get(),
            capacity = capacity.get(),
            ?overflow,
            "refresh pool started"
        );

        Self {
            shared,
            workers: Mutex::new(handles),
        }
    }

    /// Queue a refresh for `key`. Never blocks.
    pub fn submit(&self, key: CacheKey, task: BoxFuture<'static, RefreshOutcome>) -> Submission {
        let submission = {
            let mut state = mutex_lock(&self.shared.state, SOURCE, "submit");
            if state.closed {
                return Submission::Closed;
            }
            if state.queued.contains(&key) {
                return Submission::Coalesced;
            }

            let mut submission = Submission::Queued;
            if state.jobs.len() >= self.shared.capacity {
                match self.shared.overflow {
                    OverflowPolicy::DropNewest => {
                        drop(state);
                        self.record_drop(&key);
                        return Submission::Rejected;
                    }
                    OverflowPolicy::DropOldest => {
                        if let Some(evicted) = state.jobs.pop_front() {
                            state.queued.remove(&evicted.key);
                            submission = Submission::Evicted(evicted.key);
                        }
                    }
                }
            }

            state.queued.insert(key.clone());
            state.jobs.push_back(RefreshJob { key, task });
            gauge!(METRIC_QUEUE_LEN).set(state.jobs.len() as f64);
            submission
        };

        if let Submission::Evicted(evicted) = &submission {
            self.record_drop(evicted);
        }
        self.shared.available.notify_one();
        submission
    }

    fn record_drop(&self, key: &CacheKey) {
        counter!(METRIC_DROPPED).increment(1);
        self.shared
            .diagnostics
            .record(DiagnosticKind::RefreshDropped, key.as_str(), None);
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        mutex_lock(&self.shared.state, SOURCE, "queued").jobs.len()
    }

    /// Resolve once the queue is empty and no job is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if mutex_lock(&self.shared.state, SOURCE, "wait_idle").is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting jobs, discard queued ones and wait for running jobs to finish.
    pub async fn shutdown(&self) {
        let discarded = {
            let mut state = mutex_lock(&self.shared.state, SOURCE, "shutdown");
            state.closed = true;
            state.queued.clear();
            let discarded = state.jobs.len();
            state.jobs.clear();
            gauge!(METRIC_QUEUE_LEN).set(0.0);
            if state.is_idle() {
                self.shared.idle.notify_waiters();
            }
            discarded
        };
        self.shared.available.notify_waiters();

        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *mutex_lock(&self.workers, SOURCE, "shutdown_workers"));
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "refresh worker terminated abnormally");
            }
        }
        info!(discarded, "refresh pool stopped");
    }
}

async fn worker_loop(id: usize, shared: Arc<Shared>) {
    debug!(worker = id, "refresh worker started");
    loop {
        let notified = shared.available.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match shared.next() {
            Next::Job(job) => {
                run_job(id, job).await;
                shared.finish();
            }
            Next::Wait => notified.await,
            Next::Exit => break,
        }
    }
    debug!(worker = id, "refresh worker stopped");
}

async fn run_job(worker: usize, job: RefreshJob) {
    let started = Instant::now();
    match AssertUnwindSafe(job.task).catch_unwind().await {
        Ok(outcome) => {
            histogram!(METRIC_REFRESH_MS, "outcome" => outcome.as_str())
                .record(started.elapsed().as_secs_f64() * 1000.0);
            debug!(worker, key = %job.key, outcome = outcome.as_str(), "refresh job finished");
        }
        Err(_) => {
            error!(worker, key = %job.key, "refresh job panicked");
        }
    }
}
