//! Bounded job queue served by a fixed pool of workers.
//!
//! `enqueue` never waits: a full queue drops the job. Each worker retries its
//! job with linear backoff, blocking only itself. A panicking attempt counts
//! as a failure and never takes its worker down. `shutdown` closes the queue
//! and returns once every buffered and in-flight job has finished.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::utils::error::AppError;

pub mod finalize;
pub mod retry;

pub use finalize::FinalizePaymentJob;
pub use retry::{run_with_retry, JobOutcome, RetryPolicy, Sleeper, TokioSleeper};

#[async_trait]
pub trait JobTask: Send + Sync {
    async fn run(&self) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct Job {
    pub id: String,
    pub task: Arc<dyn JobTask>,
    pub retry_max: u32,
}

impl Job {
    pub fn new(id: impl Into<String>, task: Arc<dyn JobTask>, retry_max: u32) -> Self {
        Self {
            id: id.into(),
            task,
            retry_max,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub workers: usize,
    pub capacity: usize,
    pub base_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            capacity: 100,
            base_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    succeeded: AtomicU64,
    exhausted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub succeeded: u64,
    pub exhausted: u64,
}

pub struct JobQueue {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl JobQueue {
    pub fn start(config: QueueConfig) -> Self {
        Self::start_with_sleeper(config, Arc::new(TokioSleeper))
    }

    pub fn start_with_sleeper(config: QueueConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(config.capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let sleeper = Arc::clone(&sleeper);
                let counters = Arc::clone(&counters);
                let base_delay = config.base_delay;

                tokio::spawn(async move {
                    loop {
                        let next = { rx.lock().await.recv().await };
                        let Some(job) = next else {
                            debug!(worker_id, "Job queue closed, worker exiting");
                            break;
                        };

                        let policy = RetryPolicy::new(job.retry_max).with_base_delay(base_delay);
                        match run_with_retry(&job.id, &job.task, policy, sleeper.as_ref())
                            .await
                        {
                            JobOutcome::Succeeded { attempts } => {
                                counters.succeeded.fetch_add(1, Ordering::Relaxed);
                                debug!(worker_id, job_id = %job.id, attempts, "Job completed");
                            }
                            JobOutcome::Exhausted { .. } => {
                                counters.exhausted.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                })
            })
            .collect();

        info!(
            workers = config.workers.max(1),
            capacity = config.capacity.max(1),
            "Job queue started"
        );

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            counters,
        }
    }

    /// Queues `job` without waiting. `false` means the job was dropped.
    pub fn enqueue(&self, job: Job) -> bool {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = sender.as_ref() else {
            warn!(job_id = %job.id, "Job queue is shut down, job dropped");
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match sender.try_send(job) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(job)) => {
                warn!(job_id = %job.id, "Job queue is full, job dropped");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(job)) => {
                warn!(job_id = %job.id, "Job queue is closed, job dropped");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            exhausted: self.counters.exhausted.load(Ordering::Relaxed),
        }
    }

    /// Closes the queue and waits for the workers to drain it.
    pub async fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(sender);

        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();

        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Job worker terminated abnormally");
            }
        }

        info!(stats = ?self.stats(), "Job queue drained");
    }
}
