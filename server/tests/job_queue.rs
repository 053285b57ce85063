mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use boxoffice_server::jobs::{Job, JobQueue, JobTask, QueueConfig};
use boxoffice_server::utils::error::AppError;

use common::RecordingSleeper;

struct AlwaysFails {
    attempts: AtomicU32,
}

#[async_trait]
impl JobTask for AlwaysFails {
    async fn run(&self) -> Result<(), AppError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(AppError::system_message("test_job", "downstream unavailable"))
    }
}

struct Counts {
    runs: AtomicU32,
}

#[async_trait]
impl JobTask for Counts {
    async fn run(&self) -> Result<(), AppError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Blocks until a permit is released.
struct Gate {
    permits: Arc<Semaphore>,
}

#[async_trait]
impl JobTask for Gate {
    async fn run(&self) -> Result<(), AppError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| AppError::system("gate", e))?;
        Ok(())
    }
}

struct Panics;

#[async_trait]
impl JobTask for Panics {
    async fn run(&self) -> Result<(), AppError> {
        panic!("finalize handler bug");
    }
}

fn queue(workers: usize, capacity: usize, sleeper: Arc<RecordingSleeper>) -> JobQueue {
    JobQueue::start_with_sleeper(
        QueueConfig {
            workers,
            capacity,
            ..QueueConfig::default()
        },
        sleeper,
    )
}

#[tokio::test]
async fn failing_job_is_attempted_retry_max_plus_one_times() {
    let sleeper = Arc::new(RecordingSleeper::default());
    let queue = queue(2, 10, sleeper.clone());
    let task = Arc::new(AlwaysFails {
        attempts: AtomicU32::new(0),
    });

    assert!(queue.enqueue(Job::new("payment_update_1", task.clone(), 3)));
    queue.shutdown().await;

    assert_eq!(task.attempts.load(Ordering::SeqCst), 4);
    assert_eq!(
        sleeper.delays(),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(3)
        ]
    );
    let stats = queue.stats();
    assert_eq!(stats.exhausted, 1);
    assert_eq!(stats.succeeded, 0);
}

#[tokio::test]
async fn full_queue_drops_without_blocking() {
    let permits = Arc::new(Semaphore::new(0));
    let queue = queue(1, 1, Arc::new(RecordingSleeper::default()));
    let gate = Arc::new(Gate {
        permits: permits.clone(),
    });

    // The single worker picks up the first job and blocks on the gate.
    assert!(queue.enqueue(Job::new("first", gate.clone(), 0)));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !queue.enqueue(Job::new("second", gate.clone(), 0)) {
        assert!(tokio::time::Instant::now() < deadline, "worker never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Worker busy, buffer full.
    assert!(!queue.enqueue(Job::new("third", gate.clone(), 0)));
    assert!(queue.stats().dropped >= 1);

    permits.add_permits(10);
    queue.shutdown().await;
    assert_eq!(queue.stats().succeeded, 2);
}

#[tokio::test]
async fn shutdown_drains_buffered_jobs() {
    let queue = queue(3, 50, Arc::new(RecordingSleeper::default()));
    let task = Arc::new(Counts {
        runs: AtomicU32::new(0),
    });

    for i in 0..20 {
        assert!(queue.enqueue(Job::new(format!("job_{i}"), task.clone(), 3)));
    }
    queue.shutdown().await;

    assert_eq!(task.runs.load(Ordering::SeqCst), 20);
    assert_eq!(queue.stats().succeeded, 20);

    assert!(!queue.enqueue(Job::new("late", task.clone(), 3)));
    assert_eq!(task.runs.load(Ordering::SeqCst), 20);
}

#[tokio::test]
async fn panicking_job_does_not_kill_the_worker() {
    let queue = queue(1, 10, Arc::new(RecordingSleeper::default()));

    assert!(queue.enqueue(Job::new("panics", Arc::new(Panics), 0)));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while queue.stats().exhausted == 0 {
        assert!(tokio::time::Instant::now() < deadline, "panicking job never settled");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let task = Arc::new(Counts {
        runs: AtomicU32::new(0),
    });
    assert!(queue.enqueue(Job::new("after_panic", task.clone(), 0)));
    queue.shutdown().await;

    assert_eq!(task.runs.load(Ordering::SeqCst), 1);
    let stats = queue.stats();
    assert_eq!(stats.exhausted, 1);
    assert_eq!(stats.succeeded, 1);
}
