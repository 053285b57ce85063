use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::jobs::JobTask;
use crate::utils::error::AppError;

/// Linear backoff: the n-th retry waits `n × base_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }
}

/// Next move after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    Done,
    Retry { retry: u32, delay: Duration },
    GiveUp,
}

/// Attempt bookkeeping, kept separate from any clock.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn record<E>(&mut self, result: &Result<(), E>) -> RetryStep {
        self.attempts += 1;
        if result.is_ok() {
            return RetryStep::Done;
        }

        let retries_used = self.attempts - 1;
        if retries_used >= self.policy.max_retries {
            return RetryStep::GiveUp;
        }

        let retry = retries_used + 1;
        RetryStep::Retry {
            retry,
            delay: self.policy.delay_for_retry(retry),
        }
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
}

/// One attempt on its own task, so a panic counts as a failed attempt
/// instead of unwinding through the worker.
async fn run_attempt(task: &Arc<dyn JobTask>) -> Result<(), AppError> {
    let task = Arc::clone(task);
    match tokio::spawn(async move { task.run().await }).await {
        Ok(result) => result,
        Err(e) => Err(AppError::system("job_attempt", e)),
    }
}

/// Runs `task` until it succeeds or the policy gives up.
pub async fn run_with_retry(
    job_id: &str,
    task: &Arc<dyn JobTask>,
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
) -> JobOutcome {
    let mut state = RetryState::new(policy);

    loop {
        let result = run_attempt(task).await;

        match state.record(&result) {
            RetryStep::Done => {
                return JobOutcome::Succeeded {
                    attempts: state.attempts(),
                }
            }
            RetryStep::Retry { retry, delay } => {
                if let Err(e) = &result {
                    warn!(
                        job_id,
                        retry,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Job failed, retrying"
                    );
                }
                sleeper.sleep(delay).await;
            }
            RetryStep::GiveUp => {
                if let Err(e) = &result {
                    error!(
                        job_id,
                        attempts = state.attempts(),
                        error = %e,
                        "Job failed permanently"
                    );
                }
                return JobOutcome::Exhausted {
                    attempts: state.attempts(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(3));
    }

    #[test]
    fn gives_up_after_max_retries() {
        let mut state = RetryState::new(RetryPolicy::new(2));
        let failed: Result<(), ()> = Err(());

        assert_eq!(
            state.record(&failed),
            RetryStep::Retry { retry: 1, delay: Duration::from_secs(1) }
        );
        assert_eq!(
            state.record(&failed),
            RetryStep::Retry { retry: 2, delay: Duration::from_secs(2) }
        );
        assert_eq!(state.record(&failed), RetryStep::GiveUp);
        assert_eq!(state.attempts(), 3);
    }

    #[test]
    fn zero_retries_means_one_attempt() {
        let mut state = RetryState::new(RetryPolicy::new(0));
        assert_eq!(state.record(&Err::<(), ()>(())), RetryStep::GiveUp);
        assert_eq!(state.attempts(), 1);
    }

    struct Panics;

    #[async_trait]
    impl JobTask for Panics {
        async fn run(&self) -> Result<(), AppError> {
            panic!("task blew up");
        }
    }

    struct NoSleep;

    #[async_trait]
    impl Sleeper for NoSleep {
        async fn sleep(&self, _duration: Duration) {}
    }

    #[tokio::test]
    async fn panicking_attempts_are_failures() {
        let task: Arc<dyn JobTask> = Arc::new(Panics);
        let outcome = run_with_retry("job-1", &task, RetryPolicy::new(1), &NoSleep).await;
        assert_eq!(outcome, JobOutcome::Exhausted { attempts: 2 });
    }

    #[test]
    fn success_stops_immediately() {
        let mut state = RetryState::new(RetryPolicy::new(3));
        assert!(matches!(state.record(&Err::<(), ()>(())), RetryStep::Retry { .. }));
        assert_eq!(state.record(&Ok::<(), ()>(())), RetryStep::Done);
        assert_eq!(state.attempts(), 2);
    }
}
