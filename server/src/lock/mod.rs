//! Short-lived exclusive locks keyed by request identity.
//!
//! A lock only rejects concurrent duplicates. Correctness of the quota ledger
//! never depends on it: the reservation transaction holds on its own.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::utils::error::{AppError, Rule};

pub mod memory;
pub mod redis;

pub use memory::InMemoryLockStore;
pub use self::redis::RedisLockStore;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock store error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Backend for [`IdempotencyLock`].
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Sets `key` to `token` for `ttl` unless the key already exists.
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Deletes `key` only if it still holds `token`.
    async fn release(&self, key: &str, token: &str) -> Result<(), LockError>;
}

/// A held lock.
///
/// Prefer [`IdempotencyLock::release`]. A guard dropped without it, for example
/// when a request future is cancelled, releases from a spawned task.
pub struct LockGuard {
    key: String,
    token: String,
    store: Option<Arc<dyn LockStore>>,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("released", &self.store.is_none())
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };
        // Without a runtime the TTL is the only way out.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "Lock dropped outside a runtime, left to expire");
            return;
        };

        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        debug!(key = %key, "Releasing abandoned lock");
        handle.spawn(async move {
            if let Err(e) = store.release(&key, &token).await {
                warn!(key = %key, error = %e, "Failed to release abandoned lock");
            }
        });
    }
}

#[derive(Clone)]
pub struct IdempotencyLock {
    store: Arc<dyn LockStore>,
}

impl IdempotencyLock {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    pub fn order_key(user_id: Uuid, event_id: Uuid) -> String {
        format!("order_lock:{user_id}:{event_id}")
    }

    pub fn payment_key(payment_id: Uuid) -> String {
        format!("payment_lock:{payment_id}")
    }

    pub async fn acquire(&self, key: String, ttl: Duration) -> Result<LockGuard, AppError> {
        let token = Uuid::new_v4().to_string();

        let acquired = self
            .store
            .try_acquire(&key, &token, ttl)
            .await
            .map_err(|e| AppError::system("acquire_lock", e))?;

        if !acquired {
            debug!(key = %key, "Lock already held");
            return Err(AppError::rule(
                Rule::RequestInFlight,
                "request is being processed, please retry later",
            ));
        }

        Ok(LockGuard {
            key,
            token,
            store: Some(Arc::clone(&self.store)),
        })
    }

    /// Best effort. A failed release is left to the TTL.
    pub async fn release(&self, mut guard: LockGuard) {
        let Some(store) = guard.store.take() else {
            return;
        };
        if let Err(e) = store.release(&guard.key, &guard.token).await {
            warn!(key = %guard.key, error = %e, "Failed to release lock");
        }
    }

    /// Runs `work` while holding `key`, releasing it whatever the outcome,
    /// including cancellation of the returned future.
    pub async fn with_lock<T, F, Fut>(&self, key: String, ttl: Duration, work: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let guard = self.acquire(key, ttl).await?;
        let result = work().await;
        self.release(guard).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock() -> IdempotencyLock {
        IdempotencyLock::new(Arc::new(InMemoryLockStore::new()))
    }

    #[tokio::test]
    async fn second_holder_is_rejected_until_release() {
        let lock = lock();
        let key = IdempotencyLock::order_key(Uuid::new_v4(), Uuid::new_v4());

        let guard = lock.acquire(key.clone(), Duration::from_secs(30)).await.unwrap();
        let err = lock.acquire(key.clone(), Duration::from_secs(30)).await.unwrap_err();
        assert_eq!(err.violated_rule(), Some(Rule::RequestInFlight));

        lock.release(guard).await;
        assert!(lock.acquire(key, Duration::from_secs(30)).await.is_ok());
    }

    #[tokio::test]
    async fn with_lock_releases_on_error() {
        let lock = lock();
        let key = IdempotencyLock::payment_key(Uuid::new_v4());

        let result: Result<(), AppError> = lock
            .with_lock(key.clone(), Duration::from_secs(30), || async {
                Err(AppError::rule(Rule::OrderStatus, "boom"))
            })
            .await;
        assert!(result.is_err());

        let value = lock
            .with_lock(key, Duration::from_secs(30), || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_work_releases_the_lock() {
        let store = Arc::new(InMemoryLockStore::new());
        let lock = IdempotencyLock::new(store.clone());
        let key = IdempotencyLock::order_key(Uuid::new_v4(), Uuid::new_v4());

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            lock.with_lock(key.clone(), Duration::from_secs(300), || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }),
        )
        .await;
        assert!(abandoned.is_err());

        for _ in 0..10 {
            if !store.is_held(&key) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!store.is_held(&key));
        assert!(lock.acquire(key, Duration::from_secs(30)).await.is_ok());
    }

    #[tokio::test]
    async fn explicit_release_is_not_repeated_on_drop() {
        let store = Arc::new(InMemoryLockStore::new());
        let lock = IdempotencyLock::new(store.clone());
        let key = IdempotencyLock::payment_key(Uuid::new_v4());

        let first = lock.acquire(key.clone(), Duration::from_secs(30)).await.unwrap();
        lock.release(first).await;
        let second = lock.acquire(key.clone(), Duration::from_secs(30)).await.unwrap();

        tokio::task::yield_now().await;
        assert!(store.is_held(&key));
        drop(second);
    }

    #[test]
    fn keys_are_scoped_by_identity() {
        let user = Uuid::nil();
        let event = Uuid::nil();
        assert_eq!(
            IdempotencyLock::order_key(user, event),
            format!("order_lock:{user}:{event}")
        );
        assert!(IdempotencyLock::payment_key(user).starts_with("payment_lock:"));
    }
}
