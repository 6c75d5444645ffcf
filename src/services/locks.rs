//! Per-object mutual exclusion.
//!
//! A [`LockService`] hands out leases keyed by content hash. The tiered file
//! system wraps it with a bounded wait and returns an [`ObjectLock`] guard;
//! the guard is released explicitly by the manipulator loop and, as a last
//! resort, on drop.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::errors::TierResult;

#[async_trait]
pub trait LockService: Send + Sync {
    /// Single non-blocking attempt to take `key` for `owner` for at most `lease`.
    async fn try_acquire(&self, key: &str, owner: &str, lease: Duration) -> TierResult<bool>;

    /// Release `key` if `owner` still holds it. Releasing a lock that expired
    /// or was never held is a no-op.
    async fn release(&self, key: &str, owner: &str) -> TierResult<()>;
}

/// Process-local lock table. Expired leases are swept on every attempt.
#[derive(Clone, Default)]
pub struct InMemoryLockService {
    locks: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) locks.
    pub fn held(&self) -> usize {
        let now = Instant::now();
        let locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.values().filter(|(_, expires)| *expires > now).count()
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn try_acquire(&self, key: &str, owner: &str, lease: Duration) -> TierResult<bool> {
        let now = Instant::now();
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        locks.retain(|held_key, (_, expires)| {
            let keep = *expires > now;
            if !keep {
                debug!(key = %held_key, "removing expired object lock");
            }
            keep
        });

        if locks.contains_key(key) {
            return Ok(false);
        }
        locks.insert(key.to_string(), (owner.to_string(), now + lease));
        Ok(true)
    }

    async fn release(&self, key: &str, owner: &str) -> TierResult<()> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks.get(key).is_some_and(|(holder, _)| holder == owner) {
            locks.remove(key);
        }
        Ok(())
    }
}

/// Lock rows in the `object_locks` table. A row whose lease has expired can
/// be taken over by the next caller.
#[derive(Clone)]
pub struct SqliteLockService {
    db: Arc<SqlitePool>,
}

impl SqliteLockService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LockService for SqliteLockService {
    async fn try_acquire(&self, key: &str, owner: &str, lease: Duration) -> TierResult<bool> {
        let now = Utc::now().timestamp();
        let expires_at = now + lease.as_secs().max(1) as i64;
        let result = sqlx::query(
            "INSERT INTO object_locks (contenthash, owner, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(contenthash) DO UPDATE SET
                owner = excluded.owner,
                expires_at = excluded.expires_at
             WHERE object_locks.expires_at <= ?",
        )
        .bind(key)
        .bind(owner)
        .bind(expires_at)
        .bind(now)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &str, owner: &str) -> TierResult<()> {
        sqlx::query("DELETE FROM object_locks WHERE contenthash = ? AND owner = ?")
            .bind(key)
            .bind(owner)
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}

/// Guard for a held object lock.
pub struct ObjectLock {
    service: Arc<dyn LockService>,
    key: String,
    owner: String,
    released: bool,
}

impl ObjectLock {
    pub(crate) fn new(service: Arc<dyn LockService>, key: String, owner: String) -> Self {
        Self {
            service,
            key,
            owner,
            released: false,
        }
    }

    /// Release now and wait for the backend to confirm.
    pub async fn release(mut self) {
        self.released = true;
        if let Err(err) = self.service.release(&self.key, &self.owner).await {
            warn!(key = %self.key, error = %err, "failed to release object lock, lease will expire");
        }
    }
}

impl Drop for ObjectLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let service = self.service.clone();
        let key = std::mem::take(&mut self.key);
        let owner = std::mem::take(&mut self.owner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = service.release(&key, &owner).await {
                        warn!(key = %key, error = %err, "failed to release dropped object lock");
                    }
                });
            }
            Err(_) => warn!(key = %key, "object lock dropped outside a runtime, lease will expire"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    const LEASE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn in_memory_lock_is_exclusive() {
        let locks = InMemoryLockService::new();
        assert!(locks.try_acquire("a", "one", LEASE).await.unwrap());
        assert!(!locks.try_acquire("a", "two", LEASE).await.unwrap());
        assert!(locks.try_acquire("b", "two", LEASE).await.unwrap());

        locks.release("a", "two").await.unwrap();
        assert!(!locks.try_acquire("a", "two", LEASE).await.unwrap());

        locks.release("a", "one").await.unwrap();
        assert!(locks.try_acquire("a", "two", LEASE).await.unwrap());
    }

    #[tokio::test]
    async fn in_memory_lock_expires() {
        let locks = InMemoryLockService::new();
        assert!(locks.try_acquire("a", "one", Duration::ZERO).await.unwrap());
        assert!(locks.try_acquire("a", "two", LEASE).await.unwrap());
        assert_eq!(locks.held(), 1);
    }

    #[tokio::test]
    async fn sqlite_lock_is_exclusive_until_released() {
        let locks = SqliteLockService::new(Arc::new(db::connect_in_memory().await.unwrap()));
        assert!(locks.try_acquire("a", "one", LEASE).await.unwrap());
        assert!(!locks.try_acquire("a", "two", LEASE).await.unwrap());

        locks.release("a", "one").await.unwrap();
        assert!(locks.try_acquire("a", "two", LEASE).await.unwrap());
    }

    #[tokio::test]
    async fn sqlite_lock_takes_over_expired_lease() {
        let pool = Arc::new(db::connect_in_memory().await.unwrap());
        sqlx::query("INSERT INTO object_locks (contenthash, owner, expires_at) VALUES ('a', 'gone', 0)")
            .execute(&*pool)
            .await
            .unwrap();

        let locks = SqliteLockService::new(pool);
        assert!(locks.try_acquire("a", "two", LEASE).await.unwrap());
    }

    #[tokio::test]
    async fn dropped_guard_releases() {
        let locks = Arc::new(InMemoryLockService::new());
        assert!(locks.try_acquire("a", "one", LEASE).await.unwrap());
        let guard = ObjectLock::new(locks.clone(), "a".into(), "one".into());
        drop(guard);
        tokio::task::yield_now().await;
        assert_eq!(locks.held(), 0);
    }
}
