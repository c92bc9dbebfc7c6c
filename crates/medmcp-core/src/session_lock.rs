//! Per-session serialisation of orchestrator operations, held from the
//! pre-call snapshot until the recommendation is written back, plus the
//! global cap on provider calls.

use std::collections::HashMap;
use std::sync::Arc;

use medmcp_schema::SessionId;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

#[derive(Clone)]
pub struct SessionLockManager {
    locks: Arc<Mutex<HashMap<SessionId, Arc<Semaphore>>>>,
    /// Bounds provider calls across all sessions, including abandoned ones.
    global_semaphore: Option<Arc<Semaphore>>,
}

impl SessionLockManager {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            global_semaphore: None,
        }
    }

    pub fn with_global_limit(max_concurrent: usize) -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            global_semaphore: Some(Arc::new(Semaphore::new(max_concurrent.max(1)))),
        }
    }

    /// Waits for exclusive access to `id`.
    pub async fn acquire(&self, id: SessionId) -> SessionLockGuard {
        let session_sem = self.semaphore_for(id).await;
        SessionLockGuard {
            _session_permit: session_sem.acquire_owned().await.ok(),
        }
    }

    /// Waits for a provider-call slot. The permit must live as long as the
    /// call itself, not the operation that started it. `None` when unbounded.
    pub async fn acquire_call_slot(&self) -> Option<OwnedSemaphorePermit> {
        match &self.global_semaphore {
            Some(sem) => sem.clone().acquire_owned().await.ok(),
            None => None,
        }
    }

    /// Drops the lock entry of an evicted session. Holders keep their permit.
    pub async fn forget(&self, id: SessionId) {
        self.locks.lock().await.remove(&id);
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn semaphore_for(&self, id: SessionId) -> Arc<Semaphore> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(id)
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }
}

impl Default for SessionLockManager {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SessionLockGuard {
    _session_permit: Option<OwnedSemaphorePermit>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_session_is_serialised() {
        let manager = SessionLockManager::new();
        let id = SessionId::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c1 = counter.clone();
        let m1 = manager.clone();
        let first = tokio::spawn(async move {
            let _guard = m1.acquire(id).await;
            c1.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            c1.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let c2 = counter.clone();
        let m2 = manager.clone();
        let second = tokio::spawn(async move {
            let _guard = m2.acquire(id).await;
            assert!(c2.load(Ordering::SeqCst) >= 2);
            c2.fetch_add(1, Ordering::SeqCst);
        });

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn different_sessions_run_in_parallel() {
        let manager = SessionLockManager::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c1 = counter.clone();
        let m1 = manager.clone();
        let slow = tokio::spawn(async move {
            let _guard = m1.acquire(SessionId::new()).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            c1.fetch_add(1, Ordering::SeqCst);
        });

        let c2 = counter.clone();
        let m2 = manager.clone();
        let fast = tokio::spawn(async move {
            let _guard = m2.acquire(SessionId::new()).await;
            c2.fetch_add(1, Ordering::SeqCst);
        });

        fast.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        slow.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn global_limit_bounds_concurrency() {
        let manager = SessionLockManager::with_global_limit(2);
        let in_flight = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let manager = manager.clone();
                let in_flight = in_flight.clone();
                tokio::spawn(async move {
                    let _slot = manager.acquire_call_slot().await;
                    let current = in_flight.fetch_add(1, Ordering::SeqCst);
                    assert!(current < 2);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test]
    async fn session_lock_does_not_take_call_slot() {
        let manager = SessionLockManager::with_global_limit(1);
        let _slot = manager.acquire_call_slot().await;

        let guard = tokio::time::timeout(
            Duration::from_millis(50),
            manager.acquire(SessionId::new()),
        )
        .await;
        assert!(guard.is_ok());
    }

    #[tokio::test]
    async fn unbounded_manager_hands_out_no_slot() {
        let manager = SessionLockManager::new();
        assert!(manager.acquire_call_slot().await.is_none());
    }

    #[tokio::test]
    async fn forget_drops_entry_but_not_held_permit() {
        let manager = SessionLockManager::new();
        let id = SessionId::new();

        let held = manager.acquire(id).await;
        assert_eq!(manager.tracked().await, 1);

        manager.forget(id).await;
        assert_eq!(manager.tracked().await, 0);

        // A fresh entry is created for later callers.
        drop(held);
        let _again = manager.acquire(id).await;
        assert_eq!(manager.tracked().await, 1);
    }
}
