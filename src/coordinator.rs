//! Write Coordination
//!
//! A bucket must get its TTL exactly once, from the writer that created it,
//! so the TTL measures time since the bucket's first message. Writers of one
//! structure kind run the sequence below under a shared lock; list and
//! sorted-set writers use different locks and never wait on each other.
//!
//! ```text
//!   lock(kind) ──> EXISTS key ──> push/add ──> created? ──> EXPIRE key ttl
//!        ▲                                        │
//!        └──────────────── unlock ◄───────────────┘
//! ```
//!
//! Without the lock a second writer could run its existence check after the
//! first writer's push created the key but before the first writer set the
//! TTL. Both would skip the expiry and the bucket would never be reclaimed.

use crate::bucket::StructureKind;
use crate::error::{QueueError, Result};
use crate::store::{Store, StoreResult};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Outcome of a single push or add, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    /// The store accepted the message
    pub accepted: bool,
    /// The write itself is known to have created the key
    pub created_key: bool,
}

/// Waits for `lock`, giving up if `cancel` fires first.
///
/// An already-cancelled token wins even if the lock is free.
pub(crate) async fn acquire<'a>(
    lock: &'a Mutex<()>,
    name: &'static str,
    cancel: Option<&CancellationToken>,
) -> Result<MutexGuard<'a, ()>> {
    let Some(cancel) = cancel else {
        return Ok(lock.lock().await);
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(lock = name, "Cancelled while waiting for lock");
            Err(QueueError::Cancelled { lock: name })
        }
        guard = lock.lock() => Ok(guard),
    }
}

/// Serialises writes per structure kind and sets bucket TTLs on creation.
#[derive(Debug, Default)]
pub struct WriteCoordinator {
    list_write: Mutex<()>,
    zset_write: Mutex<()>,
}

impl WriteCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, kind: StructureKind) -> (&Mutex<()>, &'static str) {
        match kind {
            StructureKind::List => (&self.list_write, "list-write"),
            StructureKind::SortedSet => (&self.zset_write, "zset-write"),
        }
    }

    /// Runs `write` against `key` under the lock for `kind`, setting `ttl`
    /// if this write created the bucket.
    ///
    /// Returns whether the store accepted the message. Cancellation is only
    /// observed while waiting for the lock; once the lock is held the whole
    /// sequence runs to completion or to the first store error.
    pub async fn write_with_expiry<F, Fut>(
        &self,
        store: &dyn Store,
        kind: StructureKind,
        key: &str,
        ttl: Duration,
        cancel: Option<&CancellationToken>,
        write: F,
    ) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoreResult<WriteReport>>,
    {
        let (lock, name) = self.lock_for(kind);
        let _guard = acquire(lock, name, cancel).await?;

        let existed = store.exists(key).await?;
        let report = write().await?;

        // A bucket drained to empty disappears; the write reports when it
        // recreated the key even though EXISTS saw it a moment ago.
        if report.accepted && (!existed || report.created_key) {
            let applied = store.expire(key, ttl).await?;
            debug!(
                key = %key,
                kind = %kind,
                ttl_secs = ttl.as_secs(),
                applied = applied,
                "Bucket created"
            );
        } else {
            trace!(key = %key, accepted = report.accepted, "Write to existing bucket");
        }

        Ok(report.accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(7200);

    async fn push(coord: &WriteCoordinator, store: &MemoryStore, key: &str, msg: &str) -> bool {
        coord
            .write_with_expiry(store, StructureKind::List, key, TTL, None, || async {
                store.lpush(key, msg).await.map(|len| WriteReport {
                    accepted: len > 0,
                    created_key: len == 1,
                })
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ttl_set_on_create() {
        let coord = WriteCoordinator::new();
        let store = MemoryStore::new();

        assert!(push(&coord, &store, "b", "m1").await);
        let ttl = store.ttl_sync("b").unwrap();
        assert!(ttl > Duration::from_secs(7190) && ttl <= TTL);
    }

    #[tokio::test]
    async fn test_ttl_not_reset_by_later_writers() {
        let coord = WriteCoordinator::new();
        let store = MemoryStore::new();

        push(&coord, &store, "b", "m1").await;
        // Shorten the TTL by hand; a later write must leave it alone
        store.expire_sync("b", Duration::from_secs(100));
        push(&coord, &store, "b", "m2").await;

        assert!(store.ttl_sync("b").unwrap() <= Duration::from_secs(100));
    }

    #[tokio::test]
    async fn test_rejected_write_sets_no_ttl() {
        let coord = WriteCoordinator::new();
        let store = MemoryStore::new();

        let accepted = coord
            .write_with_expiry(&store, StructureKind::SortedSet, "z", TTL, None, || async {
                Ok::<_, StoreError>(WriteReport {
                    accepted: false,
                    created_key: false,
                })
            })
            .await
            .unwrap();
        assert!(!accepted);
        assert!(!store.exists_sync("z"));
    }

    #[tokio::test]
    async fn test_concurrent_creators_set_ttl() {
        let coord = Arc::new(WriteCoordinator::new());
        let store = Arc::new(MemoryStore::new());

        let mut handles = Vec::new();
        for i in 0..16 {
            let coord = Arc::clone(&coord);
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                push(&coord, &store, "b", &format!("m{}", i)).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(store.llen_sync("b").unwrap(), 16);
        assert!(store.ttl_sync("b").is_some());
    }

    #[tokio::test]
    async fn test_cancelled_while_waiting() {
        let coord = WriteCoordinator::new();
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();

        let (lock, _) = coord.lock_for(StructureKind::List);
        let held = lock.lock().await;

        let waiter = coord.write_with_expiry(
            &store,
            StructureKind::List,
            "b",
            TTL,
            Some(&cancel),
            || async { store.lpush("b", "m").await.map(|_| WriteReport { accepted: true, created_key: true }) },
        );
        cancel.cancel();
        let err = waiter.await.unwrap_err();
        drop(held);

        assert!(matches!(err, QueueError::Cancelled { lock: "list-write" }));
        assert!(!store.exists_sync("b"));
    }

    #[tokio::test]
    async fn test_kinds_use_separate_locks() {
        let coord = WriteCoordinator::new();
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();

        let (list_lock, _) = coord.lock_for(StructureKind::List);
        let _held = list_lock.lock().await;

        // Sorted-set writers proceed while the list lock is held
        let accepted = coord
            .write_with_expiry(&store, StructureKind::SortedSet, "z", TTL, Some(&cancel), || async {
                store.zadd_nx("z", "m", 1.0).await.map(|added| WriteReport {
                    accepted: added,
                    created_key: false,
                })
            })
            .await
            .unwrap();
        assert!(accepted);
        assert!(store.ttl_sync("z").is_some());
    }

    #[tokio::test]
    async fn test_acquire_without_token() {
        let lock = Mutex::new(());
        let guard = acquire(&lock, "test", None).await.unwrap();
        drop(guard);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = acquire(&lock, "test", Some(&cancel)).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
