//! Sorted-set-backed queue: unique per bucket, ordered by insertion score.
//!
//! ## Batch Pop
//!
//! ```text
//!   for each bucket, oldest first:
//!     while collected < count and ZCARD > 0:
//!       n = min(count - collected, ZCARD)
//!       AtomicPop:       ZPOPMIN key n
//!       RangeAndRemove:  lock(zset-read) { ZRANGE key 0 n-1 ; ZREM key ... }
//!       empty batch ──> bucket drained concurrently, next bucket
//! ```
//!
//! `ZRANGE` followed by `ZREM` is two round trips. Without the read lock two
//! poppers could read the same ranks and hand out the same members twice.

use super::{validate_count, validate_push, PopStrategy};
use crate::bucket::{BucketKeyDeriver, StructureKind, TimeUnit};
use crate::context::StoreContext;
use crate::coordinator::{acquire, WriteReport};
use crate::error::Result;
use crate::scanner::BucketScanner;
use crate::store::StoreError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Time-bucketed queue over store sorted sets.
///
/// A message already present in the current bucket is rejected without
/// touching its score. Members are scored with a strictly increasing
/// microsecond timestamp, so pops return them in insertion order.
#[derive(Debug, Clone)]
pub struct SortedQueue {
    context: Arc<StoreContext>,
    deriver: BucketKeyDeriver,
}

impl SortedQueue {
    pub fn new(context: Arc<StoreContext>, deriver: BucketKeyDeriver) -> Self {
        Self { context, deriver }
    }

    /// Adds `message` to the current bucket unless it is already there.
    ///
    /// Returns `false` for a duplicate.
    pub async fn push(
        &self,
        prefix: &str,
        message: &str,
        unit: TimeUnit,
        expiry_multiplier: u32,
        cancel: Option<&CancellationToken>,
    ) -> Result<bool> {
        let ttl = validate_push(message, unit, expiry_multiplier)?;
        let key = self.deriver.derive_key(unit, StructureKind::SortedSet, prefix);
        let store = self.context.store();

        let accepted = self
            .context
            .writes()
            .write_with_expiry(store, StructureKind::SortedSet, &key, ttl, cancel, || async {
                let score = self.context.next_score();
                let added = store.zadd_nx(&key, message, score).await?;
                // A concurrent pop may have emptied and deleted the bucket
                // between EXISTS and ZADD. Only a key without an expiry can
                // have been recreated by this add.
                let created_key = added && store.ttl(&key).await?.is_none();
                Ok::<_, StoreError>(WriteReport {
                    accepted: added,
                    created_key,
                })
            })
            .await?;

        if !accepted {
            debug!(key = %key, "Duplicate message rejected");
        }
        Ok(accepted)
    }

    /// Removes up to `count` messages, oldest bucket first and lowest score
    /// first within a bucket.
    ///
    /// `cancel` is only consulted by the range-and-remove strategy while it
    /// waits for the read lock. A cancellation after some messages were
    /// removed ends the drain early and returns them.
    pub async fn pop(
        &self,
        prefix: &str,
        count: usize,
        unit: TimeUnit,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<String>> {
        validate_count(count)?;

        let pattern = self.deriver.derive_pattern(unit, StructureKind::SortedSet, prefix);
        let keys = BucketScanner::new(&self.context)
            .enumerate_bucket_keys(&pattern)
            .await?;
        let store = self.context.store();
        let strategy = self.context.strategy();

        let mut messages = Vec::new();
        'drain: for key in &keys {
            while messages.len() < count {
                let available = store.zcard(key).await?;
                if available == 0 {
                    break;
                }

                let want = (count - messages.len()).min(available);
                let batch: Vec<String> = match strategy {
                    PopStrategy::AtomicPop => store
                        .zpopmin(key, want)
                        .await?
                        .into_iter()
                        .map(|(member, _)| member)
                        .collect(),
                    PopStrategy::RangeAndRemove => {
                        match self.range_and_remove(key, want, cancel).await {
                            Ok(batch) => batch,
                            // Removed messages must still reach the caller
                            Err(err) if err.is_cancelled() && !messages.is_empty() => {
                                debug!(key = %key, returned = messages.len(), "Drain cancelled");
                                break 'drain;
                            }
                            Err(err) => return Err(err),
                        }
                    }
                };

                trace!(key = %key, wanted = want, taken = batch.len(), "Popped sorted batch");
                if batch.is_empty() {
                    break;
                }
                messages.extend(batch);
            }

            if messages.len() >= count {
                break;
            }
        }

        debug!(
            prefix = %prefix,
            unit = %unit,
            requested = count,
            returned = messages.len(),
            buckets = keys.len(),
            strategy = ?strategy,
            "Sorted pop"
        );
        Ok(messages)
    }

    /// Emulates `ZPOPMIN key n` for engines that lack it.
    async fn range_and_remove(
        &self,
        key: &str,
        n: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<String>> {
        let _guard = acquire(self.context.zset_read(), "zset-read", cancel).await?;
        let store = self.context.store();

        let stop = i64::try_from(n).unwrap_or(i64::MAX) - 1;
        let members = store.zrange(key, 0, stop).await?;
        if !members.is_empty() {
            store.zrem(key, &members).await?;
        }
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{BucketFormats, ManualClock};
    use crate::error::QueueError;
    use crate::store::{EngineVersion, MemoryStore, NodeInfo, Store, StoreResult};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, NaiveDateTime};
    use std::fmt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const LEGACY: EngineVersion = EngineVersion::new(4, 0, 14);

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    async fn queue_on(store: MemoryStore, start: &str) -> (SortedQueue, Arc<ManualClock>, Arc<MemoryStore>) {
        let store = Arc::new(store);
        let clock = Arc::new(ManualClock::new(at(start)));
        let context = StoreContext::with_store(store.clone(), 0).await.unwrap();
        let deriver = BucketKeyDeriver::with_clock(BucketFormats::default(), clock.clone());
        (SortedQueue::new(context, deriver), clock, store)
    }

    type Hook = Box<dyn Fn(&MemoryStore, &str) + Send + Sync>;

    /// A `MemoryStore` that runs another client's command right after one of
    /// ours, once `armed` is set.
    struct Interleaved {
        inner: Arc<MemoryStore>,
        armed: AtomicBool,
        after_exists: Option<Hook>,
        after_zadd: Option<Hook>,
        after_zrem: Option<Hook>,
    }

    impl Interleaved {
        fn new(inner: Arc<MemoryStore>) -> Self {
            Self {
                inner,
                armed: AtomicBool::new(false),
                after_exists: None,
                after_zadd: None,
                after_zrem: None,
            }
        }

        fn arm(&self) {
            self.armed.store(true, Ordering::SeqCst);
        }

        fn run(&self, hook: &Option<Hook>, key: &str) {
            if let Some(hook) = hook {
                if self.armed.load(Ordering::SeqCst) {
                    hook(&self.inner, key);
                }
            }
        }
    }

    impl fmt::Debug for Interleaved {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Interleaved").field("inner", &self.inner).finish()
        }
    }

    #[async_trait]
    impl Store for Interleaved {
        async fn nodes(&self) -> StoreResult<Vec<NodeInfo>> {
            Store::nodes(self.inner.as_ref()).await
        }

        async fn keys(&self, node: &NodeInfo, database: i64, pattern: &str) -> StoreResult<Vec<String>> {
            Store::keys(self.inner.as_ref(), node, database, pattern).await
        }

        async fn exists(&self, key: &str) -> StoreResult<bool> {
            let exists = self.inner.exists_sync(key);
            self.run(&self.after_exists, key);
            Ok(exists)
        }

        async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
            Ok(self.inner.expire_sync(key, ttl))
        }

        async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
            Ok(self.inner.ttl_sync(key))
        }

        async fn lpush(&self, key: &str, value: &str) -> StoreResult<usize> {
            self.inner.lpush_sync(key, value)
        }

        async fn rpop(&self, key: &str) -> StoreResult<Option<String>> {
            self.inner.rpop_sync(key)
        }

        async fn llen(&self, key: &str) -> StoreResult<usize> {
            self.inner.llen_sync(key)
        }

        async fn zadd_nx(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
            let added = self.inner.zadd_nx_sync(key, member, score)?;
            self.run(&self.after_zadd, key);
            Ok(added)
        }

        async fn zcard(&self, key: &str) -> StoreResult<usize> {
            self.inner.zcard_sync(key)
        }

        async fn zrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
            self.inner.zrange_sync(key, start, stop)
        }

        async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<usize> {
            let removed = self.inner.zrem_sync(key, members)?;
            self.run(&self.after_zrem, key);
            Ok(removed)
        }

        async fn zpopmin(&self, key: &str, count: usize) -> StoreResult<Vec<(String, f64)>> {
            self.inner.zpopmin_sync(key, count)
        }
    }

    async fn interleaved_queue(store: Arc<Interleaved>, start: &str) -> SortedQueue {
        let clock = Arc::new(ManualClock::new(at(start)));
        let context = StoreContext::with_store(store, 0).await.unwrap();
        SortedQueue::new(context, BucketKeyDeriver::with_clock(BucketFormats::default(), clock))
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let (queue, _, store) = queue_on(MemoryStore::new(), "2026-10-17 14:05:00").await;

        assert!(queue.push("Q", "X", TimeUnit::Minutes, 2, None).await.unwrap());
        assert!(!queue.push("Q", "X", TimeUnit::Minutes, 2, None).await.unwrap());
        assert_eq!(store.zcard_sync("Q_ZSet_Minutes:2026-10-17_14-05").unwrap(), 1);

        let popped = queue.pop("Q", 10, TimeUnit::Minutes, None).await.unwrap();
        assert_eq!(popped, vec!["X"]);
        assert!(queue.pop("Q", 10, TimeUnit::Minutes, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_keeps_original_score() {
        let (queue, _, _) = queue_on(MemoryStore::new(), "2026-10-17 14:05:00").await;

        queue.push("Q", "first", TimeUnit::Hours, 2, None).await.unwrap();
        queue.push("Q", "second", TimeUnit::Hours, 2, None).await.unwrap();
        queue.push("Q", "first", TimeUnit::Hours, 2, None).await.unwrap();

        let popped = queue.pop("Q", 10, TimeUnit::Hours, None).await.unwrap();
        assert_eq!(popped, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_same_content_allowed_in_other_bucket() {
        let (queue, clock, _) = queue_on(MemoryStore::new(), "2026-10-17 14:05:00").await;

        assert!(queue.push("Q", "X", TimeUnit::Minutes, 2, None).await.unwrap());
        clock.advance(ChronoDuration::minutes(1));
        assert!(queue.push("Q", "X", TimeUnit::Minutes, 2, None).await.unwrap());

        let popped = queue.pop("Q", 10, TimeUnit::Minutes, None).await.unwrap();
        assert_eq!(popped, vec!["X", "X"]);
    }

    #[tokio::test]
    async fn test_insertion_order() {
        let (queue, _, _) = queue_on(MemoryStore::new(), "2026-10-17 14:05:00").await;
        // Lexicographic order differs from insertion order
        for msg in ["zulu", "alpha", "mike", "bravo", "yankee"] {
            queue.push("Q", msg, TimeUnit::Hours, 2, None).await.unwrap();
        }

        assert_eq!(
            queue.pop("Q", 3, TimeUnit::Hours, None).await.unwrap(),
            vec!["zulu", "alpha", "mike"]
        );
        assert_eq!(
            queue.pop("Q", 3, TimeUnit::Hours, None).await.unwrap(),
            vec!["bravo", "yankee"]
        );
    }

    #[tokio::test]
    async fn test_ttl_set_once() {
        let (queue, _, store) = queue_on(MemoryStore::new(), "2026-10-17 14:05:00").await;
        let key = "Q_ZSet_Days:2026-10-17";

        queue.push("Q", "a", TimeUnit::Days, 2, None).await.unwrap();
        let ttl = store.ttl_sync(key).unwrap();
        assert!(ttl > Duration::from_secs(2 * 86400 - 10));

        store.expire_sync(key, Duration::from_secs(30));
        queue.push("Q", "b", TimeUnit::Days, 7, None).await.unwrap();
        queue.push("Q", "a", TimeUnit::Days, 7, None).await.unwrap();
        assert!(store.ttl_sync(key).unwrap() <= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_concurrent_pop_keeps_live_ttl() {
        let memory = Arc::new(MemoryStore::new());
        let mut store = Interleaved::new(memory.clone());
        // Another client pops the oldest member between our ZADD and the TTL check
        store.after_zadd = Some(Box::new(|store: &MemoryStore, key: &str| {
            store.zpopmin_sync(key, 1).unwrap();
        }));
        let store = Arc::new(store);
        let queue = interleaved_queue(store.clone(), "2026-10-17 14:05:00").await;
        let key = "Q_ZSet_Days:2026-10-17";

        queue.push("Q", "a", TimeUnit::Days, 2, None).await.unwrap();
        memory.expire_sync(key, Duration::from_secs(30));
        store.arm();

        assert!(queue.push("Q", "b", TimeUnit::Days, 7, None).await.unwrap());
        assert_eq!(memory.zrange_sync(key, 0, -1).unwrap(), vec!["b"]);
        assert!(memory.ttl_sync(key).unwrap() <= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_bucket_recreated_after_drain_gets_ttl() {
        let memory = Arc::new(MemoryStore::new());
        let mut store = Interleaved::new(memory.clone());
        // Another client drains the bucket between our EXISTS and ZADD
        store.after_exists = Some(Box::new(|store: &MemoryStore, key: &str| {
            store.zpopmin_sync(key, 100).unwrap();
        }));
        let store = Arc::new(store);
        let queue = interleaved_queue(store.clone(), "2026-10-17 14:05:00").await;
        let key = "Q_ZSet_Hours:2026-10-17_14";

        queue.push("Q", "a", TimeUnit::Hours, 2, None).await.unwrap();
        store.arm();
        assert!(queue.push("Q", "b", TimeUnit::Hours, 2, None).await.unwrap());

        assert_eq!(memory.zcard_sync(key).unwrap(), 1);
        let ttl = memory.ttl_sync(key).unwrap();
        assert!(ttl > Duration::from_secs(2 * 3600 - 10));
    }

    #[tokio::test]
    async fn test_multi_bucket_drain_order() {
        let (queue, clock, _) = queue_on(MemoryStore::new().with_nodes(3), "2026-10-17 14:05:00").await;
        let mut expected = Vec::new();
        for bucket in 0..4 {
            for i in 0..3 {
                let msg = format!("b{}-{}", bucket, i);
                queue.push("Q", &msg, TimeUnit::Minutes, 10, None).await.unwrap();
                expected.push(msg);
            }
            clock.advance(ChronoDuration::minutes(1));
        }

        let popped = queue.pop("Q", 100, TimeUnit::Minutes, None).await.unwrap();
        assert_eq!(popped, expected);
    }

    #[tokio::test]
    async fn test_range_and_remove_matches_atomic_pop() {
        let load = |queue: SortedQueue, clock: Arc<ManualClock>| async move {
            for bucket in 0..3 {
                for i in 0..4 {
                    queue
                        .push("Q", &format!("m{}-{}", bucket, i), TimeUnit::Hours, 2, None)
                        .await
                        .unwrap();
                }
                clock.advance(ChronoDuration::hours(1));
            }
            let mut drained = Vec::new();
            for count in [3, 5, 1, 10] {
                drained.push(queue.pop("Q", count, TimeUnit::Hours, None).await.unwrap());
            }
            drained
        };

        let (modern, clock, _) = queue_on(MemoryStore::new(), "2026-10-17 08:00:00").await;
        assert_eq!(modern.context.strategy(), PopStrategy::AtomicPop);
        let atomic = load(modern, clock).await;

        let (legacy, clock, _) =
            queue_on(MemoryStore::new().with_version(LEGACY), "2026-10-17 08:00:00").await;
        assert_eq!(legacy.context.strategy(), PopStrategy::RangeAndRemove);
        let emulated = load(legacy, clock).await;

        assert_eq!(atomic, emulated);
        assert_eq!(atomic[0], vec!["m0-0", "m0-1", "m0-2"]);
        assert_eq!(atomic[1], vec!["m0-3", "m1-0", "m1-1", "m1-2", "m1-3"]);
    }

    #[tokio::test]
    async fn test_concurrent_legacy_poppers_never_duplicate() {
        let (queue, _, _) =
            queue_on(MemoryStore::new().with_version(LEGACY), "2026-10-17 14:05:00").await;
        for i in 0..300 {
            queue
                .push("Q", &format!("m{:03}", i), TimeUnit::Hours, 2, None)
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..6 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                loop {
                    let batch = queue.pop("Q", 11, TimeUnit::Hours, None).await.unwrap();
                    if batch.is_empty() {
                        return got;
                    }
                    got.extend(batch);
                }
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        assert_eq!(all.len(), 300);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 300);
    }

    #[tokio::test]
    async fn test_cancelled_waiting_for_read_lock() {
        let (queue, _, store) =
            queue_on(MemoryStore::new().with_version(LEGACY), "2026-10-17 14:05:00").await;
        queue.push("Q", "m", TimeUnit::Hours, 2, None).await.unwrap();

        let held = queue.context.zset_read().lock().await;
        let cancel = CancellationToken::new();
        let pending = queue.pop("Q", 1, TimeUnit::Hours, Some(&cancel));
        cancel.cancel();
        let err = pending.await.unwrap_err();
        drop(held);

        assert!(matches!(err, QueueError::Cancelled { lock: "zset-read" }));
        assert_eq!(store.zcard_sync("Q_ZSet_Hours:2026-10-17_14").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_mid_drain_returns_removed_messages() {
        let cancel = CancellationToken::new();
        let memory = Arc::new(MemoryStore::new().with_version(LEGACY));
        let mut store = Interleaved::new(memory.clone());
        let token = cancel.clone();
        store.after_zrem = Some(Box::new(move |_: &MemoryStore, _: &str| token.cancel()));
        let store = Arc::new(store);

        let clock = Arc::new(ManualClock::new(at("2026-10-17 14:05:00")));
        let context = StoreContext::with_store(store.clone(), 0).await.unwrap();
        let queue = SortedQueue::new(
            context,
            BucketKeyDeriver::with_clock(BucketFormats::default(), clock.clone()),
        );
        queue.push("Q", "m1", TimeUnit::Hours, 2, None).await.unwrap();
        clock.advance(ChronoDuration::hours(1));
        queue.push("Q", "m2", TimeUnit::Hours, 2, None).await.unwrap();
        store.arm();

        let popped = queue.pop("Q", 10, TimeUnit::Hours, Some(&cancel)).await.unwrap();
        assert_eq!(popped, vec!["m1"]);
        assert_eq!(memory.zcard_sync("Q_ZSet_Hours:2026-10-17_15").unwrap(), 1);

        // Nothing removed yet, so the cancellation is reported
        let err = queue.pop("Q", 10, TimeUnit::Hours, Some(&cancel)).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(memory.zcard_sync("Q_ZSet_Hours:2026-10-17_15").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_atomic_pop_ignores_cancellation() {
        let (queue, _, _) = queue_on(MemoryStore::new(), "2026-10-17 14:05:00").await;
        queue.push("Q", "m", TimeUnit::Hours, 2, None).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let popped = queue.pop("Q", 1, TimeUnit::Hours, Some(&cancel)).await.unwrap();
        assert_eq!(popped, vec!["m"]);
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let (queue, _, store) = queue_on(MemoryStore::new(), "2026-10-17 14:05:00").await;

        assert!(matches!(
            queue.push("Q", "", TimeUnit::Hours, 2, None).await,
            Err(QueueError::InvalidArgument(_))
        ));
        assert!(matches!(
            queue.push("Q", "m", TimeUnit::Hours, 0, None).await,
            Err(QueueError::InvalidArgument(_))
        ));
        assert!(matches!(
            queue.pop("Q", 0, TimeUnit::Hours, None).await,
            Err(QueueError::InvalidArgument(_))
        ));
        assert!(store.is_empty());
    }
}
