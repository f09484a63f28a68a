//! Async Queue Client
//!
//! [`RedisQueue`] is the suspension-based entry point. Every call yields
//! while it waits for a lock or a store reply, so one task can drive many
//! queues on a single runtime. [`crate::blocking::RedisQueue`] wraps the same
//! calls for threads that want to block instead.
//!
//! ```no_run
//! use bucketq::{QueueConfig, RedisQueue, TimeUnit};
//!
//! # async fn demo() -> bucketq::Result<()> {
//! let queue = RedisQueue::connect(&QueueConfig::default()).await?;
//!
//! queue.send_queue("orders", "order-17", 2, TimeUnit::Hours).await?;
//! let batch = queue.get_queue_messages("orders", 100, TimeUnit::Hours).await?;
//! # Ok(())
//! # }
//! ```

use crate::bucket::{BucketKeyDeriver, TimeUnit};
use crate::config::QueueConfig;
use crate::context::StoreContext;
use crate::error::Result;
use crate::queue::{ListQueue, SortedQueue};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Time-bucketed queues over one store context.
///
/// Cloning is cheap; clones share the context, its connection and its locks.
#[derive(Debug, Clone)]
pub struct RedisQueue {
    context: Arc<StoreContext>,
    list: ListQueue,
    sorted: SortedQueue,
    cancel: Option<CancellationToken>,
}

impl RedisQueue {
    /// Connects through the process-wide [`StoreContext::global`].
    ///
    /// The bucket formats come from `config` even when the context already
    /// existed; connection settings of later calls are ignored.
    pub async fn connect(config: &QueueConfig) -> Result<Self> {
        config.validate()?;
        let deriver = BucketKeyDeriver::new(config.formats()?);
        let context = StoreContext::global(config).await?;
        Ok(Self::new(context, deriver))
    }

    pub fn new(context: Arc<StoreContext>, deriver: BucketKeyDeriver) -> Self {
        Self {
            list: ListQueue::new(Arc::clone(&context), deriver.clone()),
            sorted: SortedQueue::new(Arc::clone(&context), deriver),
            context,
            cancel: None,
        }
    }

    /// Binds `token` to every call made through the returned handle.
    ///
    /// Once the token fires, calls waiting for a lock fail with
    /// [`QueueError::Cancelled`](crate::QueueError::Cancelled) and write
    /// nothing. Calls that take no lock, such as list pops, are unaffected.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn context(&self) -> &Arc<StoreContext> {
        &self.context
    }

    /// Pushes to the list queue of `prefix`. Duplicates are allowed.
    pub async fn send_queue(
        &self,
        prefix: &str,
        message: &str,
        expiry_multiplier: u32,
        unit: TimeUnit,
    ) -> Result<bool> {
        self.list
            .push(prefix, message, unit, expiry_multiplier, self.cancel.as_ref())
            .await
    }

    /// Pops up to `count` messages from the list queue of `prefix`.
    pub async fn get_queue_messages(
        &self,
        prefix: &str,
        count: usize,
        unit: TimeUnit,
    ) -> Result<Vec<String>> {
        self.list.pop(prefix, count, unit).await
    }

    /// Adds to the sorted queue of `prefix`. Returns `false` if the message
    /// is already in the current bucket.
    pub async fn send_sorted_queue(
        &self,
        prefix: &str,
        message: &str,
        expiry_multiplier: u32,
        unit: TimeUnit,
    ) -> Result<bool> {
        self.sorted
            .push(prefix, message, unit, expiry_multiplier, self.cancel.as_ref())
            .await
    }

    /// Pops up to `count` unique messages in insertion order.
    pub async fn get_sorted_queue_messages(
        &self,
        prefix: &str,
        count: usize,
        unit: TimeUnit,
    ) -> Result<Vec<String>> {
        self.sorted
            .pop(prefix, count, unit, self.cancel.as_ref())
            .await
    }
}
