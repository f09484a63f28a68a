//! Blocking Queue Client
//!
//! Thread-blocking wrapper over [`crate::RedisQueue`]. Each call parks the
//! calling thread until the lock and the store round trips complete; the
//! algorithms are the async ones driven to completion on a shared runtime,
//! so both forms behave identically.
//!
//! The runtime is created on first use and lives for the rest of the
//! process. It keeps one worker thread, which also drives the connection of
//! the process-wide [`StoreContext`] when that context was created here.
//!
//! Calling these methods from inside an async runtime is a mistake (it
//! would block a runtime worker); they return
//! [`QueueError::Configuration`] instead of blocking.
//!
//! ```no_run
//! use bucketq::blocking::RedisQueue;
//! use bucketq::{QueueConfig, TimeUnit};
//!
//! let queue = RedisQueue::connect(&QueueConfig::default())?;
//! for i in 0..10 {
//!     queue.send_queue("Q", &format!("A{}", i), 2, TimeUnit::Hours)?;
//! }
//! let first = queue.get_queue_messages("Q", 5, TimeUnit::Hours)?;
//! # Ok::<(), bucketq::QueueError>(())
//! ```

use crate::bucket::{BucketKeyDeriver, TimeUnit};
use crate::client;
use crate::config::QueueConfig;
use crate::context::StoreContext;
use crate::error::{QueueError, Result};
use crate::store::Store;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

fn runtime() -> Result<&'static Runtime> {
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }
    let runtime = Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("bucketq-blocking")
        .enable_all()
        .build()
        .map_err(|e| QueueError::config(format!("failed to start runtime: {}", e)))?;
    // A racing thread may have won; its runtime is kept and ours dropped
    Ok(RUNTIME.get_or_init(|| runtime))
}

fn block_on<F, T>(future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if Handle::try_current().is_ok() {
        return Err(QueueError::config(
            "blocking queue called from inside an async runtime; use bucketq::RedisQueue",
        ));
    }
    runtime()?.block_on(future)
}

/// Blocking form of [`crate::RedisQueue`].
#[derive(Debug, Clone)]
pub struct RedisQueue {
    inner: client::RedisQueue,
}

impl RedisQueue {
    /// Connects through the process-wide [`StoreContext::global`].
    pub fn connect(config: &QueueConfig) -> Result<Self> {
        let inner = block_on(client::RedisQueue::connect(config))?;
        Ok(Self { inner })
    }

    /// Builds a queue over `store`, e.g. an embedded
    /// [`MemoryStore`](crate::store::MemoryStore).
    pub fn with_store(store: Arc<dyn Store>, database: i64, deriver: BucketKeyDeriver) -> Result<Self> {
        let context = block_on(StoreContext::with_store(store, database))?;
        Ok(Self::new(context, deriver))
    }

    pub fn new(context: Arc<StoreContext>, deriver: BucketKeyDeriver) -> Self {
        Self {
            inner: client::RedisQueue::new(context, deriver),
        }
    }

    /// Binds `token`, which may be cancelled from any thread.
    ///
    /// See [`crate::RedisQueue::with_cancellation`].
    pub fn with_cancellation(self, token: CancellationToken) -> Self {
        Self {
            inner: self.inner.with_cancellation(token),
        }
    }

    pub fn context(&self) -> &Arc<StoreContext> {
        self.inner.context()
    }

    pub fn send_queue(
        &self,
        prefix: &str,
        message: &str,
        expiry_multiplier: u32,
        unit: TimeUnit,
    ) -> Result<bool> {
        block_on(self.inner.send_queue(prefix, message, expiry_multiplier, unit))
    }

    pub fn get_queue_messages(&self, prefix: &str, count: usize, unit: TimeUnit) -> Result<Vec<String>> {
        block_on(self.inner.get_queue_messages(prefix, count, unit))
    }

    pub fn send_sorted_queue(
        &self,
        prefix: &str,
        message: &str,
        expiry_multiplier: u32,
        unit: TimeUnit,
    ) -> Result<bool> {
        block_on(self.inner.send_sorted_queue(prefix, message, expiry_multiplier, unit))
    }

    pub fn get_sorted_queue_messages(
        &self,
        prefix: &str,
        count: usize,
        unit: TimeUnit,
    ) -> Result<Vec<String>> {
        block_on(self.inner.get_sorted_queue_messages(prefix, count, unit))
    }
}
