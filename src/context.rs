//! Store Context
//!
//! A [`StoreContext`] is everything the queues share for one store: the
//! connection, the node list, the engine version and the locks. It is built
//! once and handed to every queue as an `Arc`.
//!
//! ## Lifecycle
//!
//! ```text
//!   QueueConfig ──validate──> connect ──> INFO (nodes, version)
//!                                              │
//!                                              ▼
//!                               PopStrategy chosen once, never re-checked
//! ```
//!
//! [`StoreContext::global`] keeps one context per process: the first call
//! connects, every later call returns that same context whatever
//! configuration it passes. Queues built from it share one connection and one
//! set of locks, so writers in different parts of the program still
//! serialise against each other.

use crate::config::QueueConfig;
use crate::coordinator::WriteCoordinator;
use crate::error::{QueueError, Result};
use crate::queue::PopStrategy;
use crate::store::{EngineVersion, NodeInfo, RespStore, Store};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::info;

static GLOBAL: OnceCell<Arc<StoreContext>> = OnceCell::const_new();

/// Strictly increasing insertion scores in microseconds since the epoch.
///
/// Two adds in the same microsecond still get distinct, ordered scores.
#[derive(Debug, Default)]
pub(crate) struct ScoreClock {
    last: AtomicI64,
}

impl ScoreClock {
    pub(crate) fn next(&self) -> f64 {
        let now = chrono::Utc::now().timestamp_micros();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate as f64,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Shared connection, node list, engine version and locks for one store.
#[derive(Debug)]
pub struct StoreContext {
    store: Arc<dyn Store>,
    nodes: Vec<NodeInfo>,
    database: i64,
    version: EngineVersion,
    strategy: PopStrategy,
    writes: WriteCoordinator,
    zset_read: Mutex<()>,
    scores: ScoreClock,
}

impl StoreContext {
    /// Validates `config` and connects to the store it names.
    pub async fn connect(config: &QueueConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let store = RespStore::connect(config.address(), config.password.clone(), config.database).await?;
        Self::with_store(Arc::new(store), config.database).await
    }

    /// Builds a context over an existing store, discovering its nodes.
    ///
    /// The pop strategy follows the version of the first node.
    pub async fn with_store(store: Arc<dyn Store>, database: i64) -> Result<Arc<Self>> {
        if database < 0 {
            return Err(QueueError::config(format!(
                "database index must be >= 0, got {}",
                database
            )));
        }

        let nodes = store.nodes().await?;
        let version = nodes
            .first()
            .map(|n| n.version)
            .ok_or_else(|| QueueError::config("store reported no nodes"))?;
        let strategy = PopStrategy::for_version(version);

        info!(
            nodes = nodes.len(),
            database = database,
            version = %version,
            strategy = ?strategy,
            "Store context initialized"
        );

        Ok(Arc::new(Self {
            store,
            nodes,
            database,
            version,
            strategy,
            writes: WriteCoordinator::new(),
            zset_read: Mutex::new(()),
            scores: ScoreClock::default(),
        }))
    }

    /// The process-wide context, connected on first use.
    ///
    /// Concurrent first calls connect once; a failed attempt leaves the slot
    /// empty so a later call can try again. An invalid `config` is rejected
    /// even once the context exists. The connection is driven by the runtime
    /// that made the first call, which must outlive its users.
    pub async fn global(config: &QueueConfig) -> Result<Arc<Self>> {
        config.validate()?;
        GLOBAL
            .get_or_try_init(|| Self::connect(config))
            .await
            .map(Arc::clone)
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn nodes(&self) -> &[NodeInfo] {
        &self.nodes
    }

    pub fn database(&self) -> i64 {
        self.database
    }

    pub fn version(&self) -> EngineVersion {
        self.version
    }

    pub fn strategy(&self) -> PopStrategy {
        self.strategy
    }

    pub fn writes(&self) -> &WriteCoordinator {
        &self.writes
    }

    pub(crate) fn zset_read(&self) -> &Mutex<()> {
        &self.zset_read
    }

    pub(crate) fn next_score(&self) -> f64 {
        self.scores.next()
    }
}
