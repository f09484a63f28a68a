//! # bucketq - Time-Bucketed Message Queues over a Redis-Compatible Store
//!
//! bucketq turns a Redis-compatible store into a time-windowed message queue.
//! Messages are written into keys named after the current time bucket (minute,
//! hour or day), so a whole bucket and every message in it expire together
//! with a single TTL.
//!
//! ## Features
//!
//! - **List queues**: FIFO within a bucket, duplicates allowed
//! - **Sorted queues**: unique per bucket, insertion ordered, version-aware batch pop
//! - **Oldest first**: draining visits buckets in chronological order
//! - **Blocking and async**: one implementation, two calling conventions
//! - **Embedded store**: an in-process [`store::MemoryStore`] for tests and demos
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               bucketq                                   │
//! │                                                                         │
//! │  ┌──────────────────────┐   ┌────────────────────┐                      │
//! │  │ blocking::RedisQueue │──>│    RedisQueue      │                      │
//! │  └──────────────────────┘   └─────────┬──────────┘                      │
//! │                                     │                                   │
//! │                    ┌────────────────┴────────────────┐                  │
//! │                    ▼                                 ▼                  │
//! │             ┌─────────────┐                   ┌─────────────┐           │
//! │             │  ListQueue  │                   │ SortedQueue │           │
//! │             └──────┬──────┘                   └──────┬──────┘           │
//! │        push │      │ pop                  push │     │ pop              │
//! │             ▼      ▼                           ▼     ▼                  │
//! │  ┌──────────────────┐ ┌───────────────┐ ┌──────────────────┐            │
//! │  │ WriteCoordinator │ │ BucketScanner │ │ BucketKeyDeriver │            │
//! │  └────────┬─────────┘ └───────┬───────┘ └──────────────────┘            │
//! │           └─────────┬─────────┘                                         │
//! │                     ▼                                                   │
//! │   ┌──────────────────────────────────────────────┐                      │
//! │   │ StoreContext (store, nodes, version, locks)  │                      │
//! │   │        dyn Store: RespStore | MemoryStore    │                      │
//! │   └──────────────────────────────────────────────┘                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use bucketq::{QueueConfig, RedisQueue, TimeUnit};
//!
//! #[tokio::main]
//! async fn main() -> bucketq::Result<()> {
//!     let config = QueueConfig::default().with_host("127.0.0.1").with_port(6379);
//!     let queue = RedisQueue::connect(&config).await?;
//!
//!     for i in 0..10 {
//!         queue.send_queue("CallApi", &format!("A{}", i), 2, TimeUnit::Hours).await?;
//!     }
//!     let first_five = queue.get_queue_messages("CallApi", 5, TimeUnit::Hours).await?;
//!     assert_eq!(first_five, ["A0", "A1", "A2", "A3", "A4"]);
//!     Ok(())
//! }
//! ```
//!
//! ## Store Commands Used
//!
//! - `EXISTS`, `PEXPIRE`, `PTTL`
//! - `LPUSH`, `RPOP`, `LLEN`
//! - `ZADD key NX score member`, `ZCARD`, `ZRANGE`, `ZREM`, `ZPOPMIN` (5.0.0+)
//! - `SCAN cursor MATCH pattern`, `INFO server`, `AUTH`, `SELECT`
//!
//! ## Module Overview
//!
//! - [`bucket`]: bucket keys, formats and clocks
//! - [`coordinator`]: first-writer-sets-TTL write path
//! - [`scanner`]: oldest-first bucket enumeration
//! - [`queue`]: the list and sorted-set engines
//! - [`store`]: the store abstraction, RESP client and embedded store
//! - [`protocol`]: RESP types and reply parser
//!
//! ## Guarantees and Limits
//!
//! Failed store calls are never retried. A drain across several buckets is
//! not transactional, and deduplication only applies within one bucket of a
//! sorted queue.

pub mod blocking;
pub mod bucket;
pub mod client;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod scanner;
pub mod store;

// Re-export commonly used types for convenience
pub use bucket::{BucketKeyDeriver, StructureKind, TimeUnit};
pub use client::RedisQueue;
pub use config::QueueConfig;
pub use context::StoreContext;
pub use error::{QueueError, Result};
pub use queue::{ListQueue, PopStrategy, SortedQueue};
pub use store::{MemoryStore, RespStore, Store};

/// The default store port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default store host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Expiry multiplier the demo and docs use: a bucket lives for two units
pub const DEFAULT_EXPIRY_MULTIPLIER: u32 = 2;

/// Version of bucketq
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
