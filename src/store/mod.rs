//! Backing Store
//!
//! The queues only need a small slice of a Redis-compatible command set.
//! [`Store`] names exactly that slice so the queue algorithms can run against
//! a live server ([`RespStore`]) or the embedded [`MemoryStore`].
//!
//! ```text
//! ┌───────────────────────┐        ┌─────────────────────────────┐
//! │ ListQueue/SortedQueue │──────> │        dyn Store            │
//! └───────────────────────┘        │  ┌───────────┐ ┌──────────┐ │
//!                                  │  │ RespStore │ │ Memory   │ │
//!                                  │  │ (TCP)     │ │ Store    │ │
//!                                  │  └───────────┘ └──────────┘ │
//!                                  └─────────────────────────────┘
//! ```
//!
//! Every method is a single store command; nothing here retries.

pub mod expiry;
pub mod memory;
pub mod resp;

pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};
pub use memory::MemoryStore;
pub use resp::RespStore;

use crate::protocol::ParseError;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The reply could not be parsed
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The store answered with an error reply
    #[error("server error: {0}")]
    Server(String),

    /// The reply had the wrong shape for the command
    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: &'static str, reply: String },

    /// The peer closed the connection
    #[error("connection closed by store")]
    ConnectionClosed,

    /// The store does not implement the command
    #[error("command not supported by this store: {0}")]
    Unsupported(&'static str),
}

/// Result type for store commands.
pub type StoreResult<T> = Result<T, StoreError>;

/// Version of the store engine, e.g. `7.2.4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl EngineVersion {
    /// First version with `ZPOPMIN key count`.
    pub const ATOMIC_POP: EngineVersion = EngineVersion::new(5, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Whether the engine can pop the N lowest-scored members atomically.
    pub fn supports_atomic_pop(&self) -> bool {
        *self >= Self::ATOMIC_POP
    }

    /// Extracts `redis_version` from an `INFO server` payload.
    pub fn from_info(info: &str) -> Option<Self> {
        info.lines()
            .find_map(|line| line.trim().strip_prefix("redis_version:"))
            .and_then(|v| v.parse().ok())
    }
}

impl FromStr for EngineVersion {
    type Err = String;

    /// Accepts `major[.minor[.patch]]`; missing parts are zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, '.');
        let mut next = |name: &str| -> Result<u32, String> {
            match parts.next() {
                None => Ok(0),
                Some(p) => p
                    .parse()
                    .map_err(|_| format!("invalid {} version component in {:?}", name, s)),
            }
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// One node of the store and the engine version it reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub address: String,
    pub version: EngineVersion,
}

/// The command set the queues rely on.
///
/// Keys and members are UTF-8 strings. List pushes go to the head and pops
/// come from the tail, so a bucket behaves as a FIFO.
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    /// Nodes serving this store, with their versions.
    async fn nodes(&self) -> StoreResult<Vec<NodeInfo>>;

    /// Keys on `node` in `database` matching the glob `pattern`.
    async fn keys(&self, node: &NodeInfo, database: i64, pattern: &str) -> StoreResult<Vec<String>>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Sets a TTL on an existing key. Returns false if the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remaining TTL; `None` if the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Pushes to the head of a list, returning the new length.
    async fn lpush(&self, key: &str, value: &str) -> StoreResult<usize>;

    /// Pops from the tail of a list.
    async fn rpop(&self, key: &str) -> StoreResult<Option<String>>;

    async fn llen(&self, key: &str) -> StoreResult<usize>;

    /// Adds `member` only if absent. Returns whether it was added.
    async fn zadd_nx(&self, key: &str, member: &str, score: f64) -> StoreResult<bool>;

    async fn zcard(&self, key: &str) -> StoreResult<usize>;

    /// Members by ascending rank, `start..=stop` (negative counts from the end).
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;

    /// Removes members, returning how many were present.
    async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<usize>;

    /// Atomically removes and returns up to `count` lowest-scored members.
    async fn zpopmin(&self, key: &str, count: usize) -> StoreResult<Vec<(String, f64)>>;
}
