//! Queue Engines
//!
//! Two engines share the same bucket layout and drain order but differ in
//! the structure behind each bucket:
//!
//! | Engine          | Bucket     | Duplicates     | Order within a bucket |
//! |-----------------|------------|----------------|-----------------------|
//! | [`ListQueue`]   | List       | allowed        | FIFO (push left, pop right) |
//! | [`SortedQueue`] | Sorted set | rejected       | insertion score       |
//!
//! Both drain buckets oldest first and return what they collected, which may
//! be fewer messages than asked for. Nothing here waits for new messages.
//!
//! Arguments are validated before any lock is taken or any command is sent.

pub mod list;
pub mod sorted;

pub use list::ListQueue;
pub use sorted::SortedQueue;

use crate::bucket::TimeUnit;
use crate::error::{QueueError, Result};
use crate::store::EngineVersion;
use std::time::Duration;

/// How the sorted-set engine removes a batch of lowest-scored members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopStrategy {
    /// `ZPOPMIN key count`: one atomic round trip
    AtomicPop,
    /// `ZRANGE` then `ZREM` under the sorted-set read lock
    RangeAndRemove,
}

impl PopStrategy {
    pub fn for_version(version: EngineVersion) -> Self {
        if version.supports_atomic_pop() {
            PopStrategy::AtomicPop
        } else {
            PopStrategy::RangeAndRemove
        }
    }
}

/// TTL for a bucket created by a push, after checking the push arguments.
pub(crate) fn validate_push(message: &str, unit: TimeUnit, expiry_multiplier: u32) -> Result<Duration> {
    if message.is_empty() {
        return Err(QueueError::invalid("message must not be empty"));
    }
    if expiry_multiplier <= 1 {
        return Err(QueueError::invalid(format!(
            "expiry multiplier must be greater than 1, got {}",
            expiry_multiplier
        )));
    }
    Ok(unit.duration() * expiry_multiplier)
}

pub(crate) fn validate_count(count: usize) -> Result<()> {
    if count == 0 {
        return Err(QueueError::invalid("count must be greater than 0"));
    }
    Ok(())
}
