//! Time Buckets
//!
//! A bucket is one store key holding every message written during a single
//! discretized time window. Because the whole key carries one TTL, all of its
//! messages expire together without per-message bookkeeping.
//!
//! ## Key Layout
//!
//! ```text
//!   Q    _List_   Hours  :  2026-10-17_14
//!   │      │        │           │
//! prefix  kind     unit     timestamp (per-unit format)
//! ```
//!
//! Drain order relies on one invariant: with fixed-width fields ordered
//! most-significant first, sorting keys as strings sorts buckets by time.

pub mod clock;
pub mod deriver;
pub mod format;

pub use clock::{Clock, ManualClock, SystemClock};
pub use deriver::BucketKeyDeriver;
pub use format::{BucketFormat, BucketFormats};

use std::fmt;
use std::time::Duration;

/// Width of the time window a bucket covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeUnit {
    Minutes,
    #[default]
    Hours,
    Days,
}

impl TimeUnit {
    /// Length of one window.
    pub fn duration(self) -> Duration {
        match self {
            TimeUnit::Minutes => Duration::from_secs(60),
            TimeUnit::Hours => Duration::from_secs(60 * 60),
            TimeUnit::Days => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Tag embedded in bucket keys so the units never share a pattern.
    pub fn tag(self) -> &'static str {
        match self {
            TimeUnit::Minutes => "Minutes",
            TimeUnit::Hours => "Hours",
            TimeUnit::Days => "Days",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Store structure backing a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureKind {
    /// FIFO, duplicates allowed
    List,
    /// Unique per bucket, ordered by insertion score
    SortedSet,
}

impl StructureKind {
    pub fn tag(self) -> &'static str {
        match self {
            StructureKind::List => "_List_",
            StructureKind::SortedSet => "_ZSet_",
        }
    }
}

impl fmt::Display for StructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureKind::List => f.write_str("list"),
            StructureKind::SortedSet => f.write_str("zset"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_durations() {
        assert_eq!(TimeUnit::Minutes.duration(), Duration::from_secs(60));
        assert_eq!(TimeUnit::Hours.duration(), Duration::from_secs(3600));
        assert_eq!(TimeUnit::Days.duration(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_default_unit_is_hours() {
        assert_eq!(TimeUnit::default(), TimeUnit::Hours);
    }

    #[test]
    fn test_tags_are_distinct() {
        assert_ne!(StructureKind::List.tag(), StructureKind::SortedSet.tag());
        assert_ne!(TimeUnit::Minutes.tag(), TimeUnit::Hours.tag());
        assert_ne!(TimeUnit::Hours.tag(), TimeUnit::Days.tag());
    }
}
