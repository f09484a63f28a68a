//! Bucket key and pattern derivation.

use super::{BucketFormats, Clock, StructureKind, SystemClock, TimeUnit};
use chrono::NaiveDateTime;
use std::sync::Arc;

/// Builds bucket keys for "now" and the patterns that find every bucket of a
/// queue.
///
/// Two calls in the same window produce the same key. Keys from different
/// windows differ and, for a well-ordered format, sort chronologically.
#[derive(Debug, Clone)]
pub struct BucketKeyDeriver {
    formats: BucketFormats,
    clock: Arc<dyn Clock>,
}

impl Default for BucketKeyDeriver {
    fn default() -> Self {
        Self::new(BucketFormats::default())
    }
}

impl BucketKeyDeriver {
    /// Creates a deriver reading the host's local time.
    pub fn new(formats: BucketFormats) -> Self {
        Self::with_clock(formats, Arc::new(SystemClock))
    }

    pub fn with_clock(formats: BucketFormats, clock: Arc<dyn Clock>) -> Self {
        Self { formats, clock }
    }

    pub fn formats(&self) -> &BucketFormats {
        &self.formats
    }

    /// Key of the bucket covering the current time.
    pub fn derive_key(&self, unit: TimeUnit, kind: StructureKind, prefix: &str) -> String {
        self.key_at(unit, kind, prefix, &self.clock.now())
    }

    /// Key of the bucket covering `at`.
    pub fn key_at(
        &self,
        unit: TimeUnit,
        kind: StructureKind,
        prefix: &str,
        at: &NaiveDateTime,
    ) -> String {
        let stamp = self.formats.get(unit).render(at);
        format!("{}{}{}:{}", prefix, kind.tag(), unit.tag(), stamp)
    }

    /// Glob pattern matching every bucket of `prefix` for this unit and kind.
    ///
    /// Pattern characters inside the prefix are escaped so that a prefix such
    /// as `jobs[eu]` only matches itself.
    pub fn derive_pattern(&self, unit: TimeUnit, kind: StructureKind, prefix: &str) -> String {
        format!(
            "{}{}{}:{}",
            escape_glob(prefix),
            kind.tag(),
            unit.tag(),
            self.formats.get(unit).pattern()
        )
    }
}

fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
