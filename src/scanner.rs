//! Bucket enumeration.

use crate::context::StoreContext;
use crate::error::Result;
use tracing::trace;

/// Finds the live buckets of a queue across every store node.
///
/// Keys are merged without deduplication and sorted as strings. For a
/// well-ordered bucket format that puts the oldest bucket first; no dates
/// are parsed here.
#[derive(Debug, Clone, Copy)]
pub struct BucketScanner<'a> {
    context: &'a StoreContext,
}

impl<'a> BucketScanner<'a> {
    pub fn new(context: &'a StoreContext) -> Self {
        Self { context }
    }

    /// Keys matching `pattern`, oldest bucket first.
    pub async fn enumerate_bucket_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let store = self.context.store();
        let database = self.context.database();

        let mut keys = Vec::new();
        for node in self.context.nodes() {
            let found = store.keys(node, database, pattern).await?;
            trace!(node = %node.address, pattern = %pattern, found = found.len(), "Scanned node");
            keys.extend(found);
        }

        keys.sort_unstable();
        Ok(keys)
    }
}
