//! List-backed queue: FIFO within a bucket, duplicates allowed.

use super::{validate_count, validate_push};
use crate::bucket::{BucketKeyDeriver, StructureKind, TimeUnit};
use crate::context::StoreContext;
use crate::coordinator::WriteReport;
use crate::error::Result;
use crate::scanner::BucketScanner;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Time-bucketed FIFO queue over store lists.
///
/// Messages go to the head of the current bucket and come off the tail, so
/// each bucket is first-in first-out. Pops are never serialised: every
/// `RPOP` is atomic and a message is handed to exactly one caller.
#[derive(Debug, Clone)]
pub struct ListQueue {
    context: Arc<StoreContext>,
    deriver: BucketKeyDeriver,
}

impl ListQueue {
    pub fn new(context: Arc<StoreContext>, deriver: BucketKeyDeriver) -> Self {
        Self { context, deriver }
    }

    /// Appends `message` to the current bucket of `prefix`.
    ///
    /// A bucket created by this call expires `expiry_multiplier` units later.
    pub async fn push(
        &self,
        prefix: &str,
        message: &str,
        unit: TimeUnit,
        expiry_multiplier: u32,
        cancel: Option<&CancellationToken>,
    ) -> Result<bool> {
        let ttl = validate_push(message, unit, expiry_multiplier)?;
        let key = self.deriver.derive_key(unit, StructureKind::List, prefix);
        let store = self.context.store();

        self.context
            .writes()
            .write_with_expiry(store, StructureKind::List, &key, ttl, cancel, || async {
                store.lpush(&key, message).await.map(|len| WriteReport {
                    accepted: len > 0,
                    created_key: len == 1,
                })
            })
            .await
    }

    /// Removes up to `count` messages, oldest bucket first.
    pub async fn pop(&self, prefix: &str, count: usize, unit: TimeUnit) -> Result<Vec<String>> {
        validate_count(count)?;

        let pattern = self.deriver.derive_pattern(unit, StructureKind::List, prefix);
        let keys = BucketScanner::new(&self.context)
            .enumerate_bucket_keys(&pattern)
            .await?;
        let store = self.context.store();

        let mut messages = Vec::new();
        for key in &keys {
            let before = messages.len();
            while messages.len() < count {
                match store.rpop(key).await? {
                    Some(message) => messages.push(message),
                    None => break,
                }
            }
            trace!(key = %key, taken = messages.len() - before, "Drained list bucket");

            if messages.len() == count {
                break;
            }
        }

        debug!(
            prefix = %prefix,
            unit = %unit,
            requested = count,
            returned = messages.len(),
            buckets = keys.len(),
            "List pop"
        );
        Ok(messages)
    }
}
