//! Error Types
//!
//! Every public operation returns [`QueueError`]. The variants line up with
//! how a caller is expected to react:
//!
//! - [`QueueError::Configuration`]: fatal at construction, do not proceed
//! - [`QueueError::InvalidArgument`]: only the offending call failed, nothing was written
//! - [`QueueError::Cancelled`]: the call gave up while waiting for a lock, nothing was written
//! - [`QueueError::Transport`]: the store was unreachable or rejected a command
//!
//! Transport failures are never retried by this crate.

use crate::store::StoreError;
use thiserror::Error;

/// Errors returned by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Missing or invalid host, port, database index or bucket format.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Empty message, zero count, or an expiry multiplier that is too small.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A suspension-based call was cancelled while waiting for a lock.
    #[error("cancelled while waiting for the {lock} lock")]
    Cancelled {
        /// Name of the lock that was being awaited
        lock: &'static str,
    },

    /// The backing store failed a command or could not be reached.
    #[error("store error: {0}")]
    Transport(#[from] StoreError),
}

impl QueueError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        QueueError::Configuration(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        QueueError::InvalidArgument(msg.into())
    }

    /// Returns true if the call was cancelled before touching the store.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueueError::Cancelled { .. })
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
