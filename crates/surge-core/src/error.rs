//! Error types for surge
//!
//! Provides error handling for:
//! - Submission validation failures
//! - Platform client failures
//! - Queue-level transient reconcile failures

use crate::types::{ResourceRef, TaskId};

/// Main migration error type
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Options failed validation
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Source/destination kinds are not a supported pair
    #[error("unsupported migration from {src} to {dst}")]
    UnsupportedPair {
        /// Requested source
        src: ResourceRef,
        /// Requested destination
        dst: ResourceRef,
    },

    /// A non-terminal task already owns the resource
    #[error("already existing migration task for {0}")]
    AlreadyExecuting(ResourceRef),

    /// The destination must not exist yet
    #[error("destination {0} already exists")]
    DestinationExists(ResourceRef),

    /// Unknown or evicted task
    #[error("not found task {0}")]
    TaskNotFound(TaskId),

    /// Platform client failed
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Caller-side wait gave up
    #[error("migration {id} not finished after {duration_secs}s")]
    Timeout {
        /// Task being waited on
        id: TaskId,
        /// How long the caller waited
        duration_secs: u64,
    },

    /// The orchestrator has been stopped
    #[error("migrator is shutting down")]
    ShuttingDown,
}

impl MigrationError {
    /// Check if the error was raised before any task was created
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidOptions(_)
                | Self::UnsupportedPair { .. }
                | Self::AlreadyExecuting(_)
                | Self::DestinationExists(_)
        )
    }
}

/// Errors surfaced by a platform client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// Object does not exist
    #[error("{0} not found")]
    NotFound(ResourceRef),

    /// Object already exists
    #[error("{0} already exists")]
    AlreadyExists(ResourceRef),

    /// Optimistic concurrency check failed
    #[error("conflict updating {resource}: resource version {expected} is stale (current {actual})")]
    Conflict {
        /// Object being written
        resource: ResourceRef,
        /// Version the writer held
        expected: u64,
        /// Version the store holds
        actual: u64,
    },

    /// Request rejected as malformed
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Platform temporarily unreachable
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

impl PlatformError {
    /// Check if a retry with a fresh read may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable(_))
    }
}

/// Transient reconcile failure, retried by the queue with backoff
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// A write failed but may succeed after a fresh read
    #[error("write to {resource} failed (attempt {attempt}): {source}")]
    Write {
        /// Object being written
        resource: ResourceRef,
        /// Consecutive failed attempts so far
        attempt: u32,
        /// Underlying platform error
        #[source]
        source: PlatformError,
    },
}
