//! Error types for the scheduler.

use thiserror::Error;

use crate::types::{ItemId, ItemStatus, ThreadId, ThreadStatus};

/// Errors raised by the storage port.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing database reported an error.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row violates a domain invariant.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Storage error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Item not found (or soft-deleted).
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    /// Thread not found.
    #[error("thread not found: {0}")]
    ThreadNotFound(ThreadId),

    /// Item is not in the status the operation requires.
    #[error("item {id} is {actual}, expected {expected}")]
    InvalidStatus {
        id: ItemId,
        expected: ItemStatus,
        actual: ItemStatus,
    },

    /// Thread cannot be published from its current status.
    #[error("thread {id} is {actual} and cannot be published")]
    InvalidThreadStatus { id: ThreadId, actual: ThreadStatus },

    /// Another dispatch of the same item or thread is still running.
    #[error("{0} is already being dispatched")]
    Busy(String),

    /// Item content or scheduling fields are invalid.
    #[error("invalid item: {0}")]
    InvalidItem(String),

    /// The next recurrence could not be determined.
    #[error("could not determine next occurrence for item {0}")]
    Recurrence(ItemId),
}
