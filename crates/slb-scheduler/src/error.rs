//! Scheduler error types.

use thiserror::Error;

use slb_core::Category;

/// Errors that can occur during scheduling operations.
///
/// None of these stop a worker: each is converted into a reply value at
/// the boundary of the operation that raised it.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no eligible server in category {0}")]
    NoServer(Category),

    #[error("timed out waiting for a reply")]
    Timeout,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no dispatch queue for task type {0}")]
    UnknownCategory(Category),

    #[error("policy store error: {0}")]
    Persistence(#[from] slb_state::StateError),

    #[error("dispatcher is not running")]
    ChannelClosed,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
