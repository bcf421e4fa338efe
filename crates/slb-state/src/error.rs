//! Errors raised by the policy store.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    /// The database file could not be created or opened.
    #[error("cannot open policy database: {0}")]
    Open(String),

    /// redb refused to start or commit a transaction.
    #[error("policy transaction failed: {0}")]
    Transaction(String),

    /// The `policies` table is missing or has an incompatible layout.
    #[error("policy table unavailable: {0}")]
    Schema(String),

    #[error("failed to read policies: {0}")]
    Scan(String),

    #[error("failed to store policy for {user_id}: {reason}")]
    Upsert { user_id: String, reason: String },

    #[error("cannot encode policy for {user_id}: {reason}")]
    Encode { user_id: String, reason: String },

    /// A stored row is not a valid policy.
    #[error("corrupt policy row {user_id}: {reason}")]
    Decode { user_id: String, reason: String },

    /// Raised by stores that are not backed by redb.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
