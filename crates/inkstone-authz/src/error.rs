//! Error types for the authorization engine.

use thiserror::Error;

/// Error from a backing store.
///
/// Validity and ownership violations never surface here; they fold into
/// empty evidence or boolean results. Infrastructure failures,
/// cancellation and malformed grant specifications escalate.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The persistence collaborator is unreachable or failed mid-query.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    /// The query observed its cancellation signal before completing.
    #[error("store query cancelled")]
    Cancelled,

    /// The caller supplied an internally inconsistent grant, e.g. a
    /// delegated grant without a delegator.
    #[error("invalid grant: {0}")]
    InvalidGrant(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Error from a decision request.
///
/// A denied decision is not an error; `decide` fails only when it cannot
/// produce a decision at all.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// The request was cancelled mid-flight. Callers must treat this as
    /// "not yet decided", never as an implicit deny.
    #[error("decision cancelled before completion")]
    Cancelled,

    /// A backing store failed. An availability incident, not a security
    /// decision; callers must not convert this to Allow or Deny.
    #[error("store failure during decision: {0}")]
    Store(StoreError),
}

impl From<StoreError> for AuthzError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cancelled => AuthzError::Cancelled,
            other => AuthzError::Store(other),
        }
    }
}

/// Result type for decision operations.
pub type AuthzResult<T> = std::result::Result<T, AuthzError>;
