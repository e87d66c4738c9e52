//! Error types for the origin registry.

/// Errors that can occur during origin registry operations.
#[derive(Debug, thiserror::Error)]
pub enum OriginError {
    /// The owning service id was empty.
    #[error("service id is required")]
    EmptyServiceId,

    /// An origin in the payload is malformed.
    #[error("invalid origin at index {index}: {reason}")]
    InvalidOrigin { index: usize, reason: &'static str },

    /// The class is already registered, by another service or twice in the payload.
    #[error("origin class already registered: {0}")]
    Conflict(String),

    /// The caller's deadline passed while waiting for a lock, connection or statement.
    #[error("origin operation timed out")]
    Timeout,

    /// A database operation failed.
    #[error("failed to {op}: {source}")]
    Database {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// No pooled connection could be obtained.
    #[error("db connection failed: {0}")]
    Pool(#[from] r2d2::Error),
}

impl From<herald_db::CheckoutError> for OriginError {
    fn from(err: herald_db::CheckoutError) -> Self {
        match err {
            herald_db::CheckoutError::Timeout => Self::Timeout,
            herald_db::CheckoutError::Pool(e) => Self::Pool(e),
        }
    }
}

impl OriginError {
    /// Wraps a SQLite failure with the operation that caused it.
    pub(crate) fn database(op: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| {
            if herald_db::is_timeout(&source) {
                Self::Timeout
            } else {
                Self::Database { op, source }
            }
        }
    }
}
