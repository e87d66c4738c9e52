//! Error types for rule operations.

use herald_types::{ChannelType, FieldErrors};

/// Errors that can occur during rule operations.
///
/// Everything except `Database`, `Pool`, `Serialization` and
/// `ChannelLookup` is a distinguishable outcome callers are expected to
/// match on; those four are opaque failures carrying only context.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// No rule with this id exists.
    #[error("rule not found: {0}")]
    ItemNotFound(String),

    /// The rule's action references a channel that does not exist.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// One or more trigger origin classes are not registered.
    #[error("origins not found: {}", .0.join(", "))]
    OriginsNotFound(Vec<String>),

    /// Another rule already uses this name.
    #[error("rule name already in use: {0}")]
    DuplicateRuleName(String),

    /// Mail channels need a recipient.
    #[error("recipient is required for mail channels")]
    RecipientRequired,

    /// Only mail channels accept a recipient.
    #[error("recipient is not supported for {0} channels")]
    RecipientNotSupported(ChannelType),

    /// The configured rule ceiling has been reached.
    #[error("rule limit of {limit} reached")]
    RuleLimitReached { limit: usize },

    /// The id is not a UUID v4.
    #[error("invalid rule id: {0}")]
    InvalidId(String),

    /// The rule failed shape validation.
    #[error("invalid rule: {0}")]
    Invalid(FieldErrors),

    /// The channel registry failed for a reason other than not-found.
    #[error("channel lookup failed: {0}")]
    ChannelLookup(String),

    /// The caller's deadline passed.
    #[error("rule operation timed out")]
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

    /// A stored JSON column could not be encoded.
    #[error("rule serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<herald_db::CheckoutError> for RuleError {
    fn from(err: herald_db::CheckoutError) -> Self {
        match err {
            herald_db::CheckoutError::Timeout => Self::Timeout,
            herald_db::CheckoutError::Pool(e) => Self::Pool(e),
        }
    }
}

impl RuleError {
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
