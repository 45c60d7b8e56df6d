//! Storage error types.

use keystone_types::error::InvariantViolation;

/// Errors produced by [`ConformStore`](crate::ConformStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure, tagged with the failing operation.
    #[error("{context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Record payload could not be serialized or deserialized.
    #[error("payload serialization: {0}")]
    Payload(#[from] serde_json::Error),

    /// A storage-enforced invariant would have been broken.
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("conform store lock poisoned")]
    LockPoisoned,
}

impl StateError {
    /// Wrap a `SQLite` error with the name of the failing operation.
    pub fn backend(context: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Backend {
            context: context.into(),
            source,
        }
    }

    /// Returns the invariant violation if this error carries one.
    #[must_use]
    pub fn as_invariant(&self) -> Option<&InvariantViolation> {
        match self {
            Self::Invariant(v) => Some(v),
            _ => None,
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
