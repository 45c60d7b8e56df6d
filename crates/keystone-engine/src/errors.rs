//! Engine error model.
//!
//! Validation and resolution failures are data (quarantine rows) and
//! never surface here. [`EngineError`] covers the two classes that
//! abort an invocation: broken invariants and unreachable
//! infrastructure.

use keystone_state::StateError;
use keystone_types::error::InvariantViolation;

/// Categorized engine error.
///
/// `Invariant` wraps a named violation that must never be swallowed.
/// `Infrastructure` wraps opaque store/runtime errors that abort the
/// current invocation and propagate to the orchestrator.
#[derive(Debug)]
pub enum EngineError {
    /// A named invariant would have been broken.
    Invariant(InvariantViolation),
    /// Storage or runtime failure (store unreachable, task panic, etc.)
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invariant(v) => write!(f, "invariant violation: {v}"),
            Self::Infrastructure(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<StateError> for EngineError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Invariant(v) => Self::Invariant(v),
            other => Self::Infrastructure(other.into()),
        }
    }
}

impl EngineError {
    /// Returns `true` when this error is a named invariant violation.
    #[must_use]
    pub fn is_invariant(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}
