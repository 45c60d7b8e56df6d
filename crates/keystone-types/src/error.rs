//! Invariant-violation model shared by the state and engine crates.
//!
//! Validation failures are data (quarantine rows), never errors.
//! Invariant violations are the opposite: they indicate the engine or
//! its store would otherwise corrupt state, and must never be
//! swallowed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{EnterpriseKey, EntityType};

/// A named invariant that the engine refuses to break.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum InvariantViolation {
    /// `complete_run` was called for a run that is already sealed.
    #[error("run {run_id} is already sealed")]
    RunAlreadySealed { run_id: i64 },

    /// `complete_run` was called for a run that was never started.
    #[error("run {run_id} does not exist")]
    RunNotFound { run_id: i64 },

    /// An enterprise key was presented with a different source-native
    /// key than the one it was originally assigned to.
    #[error(
        "enterprise key {key} for entity {entity} is bound to source key \
         {existing_source_key}, refusing rebind to {incoming_source_key}"
    )]
    EnterpriseKeyConflict {
        entity: EntityType,
        key: EnterpriseKey,
        existing_source_key: String,
        incoming_source_key: String,
    },

    /// A batch of upserts contained the same enterprise key twice.
    #[error("duplicate enterprise key {key} within one upsert batch for entity {entity}")]
    DuplicateKeyInBatch { entity: EntityType, key: EnterpriseKey },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_run_message() {
        let v = InvariantViolation::RunAlreadySealed { run_id: 42 };
        assert_eq!(v.to_string(), "run 42 is already sealed");
    }

    #[test]
    fn key_conflict_message_names_both_sources() {
        let v = InvariantViolation::EnterpriseKeyConflict {
            entity: EntityType::new("team"),
            key: EnterpriseKey::new("TEAM-001"),
            existing_source_key: "CRM-001".into(),
            incoming_source_key: "CRM-999".into(),
        };
        let msg = v.to_string();
        assert!(msg.contains("CRM-001"));
        assert!(msg.contains("CRM-999"));
    }

    #[test]
    fn serde_roundtrip() {
        let v = InvariantViolation::RunNotFound { run_id: 7 };
        let json = serde_json::to_string(&v).unwrap();
        let back: InvariantViolation = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }
}
