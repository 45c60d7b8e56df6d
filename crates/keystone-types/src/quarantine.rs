//! Quarantine model.
//!
//! [`QuarantinedRecord`] captures a record that failed a validation
//! rule, with enough context for manual remediation. The quarantine
//! store is append-only: rows are never deleted, only transitioned
//! through [`QuarantineStatus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EntityType, RuleId};

/// Resolution lifecycle of a quarantined record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineStatus {
    /// Awaiting manual remediation.
    Pending,
    /// Fixed at the source; superseded by a later clean record.
    Resolved,
    /// Confirmed invalid, will never conform.
    Rejected,
    /// Re-run through the pipeline after remediation.
    Reprocessed,
}

impl QuarantineStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
            Self::Reprocessed => "reprocessed",
        }
    }
}

impl std::fmt::Display for QuarantineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record excluded from conformance by a named rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantinedRecord {
    /// Entity type the record was being conformed into.
    pub entity: EntityType,
    /// JSON-serialized raw payload, for remediation and reprocessing.
    pub payload_json: String,
    /// The rule that excluded the record.
    pub rule_id: RuleId,
    /// Human-readable failure detail.
    pub detail: String,
    /// When the record was quarantined.
    pub quarantined_at: DateTime<Utc>,
}
