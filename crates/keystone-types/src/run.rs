//! Run-ledger model types.
//!
//! One [`RunCounts`] per pipeline invocation, with distinct
//! inserted/updated/unchanged counters so change detection stays
//! auditable. A run is sealed exactly once; sealing is enforced by the
//! state backend.

use serde::{Deserialize, Serialize};

/// Operation kind of a pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Keyed upsert with hash-based change detection.
    Merge,
    /// Transactional delete-then-repopulate of the whole entity store.
    Rebuild,
}

impl OperationKind {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Rebuild => "rebuild",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-outcome row counters for one pipeline invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub read: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
    pub quarantined: u64,
}

impl RunCounts {
    /// Accumulate another set of counts into this one.
    pub fn absorb(&mut self, other: &RunCounts) {
        self.read += other.read;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.deleted += other.deleted;
        self.quarantined += other.quarantined;
    }
}

/// One run-ledger row: the lifecycle of a single pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConformRun {
    pub run_id: i64,
    pub pipeline_name: String,
    pub target_entity: String,
    pub operation: OperationKind,
    pub status: RunStatus,
    /// ISO-8601 UTC. Always present, so a staleness sweep can find
    /// runs that were never sealed.
    pub started_at: String,
    /// ISO-8601 UTC, set when the run is sealed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    pub counts: RunCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_as_str() {
        assert_eq!(RunStatus::Running.as_str(), "running");
        assert_eq!(RunStatus::Succeeded.as_str(), "succeeded");
        assert_eq!(RunStatus::Failed.as_str(), "failed");
    }

    #[test]
    fn operation_as_str() {
        assert_eq!(OperationKind::Merge.as_str(), "merge");
        assert_eq!(OperationKind::Rebuild.as_str(), "rebuild");
    }

    #[test]
    fn counts_default_is_zeroed() {
        let counts = RunCounts::default();
        assert_eq!(counts.read, 0);
        assert_eq!(counts.inserted, 0);
        assert_eq!(counts.quarantined, 0);
    }

    #[test]
    fn counts_absorb() {
        let mut total = RunCounts {
            read: 3,
            inserted: 2,
            quarantined: 1,
            ..RunCounts::default()
        };
        total.absorb(&RunCounts {
            read: 2,
            updated: 1,
            unchanged: 1,
            ..RunCounts::default()
        });
        assert_eq!(total.read, 5);
        assert_eq!(total.inserted, 2);
        assert_eq!(total.updated, 1);
        assert_eq!(total.unchanged, 1);
        assert_eq!(total.quarantined, 1);
    }

    #[test]
    fn status_serde_roundtrip() {
        let json = serde_json::to_string(&RunStatus::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
        let back: RunStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RunStatus::Succeeded);
    }
}
