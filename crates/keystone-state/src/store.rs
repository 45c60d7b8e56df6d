//! Storage contract for the conformance engine.
//!
//! [`ConformStore`] covers the four shared stores the engine touches:
//! the raw landing area (read-mostly), the conformed-record store, the
//! quarantine sink, and the run ledger. Model types live in
//! `keystone-types`.

use std::collections::{HashMap, HashSet};

use keystone_types::ids::{BatchId, EnterpriseKey, EntityType, SourceKey, SourceSystemId};
use keystone_types::quarantine::QuarantinedRecord;
use keystone_types::record::{ConformedRecord, RawRecord};
use keystone_types::run::{ConformRun, OperationKind, RunCounts, RunStatus};

use crate::error;

/// Change-detection view of one stored conformed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingRow {
    /// Source-native key the enterprise key was originally assigned to.
    pub source_key: SourceKey,
    /// Content hash at last conformance.
    pub content_hash: String,
}

/// Per-outcome row counts of one batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
}

/// Storage contract for pipeline state.
///
/// Implementations must be `Send + Sync` for use behind
/// `Arc<dyn ConformStore>`.
pub trait ConformStore: Send + Sync {
    /// Land raw records. `raw_id` on the inputs is ignored; the store
    /// assigns surrogate ids. Returns the count landed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn land_raw(&self, records: &[RawRecord]) -> error::Result<u64>;

    /// Read raw records for one source system, optionally filtered by
    /// discriminator and ingestion batch.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn fetch_raw(
        &self,
        source_system: &SourceSystemId,
        discriminator: Option<&str>,
        batch: Option<&BatchId>,
    ) -> error::Result<Vec<RawRecord>>;

    /// Change-detection view of every stored row for an entity type:
    /// enterprise key mapped to its bound source key and content hash.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn existing_rows(
        &self,
        entity: &EntityType,
    ) -> error::Result<HashMap<EnterpriseKey, ExistingRow>>;

    /// Enterprise keys currently stored for an entity type, used by
    /// referential-existence validation.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn existing_keys(&self, entity: &EntityType) -> error::Result<HashSet<EnterpriseKey>>;

    /// Read every conformed record for an entity type.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn fetch_conformed(&self, entity: &EntityType) -> error::Result<Vec<ConformedRecord>>;

    /// Keyed upsert of one batch inside a single transaction.
    ///
    /// Inserts new enterprise keys, updates rows whose content hash
    /// differs, and leaves matching rows untouched, reporting each
    /// count separately. All-or-nothing: any failure rolls the whole
    /// batch back.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Invariant`](crate::StateError::Invariant)
    /// when an enterprise key is rebound to a different source key or
    /// appears twice in the batch; [`StateError`](crate::StateError)
    /// on storage failure.
    fn apply_upserts(
        &self,
        entity: &EntityType,
        records: &[ConformedRecord],
    ) -> error::Result<UpsertOutcome>;

    /// Replace the whole entity store with `records`, atomically.
    ///
    /// Delete and repopulate run in one transaction: a failure after
    /// the delete must leave the store exactly as it was.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn rebuild(
        &self,
        entity: &EntityType,
        records: &[ConformedRecord],
    ) -> error::Result<UpsertOutcome>;

    /// Append records to the quarantine sink. Returns the count inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn quarantine(&self, run_id: i64, records: &[QuarantinedRecord]) -> error::Result<u64>;

    /// Read quarantine entries written by one run.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn quarantined_for_run(&self, run_id: i64) -> error::Result<Vec<QuarantinedRecord>>;

    /// Begin a new pipeline run, returning its unique ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn start_run(
        &self,
        pipeline_name: &str,
        target_entity: &EntityType,
        operation: OperationKind,
    ) -> error::Result<i64>;

    /// Seal a run exactly once with its final status and counts.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Invariant`](crate::StateError::Invariant)
    /// when the run does not exist or is already sealed;
    /// [`StateError`](crate::StateError) on storage failure.
    fn complete_run(
        &self,
        run_id: i64,
        status: RunStatus,
        counts: &RunCounts,
        error_message: Option<&str>,
    ) -> error::Result<()>;

    /// Read one run-ledger row.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn get_run(&self, run_id: i64) -> error::Result<Option<ConformRun>>;
}
