//! `SQLite`-backed implementation of [`ConformStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety. Batch writes
//! (upserts, rebuilds, quarantine inserts) each run in one transaction.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Connection;

use keystone_types::error::InvariantViolation;
use keystone_types::ids::{BatchId, EnterpriseKey, EntityType, SourceKey, SourceSystemId};
use keystone_types::quarantine::{QuarantinedRecord, QuarantineStatus};
use keystone_types::record::{ConformedRecord, RawRecord};
use keystone_types::run::{ConformRun, OperationKind, RunCounts, RunStatus};

use crate::error::{self, StateError};
use crate::store::{ConformStore, ExistingRow, UpsertOutcome};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for the landing area, conformed store, quarantine
/// sink, and run ledger.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS raw_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL,
    source_system TEXT NOT NULL,
    source_ref TEXT NOT NULL,
    discriminator TEXT,
    ingested_at TEXT NOT NULL,
    fields_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_raw_source ON raw_records (source_system, discriminator);

CREATE TABLE IF NOT EXISTS conformed_records (
    entity TEXT NOT NULL,
    enterprise_key TEXT NOT NULL,
    source_key TEXT NOT NULL,
    source_system TEXT NOT NULL,
    raw_id INTEGER NOT NULL,
    source_modified_at TEXT,
    fields_json TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    conformed_at TEXT NOT NULL,
    conformed_by TEXT NOT NULL,
    PRIMARY KEY (entity, enterprise_key)
);

CREATE TABLE IF NOT EXISTS quarantine_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES conform_runs(id),
    entity TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    rule_id TEXT NOT NULL,
    detail TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    quarantined_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_quarantine_run ON quarantine_records (run_id);

CREATE TABLE IF NOT EXISTS conform_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    target_entity TEXT NOT NULL,
    operation TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    rows_read INTEGER DEFAULT 0,
    rows_inserted INTEGER DEFAULT 0,
    rows_updated INTEGER DEFAULT 0,
    rows_unchanged INTEGER DEFAULT 0,
    rows_deleted INTEGER DEFAULT 0,
    rows_quarantined INTEGER DEFAULT 0,
    error_message TEXT
);
";

/// `SQLite`-backed conform store.
///
/// Create with [`SqliteConformStore::open`] for file-backed persistence
/// or [`SqliteConformStore::in_memory`] for tests.
pub struct SqliteConformStore {
    conn: Mutex<Connection>,
}

impl SqliteConformStore {
    /// Open or create a `SQLite` store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Backend`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| StateError::backend("open", e))?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| StateError::backend("open: ddl", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| StateError::backend("open_in_memory", e))?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| StateError::backend("open_in_memory: ddl", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Convert a `SQLite` datetime string to ISO-8601.
    fn sqlite_to_iso8601(raw: &str) -> String {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT).map_or_else(
            |_| raw.to_string(),
            |ndt| format!("{}Z", ndt.format("%Y-%m-%dT%H:%M:%S")),
        )
    }

    /// Parse an RFC 3339 timestamp column, tolerating the bare
    /// `SQLite` datetime format.
    fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT)
                    .map(|ndt| ndt.and_utc())
                    .ok()
            })
    }
}

impl ConformStore for SqliteConformStore {
    fn land_raw(&self, records: &[RawRecord]) -> error::Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend("land_raw: begin tx", e))?;
        let mut stmt = tx
            .prepare(
                "INSERT INTO raw_records \
                 (batch_id, source_system, source_ref, discriminator, ingested_at, fields_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .map_err(|e| StateError::backend("land_raw: prepare", e))?;

        let mut count = 0u64;
        for record in records {
            let fields_json = serde_json::to_string(&record.fields)?;
            stmt.execute(rusqlite::params![
                record.batch_id.as_str(),
                record.source_system.as_str(),
                record.source_ref,
                record.discriminator,
                record.ingested_at.to_rfc3339(),
                fields_json,
            ])
            .map_err(|e| StateError::backend("land_raw: execute", e))?;
            count += 1;
        }
        drop(stmt);
        tx.commit()
            .map_err(|e| StateError::backend("land_raw: commit", e))?;
        Ok(count)
    }

    fn fetch_raw(
        &self,
        source_system: &SourceSystemId,
        discriminator: Option<&str>,
        batch: Option<&BatchId>,
    ) -> error::Result<Vec<RawRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, batch_id, source_system, source_ref, discriminator, \
                        ingested_at, fields_json \
                 FROM raw_records \
                 WHERE source_system = ?1 \
                   AND (?2 IS NULL OR discriminator = ?2) \
                   AND (?3 IS NULL OR batch_id = ?3) \
                 ORDER BY id",
            )
            .map_err(|e| StateError::backend("fetch_raw: prepare", e))?;

        let rows = stmt
            .query_map(
                rusqlite::params![
                    source_system.as_str(),
                    discriminator,
                    batch.map(BatchId::as_str)
                ],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .map_err(|e| StateError::backend("fetch_raw: query", e))?;

        let mut records = Vec::new();
        for row in rows {
            let (raw_id, batch_id, source, source_ref, disc, ingested_at, fields_json) =
                row.map_err(|e| StateError::backend("fetch_raw: row", e))?;
            records.push(RawRecord {
                raw_id,
                batch_id: BatchId::new(batch_id),
                source_system: SourceSystemId::new(source),
                source_ref,
                discriminator: disc,
                ingested_at: Self::parse_timestamp(&ingested_at).unwrap_or_else(Utc::now),
                fields: serde_json::from_str(&fields_json)?,
            });
        }
        Ok(records)
    }

    fn existing_rows(
        &self,
        entity: &EntityType,
    ) -> error::Result<HashMap<EnterpriseKey, ExistingRow>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT enterprise_key, source_key, content_hash \
                 FROM conformed_records WHERE entity = ?1",
            )
            .map_err(|e| StateError::backend("existing_rows: prepare", e))?;
        let rows = stmt
            .query_map([entity.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| StateError::backend("existing_rows: query", e))?;

        let mut map = HashMap::new();
        for row in rows {
            let (key, source_key, hash) =
                row.map_err(|e| StateError::backend("existing_rows: row", e))?;
            map.insert(
                EnterpriseKey::new(key),
                ExistingRow {
                    source_key: SourceKey::new(source_key),
                    content_hash: hash,
                },
            );
        }
        Ok(map)
    }

    fn existing_keys(&self, entity: &EntityType) -> error::Result<HashSet<EnterpriseKey>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT enterprise_key FROM conformed_records WHERE entity = ?1")
            .map_err(|e| StateError::backend("existing_keys: prepare", e))?;
        let rows = stmt
            .query_map([entity.as_str()], |row| row.get::<_, String>(0))
            .map_err(|e| StateError::backend("existing_keys: query", e))?;

        let mut keys = HashSet::new();
        for row in rows {
            keys.insert(EnterpriseKey::new(
                row.map_err(|e| StateError::backend("existing_keys: row", e))?,
            ));
        }
        Ok(keys)
    }

    fn fetch_conformed(&self, entity: &EntityType) -> error::Result<Vec<ConformedRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT enterprise_key, source_key, source_system, raw_id, \
                        source_modified_at, fields_json, content_hash, conformed_at, conformed_by \
                 FROM conformed_records WHERE entity = ?1 ORDER BY enterprise_key",
            )
            .map_err(|e| StateError::backend("fetch_conformed: prepare", e))?;

        let rows = stmt
            .query_map([entity.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })
            .map_err(|e| StateError::backend("fetch_conformed: query", e))?;

        let mut records = Vec::new();
        for row in rows {
            let (key, source_key, source, raw_id, modified, fields_json, hash, at, by) =
                row.map_err(|e| StateError::backend("fetch_conformed: row", e))?;
            records.push(ConformedRecord {
                entity: entity.clone(),
                enterprise_key: EnterpriseKey::new(key),
                source_key: SourceKey::new(source_key),
                source_system: SourceSystemId::new(source),
                raw_id,
                source_modified_at: modified.as_deref().and_then(Self::parse_timestamp),
                fields: serde_json::from_str(&fields_json)?,
                content_hash: hash,
                conformed_at: Self::parse_timestamp(&at).unwrap_or_else(Utc::now),
                conformed_by: by,
            });
        }
        Ok(records)
    }

    fn apply_upserts(
        &self,
        entity: &EntityType,
        records: &[ConformedRecord],
    ) -> error::Result<UpsertOutcome> {
        let existing = self.existing_rows(entity)?;
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend("apply_upserts: begin tx", e))?;

        let mut outcome = UpsertOutcome::default();
        let mut seen: HashSet<&EnterpriseKey> = HashSet::new();

        for record in records {
            if !seen.insert(&record.enterprise_key) {
                return Err(InvariantViolation::DuplicateKeyInBatch {
                    entity: entity.clone(),
                    key: record.enterprise_key.clone(),
                }
                .into());
            }

            match existing.get(&record.enterprise_key) {
                None => {
                    let fields_json = serde_json::to_string(&record.fields)?;
                    tx.execute(
                        "INSERT INTO conformed_records \
                         (entity, enterprise_key, source_key, source_system, raw_id, \
                          source_modified_at, fields_json, content_hash, conformed_at, conformed_by) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                        rusqlite::params![
                            entity.as_str(),
                            record.enterprise_key.as_str(),
                            record.source_key.as_str(),
                            record.source_system.as_str(),
                            record.raw_id,
                            record.source_modified_at.map(|ts| ts.to_rfc3339()),
                            fields_json,
                            record.content_hash,
                            record.conformed_at.to_rfc3339(),
                            record.conformed_by,
                        ],
                    )
                    .map_err(|e| StateError::backend("apply_upserts: insert", e))?;
                    outcome.inserted += 1;
                }
                Some(row) if row.source_key != record.source_key => {
                    // Enterprise keys are never reused across source keys.
                    return Err(InvariantViolation::EnterpriseKeyConflict {
                        entity: entity.clone(),
                        key: record.enterprise_key.clone(),
                        existing_source_key: row.source_key.as_str().to_string(),
                        incoming_source_key: record.source_key.as_str().to_string(),
                    }
                    .into());
                }
                Some(row) if row.content_hash == record.content_hash => {
                    outcome.unchanged += 1;
                }
                Some(_) => {
                    let fields_json = serde_json::to_string(&record.fields)?;
                    tx.execute(
                        "UPDATE conformed_records SET \
                         source_system = ?3, raw_id = ?4, source_modified_at = ?5, \
                         fields_json = ?6, content_hash = ?7, conformed_at = ?8, conformed_by = ?9 \
                         WHERE entity = ?1 AND enterprise_key = ?2",
                        rusqlite::params![
                            entity.as_str(),
                            record.enterprise_key.as_str(),
                            record.source_system.as_str(),
                            record.raw_id,
                            record.source_modified_at.map(|ts| ts.to_rfc3339()),
                            fields_json,
                            record.content_hash,
                            record.conformed_at.to_rfc3339(),
                            record.conformed_by,
                        ],
                    )
                    .map_err(|e| StateError::backend("apply_upserts: update", e))?;
                    outcome.updated += 1;
                }
            }
        }

        tx.commit()
            .map_err(|e| StateError::backend("apply_upserts: commit", e))?;
        Ok(outcome)
    }

    fn rebuild(
        &self,
        entity: &EntityType,
        records: &[ConformedRecord],
    ) -> error::Result<UpsertOutcome> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend("rebuild: begin tx", e))?;

        let deleted = tx
            .execute(
                "DELETE FROM conformed_records WHERE entity = ?1",
                [entity.as_str()],
            )
            .map_err(|e| StateError::backend("rebuild: delete", e))?;

        let mut seen: HashSet<&EnterpriseKey> = HashSet::new();
        let mut inserted = 0u64;
        for record in records {
            if !seen.insert(&record.enterprise_key) {
                return Err(InvariantViolation::DuplicateKeyInBatch {
                    entity: entity.clone(),
                    key: record.enterprise_key.clone(),
                }
                .into());
            }
            let fields_json = serde_json::to_string(&record.fields)?;
            tx.execute(
                "INSERT INTO conformed_records \
                 (entity, enterprise_key, source_key, source_system, raw_id, \
                  source_modified_at, fields_json, content_hash, conformed_at, conformed_by) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    entity.as_str(),
                    record.enterprise_key.as_str(),
                    record.source_key.as_str(),
                    record.source_system.as_str(),
                    record.raw_id,
                    record.source_modified_at.map(|ts| ts.to_rfc3339()),
                    fields_json,
                    record.content_hash,
                    record.conformed_at.to_rfc3339(),
                    record.conformed_by,
                ],
            )
            .map_err(|e| StateError::backend("rebuild: insert", e))?;
            inserted += 1;
        }

        tx.commit()
            .map_err(|e| StateError::backend("rebuild: commit", e))?;
        Ok(UpsertOutcome {
            inserted,
            deleted: deleted as u64,
            ..UpsertOutcome::default()
        })
    }

    fn quarantine(&self, run_id: i64, records: &[QuarantinedRecord]) -> error::Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend("quarantine: begin tx", e))?;
        let mut stmt = tx
            .prepare(
                "INSERT INTO quarantine_records \
                 (run_id, entity, payload_json, rule_id, detail, status, quarantined_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .map_err(|e| StateError::backend("quarantine: prepare", e))?;

        let mut count = 0u64;
        for record in records {
            stmt.execute(rusqlite::params![
                run_id,
                record.entity.as_str(),
                record.payload_json,
                record.rule_id.as_str(),
                record.detail,
                QuarantineStatus::Pending.as_str(),
                record.quarantined_at.to_rfc3339(),
            ])
            .map_err(|e| StateError::backend("quarantine: execute", e))?;
            count += 1;
        }
        drop(stmt);
        tx.commit()
            .map_err(|e| StateError::backend("quarantine: commit", e))?;
        Ok(count)
    }

    fn quarantined_for_run(&self, run_id: i64) -> error::Result<Vec<QuarantinedRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT entity, payload_json, rule_id, detail, quarantined_at \
                 FROM quarantine_records WHERE run_id = ?1 ORDER BY id",
            )
            .map_err(|e| StateError::backend("quarantined_for_run: prepare", e))?;
        let rows = stmt
            .query_map([run_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| StateError::backend("quarantined_for_run: query", e))?;

        let mut records = Vec::new();
        for row in rows {
            let (entity, payload_json, rule_id, detail, at) =
                row.map_err(|e| StateError::backend("quarantined_for_run: row", e))?;
            records.push(QuarantinedRecord {
                entity: EntityType::new(entity),
                payload_json,
                rule_id: rule_id.into(),
                detail,
                quarantined_at: Self::parse_timestamp(&at).unwrap_or_else(Utc::now),
            });
        }
        Ok(records)
    }

    fn start_run(
        &self,
        pipeline_name: &str,
        target_entity: &EntityType,
        operation: OperationKind,
    ) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO conform_runs (pipeline, target_entity, operation, status) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                pipeline_name,
                target_entity.as_str(),
                operation.as_str(),
                RunStatus::Running.as_str(),
            ],
        )
        .map_err(|e| StateError::backend("start_run: insert", e))?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(
        &self,
        run_id: i64,
        status: RunStatus,
        counts: &RunCounts,
        error_message: Option<&str>,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let affected = conn
            .execute(
                "UPDATE conform_runs SET status = ?1, finished_at = datetime('now'), \
                 rows_read = ?2, rows_inserted = ?3, rows_updated = ?4, rows_unchanged = ?5, \
                 rows_deleted = ?6, rows_quarantined = ?7, error_message = ?8 \
                 WHERE id = ?9 AND status = 'running'",
                rusqlite::params![
                    status.as_str(),
                    counts.read as i64,
                    counts.inserted as i64,
                    counts.updated as i64,
                    counts.unchanged as i64,
                    counts.deleted as i64,
                    counts.quarantined as i64,
                    error_message,
                    run_id,
                ],
            )
            .map_err(|e| StateError::backend("complete_run: update", e))?;

        if affected == 0 {
            let exists: bool = conn
                .query_row(
                    "SELECT COUNT(*) > 0 FROM conform_runs WHERE id = ?1",
                    [run_id],
                    |row| row.get(0),
                )
                .map_err(|e| StateError::backend("complete_run: lookup", e))?;
            let violation = if exists {
                InvariantViolation::RunAlreadySealed { run_id }
            } else {
                InvariantViolation::RunNotFound { run_id }
            };
            return Err(violation.into());
        }
        Ok(())
    }

    #[allow(clippy::cast_sign_loss)]
    fn get_run(&self, run_id: i64) -> error::Result<Option<ConformRun>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT pipeline, target_entity, operation, status, started_at, finished_at, \
                    rows_read, rows_inserted, rows_updated, rows_unchanged, rows_deleted, \
                    rows_quarantined, error_message \
             FROM conform_runs WHERE id = ?1",
            [run_id],
            |row| {
                Ok(ConformRun {
                    run_id,
                    pipeline_name: row.get(0)?,
                    target_entity: row.get(1)?,
                    operation: match row.get::<_, String>(2)?.as_str() {
                        "rebuild" => OperationKind::Rebuild,
                        _ => OperationKind::Merge,
                    },
                    status: match row.get::<_, String>(3)?.as_str() {
                        "succeeded" => RunStatus::Succeeded,
                        "failed" => RunStatus::Failed,
                        _ => RunStatus::Running,
                    },
                    started_at: Self::sqlite_to_iso8601(&row.get::<_, String>(4)?),
                    finished_at: row
                        .get::<_, Option<String>>(5)?
                        .map(|s| Self::sqlite_to_iso8601(&s)),
                    counts: RunCounts {
                        read: row.get::<_, i64>(6)? as u64,
                        inserted: row.get::<_, i64>(7)? as u64,
                        updated: row.get::<_, i64>(8)? as u64,
                        unchanged: row.get::<_, i64>(9)? as u64,
                        deleted: row.get::<_, i64>(10)? as u64,
                        quarantined: row.get::<_, i64>(11)? as u64,
                    },
                    error_message: row.get(12)?,
                })
            },
        );
        match result {
            Ok(run) => Ok(Some(run)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StateError::backend("get_run: query", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use keystone_types::record::FieldValue;

    fn entity() -> EntityType {
        EntityType::new("team")
    }

    fn conformed(key: &str, source_key: &str, hash: &str) -> ConformedRecord {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), FieldValue::Text("Alpha".into()));
        ConformedRecord {
            entity: entity(),
            enterprise_key: EnterpriseKey::new(key),
            source_key: SourceKey::new(source_key),
            source_system: SourceSystemId::new("crm"),
            raw_id: 1,
            source_modified_at: None,
            fields,
            content_hash: hash.into(),
            conformed_at: Utc::now(),
            conformed_by: "conform_team".into(),
        }
    }

    fn raw(batch: &str, fields: &[(&str, &str)]) -> RawRecord {
        RawRecord {
            raw_id: 0,
            batch_id: BatchId::new(batch),
            source_system: SourceSystemId::new("crm"),
            source_ref: "crm/teams.csv".into(),
            discriminator: Some("team".into()),
            ingested_at: Utc::now(),
            fields: fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    #[test]
    fn land_and_fetch_raw() {
        let store = SqliteConformStore::in_memory().unwrap();
        let landed = store
            .land_raw(&[
                raw("b1", &[("team_id", "T1"), ("name", "Alpha")]),
                raw("b1", &[("team_id", "T2"), ("name", "Beta")]),
            ])
            .unwrap();
        assert_eq!(landed, 2);

        let fetched = store
            .fetch_raw(&SourceSystemId::new("crm"), Some("team"), None)
            .unwrap();
        assert_eq!(fetched.len(), 2);
        assert!(fetched[0].raw_id > 0);
        assert_eq!(fetched[0].field("team_id"), Some("T1"));
    }

    #[test]
    fn fetch_raw_filters_by_batch() {
        let store = SqliteConformStore::in_memory().unwrap();
        store
            .land_raw(&[
                raw("b1", &[("team_id", "T1")]),
                raw("b2", &[("team_id", "T2")]),
            ])
            .unwrap();

        let b2 = store
            .fetch_raw(
                &SourceSystemId::new("crm"),
                Some("team"),
                Some(&BatchId::new("b2")),
            )
            .unwrap();
        assert_eq!(b2.len(), 1);
        assert_eq!(b2[0].field("team_id"), Some("T2"));
    }

    #[test]
    fn upsert_insert_then_unchanged_then_update() {
        let store = SqliteConformStore::in_memory().unwrap();

        let out = store
            .apply_upserts(&entity(), &[conformed("TEAM-1", "T1", "h1")])
            .unwrap();
        assert_eq!(out.inserted, 1);
        assert_eq!(out.updated, 0);

        // Same hash: no-op.
        let out = store
            .apply_upserts(&entity(), &[conformed("TEAM-1", "T1", "h1")])
            .unwrap();
        assert_eq!(out.inserted, 0);
        assert_eq!(out.unchanged, 1);

        // New hash: update.
        let out = store
            .apply_upserts(&entity(), &[conformed("TEAM-1", "T1", "h2")])
            .unwrap();
        assert_eq!(out.updated, 1);
        assert_eq!(out.unchanged, 0);

        let rows = store.existing_rows(&entity()).unwrap();
        assert_eq!(rows[&EnterpriseKey::new("TEAM-1")].content_hash, "h2");
    }

    #[test]
    fn upsert_rejects_enterprise_key_rebind() {
        let store = SqliteConformStore::in_memory().unwrap();
        store
            .apply_upserts(&entity(), &[conformed("TEAM-1", "T1", "h1")])
            .unwrap();

        let err = store
            .apply_upserts(&entity(), &[conformed("TEAM-1", "T99", "h1")])
            .expect_err("rebind must fail");
        assert!(matches!(
            err.as_invariant(),
            Some(InvariantViolation::EnterpriseKeyConflict { .. })
        ));
    }

    #[test]
    fn upsert_failure_rolls_back_whole_batch() {
        let store = SqliteConformStore::in_memory().unwrap();
        store
            .apply_upserts(&entity(), &[conformed("TEAM-1", "T1", "h1")])
            .unwrap();

        // Second record rebinds TEAM-1; the first insert in the batch
        // must not survive.
        let err = store.apply_upserts(
            &entity(),
            &[
                conformed("TEAM-2", "T2", "h2"),
                conformed("TEAM-1", "T99", "h1"),
            ],
        );
        assert!(err.is_err());
        let keys = store.existing_keys(&entity()).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains(&EnterpriseKey::new("TEAM-1")));
    }

    #[test]
    fn upsert_rejects_duplicate_key_in_batch() {
        let store = SqliteConformStore::in_memory().unwrap();
        let err = store
            .apply_upserts(
                &entity(),
                &[
                    conformed("TEAM-1", "T1", "h1"),
                    conformed("TEAM-1", "T1", "h2"),
                ],
            )
            .expect_err("duplicate key must fail");
        assert!(matches!(
            err.as_invariant(),
            Some(InvariantViolation::DuplicateKeyInBatch { .. })
        ));
        assert!(store.existing_keys(&entity()).unwrap().is_empty());
    }

    #[test]
    fn rebuild_replaces_store_atomically() {
        let store = SqliteConformStore::in_memory().unwrap();
        store
            .apply_upserts(
                &entity(),
                &[
                    conformed("TEAM-1", "T1", "h1"),
                    conformed("TEAM-2", "T2", "h2"),
                ],
            )
            .unwrap();

        let out = store
            .rebuild(&entity(), &[conformed("TEAM-3", "T3", "h3")])
            .unwrap();
        assert_eq!(out.deleted, 2);
        assert_eq!(out.inserted, 1);

        let keys = store.existing_keys(&entity()).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains(&EnterpriseKey::new("TEAM-3")));
    }

    #[test]
    fn rebuild_failure_leaves_store_untouched() {
        let store = SqliteConformStore::in_memory().unwrap();
        store
            .apply_upserts(&entity(), &[conformed("TEAM-1", "T1", "h1")])
            .unwrap();

        // Duplicate key inside the repopulate set aborts after the
        // delete already executed; the transaction must roll back.
        let err = store.rebuild(
            &entity(),
            &[
                conformed("TEAM-2", "T2", "h2"),
                conformed("TEAM-2", "T2", "h2"),
            ],
        );
        assert!(err.is_err());

        let keys = store.existing_keys(&entity()).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains(&EnterpriseKey::new("TEAM-1")));
    }

    #[test]
    fn run_lifecycle() {
        let store = SqliteConformStore::in_memory().unwrap();
        let run_id = store
            .start_run("conform_team", &entity(), OperationKind::Merge)
            .unwrap();
        assert!(run_id > 0);

        let running = store.get_run(run_id).unwrap().unwrap();
        assert_eq!(running.status, RunStatus::Running);
        assert!(!running.started_at.is_empty());
        assert!(running.finished_at.is_none());

        store
            .complete_run(
                run_id,
                RunStatus::Succeeded,
                &RunCounts {
                    read: 3,
                    inserted: 2,
                    quarantined: 1,
                    ..RunCounts::default()
                },
                None,
            )
            .unwrap();

        let sealed = store.get_run(run_id).unwrap().unwrap();
        assert_eq!(sealed.status, RunStatus::Succeeded);
        assert_eq!(sealed.counts.read, 3);
        assert_eq!(sealed.counts.inserted, 2);
        assert_eq!(sealed.counts.quarantined, 1);
        assert!(sealed.finished_at.is_some());
    }

    #[test]
    fn sealing_twice_is_an_invariant_error() {
        let store = SqliteConformStore::in_memory().unwrap();
        let run_id = store
            .start_run("conform_team", &entity(), OperationKind::Merge)
            .unwrap();
        store
            .complete_run(run_id, RunStatus::Succeeded, &RunCounts::default(), None)
            .unwrap();

        let err = store
            .complete_run(run_id, RunStatus::Failed, &RunCounts::default(), None)
            .expect_err("second seal must fail");
        assert!(matches!(
            err.as_invariant(),
            Some(InvariantViolation::RunAlreadySealed { .. })
        ));
    }

    #[test]
    fn sealing_unknown_run_is_an_invariant_error() {
        let store = SqliteConformStore::in_memory().unwrap();
        let err = store
            .complete_run(999, RunStatus::Succeeded, &RunCounts::default(), None)
            .expect_err("unknown run must fail");
        assert!(matches!(
            err.as_invariant(),
            Some(InvariantViolation::RunNotFound { run_id: 999 })
        ));
    }

    #[test]
    fn failed_run_records_error_detail() {
        let store = SqliteConformStore::in_memory().unwrap();
        let run_id = store
            .start_run("conform_team", &entity(), OperationKind::Merge)
            .unwrap();
        store
            .complete_run(
                run_id,
                RunStatus::Failed,
                &RunCounts::default(),
                Some("store unreachable"),
            )
            .unwrap();

        let run = store.get_run(run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("store unreachable"));
    }

    #[test]
    fn quarantine_append_and_read_back() {
        let store = SqliteConformStore::in_memory().unwrap();
        let run_id = store
            .start_run("conform_team", &entity(), OperationKind::Merge)
            .unwrap();

        let records = vec![QuarantinedRecord {
            entity: entity(),
            payload_json: r#"{"team_id":"T3","name":""}"#.into(),
            rule_id: "NAME_NOT_EMPTY".into(),
            detail: "field 'name' is empty".into(),
            quarantined_at: Utc::now(),
        }];
        let count = store.quarantine(run_id, &records).unwrap();
        assert_eq!(count, 1);

        let stored = store.quarantined_for_run(run_id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].rule_id.as_str(), "NAME_NOT_EMPTY");
    }

    #[test]
    fn quarantine_empty_batch_is_noop() {
        let store = SqliteConformStore::in_memory().unwrap();
        assert_eq!(store.quarantine(1, &[]).unwrap(), 0);
    }

    #[test]
    fn fetch_conformed_roundtrips_fields() {
        let store = SqliteConformStore::in_memory().unwrap();
        store
            .apply_upserts(&entity(), &[conformed("TEAM-1", "T1", "h1")])
            .unwrap();

        let records = store.fetch_conformed(&entity()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].field("name"),
            &FieldValue::Text("Alpha".into())
        );
        assert_eq!(records[0].source_key.as_str(), "T1");
    }

    #[test]
    fn sqlite_to_iso8601_conversion() {
        let iso = SqliteConformStore::sqlite_to_iso8601("2026-01-15 10:00:00");
        assert_eq!(iso, "2026-01-15T10:00:00Z");
    }
}
