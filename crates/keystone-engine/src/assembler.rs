//! Composite entity assembly.
//!
//! Joins an internal master entity against an external reference
//! entity through a cascade of identifier matches, producing one
//! assembled record per internal record. The cascade is ordered from
//! strongest identifier to weakest and stops at the first hit:
//! private loan id, then CUSIP, then ISIN, then ticker qualified by
//! instrument type. A CUSIP shared by several reference rows is a
//! known data hazard, so that stage carries an ambiguity guard: the
//! record assembles as `AMBIGUOUS` and takes no enrichment rather
//! than guessing.
//!
//! Assembly is bracketed by the same run ledger and quarantine sink
//! as conformance; records that fail pre-match validation (type not
//! allowed, parent missing) are excluded to quarantine, never dropped.

use std::collections::{BTreeMap, HashMap};

use anyhow::anyhow;
use chrono::Utc;
use keystone_state::ConformStore;
use keystone_types::assembly::{MatchConfidence, MatchRule, MatchStatus};
use keystone_types::ids::RuleId;
use keystone_types::quarantine::QuarantinedRecord;
use keystone_types::record::{ConformedRecord, FieldValue};
use keystone_types::run::{OperationKind, RunCounts, RunStatus};
use tracing::{info, warn};

use crate::config::types::AssemblerDef;
use crate::errors::EngineError;
use crate::hash::content_hash;
use crate::pipeline::absorb_outcome;

/// Metadata fields written onto every assembled record.
pub const FIELD_MATCH_STATUS: &str = "match_status";
pub const FIELD_MATCH_CONFIDENCE: &str = "match_confidence";
pub const FIELD_MATCH_RULE: &str = "match_rule";

/// Quarantine rule ids raised by pre-match validation.
pub const RULE_TYPE_NOT_ALLOWED: &str = "ASM_TYPE_NOT_ALLOWED";
pub const RULE_PARENT_NOT_FOUND: &str = "ASM_PARENT_NOT_FOUND";

/// How one internal record fared in the match cascade. Confidence is
/// implied by the rule ([`MatchRule::confidence`]), not chosen per
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// One reference row matched; `external` indexes the sorted
    /// reference list.
    Matched { external: usize, rule: MatchRule },
    /// Several reference rows share the matching CUSIP.
    Ambiguous { rule: MatchRule },
    Unmatched,
}

/// Identifier indexes over the external reference records, keyed by
/// normalized identifier value. Values index the sorted record list.
struct RefIndex {
    by_loan: HashMap<String, Vec<usize>>,
    by_cusip: HashMap<String, Vec<usize>>,
    by_isin: HashMap<String, Vec<usize>>,
    by_ticker_type: HashMap<(String, String), Vec<usize>>,
}

impl RefIndex {
    fn build(externals: &[ConformedRecord], def: &AssemblerDef) -> Self {
        let mut index = RefIndex {
            by_loan: HashMap::new(),
            by_cusip: HashMap::new(),
            by_isin: HashMap::new(),
            by_ticker_type: HashMap::new(),
        };
        for (i, record) in externals.iter().enumerate() {
            if let Some(loan) = nonblank(record.field(&def.loan_field)) {
                index.by_loan.entry(loan.to_string()).or_default().push(i);
            }
            if let Some(cusip) = nonblank(record.field(&def.cusip_field)) {
                index.by_cusip.entry(cusip.to_string()).or_default().push(i);
            }
            if let Some(isin) = nonblank(record.field(&def.isin_field)) {
                index.by_isin.entry(isin.to_string()).or_default().push(i);
            }
            if let (Some(ticker), Some(kind)) = (
                nonblank(record.field(&def.ticker_field)),
                nonblank(record.field(&def.type_field)),
            ) {
                index
                    .by_ticker_type
                    .entry((ticker.to_string(), kind.to_string()))
                    .or_default()
                    .push(i);
            }
        }
        index
    }
}

fn nonblank(value: &FieldValue) -> Option<&str> {
    value.as_text().map(str::trim).filter(|t| !t.is_empty())
}

/// Walk the cascade for one internal record. First hit wins; later
/// stages are not consulted once an earlier identifier resolves.
fn run_cascade(internal: &ConformedRecord, index: &RefIndex, def: &AssemblerDef) -> MatchOutcome {
    if let Some(loan) = nonblank(internal.field(&def.loan_field)) {
        if let Some(hits) = index.by_loan.get(loan) {
            return MatchOutcome::Matched {
                external: hits[0],
                rule: MatchRule::LoanId,
            };
        }
    }
    if let Some(cusip) = nonblank(internal.field(&def.cusip_field)) {
        if let Some(hits) = index.by_cusip.get(cusip) {
            if hits.len() > 1 {
                return MatchOutcome::Ambiguous {
                    rule: MatchRule::Cusip,
                };
            }
            return MatchOutcome::Matched {
                external: hits[0],
                rule: MatchRule::Cusip,
            };
        }
    }
    if let Some(isin) = nonblank(internal.field(&def.isin_field)) {
        if let Some(hits) = index.by_isin.get(isin) {
            return MatchOutcome::Matched {
                external: hits[0],
                rule: MatchRule::Isin,
            };
        }
    }
    if let (Some(ticker), Some(kind)) = (
        nonblank(internal.field(&def.ticker_field)),
        nonblank(internal.field(&def.type_field)),
    ) {
        if let Some(hits) = index
            .by_ticker_type
            .get(&(ticker.to_string(), kind.to_string()))
        {
            return MatchOutcome::Matched {
                external: hits[0],
                rule: MatchRule::TickerType,
            };
        }
    }
    MatchOutcome::Unmatched
}

/// Run the assembler for one definition.
///
/// # Errors
///
/// Returns [`EngineError`] on storage failure; the run is sealed
/// `Failed` before the error propagates, carrying whatever counts had
/// accumulated so committed quarantine rows stay attributed to it.
pub fn run_assembly(store: &dyn ConformStore, def: &AssemblerDef) -> Result<RunCounts, EngineError> {
    let run_id = store.start_run(&def.pipeline, &def.entity, OperationKind::Merge)?;
    info!(pipeline = %def.pipeline, entity = %def.entity, run_id, "assembly run started");

    let mut counts = RunCounts::default();
    match assemble(store, def, run_id, &mut counts) {
        Ok(()) => {
            store.complete_run(run_id, RunStatus::Succeeded, &counts, None)?;
            info!(
                pipeline = %def.pipeline,
                run_id,
                read = counts.read,
                inserted = counts.inserted,
                updated = counts.updated,
                unchanged = counts.unchanged,
                quarantined = counts.quarantined,
                "assembly run succeeded"
            );
            Ok(counts)
        }
        Err(err) => {
            let message = err.to_string();
            if let Err(seal_err) =
                store.complete_run(run_id, RunStatus::Failed, &counts, Some(&message))
            {
                warn!(
                    pipeline = %def.pipeline,
                    run_id,
                    error = %seal_err,
                    "failed to seal run as failed"
                );
            }
            Err(err)
        }
    }
}

#[allow(clippy::too_many_lines)]
fn assemble(
    store: &dyn ConformStore,
    def: &AssemblerDef,
    run_id: i64,
    counts: &mut RunCounts,
) -> Result<(), EngineError> {
    let mut internals = store.fetch_conformed(&def.internal_entity)?;
    internals.sort_by(|a, b| a.enterprise_key.cmp(&b.enterprise_key));
    let mut externals = store.fetch_conformed(&def.external_entity)?;
    externals.sort_by(|a, b| a.enterprise_key.cmp(&b.enterprise_key));
    let parent_keys = store.existing_keys(&def.parent_entity)?;

    let index = RefIndex::build(&externals, def);

    counts.read = internals.len() as u64;

    let mut quarantined = Vec::new();
    let mut assembled = Vec::new();
    let now = Utc::now();

    for internal in &internals {
        // Pre-match validation mirrors conformance: exclusions are
        // named and persisted, never dropped.
        let kind = nonblank(internal.field(&def.type_field));
        if !kind.is_some_and(|k| def.allowed_types.iter().any(|a| a == k)) {
            quarantined.push(exclusion(
                def,
                internal,
                RULE_TYPE_NOT_ALLOWED,
                format!(
                    "instrument type {:?} not in {:?}",
                    kind, def.allowed_types
                ),
            )?);
            counts.quarantined += 1;
            continue;
        }
        let parent = internal.field(&def.parent_key_field).as_text();
        let parent_known = parent.is_some_and(|p| {
            parent_keys.contains(&keystone_types::ids::EnterpriseKey::new(p))
        });
        if !parent_known {
            quarantined.push(exclusion(
                def,
                internal,
                RULE_PARENT_NOT_FOUND,
                format!(
                    "parent key {:?} not conformed for {}",
                    parent, def.parent_entity
                ),
            )?);
            counts.quarantined += 1;
            continue;
        }

        let outcome = run_cascade(internal, &index, def);
        let mut fields = internal.fields.clone();
        match &outcome {
            MatchOutcome::Matched { external, rule } => {
                let reference = &externals[*external];
                for name in &def.enrich_fields {
                    // Only a null or blank-text field takes enrichment;
                    // internal values always win.
                    let blank = match fields.get(name) {
                        None | Some(FieldValue::Null) => true,
                        Some(FieldValue::Text(s)) => s.trim().is_empty(),
                        Some(_) => false,
                    };
                    if blank {
                        if let Some(value) = nonblank(reference.field(name)) {
                            fields.insert(name.clone(), FieldValue::Text(value.to_string()));
                        }
                    }
                }
                fields.insert(
                    FIELD_MATCH_STATUS.into(),
                    FieldValue::Text(MatchStatus::Matched.as_str().into()),
                );
                fields.insert(
                    FIELD_MATCH_CONFIDENCE.into(),
                    FieldValue::Text(rule.confidence().as_str().into()),
                );
                fields.insert(FIELD_MATCH_RULE.into(), FieldValue::Text(rule.as_str().into()));
            }
            MatchOutcome::Ambiguous { rule } => {
                fields.insert(
                    FIELD_MATCH_STATUS.into(),
                    FieldValue::Text(MatchStatus::Ambiguous.as_str().into()),
                );
                fields.insert(
                    FIELD_MATCH_CONFIDENCE.into(),
                    FieldValue::Text(MatchConfidence::Low.as_str().into()),
                );
                fields.insert(FIELD_MATCH_RULE.into(), FieldValue::Text(rule.as_str().into()));
            }
            MatchOutcome::Unmatched => {
                fields.insert(
                    FIELD_MATCH_STATUS.into(),
                    FieldValue::Text(MatchStatus::Unmatched.as_str().into()),
                );
                fields.insert(FIELD_MATCH_CONFIDENCE.into(), FieldValue::Null);
                fields.insert(FIELD_MATCH_RULE.into(), FieldValue::Null);
            }
        }

        let values: Vec<FieldValue> = fields.values().cloned().collect();
        let hash = content_hash(&values);

        assembled.push(ConformedRecord {
            entity: def.entity.clone(),
            enterprise_key: internal.enterprise_key.clone(),
            source_key: internal.source_key.clone(),
            source_system: internal.source_system.clone(),
            raw_id: internal.raw_id,
            source_modified_at: internal.source_modified_at,
            fields,
            content_hash: hash,
            conformed_at: now,
            conformed_by: def.pipeline.clone(),
        });
    }

    if !quarantined.is_empty() {
        let written = store.quarantine(run_id, &quarantined)?;
        warn!(
            pipeline = %def.pipeline,
            run_id,
            records = counts.quarantined,
            entries = written,
            "internal records excluded from assembly"
        );
    }

    let outcome = store.apply_upserts(&def.entity, &assembled)?;
    absorb_outcome(counts, outcome);
    Ok(())
}

fn exclusion(
    def: &AssemblerDef,
    record: &ConformedRecord,
    rule_id: &str,
    detail: String,
) -> Result<QuarantinedRecord, EngineError> {
    let payload_json = serde_json::to_string(record)
        .map_err(|e| EngineError::Infrastructure(anyhow!("quarantine payload: {e}")))?;
    Ok(QuarantinedRecord {
        entity: def.entity.clone(),
        payload_json,
        rule_id: RuleId::new(rule_id),
        detail,
        quarantined_at: Utc::now(),
    })
}
