//! The entity conformance pipeline.
//!
//! One invocation conforms one entity type from one source system:
//! stage raw records, normalize fields, translate keys, hash content,
//! validate, and upsert with change detection. Every record excluded
//! along the way lands in quarantine under the rule that excluded it,
//! so `read == inserted + updated + unchanged + quarantined` holds for
//! every merge run. The whole invocation is bracketed by a run-ledger
//! row that is sealed exactly once, success or failure.

use std::collections::HashMap;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use keystone_state::{ConformStore, UpsertOutcome};
use keystone_types::crosswalk::KeyTransform;
use keystone_types::ids::{BatchId, EnterpriseKey, RuleId, SourceKey};
use keystone_types::quarantine::QuarantinedRecord;
use keystone_types::record::{ConformedRecord, FieldValue, RawRecord};
use keystone_types::run::{OperationKind, RunCounts, RunStatus};
use tracing::{info, warn};

use crate::config::types::EntityDef;
use crate::crosswalk::CrosswalkGraph;
use crate::errors::EngineError;
use crate::hash::content_hash;
use crate::rules::{evaluate_all, RefContext, ValidationRule};
use crate::translate::apply_route;

/// Run the conformance pipeline for one entity definition.
///
/// Narrow `batch` to a single ingestion batch, or pass `None` to
/// conform everything staged for the source. `max_hops` bounds
/// crosswalk route discovery for rules that carry no transform of
/// their own.
///
/// # Errors
///
/// Returns [`EngineError::Invariant`] when storage rejects a key
/// rebinding or a duplicate enterprise key, [`EngineError::Infrastructure`]
/// on storage failure or a misconfigured catalog entry. The run is
/// sealed `Failed` before the error propagates, carrying whatever
/// counts had accumulated: quarantine rows committed before the
/// failure stay attributed to the run.
pub fn run_conformance(
    store: &dyn ConformStore,
    graph: &CrosswalkGraph,
    def: &EntityDef,
    batch: Option<&BatchId>,
    max_hops: u32,
) -> Result<RunCounts, EngineError> {
    let run_id = store.start_run(&def.pipeline, &def.entity, def.operation)?;
    info!(
        pipeline = %def.pipeline,
        entity = %def.entity,
        run_id,
        operation = def.operation.as_str(),
        "conformance run started"
    );

    let mut counts = RunCounts::default();
    match conform(store, graph, def, batch, run_id, max_hops, &mut counts) {
        Ok(()) => {
            store.complete_run(run_id, RunStatus::Succeeded, &counts, None)?;
            info!(
                pipeline = %def.pipeline,
                run_id,
                read = counts.read,
                inserted = counts.inserted,
                updated = counts.updated,
                unchanged = counts.unchanged,
                deleted = counts.deleted,
                quarantined = counts.quarantined,
                "conformance run succeeded"
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

/// One record after key translation, before validation.
struct Candidate {
    raw: RawRecord,
    enterprise_key: EnterpriseKey,
    source_key: SourceKey,
    source_modified_at: Option<DateTime<Utc>>,
    fields: std::collections::BTreeMap<String, FieldValue>,
}

#[allow(clippy::too_many_lines)]
fn conform(
    store: &dyn ConformStore,
    graph: &CrosswalkGraph,
    def: &EntityDef,
    batch: Option<&BatchId>,
    run_id: i64,
    max_hops: u32,
    counts: &mut RunCounts,
) -> Result<(), EngineError> {
    let rules = compile_rules(def)?;
    let key_route = route_for(graph, &def.key_rule, max_hops)?;
    let fk_routes = def
        .foreign_keys
        .iter()
        .map(|fk| Ok((fk.field.as_str(), route_for(graph, &fk.rule, max_hops)?)))
        .collect::<Result<HashMap<_, _>, EngineError>>()?;

    // Stage: read everything landed for this definition.
    let raw = store.fetch_raw(&def.source_system, def.discriminator.as_deref(), batch)?;
    counts.read = raw.len() as u64;

    let raw = dedup_latest(raw, &def.source_key_field);

    let mut quarantined = Vec::new();
    let mut candidates = Vec::new();

    for record in raw {
        // Stage: translate the source key into the enterprise key.
        // Keys are trimmed first: a padded re-delivery must not mint
        // a second, silently distinct enterprise key.
        let source_key = record.field(&def.source_key_field).map(str::trim);
        let Some(enterprise_key) = apply_route(source_key, &key_route) else {
            quarantined.push(exclusion(
                def,
                &record,
                &def.key_rule,
                format!(
                    "source key {:?} in field '{}' failed translation",
                    source_key, def.source_key_field
                ),
            )?);
            counts.quarantined += 1;
            continue;
        };

        // Stage: normalize business fields.
        let mut fields = std::collections::BTreeMap::new();
        for spec in &def.fields {
            fields.insert(spec.name.clone(), spec.normalizer.apply(record.field(&spec.name)));
        }

        // Stage: translate foreign keys into enterprise-key space.
        let mut excluded = false;
        for fk in &def.foreign_keys {
            let route = &fk_routes[fk.field.as_str()];
            match apply_route(record.field(&fk.field).map(str::trim), route) {
                Some(translated) => {
                    fields.insert(fk.field.clone(), FieldValue::Text(translated));
                }
                None if fk.optional && record.field(&fk.field).map_or(true, |v| v.trim().is_empty()) => {
                    fields.insert(fk.field.clone(), FieldValue::Null);
                }
                None => {
                    quarantined.push(exclusion(
                        def,
                        &record,
                        &fk.rule,
                        format!(
                            "foreign key {:?} in field '{}' failed translation",
                            record.field(&fk.field),
                            fk.field
                        ),
                    )?);
                    counts.quarantined += 1;
                    excluded = true;
                    break;
                }
            }
        }
        if excluded {
            continue;
        }

        let source_modified_at = def
            .source_modified_field
            .as_deref()
            .and_then(|f| record.field(f))
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc));
        let source_key = SourceKey::new(source_key.unwrap_or_default());

        candidates.push(Candidate {
            raw: record,
            enterprise_key: EnterpriseKey::new(enterprise_key),
            source_key,
            source_modified_at,
            fields,
        });
    }

    // Stage: validate against the rule set, collecting every failure
    // per record. A record failing three rules produces three
    // quarantine rows but counts as one exclusion.
    let refs = ref_context(store, &rules)?;
    let mut conformed = Vec::new();
    let now = Utc::now();
    for candidate in candidates {
        let failures = evaluate_all(&rules, &candidate.fields, &refs);
        if !failures.is_empty() {
            counts.quarantined += 1;
            for failure in failures {
                quarantined.push(exclusion(def, &candidate.raw, &failure.rule_id, failure.detail)?);
            }
            continue;
        }

        // Stage: hash business content in catalog field order.
        let values: Vec<FieldValue> = def
            .fields
            .iter()
            .map(|spec| candidate.fields.get(&spec.name).cloned().unwrap_or(FieldValue::Null))
            .collect();
        let hash = content_hash(&values);

        conformed.push(ConformedRecord {
            entity: def.entity.clone(),
            enterprise_key: candidate.enterprise_key,
            source_key: candidate.source_key,
            source_system: def.source_system.clone(),
            raw_id: candidate.raw.raw_id,
            source_modified_at: candidate.source_modified_at,
            fields: candidate.fields,
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
            "records excluded to quarantine"
        );
    }

    // Stage: upsert with change detection.
    let outcome = match def.operation {
        OperationKind::Merge => store.apply_upserts(&def.entity, &conformed)?,
        OperationKind::Rebuild => store.rebuild(&def.entity, &conformed)?,
    };
    absorb_outcome(counts, outcome);
    Ok(())
}

pub(crate) fn absorb_outcome(counts: &mut RunCounts, outcome: UpsertOutcome) {
    counts.inserted += outcome.inserted;
    counts.updated += outcome.updated;
    counts.unchanged += outcome.unchanged;
    counts.deleted += outcome.deleted;
}

fn compile_rules(def: &EntityDef) -> Result<Vec<ValidationRule>, EngineError> {
    def.rules
        .iter()
        .map(|spec| {
            spec.compile()
                .map_err(|e| EngineError::Infrastructure(anyhow!("pipeline {}: {e}", def.pipeline)))
        })
        .collect()
}

/// Resolve the transform chain a crosswalk rule implies, through
/// multi-hop route discovery when the rule carries no transform of
/// its own. The catalog validator guarantees resolution for a
/// validated catalog.
fn route_for(
    graph: &CrosswalkGraph,
    rule_id: &RuleId,
    max_hops: u32,
) -> Result<Vec<KeyTransform>, EngineError> {
    graph.transform_route(rule_id.as_str(), max_hops).ok_or_else(|| {
        EngineError::Infrastructure(anyhow!(
            "crosswalk rule {rule_id} resolves no translation route within {max_hops} hops"
        ))
    })
}

/// Build the referential-existence context the rule set needs, one
/// key-set fetch per distinct target entity.
fn ref_context(store: &dyn ConformStore, rules: &[ValidationRule]) -> Result<RefContext, EngineError> {
    let mut refs = RefContext::new();
    for rule in rules {
        if let crate::rules::CompiledCheck::RefExists { entity, .. } = &rule.check {
            if !refs.contains_key(entity) {
                refs.insert(entity.clone(), store.existing_keys(entity)?);
            }
        }
    }
    Ok(refs)
}

/// Keep only the latest landed record per source key. Two raw rows
/// carrying the same source key are re-deliveries; the one with the
/// latest ingestion wins, ties broken by landing order. Keys compare
/// trimmed, matching key translation, so a padded re-delivery folds
/// with the clean one. Records missing the key field pass through so
/// key translation can quarantine them individually.
fn dedup_latest(raw: Vec<RawRecord>, source_key_field: &str) -> Vec<RawRecord> {
    let mut keyless = Vec::new();
    let mut latest: HashMap<String, RawRecord> = HashMap::new();
    for record in raw {
        match record.field(source_key_field).map(str::trim) {
            None => keyless.push(record),
            Some(key) => match latest.get(key) {
                Some(kept)
                    if (kept.ingested_at, kept.raw_id)
                        >= (record.ingested_at, record.raw_id) => {}
                _ => {
                    latest.insert(key.to_string(), record);
                }
            },
        }
    }
    let mut out: Vec<RawRecord> = latest.into_values().collect();
    out.extend(keyless);
    out.sort_by_key(|r| r.raw_id);
    out
}

fn exclusion(
    def: &EntityDef,
    record: &RawRecord,
    rule_id: &RuleId,
    detail: String,
) -> Result<QuarantinedRecord, EngineError> {
    let payload_json = serde_json::to_string(record)
        .map_err(|e| EngineError::Infrastructure(anyhow!("quarantine payload: {e}")))?;
    Ok(QuarantinedRecord {
        entity: def.entity.clone(),
        payload_json,
        rule_id: rule_id.clone(),
        detail,
        quarantined_at: Utc::now(),
    })
}
