//! DAG orchestration: executes the catalog's phases in order.
//!
//! Phases run sequentially. Steps within a phase have no dependencies
//! on each other and run concurrently on blocking tasks. Failure is
//! fail-fast: the first failed step aborts its siblings and stops the
//! run before the next phase, so a downstream pipeline never conforms
//! against half-written upstream entities. Steps whose source system
//! is marked inactive are skipped with a log line, not failed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use keystone_state::ConformStore;
use keystone_types::ids::BatchId;
use keystone_types::run::RunCounts;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::assembler::run_assembly;
use crate::config::types::Catalog;
use crate::config::validator::validate_catalog;
use crate::crosswalk::CrosswalkGraph;
use crate::errors::EngineError;
use crate::pipeline::run_conformance;

/// Cooperative cancellation handle, checked at phase and step
/// boundaries. A running step is never interrupted mid-write.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub phase: String,
    pub pipeline: String,
    pub counts: RunCounts,
}

/// Outcome of a full orchestration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorReport {
    pub steps: Vec<StepReport>,
    /// Pipelines skipped because their source system is inactive.
    pub skipped: Vec<String>,
}

impl OrchestratorReport {
    /// Aggregate counts across every executed step.
    #[must_use]
    pub fn totals(&self) -> RunCounts {
        let mut totals = RunCounts::default();
        for step in &self.steps {
            totals.absorb(&step.counts);
        }
        totals
    }
}

/// Execute every phase of the catalog against the store.
///
/// # Errors
///
/// Returns the catalog-validation error before any step runs, the
/// first step error otherwise. Either way no later phase is started.
pub async fn run_all(
    store: Arc<dyn ConformStore>,
    catalog: &Catalog,
    batch: Option<BatchId>,
    cancel: &CancelFlag,
) -> Result<OrchestratorReport, EngineError> {
    validate_catalog(catalog).map_err(EngineError::Infrastructure)?;
    let graph = Arc::new(CrosswalkGraph::new(catalog.crosswalk_rules.clone()));

    let mut report = OrchestratorReport::default();

    for phase in &catalog.phases {
        if cancel.is_cancelled() {
            return Err(EngineError::Infrastructure(anyhow!(
                "orchestration cancelled before phase '{}'",
                phase.name
            )));
        }
        info!(phase = %phase.name, steps = phase.steps.len(), "phase started");

        let mut join_set: JoinSet<Result<StepReport, EngineError>> = JoinSet::new();
        for step in &phase.steps {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(def) = catalog.entity_by_pipeline(step) {
                let inactive = catalog
                    .source_system(&def.source_system)
                    .is_some_and(|s| !s.active);
                if inactive {
                    warn!(pipeline = %step, source = %def.source_system, "source system inactive, step skipped");
                    report.skipped.push(step.clone());
                    continue;
                }
                let store = Arc::clone(&store);
                let graph = Arc::clone(&graph);
                let def = def.clone();
                let batch = batch.clone();
                let phase_name = phase.name.clone();
                let max_hops = catalog.max_hops;
                join_set.spawn_blocking(move || {
                    let counts =
                        run_conformance(store.as_ref(), &graph, &def, batch.as_ref(), max_hops)?;
                    Ok(StepReport {
                        phase: phase_name,
                        pipeline: def.pipeline,
                        counts,
                    })
                });
            } else if let Some(def) = catalog.assembler_by_pipeline(step) {
                let store = Arc::clone(&store);
                let def = def.clone();
                let phase_name = phase.name.clone();
                join_set.spawn_blocking(move || {
                    let counts = run_assembly(store.as_ref(), &def)?;
                    Ok(StepReport {
                        phase: phase_name,
                        pipeline: def.pipeline,
                        counts,
                    })
                });
            } else {
                // Unreachable for a validated catalog.
                return Err(EngineError::Infrastructure(anyhow!(
                    "phase '{}' schedules unknown pipeline '{step}'",
                    phase.name
                )));
            }
        }

        let steps = collect_step_results(join_set).await?;
        report.steps.extend(steps);
        info!(phase = %phase.name, "phase finished");
    }

    if cancel.is_cancelled() {
        return Err(EngineError::Infrastructure(anyhow!(
            "orchestration cancelled"
        )));
    }
    Ok(report)
}

async fn collect_step_results(
    mut join_set: JoinSet<Result<StepReport, EngineError>>,
) -> Result<Vec<StepReport>, EngineError> {
    let mut successes = Vec::new();
    let mut first_error: Option<EngineError> = None;

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(step)) if first_error.is_none() => successes.push(step),
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                error!("step failed: {err}");
                if first_error.is_none() {
                    first_error = Some(err);
                    join_set.abort_all();
                }
            }
            Err(join_err) if join_err.is_cancelled() && first_error.is_some() => {
                // Expected: sibling tasks aborted after the first failure.
            }
            Err(join_err) => {
                return Err(EngineError::Infrastructure(anyhow!(
                    "step task panicked: {join_err}"
                )));
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => {
            successes.sort_by(|a, b| a.pipeline.cmp(&b.pipeline));
            Ok(successes)
        }
    }
}
