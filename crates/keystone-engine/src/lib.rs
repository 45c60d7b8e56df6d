//! Conformance-and-resolution engine for the Keystone platform.
//!
//! Raw source records flow through the entity conformance pipeline
//! (stage, normalize, key-translate, hash, validate, upsert) or the
//! composite assembler, with quarantine and run-ledger bracketing.
//! The orchestrator executes the per-source-system steps in dependency
//! order.

pub mod assembler;
pub mod config;
pub mod crosswalk;
pub mod errors;
pub mod hash;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod rules;
pub mod translate;

pub use assembler::run_assembly;
pub use errors::EngineError;
pub use orchestrator::{run_all, CancelFlag, OrchestratorReport};
pub use pipeline::run_conformance;
