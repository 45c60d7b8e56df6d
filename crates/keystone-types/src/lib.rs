//! Shared data model for the Keystone conformance engine.

pub mod assembly;
pub mod crosswalk;
pub mod error;
pub mod ids;
pub mod quarantine;
pub mod record;
pub mod run;
