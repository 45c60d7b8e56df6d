//! Storage layer for the Keystone conformance engine.
//!
//! [`ConformStore`] defines the contract; [`SqliteConformStore`] is the
//! bundled implementation. Model types live in `keystone-types`.

pub mod error;
pub mod sqlite;
pub mod store;

pub use error::StateError;
pub use sqlite::SqliteConformStore;
pub use store::{ConformStore, ExistingRow, UpsertOutcome};
