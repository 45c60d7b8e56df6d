//! Metadata catalog: source-system registry, entity definitions,
//! crosswalk rules, and orchestration phases.

pub mod builtin;
pub mod parser;
pub mod types;
pub mod validator;

pub use builtin::builtin_catalog;
pub use types::{AssemblerDef, Catalog, EntityDef, FieldSpec, ForeignKeySpec, Phase, SourceSystem};
