//! Catalog document types.
//!
//! The catalog is the read-only governance data the engine consumes:
//! which source systems are active, how each entity is conformed, the
//! crosswalk rule table, and the orchestration phase layout. Loaded
//! from YAML (see [`parser`](crate::config::parser)) or built in code
//! ([`builtin_catalog`](crate::config::builtin_catalog)).

use keystone_types::crosswalk::CrosswalkRule;
use keystone_types::ids::{EntityType, RuleId, SourceSystemId};
use keystone_types::run::OperationKind;
use serde::{Deserialize, Serialize};

use crate::normalize::Normalizer;
use crate::rules::RuleSpec;

/// One row of the source-system registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSystem {
    pub id: SourceSystemId,
    pub name: String,
    /// Inactive systems are skipped by the orchestrator.
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Normalization spec for one business field, in hash order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(flatten)]
    pub normalizer: Normalizer,
}

/// A source-native foreign-key reference requiring canonicalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    /// Normalized field carrying the source-native reference.
    pub field: String,
    /// Crosswalk rule whose transform canonicalizes the reference.
    pub rule: RuleId,
    /// Optional references translate to null instead of quarantining
    /// on failure.
    #[serde(default)]
    pub optional: bool,
}

/// Conformance definition for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    pub entity: EntityType,
    /// Logical pipeline name, also the conforming actor recorded on
    /// output rows (e.g. `"conform_team"`).
    pub pipeline: String,
    pub source_system: SourceSystemId,
    /// Raw-stream discriminator when the source multiplexes kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,
    #[serde(default = "default_operation")]
    pub operation: OperationKind,
    /// Raw field holding the source-native key.
    pub source_key_field: String,
    /// Crosswalk rule whose transform derives the enterprise key.
    pub key_rule: RuleId,
    /// Raw field carrying the source-side modification timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_modified_field: Option<String>,
    /// Business fields in content-hash order.
    pub fields: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeySpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleSpec>,
}

fn default_operation() -> OperationKind {
    OperationKind::Merge
}

/// Definition of the composite security assembly step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblerDef {
    /// Logical pipeline name (e.g. `"assemble_security"`).
    pub pipeline: String,
    /// Entity type produced by assembly.
    pub entity: EntityType,
    /// Internally sourced master entity.
    pub internal_entity: EntityType,
    /// Externally sourced reference entity.
    pub external_entity: EntityType,
    /// Parent entity every internal record must resolve to.
    pub parent_entity: EntityType,
    /// Field on the internal record carrying the parent reference.
    pub parent_key_field: String,
    /// Field carrying the instrument-type classification.
    pub type_field: String,
    /// Recognized classifications; unrecognized types quarantine
    /// before the match cascade runs.
    pub allowed_types: Vec<String>,
    /// Cascade level 1: highest-precedence identifier.
    pub loan_field: String,
    /// Cascade level 2: national identifier, guarded for ambiguity.
    pub cusip_field: String,
    /// Cascade level 3: international identifier.
    pub isin_field: String,
    /// Cascade level 4: matched together with the type field.
    pub ticker_field: String,
    /// Identifier fields copied from the external side where the
    /// internal side left them blank.
    pub enrich_fields: Vec<String>,
}

/// One orchestration phase: mutually independent steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    /// Pipeline names, resolved against entity and assembler defs.
    pub steps: Vec<String>,
}

/// The full catalog document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub version: String,
    pub source_systems: Vec<SourceSystem>,
    #[serde(default)]
    pub crosswalk_rules: Vec<CrosswalkRule>,
    /// Hop ceiling for crosswalk path discovery.
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,
    pub entities: Vec<EntityDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assemblers: Vec<AssemblerDef>,
    pub phases: Vec<Phase>,
}

fn default_max_hops() -> u32 {
    crate::crosswalk::DEFAULT_MAX_HOPS
}

fn default_true() -> bool {
    true
}

impl Catalog {
    /// Look up an entity definition by pipeline name.
    #[must_use]
    pub fn entity_by_pipeline(&self, pipeline: &str) -> Option<&EntityDef> {
        self.entities.iter().find(|e| e.pipeline == pipeline)
    }

    /// Look up an assembler definition by pipeline name.
    #[must_use]
    pub fn assembler_by_pipeline(&self, pipeline: &str) -> Option<&AssemblerDef> {
        self.assemblers.iter().find(|a| a.pipeline == pipeline)
    }

    /// Look up a source-system registry row.
    #[must_use]
    pub fn source_system(&self, id: &SourceSystemId) -> Option<&SourceSystem> {
        self.source_systems.iter().find(|s| &s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_def_defaults() {
        let yaml = r"
entity: team
pipeline: conform_team
source_system: crm
source_key_field: team_id
key_rule: XW-CRM-TEAM
fields:
  - name: name
";
        let def: EntityDef = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.operation, OperationKind::Merge);
        assert!(def.foreign_keys.is_empty());
        assert!(def.rules.is_empty());
        assert!(def.fields[0].normalizer.trim);
    }

    #[test]
    fn source_system_active_by_default() {
        let yaml = "id: crm\nname: Client Relationship Management\n";
        let sys: SourceSystem = serde_yaml::from_str(yaml).unwrap();
        assert!(sys.active);
    }

    #[test]
    fn catalog_lookups() {
        let catalog = crate::config::builtin_catalog();
        assert!(catalog.entity_by_pipeline("conform_team").is_some());
        assert!(catalog.assembler_by_pipeline("assemble_security").is_some());
        assert!(catalog
            .source_system(&SourceSystemId::new("crm"))
            .is_some());
        assert!(catalog.entity_by_pipeline("nope").is_none());
    }
}
