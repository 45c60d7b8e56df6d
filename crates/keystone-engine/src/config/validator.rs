//! Semantic validation for parsed catalog documents.

use std::collections::HashSet;

use anyhow::{bail, Result};

use crate::config::types::{AssemblerDef, Catalog, EntityDef};
use crate::crosswalk::CrosswalkGraph;

/// Hop ceilings outside this range are configuration mistakes.
const MAX_HOP_CEILING: u32 = 10;

fn validate_entity(
    catalog: &Catalog,
    graph: &CrosswalkGraph,
    def: &EntityDef,
    errors: &mut Vec<String>,
) {
    let ctx = &def.pipeline;

    if def.pipeline.trim().is_empty() {
        errors.push(format!("entity {}: empty pipeline name", def.entity));
    }
    if def.source_key_field.trim().is_empty() {
        errors.push(format!("{ctx}: empty source_key_field"));
    }
    if def.fields.is_empty() {
        errors.push(format!("{ctx}: entity has no business fields"));
    }

    match catalog.source_system(&def.source_system) {
        None => errors.push(format!(
            "{ctx}: unknown source system '{}'",
            def.source_system
        )),
        Some(_) => {}
    }

    // A rule without its own transform is still usable if the graph
    // resolves a transform-carrying route between its spaces.
    let key_rule = catalog
        .crosswalk_rules
        .iter()
        .find(|r| r.rule_id == def.key_rule);
    match key_rule {
        None => errors.push(format!("{ctx}: unknown key rule '{}'", def.key_rule)),
        Some(_) if graph
            .transform_route(def.key_rule.as_str(), catalog.max_hops)
            .is_none() =>
        {
            errors.push(format!(
                "{ctx}: key rule '{}' has no transform and no route within {} hops",
                def.key_rule, catalog.max_hops
            ));
        }
        Some(_) => {}
    }

    let field_names: HashSet<&str> = def.fields.iter().map(|f| f.name.as_str()).collect();
    if field_names.len() != def.fields.len() {
        errors.push(format!("{ctx}: duplicate field names"));
    }

    for fk in &def.foreign_keys {
        if !field_names.contains(fk.field.as_str()) {
            errors.push(format!(
                "{ctx}: foreign key '{}' is not a declared field",
                fk.field
            ));
        }
        let rule = catalog.crosswalk_rules.iter().find(|r| r.rule_id == fk.rule);
        match rule {
            None => errors.push(format!("{ctx}: unknown foreign-key rule '{}'", fk.rule)),
            Some(_) if graph
                .transform_route(fk.rule.as_str(), catalog.max_hops)
                .is_none() =>
            {
                errors.push(format!(
                    "{ctx}: foreign-key rule '{}' has no transform and no route within {} hops",
                    fk.rule, catalog.max_hops
                ));
            }
            Some(_) => {}
        }
    }

    for rule in &def.rules {
        if let Err(e) = rule.compile() {
            errors.push(format!("{ctx}: {e}"));
        }
    }
}

fn validate_assembler(catalog: &Catalog, def: &AssemblerDef, errors: &mut Vec<String>) {
    let ctx = &def.pipeline;
    let known_entity = |entity: &keystone_types::ids::EntityType| {
        catalog.entities.iter().any(|e| &e.entity == entity)
    };

    if !known_entity(&def.internal_entity) {
        errors.push(format!(
            "{ctx}: internal entity '{}' is not conformed by any pipeline",
            def.internal_entity
        ));
    }
    if !known_entity(&def.external_entity) {
        errors.push(format!(
            "{ctx}: external entity '{}' is not conformed by any pipeline",
            def.external_entity
        ));
    }
    if !known_entity(&def.parent_entity) {
        errors.push(format!(
            "{ctx}: parent entity '{}' is not conformed by any pipeline",
            def.parent_entity
        ));
    }
    if def.allowed_types.is_empty() {
        errors.push(format!("{ctx}: allowed_types must not be empty"));
    }
    if def.enrich_fields.is_empty() {
        errors.push(format!("{ctx}: enrich_fields must not be empty"));
    }
}

/// Validate a parsed catalog.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the catalog.
pub fn validate_catalog(catalog: &Catalog) -> Result<()> {
    let mut errors = Vec::new();

    if catalog.version != "1.0" {
        errors.push(format!(
            "Unsupported catalog version '{}', expected '1.0'",
            catalog.version
        ));
    }

    if catalog.source_systems.is_empty() {
        errors.push("Catalog must register at least one source system".to_string());
    }

    if catalog.max_hops == 0 || catalog.max_hops > MAX_HOP_CEILING {
        errors.push(format!(
            "max_hops {} outside 1..={MAX_HOP_CEILING}",
            catalog.max_hops
        ));
    }

    let mut rule_ids = HashSet::new();
    for rule in &catalog.crosswalk_rules {
        if !rule_ids.insert(rule.rule_id.as_str()) {
            errors.push(format!("Duplicate crosswalk rule id '{}'", rule.rule_id));
        }
    }

    let graph = CrosswalkGraph::new(catalog.crosswalk_rules.clone());
    let mut pipelines = HashSet::new();
    let mut entities = HashSet::new();
    for def in &catalog.entities {
        if !pipelines.insert(def.pipeline.as_str()) {
            errors.push(format!("Duplicate pipeline name '{}'", def.pipeline));
        }
        if !entities.insert(def.entity.as_str()) {
            errors.push(format!("Duplicate entity '{}'", def.entity));
        }
        validate_entity(catalog, &graph, def, &mut errors);
    }
    for def in &catalog.assemblers {
        if !pipelines.insert(def.pipeline.as_str()) {
            errors.push(format!("Duplicate pipeline name '{}'", def.pipeline));
        }
        validate_assembler(catalog, def, &mut errors);
    }

    if catalog.phases.is_empty() {
        errors.push("Catalog must define at least one phase".to_string());
    }
    let mut scheduled = HashSet::new();
    for phase in &catalog.phases {
        if phase.steps.is_empty() {
            errors.push(format!("Phase '{}' has no steps", phase.name));
        }
        for step in &phase.steps {
            if !pipelines.contains(step.as_str()) {
                errors.push(format!(
                    "Phase '{}' references unknown pipeline '{step}'",
                    phase.name
                ));
            }
            if !scheduled.insert(step.as_str()) {
                errors.push(format!("Pipeline '{step}' scheduled more than once"));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Catalog validation failed:\n  - {}", errors.join("\n  - "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::builtin_catalog;

    #[test]
    fn builtin_catalog_is_valid() {
        validate_catalog(&builtin_catalog()).unwrap();
    }

    #[test]
    fn unknown_step_reference_is_reported() {
        let mut catalog = builtin_catalog();
        catalog.phases[0].steps.push("conform_nothing".into());
        let err = validate_catalog(&catalog).unwrap_err();
        assert!(err.to_string().contains("conform_nothing"));
    }

    #[test]
    fn duplicate_pipeline_is_reported() {
        let mut catalog = builtin_catalog();
        let dup = catalog.entities[0].clone();
        catalog.entities.push(dup);
        let err = validate_catalog(&catalog).unwrap_err();
        assert!(err.to_string().contains("Duplicate pipeline name"));
    }

    #[test]
    fn key_rule_without_transform_is_reported() {
        let mut catalog = builtin_catalog();
        let key_rule = catalog.entities[0].key_rule.clone();
        for rule in &mut catalog.crosswalk_rules {
            if rule.rule_id == key_rule {
                rule.transform = None;
            }
        }
        let err = validate_catalog(&catalog).unwrap_err();
        assert!(err.to_string().contains("has no transform"));
    }

    #[test]
    fn transformless_rule_with_a_route_is_accepted() {
        use keystone_types::crosswalk::KeyTransform;

        let mut catalog = builtin_catalog();
        let key_rule = catalog.entities[0].key_rule.clone();
        let (from, to) = {
            let rule = catalog
                .crosswalk_rules
                .iter_mut()
                .find(|r| r.rule_id == key_rule)
                .unwrap();
            rule.transform = None;
            (rule.from_space.clone(), rule.to_space.clone())
        };
        // Two transform-carrying hops through a staging space keep the
        // rule resolvable.
        let mut leg_one = catalog.crosswalk_rules[0].clone();
        leg_one.rule_id = keystone_types::ids::RuleId::new("XW-STAGE-IN");
        leg_one.from_space = from;
        leg_one.to_space = "staging.team".into();
        leg_one.transform = Some(KeyTransform {
            strip_prefix: "T".into(),
            add_prefix: "S-".into(),
        });
        let mut leg_two = leg_one.clone();
        leg_two.rule_id = keystone_types::ids::RuleId::new("XW-STAGE-OUT");
        leg_two.from_space = "staging.team".into();
        leg_two.to_space = to;
        leg_two.transform = Some(KeyTransform {
            strip_prefix: "S-".into(),
            add_prefix: "TEAM-".into(),
        });
        catalog.crosswalk_rules.push(leg_one);
        catalog.crosswalk_rules.push(leg_two);

        validate_catalog(&catalog).unwrap();
    }

    #[test]
    fn hop_ceiling_bounds_checked() {
        let mut catalog = builtin_catalog();
        catalog.max_hops = 0;
        assert!(validate_catalog(&catalog).is_err());
        catalog.max_hops = 99;
        assert!(validate_catalog(&catalog).is_err());
    }

    #[test]
    fn multiple_errors_collected() {
        let mut catalog = builtin_catalog();
        catalog.max_hops = 0;
        catalog.phases[0].steps.push("ghost".into());
        let msg = validate_catalog(&catalog).unwrap_err().to_string();
        assert!(msg.contains("max_hops"));
        assert!(msg.contains("ghost"));
    }
}
