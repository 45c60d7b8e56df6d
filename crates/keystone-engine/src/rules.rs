//! Data-quality rules.
//!
//! Rules are declared as data in the catalog ([`RuleSpec`]), compiled
//! once into [`ValidationRule`]s, and evaluated per record. Every rule
//! is a tagged variant with typed parameters; there are no
//! string-expression predicates. Evaluation reports every failed rule
//! for a record, so one record can produce several quarantine entries.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use bigdecimal::{BigDecimal, FromPrimitive};
use keystone_types::ids::{EnterpriseKey, EntityType, RuleId};
use keystone_types::record::FieldValue;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Declarative rule as written in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub rule_id: RuleId,
    #[serde(flatten)]
    pub check: CheckSpec,
}

/// Tagged predicate variants recognized by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum CheckSpec {
    /// Field must not be null after normalization.
    NotNull { field: String },
    /// Field must be non-null, non-empty text.
    NotEmpty { field: String },
    /// Non-null text must match the pattern (full-match not required).
    MatchesPattern { field: String, pattern: String },
    /// Non-null numeric value must fall within the closed bounds.
    InRange {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<serde_json::Number>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<serde_json::Number>,
    },
    /// Non-null text must be an enterprise key already conformed for
    /// `entity`. Null passes; requiredness is `NotNull`'s job.
    RefExists { field: String, entity: EntityType },
    /// Non-null text must be one of the allowed values.
    OneOf { field: String, allowed: Vec<String> },
}

/// A compiled, evaluable rule.
#[derive(Debug, Clone)]
pub struct ValidationRule {
    pub rule_id: RuleId,
    pub check: CompiledCheck,
}

/// Compiled predicate.
#[derive(Debug, Clone)]
pub enum CompiledCheck {
    NotNull { field: String },
    NotEmpty { field: String },
    MatchesPattern { field: String, regex: Regex },
    InRange {
        field: String,
        min: Option<BigDecimal>,
        max: Option<BigDecimal>,
    },
    RefExists { field: String, entity: EntityType },
    OneOf { field: String, allowed: Vec<String> },
}

/// One failed rule for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    pub rule_id: RuleId,
    pub detail: String,
}

/// Referential-existence context: already-conformed keys per entity.
pub type RefContext = HashMap<EntityType, HashSet<EnterpriseKey>>;

impl RuleSpec {
    /// Compile into an executable rule, validating patterns and bounds.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found (invalid
    /// regex, unparsable bound, bounds both absent).
    pub fn compile(&self) -> Result<ValidationRule, String> {
        let check = match &self.check {
            CheckSpec::NotNull { field } => CompiledCheck::NotNull {
                field: field.clone(),
            },
            CheckSpec::NotEmpty { field } => CompiledCheck::NotEmpty {
                field: field.clone(),
            },
            CheckSpec::MatchesPattern { field, pattern } => {
                let regex = Regex::new(pattern).map_err(|e| {
                    format!("rule {}: invalid pattern for '{field}': {e}", self.rule_id)
                })?;
                CompiledCheck::MatchesPattern {
                    field: field.clone(),
                    regex,
                }
            }
            CheckSpec::InRange { field, min, max } => {
                if min.is_none() && max.is_none() {
                    return Err(format!(
                        "rule {}: range for '{field}' needs min or max",
                        self.rule_id
                    ));
                }
                CompiledCheck::InRange {
                    field: field.clone(),
                    min: min.as_ref().map(number_to_decimal).transpose().map_err(
                        |e| format!("rule {}: invalid min for '{field}': {e}", self.rule_id),
                    )?,
                    max: max.as_ref().map(number_to_decimal).transpose().map_err(
                        |e| format!("rule {}: invalid max for '{field}': {e}", self.rule_id),
                    )?,
                }
            }
            CheckSpec::RefExists { field, entity } => CompiledCheck::RefExists {
                field: field.clone(),
                entity: entity.clone(),
            },
            CheckSpec::OneOf { field, allowed } => CompiledCheck::OneOf {
                field: field.clone(),
                allowed: allowed.clone(),
            },
        };
        Ok(ValidationRule {
            rule_id: self.rule_id.clone(),
            check,
        })
    }
}

fn number_to_decimal(n: &serde_json::Number) -> Result<BigDecimal, String> {
    if let Some(i) = n.as_i64() {
        return BigDecimal::from_i64(i).ok_or_else(|| "out of range".to_string());
    }
    BigDecimal::from_str(&n.to_string()).map_err(|e| e.to_string())
}

impl ValidationRule {
    /// Evaluate this rule against one record's normalized fields.
    /// Returns the failure if the rule does not hold.
    #[must_use]
    pub fn evaluate(
        &self,
        fields: &BTreeMap<String, FieldValue>,
        refs: &RefContext,
    ) -> Option<RuleFailure> {
        let fail = |detail: String| {
            Some(RuleFailure {
                rule_id: self.rule_id.clone(),
                detail,
            })
        };
        let value = |field: &str| fields.get(field).unwrap_or(&FieldValue::Null);

        match &self.check {
            CompiledCheck::NotNull { field } => {
                if value(field).is_null() {
                    return fail(format!("field '{field}' is null"));
                }
            }
            CompiledCheck::NotEmpty { field } => match value(field) {
                FieldValue::Null => return fail(format!("field '{field}' is empty")),
                FieldValue::Text(s) if s.trim().is_empty() => {
                    return fail(format!("field '{field}' is empty"));
                }
                _ => {}
            },
            CompiledCheck::MatchesPattern { field, regex } => {
                if let Some(text) = value(field).as_text() {
                    if !regex.is_match(text) {
                        return fail(format!(
                            "field '{field}' value '{text}' does not match /{}/",
                            regex.as_str()
                        ));
                    }
                }
            }
            CompiledCheck::InRange { field, min, max } => {
                let decimal = match value(field) {
                    FieldValue::Integer(i) => BigDecimal::from(*i),
                    FieldValue::Decimal(d) => d.clone(),
                    _ => return None,
                };
                if let Some(min) = min {
                    if decimal < *min {
                        return fail(format!("field '{field}' value {decimal} below {min}"));
                    }
                }
                if let Some(max) = max {
                    if decimal > *max {
                        return fail(format!("field '{field}' value {decimal} above {max}"));
                    }
                }
            }
            CompiledCheck::RefExists { field, entity } => {
                if let Some(text) = value(field).as_text() {
                    let known = refs
                        .get(entity)
                        .is_some_and(|keys| keys.contains(&EnterpriseKey::new(text)));
                    if !known {
                        return fail(format!(
                            "field '{field}' references unknown {entity} '{text}'"
                        ));
                    }
                }
            }
            CompiledCheck::OneOf { field, allowed } => {
                if let Some(text) = value(field).as_text() {
                    if !allowed.iter().any(|a| a == text) {
                        return fail(format!(
                            "field '{field}' value '{text}' not in {allowed:?}"
                        ));
                    }
                }
            }
        }
        None
    }
}

/// Evaluate an ordered rule list, collecting every failure.
#[must_use]
pub fn evaluate_all(
    rules: &[ValidationRule],
    fields: &BTreeMap<String, FieldValue>,
    refs: &RefContext,
) -> Vec<RuleFailure> {
    rules
        .iter()
        .filter_map(|rule| rule.evaluate(fields, refs))
        .collect()
}
