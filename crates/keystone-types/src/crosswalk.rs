//! Crosswalk rule and path model.
//!
//! A crosswalk rule is a directed edge between two identifier spaces.
//! Paths connect spaces that have no direct edge, discovered by the
//! engine's graph traversal within a hop ceiling.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ids::{IdSpace, RuleId};

/// Cardinality of a crosswalk mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingKind {
    OneToOne,
    OneToMany,
    ManyToOne,
    /// Applies only under a documented condition; multiple conditional
    /// edges may exist between the same pair of spaces.
    Conditional,
}

/// Confidence label assigned when a mapping was validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Declarative key transformation: strip a known prefix, prepend a
/// replacement. The engine's translator refuses inputs that do not
/// carry the expected prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyTransform {
    pub strip_prefix: String,
    pub add_prefix: String,
}

/// A directed translation edge between two identifier spaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrosswalkRule {
    pub rule_id: RuleId,
    pub from_space: IdSpace,
    pub to_space: IdSpace,
    pub kind: MappingKind,
    pub confidence: Confidence,
    /// Key rewrite applied when following this edge, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<KeyTransform>,
    /// Whether the edge may be followed in reverse.
    #[serde(default)]
    pub bidirectional: bool,
    /// Inactive rules are retained for audit but never traversed.
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_on: Option<NaiveDate>,
}

fn default_active() -> bool {
    true
}

/// An ordered sequence of rule edges connecting two spaces with no
/// direct edge. Hop count never exceeds the engine's configured
/// ceiling, and a path never revisits a space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrosswalkPath {
    pub from_space: IdSpace,
    pub to_space: IdSpace,
    /// Rule ids in traversal order.
    pub rules: Vec<RuleId>,
    pub hops: u32,
    /// Lowest confidence of any edge on the path.
    pub reliability: Confidence,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str) -> CrosswalkRule {
        CrosswalkRule {
            rule_id: RuleId::new(id),
            from_space: IdSpace::new("crm.team_id"),
            to_space: IdSpace::new("ent.team"),
            kind: MappingKind::OneToOne,
            confidence: Confidence::High,
            transform: Some(KeyTransform {
                strip_prefix: "CRM-".into(),
                add_prefix: "TEAM-".into(),
            }),
            bidirectional: false,
            active: true,
            validated_by: Some("data-governance".into()),
            validated_on: NaiveDate::from_ymd_opt(2026, 1, 12),
        }
    }

    #[test]
    fn rule_serde_roundtrip() {
        let r = rule("XW-001");
        let json = serde_json::to_string(&r).unwrap();
        let back: CrosswalkRule = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn active_defaults_to_true() {
        let json = r#"{
            "rule_id": "XW-002",
            "from_space": "a",
            "to_space": "b",
            "kind": "many_to_one",
            "confidence": "medium"
        }"#;
        let r: CrosswalkRule = serde_json::from_str(json).unwrap();
        assert!(r.active);
        assert!(!r.bidirectional);
        assert!(r.transform.is_none());
    }

    #[test]
    fn path_model() {
        let path = CrosswalkPath {
            from_space: IdSpace::new("a"),
            to_space: IdSpace::new("c"),
            rules: vec![RuleId::new("XW-1"), RuleId::new("XW-2")],
            hops: 2,
            reliability: Confidence::Medium,
        };
        assert_eq!(path.hops as usize, path.rules.len());
    }
}
