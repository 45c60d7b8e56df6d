//! Built-in catalog for the six-source investment platform.
//!
//! Serves as the documented example catalog and as the fixture for
//! integration tests. Deployments load their own YAML via
//! [`parser`](crate::config::parser); the shapes are identical.

use keystone_types::crosswalk::{Confidence, CrosswalkRule, KeyTransform, MappingKind};
use keystone_types::ids::{EntityType, RuleId, SourceSystemId};
use keystone_types::run::OperationKind;

use crate::config::types::{
    AssemblerDef, Catalog, EntityDef, FieldSpec, ForeignKeySpec, Phase, SourceSystem,
};
use crate::crosswalk::DEFAULT_MAX_HOPS;
use crate::normalize::{CaseFold, Normalizer, ParseKind};
use crate::rules::{CheckSpec, RuleSpec};

fn xw(id: &str, from: &str, to: &str, strip: &str, add: &str) -> CrosswalkRule {
    CrosswalkRule {
        rule_id: RuleId::new(id),
        from_space: from.into(),
        to_space: to.into(),
        kind: MappingKind::OneToOne,
        confidence: Confidence::High,
        transform: Some(KeyTransform {
            strip_prefix: strip.into(),
            add_prefix: add.into(),
        }),
        bidirectional: false,
        active: true,
        validated_by: Some("data-governance".into()),
        validated_on: None,
    }
}

fn field(name: &str) -> FieldSpec {
    FieldSpec {
        name: name.into(),
        normalizer: Normalizer::default(),
    }
}

fn upper(name: &str) -> FieldSpec {
    FieldSpec {
        name: name.into(),
        normalizer: Normalizer {
            case: CaseFold::Upper,
            ..Normalizer::default()
        },
    }
}

fn parsed(name: &str, parse: ParseKind) -> FieldSpec {
    FieldSpec {
        name: name.into(),
        normalizer: Normalizer {
            parse,
            ..Normalizer::default()
        },
    }
}

fn not_empty(rule_id: &str, field: &str) -> RuleSpec {
    RuleSpec {
        rule_id: RuleId::new(rule_id),
        check: CheckSpec::NotEmpty {
            field: field.into(),
        },
    }
}

fn ref_exists(rule_id: &str, field: &str, entity: &str) -> RuleSpec {
    RuleSpec {
        rule_id: RuleId::new(rule_id),
        check: CheckSpec::RefExists {
            field: field.into(),
            entity: EntityType::new(entity),
        },
    }
}

/// The six-source investment-platform catalog.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn builtin_catalog() -> Catalog {
    let source_systems = vec![
        SourceSystem {
            id: SourceSystemId::new("crm"),
            name: "Client Relationship Management".into(),
            active: true,
        },
        SourceSystem {
            id: SourceSystemId::new("portfolio"),
            name: "Portfolio Accounting".into(),
            active: true,
        },
        SourceSystem {
            id: SourceSystemId::new("trading"),
            name: "Trade Capture".into(),
            active: true,
        },
        SourceSystem {
            id: SourceSystemId::new("secmaster"),
            name: "Internal Security Master".into(),
            active: true,
        },
        SourceSystem {
            id: SourceSystemId::new("refdata"),
            name: "External Security Reference".into(),
            active: true,
        },
        SourceSystem {
            id: SourceSystemId::new("loanserv"),
            name: "Loan Servicing".into(),
            active: true,
        },
    ];

    // Each source's native keys carry a short letter prefix (crm
    // teams are T1, T2, ...); stripping it is the translation guard:
    // a key without the expected prefix fails to translate and is
    // quarantined instead of minting a garbage enterprise key.
    let crosswalk_rules = vec![
        xw("XW-CRM-TEAM", "crm.team_id", "ent.team", "T", "TEAM-"),
        xw("XW-CRM-ADVISOR", "crm.advisor_id", "ent.advisor", "A", "ADV-"),
        xw("XW-PORT-ACCOUNT", "portfolio.account_no", "ent.account", "AC", "ACCT-"),
        xw("XW-SEC-ISSUER", "secmaster.issuer_id", "ent.issuer", "I", "ISSR-"),
        xw("XW-SEC-MASTER", "secmaster.security_id", "ent.security", "S", "SEC-"),
        xw("XW-REF-SECURITY", "refdata.ref_id", "ent.security_reference", "R", "REF-"),
        xw("XW-LOAN", "loanserv.loan_no", "ent.loan", "L", "LOAN-"),
        xw("XW-TRADE", "trading.trade_id", "ent.transaction", "TR", "TXN-"),
    ];

    let entities = vec![
        EntityDef {
            entity: EntityType::new("team"),
            pipeline: "conform_team".into(),
            source_system: SourceSystemId::new("crm"),
            discriminator: Some("team".into()),
            operation: OperationKind::Merge,
            source_key_field: "team_id".into(),
            key_rule: RuleId::new("XW-CRM-TEAM"),
            source_modified_field: Some("modified_at".into()),
            fields: vec![field("name"), upper("region")],
            foreign_keys: vec![],
            rules: vec![not_empty("NAME_NOT_EMPTY", "name")],
        },
        EntityDef {
            entity: EntityType::new("advisor"),
            pipeline: "conform_advisor".into(),
            source_system: SourceSystemId::new("crm"),
            discriminator: Some("advisor".into()),
            operation: OperationKind::Merge,
            source_key_field: "advisor_id".into(),
            key_rule: RuleId::new("XW-CRM-ADVISOR"),
            source_modified_field: Some("modified_at".into()),
            fields: vec![
                field("name"),
                FieldSpec {
                    name: "email".into(),
                    normalizer: Normalizer {
                        case: CaseFold::Lower,
                        ..Normalizer::default()
                    },
                },
                field("team_key"),
            ],
            foreign_keys: vec![ForeignKeySpec {
                field: "team_key".into(),
                rule: RuleId::new("XW-CRM-TEAM"),
                optional: false,
            }],
            rules: vec![
                not_empty("ADVISOR_NAME_NOT_EMPTY", "name"),
                ref_exists("ADVISOR_TEAM_EXISTS", "team_key", "team"),
            ],
        },
        EntityDef {
            entity: EntityType::new("issuer"),
            pipeline: "conform_issuer".into(),
            source_system: SourceSystemId::new("secmaster"),
            discriminator: Some("issuer".into()),
            operation: OperationKind::Merge,
            source_key_field: "issuer_id".into(),
            key_rule: RuleId::new("XW-SEC-ISSUER"),
            source_modified_field: None,
            fields: vec![field("legal_name"), upper("country")],
            foreign_keys: vec![],
            rules: vec![not_empty("ISSUER_NAME_NOT_EMPTY", "legal_name")],
        },
        EntityDef {
            entity: EntityType::new("security_master"),
            pipeline: "conform_security_master".into(),
            source_system: SourceSystemId::new("secmaster"),
            discriminator: Some("security".into()),
            operation: OperationKind::Merge,
            source_key_field: "security_id".into(),
            key_rule: RuleId::new("XW-SEC-MASTER"),
            source_modified_field: Some("modified_at".into()),
            fields: vec![
                field("description"),
                upper("instrument_type"),
                field("issuer_key"),
                upper("loan_id"),
                upper("cusip"),
                upper("isin"),
                upper("ticker"),
            ],
            foreign_keys: vec![ForeignKeySpec {
                field: "issuer_key".into(),
                rule: RuleId::new("XW-SEC-ISSUER"),
                optional: false,
            }],
            rules: vec![
                not_empty("DESCRIPTION_NOT_EMPTY", "description"),
                ref_exists("SECURITY_ISSUER_EXISTS", "issuer_key", "issuer"),
            ],
        },
        EntityDef {
            entity: EntityType::new("security_reference"),
            pipeline: "conform_security_reference".into(),
            source_system: SourceSystemId::new("refdata"),
            discriminator: None,
            // The vendor file is a full snapshot; replace wholesale.
            operation: OperationKind::Rebuild,
            source_key_field: "ref_id".into(),
            key_rule: RuleId::new("XW-REF-SECURITY"),
            source_modified_field: None,
            fields: vec![
                upper("cusip"),
                upper("isin"),
                upper("ticker"),
                upper("loan_id"),
                upper("instrument_type"),
                upper("sedol"),
            ],
            foreign_keys: vec![],
            rules: vec![RuleSpec {
                rule_id: RuleId::new("CUSIP_SHAPE"),
                check: CheckSpec::MatchesPattern {
                    field: "cusip".into(),
                    pattern: "^[0-9A-Z]{9}$".into(),
                },
            }],
        },
        EntityDef {
            entity: EntityType::new("account"),
            pipeline: "conform_account".into(),
            source_system: SourceSystemId::new("portfolio"),
            discriminator: None,
            operation: OperationKind::Merge,
            source_key_field: "account_no".into(),
            key_rule: RuleId::new("XW-PORT-ACCOUNT"),
            source_modified_field: Some("modified_at".into()),
            fields: vec![
                field("account_name"),
                field("team_key"),
                field("advisor_key"),
                parsed("open_date", ParseKind::Date),
            ],
            foreign_keys: vec![
                ForeignKeySpec {
                    field: "team_key".into(),
                    rule: RuleId::new("XW-CRM-TEAM"),
                    optional: false,
                },
                ForeignKeySpec {
                    field: "advisor_key".into(),
                    rule: RuleId::new("XW-CRM-ADVISOR"),
                    optional: true,
                },
            ],
            rules: vec![
                not_empty("ACCOUNT_NAME_NOT_EMPTY", "account_name"),
                ref_exists("ACCOUNT_TEAM_EXISTS", "team_key", "team"),
            ],
        },
        EntityDef {
            entity: EntityType::new("loan"),
            pipeline: "conform_loan".into(),
            source_system: SourceSystemId::new("loanserv"),
            discriminator: None,
            operation: OperationKind::Merge,
            source_key_field: "loan_no".into(),
            key_rule: RuleId::new("XW-LOAN"),
            source_modified_field: None,
            fields: vec![
                field("borrower"),
                parsed("principal", ParseKind::Decimal),
                parsed("origination_date", ParseKind::Date),
            ],
            foreign_keys: vec![],
            rules: vec![RuleSpec {
                rule_id: RuleId::new("PRINCIPAL_NOT_NEGATIVE"),
                check: CheckSpec::InRange {
                    field: "principal".into(),
                    min: Some(serde_json::Number::from(0)),
                    max: None,
                },
            }],
        },
        EntityDef {
            entity: EntityType::new("transaction"),
            pipeline: "conform_transaction".into(),
            source_system: SourceSystemId::new("trading"),
            discriminator: None,
            operation: OperationKind::Merge,
            source_key_field: "trade_id".into(),
            key_rule: RuleId::new("XW-TRADE"),
            source_modified_field: None,
            fields: vec![
                field("account_key"),
                field("security_key"),
                parsed("trade_date", ParseKind::Date),
                parsed("quantity", ParseKind::Decimal),
                parsed("price", ParseKind::Decimal),
            ],
            foreign_keys: vec![
                ForeignKeySpec {
                    field: "account_key".into(),
                    rule: RuleId::new("XW-PORT-ACCOUNT"),
                    optional: false,
                },
                ForeignKeySpec {
                    field: "security_key".into(),
                    rule: RuleId::new("XW-SEC-MASTER"),
                    optional: false,
                },
            ],
            rules: vec![
                ref_exists("TRADE_ACCOUNT_EXISTS", "account_key", "account"),
                ref_exists("TRADE_SECURITY_EXISTS", "security_key", "security"),
                RuleSpec {
                    rule_id: RuleId::new("TRADE_DATE_NOT_NULL"),
                    check: CheckSpec::NotNull {
                        field: "trade_date".into(),
                    },
                },
            ],
        },
    ];

    let assemblers = vec![AssemblerDef {
        pipeline: "assemble_security".into(),
        entity: EntityType::new("security"),
        internal_entity: EntityType::new("security_master"),
        external_entity: EntityType::new("security_reference"),
        parent_entity: EntityType::new("issuer"),
        parent_key_field: "issuer_key".into(),
        type_field: "instrument_type".into(),
        allowed_types: vec![
            "EQUITY".into(),
            "BOND".into(),
            "LOAN".into(),
            "FUND".into(),
        ],
        loan_field: "loan_id".into(),
        cusip_field: "cusip".into(),
        isin_field: "isin".into(),
        ticker_field: "ticker".into(),
        enrich_fields: vec![
            "loan_id".into(),
            "cusip".into(),
            "isin".into(),
            "ticker".into(),
            "sedol".into(),
        ],
    }];

    let phases = vec![
        Phase {
            name: "reference".into(),
            steps: vec![
                "conform_team".into(),
                "conform_issuer".into(),
                "conform_security_reference".into(),
                "conform_loan".into(),
            ],
        },
        Phase {
            name: "master".into(),
            steps: vec!["conform_advisor".into(), "conform_security_master".into()],
        },
        Phase {
            name: "assembly".into(),
            steps: vec!["conform_account".into(), "assemble_security".into()],
        },
        Phase {
            name: "activity".into(),
            steps: vec!["conform_transaction".into()],
        },
    ];

    Catalog {
        version: "1.0".into(),
        source_systems,
        crosswalk_rules,
        max_hops: DEFAULT_MAX_HOPS,
        entities,
        assemblers,
        phases,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_source_systems_registered() {
        let catalog = builtin_catalog();
        assert_eq!(catalog.source_systems.len(), 6);
    }

    #[test]
    fn every_scheduled_step_resolves() {
        let catalog = builtin_catalog();
        for phase in &catalog.phases {
            for step in &phase.steps {
                assert!(
                    catalog.entity_by_pipeline(step).is_some()
                        || catalog.assembler_by_pipeline(step).is_some(),
                    "unresolvable step {step}"
                );
            }
        }
    }

    #[test]
    fn key_transforms_guard_source_prefixes() {
        let catalog = builtin_catalog();
        let team = catalog
            .crosswalk_rules
            .iter()
            .find(|r| r.rule_id.as_str() == "XW-CRM-TEAM")
            .unwrap();
        let transform = team.transform.as_ref().unwrap();
        assert_eq!(
            crate::translate::apply_transform(Some("T1"), transform).as_deref(),
            Some("TEAM-1")
        );
        // A key without the crm prefix must refuse to translate.
        assert_eq!(crate::translate::apply_transform(Some("X1"), transform), None);
    }

    #[test]
    fn yaml_roundtrip() {
        let catalog = builtin_catalog();
        let yaml = serde_yaml::to_string(&catalog).unwrap();
        let back: Catalog = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(catalog, back);
    }
}
