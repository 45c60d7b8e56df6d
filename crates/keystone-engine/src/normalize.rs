//! Field normalization.
//!
//! Raw values are strings; normalization trims, case-folds, and parses
//! them into typed [`FieldValue`]s. Parses are fallible and yield
//! `Null` on failure rather than raising, leaving the decision to the
//! validation stage.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use keystone_types::record::FieldValue;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Case folding applied to text fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseFold {
    #[default]
    None,
    Upper,
    Lower,
}

/// Parse target of a normalized field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseKind {
    #[default]
    Text,
    Integer,
    Decimal,
    /// `YYYY-MM-DD`.
    Date,
    /// RFC 3339.
    Timestamp,
}

/// Normalization spec for one field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Normalizer {
    #[serde(default = "default_trim")]
    pub trim: bool,
    #[serde(default)]
    pub case: CaseFold,
    #[serde(default)]
    pub parse: ParseKind,
}

fn default_trim() -> bool {
    true
}

impl Normalizer {
    /// Normalize one raw value. Absent or whitespace-only input, and
    /// any failed parse, yield `Null`.
    #[must_use]
    pub fn apply(&self, raw: Option<&str>) -> FieldValue {
        let Some(raw) = raw else {
            return FieldValue::Null;
        };
        let text = if self.trim { raw.trim() } else { raw };
        if text.is_empty() {
            return FieldValue::Null;
        }
        let text = match self.case {
            CaseFold::None => text.to_string(),
            CaseFold::Upper => text.to_uppercase(),
            CaseFold::Lower => text.to_lowercase(),
        };
        match self.parse {
            ParseKind::Text => FieldValue::Text(text),
            ParseKind::Integer => text
                .parse::<i64>()
                .map_or(FieldValue::Null, FieldValue::Integer),
            ParseKind::Decimal => BigDecimal::from_str(&text)
                .map_or(FieldValue::Null, FieldValue::Decimal),
            ParseKind::Date => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                .map_or(FieldValue::Null, FieldValue::Date),
            ParseKind::Timestamp => DateTime::parse_from_rfc3339(&text).map_or(
                FieldValue::Null,
                |dt| FieldValue::Timestamp(dt.with_timezone(&Utc)),
            ),
        }
    }
}
