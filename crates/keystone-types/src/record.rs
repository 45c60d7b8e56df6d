//! Raw and conformed record types.
//!
//! [`RawRecord`] is the untyped, source-native representation as landed
//! by the ingestion boundary: every field is a string. [`ConformedRecord`]
//! is the validated, enterprise-keyed output of the conformance pipeline.

use std::collections::BTreeMap;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BatchId, EnterpriseKey, EntityType, SourceKey, SourceSystemId};

/// One typed business-field value on a conformed record.
///
/// `Null` is a first-class value: a fallible parse that does not
/// succeed yields `Null` rather than an error, and validation rules
/// decide whether that is acceptable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Decimal(BigDecimal),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Null,
}

impl FieldValue {
    /// Canonical string rendering used for content hashing.
    ///
    /// `Null` renders as the empty string so that all-null input still
    /// produces a stable digest pre-image.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Decimal(d) => d.normalized().to_string(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::Timestamp(ts) => ts.to_rfc3339(),
            Self::Null => String::new(),
        }
    }

    /// Returns `true` for `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the text content, if this is a non-null text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// An untyped record as landed from a source system.
///
/// Immutable once landed; the conformance pipeline only reads these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Surrogate id assigned at landing time.
    pub raw_id: i64,
    /// Ingestion batch this record arrived in.
    pub batch_id: BatchId,
    /// System that produced the record.
    pub source_system: SourceSystemId,
    /// Originating file or feed reference.
    pub source_ref: String,
    /// Discriminator when one raw stream multiplexes entity kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,
    /// When the record was landed.
    pub ingested_at: DateTime<Utc>,
    /// Source-native field values, all strings.
    pub fields: BTreeMap<String, String>,
}

impl RawRecord {
    /// Borrow a raw field value by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// A validated, enterprise-keyed record produced by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConformedRecord {
    /// Entity type this record belongs to.
    pub entity: EntityType,
    /// Canonical, source-agnostic key. Unique within an entity type.
    pub enterprise_key: EnterpriseKey,
    /// Source-native key, kept for lineage.
    pub source_key: SourceKey,
    /// Owning source system.
    pub source_system: SourceSystemId,
    /// Back-reference to the originating raw record.
    pub raw_id: i64,
    /// Source-side modification timestamp, when the source provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_modified_at: Option<DateTime<Utc>>,
    /// Typed business attributes.
    pub fields: BTreeMap<String, FieldValue>,
    /// Digest over the normalized business fields.
    pub content_hash: String,
    /// When conformance produced this version of the record.
    pub conformed_at: DateTime<Utc>,
    /// Conforming actor (pipeline name).
    pub conformed_by: String,
}

impl ConformedRecord {
    /// Borrow a typed field value by name, treating absence as `Null`.
    #[must_use]
    pub fn field(&self, name: &str) -> &FieldValue {
        self.fields.get(name).unwrap_or(&FieldValue::Null)
    }
}
