//! Content hashing for change detection.
//!
//! The digest covers business-field values only. Audit and lineage
//! fields (timestamps, actor, raw-record reference) change on every
//! run and are excluded so an unchanged record hashes identically
//! across runs.

use keystone_types::record::FieldValue;
use sha2::{Digest, Sha256};

/// Versioned name of the digest function. Changing the algorithm or
/// the pre-image layout invalidates all stored change-detection state,
/// so any change must bump this and force a rebuild.
pub const ALGORITHM: &str = "sha256/1";

/// Field-separator in the digest pre-image.
const SEPARATOR: &str = "|";

/// Compute the content hash over an ordered list of normalized
/// business-field values.
///
/// The pre-image is the pipe-joined canonical rendering of each value;
/// `Null` renders as the empty string, so all-null input still yields
/// a stable digest. Returns lowercase hex.
#[must_use]
pub fn content_hash(values: &[FieldValue]) -> String {
    let preimage = values
        .iter()
        .map(FieldValue::canonical)
        .collect::<Vec<_>>()
        .join(SEPARATOR);
    let digest = Sha256::digest(preimage.as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    #[test]
    fn identical_values_identical_digest() {
        let a = vec![
            FieldValue::Text("Alpha".into()),
            FieldValue::Integer(7),
            FieldValue::Null,
        ];
        let b = a.clone();
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn any_difference_changes_digest() {
        let a = vec![FieldValue::Text("Alpha".into()), FieldValue::Integer(7)];
        let b = vec![FieldValue::Text("Alpha".into()), FieldValue::Integer(8)];
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn all_null_input_is_stable_and_non_null() {
        let nulls = vec![FieldValue::Null, FieldValue::Null, FieldValue::Null];
        let h1 = content_hash(&nulls);
        let h2 = content_hash(&nulls);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn digest_is_fixed_length_hex() {
        let h = content_hash(&[FieldValue::Text("x".into())]);
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn equivalent_decimals_hash_identically() {
        let a = vec![FieldValue::Decimal(BigDecimal::from_str("10.50").unwrap())];
        let b = vec![FieldValue::Decimal(BigDecimal::from_str("10.5").unwrap())];
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn field_order_matters() {
        let a = vec![FieldValue::Text("x".into()), FieldValue::Text("y".into())];
        let b = vec![FieldValue::Text("y".into()), FieldValue::Text("x".into())];
        assert_ne!(content_hash(&a), content_hash(&b));
    }
}
