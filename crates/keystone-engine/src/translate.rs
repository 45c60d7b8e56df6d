//! Source-key to canonical-key translation.
//!
//! A translation is a guarded prefix rewrite. The guard matters: an
//! unguarded slice would emit a garbage canonical key for any
//! malformed input and silently corrupt downstream joins. Callers
//! must treat `None` as a validation failure routed to quarantine.

use keystone_types::crosswalk::KeyTransform;

/// Translate a source-native key into a canonical key.
///
/// Returns `None` when `source_key` is absent or does not begin with
/// `strip_prefix`; otherwise replaces the prefix with `add_prefix`.
#[must_use]
pub fn translate(
    source_key: Option<&str>,
    strip_prefix: &str,
    add_prefix: &str,
) -> Option<String> {
    let key = source_key?;
    let rest = key.strip_prefix(strip_prefix)?;
    Some(format!("{add_prefix}{rest}"))
}

/// Apply a declarative [`KeyTransform`] to a source key.
#[must_use]
pub fn apply_transform(source_key: Option<&str>, transform: &KeyTransform) -> Option<String> {
    translate(source_key, &transform.strip_prefix, &transform.add_prefix)
}

/// Apply a chain of transforms in sequence, as resolved by
/// [`transform_route`](crate::crosswalk::CrosswalkGraph::transform_route).
/// Any failing link fails the whole translation.
#[must_use]
pub fn apply_route(source_key: Option<&str>, route: &[KeyTransform]) -> Option<String> {
    let mut key = source_key?.to_string();
    for transform in route {
        key = apply_transform(Some(&key), transform)?;
    }
    Some(key)
}
