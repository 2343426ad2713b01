//! Identifier generation and validation.
//!
//! Two policies: content-derived deterministic identifiers (duplicate
//! detection on create) and random identifiers. Which one an entity type
//! uses is declared on its schema, never decided at runtime.

use std::collections::BTreeMap;

use rand::RngCore;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::errors::EntityGraphError;

/// Identity policy declared per entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdPolicy {
    /// Identifier derived from the canonicalized key-field subset of the
    /// create payload, scoped by `namespace`. Identical material yields
    /// an identical id.
    Deterministic { namespace: &'static str },
    /// Fresh identifier per create, no duplicate detection.
    Random,
}

/// Produce a random identifier for `entity_type`.
pub fn random_id(entity_type: &str) -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{entity_type}--{}", format_uuid(bytes))
}

/// Produce a deterministic identifier from the `key_fields` subset of
/// `materials`, scoped by `namespace`.
///
/// Failing on an empty namespace rather than falling back to a random id
/// is deliberate: a silent fallback would disable duplicate detection.
pub fn deterministic_id(
    entity_type: &str,
    materials: &Map<String, Value>,
    key_fields: &[&str],
    namespace: &str,
) -> Result<String, EntityGraphError> {
    if namespace.trim().is_empty() {
        return Err(EntityGraphError::config(format!(
            "deterministic identity for '{entity_type}' requires a namespace"
        )));
    }
    let mut canonical: BTreeMap<&str, &Value> = BTreeMap::new();
    for key in key_fields {
        if let Some(value) = materials.get(*key) {
            canonical.insert(key, value);
        }
    }
    if canonical.is_empty() {
        return Err(EntityGraphError::invalid_input(format!(
            "deterministic identity for '{entity_type}' requires at least one of: {}",
            key_fields.join(", ")
        )));
    }
    let json = serde_json::to_string(&canonical)
        .map_err(|e| EntityGraphError::invalid_input(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update([0u8]);
    hasher.update(json.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Ok(format!("{entity_type}--{}", format_uuid(bytes)))
}

/// Storage identity (IRI) for a record id.
pub fn entity_iri(iri_base: &str, id: &str) -> String {
    format!("{iri_base}:{id}")
}

/// Recover the record id from a storage identity, if it belongs to
/// `iri_base`.
pub fn id_from_iri<'a>(iri_base: &str, iri: &'a str) -> Option<&'a str> {
    iri.strip_prefix(iri_base)?.strip_prefix(':')
}

/// Entity-type tokens are embedded verbatim in every generated id, so a
/// schema whose type falls outside this charset would mint ids that
/// [`validate_id`] rejects on read-back. Checked once at engine
/// construction, before any id is generated.
pub fn validate_type_token(token: &str) -> Result<(), EntityGraphError> {
    if token.is_empty()
        || !token
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(EntityGraphError::config(format!(
            "entity type '{token}' must match [a-z0-9_]+"
        )));
    }
    Ok(())
}

/// Reject malformed identifiers before any store access.
///
/// Expected shape: `{type-token}--{8-4-4-4-12 hex}`, with the type token
/// held to the same charset [`validate_type_token`] enforces.
pub fn validate_id(id: &str) -> Result<(), EntityGraphError> {
    let Some(split) = id.find("--") else {
        return Err(EntityGraphError::invalid_id(id));
    };
    let (entity_type, rest) = id.split_at(split);
    let uuid = &rest[2..];
    if validate_type_token(entity_type).is_err() {
        return Err(EntityGraphError::invalid_id(id));
    }
    if !is_uuid_shaped(uuid) {
        return Err(EntityGraphError::invalid_id(id));
    }
    Ok(())
}

/// The leading type token of a well-formed id.
pub fn type_of_id(id: &str) -> Option<&str> {
    id.find("--").map(|at| &id[..at])
}

fn is_uuid_shaped(s: &str) -> bool {
    let groups: Vec<&str> = s.split('-').collect();
    if groups.len() != 5 {
        return false;
    }
    let widths = [8usize, 4, 4, 4, 12];
    groups
        .iter()
        .zip(widths)
        .all(|(g, w)| g.len() == w && g.chars().all(|c| c.is_ascii_hexdigit()))
}

fn format_uuid(bytes: [u8; 16]) -> String {
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn materials(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), json!(v)))
            .collect()
    }

    #[test]
    fn deterministic_is_stable() {
        let m = materials(&[("name", "Alpha"), ("status", "open")]);
        let a = deterministic_id("control", &m, &["name"], "test-ns").unwrap();
        let b = deterministic_id("control", &m, &["name"], "test-ns").unwrap();
        assert_eq!(a, b);
        validate_id(&a).unwrap();
    }

    #[test]
    fn deterministic_varies_by_namespace_and_material() {
        let m = materials(&[("name", "Alpha")]);
        let a = deterministic_id("control", &m, &["name"], "ns-a").unwrap();
        let b = deterministic_id("control", &m, &["name"], "ns-b").unwrap();
        assert_ne!(a, b);
        let m2 = materials(&[("name", "Beta")]);
        let c = deterministic_id("control", &m2, &["name"], "ns-a").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn deterministic_ignores_non_key_fields() {
        let a = deterministic_id(
            "control",
            &materials(&[("name", "Alpha"), ("status", "open")]),
            &["name"],
            "ns",
        )
        .unwrap();
        let b = deterministic_id(
            "control",
            &materials(&[("name", "Alpha"), ("status", "closed")]),
            &["name"],
            "ns",
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn deterministic_requires_namespace() {
        let m = materials(&[("name", "Alpha")]);
        let err = deterministic_id("control", &m, &["name"], "").unwrap_err();
        assert!(matches!(err, EntityGraphError::Config(_)));
    }

    #[test]
    fn deterministic_requires_key_material() {
        let m = materials(&[("status", "open")]);
        let err = deterministic_id("control", &m, &["name"], "ns").unwrap_err();
        assert!(matches!(err, EntityGraphError::InvalidInput(_)));
    }

    #[test]
    fn random_ids_differ() {
        let a = random_id("control");
        let b = random_id("control");
        assert_ne!(a, b);
        validate_id(&a).unwrap();
        assert_eq!(type_of_id(&a), Some("control"));
    }

    #[test]
    fn iri_round_trip() {
        let id = random_id("control");
        let iri = entity_iri("urn:entity", &id);
        assert_eq!(id_from_iri("urn:entity", &iri), Some(id.as_str()));
        assert_eq!(id_from_iri("urn:other", &iri), None);
    }

    #[test]
    fn type_tokens_hold_to_the_id_charset() {
        validate_type_token("control_item2").unwrap();
        for bad in ["", "Control", "time-line", "with space"] {
            let err = validate_type_token(bad).unwrap_err();
            assert!(matches!(err, EntityGraphError::Config(_)), "accepted: {bad}");
        }
    }

    #[test]
    fn malformed_ids_rejected() {
        for bad in [
            "",
            "control",
            "control--",
            "control--not-a-uuid",
            "Control--0a0a0a0a-0a0a-0a0a-0a0a-0a0a0a0a0a0a",
            "--0a0a0a0a-0a0a-0a0a-0a0a-0a0a0a0a0a0a",
        ] {
            assert!(validate_id(bad).is_err(), "accepted: {bad}");
        }
    }
}
