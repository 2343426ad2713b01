//! Reference orchestration: owned nested records and shared references.
//!
//! Owned children live and die with their parent; shared targets are
//! independently-owned records that only ever get linked and unlinked.
//! Every attachment verifies the target's type against the field's
//! compatibility table before anything is mutated.

use serde_json::{Map, Value};

use crate::compile;
use crate::config::EngineConfig;
use crate::errors::EntityGraphError;
use crate::ident::{type_of_id, validate_id};
use crate::reduce::EntityRecord;
use crate::schema::{EntitySchema, ReferenceDescriptor, SchemaRegistry};
use crate::store::GraphStore;

/// Create one owned child per raw payload through `create_child`, then
/// attach the resulting identities to the parent in a single call.
/// Returns the child ids in creation order.
pub fn create_owned<F>(
    store: &GraphStore,
    config: &EngineConfig,
    schema: &EntitySchema,
    parent_iri: &str,
    field: &str,
    payloads: &[Map<String, Value>],
    now: &str,
    mut create_child: F,
) -> Result<Vec<String>, EntityGraphError>
where
    F: FnMut(&ReferenceDescriptor, &Map<String, Value>) -> Result<String, EntityGraphError>,
{
    let reference = require_reference(schema, field)?;
    if !reference.owned {
        return Err(EntityGraphError::invalid_input(format!(
            "field '{field}' holds shared references, not owned records"
        )));
    }
    if payloads.is_empty() {
        return Ok(Vec::new());
    }
    let mut child_ids = Vec::with_capacity(payloads.len());
    let mut child_iris = Vec::with_capacity(payloads.len());
    for payload in payloads {
        let child_id = create_child(reference, payload)?;
        child_iris.push(crate::ident::entity_iri(&config.iri_base, &child_id));
        child_ids.push(child_id);
    }
    let sql = compile::attach(schema, parent_iri, field, &child_iris, now)?;
    store.execute(&sql)?;
    Ok(child_ids)
}

/// Destroy every owned child referenced by `record`, field by field. A
/// child that is already gone is tolerated; any other failure aborts the
/// sweep.
pub fn destroy_owned<F>(
    record: &EntityRecord,
    schema: &EntitySchema,
    mut destroy_child: F,
) -> Result<(), EntityGraphError>
where
    F: FnMut(&ReferenceDescriptor, &str) -> Result<(), EntityGraphError>,
{
    for reference in schema.references.iter().filter(|r| r.owned) {
        for iri in reference_values(record, reference.field) {
            match destroy_child(reference, &iri) {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
    }
    Ok(())
}

/// Resolve a list of external ids for one shared-reference field and
/// attach them in one batched call. Every id must resolve; a reference
/// to a record that does not exist is a fatal input error.
pub fn attach_shared(
    store: &GraphStore,
    registry: &SchemaRegistry,
    schema: &EntitySchema,
    parent_iri: &str,
    field: &str,
    target_ids: &[String],
    now: &str,
) -> Result<(), EntityGraphError> {
    let reference = require_reference(schema, field)?;
    if reference.owned {
        return Err(EntityGraphError::invalid_input(format!(
            "field '{field}' holds owned records, not shared references"
        )));
    }
    if target_ids.is_empty() {
        return Ok(());
    }
    let mut target_iris = Vec::with_capacity(target_ids.len());
    for id in target_ids {
        target_iris.push(resolve_target_iri(store, registry, reference, id)?);
    }
    let sql = compile::attach(schema, parent_iri, field, &target_iris, now)?;
    store.execute(&sql)?;
    Ok(())
}

/// Verify a reference target and resolve it to its storage identity.
///
/// Checks, in order: well-formed id, type compatibility with the field's
/// declared target types, and existence in the store.
pub fn resolve_target_iri(
    store: &GraphStore,
    registry: &SchemaRegistry,
    reference: &ReferenceDescriptor,
    target_id: &str,
) -> Result<String, EntityGraphError> {
    validate_id(target_id)?;
    let target_type = check_compatibility(reference, target_id)?;
    registry.require(target_type)?;
    let rows = store.select(&compile::resolve_id(target_type, target_id))?;
    match rows.into_iter().next() {
        Some(row) => Ok(row.subject),
        None => Err(EntityGraphError::not_found(target_id)),
    }
}

/// The target's type token must appear in the field's compatibility
/// table; silently accepting a mistyped reference is never an option.
pub fn check_compatibility<'i>(
    reference: &ReferenceDescriptor,
    target_id: &'i str,
) -> Result<&'i str, EntityGraphError> {
    let target_type =
        type_of_id(target_id).ok_or_else(|| EntityGraphError::invalid_id(target_id))?;
    if !reference.target_types.iter().any(|t| *t == target_type) {
        return Err(EntityGraphError::incompatible_reference(format!(
            "field '{}' does not accept '{target_type}' (expects one of: {})",
            reference.field,
            reference.target_types.join(", ")
        )));
    }
    Ok(target_type)
}

/// IRIs currently stored on a reference field of a reduced record.
pub fn reference_values(record: &EntityRecord, field: &str) -> Vec<String> {
    match record.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn require_reference<'s>(
    schema: &'s EntitySchema,
    field: &str,
) -> Result<&'s ReferenceDescriptor, EntityGraphError> {
    schema.reference(field).ok_or_else(|| {
        EntityGraphError::unknown_field(format!("{}.{field}", schema.entity_type))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(targets: &[&'static str]) -> ReferenceDescriptor {
        ReferenceDescriptor {
            field: "resources",
            predicate: "resources",
            target_types: targets.to_vec(),
            owned: false,
        }
    }

    #[test]
    fn compatibility_accepts_declared_types_only() {
        let r = reference(&["resource", "component"]);
        assert_eq!(
            check_compatibility(&r, "resource--0a0a0a0a-0a0a-0a0a-0a0a-0a0a0a0a0a0a").unwrap(),
            "resource"
        );
        let err =
            check_compatibility(&r, "finding--0a0a0a0a-0a0a-0a0a-0a0a-0a0a0a0a0a0a").unwrap_err();
        assert!(matches!(err, EntityGraphError::IncompatibleReference(_)));
    }

    #[test]
    fn destroy_owned_tolerates_missing_children_only() {
        let mut record = EntityRecord::default();
        record.fields.insert("id".into(), "parent--1".into());
        record.fields.insert(
            "remarks".into(),
            serde_json::json!(["urn:entity:remark--1", "urn:entity:remark--2"]),
        );
        let schema = crate::schema::EntitySchema::new("parent")
            .with_reference("remarks", &["remark"], true);

        let mut seen = Vec::new();
        destroy_owned(&record, &schema, |_, iri| {
            seen.push(iri.to_string());
            if iri.ends_with("remark--1") {
                Err(EntityGraphError::not_found(iri))
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert_eq!(seen.len(), 2);

        let err = destroy_owned(&record, &schema, |_, iri| {
            Err(EntityGraphError::query(iri))
        })
        .unwrap_err();
        assert!(matches!(err, EntityGraphError::QueryError(_)));
    }
}
