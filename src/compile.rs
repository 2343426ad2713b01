//! Query compiler: predicate schemas in, SQL text out.
//!
//! Every query the engine runs is compiled here as a string, with values
//! inlined through the encoding boundary in [`crate::schema`]. Selects
//! follow one shape: a structural anchor over subjects carrying the
//! schema's entity type, bound `EXISTS` constraints, and one projection
//! subselect per requested field. Projections never eliminate a row; a
//! field with no statements simply yields NULL.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::EntityGraphError;
use crate::schema::{
    CREATED_FIELD, EntitySchema, ID_FIELD, MODIFIED_FIELD, PredicateDescriptor, TYPE_FIELD,
    encode_value, sql_str,
};

/// One caller-supplied edit against a single field.
#[derive(Debug, Clone)]
pub struct EditInstruction {
    pub field: String,
    pub values: Vec<Value>,
    pub operation: EditOperation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOperation {
    Add,
    Replace,
    Remove,
}

/// Compile a clause for one descriptor.
///
/// Bound (`Some` value) yields an equality constraint; unbound (`None`)
/// yields the projection subselect. The same descriptor serves both
/// roles, which is what lets filter fields double as selected fields.
pub fn bind(
    descriptor: &PredicateDescriptor,
    value: Option<&Value>,
) -> Result<String, EntityGraphError> {
    match value {
        Some(v) => {
            let encoded = encode_value(descriptor.kind, v)?;
            Ok(format!(
                "EXISTS (SELECT 1 FROM statements w WHERE w.subject = s.subject \
                 AND w.predicate = {} AND w.value = {})",
                sql_str(descriptor.predicate),
                sql_str(&encoded)
            ))
        }
        None => Ok(format!(
            "(SELECT group_concat(value, char(31) ORDER BY rowid) FROM statements v \
             WHERE v.subject = s.subject AND v.predicate = {}) AS \"{}\"",
            sql_str(descriptor.predicate),
            descriptor.field
        )),
    }
}

/// Select one record by its id field.
pub fn select_by_id(
    schema: &EntitySchema,
    id: &str,
    fields: &[&str],
) -> Result<String, EntityGraphError> {
    let id_descriptor = schema.require_descriptor(ID_FIELD)?;
    let constraint = bind(id_descriptor, Some(&Value::String(id.to_string())))?;
    select(schema, fields, &[], None, Some(constraint))
}

/// Select one record by its storage identity.
pub fn select_by_iri(
    schema: &EntitySchema,
    iri: &str,
    fields: &[&str],
) -> Result<String, EntityGraphError> {
    let constraint = format!("s.subject = {}", iri_literal(iri)?);
    select(schema, fields, &[], None, Some(constraint))
}

/// Select a batch of records by storage identity.
pub fn select_by_iris(
    schema: &EntitySchema,
    iris: &[String],
    fields: &[&str],
) -> Result<String, EntityGraphError> {
    let mut literals = Vec::with_capacity(iris.len());
    for iri in iris {
        literals.push(iri_literal(iri)?);
    }
    let constraint = format!("s.subject IN ({})", literals.join(", "));
    select(schema, fields, &[], None, Some(constraint))
}

/// Structural select over every record of the schema's type. Fields
/// referenced by filters or the sort key are materialized even when the
/// caller did not ask for them.
pub fn select_all(
    schema: &EntitySchema,
    fields: &[&str],
    extra_fields: &[&str],
    sort_field: Option<&str>,
) -> Result<String, EntityGraphError> {
    select(schema, fields, extra_fields, sort_field, None)
}

/// Cheap existence probe for a storage identity of the schema's type.
pub fn exists(schema: &EntitySchema, iri: &str) -> Result<String, EntityGraphError> {
    Ok(format!(
        "SELECT 1 FROM statements WHERE subject = {} AND predicate = {} AND value = {} LIMIT 1;",
        iri_literal(iri)?,
        sql_str(TYPE_FIELD),
        sql_str(schema.entity_type)
    ))
}

/// Resolve a record id to its storage identity within one entity type.
pub fn resolve_id(entity_type: &str, id: &str) -> String {
    format!(
        "SELECT s.subject AS subject FROM (SELECT DISTINCT subject FROM statements \
         WHERE predicate = {} AND value = {}) s \
         WHERE EXISTS (SELECT 1 FROM statements w WHERE w.subject = s.subject \
         AND w.predicate = {} AND w.value = {});",
        sql_str(TYPE_FIELD),
        sql_str(entity_type),
        sql_str(ID_FIELD),
        sql_str(id)
    )
}

/// Insert a new record. Caller resolves identity; `created`/`modified`
/// are stamped with `now` when the schema declares them. Supplied fields
/// without a descriptor are dropped (absent optional attributes are not
/// an error).
pub fn insert(
    schema: &EntitySchema,
    iri: &str,
    id: &str,
    values: &Map<String, Value>,
    now: &str,
) -> Result<String, EntityGraphError> {
    let subject = iri_literal(iri)?;
    let mut rows = vec![
        statement_row(&subject, ID_FIELD, &sql_str(id)),
        statement_row(&subject, TYPE_FIELD, &sql_str(schema.entity_type)),
    ];
    if schema.has_modified() {
        let ts = sql_str(now);
        rows.push(statement_row(&subject, CREATED_FIELD, &ts));
        rows.push(statement_row(&subject, MODIFIED_FIELD, &ts));
    }
    for (field, value) in values {
        if is_system_field(field) || value.is_null() {
            continue;
        }
        let Some(descriptor) = schema.descriptor(field) else {
            debug!(entity_type = schema.entity_type, %field, "dropping unknown field on insert");
            continue;
        };
        for item in value_items(value) {
            check_allowed(descriptor, item)?;
            let encoded = encode_value(descriptor.kind, item)?;
            rows.push(statement_row(&subject, descriptor.predicate, &sql_str(&encoded)));
        }
    }
    let text = format!(
        "INSERT INTO statements(subject, predicate, value) VALUES\n{};",
        rows.join(",\n")
    );
    debug!(entity_type = schema.entity_type, iri, "compiled insert");
    Ok(text)
}

/// Remove every statement whose subject is the target identity.
pub fn delete(iri: &str) -> Result<String, EntityGraphError> {
    Ok(format!(
        "DELETE FROM statements WHERE subject = {};",
        iri_literal(iri)?
    ))
}

/// Compile an edit list into delete/insert statement pairs.
///
/// Edits whose outcome matches the record's current state are dropped;
/// when nothing remains the whole update is a no-op and `None` is
/// returned. Otherwise, when `now` is given and the schema declares
/// `modified`, a fresh timestamp replace is appended.
pub fn update(
    schema: &EntitySchema,
    iri: &str,
    edits: &[EditInstruction],
    current: &Map<String, Value>,
    now: Option<&str>,
) -> Result<Option<String>, EntityGraphError> {
    let subject = iri_literal(iri)?;
    let mut statements = Vec::new();
    let mut effective = 0usize;
    for edit in edits {
        let descriptor = schema.require_descriptor(&edit.field)?;
        let encoded = encode_edit_values(descriptor, &edit.values)?;
        if edit_is_noop(descriptor, &edit.operation, &encoded, current)? {
            continue;
        }
        effective += 1;
        compile_edit(&mut statements, &subject, descriptor, edit.operation, &encoded);
    }
    if effective == 0 {
        return Ok(None);
    }
    if let Some(now) = now {
        if schema.has_modified() {
            let descriptor = schema.require_descriptor(MODIFIED_FIELD)?;
            let stamp = encode_value(descriptor.kind, &Value::String(now.to_string()))?;
            compile_edit(
                &mut statements,
                &subject,
                descriptor,
                EditOperation::Replace,
                &[stamp],
            );
        }
    }
    Ok(Some(statements.join("\n")))
}

/// Link `target_iris` through a reference field. When the schema carries
/// `modified`, the script also refreshes the timestamp under a guard
/// requiring the subject to already exist with the schema's type. The
/// timestamp update doubles as an existence check in the same round
/// trip.
pub fn attach(
    schema: &EntitySchema,
    iri: &str,
    field: &str,
    target_iris: &[String],
    now: &str,
) -> Result<String, EntityGraphError> {
    let reference = schema.reference(field).ok_or_else(|| {
        EntityGraphError::unknown_field(format!("{}.{field}", schema.entity_type))
    })?;
    let subject = iri_literal(iri)?;
    let guard = type_guard(&subject, schema.entity_type);
    let mut statements = Vec::new();
    for target in target_iris {
        statements.push(format!(
            "INSERT INTO statements(subject, predicate, value) \
             SELECT {subject}, {}, {} WHERE {guard};",
            sql_str(reference.predicate),
            iri_literal(target)?,
        ));
    }
    push_modified_refresh(&mut statements, schema, &subject, &guard, now);
    Ok(statements.join("\n"))
}

/// Unlink `target_iris` from a reference field. Same guarded timestamp
/// refresh as [`attach`].
pub fn detach(
    schema: &EntitySchema,
    iri: &str,
    field: &str,
    target_iris: &[String],
    now: &str,
) -> Result<String, EntityGraphError> {
    let reference = schema.reference(field).ok_or_else(|| {
        EntityGraphError::unknown_field(format!("{}.{field}", schema.entity_type))
    })?;
    let subject = iri_literal(iri)?;
    let guard = type_guard(&subject, schema.entity_type);
    let mut literals = Vec::with_capacity(target_iris.len());
    for target in target_iris {
        literals.push(iri_literal(target)?);
    }
    let mut statements = vec![format!(
        "DELETE FROM statements WHERE subject = {subject} AND predicate = {} \
         AND value IN ({});",
        sql_str(reference.predicate),
        literals.join(", ")
    )];
    push_modified_refresh(&mut statements, schema, &subject, &guard, now);
    Ok(statements.join("\n"))
}

fn select(
    schema: &EntitySchema,
    fields: &[&str],
    extra_fields: &[&str],
    sort_field: Option<&str>,
    constraint: Option<String>,
) -> Result<String, EntityGraphError> {
    let mut projections = vec!["s.subject AS subject".to_string()];
    for descriptor in effective_fields(schema, fields, extra_fields, sort_field) {
        projections.push(bind(descriptor, None)?);
    }
    let mut text = format!(
        "SELECT {}\nFROM (SELECT DISTINCT subject FROM statements \
         WHERE predicate = {} AND value = {}) s",
        projections.join(",\n       "),
        sql_str(TYPE_FIELD),
        sql_str(schema.entity_type)
    );
    if let Some(constraint) = constraint {
        text.push_str("\nWHERE ");
        text.push_str(&constraint);
    }
    text.push(';');
    debug!(entity_type = schema.entity_type, "compiled select");
    Ok(text)
}

/// The field list a select actually materializes: identity fields always,
/// then the caller's fields, then filter/sort fields, deduplicated.
/// Unknown fields are skipped with a warning, not fatal for reads.
fn effective_fields<'s>(
    schema: &'s EntitySchema,
    fields: &[&str],
    extra_fields: &[&str],
    sort_field: Option<&str>,
) -> Vec<&'s PredicateDescriptor> {
    let mut selected: Vec<&PredicateDescriptor> = Vec::new();
    let mut push = |field: &str| {
        match schema.descriptor(field) {
            Some(descriptor) => {
                if !selected.iter().any(|d| d.field == descriptor.field) {
                    selected.push(descriptor);
                }
            }
            None => {
                warn!(entity_type = schema.entity_type, field, "skipping unknown field");
            }
        }
    };
    push(ID_FIELD);
    push(TYPE_FIELD);
    for field in fields {
        push(field);
    }
    for field in extra_fields {
        push(field);
    }
    if let Some(field) = sort_field {
        push(field);
    }
    selected
}

fn compile_edit(
    statements: &mut Vec<String>,
    subject: &str,
    descriptor: &PredicateDescriptor,
    operation: EditOperation,
    encoded: &[String],
) {
    let predicate = sql_str(descriptor.predicate);
    match operation {
        EditOperation::Remove => {
            if encoded.is_empty() {
                statements.push(format!(
                    "DELETE FROM statements WHERE subject = {subject} AND predicate = {predicate};"
                ));
            } else {
                statements.push(format!(
                    "DELETE FROM statements WHERE subject = {subject} AND predicate = {predicate} \
                     AND value IN ({});",
                    encoded.iter().map(|v| sql_str(v)).collect::<Vec<_>>().join(", ")
                ));
            }
        }
        EditOperation::Replace => {
            // Unbound delete anchors the replace to whatever value is
            // currently stored, then the new values go in.
            statements.push(format!(
                "DELETE FROM statements WHERE subject = {subject} AND predicate = {predicate};"
            ));
            for value in encoded {
                statements.push(format!(
                    "INSERT INTO statements(subject, predicate, value) VALUES({subject}, {predicate}, {});",
                    sql_str(value)
                ));
            }
        }
        EditOperation::Add => {
            for value in encoded {
                statements.push(format!(
                    "INSERT INTO statements(subject, predicate, value) VALUES({subject}, {predicate}, {});",
                    sql_str(value)
                ));
            }
        }
    }
}

fn encode_edit_values(
    descriptor: &PredicateDescriptor,
    values: &[Value],
) -> Result<Vec<String>, EntityGraphError> {
    let mut encoded = Vec::with_capacity(values.len());
    for value in values {
        check_allowed(descriptor, value)?;
        encoded.push(encode_value(descriptor.kind, value)?);
    }
    Ok(encoded)
}

/// Enumerated fields only accept their declared value set.
fn check_allowed(
    descriptor: &PredicateDescriptor,
    value: &Value,
) -> Result<(), EntityGraphError> {
    if descriptor.allowed_values.is_empty() {
        return Ok(());
    }
    let Value::String(s) = value else {
        return Err(EntityGraphError::invalid_input(format!(
            "field '{}' accepts only {:?}",
            descriptor.field, descriptor.allowed_values
        )));
    };
    if !descriptor.allowed_values.contains(&s.as_str()) {
        return Err(EntityGraphError::invalid_input(format!(
            "'{s}' is not a valid value for field '{}'",
            descriptor.field
        )));
    }
    Ok(())
}

/// An edit whose outcome equals the stored state compiles to nothing.
fn edit_is_noop(
    descriptor: &PredicateDescriptor,
    operation: &EditOperation,
    encoded: &[String],
    current: &Map<String, Value>,
) -> Result<bool, EntityGraphError> {
    let stored: Vec<String> = match current.get(descriptor.field) {
        None => Vec::new(),
        Some(value) => value_items(value)
            .into_iter()
            .map(|v| encode_value(descriptor.kind, v))
            .collect::<Result<_, _>>()?,
    };
    Ok(match operation {
        EditOperation::Add => encoded.iter().all(|v| stored.contains(v)),
        EditOperation::Replace => {
            encoded.len() == stored.len() && encoded.iter().all(|v| stored.contains(v))
        }
        EditOperation::Remove => {
            if encoded.is_empty() {
                stored.is_empty()
            } else {
                !encoded.iter().any(|v| stored.contains(v))
            }
        }
    })
}

fn push_modified_refresh(
    statements: &mut Vec<String>,
    schema: &EntitySchema,
    subject: &str,
    guard: &str,
    now: &str,
) {
    if !schema.has_modified() {
        return;
    }
    let predicate = sql_str(MODIFIED_FIELD);
    statements.push(format!(
        "DELETE FROM statements WHERE subject = {subject} AND predicate = {predicate} AND {guard};"
    ));
    statements.push(format!(
        "INSERT INTO statements(subject, predicate, value) \
         SELECT {subject}, {predicate}, {} WHERE {guard};",
        sql_str(now)
    ));
}

fn type_guard(subject: &str, entity_type: &str) -> String {
    format!(
        "EXISTS (SELECT 1 FROM statements g WHERE g.subject = {subject} \
         AND g.predicate = {} AND g.value = {})",
        sql_str(TYPE_FIELD),
        sql_str(entity_type)
    )
}

fn statement_row(subject: &str, predicate: &str, value_literal: &str) -> String {
    format!("({subject}, {}, {value_literal})", sql_str(predicate))
}

fn value_items(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn is_system_field(field: &str) -> bool {
    matches!(field, ID_FIELD | TYPE_FIELD | CREATED_FIELD | MODIFIED_FIELD)
}

fn iri_literal(iri: &str) -> Result<String, EntityGraphError> {
    if iri.trim().is_empty() || iri.chars().any(|c| (c as u32) < 0x20) {
        return Err(EntityGraphError::invalid_id(iri));
    }
    Ok(sql_str(iri))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntitySchema, ValueKind};
    use serde_json::json;

    fn schema() -> EntitySchema {
        EntitySchema::new("control")
            .with_timestamps()
            .with_field("name", ValueKind::Text)
            .with_multi_field("labels", ValueKind::Text)
            .with_reference("resources", &["resource"], false)
    }

    #[test]
    fn select_always_carries_identity_fields() {
        let sql = select_by_id(&schema(), "control--x", &["name"]).unwrap();
        assert!(sql.contains("AS \"id\""));
        assert!(sql.contains("AS \"entity_type\""));
        assert!(sql.contains("AS \"name\""));
    }

    #[test]
    fn select_all_materializes_filter_and_sort_fields() {
        let sql = select_all(&schema(), &[], &["labels"], Some("name")).unwrap();
        assert!(sql.contains("AS \"labels\""));
        assert!(sql.contains("AS \"name\""));
    }

    #[test]
    fn unknown_fields_skipped_on_select() {
        let sql = select_all(&schema(), &["name", "bogus"], &[], None).unwrap();
        assert!(!sql.contains("bogus"));
    }

    #[test]
    fn insert_drops_unknown_fields() {
        let mut values = Map::new();
        values.insert("name".into(), json!("Alpha"));
        values.insert("bogus".into(), json!("dropped"));
        let sql = insert(&schema(), "urn:entity:control--x", "control--x", &values, "2026-01-01T00:00:00Z")
            .unwrap();
        assert!(sql.contains("'Alpha'"));
        assert!(!sql.contains("dropped"));
        assert!(sql.contains("'created'"));
    }

    #[test]
    fn update_drops_noop_edits() {
        let mut current = Map::new();
        current.insert("name".into(), json!("Alpha"));
        let edits = vec![EditInstruction {
            field: "name".into(),
            values: vec![json!("Alpha")],
            operation: EditOperation::Replace,
        }];
        let compiled = update(&schema(), "urn:entity:control--x", &edits, &current, Some("2026-01-01T00:00:00Z"))
            .unwrap();
        assert!(compiled.is_none());
    }

    #[test]
    fn update_unknown_field_is_fatal() {
        let edits = vec![EditInstruction {
            field: "bogus".into(),
            values: vec![json!("x")],
            operation: EditOperation::Replace,
        }];
        let err = update(&schema(), "urn:entity:control--x", &edits, &Map::new(), None).unwrap_err();
        assert!(matches!(err, EntityGraphError::UnknownField(_)));
    }

    #[test]
    fn attach_guards_on_entity_type() {
        let sql = attach(
            &schema(),
            "urn:entity:control--x",
            "resources",
            &["urn:entity:resource--y".to_string()],
            "2026-01-01T00:00:00Z",
        )
        .unwrap();
        assert!(sql.contains("WHERE EXISTS"));
        assert!(sql.contains("'modified'"));
    }

    #[test]
    fn bound_and_unbound_bind_forms() {
        let s = schema();
        let descriptor = s.descriptor("name").unwrap();
        let bound = bind(descriptor, Some(&json!("Alpha"))).unwrap();
        assert!(bound.starts_with("EXISTS"));
        let unbound = bind(descriptor, None).unwrap();
        assert!(unbound.contains("group_concat"));
    }
}
