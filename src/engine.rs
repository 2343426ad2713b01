//! The boundary API: CRUD, paging, and reference wiring over one store.
//!
//! Each operation is a sequence of independent round trips to the store;
//! there is no cross-statement transaction, so a failure mid-sequence
//! leaves the earlier steps applied. Callers own retry policy.

use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::bulk;
use crate::compile::{self, EditInstruction};
use crate::config::EngineConfig;
use crate::errors::EntityGraphError;
use crate::ident::{self, IdPolicy, entity_iri, type_of_id, validate_id};
use crate::orchestrate;
use crate::page::{Filter, PageEnvelope, PageRequest, evaluate_page};
use crate::reduce::{EntityRecord, reduce};
use crate::schema::{
    CREATED_FIELD, EntitySchema, ID_FIELD, MODIFIED_FIELD, ReferenceDescriptor, SchemaRegistry,
    TYPE_FIELD,
};
use crate::store::GraphStore;

#[derive(Debug)]
pub struct Engine {
    store: GraphStore,
    registry: SchemaRegistry,
    config: EngineConfig,
}

impl Engine {
    /// Every registered entity type ends up verbatim inside generated
    /// ids, so the token charset is checked here, before any id can be
    /// minted with a type that would fail read-back validation.
    pub fn new(
        store: GraphStore,
        registry: SchemaRegistry,
        config: EngineConfig,
    ) -> Result<Self, EntityGraphError> {
        for token in registry.type_tokens() {
            ident::validate_type_token(token)?;
        }
        Ok(Self {
            store,
            registry,
            config,
        })
    }

    pub fn in_memory(registry: SchemaRegistry) -> Result<Self, EntityGraphError> {
        Self::new(
            GraphStore::open_in_memory()?,
            registry,
            EngineConfig::default(),
        )
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Look up one record by id. `Ok(None)` means not found, never an
    /// error.
    pub fn find_by_id(
        &self,
        entity_type: &str,
        id: &str,
        fields: &[&str],
    ) -> Result<Option<EntityRecord>, EntityGraphError> {
        validate_id(id)?;
        let schema = self.registry.require(entity_type)?;
        let sql = compile::select_by_id(schema, id, fields)?;
        self.reduce_first(schema, &sql)
    }

    /// Look up one record by storage identity.
    pub fn find_by_iri(
        &self,
        entity_type: &str,
        iri: &str,
        fields: &[&str],
    ) -> Result<Option<EntityRecord>, EntityGraphError> {
        let schema = self.registry.require(entity_type)?;
        let sql = compile::select_by_iri(schema, iri, fields)?;
        self.reduce_first(schema, &sql)
    }

    /// List records of one type: structural query, then in-memory
    /// filter/sort/window.
    pub fn find_all(
        &self,
        entity_type: &str,
        fields: &[&str],
        filters: &[Filter],
        page: &PageRequest,
    ) -> Result<PageEnvelope, EntityGraphError> {
        let schema = self.registry.require(entity_type)?;
        let filter_fields: Vec<&str> = filters.iter().map(|f| f.field.as_str()).collect();
        let sql = compile::select_all(schema, fields, &filter_fields, page.sort_by.as_deref())?;
        let tokens = self.registry.type_tokens();
        let records: Vec<EntityRecord> = self
            .store
            .select(&sql)?
            .iter()
            .map(|row| reduce(row, schema, &tokens))
            .collect();
        Ok(evaluate_page(schema, records, filters, page))
    }

    /// Cheap existence probe, one bound select.
    pub fn exists(&self, entity_type: &str, id: &str) -> Result<bool, EntityGraphError> {
        validate_id(id)?;
        let schema = self.registry.require(entity_type)?;
        let iri = entity_iri(&self.config.iri_base, id);
        self.store.probe(&compile::exists(schema, &iri)?)
    }

    /// Create a record, its owned children, and its shared links, then
    /// read the final state back.
    pub fn create(
        &self,
        entity_type: &str,
        values: Map<String, Value>,
        fields: &[&str],
    ) -> Result<EntityRecord, EntityGraphError> {
        let schema = self.registry.require(entity_type)?;

        let mut scalars = Map::new();
        let mut owned: Vec<(&str, Vec<Map<String, Value>>)> = Vec::new();
        let mut shared: Vec<(&str, Vec<String>)> = Vec::new();
        for (field, value) in &values {
            if value.is_null() {
                continue;
            }
            match schema.reference(field) {
                Some(reference) if reference.owned => {
                    owned.push((reference.field, object_payloads(field, value)?));
                }
                Some(reference) => {
                    shared.push((reference.field, id_list(field, value)?));
                }
                None => {
                    scalars.insert(field.clone(), value.clone());
                }
            }
        }

        let id = match &schema.id_policy {
            IdPolicy::Deterministic { namespace } => {
                let id = ident::deterministic_id(
                    schema.entity_type,
                    &scalars,
                    &schema.key_fields,
                    namespace,
                )?;
                if self.exists(entity_type, &id)? {
                    return Err(EntityGraphError::duplicate(id));
                }
                id
            }
            IdPolicy::Random => ident::random_id(schema.entity_type),
        };
        let iri = entity_iri(&self.config.iri_base, &id);
        let now = now()?;

        let sql = compile::insert(schema, &iri, &id, &scalars, &now)?;
        self.store.execute(&sql)?;

        for (field, payloads) in owned {
            orchestrate::create_owned(
                &self.store,
                &self.config,
                schema,
                &iri,
                field,
                &payloads,
                &now,
                |reference, payload| self.create_child(reference, payload),
            )?;
        }
        for (field, target_ids) in shared {
            orchestrate::attach_shared(
                &self.store,
                &self.registry,
                schema,
                &iri,
                field,
                &target_ids,
                &now,
            )?;
        }

        self.find_by_id(entity_type, &id, fields)?
            .ok_or_else(|| EntityGraphError::not_found(id))
    }

    /// Apply an edit list. System fields are never caller-editable;
    /// `modified` is refreshed whenever any edit takes effect.
    pub fn edit(
        &self,
        entity_type: &str,
        id: &str,
        edits: &[EditInstruction],
        fields: &[&str],
    ) -> Result<EntityRecord, EntityGraphError> {
        validate_id(id)?;
        let schema = self.registry.require(entity_type)?;
        for edit in edits {
            if is_system_field(&edit.field) {
                return Err(EntityGraphError::invalid_input(format!(
                    "field '{}' is not editable",
                    edit.field
                )));
            }
        }
        let all_fields = schema.field_names();
        let current = self
            .find_by_id(entity_type, id, &all_fields)?
            .ok_or_else(|| EntityGraphError::not_found(id))?;
        let resolved = self.resolve_reference_edits(schema, edits)?;
        let iri = entity_iri(&self.config.iri_base, id);
        let now = now()?;
        if let Some(sql) = compile::update(schema, &iri, &resolved, &current.fields, Some(&now))? {
            self.store.execute(&sql)?;
        }
        self.find_by_id(entity_type, id, fields)?
            .ok_or_else(|| EntityGraphError::not_found(id))
    }

    /// Delete a record and every owned child, children first. Shared
    /// targets are left untouched; only the links die with the record.
    pub fn delete(&self, entity_type: &str, id: &str) -> Result<String, EntityGraphError> {
        validate_id(id)?;
        let schema = self.registry.require(entity_type)?;
        let all_fields = schema.field_names();
        let record = self
            .find_by_id(entity_type, id, &all_fields)?
            .ok_or_else(|| EntityGraphError::not_found(id))?;
        orchestrate::destroy_owned(&record, schema, |_, child_iri| {
            let child_id = ident::id_from_iri(&self.config.iri_base, child_iri)
                .ok_or_else(|| EntityGraphError::invalid_id(child_iri))?;
            let child_type =
                type_of_id(child_id).ok_or_else(|| EntityGraphError::invalid_id(child_id))?;
            self.delete(child_type, child_id).map(|_| ())
        })?;
        let iri = entity_iri(&self.config.iri_base, id);
        self.store.execute(&compile::delete(&iri)?)?;
        Ok(id.to_string())
    }

    /// Sweep variant: ids that no longer resolve are skipped and simply
    /// absent from the returned list; other failures abort.
    pub fn delete_many(
        &self,
        entity_type: &str,
        ids: &[String],
    ) -> Result<Vec<String>, EntityGraphError> {
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            match self.delete(entity_type, id) {
                Ok(id) => removed.push(id),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(removed)
    }

    /// Link an existing target through a reference field. Idempotent:
    /// attaching an already-attached target succeeds without duplicating
    /// the link.
    pub fn attach(
        &self,
        entity_type: &str,
        id: &str,
        field: &str,
        target_id: &str,
    ) -> Result<bool, EntityGraphError> {
        validate_id(id)?;
        let schema = self.registry.require(entity_type)?;
        let reference = schema.reference(field).ok_or_else(|| {
            EntityGraphError::unknown_field(format!("{entity_type}.{field}"))
        })?;
        let record = self
            .find_by_id(entity_type, id, &[field])?
            .ok_or_else(|| EntityGraphError::not_found(id))?;
        let target_iri =
            orchestrate::resolve_target_iri(&self.store, &self.registry, reference, target_id)?;
        if orchestrate::reference_values(&record, field).contains(&target_iri) {
            return Ok(true);
        }
        let iri = entity_iri(&self.config.iri_base, id);
        let sql = compile::attach(schema, &iri, field, &[target_iri], &now()?)?;
        self.store.execute(&sql)?;
        Ok(true)
    }

    /// Unlink a target. Detaching a reference that was never attached is
    /// a not-found error, not a silent success.
    pub fn detach(
        &self,
        entity_type: &str,
        id: &str,
        field: &str,
        target_id: &str,
    ) -> Result<bool, EntityGraphError> {
        validate_id(id)?;
        let schema = self.registry.require(entity_type)?;
        let reference = schema.reference(field).ok_or_else(|| {
            EntityGraphError::unknown_field(format!("{entity_type}.{field}"))
        })?;
        let record = self
            .find_by_id(entity_type, id, &[field])?
            .ok_or_else(|| EntityGraphError::not_found(id))?;
        let target_iri =
            orchestrate::resolve_target_iri(&self.store, &self.registry, reference, target_id)?;
        if !orchestrate::reference_values(&record, field).contains(&target_iri) {
            return Err(EntityGraphError::not_found(format!(
                "{field} reference {target_id} on {id}"
            )));
        }
        let iri = entity_iri(&self.config.iri_base, id);
        let sql = compile::detach(schema, &iri, field, &[target_iri], &now()?)?;
        self.store.execute(&sql)?;
        Ok(true)
    }

    /// Batched record fetch for large identity lists.
    pub fn fetch_by_iris(
        &self,
        entity_type: &str,
        iris: &[String],
        fields: &[&str],
    ) -> Result<Vec<EntityRecord>, EntityGraphError> {
        let schema = self.registry.require(entity_type)?;
        let tokens = self.registry.type_tokens();
        bulk::fetch_by_iris(&self.store, schema, &self.config, &tokens, iris, fields)
    }

    fn reduce_first(
        &self,
        schema: &EntitySchema,
        sql: &str,
    ) -> Result<Option<EntityRecord>, EntityGraphError> {
        let rows = self.store.select(sql)?;
        let tokens = self.registry.type_tokens();
        Ok(rows.first().map(|row| reduce(row, schema, &tokens)))
    }

    fn create_child(
        &self,
        reference: &ReferenceDescriptor,
        payload: &Map<String, Value>,
    ) -> Result<String, EntityGraphError> {
        let child_type = child_type_of(reference, payload)?;
        let record = self.create(child_type, payload.clone(), &[ID_FIELD])?;
        record
            .id()
            .map(str::to_string)
            .ok_or_else(|| EntityGraphError::query("created child came back without an id"))
    }

    fn resolve_reference_edits(
        &self,
        schema: &EntitySchema,
        edits: &[EditInstruction],
    ) -> Result<Vec<EditInstruction>, EntityGraphError> {
        let mut resolved = Vec::with_capacity(edits.len());
        for edit in edits {
            let Some(reference) = schema.reference(&edit.field) else {
                resolved.push(edit.clone());
                continue;
            };
            let mut iris = Vec::with_capacity(edit.values.len());
            for value in &edit.values {
                let target_id = value.as_str().ok_or_else(|| {
                    EntityGraphError::invalid_input(format!(
                        "reference edit on '{}' expects record ids",
                        edit.field
                    ))
                })?;
                let iri = orchestrate::resolve_target_iri(
                    &self.store,
                    &self.registry,
                    reference,
                    target_id,
                )?;
                iris.push(Value::String(iri));
            }
            resolved.push(EditInstruction {
                field: edit.field.clone(),
                values: iris,
                operation: edit.operation,
            });
        }
        Ok(resolved)
    }
}

/// Child type: explicit `entity_type` in the payload when given (checked
/// against the field's table), otherwise the field's single declared
/// target type.
fn child_type_of<'r>(
    reference: &'r ReferenceDescriptor,
    payload: &Map<String, Value>,
) -> Result<&'r str, EntityGraphError> {
    if let Some(explicit) = payload.get(TYPE_FIELD).and_then(Value::as_str) {
        return reference
            .target_types
            .iter()
            .copied()
            .find(|t| *t == explicit)
            .ok_or_else(|| {
                EntityGraphError::incompatible_reference(format!(
                    "field '{}' does not accept '{explicit}'",
                    reference.field
                ))
            });
    }
    match reference.target_types.as_slice() {
        [single] => Ok(*single),
        _ => Err(EntityGraphError::invalid_input(format!(
            "field '{}' accepts several types; payload must carry entity_type",
            reference.field
        ))),
    }
}

fn object_payloads(
    field: &str,
    value: &Value,
) -> Result<Vec<Map<String, Value>>, EntityGraphError> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    items
        .into_iter()
        .map(|item| {
            item.as_object().cloned().ok_or_else(|| {
                EntityGraphError::invalid_input(format!(
                    "field '{field}' expects nested record payloads"
                ))
            })
        })
        .collect()
}

fn id_list(field: &str, value: &Value) -> Result<Vec<String>, EntityGraphError> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    items
        .into_iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                EntityGraphError::invalid_input(format!("field '{field}' expects record ids"))
            })
        })
        .collect()
}

fn is_system_field(field: &str) -> bool {
    matches!(field, ID_FIELD | TYPE_FIELD | CREATED_FIELD | MODIFIED_FIELD)
}

fn now() -> Result<String, EntityGraphError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| EntityGraphError::config(format!("clock formatting failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn child_type_resolution() {
        let reference = ReferenceDescriptor {
            field: "remarks",
            predicate: "remarks",
            target_types: vec!["remark"],
            owned: true,
        };
        assert_eq!(child_type_of(&reference, &Map::new()).unwrap(), "remark");

        let mut payload = Map::new();
        payload.insert(TYPE_FIELD.into(), json!("finding"));
        assert!(child_type_of(&reference, &payload).is_err());

        let multi = ReferenceDescriptor {
            target_types: vec!["remark", "note"],
            ..reference
        };
        assert!(child_type_of(&multi, &Map::new()).is_err());
        let mut payload = Map::new();
        payload.insert(TYPE_FIELD.into(), json!("note"));
        assert_eq!(child_type_of(&multi, &payload).unwrap(), "note");
    }

    #[test]
    fn nonconforming_entity_type_rejected_at_construction() {
        for bad in ["Control", "time-line", "control item"] {
            let registry = SchemaRegistry::new().register(EntitySchema::new(bad));
            let err = Engine::in_memory(registry).unwrap_err();
            assert!(matches!(err, EntityGraphError::Config(_)), "accepted: {bad}");
        }
    }

    #[test]
    fn payload_shape_validation() {
        assert!(object_payloads("remarks", &json!({"name": "x"})).is_ok());
        assert!(object_payloads("remarks", &json!(["not-an-object"])).is_err());
        assert_eq!(
            id_list("resources", &json!(["a", "b"])).unwrap(),
            vec!["a", "b"]
        );
        assert!(id_list("resources", &json!([{"id": "a"}])).is_err());
    }
}
