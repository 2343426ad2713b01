//! Reducer: raw statement rows into public-shaped records.
//!
//! Output records are sparse: a key is present only when the store
//! returned a value for it. Absent optional fields never appear as null
//! or empty placeholders.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{EntitySchema, TYPE_FIELD};
use crate::store::DataRow;

/// A public entity record: a flat field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EntityRecord {
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.get_str("id")
    }

    pub fn entity_type(&self) -> Option<&str> {
        self.get_str(TYPE_FIELD)
    }
}

/// Normalize one raw row into a record.
///
/// Only fields with a descriptor are copied; multi-valued fields become
/// arrays, single-valued fields scalars. When the row carries no type
/// discriminator one is inferred from the storage identity by substring
/// match against `type_tokens`.
pub fn reduce(row: &DataRow, schema: &EntitySchema, type_tokens: &[&str]) -> EntityRecord {
    let mut fields = Map::new();
    for descriptor in &schema.predicates {
        let Some(stored) = row.fields.get(descriptor.field) else {
            continue;
        };
        let value = if descriptor.multi {
            Value::Array(
                stored
                    .iter()
                    .map(|v| crate::schema::decode_value(descriptor.kind, v))
                    .collect(),
            )
        } else {
            match stored.first() {
                Some(first) => crate::schema::decode_value(descriptor.kind, first),
                None => continue,
            }
        };
        fields.insert(descriptor.field.to_string(), value);
    }
    if !fields.contains_key(TYPE_FIELD) {
        if let Some(inferred) = infer_entity_type(&row.subject, type_tokens) {
            fields.insert(TYPE_FIELD.to_string(), Value::String(inferred.to_string()));
        }
    }
    EntityRecord { fields }
}

/// Longest type token appearing inside the identity string wins; ties on
/// length would be ambiguous, so prefer the more specific match.
pub fn infer_entity_type<'t>(subject: &str, type_tokens: &[&'t str]) -> Option<&'t str> {
    type_tokens
        .iter()
        .filter(|token| !token.is_empty() && subject.contains(*token))
        .max_by_key(|token| token.len())
        .copied()
}
