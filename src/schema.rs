//! Per-entity predicate schemas and the statement-store encoding rules.
//!
//! A schema is plain data: one descriptor per logical field carrying the
//! store predicate, a value kind, and multiplicity. Every field used in
//! selection, filtering, or sorting must have a descriptor; an unknown
//! field is a configuration problem, not bad runtime data.

use rusqlite::Connection;
use serde_json::Value;

use crate::errors::EntityGraphError;
use crate::ident::IdPolicy;

/// Reserved logical fields every record carries.
pub const ID_FIELD: &str = "id";
pub const TYPE_FIELD: &str = "entity_type";
pub const CREATED_FIELD: &str = "created";
pub const MODIFIED_FIELD: &str = "modified";

/// Separator used when the store concatenates multi-valued projections.
/// Stored values never contain it: control characters are escaped by
/// [`encode_value`] before they reach the store.
pub const VALUE_SEPARATOR: char = '\u{1f}';

/// Encoding applied to a field's values on the way into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    /// Record identifier (`{type}--{uuid}`).
    Id,
    /// Storage identity of another record.
    Iri,
    Bool,
    Int,
    /// RFC3339 timestamp.
    Timestamp,
}

#[derive(Debug, Clone)]
pub struct PredicateDescriptor {
    pub field: &'static str,
    pub predicate: &'static str,
    pub kind: ValueKind,
    pub multi: bool,
    /// Closed value set for enumerated fields; empty means unconstrained.
    pub allowed_values: Vec<&'static str>,
}

/// Field-to-type compatibility entry for a reference field.
#[derive(Debug, Clone)]
pub struct ReferenceDescriptor {
    pub field: &'static str,
    pub predicate: &'static str,
    pub target_types: Vec<&'static str>,
    /// Owned children are created and destroyed with the parent; shared
    /// targets are only ever linked and unlinked.
    pub owned: bool,
}

#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub entity_type: &'static str,
    pub id_policy: IdPolicy,
    /// Fields folded into a deterministic identity.
    pub key_fields: Vec<&'static str>,
    pub predicates: Vec<PredicateDescriptor>,
    pub references: Vec<ReferenceDescriptor>,
}

impl EntitySchema {
    pub fn new(entity_type: &'static str) -> Self {
        Self {
            entity_type,
            id_policy: IdPolicy::Random,
            key_fields: Vec::new(),
            predicates: vec![
                PredicateDescriptor {
                    field: ID_FIELD,
                    predicate: ID_FIELD,
                    kind: ValueKind::Id,
                    multi: false,
                    allowed_values: Vec::new(),
                },
                PredicateDescriptor {
                    field: TYPE_FIELD,
                    predicate: TYPE_FIELD,
                    kind: ValueKind::Text,
                    multi: false,
                    allowed_values: Vec::new(),
                },
            ],
            references: Vec::new(),
        }
    }

    pub fn with_deterministic_identity(
        mut self,
        namespace: &'static str,
        key_fields: &[&'static str],
    ) -> Self {
        self.id_policy = IdPolicy::Deterministic { namespace };
        self.key_fields = key_fields.to_vec();
        self
    }

    pub fn with_timestamps(mut self) -> Self {
        for field in [CREATED_FIELD, MODIFIED_FIELD] {
            self.predicates.push(PredicateDescriptor {
                field,
                predicate: field,
                kind: ValueKind::Timestamp,
                multi: false,
                allowed_values: Vec::new(),
            });
        }
        self
    }

    pub fn with_field(self, field: &'static str, kind: ValueKind) -> Self {
        self.push_field(field, kind, false, Vec::new())
    }

    pub fn with_multi_field(self, field: &'static str, kind: ValueKind) -> Self {
        self.push_field(field, kind, true, Vec::new())
    }

    pub fn with_enum_field(self, field: &'static str, allowed: &[&'static str]) -> Self {
        self.push_field(field, ValueKind::Text, false, allowed.to_vec())
    }

    /// Declare a reference field. Also registers the matching predicate
    /// descriptor so the field can be selected and filtered like any
    /// other.
    pub fn with_reference(
        mut self,
        field: &'static str,
        target_types: &[&'static str],
        owned: bool,
    ) -> Self {
        self.references.push(ReferenceDescriptor {
            field,
            predicate: field,
            target_types: target_types.to_vec(),
            owned,
        });
        self.push_field(field, ValueKind::Iri, true, Vec::new())
    }

    fn push_field(
        mut self,
        field: &'static str,
        kind: ValueKind,
        multi: bool,
        allowed_values: Vec<&'static str>,
    ) -> Self {
        self.predicates.push(PredicateDescriptor {
            field,
            predicate: field,
            kind,
            multi,
            allowed_values,
        });
        self
    }

    pub fn descriptor(&self, field: &str) -> Option<&PredicateDescriptor> {
        self.predicates.iter().find(|d| d.field == field)
    }

    pub fn reference(&self, field: &str) -> Option<&ReferenceDescriptor> {
        self.references.iter().find(|r| r.field == field)
    }

    pub fn has_modified(&self) -> bool {
        self.descriptor(MODIFIED_FIELD).is_some()
    }

    /// Every selectable logical field, reserved ones first.
    pub fn field_names(&self) -> Vec<&'static str> {
        self.predicates.iter().map(|d| d.field).collect()
    }

    /// Descriptor lookup that treats absence as the configuration error
    /// it is.
    pub fn require_descriptor(
        &self,
        field: &str,
    ) -> Result<&PredicateDescriptor, EntityGraphError> {
        self.descriptor(field).ok_or_else(|| {
            EntityGraphError::unknown_field(format!("{}.{field}", self.entity_type))
        })
    }
}

/// All schemas known to an engine, keyed by entity type.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: Vec<EntitySchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, schema: EntitySchema) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn get(&self, entity_type: &str) -> Option<&EntitySchema> {
        self.schemas.iter().find(|s| s.entity_type == entity_type)
    }

    pub fn require(&self, entity_type: &str) -> Result<&EntitySchema, EntityGraphError> {
        self.get(entity_type)
            .ok_or_else(|| EntityGraphError::config(format!("no schema for '{entity_type}'")))
    }

    /// Type tokens used by the reducer to infer a discriminator from a
    /// storage identity.
    pub fn type_tokens(&self) -> Vec<&'static str> {
        self.schemas.iter().map(|s| s.entity_type).collect()
    }
}

/// Create the statement table and its indexes.
pub fn ensure_schema(conn: &Connection) -> Result<(), EntityGraphError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS statements (
            subject   TEXT NOT NULL,
            predicate TEXT NOT NULL,
            value     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_statements_subject ON statements(subject);
        CREATE INDEX IF NOT EXISTS idx_statements_pred_value ON statements(predicate, value);
        "#,
    )
    .map_err(|e| EntityGraphError::query(e.to_string()))?;
    Ok(())
}

/// Turn a JSON value into its stored text form for `kind`.
///
/// This is the single escaping boundary: backslashes and control
/// characters are escaped here so stored text is always
/// single-line, separator-free, and safe to inline into query text via
/// [`sql_str`].
pub fn encode_value(kind: ValueKind, value: &Value) -> Result<String, EntityGraphError> {
    let raw = match (kind, value) {
        (ValueKind::Bool, Value::Bool(b)) => b.to_string(),
        (ValueKind::Bool, Value::String(s)) if s == "true" || s == "false" => s.clone(),
        (ValueKind::Int, Value::Number(n)) if n.is_i64() => n.to_string(),
        (ValueKind::Int, Value::String(s)) => s
            .parse::<i64>()
            .map_err(|_| EntityGraphError::invalid_input(format!("not an integer: {s}")))?
            .to_string(),
        (ValueKind::Timestamp, Value::String(s)) => {
            time::OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
                .map_err(|_| {
                    EntityGraphError::invalid_input(format!("not an RFC3339 timestamp: {s}"))
                })?;
            s.clone()
        }
        (ValueKind::Text | ValueKind::Id | ValueKind::Iri, Value::String(s)) => s.clone(),
        _ => {
            return Err(EntityGraphError::invalid_input(format!(
                "value {value} does not fit kind {kind:?}"
            )));
        }
    };
    Ok(escape_text(&raw))
}

/// Reverse of [`encode_value`]: stored text back to a JSON value.
pub fn decode_value(kind: ValueKind, stored: &str) -> Value {
    let raw = unescape_text(stored);
    match kind {
        ValueKind::Bool => match raw.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw),
        },
        ValueKind::Int => raw
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or(Value::String(raw)),
        _ => Value::String(raw),
    }
}

/// Quote stored text as a SQL string literal.
pub fn sql_str(stored: &str) -> String {
    format!("'{}'", stored.replace('\'', "''"))
}

fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\\' {
            out.push_str("\\\\");
        } else if (c as u32) < 0x20 || c == '\u{7f}' {
            out.push_str(&format!("\\x{:02x}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape_text(stored: &str) -> String {
    let mut out = String::with_capacity(stored.len());
    let mut chars = stored.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('x') => {
                let hi = chars.next();
                let lo = chars.next();
                let code = match (hi, lo) {
                    (Some(h), Some(l)) => {
                        u32::from_str_radix(&format!("{h}{l}"), 16).ok()
                    }
                    _ => None,
                };
                match code.and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => out.push_str("\\x"),
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
