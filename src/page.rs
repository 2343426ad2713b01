//! In-memory pagination and value filtering.
//!
//! The store's structural constraints produce the full candidate set;
//! this module applies field-level filters, sorts, and cuts one forward
//! page without a second count query. Page-existence flags are the
//! documented heuristic: `has_next_page` means the page filled and rows
//! remained unexamined, which can overreport when the tail fails the
//! filters.

use std::cmp::Ordering;

use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

use crate::reduce::EntityRecord;
use crate::schema::{EntitySchema, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Compares as equality; kept distinct so callers can express
    /// match-anything candidate lists explicitly.
    Wildcard,
}

/// How a filter combines with the other filters in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    And,
    Or,
}

/// A field-level value filter. An empty candidate list matches nothing;
/// an empty filter list at the call site matches everything.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub values: Vec<Value>,
    pub op: CmpOp,
    pub mode: FilterMode,
}

#[derive(Debug, Clone)]
pub struct PageRequest {
    /// Maximum edges returned (`first`).
    pub first: usize,
    pub offset: usize,
    pub sort_by: Option<String>,
    pub ascending: bool,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            first: 25,
            offset: 0,
            sort_by: None,
            ascending: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub cursor: String,
    pub node: EntityRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageInfo {
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub global_count: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageEnvelope {
    pub edges: Vec<Edge>,
    pub page_info: PageInfo,
}

/// Window, sort, and filter an already-reduced result set.
pub fn evaluate_page(
    schema: &EntitySchema,
    records: Vec<EntityRecord>,
    filters: &[Filter],
    page: &PageRequest,
) -> PageEnvelope {
    let mut rows: Vec<EntityRecord> = Vec::with_capacity(records.len());
    for record in records {
        if record.id().is_none() {
            warn!(
                entity_type = schema.entity_type,
                "dropping row without identity"
            );
            continue;
        }
        rows.push(record);
    }
    let global_count = rows.len();

    if let Some(sort_by) = page.sort_by.as_deref() {
        let kind = schema.descriptor(sort_by).map(|d| d.kind);
        rows.sort_by(|a, b| {
            let ord = compare_records(a, b, sort_by, kind);
            if page.ascending { ord } else { ord.reverse() }
        });
    }

    // Offset past the end is the empty-page terminal state, not an error.
    if page.offset >= rows.len() {
        return PageEnvelope {
            edges: Vec::new(),
            page_info: PageInfo {
                global_count,
                ..PageInfo::default()
            },
        };
    }

    let mut edges: Vec<Edge> = Vec::new();
    let mut matched = 0usize;
    let mut exhausted = true;
    for record in rows.iter().skip(page.offset) {
        if edges.len() == page.first {
            exhausted = false;
            break;
        }
        if !matches_filters(schema, record, filters) {
            continue;
        }
        matched += 1;
        let cursor = record.id().unwrap_or_default().to_string();
        edges.push(Edge {
            cursor,
            node: record.clone(),
        });
    }

    let has_next_page = edges.len() == page.first && !exhausted;
    let has_previous_page = page.offset > 0 && matched > 0;
    let page_info = PageInfo {
        start_cursor: edges.first().map(|e| e.cursor.clone()),
        end_cursor: edges.last().map(|e| e.cursor.clone()),
        has_next_page,
        has_previous_page,
        global_count,
    };
    PageEnvelope { edges, page_info }
}

/// All AND-mode filters must pass; when OR-mode filters exist at least
/// one of them must pass as well. No filters means everything matches.
pub fn matches_filters(schema: &EntitySchema, record: &EntityRecord, filters: &[Filter]) -> bool {
    let mut any_or = false;
    let mut or_hit = false;
    for filter in filters {
        let Some(descriptor) = schema.descriptor(&filter.field) else {
            warn!(
                entity_type = schema.entity_type,
                field = %filter.field,
                "skipping filter on unknown field"
            );
            continue;
        };
        let hit = filter_matches(descriptor.kind, record, filter);
        match filter.mode {
            FilterMode::And => {
                if !hit {
                    return false;
                }
            }
            FilterMode::Or => {
                any_or = true;
                or_hit = or_hit || hit;
            }
        }
    }
    !any_or || or_hit
}

/// A filter passes when at least one candidate value compares true
/// against at least one of the row's values. Row values are treated as a
/// set even for scalar fields.
fn filter_matches(kind: ValueKind, record: &EntityRecord, filter: &Filter) -> bool {
    let row_values: Vec<&Value> = match record.get(&filter.field) {
        None => return false,
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    };
    filter.values.iter().any(|candidate| {
        row_values
            .iter()
            .any(|row_value| compare_pair(kind, filter.op, row_value, candidate))
    })
}

fn compare_pair(kind: ValueKind, op: CmpOp, row_value: &Value, candidate: &Value) -> bool {
    let ord = compare_typed(kind, row_value, candidate);
    match op {
        CmpOp::Eq | CmpOp::Wildcard => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
    }
}

/// Absence sorts before presence; string comparison is
/// case-insensitive; ids break ties so the order is total.
fn compare_records(
    a: &EntityRecord,
    b: &EntityRecord,
    field: &str,
    kind: Option<ValueKind>,
) -> Ordering {
    let left = sort_key(a, field);
    let right = sort_key(b, field);
    let ord = match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(l), Some(r)) => compare_typed(kind.unwrap_or(ValueKind::Text), l, r),
    };
    ord.then_with(|| a.id().cmp(&b.id()))
}

fn sort_key<'r>(record: &'r EntityRecord, field: &str) -> Option<&'r Value> {
    match record.get(field)? {
        Value::Array(items) => items.first(),
        other => Some(other),
    }
}

fn compare_typed(kind: ValueKind, a: &Value, b: &Value) -> Ordering {
    match kind {
        ValueKind::Int => match (as_i64(a), as_i64(b)) {
            (Some(l), Some(r)) => l.cmp(&r),
            _ => string_of(a).cmp(&string_of(b)),
        },
        ValueKind::Bool => as_bool(a).cmp(&as_bool(b)),
        ValueKind::Timestamp => match (as_timestamp(a), as_timestamp(b)) {
            (Some(l), Some(r)) => l.cmp(&r),
            _ => string_of(a).cmp(&string_of(b)),
        },
        _ => string_of(a).to_lowercase().cmp(&string_of(b).to_lowercase()),
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_timestamp(value: &Value) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value.as_str()?, &Rfc3339).ok()
}

fn string_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
