//! Schema-driven entity persistence over a SQLite statement store.
//!
//! entitygraph maps declarative per-entity predicate schemas onto SQL
//! over a `(subject, predicate, value)` statement table and executes
//! CRUD, filtering, pagination, and relationship attachment against it.
//! Dozens of record types share one generic engine; a schema is plain
//! data, not code.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use entitygraph::{Engine, EntitySchema, SchemaRegistry, ValueKind};
//! use serde_json::json;
//!
//! let registry = SchemaRegistry::new().register(
//!     EntitySchema::new("control")
//!         .with_timestamps()
//!         .with_field("name", ValueKind::Text)
//!         .with_enum_field("status", &["open", "closed"]),
//! );
//! let engine = Engine::in_memory(registry)?;
//!
//! let mut values = serde_json::Map::new();
//! values.insert("name".into(), json!("Alpha"));
//! values.insert("status".into(), json!("open"));
//! let record = engine.create("control", values, &["name", "status"])?;
//! let found = engine.find_by_id("control", record.id().unwrap(), &["name"])?;
//! # Ok::<(), entitygraph::EntityGraphError>(())
//! ```
//!
//! # Components
//!
//! - [`schema`]: predicate schemas as data, value encoding, store DDL
//! - [`compile`]: query compiler emitting SQL text
//! - [`store`]: connection owner, row pivot
//! - [`reduce`]: raw rows into sparse records
//! - [`page`]: in-memory filters, sort, forward paging
//! - [`orchestrate`]: owned nested records and shared references
//! - [`bulk`]: batched fetch of large identity lists
//! - [`engine`]: the boundary CRUD/attach API
//!
//! Writes that span several round trips (create-then-attach,
//! delete-children-then-parent) are not atomic; the store offers no
//! multi-statement transaction here, and a mid-sequence failure leaves
//! the earlier steps applied.

pub mod bulk;
pub mod compile;
pub mod config;
pub mod engine;
pub mod errors;
pub mod ident;
pub mod orchestrate;
pub mod page;
pub mod reduce;
pub mod schema;
pub mod store;

pub use crate::compile::{EditInstruction, EditOperation};
pub use crate::config::EngineConfig;
pub use crate::engine::Engine;
pub use crate::errors::EntityGraphError;
pub use crate::ident::IdPolicy;
pub use crate::page::{CmpOp, Edge, Filter, FilterMode, PageEnvelope, PageInfo, PageRequest};
pub use crate::reduce::EntityRecord;
pub use crate::schema::{
    EntitySchema, PredicateDescriptor, ReferenceDescriptor, SchemaRegistry, ValueKind,
};
pub use crate::store::{DataRow, GraphStore};
