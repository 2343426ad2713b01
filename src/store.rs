//! The SQLite statement store.
//!
//! Owns the connection and executes compiled query text. Reads come back
//! as [`DataRow`]s: the subject plus one entry per materialized field,
//! multi-valued projections split on the separator the compiler
//! concatenates with. No state is cached between calls.

use std::path::Path;

use ahash::AHashMap;
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::error;

use crate::errors::EntityGraphError;
use crate::schema::{VALUE_SEPARATOR, ensure_schema};

/// One raw result row: a storage identity and the stored (still encoded)
/// values of every field the query materialized. Fields the store had no
/// statements for are absent, not empty.
#[derive(Debug, Clone)]
pub struct DataRow {
    pub subject: String,
    pub fields: AHashMap<String, Vec<String>>,
}

impl DataRow {
    pub fn first(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.first()).map(String::as_str)
    }
}

pub struct GraphStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore").finish_non_exhaustive()
    }
}

impl GraphStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EntityGraphError> {
        let conn =
            Connection::open(path).map_err(|e| EntityGraphError::connection(e.to_string()))?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, EntityGraphError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EntityGraphError::connection(e.to_string()))?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run one compiled select and pivot the result set.
    pub fn select(&self, sql: &str) -> Result<Vec<DataRow>, EntityGraphError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(|e| raise("prepare", sql, e))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([]).map_err(|e| raise("query", sql, e))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| raise("step", sql, e))? {
            let mut fields: AHashMap<String, Vec<String>> = AHashMap::new();
            let mut subject = String::new();
            for (idx, column) in columns.iter().enumerate() {
                let value: Option<String> =
                    row.get(idx).map_err(|e| raise("read", sql, e))?;
                let Some(value) = value else { continue };
                if column == "subject" {
                    subject = value;
                } else {
                    fields.insert(
                        column.clone(),
                        value.split(VALUE_SEPARATOR).map(str::to_string).collect(),
                    );
                }
            }
            out.push(DataRow { subject, fields });
        }
        Ok(out)
    }

    /// Run one compiled write script (possibly several statements).
    pub fn execute(&self, sql: &str) -> Result<(), EntityGraphError> {
        let conn = self.conn.lock();
        conn.execute_batch(sql)
            .map_err(|e| raise("execute", sql, e))
    }

    /// True when the probe select returns at least one row.
    pub fn probe(&self, sql: &str) -> Result<bool, EntityGraphError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(|e| raise("prepare", sql, e))?;
        let mut rows = stmt.query([]).map_err(|e| raise("query", sql, e))?;
        Ok(rows.next().map_err(|e| raise("step", sql, e))?.is_some())
    }

    /// Total statements in the store; diagnostics and tests.
    pub fn statement_count(&self) -> Result<u64, EntityGraphError> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM statements", [], |row| row.get(0))
            .map_err(|e| EntityGraphError::query(e.to_string()))
    }
}

/// Store failures are logged and re-raised unchanged; retry policy
/// belongs to callers.
fn raise(stage: &str, sql: &str, err: rusqlite::Error) -> EntityGraphError {
    error!(stage, %err, sql, "store failure");
    EntityGraphError::query(err.to_string())
}
