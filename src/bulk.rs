//! Batched fetch of large identity lists.
//!
//! One structural query per batch instead of one per record; batch size
//! is roughly an eighth of the input, capped by configuration. A failed
//! batch aborts the whole fetch; no partial result is returned.

use crate::compile;
use crate::config::EngineConfig;
use crate::errors::EntityGraphError;
use crate::reduce::{EntityRecord, reduce};
use crate::schema::EntitySchema;
use crate::store::GraphStore;

/// ceil(total / 8), clamped to [1, max_batch].
pub fn batch_size(total: usize, max_batch: usize) -> usize {
    total.div_ceil(8).clamp(1, max_batch.max(1))
}

/// Fetch the records behind `iris`, batch by batch, concatenated in no
/// particular order.
pub fn fetch_by_iris(
    store: &GraphStore,
    schema: &EntitySchema,
    config: &EngineConfig,
    type_tokens: &[&str],
    iris: &[String],
    fields: &[&str],
) -> Result<Vec<EntityRecord>, EntityGraphError> {
    if iris.is_empty() {
        return Ok(Vec::new());
    }
    let size = batch_size(iris.len(), config.max_batch);
    let mut records = Vec::with_capacity(iris.len());
    for batch in iris.chunks(size) {
        let sql = compile::select_by_iris(schema, batch, fields)?;
        for row in store.select(&sql)? {
            records.push(reduce(&row, schema, type_tokens));
        }
    }
    Ok(records)
}
