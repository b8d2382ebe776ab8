//! Idempotent, insert-only batch loading.
//!
//! [`IdempotentLoader::load`] inserts the records whose key is not yet in the target table and
//! skips the rest, so re-running a stage over already-loaded data adds nothing. One call is one
//! unit of work: either every insert of the batch is committed or none is.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataSet, DataType, Key, Value};
use crate::warehouse::{Ident, Session, Statement, TableName};

/// Default number of keys checked per existence query.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Outcome of one load call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    pub inserted_count: usize,
    pub skipped_count: usize,
}

impl LoadResult {
    pub fn total(&self) -> usize {
        self.inserted_count + self.skipped_count
    }
}

/// Insert-only loader with batched existence checks.
#[derive(Debug, Clone, Copy)]
pub struct IdempotentLoader {
    chunk_size: usize,
}

impl Default for IdempotentLoader {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl IdempotentLoader {
    /// A `chunk_size` of zero is treated as one.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Load `records` into `table`, keyed on `key_field`.
    ///
    /// Records are processed in input order, one existence query per chunk. A key already present
    /// in the table, or inserted earlier in this batch, is skipped. On any failure the session is
    /// rolled back and a [`PipelineError::Load`] is returned naming the table and, when an insert
    /// failed, that record's key.
    pub fn load(
        &self,
        session: &mut dyn Session,
        table: &TableName,
        records: &DataSet,
        key_field: &str,
    ) -> PipelineResult<LoadResult> {
        let fail = |key: Option<String>, e: PipelineError| PipelineError::load(table.as_str(), key, e);
        records.check_row_widths().map_err(|e| fail(None, e))?;

        let key_idx = records.schema.index_of(key_field).ok_or_else(|| {
            fail(
                None,
                PipelineError::SchemaMismatch {
                    message: format!(
                        "key field '{key_field}' not found. columns={:?}",
                        records.schema.field_names().collect::<Vec<_>>()
                    ),
                },
            )
        })?;
        let key = Ident::new(key_field).map_err(|e| fail(None, e))?;
        let columns = records
            .schema
            .field_names()
            .map(Ident::new)
            .collect::<PipelineResult<Vec<_>>>()
            .map_err(|e| fail(None, e))?;

        let select = Statement::SelectKeys {
            table: table.clone(),
            key,
        };
        let insert = Statement::Insert {
            table: table.clone(),
            columns,
        };

        let mut result = LoadResult::default();
        let mut present: HashSet<Key> = HashSet::new();
        let mut key_type: Option<DataType> = None;

        for chunk in records.rows.chunks(self.chunk_size) {
            let candidates = chunk_keys(chunk, key_idx, key_type, &present);
            if !candidates.is_empty() {
                let found = match session.query(&select, &candidates) {
                    Ok(found) => found,
                    Err(e) => return Err(abort(session, fail(None, e))),
                };
                if let Some(field) = found.schema.fields.first() {
                    key_type = Some(field.data_type);
                }
                present.extend(found.rows.iter().filter_map(|r| r.first()).filter_map(Key::from_value));
            }

            for row in chunk {
                let row_key = normalized_key(&row[key_idx], key_type);
                if row_key.as_ref().is_some_and(|k| present.contains(k)) {
                    result.skipped_count += 1;
                    continue;
                }
                if let Err(e) = session.execute(&insert, row) {
                    return Err(abort(session, fail(Some(row[key_idx].to_string()), e)));
                }
                result.inserted_count += 1;
                if let Some(k) = row_key {
                    present.insert(k);
                }
            }
        }

        if let Err(e) = session.commit() {
            return Err(abort(session, fail(None, e)));
        }
        Ok(result)
    }
}

// Roll back after a failure. The original error is what the caller needs to see.
fn abort(session: &mut dyn Session, err: PipelineError) -> PipelineError {
    let _ = session.rollback();
    err
}

// Key as the table would store it, so `"7"` and `7` compare equal against an integer column.
fn normalized_key(value: &Value, key_type: Option<DataType>) -> Option<Key> {
    match key_type {
        Some(t) => value
            .coerce_to(t)
            .ok()
            .and_then(|v| Key::from_value(&v))
            .or_else(|| Key::from_value(value)),
        None => Key::from_value(value),
    }
}

// Distinct non-null keys of `chunk` not already known to be present, as bind params.
fn chunk_keys(chunk: &[Vec<Value>], key_idx: usize, key_type: Option<DataType>, present: &HashSet<Key>) -> Vec<Value> {
    let mut seen = HashSet::new();
    chunk
        .iter()
        .map(|row| &row[key_idx])
        .filter(|v| !v.is_null())
        .filter(|v| normalized_key(v, key_type).is_none_or(|k| !present.contains(&k)))
        .filter(|v| seen.insert(v.to_string()))
        .cloned()
        .collect()
}
