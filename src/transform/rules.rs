//! Per-entity transformation rules applied between staging and warehouse.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataSet, DataType, Field, Key, Schema, Value};
use crate::warehouse::ident::TableName;

use super::dates::DateParser;
use super::expansion::{expand_all, occurrence_schema, occurrences_to_dataset};
use super::schedule::{columns, parse_schedules};

/// Which rule a batch goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntityKind {
    Schedule,
    Enrollment,
    Attendance,
    /// Anything unrecognized: deduplicated by key, otherwise untouched.
    Other,
}

impl EntityKind {
    /// Kind for an entity name such as `schedules` (the part after the layer prefix).
    pub fn from_entity(entity: &str) -> Self {
        match entity {
            "schedules" => EntityKind::Schedule,
            "enrollments" => EntityKind::Enrollment,
            "attendances" => EntityKind::Attendance,
            _ => EntityKind::Other,
        }
    }

    pub fn from_table_name(table: &TableName) -> Self {
        Self::from_entity(table.entity())
    }

    /// Column normalized to a date by this kind's rule, if any.
    pub fn date_column(self) -> Option<&'static str> {
        match self {
            EntityKind::Enrollment => Some("enroll_dt"),
            EntityKind::Attendance => Some("attend_dt"),
            EntityKind::Schedule | EntityKind::Other => None,
        }
    }
}

/// A value that could not be parsed as a date and was stored as null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoercedValue {
    /// 1-based row position in the batch.
    pub row: usize,
    pub column: String,
    pub raw: String,
}

/// Result of applying a rule to one batch.
#[derive(Debug)]
pub struct TransformOutput {
    pub records: DataSet,
    /// Rows excluded from `records`, one error each.
    pub rejected: Vec<PipelineError>,
    /// Values replaced by null.
    pub coerced: Vec<CoercedValue>,
    /// Rows dropped as in-batch duplicates.
    pub duplicates: usize,
}

impl TransformOutput {
    fn new(records: DataSet) -> Self {
        Self {
            records,
            rejected: Vec::new(),
            coerced: Vec::new(),
            duplicates: 0,
        }
    }
}

/// Options shared by all rules.
#[derive(Debug, Clone)]
pub struct RuleSet {
    dates: DateParser,
    key_field: String,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new(DateParser::default(), "id")
    }
}

impl RuleSet {
    pub fn new(dates: DateParser, key_field: impl Into<String>) -> Self {
        Self {
            dates,
            key_field: key_field.into(),
        }
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    /// Apply the rule for `kind` to `records`.
    ///
    /// Row-level problems are collected in the output; an `Err` means the batch as a whole could
    /// not be transformed (a required column is missing, or a row is shorter than the schema).
    pub fn transform(&self, kind: EntityKind, records: DataSet) -> PipelineResult<TransformOutput> {
        records.check_row_widths()?;
        if let Some(column) = kind.date_column() {
            return self.coerce_dates(records, column);
        }
        match kind {
            EntityKind::Schedule => self.expand_schedules(&records),
            _ => self.dedup(records),
        }
    }

    fn expand_schedules(&self, records: &DataSet) -> PipelineResult<TransformOutput> {
        let parsed = parse_schedules(records, &self.dates)?;
        let type_of = |name: &str| {
            records
                .schema
                .index_of(name)
                .map(|i| records.schema.fields[i].data_type)
                .unwrap_or(DataType::Utf8)
        };
        let schema = occurrence_schema(type_of(columns::COURSE_ID), type_of(columns::LECTURER_ID));
        let occurrences = occurrences_to_dataset(schema, expand_all(&parsed.schedules));

        let mut out = TransformOutput::new(occurrences);
        out.rejected = parsed.rejected;
        Ok(out)
    }

    fn coerce_dates(&self, records: DataSet, column: &str) -> PipelineResult<TransformOutput> {
        let idx = records.schema.index_of(column).ok_or_else(|| PipelineError::SchemaMismatch {
            message: format!(
                "expected a '{column}' column. columns={:?}",
                records.schema.field_names().collect::<Vec<_>>()
            ),
        })?;

        let mut fields = records.schema.fields;
        fields[idx] = Field::new(column, DataType::Date);
        let mut coerced = Vec::new();
        let rows = records
            .rows
            .into_iter()
            .enumerate()
            .map(|(i, mut row)| {
                let parsed = match &row[idx] {
                    Value::Null => Value::Null,
                    raw => match self.dates.parse(raw) {
                        Some(date) => Value::Date(date),
                        None => {
                            coerced.push(CoercedValue {
                                row: i + 1,
                                column: column.to_string(),
                                raw: raw.to_string(),
                            });
                            Value::Null
                        }
                    },
                };
                row[idx] = parsed;
                row
            })
            .collect();

        let mut out = TransformOutput::new(DataSet::new(Schema::new(fields), rows));
        out.coerced = coerced;
        Ok(out)
    }

    fn dedup(&self, records: DataSet) -> PipelineResult<TransformOutput> {
        let idx = records.schema.index_of(&self.key_field).ok_or_else(|| PipelineError::SchemaMismatch {
            message: format!(
                "key column '{}' not found. columns={:?}",
                self.key_field,
                records.schema.field_names().collect::<Vec<_>>()
            ),
        })?;

        let before = records.row_count();
        let mut seen: HashSet<Option<Key>> = HashSet::new();
        let deduped = records.filter_rows(|row| seen.insert(dedup_key(&row[idx])));

        let duplicates = before - deduped.row_count();
        let mut out = TransformOutput::new(deduped);
        out.duplicates = duplicates;
        Ok(out)
    }
}

// Nulls compare equal to each other; fractional floats compare by their text.
fn dedup_key(value: &Value) -> Option<Key> {
    Key::from_value(value).or_else(|| match value {
        Value::Float64(v) => Some(Key::Text(v.to_string())),
        _ => None,
    })
}
