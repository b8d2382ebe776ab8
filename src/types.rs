//! Core data model types shared by every stage.
//!
//! Record batches travel between the source, the transformation rules and the warehouse as an
//! in-memory [`DataSet`]: a [`Schema`] (ordered, typed [`Field`]s) plus row-major [`Value`]s.

use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{PipelineError, PipelineResult};

/// Logical data type for a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
    /// Calendar date without time zone.
    Date,
}

/// A single named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field/column name.
    pub name: String,
    /// Field data type.
    pub data_type: DataType,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A list of fields describing the shape of a record batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A single typed value in a [`DataSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
    /// Calendar date.
    Date(NaiveDate),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of the value. Floats with no fractional part and numeric strings convert.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            Value::Float64(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Utf8(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// String view of the value, if it holds text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Utf8(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Date view of the value, if it holds a date.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Convert to `data_type` the way a column assignment would.
    ///
    /// Nulls stay null. Text converts to numbers, booleans and ISO dates when it parses; anything
    /// converts to text. Lossy conversions (fractional float to integer) are rejected.
    pub fn coerce_to(&self, data_type: DataType) -> Result<Value, String> {
        let mismatch = || format!("cannot store {self:?} in a {data_type:?} column");
        match (data_type, self) {
            (_, Value::Null) => Ok(Value::Null),
            (DataType::Int64, Value::Int64(_))
            | (DataType::Float64, Value::Float64(_))
            | (DataType::Bool, Value::Bool(_))
            | (DataType::Utf8, Value::Utf8(_))
            | (DataType::Date, Value::Date(_)) => Ok(self.clone()),
            (DataType::Int64, Value::Float64(v)) if v.fract() == 0.0 => Ok(Value::Int64(*v as i64)),
            (DataType::Int64, Value::Utf8(s)) => s.trim().parse().map(Value::Int64).map_err(|_| mismatch()),
            (DataType::Float64, Value::Int64(v)) => Ok(Value::Float64(*v as f64)),
            (DataType::Float64, Value::Utf8(s)) => s.trim().parse().map(Value::Float64).map_err(|_| mismatch()),
            (DataType::Bool, Value::Utf8(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" => Ok(Value::Bool(true)),
                "false" | "f" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            (DataType::Date, Value::Utf8(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| mismatch()),
            (DataType::Utf8, other) => Ok(Value::Utf8(other.to_string())),
            _ => Err(mismatch()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Utf8(v) => f.write_str(v),
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
        }
    }
}

/// Hashable identity of a non-null, non-float [`Value`].
///
/// Used wherever values act as keys: primary-key lookups and join/group columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Int(i64),
    Text(String),
    Date(NaiveDate),
    Bool(bool),
}

impl Key {
    /// Key for `value`; `None` for nulls and non-integral floats.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Int64(v) => Some(Key::Int(*v)),
            Value::Float64(v) if v.fract() == 0.0 => Some(Key::Int(*v as i64)),
            Value::Float64(_) => None,
            Value::Bool(v) => Some(Key::Bool(*v)),
            Value::Utf8(v) => Some(Key::Text(v.clone())),
            Value::Date(v) => Some(Key::Date(*v)),
        }
    }

    /// Convert back into a bindable value.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(v) => Value::Int64(*v),
            Key::Text(v) => Value::Utf8(v.clone()),
            Key::Date(v) => Value::Date(*v),
            Key::Bool(v) => Value::Bool(*v),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_value(), f)
    }
}

/// In-memory tabular record batch.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as the [`Schema`] fields.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    /// Schema describing row shape.
    pub schema: Schema,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
}

impl DataSet {
    /// Create a dataset from schema and rows.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    /// Create an empty dataset with the given schema.
    pub fn empty(schema: Schema) -> Self {
        Self::new(schema, Vec::new())
    }

    /// Number of rows in the dataset.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` when the dataset has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value at (`row`, `column`); `None` if either is out of range or unknown.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.schema.index_of(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Fail with [`PipelineError::SchemaMismatch`] if any row is shorter than the schema.
    ///
    /// Row-indexed code calls this first so a malformed batch is an error, not a panic.
    pub fn check_row_widths(&self) -> PipelineResult<()> {
        let width = self.schema.fields.len();
        match self.rows.iter().position(|r| r.len() < width) {
            Some(i) => Err(PipelineError::SchemaMismatch {
                message: format!("row {} has {} values, schema has {width} fields", i + 1, self.rows[i].len()),
            }),
            None => Ok(()),
        }
    }

    /// Stable sort by the [`Key`] in `column`; rows without a key go last.
    ///
    /// Returns `false` (rows untouched) if the column does not exist.
    pub fn sort_by_column(&mut self, column: &str) -> bool {
        let Some(idx) = self.schema.index_of(column) else {
            return false;
        };
        self.rows
            .sort_by_cached_key(|r| r.get(idx).and_then(Key::from_value).map_or((1, None), |k| (0, Some(k))));
        true
    }

    /// Create a new dataset containing only rows that match `predicate`.
    ///
    /// The returned dataset preserves the original schema.
    pub fn filter_rows<F>(&self, mut predicate: F) -> Self
    where
        F: FnMut(&[Value]) -> bool,
    {
        let rows = self
            .rows
            .iter()
            .filter(|row| predicate(row.as_slice()))
            .cloned()
            .collect();
        Self {
            schema: self.schema.clone(),
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{DataSet, DataType, Field, Key, Schema, Value};

    #[test]
    fn key_from_value_skips_nulls_and_fractional_floats() {
        assert_eq!(Key::from_value(&Value::Null), None);
        assert_eq!(Key::from_value(&Value::Float64(1.5)), None);
        assert_eq!(Key::from_value(&Value::Float64(3.0)), Some(Key::Int(3)));
        assert_eq!(
            Key::from_value(&Value::Utf8("a".to_string())),
            Some(Key::Text("a".to_string()))
        );
    }

    #[test]
    fn value_display_uses_iso_dates() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        assert_eq!(Value::Date(d).to_string(), "2024-01-08");
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Key::Int(7).to_string(), "7");
    }

    #[test]
    fn as_i64_accepts_numeric_text() {
        assert_eq!(Value::Utf8(" 12 ".to_string()).as_i64(), Some(12));
        assert_eq!(Value::Utf8("x".to_string()).as_i64(), None);
        assert_eq!(Value::Float64(2.0).as_i64(), Some(2));
    }

    #[test]
    fn coerce_follows_column_assignment_rules() {
        assert_eq!(Value::Utf8("42".to_string()).coerce_to(DataType::Int64), Ok(Value::Int64(42)));
        assert_eq!(Value::Int64(3).coerce_to(DataType::Utf8), Ok(Value::Utf8("3".to_string())));
        assert_eq!(Value::Int64(3).coerce_to(DataType::Float64), Ok(Value::Float64(3.0)));
        assert_eq!(Value::Null.coerce_to(DataType::Date), Ok(Value::Null));
        assert_eq!(
            Value::Utf8("2024-01-03".to_string()).coerce_to(DataType::Date),
            Ok(Value::Date(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()))
        );
        assert!(Value::Utf8("abc".to_string()).coerce_to(DataType::Int64).is_err());
        assert!(Value::Float64(1.5).coerce_to(DataType::Int64).is_err());
        assert!(Value::Date(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap())
            .coerce_to(DataType::Int64)
            .is_err());
    }

    #[test]
    fn value_lookup_by_column_name() {
        let ds = DataSet::new(
            Schema::new(vec![
                Field::new("id", DataType::Int64),
                Field::new("name", DataType::Utf8),
            ]),
            vec![vec![Value::Int64(1), Value::Utf8("Algebra".to_string())]],
        );
        assert_eq!(ds.value(0, "name"), Some(&Value::Utf8("Algebra".to_string())));
        assert_eq!(ds.value(0, "missing"), None);
        assert_eq!(ds.value(1, "id"), None);
    }

    #[test]
    fn short_rows_are_a_schema_mismatch() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("name", DataType::Utf8),
        ]);
        let ok = DataSet::new(schema.clone(), vec![vec![Value::Int64(1), Value::Null]]);
        assert!(ok.check_row_widths().is_ok());

        let short = DataSet::new(
            schema,
            vec![vec![Value::Int64(1), Value::Null], vec![Value::Int64(2)]],
        );
        let err = short.check_row_widths().unwrap_err();
        assert!(matches!(err, crate::error::PipelineError::SchemaMismatch { .. }));
        assert!(err.to_string().contains("row 2 has 1 values"));
    }

    #[test]
    fn sort_by_column_orders_keys_and_puts_nulls_last() {
        let mut ds = DataSet::new(
            Schema::new(vec![
                Field::new("id", DataType::Int64),
                Field::new("tag", DataType::Utf8),
            ]),
            vec![
                vec![Value::Int64(3), Value::Utf8("c".to_string())],
                vec![Value::Null, Value::Utf8("n".to_string())],
                vec![Value::Int64(1), Value::Utf8("a".to_string())],
                vec![Value::Int64(3), Value::Utf8("c2".to_string())],
            ],
        );
        assert!(ds.sort_by_column("id"));
        let tags: Vec<&str> = ds.rows.iter().filter_map(|r| r[1].as_str()).collect();
        assert_eq!(tags, vec!["a", "c", "c2", "n"]);
        assert!(!ds.sort_by_column("missing"));
    }
}
