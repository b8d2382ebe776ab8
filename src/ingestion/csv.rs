//! CSV source reader.

use std::path::Path;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Read a CSV file into an in-memory [`DataSet`].
///
/// Rules:
///
/// - CSV must have headers. Header names are trimmed and lower-cased.
/// - Column types are inferred from the data (see [`infer_column_type`]).
/// - Empty cells become [`Value::Null`]; short rows are padded with nulls.
pub fn read_csv_from_path(path: impl AsRef<Path>) -> PipelineResult<DataSet> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    read_csv_from_reader(&mut rdr)
}

/// Read CSV data from an existing CSV reader.
pub fn read_csv_from_reader<R: std::io::Read>(rdr: &mut csv::Reader<R>) -> PipelineResult<DataSet> {
    let headers: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();

    if headers.iter().any(|h| h.is_empty()) {
        return Err(PipelineError::SchemaMismatch {
            message: format!("csv header contains an empty column name. headers={headers:?}"),
        });
    }
    for (i, h) in headers.iter().enumerate() {
        if headers[..i].contains(h) {
            return Err(PipelineError::SchemaMismatch {
                message: format!("duplicate column '{h}' in csv header"),
            });
        }
    }

    let mut raw_rows: Vec<Vec<String>> = Vec::new();
    for result in rdr.records() {
        let record = result?;
        if record.len() > headers.len() {
            return Err(PipelineError::SchemaMismatch {
                message: format!(
                    "record at line {} has {} fields, header has {}",
                    record.position().map(|p| p.line()).unwrap_or(0),
                    record.len(),
                    headers.len()
                ),
            });
        }
        let mut row: Vec<String> = record.iter().map(|c| c.trim().to_owned()).collect();
        row.resize(headers.len(), String::new());
        raw_rows.push(row);
    }

    let types: Vec<DataType> = (0..headers.len())
        .map(|col| infer_column_type(raw_rows.iter().map(|r| r[col].as_str())))
        .collect();

    let mut rows = Vec::with_capacity(raw_rows.len());
    for (row_idx0, raw) in raw_rows.iter().enumerate() {
        // 1-based, +1 again for the header line.
        let user_row = row_idx0 + 2;
        let mut row = Vec::with_capacity(headers.len());
        for ((cell, data_type), name) in raw.iter().zip(types.iter()).zip(headers.iter()) {
            row.push(parse_typed_value(user_row, name, *data_type, cell)?);
        }
        rows.push(row);
    }

    let schema = Schema::new(
        headers
            .into_iter()
            .zip(types)
            .map(|(name, data_type)| Field::new(name, data_type))
            .collect(),
    );
    Ok(DataSet::new(schema, rows))
}

/// Infer the narrowest type that every non-empty cell of a column parses as.
///
/// `Int64` if all cells are integers, else `Float64` if all are numbers, else `Utf8`. A column
/// with no non-empty cells is `Utf8`. Dates are left as text; the transformation rules parse them.
pub fn infer_column_type<'a>(cells: impl Iterator<Item = &'a str>) -> DataType {
    let mut saw_value = false;
    let mut all_int = true;
    let mut all_float = true;
    for cell in cells.filter(|c| !c.is_empty()) {
        saw_value = true;
        if all_int && cell.parse::<i64>().is_err() {
            all_int = false;
        }
        if all_float && cell.parse::<f64>().is_err() {
            all_float = false;
        }
        if !all_int && !all_float {
            break;
        }
    }

    match (saw_value, all_int, all_float) {
        (false, _, _) => DataType::Utf8,
        (true, true, _) => DataType::Int64,
        (true, false, true) => DataType::Float64,
        _ => DataType::Utf8,
    }
}

fn parse_typed_value(row: usize, column: &str, data_type: DataType, raw: &str) -> PipelineResult<Value> {
    if raw.is_empty() {
        return Ok(Value::Null);
    }

    let parse_err = |message: String| PipelineError::Parse {
        row,
        column: column.to_owned(),
        raw: raw.to_owned(),
        message,
    };

    match data_type {
        DataType::Utf8 => Ok(Value::Utf8(raw.to_owned())),
        DataType::Int64 => raw.parse::<i64>().map(Value::Int64).map_err(|e| parse_err(e.to_string())),
        DataType::Float64 => raw
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|e| parse_err(e.to_string())),
        DataType::Bool | DataType::Date => Err(parse_err(format!("{data_type:?} is never inferred for csv input"))),
    }
}
