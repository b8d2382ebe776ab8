//! Pieces shared by the sqlx-backed sessions.

use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataType, Schema, Value};

use super::ident::{Ident, TableName};

pub(crate) fn closed_session() -> PipelineError {
    PipelineError::Connection {
        message: "session is closed".to_string(),
    }
}

pub(crate) fn missing_table(table: &TableName) -> PipelineError {
    PipelineError::Statement {
        message: format!("relation \"{table}\" does not exist"),
    }
}

/// Declared type of each of `columns` in `schema`.
pub(crate) fn column_types(schema: &Schema, columns: &[Ident], table: &TableName) -> PipelineResult<Vec<DataType>> {
    columns
        .iter()
        .map(|c| {
            schema
                .index_of(c.as_str())
                .map(|i| schema.fields[i].data_type)
                .ok_or_else(|| PipelineError::Statement {
                    message: format!("column \"{c}\" of relation \"{table}\" does not exist"),
                })
        })
        .collect()
}

/// Convert each param to its column's type, the way a column assignment would.
pub(crate) fn coerce_params(
    table: &TableName,
    params: &[Value],
    types: &[DataType],
) -> PipelineResult<Vec<(Value, DataType)>> {
    if params.len() != types.len() {
        return Err(PipelineError::Statement {
            message: format!(
                "insert into {table} names {} columns but binds {} values",
                types.len(),
                params.len()
            ),
        });
    }
    params
        .iter()
        .zip(types)
        .map(|(v, t)| {
            v.coerce_to(*t)
                .map(|c| (c, *t))
                .map_err(|message| PipelineError::Statement {
                    message: format!("relation \"{table}\": {message}"),
                })
        })
        .collect()
}

/// Turn constraint failures reported by the database into [`PipelineError::ConstraintViolation`].
pub(crate) fn classify(table: &TableName, err: sqlx::Error) -> PipelineError {
    if let sqlx::Error::Database(db) = &err {
        use sqlx::error::ErrorKind;
        if matches!(
            db.kind(),
            ErrorKind::UniqueViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::CheckViolation
        ) {
            return PipelineError::ConstraintViolation {
                table: table.to_string(),
                message: db.message().to_string(),
            };
        }
    }
    PipelineError::Sqlx(err)
}

#[cfg(test)]
mod tests {
    use super::{classify, coerce_params, column_types};
    use crate::error::PipelineError;
    use crate::types::{DataType, Field, Schema, Value};
    use crate::warehouse::{Ident, TableName};

    fn table() -> TableName {
        TableName::new("wh__courses").unwrap()
    }

    #[test]
    fn column_types_follow_the_requested_order() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("name", DataType::Utf8),
        ]);
        let cols = vec![Ident::new("name").unwrap(), Ident::new("id").unwrap()];
        assert_eq!(
            column_types(&schema, &cols, &table()).unwrap(),
            vec![DataType::Utf8, DataType::Int64]
        );

        let err = column_types(&schema, &[Ident::new("missing").unwrap()], &table()).unwrap_err();
        assert!(err.to_string().contains("column \"missing\""));
    }

    #[test]
    fn params_are_coerced_and_nulls_keep_their_column_type() {
        let bound = coerce_params(
            &table(),
            &[Value::Utf8("7".to_string()), Value::Null],
            &[DataType::Int64, DataType::Date],
        )
        .unwrap();
        assert_eq!(bound, vec![(Value::Int64(7), DataType::Int64), (Value::Null, DataType::Date)]);
    }

    #[test]
    fn uncoercible_or_miscounted_params_are_statement_errors() {
        let err = coerce_params(&table(), &[Value::Utf8("seven".to_string())], &[DataType::Int64]).unwrap_err();
        assert!(matches!(err, PipelineError::Statement { .. }));

        let err = coerce_params(&table(), &[Value::Int64(1)], &[DataType::Int64, DataType::Utf8]).unwrap_err();
        assert!(err.to_string().contains("names 2 columns but binds 1 values"));
    }

    #[test]
    fn non_database_errors_pass_through() {
        let err = classify(&table(), sqlx::Error::RowNotFound);
        assert!(matches!(err, PipelineError::Sqlx(sqlx::Error::RowNotFound)));
    }
}
