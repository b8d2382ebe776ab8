//! PostgreSQL warehouse backend (feature `postgres`).
//!
//! `sqlx` is async; each session owns a current-thread tokio runtime and a single
//! `PgConnection`, and blocks on every call. A transaction is opened lazily by the first
//! statement after a commit/rollback, so the [`Session`] contract (explicit commit, discard on
//! close) maps onto implicit transactions.
//!
//! Column types come from `information_schema.columns`. Types without a [`DataType`] of their own
//! (timestamps, uuid, json, ...) are read as text, and inserts cast every param to the column's
//! catalog type so text converts back on the way in.

use std::collections::HashMap;

use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Connection, Postgres, Row};
use tokio::runtime::{Builder, Runtime};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataSet, DataType, Field, Schema, Value};

use super::ident::{Ident, TableName};
use super::sql::{classify, closed_session, coerce_params, column_types, missing_table};
use super::{Connector, Dialect, Session, Statement};

/// Opens PostgreSQL sessions.
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
    target: String,
}

impl PgConnector {
    pub fn new(host: &str, port: u16, database: &str, user: &str, password: &str) -> Self {
        let options = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database)
            .username(user)
            .password(password);
        Self {
            options,
            target: format!("postgres://{user}@{host}:{port}/{database}"),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            &config.db_host,
            config.db_port,
            &config.db_schema,
            &config.db_user,
            &config.db_password,
        )
    }
}

impl Connector for PgConnector {
    fn connect(&self) -> PipelineResult<Box<dyn Session>> {
        let connection_error = |message: String| PipelineError::Connection { message };
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| connection_error(format!("failed to start runtime: {e}")))?;
        let conn = runtime
            .block_on(PgConnection::connect_with(&self.options))
            .map_err(|e| connection_error(format!("{} unreachable: {e}", self.target)))?;
        Ok(Box::new(PgSession {
            runtime,
            conn: Some(conn),
            in_transaction: false,
            layouts: HashMap::new(),
        }))
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}

/// A table's columns as the pipeline sees them, plus each column's catalog type name.
#[derive(Debug, Clone)]
struct Layout {
    schema: Schema,
    udt_names: Vec<String>,
}

impl Layout {
    fn udt_of(&self, column: &Ident) -> Option<&str> {
        self.schema
            .index_of(column.as_str())
            .and_then(|i| self.udt_names.get(i))
            .map(String::as_str)
    }
}

struct PgSession {
    runtime: Runtime,
    conn: Option<PgConnection>,
    in_transaction: bool,
    /// Column layouts looked up from `information_schema`, per table.
    layouts: HashMap<TableName, Layout>,
}

impl PgSession {
    fn raw(&mut self, sql: &str) -> PipelineResult<()> {
        let Self { runtime, conn, .. } = self;
        let conn = conn.as_mut().ok_or_else(closed_session)?;
        runtime.block_on(sqlx::raw_sql(sql).execute(conn))?;
        Ok(())
    }

    fn begin_if_needed(&mut self) -> PipelineResult<()> {
        if !self.in_transaction {
            self.raw("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn fetch(&mut self, sql: &str, params: Vec<(Value, DataType)>) -> PipelineResult<Vec<PgRow>> {
        self.begin_if_needed()?;
        let Self { runtime, conn, .. } = self;
        let conn = conn.as_mut().ok_or_else(closed_session)?;
        let query = bind_all(sqlx::query(sql), params);
        Ok(runtime.block_on(query.fetch_all(conn))?)
    }

    fn layout_of(&mut self, table: &TableName) -> PipelineResult<Layout> {
        if let Some(layout) = self.layouts.get(table) {
            return Ok(layout.clone());
        }
        let rows = self.fetch(
            "SELECT column_name::text, data_type::text, udt_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 ORDER BY ordinal_position",
            vec![(Value::Utf8(table.to_string()), DataType::Utf8)],
        )?;
        if rows.is_empty() {
            return Err(missing_table(table));
        }
        let mut fields = Vec::with_capacity(rows.len());
        let mut udt_names = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get(0)?;
            let sql_type: String = row.try_get(1)?;
            let udt: String = row.try_get(2)?;
            fields.push(Field::new(name, data_type_for(&sql_type)));
            udt_names.push(checked_udt(&udt)?);
        }
        let layout = Layout {
            schema: Schema::new(fields),
            udt_names,
        };
        self.layouts.insert(table.clone(), layout.clone());
        Ok(layout)
    }
}

/// Column type for an `information_schema` data type. Anything unlisted is read as text.
fn data_type_for(sql_type: &str) -> DataType {
    match sql_type {
        "smallint" | "integer" | "bigint" => DataType::Int64,
        "numeric" | "real" | "double precision" => DataType::Float64,
        "boolean" => DataType::Bool,
        "date" => DataType::Date,
        _ => DataType::Utf8,
    }
}

// Catalog type names are spliced into a cast, so only plain names (`int4`, `_text`) pass.
fn checked_udt(udt: &str) -> PipelineResult<String> {
    if !udt.is_empty() && udt.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(udt.to_string())
    } else {
        Err(PipelineError::Statement {
            message: format!("unsupported column type '{udt}'"),
        })
    }
}

fn cast_for(data_type: DataType) -> &'static str {
    match data_type {
        DataType::Int64 => "int8",
        DataType::Float64 => "float8",
        DataType::Bool => "bool",
        DataType::Utf8 => "text",
        DataType::Date => "date",
    }
}

fn quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn select_list<'a>(fields: impl Iterator<Item = &'a Field>) -> String {
    fields
        .map(|f| {
            let name = quoted(&f.name);
            format!("{name}::{} AS {name}", cast_for(f.data_type))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `INSERT` with every placeholder cast to its column's catalog type.
fn insert_sql(table: &TableName, columns: &[Ident], udt_names: &[&str]) -> String {
    let cols = columns.iter().map(Ident::as_str).collect::<Vec<_>>().join(", ");
    let values = udt_names
        .iter()
        .enumerate()
        .map(|(i, udt)| format!("CAST(${} AS {udt})", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {table} ({cols}) VALUES ({values})")
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: Vec<(Value, DataType)>,
) -> Query<'q, Postgres, PgArguments> {
    for (value, data_type) in params {
        query = match (value, data_type) {
            (Value::Int64(v), _) => query.bind(v),
            (Value::Float64(v), _) => query.bind(v),
            (Value::Bool(v), _) => query.bind(v),
            (Value::Utf8(v), _) => query.bind(v),
            (Value::Date(v), _) => query.bind(v),
            (Value::Null, DataType::Int64) => query.bind(None::<i64>),
            (Value::Null, DataType::Float64) => query.bind(None::<f64>),
            (Value::Null, DataType::Bool) => query.bind(None::<bool>),
            (Value::Null, DataType::Utf8) => query.bind(None::<String>),
            (Value::Null, DataType::Date) => query.bind(None::<chrono::NaiveDate>),
        };
    }
    query
}

fn decode_rows(rows: &[PgRow], schema: Schema) -> PipelineResult<DataSet> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(schema.fields.len());
        for (idx, field) in schema.fields.iter().enumerate() {
            let value = match field.data_type {
                DataType::Int64 => row.try_get::<Option<i64>, _>(idx)?.map(Value::Int64),
                DataType::Float64 => row.try_get::<Option<f64>, _>(idx)?.map(Value::Float64),
                DataType::Bool => row.try_get::<Option<bool>, _>(idx)?.map(Value::Bool),
                DataType::Utf8 => row.try_get::<Option<String>, _>(idx)?.map(Value::Utf8),
                DataType::Date => row.try_get::<Option<chrono::NaiveDate>, _>(idx)?.map(Value::Date),
            };
            values.push(value.unwrap_or(Value::Null));
        }
        out.push(values);
    }
    Ok(DataSet::new(schema, out))
}

impl Session for PgSession {
    fn execute(&mut self, statement: &Statement, params: &[Value]) -> PipelineResult<u64> {
        match statement {
            Statement::Ddl(text) => {
                self.begin_if_needed()?;
                self.raw(text)?;
                // A DDL statement may change any table's layout.
                self.layouts.clear();
                Ok(0)
            }
            Statement::Insert { table, columns } => {
                let layout = self.layout_of(table)?;
                let types = column_types(&layout.schema, columns, table)?;
                let bound = coerce_params(table, params, &types)?;
                let udt_names = columns
                    .iter()
                    .map(|c| layout.udt_of(c).unwrap_or("text"))
                    .collect::<Vec<_>>();
                let sql = insert_sql(table, columns, &udt_names);

                self.begin_if_needed()?;
                let Self { runtime, conn, .. } = self;
                let conn = conn.as_mut().ok_or_else(closed_session)?;
                let result = runtime
                    .block_on(bind_all(sqlx::query(&sql), bound).execute(conn))
                    .map_err(|e| classify(table, e))?;
                Ok(result.rows_affected())
            }
            other => Err(PipelineError::Statement {
                message: format!("{other:?} is a query; use Session::query"),
            }),
        }
    }

    fn query(&mut self, statement: &Statement, params: &[Value]) -> PipelineResult<DataSet> {
        match statement {
            Statement::SelectKeys { table, key } => {
                let layout = self.layout_of(table)?;
                let key_type = column_types(&layout.schema, std::slice::from_ref(key), table)?[0];
                let bound: Vec<(Value, DataType)> = params
                    .iter()
                    .filter_map(|p| p.coerce_to(key_type).ok())
                    .filter(|p| !p.is_null())
                    .map(|p| (p, key_type))
                    .collect();
                let field = Field::new(key.as_str(), key_type);
                let sql = if bound.is_empty() {
                    format!("SELECT {} FROM {table} WHERE FALSE", select_list(std::iter::once(&field)))
                } else {
                    let placeholders = (1..=bound.len()).map(|i| format!("${i}")).collect::<Vec<_>>();
                    format!(
                        "SELECT {} FROM {table} WHERE {} IN ({})",
                        select_list(std::iter::once(&field)),
                        quoted(key.as_str()),
                        placeholders.join(", ")
                    )
                };
                let rows = self.fetch(&sql, bound)?;
                decode_rows(&rows, Schema::new(vec![field]))
            }
            Statement::SelectAll { table } => {
                let layout = self.layout_of(table)?;
                let sql = format!("SELECT {} FROM {table}", select_list(layout.schema.fields.iter()));
                let rows = self.fetch(&sql, Vec::new())?;
                decode_rows(&rows, layout.schema)
            }
            Statement::ListTables { .. } => {
                let implicit = statement.implicit_params();
                let bound = implicit.into_iter().map(|v| (v, DataType::Utf8)).collect::<Vec<_>>();
                let sql = statement.to_sql(Dialect::Postgres, bound.len());
                let rows = self.fetch(&sql, bound)?;
                decode_rows(&rows, Schema::new(vec![Field::new("table_name", DataType::Utf8)]))
            }
            other => Err(PipelineError::Statement {
                message: format!("{other:?} returns no rows; use Session::execute"),
            }),
        }
    }

    fn commit(&mut self) -> PipelineResult<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.raw("COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> PipelineResult<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.raw("ROLLBACK")?;
            self.layouts.clear();
        }
        Ok(())
    }

    fn close(&mut self) -> PipelineResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        self.in_transaction = false;
        // Closing with an open transaction makes the server roll it back.
        self.runtime.block_on(conn.close())?;
        Ok(())
    }
}
