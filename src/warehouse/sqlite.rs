//! SQLite warehouse backend, the default.
//!
//! Same blocking facade as the PostgreSQL backend: every session owns a current-thread tokio
//! runtime and one `SqliteConnection`, and a transaction is opened lazily by the first statement
//! after a commit/rollback. A file database runs in WAL mode so readers do not wait on the
//! writer. An in-memory database is shared by every session of one [`SqliteWarehouse`] and lives
//! as long as the warehouse handle.
//!
//! SQLite stores values by affinity, not by declared type, so every read casts each column to the
//! storage class its [`DataType`] expects and dates travel as ISO `YYYY-MM-DD` text.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteRow};
use sqlx::{Connection, Row, Sqlite};
use tokio::runtime::{Builder, Runtime};

use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataSet, DataType, Field, Schema, Value};

use super::ident::{Layer, TableName};
use super::sql::{classify, closed_session, coerce_params, column_types, missing_table};
use super::{Connector, Dialect, Session, Statement};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Default)]
struct SessionStats {
    open: AtomicUsize,
    opened: AtomicUsize,
}

/// Keeps a shared in-memory database alive between sessions.
struct Anchor {
    runtime: Runtime,
    conn: Option<SqliteConnection>,
}

impl Drop for Anchor {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = self.runtime.block_on(conn.close());
        }
    }
}

/// Handle to a SQLite warehouse. Clones share the same database and session counters.
#[derive(Clone)]
pub struct SqliteWarehouse {
    options: SqliteConnectOptions,
    target: String,
    stats: Arc<SessionStats>,
    _anchor: Option<Arc<Anchor>>,
}

impl fmt::Debug for SqliteWarehouse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteWarehouse")
            .field("target", &self.target)
            .field("open_sessions", &self.open_sessions())
            .finish()
    }
}

fn runtime() -> PipelineResult<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| PipelineError::Connection {
            message: format!("failed to start runtime: {e}"),
        })
}

impl SqliteWarehouse {
    /// Warehouse stored in the database file at `path`, created on first connect.
    ///
    /// The parent directory must exist; connecting fails otherwise.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        Self {
            options,
            target: format!("sqlite://{}", path.display()),
            stats: Arc::default(),
            _anchor: None,
        }
    }

    /// Private in-memory warehouse. Its contents are dropped with the last clone of the handle.
    pub fn in_memory() -> PipelineResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let runtime = runtime()?;
        let conn = runtime
            .block_on(SqliteConnection::connect_with(&options))
            .map_err(|e| PipelineError::Connection {
                message: format!("in-memory database unavailable: {e}"),
            })?;
        Ok(Self {
            options,
            target: "sqlite::memory:".to_string(),
            stats: Arc::default(),
            _anchor: Some(Arc::new(Anchor {
                runtime,
                conn: Some(conn),
            })),
        })
    }

    /// Sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.stats.open.load(Ordering::SeqCst)
    }

    /// Sessions opened over the handle's lifetime.
    pub fn sessions_opened(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst)
    }

    /// Committed contents of `table`; `None` if it does not exist or cannot be read.
    ///
    /// Reads through a session of its own that the session counters do not see.
    pub fn snapshot(&self, table: &str) -> Option<DataSet> {
        let table = TableName::new(table).ok()?;
        let mut session = self.session(None).ok()?;
        let ds = session.query(&Statement::SelectAll { table }, &[]).ok();
        let _ = session.close();
        ds
    }

    /// Names of all committed pipeline tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let Ok(mut session) = self.session(None) else {
            return Vec::new();
        };
        let mut names = Vec::new();
        for layer in Layer::ALL {
            let statement = Statement::ListTables { layer };
            if let Ok(ds) = session.query(&statement, &statement.implicit_params()) {
                names.extend(ds.rows.iter().filter_map(|r| r.first()).filter_map(|v| v.as_str()).map(str::to_string));
            }
        }
        let _ = session.close();
        names.sort();
        names
    }

    fn session(&self, stats: Option<Arc<SessionStats>>) -> PipelineResult<SqliteSession> {
        let runtime = runtime()?;
        let conn = runtime
            .block_on(SqliteConnection::connect_with(&self.options))
            .map_err(|e| PipelineError::Connection {
                message: format!("{} unreachable: {e}", self.target),
            })?;
        if let Some(stats) = &stats {
            stats.open.fetch_add(1, Ordering::SeqCst);
            stats.opened.fetch_add(1, Ordering::SeqCst);
        }
        Ok(SqliteSession {
            runtime,
            conn: Some(conn),
            in_transaction: false,
            schemas: HashMap::new(),
            stats,
        })
    }
}

impl Connector for SqliteWarehouse {
    fn connect(&self) -> PipelineResult<Box<dyn Session>> {
        Ok(Box::new(self.session(Some(Arc::clone(&self.stats)))?))
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}

struct SqliteSession {
    runtime: Runtime,
    conn: Option<SqliteConnection>,
    in_transaction: bool,
    /// Column layouts read from `pragma_table_info`, per table.
    schemas: HashMap<TableName, Schema>,
    stats: Option<Arc<SessionStats>>,
}

impl SqliteSession {
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

    fn fetch(&mut self, sql: &str, params: Vec<Value>) -> PipelineResult<Vec<SqliteRow>> {
        self.begin_if_needed()?;
        let Self { runtime, conn, .. } = self;
        let conn = conn.as_mut().ok_or_else(closed_session)?;
        Ok(runtime.block_on(bind_all(sqlx::query(sql), params).fetch_all(conn))?)
    }

    fn schema_of(&mut self, table: &TableName) -> PipelineResult<Schema> {
        if let Some(schema) = self.schemas.get(table) {
            return Ok(schema.clone());
        }
        let rows = self.fetch(
            "SELECT name, type FROM pragma_table_info(?1) ORDER BY cid",
            vec![Value::Utf8(table.to_string())],
        )?;
        if rows.is_empty() {
            return Err(missing_table(table));
        }
        let mut fields = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get(0)?;
            let declared: Option<String> = row.try_get(1)?;
            fields.push(Field::new(name, data_type_for(declared.as_deref().unwrap_or(""))));
        }
        let schema = Schema::new(fields);
        self.schemas.insert(table.clone(), schema.clone());
        Ok(schema)
    }
}

/// Column type for a declared SQLite type, following SQLite's affinity rules.
///
/// `DATE` and `BOOLEAN` get their own types; anything without a numeric or text affinity
/// (`TIMESTAMP`, `DATETIME`, no type at all) is read as text.
fn data_type_for(declared: &str) -> DataType {
    let t = declared.trim().to_ascii_uppercase();
    if t.contains("INT") {
        DataType::Int64
    } else if t.contains("BOOL") {
        DataType::Bool
    } else if t == "DATE" {
        DataType::Date
    } else if t.contains("CHAR") || t.contains("CLOB") || t.contains("TEXT") {
        DataType::Utf8
    } else if t.contains("REAL")
        || t.contains("FLOA")
        || t.contains("DOUB")
        || t.starts_with("NUMERIC")
        || t.starts_with("DECIMAL")
    {
        DataType::Float64
    } else {
        DataType::Utf8
    }
}

fn storage_class(data_type: DataType) -> &'static str {
    match data_type {
        DataType::Int64 | DataType::Bool => "INTEGER",
        DataType::Float64 => "REAL",
        DataType::Utf8 | DataType::Date => "TEXT",
    }
}

fn quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn select_list<'a>(fields: impl Iterator<Item = &'a Field>) -> String {
    fields
        .map(|f| {
            let name = quoted(&f.name);
            format!("CAST({name} AS {}) AS {name}", storage_class(f.data_type))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: Vec<Value>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in params {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Int64(v) => query.bind(v),
            Value::Float64(v) => query.bind(v),
            Value::Bool(v) => query.bind(v),
            Value::Utf8(v) => query.bind(v),
            Value::Date(v) => query.bind(v.format(DATE_FORMAT).to_string()),
        };
    }
    query
}

fn decode_rows(rows: &[SqliteRow], schema: Schema) -> PipelineResult<DataSet> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(schema.fields.len());
        for (idx, field) in schema.fields.iter().enumerate() {
            let value = match field.data_type {
                DataType::Int64 => row.try_get::<Option<i64>, _>(idx)?.map(Value::Int64),
                DataType::Float64 => row.try_get::<Option<f64>, _>(idx)?.map(Value::Float64),
                DataType::Bool => row.try_get::<Option<i64>, _>(idx)?.map(|v| Value::Bool(v != 0)),
                DataType::Utf8 => row.try_get::<Option<String>, _>(idx)?.map(Value::Utf8),
                DataType::Date => match row.try_get::<Option<String>, _>(idx)? {
                    Some(text) => Some(Value::Date(NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(
                        |e| PipelineError::Statement {
                            message: format!("column \"{}\" holds '{text}', not a date: {e}", field.name),
                        },
                    )?)),
                    None => None,
                },
            };
            values.push(value.unwrap_or(Value::Null));
        }
        out.push(values);
    }
    Ok(DataSet::new(schema, out))
}

impl Session for SqliteSession {
    fn execute(&mut self, statement: &Statement, params: &[Value]) -> PipelineResult<u64> {
        match statement {
            Statement::Ddl(text) => {
                if !params.is_empty() {
                    return Err(PipelineError::Statement {
                        message: "ddl statements take no parameters".to_string(),
                    });
                }
                self.begin_if_needed()?;
                self.raw(text)?;
                // A DDL statement may change any table's layout.
                self.schemas.clear();
                Ok(0)
            }
            Statement::Insert { table, columns } => {
                let schema = self.schema_of(table)?;
                let types = column_types(&schema, columns, table)?;
                let bound = coerce_params(table, params, &types)?
                    .into_iter()
                    .map(|(value, _)| value)
                    .collect::<Vec<_>>();
                let sql = statement.to_sql(Dialect::Sqlite, bound.len());

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
                let schema = self.schema_of(table)?;
                let key_type = column_types(&schema, std::slice::from_ref(key), table)?[0];
                let bound: Vec<Value> = params
                    .iter()
                    .filter_map(|p| p.coerce_to(key_type).ok())
                    .filter(|p| !p.is_null())
                    .collect();
                let field = Field::new(key.as_str(), key_type);
                let where_clause = if bound.is_empty() {
                    "FALSE".to_string()
                } else {
                    let placeholders = (1..=bound.len()).map(|i| format!("?{i}")).collect::<Vec<_>>();
                    format!("{} IN ({})", quoted(key.as_str()), placeholders.join(", "))
                };
                let sql = format!(
                    "SELECT {} FROM {table} WHERE {where_clause}",
                    select_list(std::iter::once(&field))
                );
                let rows = self.fetch(&sql, bound)?;
                decode_rows(&rows, Schema::new(vec![field]))
            }
            Statement::SelectAll { table } => {
                let schema = self.schema_of(table)?;
                let sql = format!("SELECT {} FROM {table}", select_list(schema.fields.iter()));
                let rows = self.fetch(&sql, Vec::new())?;
                decode_rows(&rows, schema)
            }
            Statement::ListTables { .. } => {
                let sql = statement.to_sql(Dialect::Sqlite, 1);
                let rows = self.fetch(&sql, statement.implicit_params())?;
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
            // Rolled-back DDL may have changed layouts.
            self.schemas.clear();
        }
        Ok(())
    }

    fn close(&mut self) -> PipelineResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        self.in_transaction = false;
        if let Some(stats) = &self.stats {
            stats.open.fetch_sub(1, Ordering::SeqCst);
        }
        // Closing with an open transaction rolls it back.
        self.runtime.block_on(conn.close())?;
        Ok(())
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use chrono::NaiveDate;

    use super::{data_type_for, select_list, SqliteWarehouse};
    use crate::error::PipelineError;
    use crate::types::{DataType, Field, Value};
    use crate::warehouse::{execute_ddl, Connector, Ident, Layer, SessionScope, Statement, TableName};

    const COURSES_DDL: &str =
        "CREATE TABLE IF NOT EXISTS stg__courses (id INT PRIMARY KEY, name VARCHAR(255) NOT NULL);";

    fn temp_db(name: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("campus_etl_sqlite_{name}_{nanos}.db"))
    }

    fn insert_course() -> Statement {
        Statement::Insert {
            table: TableName::new("stg__courses").unwrap(),
            columns: vec![Ident::new("id").unwrap(), Ident::new("name").unwrap()],
        }
    }

    fn select_courses() -> Statement {
        Statement::SelectAll {
            table: TableName::new("stg__courses").unwrap(),
        }
    }

    #[test]
    fn declared_types_map_by_affinity() {
        assert_eq!(data_type_for("INT"), DataType::Int64);
        assert_eq!(data_type_for("bigint"), DataType::Int64);
        assert_eq!(data_type_for("VARCHAR(32)"), DataType::Utf8);
        assert_eq!(data_type_for("NUMERIC(5, 2)"), DataType::Float64);
        assert_eq!(data_type_for("DATE"), DataType::Date);
        assert_eq!(data_type_for("BOOLEAN"), DataType::Bool);
        assert_eq!(data_type_for("TIMESTAMP"), DataType::Utf8);
        assert_eq!(data_type_for(""), DataType::Utf8);
    }

    #[test]
    fn reads_cast_every_column() {
        let fields = [Field::new("id", DataType::Int64), Field::new("due", DataType::Date)];
        assert_eq!(
            select_list(fields.iter()),
            "CAST(\"id\" AS INTEGER) AS \"id\", CAST(\"due\" AS TEXT) AS \"due\""
        );
    }

    #[test]
    fn uncommitted_writes_are_private_to_the_session() {
        let path = temp_db("private");
        let wh = SqliteWarehouse::open(&path);
        let mut s1 = wh.connect().unwrap();
        execute_ddl(s1.as_mut(), COURSES_DDL).unwrap();

        s1.execute(&insert_course(), &[Value::Int64(1), Value::Utf8("Algebra".to_string())])
            .unwrap();
        assert_eq!(s1.query(&select_courses(), &[]).unwrap().row_count(), 1);

        let mut s2 = wh.connect().unwrap();
        assert_eq!(s2.query(&select_courses(), &[]).unwrap().row_count(), 0);
        s2.commit().unwrap();

        s1.commit().unwrap();
        assert_eq!(s2.query(&select_courses(), &[]).unwrap().row_count(), 1);
        drop((s1, s2));
        assert_eq!(wh.snapshot("stg__courses").unwrap().row_count(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rollback_discards_pending_rows() {
        let wh = SqliteWarehouse::in_memory().unwrap();
        let mut s = wh.connect().unwrap();
        execute_ddl(s.as_mut(), COURSES_DDL).unwrap();
        s.execute(&insert_course(), &[Value::Int64(1), Value::Utf8("Algebra".to_string())])
            .unwrap();
        s.rollback().unwrap();
        s.close().unwrap();
        assert_eq!(wh.snapshot("stg__courses").unwrap().row_count(), 0);
    }

    #[test]
    fn constraint_failures_are_classified() {
        let wh = SqliteWarehouse::in_memory().unwrap();
        let mut s = wh.connect().unwrap();
        execute_ddl(s.as_mut(), COURSES_DDL).unwrap();
        s.execute(&insert_course(), &[Value::Int64(1), Value::Utf8("Algebra".to_string())])
            .unwrap();

        let dup = s
            .execute(&insert_course(), &[Value::Int64(1), Value::Utf8("Again".to_string())])
            .unwrap_err();
        assert!(matches!(dup, PipelineError::ConstraintViolation { .. }), "{dup:?}");

        let null_name = s
            .execute(&insert_course(), &[Value::Int64(2), Value::Null])
            .unwrap_err();
        assert!(matches!(null_name, PipelineError::ConstraintViolation { .. }), "{null_name:?}");
        assert!(null_name.to_string().contains("NOT NULL"));
    }

    #[test]
    fn values_round_trip_through_declared_types() {
        let wh = SqliteWarehouse::in_memory().unwrap();
        let mut s = SessionScope::open(&wh).unwrap();
        execute_ddl(
            &mut *s,
            "CREATE TABLE wh__marks (id INT PRIMARY KEY, score NUMERIC(5, 2), passed BOOLEAN, due DATE, note TEXT)",
        )
        .unwrap();
        let insert = Statement::Insert {
            table: TableName::new("wh__marks").unwrap(),
            columns: ["id", "score", "passed", "due", "note"]
                .into_iter()
                .map(|c| Ident::new(c).unwrap())
                .collect(),
        };
        let due = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        s.execute(
            &insert,
            &[
                Value::Utf8("7".to_string()),
                Value::Int64(75),
                Value::Bool(true),
                Value::Date(due),
                Value::Int64(42),
            ],
        )
        .unwrap();
        s.commit().unwrap();

        let ds = s
            .query(&Statement::SelectAll { table: TableName::new("wh__marks").unwrap() }, &[])
            .unwrap();
        assert_eq!(
            ds.rows[0],
            vec![
                Value::Int64(7),
                Value::Float64(75.0),
                Value::Bool(true),
                Value::Date(due),
                Value::Utf8("42".to_string()),
            ]
        );

        let bad = s
            .execute(
                &insert,
                &[Value::Utf8("seven".to_string()), Value::Null, Value::Null, Value::Null, Value::Null],
            )
            .unwrap_err();
        assert!(matches!(bad, PipelineError::Statement { .. }));
    }

    #[test]
    fn defaults_and_timestamps_in_ddl_are_honored() {
        let wh = SqliteWarehouse::in_memory().unwrap();
        let mut s = SessionScope::open(&wh).unwrap();
        execute_ddl(
            &mut *s,
            "CREATE TABLE stg__courses (
                id INT PRIMARY KEY,
                name VARCHAR(255),
                active BOOLEAN NOT NULL DEFAULT TRUE,
                tag VARCHAR(8) DEFAULT '--', -- the literal is not a comment
                loaded_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );",
        )
        .unwrap();
        s.execute(&insert_course(), &[Value::Int64(1), Value::Utf8("Algebra".to_string())])
            .unwrap();
        s.commit().unwrap();

        let ds = s.query(&select_courses(), &[]).unwrap();
        assert_eq!(ds.value(0, "active"), Some(&Value::Bool(true)));
        assert_eq!(ds.value(0, "tag"), Some(&Value::Utf8("--".to_string())));
        assert!(matches!(ds.value(0, "loaded_at"), Some(Value::Utf8(ts)) if ts.starts_with("20")));
    }

    #[test]
    fn select_keys_returns_only_present_keys() {
        let wh = SqliteWarehouse::in_memory().unwrap();
        let mut s = wh.connect().unwrap();
        execute_ddl(s.as_mut(), COURSES_DDL).unwrap();
        for id in [1, 3] {
            s.execute(&insert_course(), &[Value::Int64(id), Value::Utf8(format!("c{id}"))])
                .unwrap();
        }
        let keys = Statement::SelectKeys {
            table: TableName::new("stg__courses").unwrap(),
            key: Ident::new("id").unwrap(),
        };
        let mut found = s
            .query(&keys, &[Value::Int64(1), Value::Utf8("2".to_string()), Value::Int64(3)])
            .unwrap();
        found.rows.sort_by_key(|r| r[0].as_i64());
        assert_eq!(found.rows, vec![vec![Value::Int64(1)], vec![Value::Int64(3)]]);
        assert!(s.query(&keys, &[]).unwrap().is_empty());
    }

    #[test]
    fn list_tables_filters_by_layer() {
        let wh = SqliteWarehouse::in_memory().unwrap();
        let mut s = wh.connect().unwrap();
        execute_ddl(
            s.as_mut(),
            "CREATE TABLE stg__b (id INT); CREATE TABLE stg__a (id INT); CREATE TABLE wh__a (id INT);",
        )
        .unwrap();
        let ds = s.query(&Statement::ListTables { layer: Layer::Staging }, &[Value::Utf8("stg__".to_string())]).unwrap();
        assert_eq!(
            ds.rows,
            vec![
                vec![Value::Utf8("stg__a".to_string())],
                vec![Value::Utf8("stg__b".to_string())],
            ]
        );
        s.close().unwrap();
        assert_eq!(wh.table_names(), vec!["stg__a", "stg__b", "wh__a"]);
    }

    #[test]
    fn missing_database_directory_is_a_connection_error() {
        let wh = SqliteWarehouse::open(temp_db("no_such_dir").join("warehouse.db"));
        assert!(matches!(wh.connect(), Err(PipelineError::Connection { .. })));
        assert_eq!(wh.sessions_opened(), 0);
    }

    #[test]
    fn session_accounting_and_closed_sessions() {
        let wh = SqliteWarehouse::in_memory().unwrap();
        let mut s = wh.connect().unwrap();
        assert_eq!(wh.open_sessions(), 1);
        s.close().unwrap();
        s.close().unwrap();
        assert_eq!(wh.open_sessions(), 0);
        assert!(matches!(
            s.query(&Statement::ListTables { layer: Layer::Mart }, &[]),
            Err(PipelineError::Connection { .. })
        ));

        {
            let _dropped = wh.connect().unwrap();
            assert_eq!(wh.open_sessions(), 1);
        }
        assert_eq!(wh.open_sessions(), 0);
        assert_eq!(wh.sessions_opened(), 2);
    }

    #[test]
    fn ddl_failure_reports_the_statement() {
        let wh = SqliteWarehouse::in_memory().unwrap();
        let mut s = wh.connect().unwrap();
        let err = execute_ddl(s.as_mut(), "CREATE TABLE stg__a (id INT); CREATE TABLE stg__a (id INT);")
            .unwrap_err();
        assert!(err.to_string().contains("ddl statement 2"));
        s.close().unwrap();
        // The first statement was committed on its own.
        assert!(wh.snapshot("stg__a").is_some());
    }
}
