//! Database boundary: sessions, statements and backends.
//!
//! Components never build SQL from strings. They issue one of the parameterized [`Statement`]
//! shapes against a [`Session`]; identifiers are validated up front ([`TableName`], [`Ident`]) and
//! every value travels as a bound parameter.
//!
//! Sessions are acquired through [`SessionScope`], which closes the session on every exit path
//! (including early returns and unwinding). Uncommitted work is discarded on close.
//!
//! Backends:
//!
//! - [`sqlite::SqliteWarehouse`]: SQLite via `sqlx`, a database file or a shared in-memory database
//! - [`postgres::PgConnector`]: PostgreSQL via `sqlx` (requires the Cargo feature `postgres`)

pub mod ddl;
pub mod ident;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;
mod sql;

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataSet, Value};

pub use ident::{Ident, Layer, TableName};
pub use sqlite::SqliteWarehouse;

/// SQL flavor a [`Statement`] is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `$1, $2, ...` placeholders.
    Postgres,
    /// `?1, ?2, ...` placeholders.
    Sqlite,
}

impl Dialect {
    fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            Dialect::Sqlite => format!("?{n}"),
        }
    }

    fn placeholders(self, count: usize) -> String {
        (1..=count).map(|i| self.placeholder(i)).collect::<Vec<_>>().join(", ")
    }
}

/// The closed set of statements the pipeline issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// One DDL statement, externally owned text, executed verbatim. Takes no params.
    Ddl(String),
    /// Insert one row; params are the row values in `columns` order.
    Insert { table: TableName, columns: Vec<Ident> },
    /// Return the `key` column of rows whose key is one of the params.
    SelectKeys { table: TableName, key: Ident },
    /// Return every row of `table`, all columns.
    SelectAll { table: TableName },
    /// Return a single `table_name` column listing the tables of `layer`, sorted.
    ListTables { layer: Layer },
}

impl Statement {
    /// Render for `dialect` with placeholders for `param_count` params.
    pub fn to_sql(&self, dialect: Dialect, param_count: usize) -> String {
        match self {
            Statement::Ddl(text) => text.clone(),
            Statement::Insert { table, columns } => {
                let cols = columns.iter().map(Ident::as_str).collect::<Vec<_>>().join(", ");
                format!(
                    "INSERT INTO {table} ({cols}) VALUES ({})",
                    dialect.placeholders(param_count)
                )
            }
            Statement::SelectKeys { table, key } => {
                if param_count == 0 {
                    format!("SELECT {key} FROM {table} WHERE FALSE")
                } else {
                    format!(
                        "SELECT {key} FROM {table} WHERE {key} IN ({})",
                        dialect.placeholders(param_count)
                    )
                }
            }
            Statement::SelectAll { table } => format!("SELECT * FROM {table}"),
            Statement::ListTables { .. } => match dialect {
                Dialect::Postgres => "SELECT table_name::text AS table_name \
                     FROM information_schema.tables \
                     WHERE table_schema = current_schema() AND left(table_name, length($1)) = $1 \
                     ORDER BY table_name"
                    .to_string(),
                Dialect::Sqlite => "SELECT name AS table_name FROM sqlite_master \
                     WHERE type = 'table' AND substr(name, 1, length(?1)) = ?1 \
                     ORDER BY name"
                    .to_string(),
            },
        }
    }

    /// Extra params a statement shape binds implicitly (e.g. the layer prefix).
    pub fn implicit_params(&self) -> Vec<Value> {
        match self {
            Statement::ListTables { layer } => vec![Value::Utf8(layer.prefix().to_string())],
            _ => Vec::new(),
        }
    }
}

/// One exclusive database session.
///
/// Writes are transactional: nothing issued through [`Session::execute`] is visible to other
/// sessions until [`Session::commit`]. The session itself sees its own uncommitted writes.
pub trait Session {
    /// Execute a write or DDL statement; returns the number of affected rows.
    fn execute(&mut self, statement: &Statement, params: &[Value]) -> PipelineResult<u64>;

    /// Execute a read statement.
    fn query(&mut self, statement: &Statement, params: &[Value]) -> PipelineResult<DataSet>;

    fn commit(&mut self) -> PipelineResult<()>;

    fn rollback(&mut self) -> PipelineResult<()>;

    /// Release the session. Uncommitted work is discarded. Calling twice is a no-op.
    fn close(&mut self) -> PipelineResult<()>;
}

/// Factory for sessions against one warehouse.
pub trait Connector {
    /// Open a new session; failures are [`PipelineError::Connection`].
    fn connect(&self) -> PipelineResult<Box<dyn Session>>;

    /// Human-readable target description for logs (never includes credentials).
    fn target(&self) -> String;
}

/// A session that is closed when the scope ends, whatever the exit path.
pub struct SessionScope {
    session: Box<dyn Session>,
    closed: bool,
}

impl SessionScope {
    /// Open a session through `connector`.
    pub fn open(connector: &dyn Connector) -> PipelineResult<Self> {
        Ok(Self {
            session: connector.connect()?,
            closed: false,
        })
    }

    /// Close explicitly, surfacing the close error instead of discarding it.
    pub fn close(mut self) -> PipelineResult<()> {
        self.closed = true;
        self.session.close()
    }
}

impl Deref for SessionScope {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for SessionScope {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl Drop for SessionScope {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.session.close();
        }
    }
}

impl fmt::Debug for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionScope").field("closed", &self.closed).finish()
    }
}

/// Run every statement of a DDL script, each followed by its own commit.
///
/// Stops at the first failing statement: that statement is rolled back and reported as
/// [`PipelineError::Statement`]. Statements before it stay committed. Returns the number of
/// statements executed.
pub fn execute_ddl(session: &mut dyn Session, script: &str) -> PipelineResult<usize> {
    let statements = ddl::split_statements(script);
    for (i, text) in statements.iter().enumerate() {
        let result = session
            .execute(&Statement::Ddl(text.clone()), &[])
            .and_then(|_| session.commit());
        if let Err(e) = result {
            let _ = session.rollback();
            return Err(PipelineError::Statement {
                message: format!("ddl statement {} ('{}') failed: {e}", i + 1, ddl::summarize(text)),
            });
        }
    }
    Ok(statements.len())
}
