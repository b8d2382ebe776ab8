use std::path::PathBuf;

use thiserror::Error;

/// Convenience result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error type shared by every pipeline component.
///
/// Variants fall into four scopes: stage-scoped (`Connection`, DDL failures reported as
/// `Statement`), table-scoped (`SourceRead`, `SchemaMismatch`, `Load`), row-scoped
/// (`Parse`, `Validation`) and process-scoped (`Config`).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reading or writing error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// A warehouse session could not be opened or was used after close.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// A tabular source file could not be read.
    #[error("failed to read source '{}': {message}", path.display())]
    SourceRead { path: PathBuf, message: String },

    /// Records do not have the shape an operation requires (missing columns, etc.).
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    /// A value could not be parsed into the required type.
    #[error("failed to parse value at row {row} column '{column}': {message} (raw='{raw}')")]
    Parse {
        row: usize,
        column: String,
        raw: String,
        message: String,
    },

    /// A record parsed, but violates a domain rule.
    #[error("invalid record at row {row}: {message}")]
    Validation { row: usize, message: String },

    /// The warehouse rejected a statement.
    #[error("statement failed: {message}")]
    Statement { message: String },

    /// An insert violated a table constraint.
    #[error("constraint violation on '{table}': {message}")]
    ConstraintViolation { table: String, message: String },

    /// A table or column identifier failed validation.
    #[error("invalid identifier '{ident}': {message}")]
    InvalidIdentifier { ident: String, message: String },

    /// A batch load was rolled back.
    #[error("load into '{table}' rolled back{}: {source}", key.as_ref().map(|k| format!(" at key {k}")).unwrap_or_default())]
    Load {
        table: String,
        key: Option<String>,
        #[source]
        source: Box<PipelineError>,
    },

    /// A configuration option has an invalid value.
    #[error("invalid configuration for {key}: {message}")]
    Config { key: String, message: String },

    /// Database driver error.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl PipelineError {
    /// Wrap `source` as a rolled-back load of `table`.
    pub fn load(table: impl Into<String>, key: Option<String>, source: PipelineError) -> Self {
        Self::Load {
            table: table.into(),
            key,
            source: Box::new(source),
        }
    }
}
