//! Pipeline configuration, read from environment variables.
//!
//! Every option has a default, so an empty environment yields a usable configuration that points
//! at the conventional `source/` directory and `sql/` DDL files.

use std::fmt;
use std::path::PathBuf;

use crate::error::{PipelineError, PipelineResult};
use crate::transform::dates::DEFAULT_DATE_FORMATS;

/// Warehouse implementation the binary connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// SQLite database file at `warehouse_path` (or in memory for `:memory:`).
    Sqlite,
    /// PostgreSQL through `sqlx` (requires the `postgres` feature).
    Postgres,
}

impl Backend {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(Backend::Sqlite),
            "postgres" | "postgresql" => Some(Backend::Postgres),
            _ => None,
        }
    }
}

/// Runtime options for a pipeline run.
#[derive(Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Directory scanned for `*.csv` source files.
    pub source_path: PathBuf,
    pub db_host: String,
    pub db_port: u16,
    /// Database name.
    pub db_schema: String,
    pub db_user: String,
    pub db_password: String,
    pub staging_ddl_path: PathBuf,
    pub warehouse_ddl_path: PathBuf,
    pub mart_ddl_path: PathBuf,
    /// Where the weekly attendance CSV is written.
    pub report_path: PathBuf,
    /// `chrono` formats tried in order when parsing source dates.
    pub date_formats: Vec<String>,
    /// Keys per existence-check query in the loader.
    pub load_chunk_size: usize,
    pub backend: Backend,
    /// SQLite database file; `:memory:` keeps the warehouse in memory for one run.
    pub warehouse_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("source/"),
            db_host: "psql_db".to_string(),
            db_port: 5432,
            db_schema: "university_db".to_string(),
            db_user: "dataengineer".to_string(),
            db_password: "secret".to_string(),
            staging_ddl_path: PathBuf::from("sql/stg_ddl.sql"),
            warehouse_ddl_path: PathBuf::from("sql/wh_ddl.sql"),
            mart_ddl_path: PathBuf::from("sql/mart_ddl.sql"),
            report_path: PathBuf::from("weekly_attendance_report.csv"),
            date_formats: DEFAULT_DATE_FORMATS.iter().map(|f| f.to_string()).collect(),
            load_chunk_size: 500,
            backend: Backend::Sqlite,
            warehouse_path: PathBuf::from("warehouse.db"),
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("source_path", &self.source_path)
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_schema", &self.db_schema)
            .field("db_user", &self.db_user)
            .field("db_password", &"<redacted>")
            .field("staging_ddl_path", &self.staging_ddl_path)
            .field("warehouse_ddl_path", &self.warehouse_ddl_path)
            .field("mart_ddl_path", &self.mart_ddl_path)
            .field("report_path", &self.report_path)
            .field("date_formats", &self.date_formats)
            .field("load_chunk_size", &self.load_chunk_size)
            .field("backend", &self.backend)
            .field("warehouse_path", &self.warehouse_path)
            .finish()
    }
}

impl PipelineConfig {
    /// Build from the process environment.
    pub fn from_env() -> PipelineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PipelineResult<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(v) = get("SOURCE_PATH") {
            cfg.source_path = PathBuf::from(v);
        }
        if let Some(v) = get("DB_HOST") {
            cfg.db_host = v;
        }
        if let Some(v) = get("DB_PORT") {
            cfg.db_port = v.trim().parse().map_err(|_| PipelineError::Config {
                key: "DB_PORT".to_string(),
                message: format!("'{v}' is not a valid port"),
            })?;
        }
        if let Some(v) = get("DB_SCHEMA") {
            cfg.db_schema = v;
        }
        if let Some(v) = get("DB_USER") {
            cfg.db_user = v;
        }
        if let Some(v) = lookup("DB_PASSWORD") {
            cfg.db_password = v;
        }
        if let Some(v) = get("STAGING_DDL_PATH") {
            cfg.staging_ddl_path = PathBuf::from(v);
        }
        if let Some(v) = get("WAREHOUSE_DDL_PATH") {
            cfg.warehouse_ddl_path = PathBuf::from(v);
        }
        if let Some(v) = get("MART_DDL_PATH") {
            cfg.mart_ddl_path = PathBuf::from(v);
        }
        if let Some(v) = get("REPORT_PATH") {
            cfg.report_path = PathBuf::from(v);
        }
        if let Some(v) = get("SOURCE_DATE_FORMATS") {
            cfg.date_formats = v
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("LOAD_CHUNK_SIZE") {
            cfg.load_chunk_size = match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(PipelineError::Config {
                        key: "LOAD_CHUNK_SIZE".to_string(),
                        message: format!("'{v}' is not a positive integer"),
                    });
                }
            };
        }
        if let Some(v) = get("WAREHOUSE_BACKEND") {
            cfg.backend = Backend::parse(&v).ok_or_else(|| PipelineError::Config {
                key: "WAREHOUSE_BACKEND".to_string(),
                message: format!("unknown backend '{v}' (expected sqlite or postgres)"),
            })?;
        }
        if let Some(v) = get("WAREHOUSE_PATH") {
            cfg.warehouse_path = PathBuf::from(v);
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::{Backend, PipelineConfig};
    use crate::error::PipelineError;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.source_path, PathBuf::from("source/"));
        assert_eq!(cfg.db_port, 5432);
        assert_eq!(cfg.load_chunk_size, 500);
        assert_eq!(cfg.backend, Backend::Sqlite);
        assert_eq!(cfg.warehouse_path, PathBuf::from("warehouse.db"));
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = PipelineConfig::from_lookup(lookup(&[
            ("SOURCE_PATH", "/data/in"),
            ("DB_HOST", "localhost"),
            ("DB_PORT", "6543"),
            ("SOURCE_DATE_FORMATS", "%Y-%m-%d, %d/%m/%Y"),
            ("LOAD_CHUNK_SIZE", "50"),
            ("WAREHOUSE_BACKEND", "Postgres"),
            ("WAREHOUSE_PATH", "/var/lib/etl/campus.db"),
        ]))
        .unwrap();
        assert_eq!(cfg.source_path, PathBuf::from("/data/in"));
        assert_eq!(cfg.db_host, "localhost");
        assert_eq!(cfg.db_port, 6543);
        assert_eq!(cfg.date_formats, vec!["%Y-%m-%d", "%d/%m/%Y"]);
        assert_eq!(cfg.load_chunk_size, 50);
        assert_eq!(cfg.backend, Backend::Postgres);
        assert_eq!(cfg.warehouse_path, PathBuf::from("/var/lib/etl/campus.db"));
    }

    #[test]
    fn invalid_values_name_the_key() {
        let err = PipelineConfig::from_lookup(lookup(&[("DB_PORT", "99999")])).unwrap_err();
        assert!(matches!(err, PipelineError::Config { ref key, .. } if key == "DB_PORT"));

        let err = PipelineConfig::from_lookup(lookup(&[("LOAD_CHUNK_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, PipelineError::Config { ref key, .. } if key == "LOAD_CHUNK_SIZE"));

        let err = PipelineConfig::from_lookup(lookup(&[("WAREHOUSE_BACKEND", "oracle")])).unwrap_err();
        assert!(matches!(err, PipelineError::Config { ref key, .. } if key == "WAREHOUSE_BACKEND"));
    }

    #[test]
    fn debug_redacts_password() {
        let cfg = PipelineConfig::from_lookup(lookup(&[("DB_PASSWORD", "hunter2")])).unwrap();
        assert_eq!(cfg.db_password, "hunter2");
        let shown = format!("{cfg:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("<redacted>"));
    }
}
