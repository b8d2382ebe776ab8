//! `campus-etl` moves university course data from flat CSV files through a staging layer into a
//! warehouse layer, then produces a weekly attendance report.
//!
//! The pipeline runs three stages in order, each with its own warehouse session:
//!
//! 1. **Extract**: every `*.csv` under the source directory lands in `stg__<file stem>`.
//! 2. **Transform**: every `stg__` table goes through the [`transform::RuleSet`] into `wh__<name>`.
//!    Schedules are expanded into one row per class occurrence; enrollment and attendance dates
//!    are parsed; anything else is deduplicated by `id`.
//! 3. **Report**: the weekly attendance aggregate is stored in `mart__weekly_attendance` and
//!    written to a CSV file.
//!
//! Every load goes through the [`load::IdempotentLoader`]: records whose key is already present
//! are skipped, so re-running the pipeline over the same files adds nothing.
//!
//! ## Expanding a schedule
//!
//! Weekday codes are ISO: Monday = 1 ... Sunday = 7. Week numbers count 7-day blocks from the
//! schedule's own start date.
//!
//! ```rust
//! use campus_etl::transform::{expand, Schedule, WeekdaySet};
//! use campus_etl::types::Value;
//! use chrono::NaiveDate;
//!
//! let schedule = Schedule::new(
//!     Value::Int64(101),
//!     Value::Int64(7),
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2024, 1, 14).unwrap(),
//!     WeekdaySet::from_codes([1, 3]).unwrap(),
//! )
//! .unwrap();
//!
//! let weeks: Vec<(String, u32)> = expand(&schedule)
//!     .map(|o| (o.occurrence_date.to_string(), o.week_number))
//!     .collect();
//! assert_eq!(
//!     weeks,
//!     vec![
//!         ("2024-01-01".to_string(), 1),
//!         ("2024-01-03".to_string(), 1),
//!         ("2024-01-08".to_string(), 2),
//!         ("2024-01-10".to_string(), 2),
//!     ]
//! );
//! ```
//!
//! ## Running the pipeline
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use campus_etl::config::PipelineConfig;
//! use campus_etl::observability::StdErrObserver;
//! use campus_etl::pipeline::{connector_from_config, Pipeline};
//!
//! # fn main() -> Result<(), campus_etl::PipelineError> {
//! let config = PipelineConfig::from_env()?;
//! let connector = connector_from_config(&config)?;
//! let summary = Pipeline::new(config, connector)
//!     .with_observer(Arc::new(StdErrObserver))
//!     .run();
//! println!("clean={}", summary.is_clean());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`ingestion`]: source discovery and CSV reading
//! - [`transform`]: schedule expansion and per-entity rules
//! - [`load`]: idempotent batch loading
//! - [`warehouse`]: sessions, statements, SQLite and PostgreSQL backends
//! - [`report`]: weekly attendance aggregate and CSV writer
//! - [`pipeline`]: stage orchestration
//! - [`observability`]: observer hooks for events, failures and alerts
//! - [`config`]: environment-driven configuration
//! - [`types`]: schema and in-memory record batches
//! - [`error`]: the crate-wide error type

pub mod config;
pub mod error;
pub mod ingestion;
pub mod load;
pub mod observability;
pub mod pipeline;
pub mod report;
pub mod transform;
pub mod types;
pub mod warehouse;

pub use error::{PipelineError, PipelineResult};
