//! Stage orchestration: Extract, Transform, Report.
//!
//! Each stage opens its own session through [`SessionScope`], applies its DDL file, then works
//! table by table. A table that fails is reported and skipped; a stage that fails (no connection,
//! DDL error) is reported and abandoned. Either way the next stage still runs.

mod extract;
mod report;
mod transform;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{Backend, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::load::{IdempotentLoader, LoadResult};
use crate::observability::{FailureContext, NoopObserver, Notifier, PipelineEvent, PipelineObserver, Severity};
use crate::report::SemesterCalendar;
use crate::transform::{DateParser, RuleSet};
use crate::warehouse::{execute_ddl, Connector, Session, SessionScope, SqliteWarehouse, TableName};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Transform,
    Report,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Extract, Stage::Transform, Stage::Report];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Extract => "extract",
            Stage::Transform => "transform",
            Stage::Report => "report",
        })
    }
}

/// How a stage ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    /// Some tables failed and were skipped.
    CompletedWithErrors { failed_tables: usize },
    /// The stage stopped early.
    Aborted { reason: String },
}

/// Load result for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableLoad {
    pub table: String,
    #[serde(flatten)]
    pub result: LoadResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub loads: Vec<TableLoad>,
}

impl StageReport {
    /// Load result for `table`, if this stage loaded it.
    pub fn load(&self, table: &str) -> Option<LoadResult> {
        self.loads.iter().find(|l| l.table == table).map(|l| l.result)
    }
}

/// Reports of every stage, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub stages: Vec<StageReport>,
}

impl PipelineSummary {
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// `true` when every stage completed without table failures.
    pub fn is_clean(&self) -> bool {
        self.stages.iter().all(|s| s.outcome == StageOutcome::Completed)
    }
}

/// Book-keeping for one running stage.
pub(crate) struct StageRun<'a> {
    stage: Stage,
    notifier: &'a Notifier,
    loads: Vec<TableLoad>,
    failed_tables: usize,
}

impl<'a> StageRun<'a> {
    fn new(stage: Stage, notifier: &'a Notifier) -> Self {
        Self {
            stage,
            notifier,
            loads: Vec::new(),
            failed_tables: 0,
        }
    }

    pub(crate) fn stage(&self) -> Stage {
        self.stage
    }

    pub(crate) fn event(&self, event: PipelineEvent) {
        self.notifier.event(event);
    }

    pub(crate) fn loaded(&mut self, table: &TableName, result: LoadResult) {
        self.event(PipelineEvent::TableLoaded {
            stage: self.stage,
            table: table.to_string(),
            inserted: result.inserted_count,
            skipped: result.skipped_count,
        });
        self.loads.push(TableLoad {
            table: table.to_string(),
            result,
        });
    }

    pub(crate) fn table_failed(&mut self, table: &str, error: &PipelineError) {
        self.notifier.failure(&FailureContext::table(self.stage, table), error);
        self.failed_tables += 1;
    }
}

/// The three-stage batch pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    connector: Box<dyn Connector>,
    notifier: Notifier,
    rules: RuleSet,
    loader: IdempotentLoader,
    calendar: SemesterCalendar,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("target", &self.connector.target())
            .field("loader", &self.loader)
            .field("calendar", &self.calendar)
            .finish()
    }
}

impl Pipeline {
    /// Create a pipeline writing to `connector`. Events are discarded until an observer is set.
    pub fn new(config: PipelineConfig, connector: Box<dyn Connector>) -> Self {
        let rules = RuleSet::new(DateParser::new(config.date_formats.clone()), "id");
        let loader = IdempotentLoader::new(config.load_chunk_size);
        Self {
            config,
            connector,
            notifier: Notifier::new(Arc::new(NoopObserver), Severity::Critical),
            rules,
            loader,
            calendar: SemesterCalendar::default(),
        }
    }

    /// Report events and failures to `observer`, alerting at `Critical`.
    pub fn with_observer(self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.with_alerting(observer, Severity::Critical)
    }

    /// Report to `observer`, raising alerts for failures at or above `alert_at_or_above`.
    pub fn with_alerting(mut self, observer: Arc<dyn PipelineObserver>, alert_at_or_above: Severity) -> Self {
        self.notifier = Notifier::new(observer, alert_at_or_above);
        self
    }

    pub fn with_calendar(mut self, calendar: SemesterCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run all stages in order. Never fails: problems are reported and recorded in the summary.
    pub fn run(&self) -> PipelineSummary {
        PipelineSummary {
            stages: Stage::ALL.iter().map(|s| self.run_stage(*s)).collect(),
        }
    }

    /// Run one stage in isolation.
    pub fn run_stage(&self, stage: Stage) -> StageReport {
        self.notifier.event(PipelineEvent::StageStarted { stage });
        let mut run = StageRun::new(stage, &self.notifier);

        let outcome = match self.try_stage(&mut run) {
            Ok(()) if run.failed_tables == 0 => StageOutcome::Completed,
            Ok(()) => StageOutcome::CompletedWithErrors {
                failed_tables: run.failed_tables,
            },
            Err(e) => {
                self.notifier.failure(&FailureContext::stage(stage), &e);
                StageOutcome::Aborted { reason: e.to_string() }
            }
        };

        self.notifier.event(PipelineEvent::StageFinished {
            stage,
            succeeded: outcome == StageOutcome::Completed,
            tables: run.loads.len(),
        });
        StageReport {
            stage,
            outcome,
            loads: run.loads,
        }
    }

    fn try_stage(&self, run: &mut StageRun<'_>) -> PipelineResult<()> {
        let stage = run.stage();
        let mut session = SessionScope::open(self.connector.as_ref())?;

        let ddl_path = match stage {
            Stage::Extract => &self.config.staging_ddl_path,
            Stage::Transform => &self.config.warehouse_ddl_path,
            Stage::Report => &self.config.mart_ddl_path,
        };
        let statements = apply_ddl_file(&mut *session, ddl_path)?;
        run.event(PipelineEvent::DdlApplied {
            stage,
            path: ddl_path.clone(),
            statements,
        });

        match stage {
            Stage::Extract => extract::run(self, &mut *session, run)?,
            Stage::Transform => transform::run(self, &mut *session, run)?,
            Stage::Report => report::run(self, &mut *session, run)?,
        }
        session.close()
    }
}

/// Read a DDL script from `path` and execute it statement by statement.
pub fn apply_ddl_file(session: &mut dyn Session, path: &Path) -> PipelineResult<usize> {
    let script = std::fs::read_to_string(path).map_err(|e| PipelineError::SourceRead {
        path: path.to_path_buf(),
        message: format!("cannot read ddl file: {e}"),
    })?;
    execute_ddl(session, &script)
}

/// `WAREHOUSE_PATH` value that selects a throwaway in-memory SQLite warehouse.
pub const IN_MEMORY: &str = ":memory:";

/// Build the connector selected by `config.backend`.
pub fn connector_from_config(config: &PipelineConfig) -> PipelineResult<Box<dyn Connector>> {
    match config.backend {
        Backend::Sqlite if config.warehouse_path == Path::new(IN_MEMORY) => {
            Ok(Box::new(SqliteWarehouse::in_memory()?))
        }
        Backend::Sqlite => Ok(Box::new(SqliteWarehouse::open(&config.warehouse_path))),
        #[cfg(feature = "postgres")]
        Backend::Postgres => Ok(Box::new(crate::warehouse::postgres::PgConnector::from_config(config))),
        #[cfg(not(feature = "postgres"))]
        Backend::Postgres => Err(PipelineError::Config {
            key: "WAREHOUSE_BACKEND".to_string(),
            message: "this build does not include the postgres feature".to_string(),
        }),
    }
}
