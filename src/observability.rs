//! Observer hooks for pipeline progress, failures and alerts.
//!
//! The pipeline never prints directly. It reports [`PipelineEvent`]s and failures to a
//! [`PipelineObserver`]; failures at or above a configured [`Severity`] are also raised as alerts.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::json;

use crate::error::PipelineError;
use crate::pipeline::Stage;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    /// Informational event.
    Info,
    /// A record was skipped or altered; the batch continued.
    Warning,
    /// A table or statement failed; the stage continued.
    Error,
    /// Infrastructure failure (I/O, connection, configuration).
    Critical,
}

/// Progress events emitted while a pipeline runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    StageStarted {
        stage: Stage,
    },
    StageFinished {
        stage: Stage,
        succeeded: bool,
        tables: usize,
    },
    DdlApplied {
        stage: Stage,
        path: PathBuf,
        statements: usize,
    },
    TableLoaded {
        stage: Stage,
        table: String,
        inserted: usize,
        skipped: usize,
    },
    RowRejected {
        stage: Stage,
        table: String,
        reason: String,
    },
    ValueCoerced {
        stage: Stage,
        table: String,
        row: usize,
        column: String,
        raw: String,
    },
    DuplicatesDropped {
        stage: Stage,
        table: String,
        count: usize,
    },
    ReportWritten {
        path: PathBuf,
        rows: usize,
    },
}

impl PipelineEvent {
    /// Severity the event is reported at.
    pub fn severity(&self) -> Severity {
        match self {
            PipelineEvent::RowRejected { .. } | PipelineEvent::ValueCoerced { .. } => Severity::Warning,
            PipelineEvent::StageFinished { succeeded: false, .. } => Severity::Error,
            _ => Severity::Info,
        }
    }
}

/// Where a failure happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureContext {
    pub stage: Stage,
    /// `None` for stage-level failures (connection, DDL).
    pub table: Option<String>,
}

impl FailureContext {
    pub fn stage(stage: Stage) -> Self {
        Self { stage, table: None }
    }

    pub fn table(stage: Stage, table: impl Into<String>) -> Self {
        Self {
            stage,
            table: Some(table.into()),
        }
    }
}

/// Observer interface for pipeline outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait PipelineObserver: Send + Sync {
    /// Called for every progress event.
    fn on_event(&self, _event: &PipelineEvent) {}

    /// Called when a stage or table fails.
    fn on_failure(&self, _ctx: &FailureContext, _severity: Severity, _error: &PipelineError) {}

    /// Called when a failure meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &FailureContext, severity: Severity, error: &PipelineError) {
        self.on_failure(ctx, severity, error)
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl CompositeObserver {
    /// Create a new composite observer from a list of observers.
    pub fn new(observers: Vec<Arc<dyn PipelineObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl PipelineObserver for CompositeObserver {
    fn on_event(&self, event: &PipelineEvent) {
        for o in &self.observers {
            o.on_event(event);
        }
    }

    fn on_failure(&self, ctx: &FailureContext, severity: Severity, error: &PipelineError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &FailureContext, severity: Severity, error: &PipelineError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Logs pipeline events to stderr.
#[derive(Debug, Default)]
pub struct StdErrObserver;

impl PipelineObserver for StdErrObserver {
    fn on_event(&self, event: &PipelineEvent) {
        eprintln!("[etl][{:?}] {}", event.severity(), describe(event));
    }

    fn on_failure(&self, ctx: &FailureContext, severity: Severity, error: &PipelineError) {
        eprintln!(
            "[etl][{:?}] stage={} table={} err={}",
            severity,
            ctx.stage,
            ctx.table.as_deref().unwrap_or("-"),
            error
        );
    }

    fn on_alert(&self, ctx: &FailureContext, severity: Severity, error: &PipelineError) {
        eprintln!(
            "[ALERT][etl][{:?}] stage={} table={} err={}",
            severity,
            ctx.stage,
            ctx.table.as_deref().unwrap_or("-"),
            error
        );
    }
}

fn describe(event: &PipelineEvent) -> String {
    match event {
        PipelineEvent::StageStarted { stage } => format!("stage={stage} started"),
        PipelineEvent::StageFinished {
            stage,
            succeeded,
            tables,
        } => format!("stage={stage} finished ok={succeeded} tables={tables}"),
        PipelineEvent::DdlApplied {
            stage,
            path,
            statements,
        } => format!("stage={stage} ddl={} statements={statements}", path.display()),
        PipelineEvent::TableLoaded {
            stage,
            table,
            inserted,
            skipped,
        } => format!("stage={stage} table={table} inserted={inserted} skipped={skipped}"),
        PipelineEvent::RowRejected { stage, table, reason } => {
            format!("stage={stage} table={table} rejected: {reason}")
        }
        PipelineEvent::ValueCoerced {
            stage,
            table,
            row,
            column,
            raw,
        } => format!("stage={stage} table={table} row={row} column={column} raw='{raw}' coerced to null"),
        PipelineEvent::DuplicatesDropped { stage, table, count } => {
            format!("stage={stage} table={table} dropped {count} duplicate rows")
        }
        PipelineEvent::ReportWritten { path, rows } => format!("report={} rows={rows}", path.display()),
    }
}

/// Appends pipeline events to a local log file, one JSON object per line.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &serde_json::Value) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{line}");
        }
    }

    fn append_failure(&self, kind: &str, ctx: &FailureContext, severity: Severity, error: &PipelineError) {
        self.append_line(&json!({
            "ts": unix_ts(),
            "kind": kind,
            "severity": severity,
            "context": ctx,
            "error": error.to_string(),
        }));
    }
}

impl PipelineObserver for FileObserver {
    fn on_event(&self, event: &PipelineEvent) {
        self.append_line(&json!({
            "ts": unix_ts(),
            "kind": "event",
            "severity": event.severity(),
            "detail": event,
        }));
    }

    fn on_failure(&self, ctx: &FailureContext, severity: Severity, error: &PipelineError) {
        self.append_failure("failure", ctx, severity, error);
    }

    fn on_alert(&self, ctx: &FailureContext, severity: Severity, error: &PipelineError) {
        self.append_failure("alert", ctx, severity, error);
    }
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Severity a failure is reported at.
pub fn severity_for_error(e: &PipelineError) -> Severity {
    match e {
        PipelineError::Io(_) | PipelineError::Connection { .. } | PipelineError::Config { .. } => {
            Severity::Critical
        }
        PipelineError::Csv(err) => match err.kind() {
            ::csv::ErrorKind::Io(_) => Severity::Critical,
            _ => Severity::Error,
        },
        PipelineError::Parse { .. } | PipelineError::Validation { .. } => Severity::Warning,
        PipelineError::SourceRead { .. }
        | PipelineError::SchemaMismatch { .. }
        | PipelineError::Statement { .. }
        | PipelineError::ConstraintViolation { .. }
        | PipelineError::InvalidIdentifier { .. } => Severity::Error,
        PipelineError::Load { source, .. } => severity_for_error(source).max(Severity::Error),
        PipelineError::Sqlx(err) => match err {
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Severity::Critical
            }
            _ => Severity::Error,
        },
    }
}

/// Routes failures to an observer, raising alerts at or above a threshold.
#[derive(Clone)]
pub struct Notifier {
    observer: Arc<dyn PipelineObserver>,
    alert_at_or_above: Severity,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl Notifier {
    pub fn new(observer: Arc<dyn PipelineObserver>, alert_at_or_above: Severity) -> Self {
        Self {
            observer,
            alert_at_or_above,
        }
    }

    pub fn event(&self, event: PipelineEvent) {
        self.observer.on_event(&event);
    }

    /// Report `error` and return its severity.
    pub fn failure(&self, ctx: &FailureContext, error: &PipelineError) -> Severity {
        let severity = severity_for_error(error);
        self.observer.on_failure(ctx, severity, error);
        if severity >= self.alert_at_or_above {
            self.observer.on_alert(ctx, severity, error);
        }
        severity
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{
        severity_for_error, CompositeObserver, FailureContext, FileObserver, Notifier, PipelineEvent,
        PipelineObserver, Severity,
    };
    use crate::error::PipelineError;
    use crate::pipeline::Stage;

    #[derive(Default)]
    struct Recording {
        failures: Mutex<Vec<Severity>>,
        alerts: Mutex<Vec<Severity>>,
    }

    impl PipelineObserver for Recording {
        fn on_failure(&self, _ctx: &FailureContext, severity: Severity, _error: &PipelineError) {
            self.failures.lock().unwrap().push(severity);
        }

        fn on_alert(&self, _ctx: &FailureContext, severity: Severity, _error: &PipelineError) {
            self.alerts.lock().unwrap().push(severity);
        }
    }

    #[test]
    fn severities_follow_error_scope() {
        let conn = PipelineError::Connection {
            message: "refused".to_string(),
        };
        let row = PipelineError::Validation {
            row: 1,
            message: "bad".to_string(),
        };
        let load = PipelineError::load(
            "wh__courses",
            Some("3".to_string()),
            PipelineError::ConstraintViolation {
                table: "wh__courses".to_string(),
                message: "dup".to_string(),
            },
        );
        assert_eq!(severity_for_error(&conn), Severity::Critical);
        assert_eq!(severity_for_error(&row), Severity::Warning);
        assert_eq!(severity_for_error(&load), Severity::Error);
        assert_eq!(
            severity_for_error(&PipelineError::load("t", None, conn)),
            Severity::Critical
        );
    }

    #[test]
    fn alerts_fire_at_threshold() {
        let rec = Arc::new(Recording::default());
        let notifier = Notifier::new(rec.clone(), Severity::Critical);
        let ctx = FailureContext::stage(Stage::Extract);

        notifier.failure(
            &ctx,
            &PipelineError::Statement {
                message: "x".to_string(),
            },
        );
        notifier.failure(
            &ctx,
            &PipelineError::Connection {
                message: "down".to_string(),
            },
        );

        assert_eq!(*rec.failures.lock().unwrap(), vec![Severity::Error, Severity::Critical]);
        assert_eq!(*rec.alerts.lock().unwrap(), vec![Severity::Critical]);
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let event = PipelineEvent::TableLoaded {
            stage: Stage::Transform,
            table: "wh__courses".to_string(),
            inserted: 2,
            skipped: 1,
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["event"], "table_loaded");
        assert_eq!(v["stage"], "transform");
        assert_eq!(v["inserted"], 2);
        assert_eq!(event.severity(), Severity::Info);
    }

    #[test]
    fn composite_fans_out_to_a_jsonl_file() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("campus_etl_events_{nanos}.jsonl"));
        let rec = Arc::new(Recording::default());
        let observers: Vec<Arc<dyn PipelineObserver>> = vec![Arc::new(FileObserver::new(&path)), rec.clone()];
        let composite = CompositeObserver::new(observers);
        let notifier = Notifier::new(Arc::new(composite), Severity::Critical);

        notifier.event(PipelineEvent::TableLoaded {
            stage: Stage::Extract,
            table: "stg__courses".to_string(),
            inserted: 2,
            skipped: 0,
        });
        notifier.failure(
            &FailureContext::table(Stage::Extract, "stg__lecturers"),
            &PipelineError::Statement {
                message: "relation missing".to_string(),
            },
        );
        notifier.failure(
            &FailureContext::stage(Stage::Report),
            &PipelineError::Connection {
                message: "down".to_string(),
            },
        );

        let written = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        // The Critical failure is written once as a failure and once as an alert.
        let kinds: Vec<&str> = lines.iter().filter_map(|l| l["kind"].as_str()).collect();
        assert_eq!(kinds, vec!["event", "failure", "failure", "alert"]);
        assert_eq!(lines[0]["detail"]["event"], "table_loaded");
        assert_eq!(lines[0]["detail"]["inserted"], 2);
        assert_eq!(lines[1]["context"]["table"], "stg__lecturers");
        assert_eq!(lines[1]["severity"], "Error");
        assert_eq!(lines[3]["severity"], "Critical");
        assert!(lines[3]["context"]["table"].is_null());
        assert!(lines.iter().all(|l| l["ts"].is_u64()));

        // The second observer saw the same failures.
        assert_eq!(*rec.failures.lock().unwrap(), vec![Severity::Error, Severity::Critical]);
        assert_eq!(*rec.alerts.lock().unwrap(), vec![Severity::Critical]);
    }
}
