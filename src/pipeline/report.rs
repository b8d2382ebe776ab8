//! Report: weekly attendance aggregate into the mart table and the CSV report.

use crate::error::PipelineResult;
use crate::observability::PipelineEvent;
use crate::report::{to_mart_records, weekly_attendance, write_report, AggregateInputs};
use crate::types::DataSet;
use crate::warehouse::{Layer, Session, Statement, TableName};

use super::{Pipeline, StageRun};

const MART_TABLE: &str = "weekly_attendance";
const MART_KEY: &str = "week_key";

fn read_warehouse(session: &mut dyn Session, entity: &str) -> PipelineResult<DataSet> {
    let table = TableName::in_layer(Layer::Warehouse, entity)?;
    session.query(&Statement::SelectAll { table }, &[])
}

pub(super) fn run(pipeline: &Pipeline, session: &mut dyn Session, run: &mut StageRun<'_>) -> PipelineResult<()> {
    let occurrences = read_warehouse(session, "schedules")?;
    let attendances = read_warehouse(session, "attendances")?;
    let enrollments = read_warehouse(session, "enrollments")?;
    let courses = read_warehouse(session, "courses")?;

    let rows = weekly_attendance(
        AggregateInputs {
            occurrences: &occurrences,
            attendances: &attendances,
            enrollments: &enrollments,
            courses: &courses,
        },
        &pipeline.calendar,
    )?;

    let mart = TableName::in_layer(Layer::Mart, MART_TABLE)?;
    match pipeline.loader.load(session, &mart, &to_mart_records(&rows), MART_KEY) {
        Ok(result) => run.loaded(&mart, result),
        Err(e) => run.table_failed(mart.as_str(), &e),
    }

    let path = &pipeline.config.report_path;
    match write_report(path, &rows) {
        Ok(written) => run.event(PipelineEvent::ReportWritten {
            path: path.clone(),
            rows: written,
        }),
        Err(e) => run.table_failed(&path.display().to_string(), &e),
    }
    Ok(())
}
