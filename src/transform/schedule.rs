//! Schedule records: a date range plus the weekdays a course meets on.
//!
//! Weekday codes follow ISO 8601 throughout the crate: Monday = 1 ... Sunday = 7.

use std::fmt;

use chrono::{Datelike, NaiveDate};

use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataSet, Value};

use super::dates::DateParser;

/// Source column names of a schedule record.
pub mod columns {
    pub const COURSE_ID: &str = "course_id";
    pub const LECTURER_ID: &str = "lecturer_id";
    pub const START: &str = "start_dt";
    pub const END: &str = "end_dt";
    pub const WEEKDAYS: &str = "course_days";
}

/// ISO weekday code of `date` (Monday = 1 ... Sunday = 7).
pub fn weekday_code(date: NaiveDate) -> u8 {
    date.weekday().number_from_monday() as u8
}

/// A non-empty set of weekday codes in `1..=7`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    /// Build a set from codes; `None` if the list is empty or any code is outside `1..=7`.
    pub fn from_codes(codes: impl IntoIterator<Item = i64>) -> Option<Self> {
        let mut bits = 0u8;
        for code in codes {
            if !(1..=7).contains(&code) {
                return None;
            }
            bits |= 1 << code;
        }
        (bits != 0).then_some(Self(bits))
    }

    pub fn contains(self, code: u8) -> bool {
        (1..=7).contains(&code) && self.0 & (1 << code) != 0
    }

    /// Codes in ascending order.
    pub fn codes(self) -> impl Iterator<Item = u8> {
        (1..=7u8).filter(move |c| self.contains(*c))
    }
}

impl fmt::Debug for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.codes()).finish()
    }
}

/// A recurring course schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub course_id: Value,
    pub lecturer_id: Value,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub weekdays: WeekdaySet,
}

impl Schedule {
    /// Build a schedule, enforcing `start_date <= end_date`.
    pub fn new(
        course_id: Value,
        lecturer_id: Value,
        start_date: NaiveDate,
        end_date: NaiveDate,
        weekdays: WeekdaySet,
    ) -> Option<Self> {
        (start_date <= end_date).then_some(Self {
            course_id,
            lecturer_id,
            start_date,
            end_date,
            weekdays,
        })
    }
}

/// Schedules parsed from a batch, plus the rows that were rejected.
#[derive(Debug, Default)]
pub struct ParsedSchedules {
    pub schedules: Vec<Schedule>,
    /// One [`PipelineError::Parse`] or [`PipelineError::Validation`] per rejected row.
    pub rejected: Vec<PipelineError>,
}

/// Parse every row of `records` into a [`Schedule`].
///
/// Missing columns or short rows fail the whole batch. Anything wrong with a single row rejects
/// only that row. Row numbers in errors are 1-based positions in the batch.
pub fn parse_schedules(records: &DataSet, dates: &DateParser) -> PipelineResult<ParsedSchedules> {
    records.check_row_widths()?;
    let idx = |name: &str| {
        records.schema.index_of(name).ok_or_else(|| PipelineError::SchemaMismatch {
            message: format!(
                "schedule records are missing column '{name}'. columns={:?}",
                records.schema.field_names().collect::<Vec<_>>()
            ),
        })
    };
    let course = idx(columns::COURSE_ID)?;
    let lecturer = idx(columns::LECTURER_ID)?;
    let start = idx(columns::START)?;
    let end = idx(columns::END)?;
    let weekdays = idx(columns::WEEKDAYS)?;

    let cols = [course, lecturer, start, end, weekdays];
    let mut out = ParsedSchedules::default();
    for (i, row) in records.rows.iter().enumerate() {
        match parse_row(i + 1, row, cols, dates) {
            Ok(schedule) => out.schedules.push(schedule),
            Err(e) => out.rejected.push(e),
        }
    }
    Ok(out)
}

fn parse_row(row_num: usize, row: &[Value], cols: [usize; 5], dates: &DateParser) -> PipelineResult<Schedule> {
    let [course, lecturer, start, end, weekdays] = cols;
    let start_date = parse_date(row_num, columns::START, &row[start], dates)?;
    let end_date = parse_date(row_num, columns::END, &row[end], dates)?;
    let set = parse_weekdays(row_num, &row[weekdays])?;
    Schedule::new(row[course].clone(), row[lecturer].clone(), start_date, end_date, set).ok_or_else(|| {
        PipelineError::Validation {
            row: row_num,
            message: format!("start date {start_date} is after end date {end_date}"),
        }
    })
}

fn parse_date(row: usize, column: &str, value: &Value, dates: &DateParser) -> PipelineResult<NaiveDate> {
    dates.parse(value).ok_or_else(|| PipelineError::Parse {
        row,
        column: column.to_string(),
        raw: value.to_string(),
        message: format!("expected a date matching one of {:?}", dates.formats()),
    })
}

/// Parse a weekday list: an integer, or comma-separated integers (`"1,3"`).
pub fn parse_weekdays(row: usize, value: &Value) -> PipelineResult<WeekdaySet> {
    let codes: Vec<i64> = match value {
        Value::Int64(v) => vec![*v],
        Value::Float64(_) => vec![value.as_i64().ok_or_else(|| weekday_parse_error(row, value))?],
        Value::Utf8(s) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| t.parse::<i64>().map_err(|_| weekday_parse_error(row, value)))
            .collect::<PipelineResult<_>>()?,
        _ => return Err(weekday_parse_error(row, value)),
    };

    WeekdaySet::from_codes(codes.iter().copied()).ok_or_else(|| PipelineError::Validation {
        row,
        message: format!("weekday set {codes:?} must be non-empty and within 1..=7 (Monday=1)"),
    })
}

fn weekday_parse_error(row: usize, value: &Value) -> PipelineError {
    PipelineError::Parse {
        row,
        column: columns::WEEKDAYS.to_string(),
        raw: value.to_string(),
        message: "expected comma-separated weekday codes".to_string(),
    }
}
