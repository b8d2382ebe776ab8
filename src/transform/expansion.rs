//! Date expansion: turns a recurring [`Schedule`] into one [`Occurrence`] per matching calendar day.
//!
//! Expansion is lazy. [`expand`] walks the range one day at a time and yields only the days whose
//! ISO weekday code is in the schedule's set, so memory stays flat regardless of range length.
//!
//! Week numbers count 7-day blocks from the schedule's own start date:
//! `week_number = floor((occurrence_date - start_date).days / 7) + 1`. They are not calendar weeks.

use chrono::NaiveDate;

use crate::types::{DataSet, DataType, Field, Schema, Value};

use super::schedule::{weekday_code, Schedule};

/// Output column names of the occurrence table.
pub mod columns {
    pub const ID: &str = "id";
    pub const COURSE_ID: &str = "course_id";
    pub const LECTURER_ID: &str = "lecturer_id";
    pub const START: &str = "start_dt";
    pub const END: &str = "end_dt";
    pub const WEEKDAY: &str = "course_day";
    pub const DATE: &str = "schedule_date";
    pub const WEEK: &str = "week_number";
}

/// A single dated instance of a schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    /// Dense 1-based sequence number within one expansion.
    pub id: u64,
    pub course_id: Value,
    pub lecturer_id: Value,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// ISO weekday code of `occurrence_date`.
    pub weekday: u8,
    pub occurrence_date: NaiveDate,
    pub week_number: u32,
}

/// Week number of `date` relative to `start` (day 0..=6 is week 1).
pub fn week_number(start: NaiveDate, date: NaiveDate) -> u32 {
    ((date - start).num_days() / 7 + 1) as u32
}

/// Lazy iterator returned by [`expand`].
#[derive(Debug, Clone)]
pub struct Expansion<'a> {
    schedule: &'a Schedule,
    cursor: Option<NaiveDate>,
    emitted: u64,
}

impl Iterator for Expansion<'_> {
    type Item = Occurrence;

    fn next(&mut self) -> Option<Occurrence> {
        while let Some(date) = self.cursor {
            if date > self.schedule.end_date {
                self.cursor = None;
                break;
            }
            self.cursor = date.succ_opt();

            let weekday = weekday_code(date);
            if !self.schedule.weekdays.contains(weekday) {
                continue;
            }
            self.emitted += 1;
            return Some(Occurrence {
                id: self.emitted,
                course_id: self.schedule.course_id.clone(),
                lecturer_id: self.schedule.lecturer_id.clone(),
                start_date: self.schedule.start_date,
                end_date: self.schedule.end_date,
                weekday,
                occurrence_date: date,
                week_number: week_number(self.schedule.start_date, date),
            });
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .cursor
            .map(|d| (self.schedule.end_date - d).num_days() + 1)
            .unwrap_or(0)
            .max(0) as usize;
        (0, Some(remaining))
    }
}

/// Expand one schedule in ascending date order. Ids start at 1.
pub fn expand(schedule: &Schedule) -> Expansion<'_> {
    Expansion {
        schedule,
        cursor: Some(schedule.start_date),
        emitted: 0,
    }
}

/// Expand schedules in input order, renumbering ids densely from 1 across the whole batch.
pub fn expand_all(schedules: &[Schedule]) -> impl Iterator<Item = Occurrence> + '_ {
    schedules.iter().flat_map(expand).zip(1u64..).map(|(mut occurrence, id)| {
        occurrence.id = id;
        occurrence
    })
}

/// Schema of the occurrence table. Identifier columns keep the type they had in the source.
pub fn occurrence_schema(course_id_type: DataType, lecturer_id_type: DataType) -> Schema {
    Schema::new(vec![
        Field::new(columns::ID, DataType::Int64),
        Field::new(columns::COURSE_ID, course_id_type),
        Field::new(columns::LECTURER_ID, lecturer_id_type),
        Field::new(columns::START, DataType::Date),
        Field::new(columns::END, DataType::Date),
        Field::new(columns::WEEKDAY, DataType::Int64),
        Field::new(columns::DATE, DataType::Date),
        Field::new(columns::WEEK, DataType::Int64),
    ])
}

/// Materialize occurrences into a record batch with [`occurrence_schema`].
pub fn occurrences_to_dataset(schema: Schema, occurrences: impl IntoIterator<Item = Occurrence>) -> DataSet {
    let rows = occurrences
        .into_iter()
        .map(|o| {
            vec![
                Value::Int64(o.id as i64),
                o.course_id,
                o.lecturer_id,
                Value::Date(o.start_date),
                Value::Date(o.end_date),
                Value::Int64(i64::from(o.weekday)),
                Value::Date(o.occurrence_date),
                Value::Int64(i64::from(o.week_number)),
            ]
        })
        .collect();
    DataSet::new(schema, rows)
}
