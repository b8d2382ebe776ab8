//! Weekly attendance aggregate and its CSV report.
//!
//! For every occurrence, attendance is the number of students recorded for that course on that
//! date, and enrollment is the number of students enrolled in the course. Occurrences are then
//! grouped by (semester, course, week) and the percentage of the sums is reported.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{DataSet, DataType, Field, Key, Schema, Value};

/// Fixed report header.
pub const REPORT_HEADER: [&str; 4] = ["course_name", "semester", "week_number", "attendance_percentage"];

/// Splits the academic year into two semesters.
///
/// Dates before `first_ends_before` are semester 1, dates after `second_starts_after` are
/// semester 2, and the days in between belong to neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemesterCalendar {
    pub first_ends_before: NaiveDate,
    pub second_starts_after: NaiveDate,
}

impl Default for SemesterCalendar {
    fn default() -> Self {
        Self {
            first_ends_before: NaiveDate::from_ymd_opt(2019, 12, 31).unwrap_or_default(),
            second_starts_after: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
        }
    }
}

impl SemesterCalendar {
    pub fn semester(&self, date: NaiveDate) -> Option<u8> {
        if date < self.first_ends_before {
            Some(1)
        } else if date > self.second_starts_after {
            Some(2)
        } else {
            None
        }
    }
}

/// One report row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyAttendance {
    #[serde(skip)]
    pub course_id: Key,
    pub course_name: Option<String>,
    pub semester: Option<u8>,
    pub week_number: u32,
    pub attendance_percentage: f64,
}

impl WeeklyAttendance {
    /// Stable identity of the row in the mart table.
    pub fn week_key(&self) -> String {
        let semester = self.semester.map_or_else(|| "na".to_string(), |s| s.to_string());
        format!("{}-{}-{}", self.course_id, semester, self.week_number)
    }
}

/// Warehouse tables the aggregate reads.
#[derive(Debug, Clone, Copy)]
pub struct AggregateInputs<'a> {
    pub occurrences: &'a DataSet,
    pub attendances: &'a DataSet,
    pub enrollments: &'a DataSet,
    pub courses: &'a DataSet,
}

fn column(ds: &DataSet, table: &str, name: &str) -> PipelineResult<usize> {
    ds.schema.index_of(name).ok_or_else(|| PipelineError::SchemaMismatch {
        message: format!(
            "{table} is missing column '{name}'. columns={:?}",
            ds.schema.field_names().collect::<Vec<_>>()
        ),
    })
}

// Every row must be as wide as its schema before the aggregate indexes into it.
fn check_rows(ds: &DataSet, table: &str) -> PipelineResult<()> {
    ds.check_row_widths().map_err(|e| match e {
        PipelineError::SchemaMismatch { message } => PipelineError::SchemaMismatch {
            message: format!("{table}: {message}"),
        },
        other => other,
    })
}

// Join keys compare numerically when the text is numeric.
fn join_key(value: &Value) -> Option<Key> {
    match value {
        Value::Utf8(s) => match s.trim().parse::<i64>() {
            Ok(v) => Some(Key::Int(v)),
            Err(_) => Key::from_value(value),
        },
        other => Key::from_value(other),
    }
}

/// Compute the weekly attendance aggregate, ordered by semester (unassigned last), course and week.
pub fn weekly_attendance(inputs: AggregateInputs<'_>, calendar: &SemesterCalendar) -> PipelineResult<Vec<WeeklyAttendance>> {
    let AggregateInputs {
        occurrences,
        attendances,
        enrollments,
        courses,
    } = inputs;
    for (ds, table) in [
        (occurrences, "occurrences"),
        (attendances, "attendances"),
        (enrollments, "enrollments"),
        (courses, "courses"),
    ] {
        check_rows(ds, table)?;
    }

    let a_sched = column(attendances, "attendances", "schedule_id")?;
    let a_student = column(attendances, "attendances", "student_id")?;
    let a_date = column(attendances, "attendances", "attend_dt")?;
    let mut attended: HashMap<(Key, NaiveDate), u64> = HashMap::new();
    for row in &attendances.rows {
        if row[a_student].is_null() {
            continue;
        }
        if let (Some(k), Some(d)) = (join_key(&row[a_sched]), row[a_date].as_date()) {
            *attended.entry((k, d)).or_default() += 1;
        }
    }

    let e_sched = column(enrollments, "enrollments", "schedule_id")?;
    let e_student = column(enrollments, "enrollments", "student_id")?;
    let mut enrolled: HashMap<Key, u64> = HashMap::new();
    for row in &enrollments.rows {
        if row[e_student].is_null() {
            continue;
        }
        if let Some(k) = join_key(&row[e_sched]) {
            *enrolled.entry(k).or_default() += 1;
        }
    }

    let c_id = column(courses, "courses", "id")?;
    let c_name = column(courses, "courses", "name")?;
    let mut names: HashMap<Key, Option<String>> = HashMap::new();
    for row in &courses.rows {
        if let Some(k) = join_key(&row[c_id]) {
            let name = (!row[c_name].is_null()).then(|| row[c_name].to_string());
            names.entry(k).or_insert(name);
        }
    }

    let o_course = column(occurrences, "occurrences", "course_id")?;
    let o_date = column(occurrences, "occurrences", "schedule_date")?;
    let o_week = column(occurrences, "occurrences", "week_number")?;

    // (semester, course, week) -> (attended, enrolled), in first-seen order.
    let mut index: HashMap<(Option<u8>, Key, u32), usize> = HashMap::new();
    let mut groups: Vec<((Option<u8>, Key, u32), u64, u64)> = Vec::new();
    for row in &occurrences.rows {
        let Some(course) = join_key(&row[o_course]) else {
            continue;
        };
        let Some(week) = row[o_week].as_i64().and_then(|w| u32::try_from(w).ok()) else {
            continue;
        };
        let date = row[o_date].as_date();
        let semester = date.and_then(|d| calendar.semester(d));
        let att = date
            .and_then(|d| attended.get(&(course.clone(), d)).copied())
            .unwrap_or(0);
        let enr = enrolled.get(&course).copied().unwrap_or(0);

        let key = (semester, course, week);
        let slot = match index.get(&key) {
            Some(i) => *i,
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, 0, 0));
                groups.len() - 1
            }
        };
        groups[slot].1 += att;
        groups[slot].2 += enr;
    }

    let mut rows: Vec<WeeklyAttendance> = groups
        .into_iter()
        .filter(|(_, _, enr)| *enr > 0)
        .map(|((semester, course_id, week_number), att, enr)| WeeklyAttendance {
            course_name: names.get(&course_id).cloned().flatten(),
            course_id,
            semester,
            week_number,
            attendance_percentage: round2(att as f64 / enr as f64 * 100.0),
        })
        .collect();
    rows.sort_by(|a, b| {
        (a.semester.is_none(), a.semester, &a.course_id, a.week_number).cmp(&(
            b.semester.is_none(),
            b.semester,
            &b.course_id,
            b.week_number,
        ))
    });
    Ok(rows)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Schema of the `mart__weekly_attendance` table.
pub fn mart_schema() -> Schema {
    Schema::new(vec![
        Field::new("week_key", DataType::Utf8),
        Field::new("course_name", DataType::Utf8),
        Field::new("semester", DataType::Int64),
        Field::new("week_number", DataType::Int64),
        Field::new("attendance_percentage", DataType::Float64),
    ])
}

/// Report rows as a record batch for the mart table, keyed on `week_key`.
pub fn to_mart_records(rows: &[WeeklyAttendance]) -> DataSet {
    let records = rows
        .iter()
        .map(|r| {
            vec![
                Value::Utf8(r.week_key()),
                r.course_name.clone().map_or(Value::Null, Value::Utf8),
                r.semester.map_or(Value::Null, |s| Value::Int64(i64::from(s))),
                Value::Int64(i64::from(r.week_number)),
                Value::Float64(r.attendance_percentage),
            ]
        })
        .collect();
    DataSet::new(mart_schema(), records)
}

/// Write `rows` as CSV with [`REPORT_HEADER`]. The header is written even when there are no rows.
pub fn write_report(path: impl AsRef<Path>, rows: &[WeeklyAttendance]) -> PipelineResult<usize> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_path(path.as_ref())?;
    wtr.write_record(REPORT_HEADER)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{round2, weekly_attendance, AggregateInputs, SemesterCalendar, WeeklyAttendance};
    use crate::error::PipelineError;
    use crate::types::{DataSet, DataType, Field, Key, Schema, Value};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn table(cols: &[(&str, DataType)], rows: Vec<Vec<Value>>) -> DataSet {
        DataSet::new(
            Schema::new(cols.iter().map(|(n, t)| Field::new(*n, *t)).collect()),
            rows,
        )
    }

    fn occurrences(rows: &[(i64, NaiveDate, i64)]) -> DataSet {
        table(
            &[
                ("course_id", DataType::Int64),
                ("schedule_date", DataType::Date),
                ("week_number", DataType::Int64),
            ],
            rows.iter()
                .map(|(c, dt, w)| vec![Value::Int64(*c), Value::Date(*dt), Value::Int64(*w)])
                .collect(),
        )
    }

    fn links(date_col: &str, rows: &[(i64, i64, Option<NaiveDate>)]) -> DataSet {
        table(
            &[
                ("student_id", DataType::Int64),
                ("schedule_id", DataType::Int64),
                (date_col, DataType::Date),
            ],
            rows.iter()
                .map(|(s, c, dt)| vec![Value::Int64(*s), Value::Int64(*c), dt.map_or(Value::Null, Value::Date)])
                .collect(),
        )
    }

    fn courses() -> DataSet {
        table(
            &[("id", DataType::Int64), ("name", DataType::Utf8)],
            vec![vec![Value::Int64(1), Value::Utf8("Algebra".to_string())]],
        )
    }

    #[test]
    fn semester_boundaries() {
        let cal = SemesterCalendar::default();
        assert_eq!(cal.semester(d(2019, 12, 30)), Some(1));
        assert_eq!(cal.semester(d(2019, 12, 31)), None);
        assert_eq!(cal.semester(d(2020, 1, 1)), None);
        assert_eq!(cal.semester(d(2020, 1, 2)), Some(2));
    }

    #[test]
    fn percentages_are_summed_per_week() {
        let occ = occurrences(&[
            (1, d(2019, 9, 2), 1),
            (1, d(2019, 9, 4), 1),
            (1, d(2019, 9, 9), 2),
            (2, d(2019, 9, 3), 1),
        ]);
        let enr = links(
            "enroll_dt",
            &[(10, 1, None), (11, 1, None), (12, 1, None)],
        );
        let att = links(
            "attend_dt",
            &[
                (10, 1, Some(d(2019, 9, 2))),
                (11, 1, Some(d(2019, 9, 2))),
                (10, 1, Some(d(2019, 9, 4))),
                (10, 1, Some(d(2019, 9, 9))),
            ],
        );
        let crs = courses();

        let rows = weekly_attendance(
            AggregateInputs {
                occurrences: &occ,
                attendances: &att,
                enrollments: &enr,
                courses: &crs,
            },
            &SemesterCalendar::default(),
        )
        .unwrap();

        // Course 2 has no enrollments and is dropped.
        assert_eq!(
            rows,
            vec![
                WeeklyAttendance {
                    course_id: Key::Int(1),
                    course_name: Some("Algebra".to_string()),
                    semester: Some(1),
                    week_number: 1,
                    attendance_percentage: 50.0,
                },
                WeeklyAttendance {
                    course_id: Key::Int(1),
                    course_name: Some("Algebra".to_string()),
                    semester: Some(1),
                    week_number: 2,
                    attendance_percentage: 33.33,
                },
            ]
        );
        assert_eq!(rows[1].week_key(), "1-1-2");
    }

    #[test]
    fn unassigned_semester_sorts_last() {
        let occ = occurrences(&[(1, d(2019, 12, 31), 1), (1, d(2020, 1, 6), 1), (1, d(2019, 12, 2), 1)]);
        let enr = links("enroll_dt", &[(10, 1, None)]);
        let att = links("attend_dt", &[]);
        let crs = courses();
        let rows = weekly_attendance(
            AggregateInputs {
                occurrences: &occ,
                attendances: &att,
                enrollments: &enr,
                courses: &crs,
            },
            &SemesterCalendar::default(),
        )
        .unwrap();
        let semesters: Vec<_> = rows.iter().map(|r| r.semester).collect();
        assert_eq!(semesters, vec![Some(1), Some(2), None]);
        assert_eq!(rows[2].week_key(), "1-na-1");
    }

    #[test]
    fn rounding_to_two_places() {
        assert_eq!(round2(200.0 / 3.0), 66.67);
        assert_eq!(round2(100.0), 100.0);
    }

    #[test]
    fn short_input_rows_are_a_schema_mismatch() {
        let occ = occurrences(&[(1, d(2019, 9, 2), 1)]);
        let enr = links("enroll_dt", &[(10, 1, None)]);
        let mut att = links("attend_dt", &[(10, 1, Some(d(2019, 9, 2)))]);
        att.rows[0].truncate(2);
        let crs = courses();

        let err = weekly_attendance(
            AggregateInputs {
                occurrences: &occ,
                attendances: &att,
                enrollments: &enr,
                courses: &crs,
            },
            &SemesterCalendar::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
        assert!(err.to_string().contains("attendances: row 1 has 2 values"));
    }
}
