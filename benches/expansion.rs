//! Throughput of schedule expansion and the per-entity rules.

use campus_etl::transform::{expand_all, EntityKind, RuleSet, Schedule, WeekdaySet};
use campus_etl::types::{DataSet, DataType, Field, Schema, Value};
use chrono::{Duration, NaiveDate};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::hint::black_box;

fn schedules(n: usize) -> Vec<Schedule> {
    let base = NaiveDate::from_ymd_opt(2019, 9, 2).unwrap();
    (0..n)
        .map(|i| {
            let start = base + Duration::days((i % 14) as i64);
            Schedule::new(
                Value::Int64(i as i64),
                Value::Int64(1),
                start,
                start + Duration::days(120),
                WeekdaySet::from_codes([1, 3, 5]).unwrap(),
            )
            .unwrap()
        })
        .collect()
}

fn staging_batch(n: usize) -> DataSet {
    DataSet::new(
        Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("course_id", DataType::Int64),
            Field::new("lecturer_id", DataType::Int64),
            Field::new("start_dt", DataType::Utf8),
            Field::new("end_dt", DataType::Utf8),
            Field::new("course_days", DataType::Utf8),
        ]),
        (0..n)
            .map(|i| {
                vec![
                    Value::Int64(i as i64),
                    Value::Int64(i as i64),
                    Value::Int64(1),
                    Value::Utf8("02-Sep-19".to_string()),
                    Value::Utf8("20-Dec-19".to_string()),
                    Value::Utf8("1,3,5".to_string()),
                ]
            })
            .collect(),
    )
}

fn bench_expand_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("expand_all");
    for size in [10usize, 100, 1000] {
        let input = schedules(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| black_box(expand_all(input).count()));
        });
    }
    group.finish();
}

fn bench_schedule_rule(c: &mut Criterion) {
    let rules = RuleSet::default();
    let mut group = c.benchmark_group("schedule_rule");
    for size in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || staging_batch(size),
                |batch| black_box(rules.transform(EntityKind::Schedule, batch).unwrap().records.row_count()),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_expand_all, bench_schedule_rule);
criterion_main!(benches);
