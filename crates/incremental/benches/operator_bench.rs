//! Benchmarks for incremental operators.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rivulet_core::{Key, Value};
use rivulet_incremental::{
    consolidate, filter_deltas, JoinInput, JoinKind, JoinSide, JoinState, RowDelta,
};

fn row(id: i64, v: i64) -> Value {
    Value::object([("id", Value::Int(id)), ("v", Value::Int(v))])
}

fn bench_filter(c: &mut Criterion) {
    let batch: Vec<RowDelta> = (0..10_000)
        .map(|i| RowDelta::insert(Key::Int(i), row(i, i % 100)))
        .collect();
    c.bench_function("filter_10k", |b| {
        b.iter(|| {
            let out = filter_deltas(black_box(batch.clone()), |r| {
                r.field("v").and_then(Value::as_int).unwrap_or(0) > 50
            });
            black_box(out)
        })
    });
}

fn bench_consolidate(c: &mut Criterion) {
    let mut batch: Vec<RowDelta> = Vec::new();
    for i in 0..5_000 {
        batch.push(RowDelta::insert(Key::Int(i), row(i, i)));
        batch.push(RowDelta::delete(Key::Int(i), row(i, i)));
    }
    c.bench_function("consolidate_10k_cancelling", |b| {
        b.iter(|| black_box(consolidate(black_box(batch.clone()))))
    });
}

fn bench_join_probe(c: &mut Criterion) {
    c.bench_function("join_insert_probe", |b| {
        let mut join = JoinState::new(
            JoinKind::Inner,
            Box::new(|l, r| {
                Value::object([
                    ("l", l.cloned().unwrap_or(Value::Null)),
                    ("r", r.cloned().unwrap_or(Value::Null)),
                ])
            }),
        );
        let right: Vec<JoinInput> = (0..1_000)
            .map(|i| JoinInput::new(Value::Int(i % 100), RowDelta::insert(Key::Int(i), row(i, i))))
            .collect();
        join.push(JoinSide::Right, right);

        let mut next = 1_000_000i64;
        b.iter(|| {
            let input = JoinInput::new(
                Value::Int(next % 100),
                RowDelta::insert(Key::Int(next), row(next, next)),
            );
            next += 1;
            black_box(join.push(JoinSide::Left, vec![input]))
        })
    });
}

criterion_group!(benches, bench_filter, bench_consolidate, bench_join_probe);
criterion_main!(benches);
