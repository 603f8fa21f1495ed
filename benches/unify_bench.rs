//! Benchmarks for type unification.

use cellspec::trace::{ReturnKind, TraceLog, TraceObservation};
use cellspec::{Category, CellFacts, Diagnostics, RuntimeFacts, Value};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn observations(n: i64, ret: impl Fn(i64) -> Value) -> Vec<TraceObservation> {
    (0..n)
        .map(|t| TraceObservation {
            args: vec![("t".to_string(), Value::Int(t)), ("i".to_string(), Value::Int(t % 7))],
            value: ret(t),
            kind: ReturnKind::Return,
        })
        .collect()
}

fn bench_unify_uniform(c: &mut Criterion) {
    let obs = observations(1000, |t| Value::float(t as f64 * 0.5));

    c.bench_function("unify_uniform_1000", |b| {
        b.iter(|| {
            let mut diags = Diagnostics::new();
            CellFacts::unify("M._mx_classes._c_S._f_foo", black_box(&obs), &mut diags)
        })
    });
}

fn bench_unify_widening(c: &mut Criterion) {
    let obs = observations(1000, |t| match t % 3 {
        0 => Value::Int(t),
        1 => Value::float(t as f64),
        _ => Value::str("x"),
    });

    c.bench_function("unify_widening_1000", |b| {
        b.iter(|| {
            let mut diags = Diagnostics::new();
            CellFacts::unify("M._mx_classes._c_S._f_foo", black_box(&obs), &mut diags)
        })
    });
}

fn bench_unify_arrays(c: &mut Criterion) {
    let obs = observations(1000, |t| Value::array(Category::Real, 1 + (t % 2) as usize));

    c.bench_function("unify_arrays_1000", |b| {
        b.iter(|| {
            let mut diags = Diagnostics::new();
            CellFacts::unify("M._mx_classes._c_S._f_foo", black_box(&obs), &mut diags)
        })
    });
}

fn bench_runtime_facts(c: &mut Criterion) {
    let mut log = TraceLog::default();
    for cell in 0..50 {
        log.calls.insert(
            format!("M._mx_classes._c_S._f_cell{}", cell),
            observations(200, |t| Value::Int(t * cell)),
        );
    }

    c.bench_function("runtime_facts_50x200", |b| {
        b.iter(|| RuntimeFacts::from_log(black_box(&log)))
    });
}

criterion_group!(
    benches,
    bench_unify_uniform,
    bench_unify_widening,
    bench_unify_arrays,
    bench_runtime_facts,
);
criterion_main!(benches);
