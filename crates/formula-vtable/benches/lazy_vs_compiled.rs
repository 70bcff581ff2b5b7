use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use formula_vtable::{
    AggregateOp, BuiltinAggregate, ColumnSelection, ColumnarSchema, CompileOptions,
    CompiledExecutor, Cursor, DataKind, InMemoryTable, InMemoryTableBuilder, LazyExecutor, MapFn,
    RowAccessible, RowRangeSelection, Selection, SourceId, Value, VirtualTable,
    VirtualTableExecutor,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn bench_rows() -> usize {
    std::env::var("FORMULA_VTABLE_BENCH_ROWS")
        .ok()
        .and_then(|v| v.replace('_', "").parse::<usize>().ok())
        .filter(|&v| (1_000..=10_000_000).contains(&v))
        .unwrap_or(200_000)
}

fn build_table(rows: usize) -> InMemoryTable {
    let schema = ColumnarSchema::of_kinds([DataKind::Long, DataKind::Double, DataKind::String]);
    let mut builder = InMemoryTableBuilder::new(schema);
    for i in 0..rows {
        builder
            .push_row(vec![
                Value::from(i as i64),
                Value::from((i % 1_000) as f64 / 10.0),
                Value::from(format!("row-{}", i % 64)),
            ])
            .unwrap();
    }
    builder.finish()
}

fn pipeline(half: &InMemoryTable) -> VirtualTable {
    let scale = MapFn::new(ColumnarSchema::of_kinds([DataKind::Double]), |values| {
        Ok(vec![match &values[0] {
            Value::Double(v) => Value::from(v.into_inner() * 1.5),
            _ => Value::Missing,
        }])
    });
    let first = VirtualTable::from_table("first", half);
    let second = VirtualTable::from_table("second", half);
    first
        .concatenate(&[&second])
        .unwrap()
        .map(&[1], scale)
        .unwrap()
        .aggregate(
            &[0],
            BuiltinAggregate::new(AggregateOp::Sum, &DataKind::Double).unwrap(),
        )
        .unwrap()
}

fn drain(table: &dyn RowAccessible, selection: &Selection) -> usize {
    let mut cursor = table.create_cursor(selection).unwrap();
    let mut rows = 0;
    while cursor.forward().unwrap() {
        black_box(cursor.access().values());
        rows += 1;
    }
    cursor.close().unwrap();
    rows
}

fn bench_lazy_vs_compiled(c: &mut Criterion) {
    let rows = bench_rows();
    let half = build_table(rows / 2);
    let sources: HashMap<SourceId, Arc<dyn RowAccessible>> = [
        (SourceId::new("first"), Arc::new(half.clone()) as Arc<dyn RowAccessible>),
        (SourceId::new("second"), Arc::new(half.clone()) as Arc<dyn RowAccessible>),
    ]
    .into_iter()
    .collect();

    let aggregated = pipeline(&half);
    let compiled = CompiledExecutor::new(
        &[aggregated.transform().clone()],
        CompileOptions::default(),
    )
    .unwrap();
    let lazy = LazyExecutor::new(aggregated.transform().clone());

    let mut group = c.benchmark_group("lazy_vs_compiled");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(rows as u64));

    group.bench_with_input(BenchmarkId::new("compile", rows), &rows, |b, _| {
        b.iter(|| {
            let executor = CompiledExecutor::new(
                &[aggregated.transform().clone()],
                CompileOptions::default(),
            )
            .unwrap();
            black_box(executor);
        })
    });

    for (name, executor) in [
        ("compiled_sum", &compiled as &dyn VirtualTableExecutor),
        ("lazy_sum", &lazy as &dyn VirtualTableExecutor),
    ] {
        group.bench_with_input(BenchmarkId::new(name, rows), &rows, |b, _| {
            b.iter(|| {
                let table = executor.execute(&sources).unwrap().remove(0);
                black_box(drain(table.as_ref(), &Selection::all()));
            })
        });
    }

    // A narrow window in the middle of the concatenation, chosen when the cursor is created.
    let window = Selection::new(
        ColumnSelection::of([1]),
        RowRangeSelection::range(rows as u64 / 2 - 50, rows as u64 / 2 + 50),
    );
    let scan = VirtualTable::from_table("first", &half)
        .concatenate(&[&VirtualTable::from_table("second", &half)])
        .unwrap();
    let compiled_scan =
        CompiledExecutor::new(&[scan.transform().clone()], CompileOptions::default()).unwrap();
    let lazy_scan = LazyExecutor::new(scan.transform().clone());
    for (name, executor) in [
        ("compiled_window", &compiled_scan as &dyn VirtualTableExecutor),
        ("lazy_window", &lazy_scan as &dyn VirtualTableExecutor),
    ] {
        group.bench_with_input(BenchmarkId::new(name, rows), &rows, |b, _| {
            b.iter(|| {
                let table = executor.execute(&sources).unwrap().remove(0);
                black_box(drain(table.as_ref(), &window));
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_lazy_vs_compiled);
criterion_main!(benches);
