mod common;

use common::{sources, table, Events, RecordingTable};
use formula_vtable::cap::{compile, CapNode};
use formula_vtable::graph::NoopGraphLogger;
use formula_vtable::{
    AggregateOp, BuiltinAggregate, CapExecutor, ColumnSelection, CompileOptions, Cursor,
    CursorAssemblyPlan, DataKind, InMemoryTable, LazyExecutor, ObserveFn, RowAccessible,
    RowRangeSelection, Selection, SourceId, SourceProperties, Value, VirtualTable,
    VirtualTableExecutor, VtError,
};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};

fn mixed() -> InMemoryTable {
    table(
        &[DataKind::Int, DataKind::Double, DataKind::String],
        vec![
            vec![Value::from(1), Value::from(0.5), Value::from("x")],
            vec![Value::from(2), Value::from(1.25), Value::from("y")],
            vec![Value::from(3), Value::from(2.0), Value::from("z")],
        ],
    )
}

fn plan_of(pipeline: &VirtualTable) -> CursorAssemblyPlan {
    compile(
        pipeline.transform(),
        &CompileOptions::default(),
        &mut NoopGraphLogger,
    )
    .unwrap()
}

fn executor_of(pipeline: &VirtualTable) -> CapExecutor {
    CapExecutor::new(Arc::new(plan_of(pipeline)))
}

#[test]
fn filter_over_slice_compiles_into_a_narrowed_source() {
    let source = VirtualTable::from_table("src", &mixed());
    let pipeline = source.slice(1, 3).unwrap().select_columns(&[1]).unwrap();

    let plan = plan_of(&pipeline);
    assert_eq!(plan.len(), 2);
    let CapNode::Source { selection, .. } = &plan.nodes()[0] else {
        panic!("expected a source first, got {plan}");
    };
    assert_eq!(
        selection,
        &Selection::new(ColumnSelection::of([1]), RowRangeSelection::range(1, 3))
    );
    assert_eq!(
        plan.to_string(),
        "0: Source(src) cols=[1] rows=[1,3)\n1: Consumer <- [0] reads 0.1\n"
    );
}

#[test]
fn selected_and_sliced_rows_come_out_of_the_plan() {
    let data = mixed();
    let source = VirtualTable::from_table("src", &data);
    let pipeline = source.select_columns(&[1]).unwrap().slice(1, 2).unwrap();

    let table = executor_of(&pipeline)
        .execute(&sources([("src", Arc::new(data))]))
        .unwrap();
    assert_eq!(table.size(), Some(1));

    let mut cursor = table.cursor().unwrap();
    assert!(cursor.forward().unwrap());
    assert_eq!(cursor.access().values(), vec![Value::from(1.25)]);
    assert!(!cursor.forward().unwrap());
    cursor.close().unwrap();
}

#[test]
fn sum_over_doubles_yields_one_row() {
    let data = mixed();
    let source = VirtualTable::from_table("src", &data);
    let sum = BuiltinAggregate::new(AggregateOp::Sum, &DataKind::Double).unwrap();
    let pipeline = source.aggregate(&[1], sum).unwrap();
    assert_eq!(pipeline.schema().kind(0), Some(&DataKind::Double));

    let table = executor_of(&pipeline)
        .execute(&sources([("src", Arc::new(data))]))
        .unwrap();
    let mut cursor = table.cursor().unwrap();
    assert!(cursor.forward().unwrap());
    assert_eq!(cursor.access().values(), vec![Value::from(3.75)]);
    assert!(!cursor.forward().unwrap());
    cursor.close().unwrap();
}

#[test]
fn aggregates_over_no_rows() {
    let data = mixed();
    let empty = VirtualTable::from_table("src", &data).slice(3, 3).unwrap();
    let bound = sources([("src", Arc::new(data))]);

    let sum = BuiltinAggregate::new(AggregateOp::Sum, &DataKind::Int).unwrap();
    let table = executor_of(&empty.aggregate(&[0], sum).unwrap())
        .execute(&bound)
        .unwrap();
    assert_eq!(common::read(&table, &Selection::all()), vec![vec![Value::Missing]]);

    let count = BuiltinAggregate::new(AggregateOp::Count, &DataKind::Int).unwrap();
    let table = executor_of(&empty.aggregate(&[0], count).unwrap())
        .execute(&bound)
        .unwrap();
    assert_eq!(common::read(&table, &Selection::all()), vec![vec![Value::from(0i64)]]);
}

#[test]
fn aggregation_is_split_over_concatenated_branches() {
    let first = common::longs(0..3);
    let second = common::longs(3..5);
    let pipeline = VirtualTable::from_table("a", &first)
        .concatenate(&[&VirtualTable::from_table("b", &second)])
        .unwrap()
        .aggregate(
            &[0],
            BuiltinAggregate::new(AggregateOp::Sum, &DataKind::Long).unwrap(),
        )
        .unwrap();

    let plan = plan_of(&pipeline);
    assert!(
        !plan
            .nodes()
            .iter()
            .any(|node| matches!(node, CapNode::Concatenate { .. })),
        "concatenation survived:\n{plan}"
    );
    let aggregate = plan
        .nodes()
        .iter()
        .find_map(|node| match node {
            CapNode::Aggregate { predecessors, .. } => Some(predecessors.len()),
            _ => None,
        });
    assert_eq!(aggregate, Some(2));

    let table = CapExecutor::new(Arc::new(plan))
        .execute(&sources([("a", Arc::new(first)), ("b", Arc::new(second))]))
        .unwrap();
    assert_eq!(
        common::read(&table, &Selection::all()),
        vec![vec![Value::from(10i64)]]
    );
}

#[test]
fn binding_errors() {
    let pipeline = VirtualTable::source(
        "src",
        common::schema(&[DataKind::Long]),
        SourceProperties::default(),
    );
    let executor = executor_of(&pipeline);

    let err = executor.execute(&sources([])).unwrap_err();
    assert!(matches!(err, VtError::UnknownSource(ref id) if *id == SourceId::new("src")));

    let strings = table(&[DataKind::String], vec![vec![Value::from("nope")]]);
    let err = executor
        .execute(&sources([("src", Arc::new(strings))]))
        .unwrap_err();
    assert!(matches!(err, VtError::SchemaMismatch { .. }), "{err}");
}

#[test]
fn requested_rows_reach_the_source() {
    let events = Events::default();
    let recorded = Arc::new(RecordingTable::new("t", common::longs(0..5), &events));
    let pipeline = VirtualTable::from_table("t", recorded.as_ref())
        .select_columns(&[0])
        .unwrap();

    let table = executor_of(&pipeline)
        .execute(&sources([("t", recorded)]))
        .unwrap();
    let rows = common::read(
        &table,
        &Selection::new(ColumnSelection::all(), RowRangeSelection::range(1, 3)),
    );
    assert_eq!(rows, vec![vec![Value::from(1i64)], vec![Value::from(2i64)]]);
    assert_eq!(events.lifecycle(), vec!["open t cols=[0] rows=[1,3)", "close t"]);
}

#[test]
fn observers_keep_the_row_range_above_them() {
    let events = Events::default();
    let recorded = Arc::new(RecordingTable::new("t", common::longs(0..5), &events));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let pipeline = VirtualTable::from_table("t", recorded.as_ref())
        .observe(
            &[0],
            ObserveFn::new(move |values| {
                sink.lock().unwrap().push(values[0].clone());
                Ok(())
            }),
        )
        .unwrap();

    let table = executor_of(&pipeline)
        .execute(&sources([("t", recorded)]))
        .unwrap();
    let rows = common::read(
        &table,
        &Selection::new(ColumnSelection::all(), RowRangeSelection::range(1, 2)),
    );
    assert_eq!(rows, vec![vec![Value::from(1i64)]]);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Value::from(0i64), Value::from(1i64)]
    );
    assert_eq!(events.lifecycle(), vec!["open t cols=[0] rows=*", "close t"]);
}

#[test]
fn concatenated_sources_are_opened_one_at_a_time() {
    let events = Events::default();
    let a = Arc::new(RecordingTable::new("a", common::longs(0..2), &events));
    let b = Arc::new(RecordingTable::new("b", common::longs(2..3), &events));
    let pipeline = VirtualTable::from_table("a", a.as_ref())
        .concatenate(&[&VirtualTable::from_table("b", b.as_ref())])
        .unwrap();

    let table = executor_of(&pipeline)
        .execute(&sources([("a", a), ("b", b)]))
        .unwrap();
    assert_eq!(table.size(), Some(3));
    assert_eq!(
        common::read(&table, &Selection::all()),
        vec![
            vec![Value::from(0i64)],
            vec![Value::from(1i64)],
            vec![Value::from(2i64)],
        ]
    );
    assert_eq!(
        events.take(),
        vec![
            "open a cols=[0] rows=*",
            "forward a",
            "forward a",
            "forward a",
            "close a",
            "open b cols=[0] rows=*",
            "forward b",
            "forward b",
            "close b",
        ]
    );
}

#[test]
fn unselected_append_branches_still_drive_the_row_count() {
    let events = Events::default();
    let left = Arc::new(RecordingTable::new("left", common::longs(0..2), &events));
    let right = Arc::new(RecordingTable::new("right", common::longs(5..7), &events));
    let pipeline = VirtualTable::from_table("left", left.as_ref())
        .append(&[&VirtualTable::from_table("right", right.as_ref())])
        .unwrap();

    let table = executor_of(&pipeline)
        .execute(&sources([("left", left), ("right", right)]))
        .unwrap();
    let rows = common::read(
        &table,
        &Selection::new(ColumnSelection::of([1]), RowRangeSelection::All),
    );
    assert_eq!(
        rows,
        vec![
            vec![Value::Missing, Value::from(5i64)],
            vec![Value::Missing, Value::from(6i64)],
        ]
    );
    assert_eq!(
        events.lifecycle(),
        vec![
            "open left cols=[] rows=*",
            "open right cols=[0] rows=*",
            "close left",
            "close right",
        ]
    );
}

#[test]
fn bound_tables_must_match_the_declared_size() {
    let declared = VirtualTable::source(
        "a",
        common::schema(&[DataKind::Long]),
        SourceProperties { size: Some(3) },
    );
    let pipeline = declared
        .concatenate(&[&VirtualTable::from_table("b", &common::longs(100..102))])
        .unwrap()
        .slice(2, 4)
        .unwrap();

    let too_long = sources([
        ("a", Arc::new(common::longs(0..5))),
        ("b", Arc::new(common::longs(100..102))),
    ]);
    let err = executor_of(&pipeline).execute(&too_long).unwrap_err();
    assert!(
        matches!(
            err,
            VtError::SizeMismatch { ref source_id, expected: 3, actual: 5 }
                if *source_id == SourceId::new("a")
        ),
        "{err}"
    );
    let err = LazyExecutor::new(pipeline.transform().clone())
        .execute(&too_long)
        .unwrap_err();
    assert!(matches!(err, VtError::SizeMismatch { .. }), "{err}");

    let exact = sources([
        ("a", Arc::new(common::longs(0..3))),
        ("b", Arc::new(common::longs(100..102))),
    ]);
    assert_eq!(
        common::rows_of(&pipeline, &exact, &Selection::all()),
        vec![vec![Value::from(2i64)], vec![Value::from(100i64)]]
    );
}
