mod common;

use common::{sources, table};
use formula_vtable::graph::{
    build_graph, create_execution_ordering_edges, optimize, trace_accesses, trace_exec, NodeRole,
    NodeSpec, TransformGraph,
};
use formula_vtable::{
    ColumnSelection, DataKind, MapFn, ObserveFn, RowRangeSelection, Selection, SpecKind, Value,
    VirtualTable,
};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;

fn traced(pipeline: &VirtualTable) -> TransformGraph {
    let mut graph = build_graph(pipeline.transform()).unwrap();
    trace_accesses(&mut graph).unwrap();
    trace_exec(&mut graph).unwrap();
    graph
}

fn optimized(pipeline: &VirtualTable) -> TransformGraph {
    let mut graph = traced(pipeline);
    optimize(&mut graph).unwrap();
    graph
}

fn sources_of(graph: &TransformGraph) -> Vec<Selection> {
    graph
        .nodes()
        .filter_map(|node| match node.spec() {
            NodeSpec::Source { columns, rows, .. } => Some(Selection::new(columns.clone(), *rows)),
            _ => None,
        })
        .collect()
}

fn pairs() -> formula_vtable::InMemoryTable {
    table(
        &[DataKind::Long, DataKind::Double, DataKind::String],
        (0..6i64)
            .map(|i| {
                vec![
                    Value::from(i),
                    Value::from(i as f64 / 2.0),
                    Value::from(format!("r{i}")),
                ]
            })
            .collect(),
    )
}

fn double_it() -> Arc<MapFn> {
    MapFn::new(common::schema(&[DataKind::Long]), |values| {
        Ok(vec![match &values[0] {
            Value::Long(v) => Value::from(v * 2),
            _ => Value::Missing,
        }])
    })
}

#[test]
fn diamonds_are_expanded_into_trees() {
    let data = pairs();
    let source = VirtualTable::from_table("s", &data);
    let pipeline = source
        .select_columns(&[0])
        .unwrap()
        .append(&[&source.select_columns(&[1]).unwrap()])
        .unwrap();

    let graph = traced(&pipeline);
    assert_eq!(graph.count(SpecKind::Source), 2);
    assert_eq!(graph.count(SpecKind::Consumer), 1);
}

#[test]
fn identical_append_sources_are_merged() {
    let data = pairs();
    let source = VirtualTable::from_table("s", &data);
    let pipeline = source
        .select_columns(&[0])
        .unwrap()
        .append(&[&source.select_columns(&[1]).unwrap()])
        .unwrap();

    let graph = optimized(&pipeline);
    assert_eq!(graph.count(SpecKind::Source), 1, "{graph}");
    assert!(graph.nodes().any(|node| matches!(
        node.spec(),
        NodeSpec::Append {
            short_circuit: true
        }
    )));
    assert_eq!(
        sources_of(&graph),
        vec![Selection::new(
            ColumnSelection::of([0, 1]),
            RowRangeSelection::All
        )]
    );

    let rows = common::rows_of(
        &pipeline,
        &sources([("s", Arc::new(data))]),
        &Selection::all(),
    );
    assert_eq!(rows[1], vec![Value::from(1i64), Value::from(0.5)]);
    assert_eq!(rows.len(), 6);
}

#[test]
fn differently_sliced_sources_are_not_merged() {
    let data = pairs();
    let source = VirtualTable::from_table("s", &data);
    let pipeline = source
        .slice(0, 3)
        .unwrap()
        .append(&[&source.slice(3, 6).unwrap()])
        .unwrap();

    let graph = optimized(&pipeline);
    assert_eq!(graph.count(SpecKind::Source), 2, "{graph}");
    assert_eq!(graph.count(SpecKind::Slice), 0, "{graph}");

    let rows = common::rows_of(
        &pipeline,
        &sources([("s", Arc::new(data))]),
        &Selection::all(),
    );
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][0], Value::from(0i64));
    assert_eq!(rows[0][3], Value::from(3i64));
}

#[test]
fn nested_slices_fold_into_the_source() {
    let data = pairs();
    let pipeline = VirtualTable::from_table("s", &data)
        .slice(2, 10)
        .unwrap()
        .slice(1, 3)
        .unwrap();

    let graph = optimized(&pipeline);
    assert_eq!(graph.count(SpecKind::Slice), 0, "{graph}");
    assert_eq!(
        sources_of(&graph),
        vec![Selection::new(
            ColumnSelection::of([0, 1, 2]),
            RowRangeSelection::range(3, 5)
        )]
    );

    let rows = common::rows_of(
        &pipeline,
        &sources([("s", Arc::new(data))]),
        &Selection::new(ColumnSelection::of([0]), RowRangeSelection::All),
    );
    assert_eq!(
        rows,
        vec![
            vec![Value::from(3i64), Value::Missing, Value::Missing],
            vec![Value::from(4i64), Value::Missing, Value::Missing],
        ]
    );
}

#[test]
fn dead_columns_are_dropped_from_sources() {
    let data = pairs();
    let pipeline = VirtualTable::from_table("s", &data)
        .permute(&[2, 0, 1])
        .unwrap()
        .select_columns(&[0])
        .unwrap();

    let graph = optimized(&pipeline);
    assert_eq!(graph.count(SpecKind::Permute), 0, "{graph}");
    assert_eq!(
        sources_of(&graph),
        vec![Selection::new(ColumnSelection::of([2]), RowRangeSelection::All)]
    );
}

#[test]
fn slices_are_pushed_into_concatenated_branches() {
    let first = common::longs(0..4);
    let second = common::longs(4..8);
    let third = common::longs(8..12);
    let pipeline = VirtualTable::from_table("a", &first)
        .concatenate(&[
            &VirtualTable::from_table("b", &second),
            &VirtualTable::from_table("c", &third),
        ])
        .unwrap()
        .slice(2, 6)
        .unwrap();

    let graph = optimized(&pipeline);
    assert_eq!(graph.count(SpecKind::Slice), 0, "{graph}");
    assert_eq!(
        sources_of(&graph),
        vec![
            Selection::new(ColumnSelection::of([0]), RowRangeSelection::range(2, 4)),
            Selection::new(ColumnSelection::of([0]), RowRangeSelection::range(0, 2)),
        ]
    );

    let rows = common::rows_of(
        &pipeline,
        &sources([
            ("a", Arc::new(first)),
            ("b", Arc::new(second)),
            ("c", Arc::new(third)),
        ]),
        &Selection::all(),
    );
    assert_eq!(
        rows,
        (2..6i64).map(|v| vec![Value::from(v)]).collect::<Vec<_>>()
    );
}

#[test]
fn observers_block_slice_folding() {
    let data = pairs();
    let pipeline = VirtualTable::from_table("s", &data)
        .observe(&[0], ObserveFn::new(|_| Ok(())))
        .unwrap()
        .slice(1, 3)
        .unwrap();

    let graph = optimized(&pipeline);
    assert_eq!(graph.count(SpecKind::Slice), 1, "{graph}");
    assert_eq!(graph.count(SpecKind::Observe), 1, "{graph}");
    assert!(sources_of(&graph).iter().all(|s| s.rows().is_all()));
}

#[test]
fn lockstep_nodes_get_a_single_claimant() {
    let data = pairs();
    let source = VirtualTable::from_table("s", &data);
    let pipeline = source
        .map(&[0], double_it())
        .unwrap()
        .append(&[&source.map(&[0], double_it()).unwrap()])
        .unwrap();

    let mut graph = optimized(&pipeline);
    create_execution_ordering_edges(&mut graph).unwrap();

    let mut successors: HashMap<_, usize> = HashMap::new();
    for node in graph.nodes() {
        for &driver in node.ctrl_inputs() {
            *successors.entry(driver).or_default() += 1;
        }
    }
    for node in graph.nodes() {
        if matches!(node.role(), NodeRole::Driver | NodeRole::Lockstep) {
            assert_eq!(
                successors.get(&node.id()).copied(),
                Some(1),
                "{} in\n{graph}",
                node.id()
            );
        }
    }

    let rows = common::rows_of(
        &pipeline,
        &sources([("s", Arc::new(data))]),
        &Selection::all(),
    );
    assert_eq!(rows[5], vec![Value::from(10i64), Value::from(10i64)]);
}
