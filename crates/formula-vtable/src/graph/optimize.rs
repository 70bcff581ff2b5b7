//! Semantics-preserving graph rewrites.
//!
//! All rewrites run on a graph whose accesses and control edges are traced, and keep both
//! consistent. None of them may change which rows an observer sees.

use crate::error::{VtError, VtResult};
use crate::graph::{AccessId, NodeId, NodeRole, NodeSpec, TransformGraph};
use crate::selection::{ColumnSelection, RowRangeSelection};
use crate::spec::{SourceId, SourceProperties};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Run every rewrite, in order.
pub fn optimize(graph: &mut TransformGraph) -> VtResult<()> {
    let before = graph.len();
    remove_identities(graph)?;
    fuse_projections(graph)?;
    fold_slices(graph)?;
    push_slices_into_concatenations(graph)?;
    split_aggregations(graph)?;
    merge_append_sources(graph)?;
    eliminate_dead_code(graph)?;
    log::debug!("optimized graph from {before} to {} nodes", graph.len());
    Ok(())
}

fn remove_identities(graph: &mut TransformGraph) -> VtResult<()> {
    for id in graph.ids() {
        if matches!(graph.expect_node(id)?.spec, NodeSpec::Identity) {
            log::trace!("removing identity {id}");
            graph.splice(id)?;
        }
    }
    Ok(())
}

/// Collapse a projection whose only consumer is another projection into that consumer.
fn fuse_projections(graph: &mut TransformGraph) -> VtResult<()> {
    for id in graph.ids() {
        let node = graph.expect_node(id)?;
        let outer = match &node.spec {
            NodeSpec::SelectColumns(columns) | NodeSpec::Permute(columns) => columns.clone(),
            _ => continue,
        };
        let [inner_id] = node.inputs[..] else {
            continue;
        };
        let inner = graph.expect_node(inner_id)?;
        let inner_columns = match &inner.spec {
            NodeSpec::SelectColumns(columns) | NodeSpec::Permute(columns) => columns.clone(),
            _ => continue,
        };
        let consumers = graph.structural_consumers();
        if consumers.get(&inner_id).map_or(0, Vec::len) != 1 {
            continue;
        }

        let composed: Vec<usize> = outer
            .iter()
            .map(|&column| {
                inner_columns.get(column).copied().ok_or_else(|| {
                    VtError::internal(format!("{id} projects column {column} {inner_id} lacks"))
                })
            })
            .collect::<VtResult<_>>()?;
        let inner_input = inner.inputs.clone();
        let input_width = match inner_input.first() {
            Some(&input) => graph.expect_node(input)?.schema.num_columns(),
            None => continue,
        };
        let is_permutation = composed.len() == input_width && {
            let mut sorted = composed.clone();
            sorted.sort_unstable();
            sorted.iter().copied().eq(0..input_width)
        };

        log::trace!("fusing projection {inner_id} into {id}");
        let node = graph.node_mut(id)?;
        node.spec = if is_permutation {
            NodeSpec::Permute(composed)
        } else {
            NodeSpec::SelectColumns(composed)
        };
        graph.splice(inner_id)?;
    }
    Ok(())
}

/// Fold a slice into the source or slice driving it.
fn fold_slices(graph: &mut TransformGraph) -> VtResult<()> {
    for id in graph.ids() {
        let Some(node) = graph.node(id) else {
            continue;
        };
        let NodeSpec::Slice(range) = node.spec else {
            continue;
        };
        let [driver] = node.ctrl_inputs[..] else {
            continue;
        };
        if fold_range(graph, driver, range)? {
            log::trace!("folded slice {id} into {driver}");
            graph.replace_ctrl(id, driver);
            graph.splice(id)?;
        }
    }
    Ok(())
}

/// Compose `range` into `driver` if it is a source or slice no observer watches.
fn fold_range(
    graph: &mut TransformGraph,
    driver: NodeId,
    range: RowRangeSelection,
) -> VtResult<bool> {
    if graph.observes_any(&HashSet::from([driver])) {
        return Ok(false);
    }
    match &mut graph.node_mut(driver)?.spec {
        NodeSpec::Source { rows, .. } => *rows = rows.retain_range(&range),
        NodeSpec::Slice(inner) => *inner = inner.retain_range(&range),
        _ => return Ok(false),
    }
    Ok(true)
}

/// Push a slice over a concatenation into its branches, dropping branches outside the range.
///
/// Needs every branch size; skipped when an observer sees rows of the concatenation or of any
/// branch.
fn push_slices_into_concatenations(graph: &mut TransformGraph) -> VtResult<()> {
    for id in graph.ids() {
        let Some(node) = graph.node(id) else {
            continue;
        };
        let NodeSpec::Slice(range) = node.spec else {
            continue;
        };
        let [concat] = node.ctrl_inputs[..] else {
            continue;
        };
        if !matches!(graph.node(concat).map(|n| &n.spec), Some(NodeSpec::Concatenate)) {
            continue;
        }
        if graph.observes_any(&graph.row_domain(concat)) {
            continue;
        }
        let concat_node = graph.expect_node(concat)?;
        let Some(sizes) = concat_node
            .ctrl_inputs
            .iter()
            .map(|&branch| graph.row_count(branch))
            .collect::<Option<Vec<u64>>>()
        else {
            continue;
        };

        // (port, range within the branch, whole branch kept)
        let mut kept = Vec::new();
        let mut offset = 0u64;
        for (port, &size) in sizes.iter().enumerate() {
            let end = offset.saturating_add(size);
            let from = range.from_index().max(offset);
            let to = range.to_index().min(end);
            if from < to {
                let whole = from == offset && to == end;
                kept.push((port, RowRangeSelection::range(from - offset, to - offset), whole));
            }
            offset = end;
        }
        if kept.is_empty() {
            kept.push((0, RowRangeSelection::range(0, 0), false));
        }

        log::trace!(
            "pushing slice {id} into {concat}, keeping {} of {} branches",
            kept.len(),
            sizes.len()
        );
        let concat_node = graph.node_mut(concat)?;
        let inputs = std::mem::take(&mut concat_node.inputs);
        let ctrl_inputs = std::mem::take(&mut concat_node.ctrl_inputs);
        let data_inputs = std::mem::take(&mut concat_node.data_inputs);
        for &(port, _, _) in &kept {
            concat_node.inputs.push(inputs[port]);
            concat_node.ctrl_inputs.push(ctrl_inputs[port]);
            concat_node.data_inputs.push(data_inputs[port].clone());
        }
        for (new_port, &(_, local, whole)) in kept.iter().enumerate() {
            if !whole {
                restrict_branch(graph, concat, new_port, local)?;
            }
        }
        graph.replace_ctrl(id, concat);
        graph.splice(id)?;
    }
    Ok(())
}

/// Restrict the rows of one concatenation branch, folding into its driver where possible and
/// inserting a new slice otherwise.
fn restrict_branch(
    graph: &mut TransformGraph,
    concat: NodeId,
    port: usize,
    range: RowRangeSelection,
) -> VtResult<()> {
    let concat_node = graph.expect_node(concat)?;
    let driver = concat_node.ctrl_inputs[port];
    let input = concat_node.inputs[port];
    if fold_range(graph, driver, range)? {
        return Ok(());
    }

    let input_node = graph.expect_node(input)?;
    let schema = input_node.schema.clone();
    let outputs = input_node.outputs.clone();
    let slice = graph.push(NodeSpec::Slice(range), schema, vec![input]);
    let slice_node = graph.node_mut(slice)?;
    slice_node.outputs = outputs;
    slice_node.ctrl_inputs = vec![driver];

    let concat_node = graph.node_mut(concat)?;
    concat_node.inputs[port] = slice;
    concat_node.ctrl_inputs[port] = slice;
    Ok(())
}

/// Aggregate each branch of a concatenation separately and combine the partial states.
fn split_aggregations(graph: &mut TransformGraph) -> VtResult<()> {
    for id in graph.ids() {
        let Some(node) = graph.node(id) else {
            continue;
        };
        if !matches!(node.spec, NodeSpec::Aggregate(_)) {
            continue;
        }
        let [concat] = node.ctrl_inputs[..] else {
            continue;
        };
        let Some(concat_node) = graph.node(concat) else {
            continue;
        };
        if !matches!(concat_node.spec, NodeSpec::Concatenate) || !graph.lockstep_users(concat).is_empty()
        {
            continue;
        }
        let Some(columns) = node
            .data_inputs
            .first()
            .and_then(|port| {
                port.iter()
                    .map(|access| access.filter(|a| a.node == concat).map(|a| a.column))
                    .collect::<Option<Vec<usize>>>()
            })
        else {
            continue;
        };
        let data_inputs = concat_node
            .data_inputs
            .iter()
            .map(|port| {
                columns
                    .iter()
                    .map(|&column| port.get(column).copied().flatten())
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        let inputs = concat_node.inputs.clone();
        let ctrl_inputs = concat_node.ctrl_inputs.clone();

        log::trace!("splitting aggregation {id} over the {} branches of {concat}", inputs.len());
        let node = graph.node_mut(id)?;
        node.inputs = inputs;
        node.ctrl_inputs = ctrl_inputs;
        node.data_inputs = data_inputs;
        // The concatenation and any projections above it are now unreachable; dead code
        // elimination drops them.
    }
    Ok(())
}

type SourceKey = (SourceId, RowRangeSelection, SourceProperties);

fn source_key(graph: &TransformGraph, id: NodeId) -> Option<SourceKey> {
    match &graph.node(id)?.spec {
        NodeSpec::Source { spec, rows, .. } => {
            Some((spec.source_id.clone(), *rows, spec.properties))
        }
        _ => None,
    }
}

/// Merge identical sources feeding one append, so the append advances a single cursor and turns
/// into a wrapper.
fn merge_append_sources(graph: &mut TransformGraph) -> VtResult<()> {
    for id in graph.ids() {
        let Some(node) = graph.node(id) else {
            continue;
        };
        if !matches!(
            node.spec,
            NodeSpec::Append {
                short_circuit: false
            }
        ) {
            continue;
        }
        let drivers = node.ctrl_inputs.clone();
        let Some(&first) = drivers.first() else {
            continue;
        };
        let Some(key) = source_key(graph, first) else {
            continue;
        };
        if !drivers.iter().all(|&d| source_key(graph, d).as_ref() == Some(&key)) {
            continue;
        }

        for &duplicate in &drivers[1..] {
            if duplicate == first {
                continue;
            }
            log::trace!("merging source {duplicate} into {first} under {id}");
            let width = graph.expect_node(duplicate)?.schema.num_columns();
            for column in 0..width {
                graph.replace_access(
                    AccessId::new(duplicate, column),
                    AccessId::new(first, column),
                );
            }
            graph.replace_ctrl(duplicate, first);
            graph.replace_input(duplicate, first);
            graph.remove(duplicate);
        }

        // Every column of the append now reads straight from accesses advanced by `first`.
        let node = graph.expect_node(id)?;
        let forwarded = node
            .data_inputs
            .iter()
            .flatten()
            .map(|access| {
                access.ok_or_else(|| VtError::internal(format!("append {id} lost an input")))
            })
            .collect::<VtResult<Vec<_>>>()?;
        for (column, &access) in forwarded.iter().enumerate() {
            graph.replace_access(AccessId::new(id, column), access);
        }
        let node = graph.node_mut(id)?;
        node.spec = NodeSpec::Append {
            short_circuit: true,
        };
        node.outputs = forwarded;
        node.data_inputs.clear();
        node.ctrl_inputs.clear();
        graph.replace_ctrl(id, first);
    }
    Ok(())
}

enum Work {
    Node(NodeId),
    Access(AccessId),
}

/// Remove nodes nothing depends on and narrow sources to the columns actually read.
///
/// A node is live if the consumer transitively needs its rows (control) or one of its accesses
/// (data). Observers are always live: the rows they see are a side effect the caller asked for.
fn eliminate_dead_code(graph: &mut TransformGraph) -> VtResult<()> {
    let reachable = graph.structurally_reachable();
    for id in graph.ids() {
        if !reachable.contains(&id) {
            log::trace!("removing unreachable node {id}");
            graph.remove(id);
        }
    }

    let mut live_nodes: HashSet<NodeId> = HashSet::new();
    let mut live_accesses: HashSet<AccessId> = HashSet::new();
    let mut work = vec![Work::Node(graph.consumer())];
    work.extend(
        graph
            .nodes()
            .filter(|n| matches!(n.spec, NodeSpec::Observe(_)))
            .map(|n| Work::Node(n.id)),
    );
    while let Some(item) = work.pop() {
        match item {
            Work::Node(id) => {
                if !live_nodes.insert(id) {
                    continue;
                }
                let node = graph.expect_node(id)?;
                work.extend(node.ctrl_inputs.iter().map(|&c| Work::Node(c)));
                if node.spec.reads_all_inputs() {
                    work.extend(
                        node.data_inputs
                            .iter()
                            .flatten()
                            .flatten()
                            .map(|&a| Work::Access(a)),
                    );
                }
            }
            Work::Access(access) => {
                if !live_accesses.insert(access) {
                    continue;
                }
                work.push(Work::Node(access.node));
                let node = graph.expect_node(access.node)?;
                work.extend(
                    node.forwarded_inputs(access.column)
                        .into_iter()
                        .map(Work::Access),
                );
            }
        }
    }

    let mut live_columns: HashMap<NodeId, BTreeSet<usize>> = HashMap::new();
    for access in &live_accesses {
        live_columns.entry(access.node).or_default().insert(access.column);
    }

    for id in graph.ids() {
        let node = graph.expect_node(id)?;
        let role = node.role();
        if role == NodeRole::Wrapper {
            continue;
        }
        if !live_nodes.contains(&id) {
            log::trace!("removing dead {} {id}", node.spec.kind());
            graph.splice(id)?;
            continue;
        }
        let live = live_columns.get(&id);
        let is_live = |column: usize| live.map_or(false, |c| c.contains(&column));
        let node = graph.node_mut(id)?;
        match &mut node.spec {
            NodeSpec::Source { columns, .. } => {
                *columns = ColumnSelection::of(live.into_iter().flatten().copied());
            }
            NodeSpec::Append {
                short_circuit: false,
            } => {
                let mut column = 0;
                for port in &mut node.data_inputs {
                    for access in port.iter_mut() {
                        if !is_live(column) {
                            *access = None;
                        }
                        column += 1;
                    }
                }
            }
            NodeSpec::Concatenate => {
                for port in &mut node.data_inputs {
                    for (column, access) in port.iter_mut().enumerate() {
                        if !is_live(column) {
                            *access = None;
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}
