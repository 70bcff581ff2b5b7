use crate::error::{VtError, VtResult};
use crate::graph::{NodeId, NodeRole, TransformGraph};
use std::collections::{BTreeMap, HashMap};

/// Which ready node [`flatten`] schedules next.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TieBreakPolicy {
    /// Prefer the node whose latest predecessor was scheduled most recently, keeping chains of
    /// dependent instructions close together. Ties go to the lowest id.
    #[default]
    MostRecentPredecessor,
    /// Always the lowest id.
    LowestId,
}

/// Chain the lockstep nodes sharing a driver so that every driver and lockstep node ends up with
/// exactly one control successor.
///
/// The lockstep nodes driven by `D` on behalf of one claimant port are ordered by id and wired
/// `D -> L1 -> ... -> Lk -> claimant`. Fails with [`VtError::Internal`] if afterwards any runtime
/// node has zero or several control successors.
pub fn create_execution_ordering_edges(graph: &mut TransformGraph) -> VtResult<()> {
    let consumers = graph.structural_consumers();
    let mut chains: BTreeMap<(NodeId, usize), Vec<NodeId>> = BTreeMap::new();
    for node in graph.nodes() {
        if node.role() != NodeRole::Lockstep {
            continue;
        }
        let [driver] = node.ctrl_inputs[..] else {
            return Err(VtError::internal(format!(
                "lockstep node {} has {} control inputs",
                node.id,
                node.ctrl_inputs.len()
            )));
        };
        let claimant = claimant_of(graph, &consumers, node.id)?;
        let port = graph
            .expect_node(claimant)?
            .ctrl_inputs
            .iter()
            .position(|&c| c == driver)
            .ok_or_else(|| {
                VtError::internal(format!(
                    "claimant {claimant} of {} is not driven by {driver}",
                    node.id
                ))
            })?;
        chains.entry((claimant, port)).or_default().push(node.id);
    }

    for ((claimant, port), chain) in chains {
        let mut previous = graph.node_mut(claimant)?.ctrl_inputs[port];
        for &lockstep in &chain {
            graph.node_mut(lockstep)?.ctrl_inputs = vec![previous];
            previous = lockstep;
        }
        log::trace!("chained {} lockstep node(s) before {claimant}", chain.len());
        graph.node_mut(claimant)?.ctrl_inputs[port] = previous;
    }

    check_single_claimant(graph)
}

/// The nearest driver or consumer above a lockstep node.
fn claimant_of(
    graph: &TransformGraph,
    consumers: &HashMap<NodeId, Vec<NodeId>>,
    id: NodeId,
) -> VtResult<NodeId> {
    let mut current = id;
    loop {
        let next = consumers
            .get(&current)
            .and_then(|c| c.first())
            .copied()
            .ok_or_else(|| VtError::internal(format!("lockstep node {id} has no claimant")))?;
        match graph.expect_node(next)?.role() {
            NodeRole::Driver | NodeRole::Sink => return Ok(next),
            NodeRole::Lockstep | NodeRole::Constant | NodeRole::Wrapper => current = next,
        }
    }
}

fn check_single_claimant(graph: &TransformGraph) -> VtResult<()> {
    let mut claims: HashMap<NodeId, usize> = HashMap::new();
    for node in graph.nodes() {
        for &ctrl in &node.ctrl_inputs {
            *claims.entry(ctrl).or_default() += 1;
        }
    }
    for node in graph.nodes() {
        if !matches!(node.role(), NodeRole::Driver | NodeRole::Lockstep) {
            continue;
        }
        let count = claims.get(&node.id).copied().unwrap_or(0);
        if count != 1 {
            return Err(VtError::internal(format!(
                "{} {} has {count} control successors, expected exactly one",
                node.spec.kind(),
                node.id
            )));
        }
    }
    Ok(())
}

/// Remove every wrapper node, connecting its consumers to its inputs.
pub fn remove_wrapper_nodes(graph: &mut TransformGraph) -> VtResult<()> {
    for id in graph.ids() {
        if graph.expect_node(id)?.role() == NodeRole::Wrapper {
            graph.splice(id)?;
        }
    }
    Ok(())
}

/// Topologically sort all nodes over structural, data and control edges.
pub fn flatten(graph: &TransformGraph, policy: TieBreakPolicy) -> VtResult<Vec<NodeId>> {
    let mut predecessors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut successors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for edge in graph.edges() {
        if graph.node(edge.from).is_none() {
            return Err(VtError::internal(format!(
                "{:?} edge from missing node {} to {}",
                edge.kind, edge.from, edge.to
            )));
        }
        let preds = predecessors.entry(edge.to).or_default();
        if !preds.contains(&edge.from) {
            preds.push(edge.from);
            successors.entry(edge.from).or_default().push(edge.to);
        }
    }

    let mut pending: HashMap<NodeId, usize> = graph
        .nodes()
        .map(|n| (n.id, predecessors.get(&n.id).map_or(0, Vec::len)))
        .collect();
    let mut ready: Vec<NodeId> = pending
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut position: HashMap<NodeId, usize> = HashMap::new();
    let mut order = Vec::with_capacity(pending.len());

    while !ready.is_empty() {
        let pick = match policy {
            TieBreakPolicy::LowestId => ready
                .iter()
                .enumerate()
                .min_by_key(|&(_, &id)| id)
                .map(|(idx, _)| idx),
            TieBreakPolicy::MostRecentPredecessor => ready
                .iter()
                .enumerate()
                .max_by_key(|&(_, &id)| {
                    let latest = predecessors
                        .get(&id)
                        .into_iter()
                        .flatten()
                        .filter_map(|p| position.get(p))
                        .max()
                        .map_or(0, |&p| p + 1);
                    (latest, std::cmp::Reverse(id))
                })
                .map(|(idx, _)| idx),
        };
        let Some(pick) = pick else {
            break;
        };
        let id = ready.swap_remove(pick);
        position.insert(id, order.len());
        order.push(id);
        for &next in successors.get(&id).into_iter().flatten() {
            if let Some(count) = pending.get_mut(&next) {
                *count -= 1;
                if *count == 0 {
                    ready.push(next);
                }
            }
        }
    }

    if order.len() != pending.len() {
        let mut stuck: Vec<NodeId> = pending
            .iter()
            .filter(|&(id, _)| !position.contains_key(id))
            .map(|(&id, _)| id)
            .collect();
        stuck.sort_unstable();
        return Err(VtError::internal(format!(
            "dependency cycle among nodes {stuck:?}"
        )));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{build_graph, trace_accesses, trace_exec};
    use crate::schema::{ColumnarSchema, DataKind};
    use crate::spec::SourceProperties;
    use crate::virtual_table::VirtualTable;

    fn prepared(pipeline: &VirtualTable) -> TransformGraph {
        let mut graph = build_graph(pipeline.transform()).unwrap();
        trace_accesses(&mut graph).unwrap();
        trace_exec(&mut graph).unwrap();
        graph
    }

    fn source(id: &str) -> VirtualTable {
        VirtualTable::source(
            id,
            ColumnarSchema::of_kinds([DataKind::Long, DataKind::Long]),
            SourceProperties::default(),
        )
    }

    #[test]
    fn flattened_order_respects_every_edge() {
        let pipeline = source("a")
            .slice(0, 10)
            .unwrap()
            .concatenate(&[&source("b").select_columns(&[1, 0]).unwrap()])
            .unwrap();
        let mut graph = prepared(&pipeline);
        create_execution_ordering_edges(&mut graph).unwrap();
        remove_wrapper_nodes(&mut graph).unwrap();

        for policy in [TieBreakPolicy::LowestId, TieBreakPolicy::MostRecentPredecessor] {
            let order = flatten(&graph, policy).unwrap();
            assert_eq!(order.len(), graph.len());
            assert_eq!(order.last(), Some(&graph.consumer()));
            let position: HashMap<NodeId, usize> =
                order.iter().enumerate().map(|(idx, &id)| (id, idx)).collect();
            for edge in graph.edges() {
                assert!(
                    position[&edge.from] < position[&edge.to],
                    "{edge:?} violated by {order:?}"
                );
            }
        }
    }

    #[test]
    fn cycles_are_internal_errors() {
        let mut graph = prepared(&source("a").slice(1, 2).unwrap());
        let consumer = graph.consumer();
        let slice = graph.expect_node(consumer).unwrap().inputs[0];
        graph.node_mut(slice).unwrap().ctrl_inputs.push(consumer);

        assert!(matches!(
            flatten(&graph, TieBreakPolicy::LowestId),
            Err(VtError::Internal(_))
        ));
    }

    #[test]
    fn drivers_without_a_claimant_are_rejected() {
        let mut graph = prepared(&source("a").slice(1, 2).unwrap());
        let consumer = graph.consumer();
        graph.node_mut(consumer).unwrap().ctrl_inputs.clear();

        assert!(matches!(
            create_execution_ordering_edges(&mut graph),
            Err(VtError::Internal(_))
        ));
    }
}
