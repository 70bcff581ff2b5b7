//! Mutable dependency graph between transform instances.
//!
//! The graph starts as a tree expansion of a [`TableTransform`](crate::spec::TableTransform) DAG
//! (one node per occurrence) topped by a consumer node. Besides the structural edges taken from
//! the specs, passes add two kinds of edges:
//!
//! * data edges: which [`AccessId`]s a node reads, per input port,
//! * control edges: which node's row advancement drives a node.
//!
//! Node roles decide how the edges are wired; see [`NodeRole`].

mod builder;
mod logger;
mod optimize;
mod order;
mod trace;

pub use crate::graph::builder::build_graph;
pub use crate::graph::logger::{GraphLogger, LogGraphLogger, NoopGraphLogger};
pub use crate::graph::optimize::optimize;
pub use crate::graph::order::{
    create_execution_ordering_edges, flatten, remove_wrapper_nodes, TieBreakPolicy,
};
pub use crate::graph::trace::{trace_accesses, trace_exec};

use crate::error::{VtError, VtResult};
use crate::schema::ColumnarSchema;
use crate::selection::{ColumnSelection, RowRangeSelection};
use crate::spec::{
    AggregateTransformSpec, MapTransformSpec, ObserverTransformSpec, SourceTransformSpec, SpecKind,
    TableTransformSpec,
};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One column produced by one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccessId {
    pub node: NodeId,
    pub column: usize,
}

impl AccessId {
    pub fn new(node: NodeId, column: usize) -> Self {
        Self { node, column }
    }
}

impl fmt::Display for AccessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.column)
    }
}

/// How a node takes part in row advancement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeRole {
    /// Owns its own row stream: sources, slices, concatenations, aggregations, and appends of
    /// independently advancing inputs.
    Driver,
    /// Computes or observes per row of a driver it advances in lockstep with: maps, observes.
    Lockstep,
    /// Produces accesses without rows of its own: append-missing.
    Constant,
    /// Purely rearranges accesses and disappears before execution.
    Wrapper,
    /// The consumer at the top of the graph.
    Sink,
}

#[derive(Clone, Debug)]
pub enum NodeSpec {
    Source {
        spec: SourceTransformSpec,
        columns: ColumnSelection,
        rows: RowRangeSelection,
    },
    SelectColumns(Vec<usize>),
    Slice(RowRangeSelection),
    Permute(Vec<usize>),
    /// `short_circuit` once every input is driven by the same node, making the append a wrapper.
    Append {
        short_circuit: bool,
    },
    AppendMissing(ColumnarSchema),
    Concatenate,
    Identity,
    Map(MapTransformSpec),
    Aggregate(AggregateTransformSpec),
    Observe(ObserverTransformSpec),
    Consumer,
}

impl NodeSpec {
    pub fn from_transform(spec: &TableTransformSpec) -> Self {
        match spec {
            TableTransformSpec::Source(source) => Self::Source {
                spec: source.clone(),
                columns: ColumnSelection::All,
                rows: RowRangeSelection::All,
            },
            TableTransformSpec::SelectColumns(columns) => Self::SelectColumns(columns.clone()),
            TableTransformSpec::Slice(range) => Self::Slice(*range),
            TableTransformSpec::Permute(permutation) => Self::Permute(permutation.clone()),
            TableTransformSpec::Append => Self::Append {
                short_circuit: false,
            },
            TableTransformSpec::AppendMissing(schema) => Self::AppendMissing(schema.clone()),
            TableTransformSpec::Concatenate => Self::Concatenate,
            TableTransformSpec::Identity => Self::Identity,
            TableTransformSpec::Map(map) => Self::Map(map.clone()),
            TableTransformSpec::Aggregate(aggregate) => Self::Aggregate(aggregate.clone()),
            TableTransformSpec::Observe(observe) => Self::Observe(observe.clone()),
        }
    }

    pub fn kind(&self) -> SpecKind {
        match self {
            Self::Source { .. } => SpecKind::Source,
            Self::SelectColumns(_) => SpecKind::SelectColumns,
            Self::Slice(_) => SpecKind::Slice,
            Self::Permute(_) => SpecKind::Permute,
            Self::Append { .. } => SpecKind::Append,
            Self::AppendMissing(_) => SpecKind::AppendMissing,
            Self::Concatenate => SpecKind::Concatenate,
            Self::Identity => SpecKind::Identity,
            Self::Map(_) => SpecKind::Map,
            Self::Aggregate(_) => SpecKind::Aggregate,
            Self::Observe(_) => SpecKind::Observe,
            Self::Consumer => SpecKind::Consumer,
        }
    }

    pub fn role(&self) -> NodeRole {
        match self {
            Self::Source { .. }
            | Self::Slice(_)
            | Self::Concatenate
            | Self::Aggregate(_)
            | Self::Append {
                short_circuit: false,
            } => NodeRole::Driver,
            Self::Map(_) | Self::Observe(_) => NodeRole::Lockstep,
            Self::AppendMissing(_) => NodeRole::Constant,
            Self::SelectColumns(_)
            | Self::Permute(_)
            | Self::Identity
            | Self::Append {
                short_circuit: true,
            } => NodeRole::Wrapper,
            Self::Consumer => NodeRole::Sink,
        }
    }

    /// Whether the node reads every one of its data inputs (as opposed to forwarding them per
    /// output column).
    fn reads_all_inputs(&self) -> bool {
        matches!(
            self,
            Self::Map(_) | Self::Aggregate(_) | Self::Observe(_) | Self::Consumer
        )
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) spec: NodeSpec,
    pub(crate) schema: ColumnarSchema,
    /// Structural predecessors, in spec order.
    pub(crate) inputs: Vec<NodeId>,
    /// Access ids of the node's output columns.
    pub(crate) outputs: Vec<AccessId>,
    /// Per input port, the accesses read from it. `None` marks a column nobody needs.
    pub(crate) data_inputs: Vec<Vec<Option<AccessId>>>,
    pub(crate) ctrl_inputs: Vec<NodeId>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    pub fn role(&self) -> NodeRole {
        self.spec.role()
    }

    pub fn schema(&self) -> &ColumnarSchema {
        &self.schema
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[AccessId] {
        &self.outputs
    }

    pub fn data_inputs(&self) -> &[Vec<Option<AccessId>>] {
        &self.data_inputs
    }

    pub fn ctrl_inputs(&self) -> &[NodeId] {
        &self.ctrl_inputs
    }

    /// Accesses feeding output `column` of a forwarding node (append, concatenate).
    fn forwarded_inputs(&self, column: usize) -> Vec<AccessId> {
        match self.spec {
            NodeSpec::Append {
                short_circuit: false,
            } => {
                let mut offset = 0;
                for port in &self.data_inputs {
                    if column < offset + port.len() {
                        return port[column - offset].into_iter().collect();
                    }
                    offset += port.len();
                }
                Vec::new()
            }
            NodeSpec::Concatenate => self
                .data_inputs
                .iter()
                .filter_map(|port| port.get(column).copied().flatten())
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeKind {
    Spec,
    Data,
    Control,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
}

/// Points in the compilation pipeline at which the graph is handed to a [`GraphLogger`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GraphStage {
    Built,
    AccessesTraced,
    ExecTraced,
    Optimized,
    OrderingEdges,
    WrappersRemoved,
}

impl fmt::Display for GraphStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Built => "built",
            Self::AccessesTraced => "accesses traced",
            Self::ExecTraced => "exec traced",
            Self::Optimized => "optimized",
            Self::OrderingEdges => "ordering edges",
            Self::WrappersRemoved => "wrappers removed",
        })
    }
}

/// Arena of nodes addressed by [`NodeId`]. Removed nodes leave a hole; ids are never reused.
#[derive(Clone, Debug)]
pub struct TransformGraph {
    nodes: Vec<Option<Node>>,
    consumer: NodeId,
}

impl TransformGraph {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            consumer: NodeId(0),
        }
    }

    pub fn consumer(&self) -> NodeId {
        self.consumer
    }

    pub(crate) fn set_consumer(&mut self, consumer: NodeId) {
        self.consumer = consumer;
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub(crate) fn expect_node(&self, id: NodeId) -> VtResult<&Node> {
        self.node(id)
            .ok_or_else(|| VtError::internal(format!("node {id} does not exist")))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> VtResult<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| VtError::internal(format!("node {id} does not exist")))
    }

    /// Live nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.nodes().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes().map(|n| n.id).collect()
    }

    pub fn count(&self, kind: SpecKind) -> usize {
        self.nodes().filter(|n| n.spec.kind() == kind).count()
    }

    /// Id the next pushed node will get.
    pub(crate) fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len())
    }

    pub(crate) fn push(
        &mut self,
        spec: NodeSpec,
        schema: ColumnarSchema,
        inputs: Vec<NodeId>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(Node {
            id,
            spec,
            schema,
            inputs,
            outputs: Vec::new(),
            data_inputs: Vec::new(),
            ctrl_inputs: Vec::new(),
        }));
        id
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.get_mut(id.0).and_then(Option::take)
    }

    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        for node in self.nodes() {
            for &from in &node.inputs {
                edges.push(Edge {
                    from,
                    to: node.id,
                    kind: EdgeKind::Spec,
                });
            }
            let mut producers: Vec<NodeId> = node
                .data_inputs
                .iter()
                .flatten()
                .flatten()
                .map(|a| a.node)
                .collect();
            producers.sort_unstable();
            producers.dedup();
            edges.extend(producers.into_iter().map(|from| Edge {
                from,
                to: node.id,
                kind: EdgeKind::Data,
            }));
            for &from in &node.ctrl_inputs {
                edges.push(Edge {
                    from,
                    to: node.id,
                    kind: EdgeKind::Control,
                });
            }
        }
        edges
    }

    /// For every node, the nodes that list it as a structural input.
    pub(crate) fn structural_consumers(&self) -> HashMap<NodeId, Vec<NodeId>> {
        let mut consumers: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for node in self.nodes() {
            for &input in &node.inputs {
                let entry = consumers.entry(input).or_default();
                if !entry.contains(&node.id) {
                    entry.push(node.id);
                }
            }
        }
        consumers
    }

    /// Nodes reachable from the consumer through structural edges.
    pub(crate) fn structurally_reachable(&self) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut stack = vec![self.consumer];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.node(id) {
                stack.extend(node.inputs.iter().copied());
            }
        }
        seen
    }

    /// Drivers reachable from `driver` through control edges, `driver` included.
    pub(crate) fn row_domain(&self, driver: NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut stack = vec![driver];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.node(id) {
                stack.extend(node.ctrl_inputs.iter().copied());
            }
        }
        seen
    }

    /// Lockstep nodes advanced directly by `driver`.
    pub(crate) fn lockstep_users(&self, driver: NodeId) -> Vec<NodeId> {
        self.nodes()
            .filter(|n| n.role() == NodeRole::Lockstep && n.ctrl_inputs.contains(&driver))
            .map(|n| n.id)
            .collect()
    }

    /// Whether any observer sees rows of a driver in `domain`.
    pub(crate) fn observes_any(&self, domain: &HashSet<NodeId>) -> bool {
        self.nodes().any(|n| {
            matches!(n.spec, NodeSpec::Observe(_))
                && n.ctrl_inputs.iter().any(|d| domain.contains(d))
        })
    }

    /// The node whose rows `id` advances with, following structural inputs through lockstep,
    /// constant and wrapper nodes.
    pub(crate) fn driver_of(&self, id: NodeId) -> VtResult<NodeId> {
        let mut current = id;
        loop {
            let node = self.expect_node(current)?;
            match node.role() {
                NodeRole::Driver => return Ok(current),
                NodeRole::Sink => {
                    return Err(VtError::internal(format!(
                        "consumer {current} cannot drive other nodes"
                    )))
                }
                NodeRole::Lockstep | NodeRole::Constant | NodeRole::Wrapper => {
                    current = node.inputs.first().copied().ok_or_else(|| {
                        VtError::internal(format!("{} {current} has no input", node.spec.kind()))
                    })?;
                }
            }
        }
    }

    /// Row count of a driver, if it can be derived from source sizes.
    pub(crate) fn row_count(&self, driver: NodeId) -> Option<u64> {
        let node = self.node(driver)?;
        match &node.spec {
            NodeSpec::Source { spec, rows, .. } => spec.properties.size.map(|n| rows.num_selected(n)),
            NodeSpec::Slice(range) => {
                let input = *node.ctrl_inputs.first()?;
                self.row_count(input).map(|n| range.num_selected(n))
            }
            NodeSpec::Concatenate => node
                .ctrl_inputs
                .iter()
                .map(|&d| self.row_count(d))
                .sum::<Option<u64>>(),
            NodeSpec::Append { .. } => node
                .ctrl_inputs
                .iter()
                .map(|&d| self.row_count(d))
                .collect::<Option<Vec<u64>>>()
                .map(|counts| counts.into_iter().max().unwrap_or(0)),
            NodeSpec::Aggregate(_) => Some(1),
            _ => None,
        }
    }

    /// Rewrite every reference to access `old` (outputs and data inputs) into `new`.
    pub(crate) fn replace_access(&mut self, old: AccessId, new: AccessId) {
        for node in self.nodes.iter_mut().flatten() {
            for output in &mut node.outputs {
                if *output == old {
                    *output = new;
                }
            }
            for access in node.data_inputs.iter_mut().flatten().flatten() {
                if *access == old {
                    *access = new;
                }
            }
        }
    }

    pub(crate) fn replace_ctrl(&mut self, old: NodeId, new: NodeId) {
        for node in self.nodes.iter_mut().flatten() {
            for ctrl in &mut node.ctrl_inputs {
                if *ctrl == old {
                    *ctrl = new;
                }
            }
        }
    }

    pub(crate) fn replace_input(&mut self, old: NodeId, new: NodeId) {
        for node in self.nodes.iter_mut().flatten() {
            for input in &mut node.inputs {
                if *input == old {
                    *input = new;
                }
            }
        }
    }

    /// Remove `id`, reconnecting each structural consumer to `id`'s own inputs.
    pub(crate) fn splice(&mut self, id: NodeId) -> VtResult<()> {
        let removed = self
            .remove(id)
            .ok_or_else(|| VtError::internal(format!("cannot splice missing node {id}")))?;
        for node in self.nodes.iter_mut().flatten() {
            if !node.inputs.contains(&id) {
                continue;
            }
            let mut inputs = Vec::with_capacity(node.inputs.len() + removed.inputs.len());
            for &input in &node.inputs {
                if input == id {
                    inputs.extend(removed.inputs.iter().copied());
                } else {
                    inputs.push(input);
                }
            }
            node.inputs = inputs;
        }
        Ok(())
    }
}

impl fmt::Display for TransformGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in self.nodes() {
            write!(f, "{} {}", node.id, node.spec.kind())?;
            match &node.spec {
                NodeSpec::Source {
                    spec,
                    columns,
                    rows,
                } => write!(
                    f,
                    "({}) {}",
                    spec.source_id,
                    crate::selection::Selection::new(columns.clone(), *rows)
                )?,
                NodeSpec::SelectColumns(indices) | NodeSpec::Permute(indices) => {
                    write!(f, "{indices:?}")?
                }
                NodeSpec::Slice(range) => write!(
                    f,
                    "[{},{})",
                    range.from_index(),
                    range.to_index()
                )?,
                _ => {}
            }
            write!(f, " {}", node.schema)?;
            write_ids(f, " inputs", &node.inputs)?;
            if !node.data_inputs.is_empty() {
                f.write_str(" data=[")?;
                for (port, accesses) in node.data_inputs.iter().enumerate() {
                    if port > 0 {
                        f.write_str(" | ")?;
                    }
                    for (idx, access) in accesses.iter().enumerate() {
                        if idx > 0 {
                            f.write_str(", ")?;
                        }
                        match access {
                            Some(access) => write!(f, "{access}")?,
                            None => f.write_str("_")?,
                        }
                    }
                }
                f.write_str("]")?;
            }
            write_ids(f, " ctrl", &node.ctrl_inputs)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

fn write_ids(f: &mut fmt::Formatter<'_>, label: &str, ids: &[NodeId]) -> fmt::Result {
    if ids.is_empty() {
        return Ok(());
    }
    write!(f, "{label}=[")?;
    for (idx, id) in ids.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{id}")?;
    }
    f.write_str("]")
}
