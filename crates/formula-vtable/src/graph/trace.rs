use crate::error::{VtError, VtResult};
use crate::graph::{AccessId, NodeId, NodeRole, NodeSpec, TransformGraph};

/// Assign output accesses to every node and record which accesses each node reads.
///
/// Producers (sources, maps, aggregations, appends, concatenations) mint fresh access ids; slices,
/// observes, identities and projections forward the ids of their input; append-missing forwards
/// its input and mints ids for the added columns.
pub fn trace_accesses(graph: &mut TransformGraph) -> VtResult<()> {
    for id in graph.ids() {
        let node = graph.expect_node(id)?;
        let upstream = node
            .inputs
            .iter()
            .map(|&input| graph.expect_node(input).map(|n| n.outputs.clone()))
            .collect::<VtResult<Vec<_>>>()?;
        let width = node.schema.num_columns();
        let own = || (0..width).map(|column| AccessId::new(id, column)).collect::<Vec<_>>();
        let first = || upstream.first().cloned().unwrap_or_default();

        let (outputs, data_inputs) = match &node.spec {
            NodeSpec::Source { .. } => (own(), Vec::new()),
            NodeSpec::SelectColumns(columns) | NodeSpec::Permute(columns) => {
                (pick(&first(), columns, id)?, Vec::new())
            }
            NodeSpec::Slice(_) | NodeSpec::Identity => (first(), Vec::new()),
            NodeSpec::Observe(observe) => (
                first(),
                vec![wrap(pick(&first(), &observe.columns, id)?)],
            ),
            NodeSpec::Append { .. } | NodeSpec::Concatenate => (
                own(),
                upstream.iter().map(|port| wrap(port.clone())).collect(),
            ),
            NodeSpec::AppendMissing(missing) => {
                let mut outputs = first();
                outputs.extend((0..missing.num_columns()).map(|column| AccessId::new(id, column)));
                (outputs, Vec::new())
            }
            NodeSpec::Map(map) => (own(), vec![wrap(pick(&first(), &map.columns, id)?)]),
            NodeSpec::Aggregate(aggregate) => (
                own(),
                vec![wrap(pick(&first(), &aggregate.columns, id)?)],
            ),
            NodeSpec::Consumer => (Vec::new(), vec![wrap(first())]),
        };

        let node = graph.node_mut(id)?;
        node.outputs = outputs;
        node.data_inputs = data_inputs;
    }
    Ok(())
}

/// Assign control inputs: every driver, lockstep node and the consumer is advanced by the driver
/// of each of its inputs.
pub fn trace_exec(graph: &mut TransformGraph) -> VtResult<()> {
    for id in graph.ids() {
        let node = graph.expect_node(id)?;
        let ctrl_inputs = match (node.role(), &node.spec) {
            (NodeRole::Driver, NodeSpec::Source { .. }) => Vec::new(),
            (NodeRole::Driver | NodeRole::Lockstep | NodeRole::Sink, _) => node
                .inputs
                .iter()
                .map(|&input| graph.driver_of(input))
                .collect::<VtResult<Vec<_>>>()?,
            (NodeRole::Wrapper | NodeRole::Constant, _) => Vec::new(),
        };
        graph.node_mut(id)?.ctrl_inputs = ctrl_inputs;
    }
    Ok(())
}

fn pick(upstream: &[AccessId], columns: &[usize], node: NodeId) -> VtResult<Vec<AccessId>> {
    columns
        .iter()
        .map(|&column| {
            upstream.get(column).copied().ok_or_else(|| {
                VtError::internal(format!("{node} reads column {column} its input lacks"))
            })
        })
        .collect()
}

fn wrap(accesses: Vec<AccessId>) -> Vec<Option<AccessId>> {
    accesses.into_iter().map(Some).collect()
}
