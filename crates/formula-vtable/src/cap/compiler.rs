use crate::cap::{CapAccessId, CapNode, CursorAssemblyPlan};
use crate::error::{VtError, VtResult};
use crate::executor::CompileOptions;
use crate::graph::{
    build_graph, create_execution_ordering_edges, flatten, optimize, remove_wrapper_nodes,
    trace_accesses, trace_exec, AccessId, GraphLogger, GraphStage, Node, NodeId, NodeSpec,
    TransformGraph,
};
use crate::selection::Selection;
use crate::spec::TableTransform;
use std::collections::HashMap;

/// Compile a transform DAG into a cursor assembly plan.
///
/// Runs the whole graph pipeline, handing the graph to `logger` after every stage.
pub fn compile(
    terminal: &TableTransform,
    options: &CompileOptions,
    logger: &mut dyn GraphLogger,
) -> VtResult<CursorAssemblyPlan> {
    let mut graph = build_graph(terminal)?;
    logger.log(GraphStage::Built, &graph);

    trace_accesses(&mut graph)?;
    logger.log(GraphStage::AccessesTraced, &graph);

    trace_exec(&mut graph)?;
    logger.log(GraphStage::ExecTraced, &graph);

    if options.optimize {
        optimize(&mut graph)?;
        logger.log(GraphStage::Optimized, &graph);
    } else {
        log::debug!("skipping graph optimization");
    }

    create_execution_ordering_edges(&mut graph)?;
    logger.log(GraphStage::OrderingEdges, &graph);

    remove_wrapper_nodes(&mut graph)?;
    logger.log(GraphStage::WrappersRemoved, &graph);

    let order = flatten(&graph, options.tie_break)?;
    let plan = compile_graph(&graph, &order)?;
    log::debug!(
        "compiled {} graph node(s) into {} instruction(s)",
        graph.len(),
        plan.len()
    );
    Ok(plan)
}

/// Turn a wrapper-free graph into instructions, in the given topological order.
///
/// The consumer must come last and every reference must point at a node emitted before the
/// referencing one.
pub fn compile_graph(graph: &TransformGraph, order: &[NodeId]) -> VtResult<CursorAssemblyPlan> {
    let mut index: HashMap<NodeId, usize> = HashMap::with_capacity(order.len());
    let mut nodes = Vec::with_capacity(order.len());

    for &id in order {
        let node = graph.expect_node(id)?;
        let instruction = match &node.spec {
            NodeSpec::Source {
                spec,
                columns,
                rows,
            } => CapNode::Source {
                source_id: spec.source_id.clone(),
                schema: spec.schema.clone(),
                properties: spec.properties,
                selection: Selection::new(columns.clone(), *rows),
            },
            NodeSpec::AppendMissing(schema) => CapNode::AppendMissing {
                schema: schema.clone(),
            },
            NodeSpec::Slice(range) => CapNode::Slice {
                predecessor: single_predecessor(&index, node)?,
                range: *range,
            },
            NodeSpec::Map(map) => CapNode::Map {
                predecessor: single_predecessor(&index, node)?,
                inputs: required_accesses(&index, node, 0)?,
                mapper: map.mapper.clone(),
            },
            NodeSpec::Observe(observe) => CapNode::Observe {
                predecessor: single_predecessor(&index, node)?,
                inputs: required_accesses(&index, node, 0)?,
                observer: observe.observer.clone(),
            },
            NodeSpec::Append {
                short_circuit: false,
            } => CapNode::Append {
                schema: node.schema.clone(),
                predecessors: predecessors(&index, node)?,
                inputs: optional_accesses(&index, node)?,
            },
            NodeSpec::Concatenate => CapNode::Concatenate {
                schema: node.schema.clone(),
                predecessors: predecessors(&index, node)?,
                inputs: optional_accesses(&index, node)?,
            },
            NodeSpec::Aggregate(aggregate) => CapNode::Aggregate {
                predecessors: predecessors(&index, node)?,
                inputs: (0..node.data_inputs.len())
                    .map(|port| required_accesses(&index, node, port))
                    .collect::<VtResult<_>>()?,
                aggregator: aggregate.aggregator.clone(),
            },
            NodeSpec::Consumer => CapNode::Consumer {
                predecessor: single_predecessor(&index, node)?,
                inputs: required_accesses(&index, node, 0)?,
            },
            NodeSpec::SelectColumns(_)
            | NodeSpec::Permute(_)
            | NodeSpec::Identity
            | NodeSpec::Append {
                short_circuit: true,
            } => {
                return Err(VtError::internal(format!(
                    "wrapper {} {id} survived until compilation",
                    node.spec.kind()
                )))
            }
        };
        index.insert(id, nodes.len());
        nodes.push(instruction);
    }

    let consumer = graph.expect_node(graph.consumer())?;
    if order.last() != Some(&consumer.id) {
        return Err(VtError::internal(format!(
            "consumer {} is not the last node of the execution order",
            consumer.id
        )));
    }
    Ok(CursorAssemblyPlan::new(consumer.schema.clone(), nodes))
}

fn instruction(index: &HashMap<NodeId, usize>, id: NodeId, user: NodeId) -> VtResult<usize> {
    index.get(&id).copied().ok_or_else(|| {
        VtError::internal(format!("{user} references {id}, which is not compiled yet"))
    })
}

fn access(index: &HashMap<NodeId, usize>, access: AccessId, user: NodeId) -> VtResult<CapAccessId> {
    Ok(CapAccessId::new(
        instruction(index, access.node, user)?,
        access.column,
    ))
}

fn single_predecessor(index: &HashMap<NodeId, usize>, node: &Node) -> VtResult<usize> {
    match node.ctrl_inputs[..] {
        [driver] => instruction(index, driver, node.id),
        _ => Err(VtError::internal(format!(
            "{} {} has {} control inputs, expected one",
            node.spec.kind(),
            node.id,
            node.ctrl_inputs.len()
        ))),
    }
}

fn predecessors(index: &HashMap<NodeId, usize>, node: &Node) -> VtResult<Vec<usize>> {
    if node.ctrl_inputs.len() != node.data_inputs.len() {
        return Err(VtError::internal(format!(
            "{} {} has {} control inputs for {} ports",
            node.spec.kind(),
            node.id,
            node.ctrl_inputs.len(),
            node.data_inputs.len()
        )));
    }
    node.ctrl_inputs
        .iter()
        .map(|&driver| instruction(index, driver, node.id))
        .collect()
}

fn required_accesses(
    index: &HashMap<NodeId, usize>,
    node: &Node,
    port: usize,
) -> VtResult<Vec<CapAccessId>> {
    let Some(accesses) = node.data_inputs.get(port) else {
        return Err(VtError::internal(format!(
            "{} {} has no data port {port}",
            node.spec.kind(),
            node.id
        )));
    };
    accesses
        .iter()
        .enumerate()
        .map(|(column, slot)| match slot {
            Some(a) => access(index, *a, node.id),
            None => Err(VtError::internal(format!(
                "{} {} lost input {column} of port {port}",
                node.spec.kind(),
                node.id
            ))),
        })
        .collect()
}

fn optional_accesses(
    index: &HashMap<NodeId, usize>,
    node: &Node,
) -> VtResult<Vec<Vec<Option<CapAccessId>>>> {
    node.data_inputs
        .iter()
        .map(|port| {
            port.iter()
                .map(|slot| slot.map(|a| access(index, a, node.id)).transpose())
                .collect()
        })
        .collect()
}
