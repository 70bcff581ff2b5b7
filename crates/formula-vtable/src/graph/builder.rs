use crate::error::{VtError, VtResult};
use crate::graph::{NodeId, NodeSpec, TransformGraph};
use crate::schema::ColumnarSchema;
use crate::spec::{SourceId, TableTransform, TableTransformSpec};
use std::collections::HashMap;

/// Expand the transform DAG below `terminal` into a graph topped by a consumer node.
///
/// Every occurrence of a transform becomes its own node: a transform reached through two
/// different paths is instantiated twice. Node ids are assigned in post-order, so inputs always
/// have smaller ids than their consumers.
pub fn build_graph(terminal: &TableTransform) -> VtResult<TransformGraph> {
    let mut builder = GraphBuilder {
        graph: TransformGraph::new(),
        sources: HashMap::new(),
    };
    let root = builder.add(terminal)?;
    let schema = builder.graph.expect_node(root)?.schema.clone();
    let consumer = builder.graph.push(NodeSpec::Consumer, schema, vec![root]);
    builder.graph.set_consumer(consumer);
    log::debug!(
        "built transform graph with {} nodes over {} source(s)",
        builder.graph.len(),
        builder.sources.len()
    );
    Ok(builder.graph)
}

struct GraphBuilder {
    graph: TransformGraph,
    sources: HashMap<SourceId, ColumnarSchema>,
}

impl GraphBuilder {
    fn add(&mut self, transform: &TableTransform) -> VtResult<NodeId> {
        let spec = transform.spec();
        let inputs = transform
            .predecessors()
            .iter()
            .map(|predecessor| self.add(predecessor))
            .collect::<VtResult<Vec<_>>>()?;

        let next_id = self.graph.next_id().index();
        let input_schemas = inputs
            .iter()
            .map(|&input| self.graph.expect_node(input).map(|n| &n.schema))
            .collect::<VtResult<Vec<_>>>()?;
        let schema = spec.output_schema(&input_schemas, Some(next_id))?;

        if let TableTransformSpec::Source(source) = spec {
            match self.sources.get(&source.source_id) {
                Some(first) if *first != source.schema => {
                    return Err(VtError::ConflictingSource {
                        source_id: source.source_id.clone(),
                        first: first.clone(),
                        second: source.schema.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    self.sources
                        .insert(source.source_id.clone(), source.schema.clone());
                }
            }
        }

        Ok(self
            .graph
            .push(NodeSpec::from_transform(spec), schema, inputs))
    }
}
