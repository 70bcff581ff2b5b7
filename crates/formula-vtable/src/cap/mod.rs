//! Cursor Assembly Plans.
//!
//! A plan is a flat list of instructions in dependency order. Every reference (predecessor or
//! access) points to an earlier instruction; the last instruction is the consumer whose inputs
//! form the rows of the resulting table.

mod compiler;
mod executor;

pub use crate::cap::compiler::{compile, compile_graph};
pub use crate::cap::executor::{CapExecutor, CapTable};

use crate::function::{AggregatorFactory, MapperFactory, ObserverFactory};
use crate::schema::ColumnarSchema;
use crate::selection::{RowRangeSelection, Selection};
use crate::spec::{SourceId, SourceProperties};
use std::fmt;
use std::sync::Arc;

/// Output column `column` of instruction `node`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapAccessId {
    pub node: usize,
    pub column: usize,
}

impl CapAccessId {
    pub fn new(node: usize, column: usize) -> Self {
        Self { node, column }
    }
}

impl fmt::Display for CapAccessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.column)
    }
}

#[derive(Clone, Debug)]
pub enum CapNode {
    Source {
        source_id: SourceId,
        schema: ColumnarSchema,
        properties: SourceProperties,
        selection: Selection,
    },
    /// All-missing accesses of the given schema; no rows of its own.
    AppendMissing {
        schema: ColumnarSchema,
    },
    Slice {
        predecessor: usize,
        range: RowRangeSelection,
    },
    Map {
        predecessor: usize,
        inputs: Vec<CapAccessId>,
        mapper: Arc<dyn MapperFactory>,
    },
    Observe {
        predecessor: usize,
        inputs: Vec<CapAccessId>,
        observer: Arc<dyn ObserverFactory>,
    },
    /// Lockstep combination; `inputs[i]` lists the accesses contributed by `predecessors[i]`.
    Append {
        schema: ColumnarSchema,
        predecessors: Vec<usize>,
        inputs: Vec<Vec<Option<CapAccessId>>>,
    },
    Concatenate {
        schema: ColumnarSchema,
        predecessors: Vec<usize>,
        inputs: Vec<Vec<Option<CapAccessId>>>,
    },
    Aggregate {
        predecessors: Vec<usize>,
        inputs: Vec<Vec<CapAccessId>>,
        aggregator: Arc<dyn AggregatorFactory>,
    },
    Consumer {
        predecessor: usize,
        inputs: Vec<CapAccessId>,
    },
}

impl CapNode {
    /// Instructions whose rows this one advances.
    pub fn predecessors(&self) -> &[usize] {
        match self {
            Self::Source { .. } | Self::AppendMissing { .. } => &[],
            Self::Slice { predecessor, .. }
            | Self::Map { predecessor, .. }
            | Self::Observe { predecessor, .. }
            | Self::Consumer { predecessor, .. } => std::slice::from_ref(predecessor),
            Self::Append { predecessors, .. }
            | Self::Concatenate { predecessors, .. }
            | Self::Aggregate { predecessors, .. } => predecessors,
        }
    }

    /// Every access this instruction reads.
    pub fn accesses(&self) -> Vec<CapAccessId> {
        match self {
            Self::Source { .. } | Self::AppendMissing { .. } | Self::Slice { .. } => Vec::new(),
            Self::Map { inputs, .. } | Self::Observe { inputs, .. } | Self::Consumer { inputs, .. } => {
                inputs.clone()
            }
            Self::Append { inputs, .. } | Self::Concatenate { inputs, .. } => {
                inputs.iter().flatten().flatten().copied().collect()
            }
            Self::Aggregate { inputs, .. } => inputs.iter().flatten().copied().collect(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Source { .. } => "Source",
            Self::AppendMissing { .. } => "AppendMissing",
            Self::Slice { .. } => "Slice",
            Self::Map { .. } => "Map",
            Self::Observe { .. } => "Observe",
            Self::Append { .. } => "Append",
            Self::Concatenate { .. } => "Concatenate",
            Self::Aggregate { .. } => "Aggregate",
            Self::Consumer { .. } => "Consumer",
        }
    }
}

/// A compiled, immutable execution plan.
#[derive(Clone, Debug)]
pub struct CursorAssemblyPlan {
    schema: ColumnarSchema,
    nodes: Vec<CapNode>,
}

impl CursorAssemblyPlan {
    pub(crate) fn new(schema: ColumnarSchema, nodes: Vec<CapNode>) -> Self {
        Self { schema, nodes }
    }

    /// Schema of the rows the plan produces.
    pub fn schema(&self) -> &ColumnarSchema {
        &self.schema
    }

    pub fn nodes(&self) -> &[CapNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Source ids in instruction order, duplicates included.
    pub fn source_ids(&self) -> impl Iterator<Item = &SourceId> + '_ {
        self.nodes.iter().filter_map(|node| match node {
            CapNode::Source { source_id, .. } => Some(source_id),
            _ => None,
        })
    }
}

impl fmt::Display for CursorAssemblyPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, node) in self.nodes.iter().enumerate() {
            write!(f, "{idx}: {}", node.name())?;
            match node {
                CapNode::Source {
                    source_id,
                    selection,
                    ..
                } => write!(f, "({source_id}) {selection}")?,
                CapNode::AppendMissing { schema } => write!(f, " {schema}")?,
                CapNode::Slice { range, .. } => {
                    write!(f, " [{},{})", range.from_index(), range.to_index())?
                }
                _ => {}
            }
            let predecessors = node.predecessors();
            if !predecessors.is_empty() {
                write!(f, " <- {predecessors:?}")?;
            }
            let accesses = node.accesses();
            if !accesses.is_empty() {
                f.write_str(" reads")?;
                for access in accesses {
                    write!(f, " {access}")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
