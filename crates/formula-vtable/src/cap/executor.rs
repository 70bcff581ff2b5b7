use crate::access::{AccessRef, MissingAccess};
use crate::cap::{CapAccessId, CapNode, CursorAssemblyPlan};
use crate::cursor::{
    AggregateCursor, AppendBranch, AppendedCursor, BoxedCursor, ConcatBranch, ConcatenatedCursor,
    Cursor, DeferredSourceCursor, MapCursor, ObserverCursor, RowViewCursor, SliceCursor,
};
use crate::error::{VtError, VtResult};
use crate::row::Row;
use crate::schema::{ColumnarSchema, DataKind};
use crate::selection::{ColumnSelection, RowRangeSelection, Selection};
use crate::spec::{bind_source, SourceId};
use crate::table::RowAccessible;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Binds a [`CursorAssemblyPlan`] to backing tables.
#[derive(Clone, Debug)]
pub struct CapExecutor {
    plan: Arc<CursorAssemblyPlan>,
}

impl CapExecutor {
    pub fn new(plan: Arc<CursorAssemblyPlan>) -> Self {
        Self { plan }
    }

    pub fn plan(&self) -> &Arc<CursorAssemblyPlan> {
        &self.plan
    }

    /// Resolve every source instruction against `sources`.
    ///
    /// Fails with [`VtError::UnknownSource`] for unbound ids, [`VtError::SchemaMismatch`] when a
    /// bound table does not have the declared column kinds and [`VtError::SizeMismatch`] when it
    /// reports a row count other than the declared one.
    pub fn execute(
        &self,
        sources: &HashMap<SourceId, Arc<dyn RowAccessible>>,
    ) -> VtResult<CapTable> {
        let mut tables = Vec::with_capacity(self.plan.len());
        for node in self.plan.nodes() {
            let table = match node {
                CapNode::Source {
                    source_id,
                    schema,
                    properties,
                    ..
                } => Some(bind_source(sources, source_id, schema, properties)?.clone()),
                _ => None,
            };
            tables.push(table);
        }
        Ok(CapTable {
            plan: self.plan.clone(),
            tables,
        })
    }
}

/// Table whose cursors are assembled from a plan on demand.
///
/// Every [`create_cursor`](RowAccessible::create_cursor) call builds a fresh cursor network. Only
/// the instructions contributing to the selected columns or to the row count are instantiated;
/// observers are always kept.
pub struct CapTable {
    plan: Arc<CursorAssemblyPlan>,
    tables: Vec<Option<Arc<dyn RowAccessible>>>,
}

impl fmt::Debug for CapTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapTable")
            .field("schema", self.plan.schema())
            .field("instructions", &self.plan.len())
            .finish()
    }
}

impl CapTable {
    pub fn plan(&self) -> &Arc<CursorAssemblyPlan> {
        &self.plan
    }

    fn row_counts(&self) -> Vec<Option<u64>> {
        let mut counts: Vec<Option<u64>> = Vec::with_capacity(self.plan.len());
        for (idx, node) in self.plan.nodes().iter().enumerate() {
            let count = match node {
                CapNode::Source { selection, .. } => self.tables[idx]
                    .as_ref()
                    .and_then(|t| t.size())
                    .map(|n| selection.rows().num_selected(n)),
                CapNode::AppendMissing { .. } => None,
                CapNode::Slice { predecessor, range } => {
                    counts[*predecessor].map(|n| range.num_selected(n))
                }
                CapNode::Map { predecessor, .. }
                | CapNode::Observe { predecessor, .. }
                | CapNode::Consumer { predecessor, .. } => counts[*predecessor],
                CapNode::Append { predecessors, .. } => predecessors
                    .iter()
                    .map(|&p| counts[p])
                    .collect::<Option<Vec<u64>>>()
                    .map(|c| c.into_iter().max().unwrap_or(0)),
                CapNode::Concatenate { predecessors, .. } => {
                    predecessors.iter().map(|&p| counts[p]).sum()
                }
                CapNode::Aggregate { .. } => Some(1),
            };
            counts.push(count);
        }
        counts
    }
}

impl RowAccessible for CapTable {
    fn schema(&self) -> &ColumnarSchema {
        self.plan.schema()
    }

    fn create_cursor(&self, selection: &Selection) -> VtResult<BoxedCursor> {
        let Some((CapNode::Consumer { predecessor, inputs }, _)) = self.plan.nodes().split_last()
        else {
            return Err(VtError::internal("plan does not end in a consumer"));
        };
        let mut assembly = Assembly::new(&self.plan, &self.tables, selection);
        assembly.push_rows(*predecessor, selection.rows());
        log::trace!(
            "assembling {} of {} instruction(s) for {selection}",
            assembly.live.iter().filter(|&&live| live).count(),
            self.plan.len()
        );
        match assembly.build_consumer(*predecessor, inputs, selection.columns()) {
            Ok(cursor) => assembly.finish(cursor),
            Err(err) => {
                assembly.close_all();
                Err(err)
            }
        }
    }

    fn size(&self) -> Option<u64> {
        self.row_counts().last().copied().flatten()
    }
}

/// State of one cursor network under construction.
struct Assembly<'a> {
    nodes: &'a [CapNode],
    tables: &'a [Option<Arc<dyn RowAccessible>>],
    schema: &'a ColumnarSchema,
    /// Output columns of each instruction read by some live instruction.
    needed: Vec<BTreeSet<usize>>,
    /// Whether some live instruction advances this one.
    reached: Vec<bool>,
    live: Vec<bool>,
    /// Row ranges narrowed by the requested selection.
    rows: HashMap<usize, RowRangeSelection>,
    /// Range applied on top of the consumer's predecessor when it could not be pushed down.
    top_rows: Option<RowRangeSelection>,
    cursors: Vec<Option<BoxedCursor>>,
    outputs: Vec<Vec<AccessRef>>,
}

impl<'a> Assembly<'a> {
    fn new(
        plan: &'a CursorAssemblyPlan,
        tables: &'a [Option<Arc<dyn RowAccessible>>],
        selection: &Selection,
    ) -> Self {
        let nodes = plan.nodes();
        let n = nodes.len();
        let mut assembly = Self {
            nodes,
            tables,
            schema: plan.schema(),
            needed: vec![BTreeSet::new(); n],
            reached: vec![false; n],
            live: vec![false; n],
            rows: HashMap::new(),
            top_rows: None,
            cursors: (0..n).map(|_| None).collect(),
            outputs: vec![Vec::new(); n],
        };
        assembly.trace_liveness(selection.columns());
        assembly
    }

    /// Walk the plan backwards from the consumer, marking what has to be instantiated.
    fn trace_liveness(&mut self, columns: &ColumnSelection) {
        let nodes = self.nodes;
        for idx in (0..nodes.len()).rev() {
            let node = &nodes[idx];
            let live = match node {
                CapNode::Consumer { .. } => true,
                CapNode::Map { .. } | CapNode::AppendMissing { .. } => !self.needed[idx].is_empty(),
                CapNode::Observe { .. } => self.reached[idx],
                _ => self.reached[idx] || !self.needed[idx].is_empty(),
            };
            self.live[idx] = live;
            if live || self.reached[idx] {
                for &p in node.predecessors() {
                    self.reached[p] = true;
                }
            }
            if !live {
                continue;
            }
            let read: Vec<CapAccessId> = match node {
                CapNode::Consumer { inputs, .. } => inputs
                    .iter()
                    .enumerate()
                    .filter(|&(column, _)| columns.is_selected(column))
                    .map(|(_, &a)| a)
                    .collect(),
                CapNode::Append { inputs, .. } => {
                    let mut read = Vec::new();
                    let mut offset = 0;
                    for port in inputs {
                        for (column, slot) in port.iter().enumerate() {
                            if let Some(a) = slot {
                                if self.needed[idx].contains(&(offset + column)) {
                                    read.push(*a);
                                }
                            }
                        }
                        offset += port.len();
                    }
                    read
                }
                CapNode::Concatenate { inputs, .. } => inputs
                    .iter()
                    .flat_map(|port| port.iter().enumerate())
                    .filter(|(column, _)| self.needed[idx].contains(column))
                    .filter_map(|(_, slot)| *slot)
                    .collect(),
                _ => node.accesses(),
            };
            for a in read {
                self.needed[a.node].insert(a.column);
            }
        }
    }

    /// Skip over maps nobody reads.
    fn resolve(&self, mut idx: usize) -> usize {
        while let CapNode::Map { predecessor, .. } = &self.nodes[idx] {
            if self.live[idx] {
                break;
            }
            idx = *predecessor;
        }
        idx
    }

    /// Narrow the row range of the instruction driving the consumer.
    ///
    /// The range is composed into the nearest slice or source below live maps. Below an observer
    /// nothing is narrowed: the range is applied on top so the observer sees the same prefix of
    /// rows it would see without the narrowing.
    fn push_rows(&mut self, predecessor: usize, rows: RowRangeSelection) {
        if rows.is_all() {
            return;
        }
        let nodes = self.nodes;
        let mut idx = self.resolve(predecessor);
        let mut observed = false;
        loop {
            match &nodes[idx] {
                CapNode::Map { predecessor, .. } => idx = self.resolve(*predecessor),
                CapNode::Observe { predecessor, .. } => {
                    observed = true;
                    idx = self.resolve(*predecessor);
                }
                CapNode::Slice { range, .. } if !observed => {
                    self.rows.insert(idx, range.retain_range(&rows));
                    return;
                }
                CapNode::Source { selection, .. } if !observed => {
                    self.rows.insert(idx, selection.rows().retain_range(&rows));
                    return;
                }
                _ => {
                    self.top_rows = Some(rows);
                    return;
                }
            }
        }
    }

    fn take(&mut self, idx: usize) -> VtResult<BoxedCursor> {
        let idx = self.resolve(idx);
        self.cursors[idx].take().ok_or_else(|| {
            VtError::internal(format!(
                "cursor of instruction {idx} is missing or already claimed"
            ))
        })
    }

    fn access(&self, a: CapAccessId) -> VtResult<AccessRef> {
        self.outputs
            .get(a.node)
            .and_then(|outputs| outputs.get(a.column))
            .cloned()
            .ok_or_else(|| VtError::internal(format!("access {a} was not instantiated")))
    }

    fn accesses(&self, accesses: &[CapAccessId]) -> VtResult<Vec<AccessRef>> {
        accesses.iter().map(|&a| self.access(a)).collect()
    }

    fn build(&mut self, idx: usize) -> VtResult<()> {
        let nodes = self.nodes;
        match &nodes[idx] {
            CapNode::Source { selection, .. } => {
                let table = self.tables[idx]
                    .clone()
                    .ok_or_else(|| VtError::internal(format!("source {idx} is not bound")))?;
                let columns = ColumnSelection::of(self.needed[idx].iter().copied())
                    .intersect(selection.columns());
                let rows = self.rows.get(&idx).copied().unwrap_or(selection.rows());
                let cursor = DeferredSourceCursor::new(table, Selection::new(columns, rows))?;
                self.outputs[idx] = cursor.access().accesses().to_vec();
                self.cursors[idx] = Some(Box::new(cursor));
            }
            CapNode::AppendMissing { schema } => {
                self.outputs[idx] = Row::missing(schema).accesses().to_vec();
            }
            CapNode::Slice { predecessor, range } => {
                let range = self.rows.get(&idx).copied().unwrap_or(*range);
                let inner = self.take(*predecessor)?;
                self.cursors[idx] = Some(Box::new(SliceCursor::new(inner, range)));
            }
            CapNode::Map {
                predecessor,
                inputs,
                mapper,
            } => {
                let inputs = self.accesses(inputs)?;
                let inner = self.take(*predecessor)?;
                let cursor = MapCursor::new(
                    inner,
                    inputs,
                    mapper.create_mapper(),
                    mapper.output_schema(),
                );
                self.outputs[idx] = cursor.access().accesses().to_vec();
                self.cursors[idx] = Some(Box::new(cursor));
            }
            CapNode::Observe {
                predecessor,
                inputs,
                observer,
            } => {
                let inputs = self.accesses(inputs)?;
                let inner = self.take(*predecessor)?;
                self.cursors[idx] = Some(Box::new(ObserverCursor::new(
                    inner,
                    inputs,
                    observer.create_observer(),
                )));
            }
            CapNode::Append {
                schema,
                predecessors,
                inputs,
            } => {
                let mut columns = Vec::with_capacity(predecessors.len());
                let mut offset = 0;
                for port in inputs {
                    let mut branch = Vec::with_capacity(port.len());
                    for (column, slot) in port.iter().enumerate() {
                        let target = offset + column;
                        let access = match slot {
                            Some(a) if self.needed[idx].contains(&target) => Some(self.access(*a)?),
                            _ => None,
                        };
                        branch.push((target, access));
                    }
                    offset += port.len();
                    columns.push(branch);
                }
                let mut branches = Vec::with_capacity(predecessors.len());
                for (&p, columns) in predecessors.iter().zip(columns) {
                    branches.push(AppendBranch::new(self.take(p)?, columns));
                }
                let cursor = AppendedCursor::new(schema, branches)?;
                self.outputs[idx] = cursor.access().accesses().to_vec();
                self.cursors[idx] = Some(Box::new(cursor));
            }
            CapNode::Concatenate {
                schema,
                predecessors,
                inputs,
            } => {
                let mut accesses = Vec::with_capacity(predecessors.len());
                for port in inputs {
                    let mut branch = Vec::with_capacity(port.len());
                    for (column, slot) in port.iter().enumerate() {
                        branch.push(match slot {
                            Some(a) if self.needed[idx].contains(&column) => Some(self.access(*a)?),
                            _ => None,
                        });
                    }
                    accesses.push(branch);
                }
                let mut branches = Vec::with_capacity(predecessors.len());
                for (&p, accesses) in predecessors.iter().zip(accesses) {
                    branches.push(ConcatBranch::Ready(self.take(p)?, accesses));
                }
                let cursor = ConcatenatedCursor::new(schema, branches)?;
                self.outputs[idx] = cursor.access().accesses().to_vec();
                self.cursors[idx] = Some(Box::new(cursor));
            }
            CapNode::Aggregate {
                predecessors,
                inputs,
                aggregator,
            } => {
                let accesses = inputs
                    .iter()
                    .map(|port| self.accesses(port))
                    .collect::<VtResult<Vec<_>>>()?;
                let mut partitions = Vec::with_capacity(predecessors.len());
                for (&p, accesses) in predecessors.iter().zip(accesses) {
                    partitions.push((self.take(p)?, accesses));
                }
                let cursor = AggregateCursor::new(partitions, aggregator.clone());
                self.outputs[idx] = cursor.access().accesses().to_vec();
                self.cursors[idx] = Some(Box::new(cursor));
            }
            CapNode::Consumer { .. } => {
                return Err(VtError::internal(format!(
                    "consumer at {idx} is not the last instruction"
                )))
            }
        }
        Ok(())
    }

    fn build_consumer(
        &mut self,
        predecessor: usize,
        inputs: &[CapAccessId],
        columns: &ColumnSelection,
    ) -> VtResult<BoxedCursor> {
        let last = self.nodes.len() - 1;
        for idx in 0..last {
            if self.live[idx] {
                self.build(idx)?;
            }
        }
        let schema = self.schema;
        let row = inputs
            .iter()
            .enumerate()
            .map(|(column, &a)| {
                if columns.is_selected(column) {
                    self.access(a)
                } else {
                    Ok(MissingAccess::shared(
                        schema.kind(column).cloned().unwrap_or(DataKind::Void),
                    ))
                }
            })
            .collect::<VtResult<Row>>()?;
        let mut inner = self.take(predecessor)?;
        if let Some(rows) = self.top_rows {
            inner = Box::new(SliceCursor::new(inner, rows));
        }
        Ok(Box::new(RowViewCursor::new(inner, row)))
    }

    /// Every built cursor must have been claimed by its successor.
    fn finish(mut self, mut cursor: BoxedCursor) -> VtResult<BoxedCursor> {
        let leftover: Vec<usize> = (0..self.cursors.len())
            .filter(|&idx| self.cursors[idx].is_some())
            .collect();
        if leftover.is_empty() {
            return Ok(cursor);
        }
        self.close_all();
        let _ = cursor.close();
        Err(VtError::internal(format!(
            "instructions {leftover:?} were built but never claimed"
        )))
    }

    fn close_all(&mut self) {
        for (idx, slot) in self.cursors.iter_mut().enumerate() {
            if let Some(mut cursor) = slot.take() {
                if let Err(err) = cursor.close() {
                    log::warn!("failed to close cursor of instruction {idx}: {err}");
                }
            }
        }
    }
}
