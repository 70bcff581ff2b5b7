use crate::access::{AccessRef, MissingAccess};
use crate::cursor::{
    AggregateCursor, AppendBranch, AppendedCursor, BoxedCursor, ConcatBranch, ConcatenatedCursor,
    Cursor, MapCursor, ObserverCursor, RowViewCursor, SliceCursor,
};
use crate::error::VtResult;
use crate::executor::VirtualTableExecutor;
use crate::row::Row;
use crate::schema::{ColumnarSchema, DataKind};
use crate::selection::{ColumnSelection, RowRangeSelection, Selection};
use crate::spec::{
    bind_source, AggregateTransformSpec, MapTransformSpec, ObserverTransformSpec, SourceId,
    TableTransform, TableTransformSpec,
};
use crate::table::RowAccessible;
use std::collections::HashMap;
use std::sync::Arc;

/// Interprets the transform DAG directly, without building a graph or a plan.
///
/// Every transform becomes a table wrapping the tables of its predecessors; selections are pushed
/// through the wrappers when a cursor is created. Only a single terminal is supported.
#[derive(Clone, Debug)]
pub struct LazyExecutor {
    terminal: Arc<TableTransform>,
}

impl LazyExecutor {
    pub fn new(terminal: Arc<TableTransform>) -> Self {
        Self { terminal }
    }

    pub fn table(
        &self,
        sources: &HashMap<SourceId, Arc<dyn RowAccessible>>,
    ) -> VtResult<Arc<dyn RowAccessible>> {
        let mut lowered = HashMap::new();
        let table = lower(&self.terminal, sources, &mut lowered)?;
        log::debug!(
            "lowered {} transform(s) into lazy tables",
            lowered.len()
        );
        Ok(table.table)
    }
}

impl VirtualTableExecutor for LazyExecutor {
    fn execute(
        &self,
        sources: &HashMap<SourceId, Arc<dyn RowAccessible>>,
    ) -> VtResult<Vec<Arc<dyn RowAccessible>>> {
        Ok(vec![self.table(sources)?])
    }
}

#[derive(Clone)]
struct Lowered {
    table: Arc<dyn RowAccessible>,
    /// Whether an observer sits anywhere below this table.
    observed: bool,
}

fn lower(
    transform: &Arc<TableTransform>,
    sources: &HashMap<SourceId, Arc<dyn RowAccessible>>,
    lowered: &mut HashMap<*const TableTransform, Lowered>,
) -> VtResult<Lowered> {
    if let Some(done) = lowered.get(&Arc::as_ptr(transform)) {
        return Ok(done.clone());
    }
    let inputs = transform
        .predecessors()
        .iter()
        .map(|p| lower(p, sources, lowered))
        .collect::<VtResult<Vec<_>>>()?;
    let schemas: Vec<&ColumnarSchema> = inputs.iter().map(|l| l.table.schema()).collect();
    let schema = transform.spec().output_schema(&schemas, None)?;
    let observed = inputs.iter().any(|l| l.observed)
        || matches!(transform.spec(), TableTransformSpec::Observe(_));
    let tables: Vec<Arc<dyn RowAccessible>> = inputs.into_iter().map(|l| l.table).collect();

    let table: Arc<dyn RowAccessible> = match transform.spec() {
        TableTransformSpec::Source(source) => bind_source(
            sources,
            &source.source_id,
            &source.schema,
            &source.properties,
        )?
        .clone(),
        TableTransformSpec::Identity => tables[0].clone(),
        TableTransformSpec::SelectColumns(columns) | TableTransformSpec::Permute(columns) => {
            Arc::new(LazyProjection {
                input: tables[0].clone(),
                columns: columns.clone(),
                schema,
            })
        }
        TableTransformSpec::Slice(range) => Arc::new(LazySlice {
            input: tables[0].clone(),
            range: *range,
            schema,
        }),
        TableTransformSpec::Append => Arc::new(LazyAppend {
            inputs: tables,
            schema,
        }),
        TableTransformSpec::AppendMissing(_) => Arc::new(LazyAppendMissing {
            input: tables[0].clone(),
            schema,
        }),
        TableTransformSpec::Concatenate => Arc::new(LazyConcatenate {
            inputs: tables,
            observed,
            schema,
        }),
        TableTransformSpec::Map(map) => Arc::new(LazyMap {
            input: tables[0].clone(),
            map: map.clone(),
            schema,
        }),
        TableTransformSpec::Aggregate(aggregate) => Arc::new(LazyAggregate {
            input: tables[0].clone(),
            aggregate: aggregate.clone(),
            schema,
        }),
        TableTransformSpec::Observe(observe) => Arc::new(LazyObserve {
            input: tables[0].clone(),
            observe: observe.clone(),
            schema,
        }),
    };

    let done = Lowered { table, observed };
    lowered.insert(Arc::as_ptr(transform), done.clone());
    Ok(done)
}

fn missing(schema: &ColumnarSchema, column: usize) -> AccessRef {
    MissingAccess::shared(schema.kind(column).cloned().unwrap_or(DataKind::Void))
}

/// Hide the columns outside `columns` behind missing accesses.
fn mask(cursor: BoxedCursor, schema: &ColumnarSchema, columns: &ColumnSelection) -> BoxedCursor {
    if columns.is_all() {
        return cursor;
    }
    let row: Row = (0..schema.num_columns())
        .map(|c| match cursor.access().get(c) {
            Some(access) if columns.is_selected(c) => access.clone(),
            _ => missing(schema, c),
        })
        .collect();
    Box::new(RowViewCursor::new(cursor, row))
}

fn limit(cursor: BoxedCursor, rows: RowRangeSelection) -> BoxedCursor {
    if rows.is_all() {
        cursor
    } else {
        Box::new(SliceCursor::new(cursor, rows))
    }
}

fn inputs_of(cursor: &dyn Cursor, columns: &[usize]) -> Vec<AccessRef> {
    columns
        .iter()
        .map(|&c| cursor.access().access(c).clone())
        .collect()
}

/// Column filter or permutation.
#[derive(Debug)]
struct LazyProjection {
    input: Arc<dyn RowAccessible>,
    columns: Vec<usize>,
    schema: ColumnarSchema,
}

impl RowAccessible for LazyProjection {
    fn schema(&self) -> &ColumnarSchema {
        &self.schema
    }

    fn create_cursor(&self, selection: &Selection) -> VtResult<BoxedCursor> {
        let selected = selection.columns();
        let upstream = ColumnSelection::of(
            self.columns
                .iter()
                .enumerate()
                .filter(|&(out, _)| selected.is_selected(out))
                .map(|(_, &c)| c),
        );
        let cursor = self
            .input
            .create_cursor(&Selection::new(upstream, selection.rows()))?;
        let row: Row = self
            .columns
            .iter()
            .enumerate()
            .map(|(out, &c)| match cursor.access().get(c) {
                Some(access) if selected.is_selected(out) => access.clone(),
                _ => missing(&self.schema, out),
            })
            .collect();
        Ok(Box::new(RowViewCursor::new(cursor, row)))
    }

    fn size(&self) -> Option<u64> {
        self.input.size()
    }
}

#[derive(Debug)]
struct LazySlice {
    input: Arc<dyn RowAccessible>,
    range: RowRangeSelection,
    schema: ColumnarSchema,
}

impl RowAccessible for LazySlice {
    fn schema(&self) -> &ColumnarSchema {
        &self.schema
    }

    fn create_cursor(&self, selection: &Selection) -> VtResult<BoxedCursor> {
        let rows = self.range.retain_range(&selection.rows());
        self.input.create_cursor(&selection.with_rows(rows))
    }

    fn size(&self) -> Option<u64> {
        self.input.size().map(|n| self.range.num_selected(n))
    }
}

#[derive(Debug)]
struct LazyAppend {
    inputs: Vec<Arc<dyn RowAccessible>>,
    schema: ColumnarSchema,
}

impl RowAccessible for LazyAppend {
    fn schema(&self) -> &ColumnarSchema {
        &self.schema
    }

    fn create_cursor(&self, selection: &Selection) -> VtResult<BoxedCursor> {
        let mut opened: Vec<(BoxedCursor, Vec<usize>, usize)> = Vec::with_capacity(self.inputs.len());
        let mut offset = 0;
        for input in &self.inputs {
            let width = input.schema().num_columns();
            let selected: Vec<usize> = (0..width)
                .filter(|&c| selection.columns().is_selected(offset + c))
                .collect();
            let branch = Selection::new(
                ColumnSelection::of(selected.iter().copied()),
                selection.rows(),
            );
            match input.create_cursor(&branch) {
                Ok(cursor) => opened.push((cursor, selected, offset)),
                Err(err) => {
                    for (mut cursor, _, _) in opened {
                        let _ = cursor.close();
                    }
                    return Err(err);
                }
            }
            offset += width;
        }

        let branches = opened
            .into_iter()
            .map(|(cursor, selected, offset)| {
                let columns = (0..cursor.access().len())
                    .map(|c| {
                        let access = selected
                            .contains(&c)
                            .then(|| cursor.access().access(c).clone());
                        (offset + c, access)
                    })
                    .collect();
                AppendBranch::new(cursor, columns)
            })
            .collect();
        Ok(Box::new(AppendedCursor::new(&self.schema, branches)?))
    }

    fn size(&self) -> Option<u64> {
        self.inputs
            .iter()
            .map(|t| t.size())
            .collect::<Option<Vec<u64>>>()
            .map(|sizes| sizes.into_iter().max().unwrap_or(0))
    }
}

#[derive(Debug)]
struct LazyAppendMissing {
    input: Arc<dyn RowAccessible>,
    schema: ColumnarSchema,
}

impl RowAccessible for LazyAppendMissing {
    fn schema(&self) -> &ColumnarSchema {
        &self.schema
    }

    fn create_cursor(&self, selection: &Selection) -> VtResult<BoxedCursor> {
        let width = self.input.schema().num_columns();
        let upstream =
            ColumnSelection::of((0..width).filter(|&c| selection.columns().is_selected(c)));
        let cursor = self
            .input
            .create_cursor(&Selection::new(upstream, selection.rows()))?;
        let row: Row = (0..self.schema.num_columns())
            .map(|c| match cursor.access().get(c) {
                Some(access) if selection.columns().is_selected(c) => access.clone(),
                _ => missing(&self.schema, c),
            })
            .collect();
        Ok(Box::new(RowViewCursor::new(cursor, row)))
    }

    fn size(&self) -> Option<u64> {
        self.input.size()
    }
}

#[derive(Debug)]
struct LazyConcatenate {
    inputs: Vec<Arc<dyn RowAccessible>>,
    /// Branches under an observer are always iterated from their first row.
    observed: bool,
    schema: ColumnarSchema,
}

impl LazyConcatenate {
    fn branch(table: Arc<dyn RowAccessible>, selection: Selection) -> ConcatBranch {
        ConcatBranch::Deferred(Box::new(move || {
            let cursor = table.create_cursor(&selection)?;
            let accesses = cursor.access().accesses().iter().cloned().map(Some).collect();
            Ok((cursor, accesses))
        }))
    }
}

impl RowAccessible for LazyConcatenate {
    fn schema(&self) -> &ColumnarSchema {
        &self.schema
    }

    fn create_cursor(&self, selection: &Selection) -> VtResult<BoxedCursor> {
        let rows = selection.rows();
        let columns = selection.columns().clone();
        let sizes = if rows.is_all() || self.observed {
            None
        } else {
            self.inputs
                .iter()
                .map(|t| t.size())
                .collect::<Option<Vec<u64>>>()
        };

        let mut branches = Vec::with_capacity(self.inputs.len());
        let mut remaining = RowRangeSelection::All;
        match sizes {
            Some(sizes) => {
                let mut offset = 0u64;
                for (input, size) in self.inputs.iter().zip(sizes) {
                    let start = offset;
                    offset = offset.saturating_add(size);
                    let from = rows.from_index().max(start);
                    let to = rows.to_index().min(offset);
                    if from >= to {
                        continue;
                    }
                    let range = RowRangeSelection::range(from - start, to - start);
                    branches.push(Self::branch(
                        input.clone(),
                        Selection::new(columns.clone(), range),
                    ));
                }
                log::trace!(
                    "concatenation keeps {} of {} branch(es) for rows [{},{})",
                    branches.len(),
                    self.inputs.len(),
                    rows.from_index(),
                    rows.to_index()
                );
            }
            None => {
                for input in &self.inputs {
                    branches.push(Self::branch(
                        input.clone(),
                        Selection::new(columns.clone(), RowRangeSelection::All),
                    ));
                }
                remaining = rows;
            }
        }
        let cursor = ConcatenatedCursor::new(&self.schema, branches)?;
        Ok(limit(Box::new(cursor), remaining))
    }

    fn size(&self) -> Option<u64> {
        self.inputs.iter().map(|t| t.size()).sum()
    }
}

#[derive(Debug)]
struct LazyMap {
    input: Arc<dyn RowAccessible>,
    map: MapTransformSpec,
    schema: ColumnarSchema,
}

impl RowAccessible for LazyMap {
    fn schema(&self) -> &ColumnarSchema {
        &self.schema
    }

    fn create_cursor(&self, selection: &Selection) -> VtResult<BoxedCursor> {
        let width = self.schema.num_columns();
        if !(0..width).any(|c| selection.columns().is_selected(c)) {
            // Only the row count is needed.
            let cursor = self
                .input
                .create_cursor(&Selection::new(ColumnSelection::none(), selection.rows()))?;
            return Ok(Box::new(RowViewCursor::new(cursor, Row::missing(&self.schema))));
        }
        let upstream = ColumnSelection::of(self.map.columns.iter().copied());
        let cursor = self
            .input
            .create_cursor(&Selection::new(upstream, selection.rows()))?;
        let inputs = inputs_of(&*cursor, &self.map.columns);
        let cursor = MapCursor::new(
            cursor,
            inputs,
            self.map.mapper.create_mapper(),
            self.map.output_schema(),
        );
        Ok(mask(Box::new(cursor), &self.schema, selection.columns()))
    }

    fn size(&self) -> Option<u64> {
        self.input.size()
    }
}

#[derive(Debug)]
struct LazyObserve {
    input: Arc<dyn RowAccessible>,
    observe: ObserverTransformSpec,
    schema: ColumnarSchema,
}

impl RowAccessible for LazyObserve {
    fn schema(&self) -> &ColumnarSchema {
        &self.schema
    }

    fn create_cursor(&self, selection: &Selection) -> VtResult<BoxedCursor> {
        let upstream = selection
            .columns()
            .union(&ColumnSelection::of(self.observe.columns.iter().copied()));
        let cursor = self
            .input
            .create_cursor(&Selection::new(upstream, RowRangeSelection::All))?;
        let inputs = inputs_of(&*cursor, &self.observe.columns);
        let cursor = ObserverCursor::new(cursor, inputs, self.observe.observer.create_observer());
        let cursor = mask(Box::new(cursor), &self.schema, selection.columns());
        Ok(limit(cursor, selection.rows()))
    }

    fn size(&self) -> Option<u64> {
        self.input.size()
    }
}

#[derive(Debug)]
struct LazyAggregate {
    input: Arc<dyn RowAccessible>,
    aggregate: AggregateTransformSpec,
    schema: ColumnarSchema,
}

impl RowAccessible for LazyAggregate {
    fn schema(&self) -> &ColumnarSchema {
        &self.schema
    }

    fn create_cursor(&self, selection: &Selection) -> VtResult<BoxedCursor> {
        let upstream = ColumnSelection::of(self.aggregate.columns.iter().copied());
        let cursor = self
            .input
            .create_cursor(&Selection::new(upstream, RowRangeSelection::All))?;
        let inputs = inputs_of(&*cursor, &self.aggregate.columns);
        let cursor = AggregateCursor::new(vec![(cursor, inputs)], self.aggregate.aggregator.clone());
        let cursor = mask(Box::new(cursor), &self.schema, selection.columns());
        Ok(limit(cursor, selection.rows()))
    }

    fn size(&self) -> Option<u64> {
        Some(1)
    }
}
