use crate::error::VtResult;
use crate::function::{AggregatorFactory, MapperFactory, ObserverFactory};
use crate::schema::ColumnarSchema;
use crate::selection::RowRangeSelection;
use crate::spec::{
    AggregateTransformSpec, MapTransformSpec, ObserverTransformSpec, SourceId, SourceProperties,
    SourceTransformSpec, TableTransform, TableTransformSpec,
};
use crate::table::RowAccessible;
use std::sync::Arc;

/// Fluent builder over [`TableTransform`]s.
///
/// Every step derives the output schema right away, so invalid pipelines fail where they are
/// written rather than at compile time.
#[derive(Clone, Debug)]
pub struct VirtualTable {
    transform: Arc<TableTransform>,
    schema: ColumnarSchema,
}

impl VirtualTable {
    pub fn source(
        source_id: impl Into<SourceId>,
        schema: ColumnarSchema,
        properties: SourceProperties,
    ) -> Self {
        let transform = TableTransform::source(SourceTransformSpec {
            source_id: source_id.into(),
            schema: schema.clone(),
            properties,
        });
        Self { transform, schema }
    }

    /// A source whose schema and size are taken from `table`.
    pub fn from_table(source_id: impl Into<SourceId>, table: &dyn RowAccessible) -> Self {
        let properties = SourceProperties { size: table.size() };
        Self::source(source_id, table.schema().clone(), properties)
    }

    pub fn transform(&self) -> &Arc<TableTransform> {
        &self.transform
    }

    pub fn schema(&self) -> &ColumnarSchema {
        &self.schema
    }

    pub fn select_columns(&self, columns: &[usize]) -> VtResult<Self> {
        self.then(TableTransformSpec::SelectColumns(columns.to_vec()))
    }

    /// Keep rows `[from, to)`.
    pub fn slice(&self, from: u64, to: u64) -> VtResult<Self> {
        self.then(TableTransformSpec::Slice(RowRangeSelection::range(from, to)))
    }

    pub fn permute(&self, permutation: &[usize]) -> VtResult<Self> {
        self.then(TableTransformSpec::Permute(permutation.to_vec()))
    }

    pub fn append(&self, others: &[&VirtualTable]) -> VtResult<Self> {
        self.combine(TableTransformSpec::Append, others)
    }

    pub fn append_missing(&self, schema: ColumnarSchema) -> VtResult<Self> {
        self.then(TableTransformSpec::AppendMissing(schema))
    }

    pub fn concatenate(&self, others: &[&VirtualTable]) -> VtResult<Self> {
        self.combine(TableTransformSpec::Concatenate, others)
    }

    pub fn map(&self, columns: &[usize], mapper: Arc<dyn MapperFactory>) -> VtResult<Self> {
        self.then(TableTransformSpec::Map(MapTransformSpec {
            columns: columns.to_vec(),
            mapper,
        }))
    }

    pub fn aggregate(
        &self,
        columns: &[usize],
        aggregator: Arc<dyn AggregatorFactory>,
    ) -> VtResult<Self> {
        self.then(TableTransformSpec::Aggregate(AggregateTransformSpec {
            columns: columns.to_vec(),
            aggregator,
        }))
    }

    pub fn observe(&self, columns: &[usize], observer: Arc<dyn ObserverFactory>) -> VtResult<Self> {
        self.then(TableTransformSpec::Observe(ObserverTransformSpec {
            columns: columns.to_vec(),
            observer,
        }))
    }

    fn then(&self, spec: TableTransformSpec) -> VtResult<Self> {
        self.combine(spec, &[])
    }

    fn combine(&self, spec: TableTransformSpec, others: &[&VirtualTable]) -> VtResult<Self> {
        let mut inputs = vec![&self.schema];
        inputs.extend(others.iter().map(|t| &t.schema));
        let schema = spec.output_schema(&inputs, None)?;

        let mut predecessors = vec![self.transform.clone()];
        predecessors.extend(others.iter().map(|t| t.transform.clone()));
        let transform = TableTransform::new(spec, predecessors)?;
        Ok(Self { transform, schema })
    }
}
