//! Declarative transform specs and the immutable transform DAG built from them.

use crate::error::{VtError, VtResult};
use crate::function::{AggregatorFactory, MapperFactory, ObserverFactory};
use crate::schema::ColumnarSchema;
use crate::selection::RowRangeSelection;
use crate::table::RowAccessible;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Identifies a backing table; bound to a concrete table at execution time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(Arc<str>);

impl SourceId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What is known about a source before execution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SourceProperties {
    /// Row count, if known. Optimized plans slice concatenations by it, so a bound table must
    /// report the same count.
    pub size: Option<u64>,
}

/// Look up the table bound to `source_id` and check it against what was declared.
pub(crate) fn bind_source<'a>(
    sources: &'a HashMap<SourceId, Arc<dyn RowAccessible>>,
    source_id: &SourceId,
    schema: &ColumnarSchema,
    properties: &SourceProperties,
) -> VtResult<&'a Arc<dyn RowAccessible>> {
    let table = sources
        .get(source_id)
        .ok_or_else(|| VtError::UnknownSource(source_id.clone()))?;
    if !table.schema().is_kind_compatible(schema) {
        return Err(VtError::SchemaMismatch {
            what: format!("source {source_id}"),
            expected: schema.clone(),
            actual: table.schema().clone(),
        });
    }
    if let (Some(expected), Some(actual)) = (properties.size, table.size()) {
        if expected != actual {
            return Err(VtError::SizeMismatch {
                source_id: source_id.clone(),
                expected,
                actual,
            });
        }
    }
    Ok(table)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecKind {
    Source,
    SelectColumns,
    Slice,
    Permute,
    Append,
    AppendMissing,
    Concatenate,
    Identity,
    Map,
    Aggregate,
    Observe,
    Consumer,
}

impl fmt::Display for SpecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Number of predecessors a spec accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Self::Exactly(n) => count == n,
            Self::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exactly(n) => write!(f, "{n}"),
            Self::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SourceTransformSpec {
    pub source_id: SourceId,
    pub schema: ColumnarSchema,
    pub properties: SourceProperties,
}

#[derive(Clone, Debug)]
pub struct MapTransformSpec {
    /// Input columns handed to the mapper, in order.
    pub columns: Vec<usize>,
    pub mapper: Arc<dyn MapperFactory>,
}

impl MapTransformSpec {
    pub fn output_schema(&self) -> &ColumnarSchema {
        self.mapper.output_schema()
    }
}

#[derive(Clone, Debug)]
pub struct AggregateTransformSpec {
    pub columns: Vec<usize>,
    pub aggregator: Arc<dyn AggregatorFactory>,
}

#[derive(Clone, Debug)]
pub struct ObserverTransformSpec {
    pub columns: Vec<usize>,
    pub observer: Arc<dyn ObserverFactory>,
}

/// One step of a virtual table pipeline.
#[derive(Clone, Debug)]
pub enum TableTransformSpec {
    Source(SourceTransformSpec),
    /// Keep the given columns, in the given order.
    SelectColumns(Vec<usize>),
    /// Keep the given row range.
    Slice(RowRangeSelection),
    /// Reorder all columns; `Permute(p)` puts input column `p[i]` at position `i`.
    Permute(Vec<usize>),
    /// Combine the columns of all predecessors side by side.
    Append,
    /// Add all-missing columns of the given schema on the right.
    AppendMissing(ColumnarSchema),
    /// Rows of all predecessors one after the other.
    Concatenate,
    Identity,
    Map(MapTransformSpec),
    Aggregate(AggregateTransformSpec),
    Observe(ObserverTransformSpec),
}

impl TableTransformSpec {
    pub fn kind(&self) -> SpecKind {
        match self {
            Self::Source(_) => SpecKind::Source,
            Self::SelectColumns(_) => SpecKind::SelectColumns,
            Self::Slice(_) => SpecKind::Slice,
            Self::Permute(_) => SpecKind::Permute,
            Self::Append => SpecKind::Append,
            Self::AppendMissing(_) => SpecKind::AppendMissing,
            Self::Concatenate => SpecKind::Concatenate,
            Self::Identity => SpecKind::Identity,
            Self::Map(_) => SpecKind::Map,
            Self::Aggregate(_) => SpecKind::Aggregate,
            Self::Observe(_) => SpecKind::Observe,
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Self::Source(_) => Arity::Exactly(0),
            Self::Append | Self::Concatenate => Arity::AtLeast(1),
            _ => Arity::Exactly(1),
        }
    }

    /// Schema produced from the given input schemas.
    ///
    /// `node` only decorates error messages.
    pub fn output_schema(
        &self,
        inputs: &[&ColumnarSchema],
        node: Option<usize>,
    ) -> VtResult<ColumnarSchema> {
        let kind = self.kind();
        if !self.arity().accepts(inputs.len()) {
            return Err(VtError::Arity {
                spec: kind,
                expected: self.arity(),
                actual: inputs.len(),
            });
        }
        let check_columns = |columns: &[usize], input: &ColumnarSchema| {
            let width = input.num_columns();
            match columns.iter().find(|&&c| c >= width) {
                Some(&column) => Err(VtError::ColumnOutOfRange {
                    node,
                    spec: kind,
                    column,
                    width,
                }),
                None => Ok(()),
            }
        };

        match self {
            Self::Source(source) => Ok(source.schema.clone()),
            Self::SelectColumns(columns) => {
                check_columns(columns, inputs[0])?;
                select(inputs[0], columns)
            }
            Self::Permute(permutation) => {
                let width = inputs[0].num_columns();
                let mut seen = vec![false; width];
                let valid = permutation.len() == width
                    && permutation
                        .iter()
                        .all(|&c| c < width && !std::mem::replace(&mut seen[c], true));
                if !valid {
                    return Err(VtError::InvalidPermutation {
                        permutation: permutation.clone(),
                        width,
                    });
                }
                select(inputs[0], permutation)
            }
            Self::Slice(_) | Self::Identity => Ok(inputs[0].clone()),
            Self::Observe(observe) => {
                check_columns(&observe.columns, inputs[0])?;
                Ok(inputs[0].clone())
            }
            Self::Append => Ok(ColumnarSchema::append(inputs.iter().copied())),
            Self::AppendMissing(missing) => Ok(ColumnarSchema::append([inputs[0], missing])),
            Self::Concatenate => {
                let first = inputs[0];
                for (input, schema) in inputs.iter().enumerate().skip(1) {
                    if !first.is_kind_compatible(schema) {
                        return Err(VtError::IncompatibleSchemas {
                            node,
                            spec: kind,
                            input,
                            expected: first.clone(),
                            actual: (*schema).clone(),
                        });
                    }
                }
                Ok(first.clone())
            }
            Self::Map(map) => {
                check_columns(&map.columns, inputs[0])?;
                Ok(map.output_schema().clone())
            }
            Self::Aggregate(aggregate) => {
                check_columns(&aggregate.columns, inputs[0])?;
                Ok(aggregate.aggregator.output_schema().clone())
            }
        }
    }
}

fn select(input: &ColumnarSchema, columns: &[usize]) -> VtResult<ColumnarSchema> {
    input
        .select(columns)
        .ok_or_else(|| VtError::internal("column selection escaped validation"))
}

/// Immutable node of the transform DAG: a spec plus its ordered predecessors.
///
/// Transforms are shared through `Arc`; a transform used by several consumers is one node of the
/// DAG with several successors.
#[derive(Debug)]
pub struct TableTransform {
    spec: TableTransformSpec,
    predecessors: Vec<Arc<TableTransform>>,
}

impl TableTransform {
    /// Create a transform, checking the predecessor count against its declared arity.
    pub fn new(
        spec: TableTransformSpec,
        predecessors: Vec<Arc<TableTransform>>,
    ) -> VtResult<Arc<Self>> {
        let arity = spec.arity();
        if !arity.accepts(predecessors.len()) {
            return Err(VtError::Arity {
                spec: spec.kind(),
                expected: arity,
                actual: predecessors.len(),
            });
        }
        Ok(Arc::new(Self { spec, predecessors }))
    }

    pub fn source(spec: SourceTransformSpec) -> Arc<Self> {
        Arc::new(Self {
            spec: TableTransformSpec::Source(spec),
            predecessors: Vec::new(),
        })
    }

    pub fn spec(&self) -> &TableTransformSpec {
        &self.spec
    }

    pub fn predecessors(&self) -> &[Arc<TableTransform>] {
        &self.predecessors
    }

    /// Derive the output schema by walking the DAG down to its sources.
    pub fn output_schema(&self) -> VtResult<ColumnarSchema> {
        let inputs = self
            .predecessors
            .iter()
            .map(|p| p.output_schema())
            .collect::<VtResult<Vec<_>>>()?;
        let refs: Vec<&ColumnarSchema> = inputs.iter().collect();
        self.spec.output_schema(&refs, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataKind;

    fn source(kinds: &[DataKind]) -> Arc<TableTransform> {
        TableTransform::source(SourceTransformSpec {
            source_id: SourceId::new("src"),
            schema: ColumnarSchema::of_kinds(kinds.iter().cloned()),
            properties: SourceProperties::default(),
        })
    }

    #[test]
    fn arity_is_checked_on_construction() {
        let src = source(&[DataKind::Int]);
        let err = TableTransform::new(TableTransformSpec::Identity, vec![src.clone(), src])
            .unwrap_err();
        assert_eq!(err.to_string(), "Identity expects 1 predecessor(s), got 2");

        let err = TableTransform::new(TableTransformSpec::Concatenate, vec![]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Concatenate expects at least 1 predecessor(s), got 0"
        );
    }

    #[test]
    fn derives_schemas() {
        let src = source(&[DataKind::Int, DataKind::Double, DataKind::String]);
        let permuted =
            TableTransform::new(TableTransformSpec::Permute(vec![2, 0, 1]), vec![src.clone()])
                .unwrap();
        assert_eq!(
            permuted.output_schema().unwrap(),
            ColumnarSchema::of_kinds([DataKind::String, DataKind::Int, DataKind::Double])
        );

        let padded = TableTransform::new(
            TableTransformSpec::AppendMissing(ColumnarSchema::of_kinds([DataKind::Boolean])),
            vec![src],
        )
        .unwrap();
        assert_eq!(padded.output_schema().unwrap().num_columns(), 4);
    }

    #[test]
    fn rejects_bad_permutations_and_columns() {
        let src = source(&[DataKind::Int, DataKind::Double]);
        let dup = TableTransform::new(TableTransformSpec::Permute(vec![0, 0]), vec![src.clone()])
            .unwrap();
        assert!(matches!(
            dup.output_schema(),
            Err(VtError::InvalidPermutation { .. })
        ));

        let wide =
            TableTransform::new(TableTransformSpec::SelectColumns(vec![2]), vec![src]).unwrap();
        assert!(matches!(
            wide.output_schema(),
            Err(VtError::ColumnOutOfRange { column: 2, width: 2, .. })
        ));
    }

    #[test]
    fn concatenate_requires_compatible_schemas() {
        let a = source(&[DataKind::Int]);
        let b = source(&[DataKind::String]);
        let concat = TableTransform::new(TableTransformSpec::Concatenate, vec![a, b]).unwrap();
        assert!(matches!(
            concat.output_schema(),
            Err(VtError::IncompatibleSchemas { input: 1, .. })
        ));
    }
}
