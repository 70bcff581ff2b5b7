//! User functions plugged into map, aggregate, and observe transforms.
//!
//! Factories are shared by the transform graph (and may be shared across threads); each cursor
//! asks its factory for a fresh, single-threaded function instance.

use crate::access::{AccessRef, BufferedAccess, ReadAccess};
use crate::error::{VtError, VtResult};
use crate::schema::{ColumnarSchema, DataKind};
use crate::value::Value;
use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Computes output values from input accesses, one row at a time.
pub trait Mapper {
    /// Read `inputs` and write every access of `outputs`.
    fn map(&mut self, inputs: &[AccessRef], outputs: &[Rc<BufferedAccess>]) -> VtResult<()>;
}

pub trait MapperFactory: fmt::Debug + Send + Sync {
    fn output_schema(&self) -> &ColumnarSchema;

    fn create_mapper(&self) -> Box<dyn Mapper>;
}

/// Sees every row that passes through an observe transform.
pub trait Observer {
    fn observe(&mut self, inputs: &[AccessRef]) -> VtResult<()>;

    /// Called once when the observing cursor is closed.
    fn close(&mut self) -> VtResult<()> {
        Ok(())
    }
}

pub trait ObserverFactory: fmt::Debug + Send + Sync {
    fn create_observer(&self) -> Box<dyn Observer>;
}

/// Partial aggregation state.
///
/// States built over disjoint partitions of the input are merged with [`combine`], in partition
/// order, before [`finish`] writes the single output row.
///
/// [`combine`]: Aggregator::combine
/// [`finish`]: Aggregator::finish
pub trait Aggregator: Any {
    fn update(&mut self, inputs: &[AccessRef]) -> VtResult<()>;

    /// Merge `other` (created by the same factory) into `self`.
    fn combine(&mut self, other: Box<dyn Aggregator>) -> VtResult<()>;

    fn finish(&self, outputs: &[Rc<BufferedAccess>]) -> VtResult<()>;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

pub trait AggregatorFactory: fmt::Debug + Send + Sync {
    fn output_schema(&self) -> &ColumnarSchema;

    fn create_aggregator(&self) -> Box<dyn Aggregator>;
}

type MapClosure = dyn Fn(&[Value]) -> VtResult<Vec<Value>> + Send + Sync;

/// [`MapperFactory`] backed by a closure over value snapshots.
#[derive(Clone)]
pub struct MapFn {
    output_schema: ColumnarSchema,
    f: Arc<MapClosure>,
}

impl MapFn {
    pub fn new(
        output_schema: ColumnarSchema,
        f: impl Fn(&[Value]) -> VtResult<Vec<Value>> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            output_schema,
            f: Arc::new(f),
        })
    }
}

impl fmt::Debug for MapFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapFn")
            .field("output_schema", &self.output_schema)
            .finish_non_exhaustive()
    }
}

impl MapperFactory for MapFn {
    fn output_schema(&self) -> &ColumnarSchema {
        &self.output_schema
    }

    fn create_mapper(&self) -> Box<dyn Mapper> {
        Box::new(ClosureMapper {
            f: self.f.clone(),
            scratch: Vec::new(),
        })
    }
}

struct ClosureMapper {
    f: Arc<MapClosure>,
    scratch: Vec<Value>,
}

impl Mapper for ClosureMapper {
    fn map(&mut self, inputs: &[AccessRef], outputs: &[Rc<BufferedAccess>]) -> VtResult<()> {
        self.scratch.clear();
        self.scratch.extend(inputs.iter().map(|access| access.value()));
        let values = (self.f)(&self.scratch)?;
        if values.len() != outputs.len() {
            return Err(VtError::Function(format!(
                "map function returned {} value(s) for {} output column(s)",
                values.len(),
                outputs.len()
            )));
        }
        for (output, value) in outputs.iter().zip(values) {
            output.set(value)?;
        }
        Ok(())
    }
}

type ObserveClosure = dyn Fn(&[Value]) -> VtResult<()> + Send + Sync;

/// [`ObserverFactory`] backed by a closure over value snapshots.
#[derive(Clone)]
pub struct ObserveFn {
    f: Arc<ObserveClosure>,
}

impl ObserveFn {
    pub fn new(f: impl Fn(&[Value]) -> VtResult<()> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self { f: Arc::new(f) })
    }
}

impl fmt::Debug for ObserveFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserveFn").finish_non_exhaustive()
    }
}

impl ObserverFactory for ObserveFn {
    fn create_observer(&self) -> Box<dyn Observer> {
        Box::new(ClosureObserver { f: self.f.clone() })
    }
}

struct ClosureObserver {
    f: Arc<ObserveClosure>,
}

impl Observer for ClosureObserver {
    fn observe(&mut self, inputs: &[AccessRef]) -> VtResult<()> {
        let values: Vec<Value> = inputs.iter().map(|access| access.value()).collect();
        (self.f)(&values)
    }
}

/// Built-in single-column aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    /// Number of non-missing values.
    Count,
    /// Sum of non-missing values. Integer inputs sum to `LONG`, floating point inputs to `DOUBLE`.
    Sum,
    Min,
    Max,
    /// Arithmetic mean as `DOUBLE`.
    Mean,
}

impl AggregateOp {
    /// Output kind for an input column of `input`, or `None` if the op does not apply to it.
    pub fn output_kind(self, input: &DataKind) -> Option<DataKind> {
        let integral = matches!(input, DataKind::Byte | DataKind::Int | DataKind::Long);
        let floating = matches!(input, DataKind::Float | DataKind::Double);
        match self {
            Self::Count => Some(DataKind::Long),
            Self::Sum if integral => Some(DataKind::Long),
            Self::Sum | Self::Mean if floating || integral => Some(DataKind::Double),
            Self::Min | Self::Max if integral || floating || *input == DataKind::String => {
                Some(input.clone())
            }
            _ => None,
        }
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Mean => "MEAN",
        })
    }
}

/// [`AggregatorFactory`] for an [`AggregateOp`] over a single input column.
#[derive(Debug, Clone)]
pub struct BuiltinAggregate {
    op: AggregateOp,
    output_schema: ColumnarSchema,
}

impl BuiltinAggregate {
    pub fn new(op: AggregateOp, input: &DataKind) -> VtResult<Arc<Self>> {
        let output = op.output_kind(input).ok_or_else(|| {
            VtError::Function(format!("{op} is not defined for {input} columns"))
        })?;
        Ok(Arc::new(Self {
            op,
            output_schema: ColumnarSchema::of_kinds([output]),
        }))
    }

    pub fn op(&self) -> AggregateOp {
        self.op
    }
}

impl AggregatorFactory for BuiltinAggregate {
    fn output_schema(&self) -> &ColumnarSchema {
        &self.output_schema
    }

    fn create_aggregator(&self) -> Box<dyn Aggregator> {
        Box::new(BuiltinState {
            op: self.op,
            count: 0,
            int_sum: 0,
            float_sum: 0.0,
            extreme: None,
        })
    }
}

#[derive(Debug)]
struct BuiltinState {
    op: AggregateOp,
    count: i64,
    int_sum: i64,
    float_sum: f64,
    extreme: Option<Value>,
}

impl BuiltinState {
    fn add(&mut self, value: Value) -> VtResult<()> {
        if value.is_missing() {
            return Ok(());
        }
        self.count += 1;
        match self.op {
            AggregateOp::Count => {}
            AggregateOp::Sum | AggregateOp::Mean => {
                if let (AggregateOp::Sum, Some(v)) = (self.op, value.as_i64()) {
                    self.int_sum = self.int_sum.checked_add(v).ok_or_else(|| {
                        VtError::Function(format!("{} overflowed LONG", self.op))
                    })?;
                }
                if let Some(v) = value.as_f64() {
                    self.float_sum += v;
                }
            }
            AggregateOp::Min | AggregateOp::Max => {
                let wanted = if self.op == AggregateOp::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let replace = match &self.extreme {
                    None => true,
                    Some(current) => compare(&value, current) == Some(wanted),
                };
                if replace {
                    self.extreme = Some(value);
                }
            }
        }
        Ok(())
    }

    fn result(&self, kind: &DataKind) -> Value {
        match self.op {
            AggregateOp::Count => Value::from(self.count),
            _ if self.count == 0 => Value::Missing,
            AggregateOp::Sum if *kind == DataKind::Long => Value::from(self.int_sum),
            AggregateOp::Sum => Value::from(self.float_sum),
            AggregateOp::Mean => Value::from(self.float_sum / self.count as f64),
            AggregateOp::Min | AggregateOp::Max => self.extreme.clone().unwrap_or(Value::Missing),
        }
    }
}

impl Aggregator for BuiltinState {
    fn update(&mut self, inputs: &[AccessRef]) -> VtResult<()> {
        let [input] = inputs else {
            return Err(VtError::Function(format!(
                "{} takes exactly one input column, got {}",
                self.op,
                inputs.len()
            )));
        };
        self.add(input.value())
    }

    fn combine(&mut self, other: Box<dyn Aggregator>) -> VtResult<()> {
        let other = other
            .into_any()
            .downcast::<BuiltinState>()
            .map_err(|_| VtError::Function(format!("cannot combine {} with a foreign state", self.op)))?;
        match self.op {
            AggregateOp::Min | AggregateOp::Max => {
                // `add` counts the extreme once more; correct the count afterwards.
                let count = self.count + other.count;
                if let Some(extreme) = other.extreme {
                    self.add(extreme)?;
                }
                self.count = count;
            }
            _ => {
                self.count += other.count;
                self.int_sum = self.int_sum.checked_add(other.int_sum).ok_or_else(|| {
                    VtError::Function(format!("{} overflowed LONG", self.op))
                })?;
                self.float_sum += other.float_sum;
            }
        }
        Ok(())
    }

    fn finish(&self, outputs: &[Rc<BufferedAccess>]) -> VtResult<()> {
        let [output] = outputs else {
            return Err(VtError::internal("built-in aggregates produce exactly one column"));
        };
        output.set(self.result(output.kind()))
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (a.as_str(), b.as_str()) {
        return Some(a.cmp(b));
    }
    None
}
