#![forbid(unsafe_code)]

//! Lazy columnar virtual tables.
//!
//! A pipeline of [`TableTransform`]s (usually built through [`VirtualTable`]) is executed either
//! directly by the [`LazyExecutor`] or, through a dependency graph and an optimizer, compiled into
//! a [`CursorAssemblyPlan`] that the [`CompiledExecutor`] interprets. Both produce
//! [`RowAccessible`] tables whose cursors pull rows on demand from the bound source tables.

mod access;
mod error;
mod function;
mod row;
mod schema;
mod selection;
mod spec;
mod table;
mod value;
mod virtual_table;

pub mod cap;
pub mod cursor;
pub mod executor;
pub mod graph;

pub use crate::access::{AccessRef, BufferedAccess, DelegatingAccess, MissingAccess, ReadAccess};
pub use crate::error::{VtError, VtResult};
pub use crate::row::{BufferedRow, DelegatingRow, Row};
pub use crate::schema::{ColumnSchema, ColumnarSchema, DataKind, DataTraits};
pub use crate::selection::{ColumnSelection, RowRangeSelection, Selection};
pub use crate::value::Value;

pub use crate::function::{
    AggregateOp, Aggregator, AggregatorFactory, BuiltinAggregate, MapFn, Mapper, MapperFactory,
    ObserveFn, Observer, ObserverFactory,
};
pub use crate::spec::{
    AggregateTransformSpec, Arity, MapTransformSpec, ObserverTransformSpec, SourceId,
    SourceProperties, SourceTransformSpec, SpecKind, TableTransform, TableTransformSpec,
};
pub use crate::table::{
    InMemoryRowWriter, InMemoryTable, InMemoryTableBuilder, InMemoryTableOptions, RowAccessible,
};
pub use crate::virtual_table::VirtualTable;

pub use crate::cap::{CapExecutor, CapTable, CursorAssemblyPlan};
pub use crate::cursor::{BoxedCursor, Cursor, LookaheadCursor, RandomAccessCursor, WriteCursor};
pub use crate::executor::{CompileOptions, CompiledExecutor, LazyExecutor, VirtualTableExecutor};
