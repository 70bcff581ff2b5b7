use crate::schema::{ColumnarSchema, DataKind};
use crate::spec::{Arity, SourceId, SpecKind};
use std::error::Error as StdError;

pub type VtResult<T> = Result<T, VtError>;

/// Errors raised while building, compiling, or executing a virtual table.
///
/// Construction errors (arity, schemas, unknown sources) are reported synchronously to whoever
/// triggered the compilation. [`VtError::Internal`] flags a broken optimizer invariant and should
/// never be observed for pipelines built through the public API. [`VtError::Io`] is raised by
/// backing tables and travels through composed cursors unchanged.
#[derive(Debug, thiserror::Error)]
pub enum VtError {
    #[error("{spec} expects {expected} predecessor(s), got {actual}")]
    Arity {
        spec: SpecKind,
        expected: Arity,
        actual: usize,
    },

    #[error(
        "{spec}{suffix} references column {column}, but its input has {width} column(s)",
        suffix = node_suffix(.node)
    )]
    ColumnOutOfRange {
        node: Option<usize>,
        spec: SpecKind,
        column: usize,
        width: usize,
    },

    #[error("permutation {permutation:?} is not a permutation of 0..{width}")]
    InvalidPermutation { permutation: Vec<usize>, width: usize },

    #[error(
        "{spec}{suffix} input {input} has schema {actual}, expected a schema compatible with {expected}",
        suffix = node_suffix(.node)
    )]
    IncompatibleSchemas {
        node: Option<usize>,
        spec: SpecKind,
        input: usize,
        expected: ColumnarSchema,
        actual: ColumnarSchema,
    },

    #[error("{what} schema mismatch: expected {expected}, got {actual}")]
    SchemaMismatch {
        what: String,
        expected: ColumnarSchema,
        actual: ColumnarSchema,
    },

    #[error("source {source_id} is declared with {expected} rows, bound table has {actual}")]
    SizeMismatch {
        source_id: SourceId,
        expected: u64,
        actual: u64,
    },

    #[error("source {source_id} is declared with conflicting schemas {first} and {second}")]
    ConflictingSource {
        source_id: SourceId,
        first: ColumnarSchema,
        second: ColumnarSchema,
    },

    #[error("no table bound to source {0}")]
    UnknownSource(SourceId),

    #[error("cannot create a delegating access for {0} columns")]
    UnsupportedAccessKind(DataKind),

    #[error("access kind mismatch: expected {expected}, got {actual}")]
    AccessKindMismatch { expected: DataKind, actual: DataKind },

    #[error("function error: {0}")]
    Function(String),

    #[error("I/O error during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl VtError {
    /// Wrap a backend failure with the name of the cursor operation that hit it.
    pub fn io(operation: &'static str, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Io {
            operation,
            source: source.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

fn node_suffix(node: &Option<usize>) -> String {
    match node {
        Some(id) => format!(" (node {id})"),
        None => String::new(),
    }
}
