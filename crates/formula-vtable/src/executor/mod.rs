//! Front ends turning a pipeline's terminal transform into executable tables.

mod compiled;
mod lazy;

pub use crate::executor::compiled::CompiledExecutor;
pub use crate::executor::lazy::LazyExecutor;

use crate::error::VtResult;
use crate::graph::TieBreakPolicy;
use crate::spec::SourceId;
use crate::table::RowAccessible;
use std::collections::HashMap;
use std::sync::Arc;

/// Binds a pipeline to concrete source tables.
///
/// Each call is independent: the same executor can be run against different bindings of the
/// same source ids.
pub trait VirtualTableExecutor {
    /// One table per terminal transform, in the order the terminals were given.
    fn execute(
        &self,
        sources: &HashMap<SourceId, Arc<dyn RowAccessible>>,
    ) -> VtResult<Vec<Arc<dyn RowAccessible>>>;
}

#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Run the graph rewrites before ordering.
    pub optimize: bool,
    pub tie_break: TieBreakPolicy,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            tie_break: TieBreakPolicy::default(),
        }
    }
}
