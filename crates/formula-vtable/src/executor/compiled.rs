use crate::cap::{compile, CapExecutor, CursorAssemblyPlan};
use crate::error::VtResult;
use crate::executor::{CompileOptions, VirtualTableExecutor};
use crate::graph::{GraphLogger, LogGraphLogger};
use crate::spec::{SourceId, TableTransform};
use crate::table::RowAccessible;
use std::collections::HashMap;
use std::sync::Arc;

/// Compiles each terminal once into a cursor assembly plan and interprets the plans per binding.
#[derive(Clone, Debug)]
pub struct CompiledExecutor {
    plans: Vec<CapExecutor>,
}

impl CompiledExecutor {
    /// Compile `terminals`, logging graph snapshots at trace level.
    pub fn new(terminals: &[Arc<TableTransform>], options: CompileOptions) -> VtResult<Self> {
        Self::with_logger(terminals, options, &mut LogGraphLogger::default())
    }

    pub fn with_logger(
        terminals: &[Arc<TableTransform>],
        options: CompileOptions,
        logger: &mut dyn GraphLogger,
    ) -> VtResult<Self> {
        let plans = terminals
            .iter()
            .map(|terminal| {
                let plan = compile(terminal, &options, logger)?;
                log::trace!("cursor assembly plan:\n{plan}");
                Ok(CapExecutor::new(Arc::new(plan)))
            })
            .collect::<VtResult<Vec<_>>>()?;
        Ok(Self { plans })
    }

    pub fn plans(&self) -> impl Iterator<Item = &CursorAssemblyPlan> + '_ {
        self.plans.iter().map(|executor| executor.plan().as_ref())
    }
}

impl VirtualTableExecutor for CompiledExecutor {
    fn execute(
        &self,
        sources: &HashMap<SourceId, Arc<dyn RowAccessible>>,
    ) -> VtResult<Vec<Arc<dyn RowAccessible>>> {
        self.plans
            .iter()
            .map(|executor| {
                let table: Arc<dyn RowAccessible> = Arc::new(executor.execute(sources)?);
                Ok(table)
            })
            .collect()
    }
}
