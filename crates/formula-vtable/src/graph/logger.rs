use crate::graph::{GraphStage, TransformGraph};

/// Receives a snapshot of the graph after each compilation stage.
pub trait GraphLogger {
    fn log(&mut self, stage: GraphStage, graph: &TransformGraph);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopGraphLogger;

impl GraphLogger for NoopGraphLogger {
    fn log(&mut self, _stage: GraphStage, _graph: &TransformGraph) {}
}

/// Renders each snapshot through the `log` facade.
#[derive(Clone, Copy, Debug)]
pub struct LogGraphLogger {
    level: log::Level,
}

impl LogGraphLogger {
    pub fn new(level: log::Level) -> Self {
        Self { level }
    }
}

impl Default for LogGraphLogger {
    fn default() -> Self {
        Self::new(log::Level::Trace)
    }
}

impl GraphLogger for LogGraphLogger {
    fn log(&mut self, stage: GraphStage, graph: &TransformGraph) {
        if log::log_enabled!(self.level) {
            log::log!(self.level, "transform graph ({stage}):\n{graph}");
        }
    }
}
