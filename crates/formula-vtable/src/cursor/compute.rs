use crate::access::AccessRef;
use crate::cursor::{BoxedCursor, Cursor};
use crate::error::{VtError, VtResult};
use crate::function::{Aggregator, AggregatorFactory, Mapper, Observer};
use crate::row::{BufferedRow, Row};
use crate::schema::ColumnarSchema;
use std::sync::Arc;

/// Computes new columns from the accesses of its predecessor, row by row.
pub struct MapCursor {
    inner: BoxedCursor,
    inputs: Vec<AccessRef>,
    mapper: Box<dyn Mapper>,
    outputs: BufferedRow,
    closed: bool,
}

impl MapCursor {
    pub fn new(
        inner: BoxedCursor,
        inputs: Vec<AccessRef>,
        mapper: Box<dyn Mapper>,
        output_schema: &ColumnarSchema,
    ) -> Self {
        Self {
            inner,
            inputs,
            mapper,
            outputs: BufferedRow::new(output_schema),
            closed: false,
        }
    }
}

impl Cursor for MapCursor {
    fn access(&self) -> &Row {
        self.outputs.as_row()
    }

    fn forward(&mut self) -> VtResult<bool> {
        if !self.inner.forward()? {
            return Ok(false);
        }
        self.mapper.map(&self.inputs, self.outputs.buffers())?;
        Ok(true)
    }

    fn close(&mut self) -> VtResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close()
    }
}

/// Passes rows through unchanged while showing every one of them to an observer.
pub struct ObserverCursor {
    inner: BoxedCursor,
    row: Row,
    inputs: Vec<AccessRef>,
    observer: Box<dyn Observer>,
    closed: bool,
}

impl ObserverCursor {
    pub fn new(inner: BoxedCursor, inputs: Vec<AccessRef>, observer: Box<dyn Observer>) -> Self {
        let row = inner.access().clone();
        Self {
            inner,
            row,
            inputs,
            observer,
            closed: false,
        }
    }
}

impl Cursor for ObserverCursor {
    fn access(&self) -> &Row {
        &self.row
    }

    fn forward(&mut self) -> VtResult<bool> {
        if !self.inner.forward()? {
            return Ok(false);
        }
        self.observer.observe(&self.inputs)?;
        Ok(true)
    }

    fn close(&mut self) -> VtResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let observed = self.observer.close();
        let closed = self.inner.close();
        observed.and(closed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AggregateState {
    Pending,
    Emitted,
    Done,
}

/// Reduces all rows of one or more partitions into a single output row.
///
/// Each partition is folded into its own aggregator state; the states are then combined in
/// partition order and finished once. Partitions are drained and closed one after the other.
pub struct AggregateCursor {
    partitions: Vec<(Option<BoxedCursor>, Vec<AccessRef>)>,
    factory: Arc<dyn AggregatorFactory>,
    outputs: BufferedRow,
    state: AggregateState,
    closed: bool,
}

impl AggregateCursor {
    pub fn new(
        partitions: Vec<(BoxedCursor, Vec<AccessRef>)>,
        factory: Arc<dyn AggregatorFactory>,
    ) -> Self {
        let outputs = BufferedRow::new(factory.output_schema());
        Self {
            partitions: partitions
                .into_iter()
                .map(|(cursor, inputs)| (Some(cursor), inputs))
                .collect(),
            factory,
            outputs,
            state: AggregateState::Pending,
            closed: false,
        }
    }

    fn aggregate(&mut self) -> VtResult<()> {
        let mut combined: Option<Box<dyn Aggregator>> = None;
        for (slot, inputs) in &mut self.partitions {
            let Some(cursor) = slot.as_mut() else {
                return Err(VtError::internal("aggregate partition consumed twice"));
            };
            let mut state = self.factory.create_aggregator();
            while cursor.forward()? {
                state.update(inputs)?;
            }
            cursor.close()?;
            *slot = None;
            combined = Some(match combined.take() {
                None => state,
                Some(mut acc) => {
                    acc.combine(state)?;
                    acc
                }
            });
        }
        let state = match combined {
            Some(state) => state,
            None => self.factory.create_aggregator(),
        };
        state.finish(self.outputs.buffers())
    }
}

impl Cursor for AggregateCursor {
    fn access(&self) -> &Row {
        self.outputs.as_row()
    }

    fn forward(&mut self) -> VtResult<bool> {
        match self.state {
            AggregateState::Pending => {
                self.aggregate()?;
                self.state = AggregateState::Emitted;
                Ok(true)
            }
            AggregateState::Emitted | AggregateState::Done => {
                self.state = AggregateState::Done;
                Ok(false)
            }
        }
    }

    fn close(&mut self) -> VtResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut result = Ok(());
        for (slot, _) in &mut self.partitions {
            if let Some(mut cursor) = slot.take() {
                let closed = cursor.close();
                if result.is_ok() {
                    result = closed;
                }
            }
        }
        result
    }
}
