use crate::cursor::{BoxedCursor, Cursor, LookaheadCursor};
use crate::error::VtResult;
use crate::row::{BufferedRow, DelegatingRow, Row};
use crate::schema::ColumnarSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Peek {
    /// The inner cursor has not been forwarded past the current row yet.
    Unknown,
    /// The next row is already copied into the inactive buffer.
    Buffered,
    Exhausted,
}

/// Adds lookahead to any cursor by reading one row ahead into a second buffer.
///
/// Two buffers alternate: the active one backs what `access()` reads, the other receives the
/// row read ahead by [`can_forward`](LookaheadCursor::can_forward). The inner cursor is forwarded
/// exactly once per row produced.
pub struct BufferingLookaheadCursor {
    inner: BoxedCursor,
    buffers: [BufferedRow; 2],
    active: usize,
    view: DelegatingRow,
    peek: Peek,
    closed: bool,
}

impl BufferingLookaheadCursor {
    pub fn new(inner: BoxedCursor, schema: &ColumnarSchema) -> VtResult<Self> {
        Ok(Self {
            inner,
            buffers: [BufferedRow::new(schema), BufferedRow::new(schema)],
            active: 0,
            view: DelegatingRow::new(schema)?,
            peek: Peek::Unknown,
            closed: false,
        })
    }

    fn inactive(&self) -> usize {
        1 - self.active
    }
}

impl Cursor for BufferingLookaheadCursor {
    fn access(&self) -> &Row {
        self.view.as_row()
    }

    fn forward(&mut self) -> VtResult<bool> {
        if !self.can_forward()? {
            return Ok(false);
        }
        self.active = self.inactive();
        self.view.set_delegates(self.buffers[self.active].as_row())?;
        self.peek = Peek::Unknown;
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

impl LookaheadCursor for BufferingLookaheadCursor {
    fn can_forward(&mut self) -> VtResult<bool> {
        if self.peek == Peek::Unknown {
            self.peek = if self.inner.forward()? {
                self.buffers[self.inactive()].set_from(self.inner.access());
                Peek::Buffered
            } else {
                Peek::Exhausted
            };
        }
        Ok(self.peek == Peek::Buffered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataKind;
    use crate::table::{InMemoryTable, RowAccessible};
    use crate::value::Value;

    #[test]
    fn lookahead_does_not_disturb_the_current_row() {
        let schema = ColumnarSchema::of_kinds([DataKind::String, DataKind::Int]);
        let table = InMemoryTable::from_rows(
            schema.clone(),
            vec![
                vec![Value::from("foo"), Value::from(7)],
                vec![Value::from("bar"), Value::from(42)],
            ],
        )
        .unwrap();

        let mut cursor = BufferingLookaheadCursor::new(table.cursor().unwrap(), &schema).unwrap();
        let row = cursor.access().clone();

        assert!(cursor.can_forward().unwrap());
        assert!(cursor.forward().unwrap());
        assert!(cursor.can_forward().unwrap());
        assert_eq!(row.values(), vec![Value::from("foo"), Value::from(7)]);

        assert!(cursor.forward().unwrap());
        assert_eq!(row.values(), vec![Value::from("bar"), Value::from(42)]);
        assert!(!cursor.can_forward().unwrap());
        assert!(!cursor.can_forward().unwrap());
        assert_eq!(row.values(), vec![Value::from("bar"), Value::from(42)]);
        assert!(!cursor.forward().unwrap());
        cursor.close().unwrap();
    }
}
