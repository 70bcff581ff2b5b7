use crate::cursor::{BoxedCursor, Cursor};
use crate::error::VtResult;
use crate::row::Row;
use crate::selection::RowRangeSelection;

/// Restricts an inner cursor to a row range.
///
/// Leading rows are skipped with `move_to` when the inner cursor supports random access, and by
/// forwarding otherwise. The inner cursor is closed as soon as the range is exhausted.
pub struct SliceCursor {
    inner: BoxedCursor,
    row: Row,
    range: RowRangeSelection,
    /// Index (in inner rows) of the row the next inner forward produces.
    next_row: u64,
    done: bool,
    closed: bool,
}

impl SliceCursor {
    pub fn new(inner: BoxedCursor, range: RowRangeSelection) -> Self {
        let row = inner.access().clone();
        Self {
            inner,
            row,
            range,
            next_row: 0,
            done: false,
            closed: false,
        }
    }

    fn skip_to(&mut self, from: u64) -> VtResult<bool> {
        if let Some(random_access) = self.inner.as_random_access() {
            random_access.move_to(from - 1)?;
            self.next_row = from;
            return Ok(true);
        }
        while self.next_row < from {
            if !self.inner.forward()? {
                return Ok(false);
            }
            self.next_row += 1;
        }
        Ok(true)
    }

    fn finish(&mut self) -> VtResult<bool> {
        self.done = true;
        self.close_inner()?;
        Ok(false)
    }

    fn close_inner(&mut self) -> VtResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close()
    }
}

impl Cursor for SliceCursor {
    fn access(&self) -> &Row {
        &self.row
    }

    fn forward(&mut self) -> VtResult<bool> {
        if self.done {
            return Ok(false);
        }
        if self.range.is_empty() {
            return self.finish();
        }
        let from = self.range.from_index();
        if self.next_row < from && !self.skip_to(from)? {
            return self.finish();
        }
        if self.next_row >= self.range.to_index() || !self.inner.forward()? {
            return self.finish();
        }
        self.next_row += 1;
        Ok(true)
    }

    fn close(&mut self) -> VtResult<()> {
        self.close_inner()
    }
}
