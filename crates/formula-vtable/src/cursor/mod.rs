//! Pull-based cursors over rows of accesses.
//!
//! Every cursor goes through `created -> forward()* -> exhausted -> closed`. [`Cursor::access`]
//! returns the same [`Row`] instance for the whole lifetime of the cursor; its values are only
//! meaningful after a successful [`Cursor::forward`]. Once `forward` returns `false` it must not
//! be called again. `close` is idempotent and closes each owned predecessor exactly once.

mod append;
mod compute;
mod concatenate;
mod lookahead;
mod slice;
mod source;

pub use crate::cursor::append::{AppendBranch, AppendedCursor};
pub use crate::cursor::compute::{AggregateCursor, MapCursor, ObserverCursor};
pub use crate::cursor::concatenate::{BranchOpener, ConcatBranch, ConcatenatedCursor};
pub use crate::cursor::lookahead::BufferingLookaheadCursor;
pub use crate::cursor::slice::SliceCursor;
pub use crate::cursor::source::DeferredSourceCursor;

use crate::error::VtResult;
use crate::row::{BufferedRow, Row};
use crate::value::Value;

pub type BoxedCursor = Box<dyn Cursor>;

pub trait Cursor {
    fn access(&self) -> &Row;

    /// Move to the next row. Returns `false` once the cursor is exhausted.
    fn forward(&mut self) -> VtResult<bool>;

    fn close(&mut self) -> VtResult<()>;

    /// Random-access view of this cursor, if it supports one.
    fn as_random_access(&mut self) -> Option<&mut dyn RandomAccessCursor> {
        None
    }
}

/// Cursor that can tell whether another row exists without consuming it.
pub trait LookaheadCursor: Cursor {
    fn can_forward(&mut self) -> VtResult<bool>;
}

pub trait RandomAccessCursor: LookaheadCursor {
    /// Number of rows this cursor iterates over.
    fn num_rows(&self) -> u64;

    /// Position the cursor on `row` (relative to the cursor's first row), so that `access()`
    /// reads that row and the next `forward()` moves to `row + 1`. Moving past the end leaves
    /// the cursor exhausted.
    fn move_to(&mut self, row: u64) -> VtResult<()>;
}

/// Cursor that writes rows through a buffered row.
pub trait WriteCursor {
    fn access(&self) -> &BufferedRow;

    /// Append the current contents of [`access`](WriteCursor::access) as a new row and reset it
    /// to missing.
    fn commit(&mut self) -> VtResult<()>;

    fn close(&mut self) -> VtResult<()>;
}

impl<C: Cursor + ?Sized> Cursor for Box<C> {
    fn access(&self) -> &Row {
        (**self).access()
    }

    fn forward(&mut self) -> VtResult<bool> {
        (**self).forward()
    }

    fn close(&mut self) -> VtResult<()> {
        (**self).close()
    }

    fn as_random_access(&mut self) -> Option<&mut dyn RandomAccessCursor> {
        (**self).as_random_access()
    }
}

/// A cursor exposing a different row view over the accesses of an inner cursor.
///
/// Used for column projection, permutation, append-missing, and for the output row of compiled
/// plans. Forwarding and closing go straight to the inner cursor.
pub struct RowViewCursor {
    inner: BoxedCursor,
    row: Row,
    closed: bool,
}

impl RowViewCursor {
    pub fn new(inner: BoxedCursor, row: Row) -> Self {
        Self {
            inner,
            row,
            closed: false,
        }
    }
}

impl Cursor for RowViewCursor {
    fn access(&self) -> &Row {
        &self.row
    }

    fn forward(&mut self) -> VtResult<bool> {
        self.inner.forward()
    }

    fn close(&mut self) -> VtResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close()
    }
}

/// Drain `cursor`, collecting a snapshot of every row, then close it.
///
/// The cursor is closed on the error path too; the first error wins.
pub fn read_all(cursor: &mut dyn Cursor) -> VtResult<Vec<Vec<Value>>> {
    let mut rows = Vec::new();
    let drained = (|| {
        while cursor.forward()? {
            rows.push(cursor.access().values());
        }
        Ok(())
    })();
    let closed = cursor.close();
    drained?;
    closed?;
    Ok(rows)
}
