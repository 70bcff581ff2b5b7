use crate::cursor::{BoxedCursor, Cursor};
use crate::error::VtResult;
use crate::row::{DelegatingRow, Row};
use crate::selection::Selection;
use crate::table::RowAccessible;
use std::sync::Arc;

/// Cursor over a backing table that is only opened on the first `forward()`.
///
/// Compiled plans build every cursor up front; deferring the open keeps a concatenation from
/// holding more than one of its branch tables open at a time.
pub struct DeferredSourceCursor {
    table: Arc<dyn RowAccessible>,
    selection: Selection,
    inner: Option<BoxedCursor>,
    view: DelegatingRow,
    closed: bool,
}

impl DeferredSourceCursor {
    pub fn new(table: Arc<dyn RowAccessible>, selection: Selection) -> VtResult<Self> {
        let view = DelegatingRow::new(table.schema())?;
        Ok(Self {
            table,
            selection,
            inner: None,
            view,
            closed: false,
        })
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }
}

impl Cursor for DeferredSourceCursor {
    fn access(&self) -> &Row {
        self.view.as_row()
    }

    fn forward(&mut self) -> VtResult<bool> {
        if self.closed {
            return Ok(false);
        }
        if self.inner.is_none() {
            log::trace!("opening source cursor with {}", self.selection);
            let cursor = self.table.create_cursor(&self.selection)?;
            self.view.set_delegates(cursor.access())?;
            self.inner = Some(cursor);
        }
        match self.inner.as_mut() {
            Some(cursor) => cursor.forward(),
            None => Ok(false),
        }
    }

    fn close(&mut self) -> VtResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.inner.as_mut() {
            Some(cursor) => cursor.close(),
            None => Ok(()),
        }
    }
}
