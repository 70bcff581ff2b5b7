use crate::access::AccessRef;
use crate::cursor::{BoxedCursor, Cursor};
use crate::error::VtResult;
use crate::row::{DelegatingRow, Row};
use crate::schema::ColumnarSchema;
use std::collections::VecDeque;

/// Opens a branch cursor on demand, returning it together with the accesses that feed the
/// concatenated columns (`None` for columns nobody reads).
pub type BranchOpener = Box<dyn FnOnce() -> VtResult<(BoxedCursor, Vec<Option<AccessRef>>)>>;

/// One input of a [`ConcatenatedCursor`].
pub enum ConcatBranch {
    /// A cursor that already exists but has not been forwarded yet.
    Ready(BoxedCursor, Vec<Option<AccessRef>>),
    /// A cursor that is only created once the preceding branches are exhausted.
    Deferred(BranchOpener),
}

/// Rows of all branches, one branch after the other.
///
/// At most one branch is being iterated at a time. A branch is closed as soon as it is exhausted,
/// before the next one is forwarded for the first time.
pub struct ConcatenatedCursor {
    pending: VecDeque<ConcatBranch>,
    current: Option<BoxedCursor>,
    view: DelegatingRow,
    closed: bool,
}

impl ConcatenatedCursor {
    pub fn new(schema: &ColumnarSchema, branches: Vec<ConcatBranch>) -> VtResult<Self> {
        Ok(Self {
            pending: branches.into(),
            current: None,
            view: DelegatingRow::new(schema)?,
            closed: false,
        })
    }

    /// Make the next pending branch current. Returns `false` if there is none.
    fn open_next(&mut self) -> VtResult<bool> {
        let Some(branch) = self.pending.pop_front() else {
            return Ok(false);
        };
        let (cursor, accesses) = match branch {
            ConcatBranch::Ready(cursor, accesses) => (cursor, accesses),
            ConcatBranch::Deferred(open) => open()?,
        };
        // Install the cursor before wiring so an error below still closes it.
        self.current = Some(cursor);
        for (idx, access) in accesses.into_iter().enumerate() {
            match access {
                Some(access) => self.view.set_delegate(idx, access)?,
                None => self.view.clear_column(idx),
            }
        }
        Ok(true)
    }
}

impl Cursor for ConcatenatedCursor {
    fn access(&self) -> &Row {
        self.view.as_row()
    }

    fn forward(&mut self) -> VtResult<bool> {
        loop {
            if self.current.is_none() && !self.open_next()? {
                return Ok(false);
            }
            if let Some(cursor) = self.current.as_mut() {
                if cursor.forward()? {
                    return Ok(true);
                }
                log::trace!("concatenated branch exhausted, {} left", self.pending.len());
                let mut exhausted = self.current.take();
                if let Some(cursor) = exhausted.as_mut() {
                    cursor.close()?;
                }
            }
        }
    }

    fn close(&mut self) -> VtResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut result = Ok(());
        if let Some(mut cursor) = self.current.take() {
            result = cursor.close();
        }
        // Branches that were built but never reached still own their predecessors.
        for branch in self.pending.drain(..) {
            if let ConcatBranch::Ready(mut cursor, _) = branch {
                let closed = cursor.close();
                if result.is_ok() {
                    result = closed;
                }
            }
        }
        result
    }
}
