use crate::access::AccessRef;
use crate::cursor::{BoxedCursor, Cursor};
use crate::error::VtResult;
use crate::row::{DelegatingRow, Row};
use crate::schema::ColumnarSchema;

/// One input of an [`AppendedCursor`] and the output columns it feeds.
pub struct AppendBranch {
    cursor: Option<BoxedCursor>,
    /// `(output column, access)` pairs; `None` for columns nobody reads.
    columns: Vec<(usize, Option<AccessRef>)>,
}

impl AppendBranch {
    pub fn new(cursor: BoxedCursor, columns: Vec<(usize, Option<AccessRef>)>) -> Self {
        Self {
            cursor: Some(cursor),
            columns,
        }
    }

    /// A branch whose accesses are laid out consecutively from `offset`.
    pub fn at_offset(cursor: BoxedCursor, offset: usize) -> Self {
        let columns = cursor
            .access()
            .accesses()
            .iter()
            .enumerate()
            .map(|(idx, access)| (offset + idx, Some(access.clone())))
            .collect();
        Self::new(cursor, columns)
    }
}

/// Column-wise combination of several cursors forwarded in lockstep.
///
/// The combined cursor has as many rows as its longest branch. Once a branch is exhausted it is
/// closed and its columns read as missing.
pub struct AppendedCursor {
    branches: Vec<AppendBranch>,
    view: DelegatingRow,
    closed: bool,
}

impl AppendedCursor {
    pub fn new(schema: &ColumnarSchema, branches: Vec<AppendBranch>) -> VtResult<Self> {
        let view = DelegatingRow::new(schema)?;
        for branch in &branches {
            for (column, access) in &branch.columns {
                if let Some(access) = access {
                    view.set_delegate(*column, access.clone())?;
                }
            }
        }
        Ok(Self {
            branches,
            view,
            closed: false,
        })
    }
}

impl Cursor for AppendedCursor {
    fn access(&self) -> &Row {
        self.view.as_row()
    }

    fn forward(&mut self) -> VtResult<bool> {
        let mut any = false;
        for branch in &mut self.branches {
            let Some(cursor) = branch.cursor.as_mut() else {
                continue;
            };
            if cursor.forward()? {
                any = true;
                continue;
            }
            cursor.close()?;
            branch.cursor = None;
            for (column, _) in &branch.columns {
                self.view.clear_column(*column);
            }
        }
        Ok(any)
    }

    fn close(&mut self) -> VtResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut result = Ok(());
        for branch in &mut self.branches {
            if let Some(mut cursor) = branch.cursor.take() {
                let closed = cursor.close();
                if result.is_ok() {
                    result = closed;
                }
            }
        }
        result
    }
}
