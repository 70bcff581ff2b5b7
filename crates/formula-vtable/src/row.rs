use crate::access::{AccessRef, BufferedAccess, DelegatingAccess, MissingAccess};
use crate::error::VtResult;
use crate::schema::{ColumnarSchema, DataKind};
use crate::value::Value;
use std::rc::Rc;

/// A fixed-size, ordered bundle of accesses, one per column.
#[derive(Clone, Debug, Default)]
pub struct Row {
    accesses: Vec<AccessRef>,
}

impl Row {
    pub fn new(accesses: Vec<AccessRef>) -> Self {
        Self { accesses }
    }

    /// A row whose accesses are all missing.
    pub fn missing(schema: &ColumnarSchema) -> Self {
        Self {
            accesses: schema
                .kinds()
                .map(|kind| MissingAccess::shared(kind.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.accesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accesses.is_empty()
    }

    /// Access for column `idx`. Panics if `idx` is out of range, like slice indexing.
    pub fn access(&self, idx: usize) -> &AccessRef {
        &self.accesses[idx]
    }

    pub fn get(&self, idx: usize) -> Option<&AccessRef> {
        self.accesses.get(idx)
    }

    pub fn accesses(&self) -> &[AccessRef] {
        &self.accesses
    }

    /// A row view made of the given columns of `self`, in order.
    pub fn project(&self, indices: &[usize]) -> Self {
        Self {
            accesses: indices.iter().map(|&idx| self.accesses[idx].clone()).collect(),
        }
    }

    /// Snapshot of the current values.
    pub fn values(&self) -> Vec<Value> {
        self.accesses.iter().map(|a| a.value()).collect()
    }
}

impl FromIterator<AccessRef> for Row {
    fn from_iter<T: IntoIterator<Item = AccessRef>>(iter: T) -> Self {
        Self {
            accesses: iter.into_iter().collect(),
        }
    }
}

/// A row of [`BufferedAccess`]es, i.e. a detached copy of a row.
#[derive(Clone, Debug)]
pub struct BufferedRow {
    buffers: Vec<Rc<BufferedAccess>>,
    view: Row,
}

impl BufferedRow {
    pub fn new(schema: &ColumnarSchema) -> Self {
        Self::from_kinds(schema.kinds().cloned())
    }

    pub fn from_kinds(kinds: impl IntoIterator<Item = DataKind>) -> Self {
        let buffers: Vec<Rc<BufferedAccess>> = kinds.into_iter().map(BufferedAccess::shared).collect();
        let view = buffers
            .iter()
            .map(|b| b.clone() as AccessRef)
            .collect();
        Self { buffers, view }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffer(&self, idx: usize) -> &Rc<BufferedAccess> {
        &self.buffers[idx]
    }

    pub fn buffers(&self) -> &[Rc<BufferedAccess>] {
        &self.buffers
    }

    /// Read view over the buffers; the same instance for the lifetime of `self`.
    pub fn as_row(&self) -> &Row {
        &self.view
    }

    pub fn set_from(&self, row: &Row) {
        debug_assert_eq!(row.len(), self.buffers.len());
        for (buffer, access) in self.buffers.iter().zip(row.accesses()) {
            buffer.set_from(access.as_ref());
        }
    }

    pub fn set_values(&self, values: &[Value]) -> VtResult<()> {
        debug_assert_eq!(values.len(), self.buffers.len());
        for (buffer, value) in self.buffers.iter().zip(values) {
            buffer.set(value.clone())?;
        }
        Ok(())
    }

    pub fn set_missing(&self) {
        for buffer in &self.buffers {
            buffer.set_missing();
        }
    }
}

/// A row of delegating accesses that can be re-pointed to another row as a whole.
///
/// `Void` columns cannot delegate; they are backed by permanently missing accesses instead.
#[derive(Debug)]
pub struct DelegatingRow {
    delegates: Vec<Option<Rc<DelegatingAccess>>>,
    view: Row,
}

impl DelegatingRow {
    pub fn new(schema: &ColumnarSchema) -> VtResult<Self> {
        Self::from_kinds(schema.kinds().cloned())
    }

    pub fn from_kinds(kinds: impl IntoIterator<Item = DataKind>) -> VtResult<Self> {
        let mut delegates = Vec::new();
        let mut view = Vec::new();
        for kind in kinds {
            if kind == DataKind::Void {
                delegates.push(None);
                view.push(MissingAccess::shared(kind));
            } else {
                let access = Rc::new(DelegatingAccess::new(kind)?);
                view.push(access.clone() as AccessRef);
                delegates.push(Some(access));
            }
        }
        Ok(Self {
            delegates,
            view: Row::new(view),
        })
    }

    pub fn as_row(&self) -> &Row {
        &self.view
    }

    pub fn len(&self) -> usize {
        self.delegates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delegates.is_empty()
    }

    /// Point column `idx` at `access`.
    pub fn set_delegate(&self, idx: usize, access: AccessRef) -> VtResult<()> {
        match &self.delegates[idx] {
            Some(delegate) => delegate.set_delegate_access(access),
            None => Ok(()),
        }
    }

    /// Point every column at the same column of `row`.
    pub fn set_delegates(&self, row: &Row) -> VtResult<()> {
        self.set_delegate_accesses(row.accesses())
    }

    pub fn set_delegate_accesses(&self, accesses: &[AccessRef]) -> VtResult<()> {
        debug_assert_eq!(accesses.len(), self.delegates.len());
        for (idx, access) in accesses.iter().enumerate() {
            self.set_delegate(idx, access.clone())?;
        }
        Ok(())
    }

    /// Make column `idx` report missing.
    pub fn clear_column(&self, idx: usize) {
        if let Some(delegate) = &self.delegates[idx] {
            delegate.clear_delegate();
        }
    }

    /// Make every column report missing.
    pub fn clear(&self) {
        for delegate in self.delegates.iter().flatten() {
            delegate.clear_delegate();
        }
    }
}
