//! Single-slot value cells.
//!
//! Cursors never hand out values directly. They expose rows of accesses whose identity is stable
//! for the whole lifetime of the cursor; moving the cursor changes what the accesses read, not
//! which accesses the caller holds.

use crate::error::{VtError, VtResult};
use crate::schema::DataKind;
use crate::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Shared handle to a read access.
pub type AccessRef = Rc<dyn ReadAccess>;

pub trait ReadAccess: fmt::Debug {
    fn kind(&self) -> &DataKind;

    fn is_missing(&self) -> bool;

    /// Current value, [`Value::Missing`] if [`is_missing`](Self::is_missing).
    fn value(&self) -> Value;
}

/// Access that owns a detached copy of its value.
#[derive(Debug)]
pub struct BufferedAccess {
    kind: DataKind,
    value: RefCell<Value>,
}

impl BufferedAccess {
    pub fn new(kind: DataKind) -> Self {
        Self {
            kind,
            value: RefCell::new(Value::Missing),
        }
    }

    pub fn shared(kind: DataKind) -> Rc<Self> {
        Rc::new(Self::new(kind))
    }

    /// Store `value`. Values that do not fit the access kind are rejected.
    pub fn set(&self, value: Value) -> VtResult<()> {
        if !value.fits(&self.kind) {
            return Err(VtError::Function(format!(
                "value {value} does not fit a {} access",
                self.kind
            )));
        }
        *self.value.borrow_mut() = value;
        Ok(())
    }

    pub fn set_missing(&self) {
        *self.value.borrow_mut() = Value::Missing;
    }

    /// Copy the current value of `other` into this access.
    pub fn set_from(&self, other: &dyn ReadAccess) {
        debug_assert_eq!(other.kind(), &self.kind);
        *self.value.borrow_mut() = other.value();
    }
}

impl ReadAccess for BufferedAccess {
    fn kind(&self) -> &DataKind {
        &self.kind
    }

    fn is_missing(&self) -> bool {
        self.value.borrow().is_missing()
    }

    fn value(&self) -> Value {
        self.value.borrow().clone()
    }
}

/// Access that reads through to another access which can be swapped at any time.
///
/// While no delegate is set the access reports missing.
#[derive(Debug)]
pub struct DelegatingAccess {
    kind: DataKind,
    delegate: RefCell<Option<AccessRef>>,
}

impl DelegatingAccess {
    pub fn new(kind: DataKind) -> VtResult<Self> {
        if kind == DataKind::Void {
            return Err(VtError::UnsupportedAccessKind(kind));
        }
        Ok(Self {
            kind,
            delegate: RefCell::new(None),
        })
    }

    pub fn set_delegate_access(&self, delegate: AccessRef) -> VtResult<()> {
        if delegate.kind() != &self.kind {
            return Err(VtError::AccessKindMismatch {
                expected: self.kind.clone(),
                actual: delegate.kind().clone(),
            });
        }
        *self.delegate.borrow_mut() = Some(delegate);
        Ok(())
    }

    pub fn clear_delegate(&self) {
        *self.delegate.borrow_mut() = None;
    }
}

impl ReadAccess for DelegatingAccess {
    fn kind(&self) -> &DataKind {
        &self.kind
    }

    fn is_missing(&self) -> bool {
        self.delegate
            .borrow()
            .as_ref()
            .map_or(true, |d| d.is_missing())
    }

    fn value(&self) -> Value {
        self.delegate
            .borrow()
            .as_ref()
            .map_or(Value::Missing, |d| d.value())
    }
}

/// Access that is always missing.
#[derive(Debug)]
pub struct MissingAccess {
    kind: DataKind,
}

impl MissingAccess {
    pub fn new(kind: DataKind) -> Self {
        Self { kind }
    }

    pub fn shared(kind: DataKind) -> AccessRef {
        Rc::new(Self::new(kind))
    }
}

impl ReadAccess for MissingAccess {
    fn kind(&self) -> &DataKind {
        &self.kind
    }

    fn is_missing(&self) -> bool {
        true
    }

    fn value(&self) -> Value {
        Value::Missing
    }
}
