#![allow(dead_code)]

use formula_vtable::cursor::read_all;
use formula_vtable::{
    BoxedCursor, ColumnarSchema, CompileOptions, CompiledExecutor, Cursor, DataKind,
    InMemoryTable, LazyExecutor, Row, RowAccessible, Selection, SourceId, Value, VirtualTable,
    VirtualTableExecutor, VtError, VtResult,
};
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

pub type Sources = HashMap<SourceId, Arc<dyn RowAccessible>>;

pub fn schema(kinds: &[DataKind]) -> ColumnarSchema {
    ColumnarSchema::of_kinds(kinds.iter().cloned())
}

pub fn table(kinds: &[DataKind], rows: Vec<Vec<Value>>) -> InMemoryTable {
    InMemoryTable::from_rows(schema(kinds), rows).unwrap()
}

/// Single `LONG` column holding `range`.
pub fn longs(range: std::ops::Range<i64>) -> InMemoryTable {
    table(
        &[DataKind::Long],
        range.map(|v| vec![Value::from(v)]).collect(),
    )
}

pub fn sources<const N: usize>(tables: [(&str, Arc<dyn RowAccessible>); N]) -> Sources {
    tables
        .into_iter()
        .map(|(id, table)| (SourceId::new(id), table))
        .collect()
}

pub fn read(table: &dyn RowAccessible, selection: &Selection) -> Vec<Vec<Value>> {
    let mut cursor = table.create_cursor(selection).unwrap();
    read_all(cursor.as_mut()).unwrap()
}

pub fn compiled(pipeline: &VirtualTable, sources: &Sources) -> Arc<dyn RowAccessible> {
    let executor =
        CompiledExecutor::new(&[pipeline.transform().clone()], CompileOptions::default()).unwrap();
    executor.execute(sources).unwrap().remove(0)
}

pub fn lazy(pipeline: &VirtualTable, sources: &Sources) -> Arc<dyn RowAccessible> {
    LazyExecutor::new(pipeline.transform().clone())
        .execute(sources)
        .unwrap()
        .remove(0)
}

/// Rows of `pipeline` under both executors, checking they agree.
pub fn rows_of(pipeline: &VirtualTable, sources: &Sources, selection: &Selection) -> Vec<Vec<Value>> {
    let compiled_rows = read(compiled(pipeline, sources).as_ref(), selection);
    let lazy_rows = read(lazy(pipeline, sources).as_ref(), selection);
    assert_eq!(compiled_rows, lazy_rows, "compiled and lazy executors disagree");
    compiled_rows
}

/// Shared log of cursor lifecycle events.
#[derive(Clone, Debug, Default)]
pub struct Events(Rc<RefCell<Vec<String>>>);

impl Events {
    pub fn push(&self, event: String) {
        self.0.borrow_mut().push(event);
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    /// Events without the per-row forwards.
    pub fn lifecycle(&self) -> Vec<String> {
        self.take()
            .into_iter()
            .filter(|e| !e.starts_with("forward"))
            .collect()
    }
}

/// Table recording every open, forward and close of its cursors.
#[derive(Debug)]
pub struct RecordingTable {
    name: &'static str,
    inner: InMemoryTable,
    events: Events,
    report_size: bool,
}

impl RecordingTable {
    pub fn new(name: &'static str, inner: InMemoryTable, events: &Events) -> Self {
        Self {
            name,
            inner,
            events: events.clone(),
            report_size: true,
        }
    }

    /// Hide the row count, as streaming backends do.
    pub fn without_size(mut self) -> Self {
        self.report_size = false;
        self
    }
}

impl RowAccessible for RecordingTable {
    fn schema(&self) -> &ColumnarSchema {
        self.inner.schema()
    }

    fn create_cursor(&self, selection: &Selection) -> VtResult<BoxedCursor> {
        self.events.push(format!("open {} {selection}", self.name));
        Ok(Box::new(RecordingCursor {
            name: self.name,
            inner: self.inner.create_cursor(selection)?,
            events: self.events.clone(),
        }))
    }

    fn size(&self) -> Option<u64> {
        self.report_size.then(|| self.inner.num_rows() as u64)
    }
}

struct RecordingCursor {
    name: &'static str,
    inner: BoxedCursor,
    events: Events,
}

impl Cursor for RecordingCursor {
    fn access(&self) -> &Row {
        self.inner.access()
    }

    fn forward(&mut self) -> VtResult<bool> {
        self.events.push(format!("forward {}", self.name));
        self.inner.forward()
    }

    fn close(&mut self) -> VtResult<()> {
        self.events.push(format!("close {}", self.name));
        self.inner.close()
    }
}

/// Table whose cursors fail after producing `good_rows` rows.
#[derive(Debug)]
pub struct FailingTable {
    inner: InMemoryTable,
    good_rows: usize,
}

impl FailingTable {
    pub fn new(inner: InMemoryTable, good_rows: usize) -> Self {
        Self { inner, good_rows }
    }
}

impl RowAccessible for FailingTable {
    fn schema(&self) -> &ColumnarSchema {
        self.inner.schema()
    }

    fn create_cursor(&self, selection: &Selection) -> VtResult<BoxedCursor> {
        Ok(Box::new(FailingCursor {
            inner: self.inner.create_cursor(selection)?,
            remaining: self.good_rows,
        }))
    }
}

struct FailingCursor {
    inner: BoxedCursor,
    remaining: usize,
}

impl Cursor for FailingCursor {
    fn access(&self) -> &Row {
        self.inner.access()
    }

    fn forward(&mut self) -> VtResult<bool> {
        if self.remaining == 0 {
            return Err(VtError::io(
                "forward",
                std::io::Error::new(std::io::ErrorKind::Other, "disk went away"),
            ));
        }
        self.remaining -= 1;
        self.inner.forward()
    }

    fn close(&mut self) -> VtResult<()> {
        self.inner.close()
    }
}
