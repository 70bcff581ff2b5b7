use crate::access::{AccessRef, MissingAccess};
use crate::cursor::{
    BoxedCursor, BufferingLookaheadCursor, Cursor, LookaheadCursor, RandomAccessCursor, WriteCursor,
};
use crate::error::{VtError, VtResult};
use crate::row::{BufferedRow, Row};
use crate::schema::{ColumnarSchema, DataKind};
use crate::selection::Selection;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Anything that can hand out cursors over rows of a fixed schema.
///
/// Implementations must honor the column part of a [`Selection`] at least by returning missing
/// values for unselected columns (rows always keep the full schema width), and must honor the row
/// part exactly.
pub trait RowAccessible: fmt::Debug {
    fn schema(&self) -> &ColumnarSchema;

    fn create_cursor(&self, selection: &Selection) -> VtResult<BoxedCursor>;

    /// Number of rows, if known without iterating.
    fn size(&self) -> Option<u64> {
        None
    }

    fn cursor(&self) -> VtResult<BoxedCursor> {
        self.create_cursor(&Selection::all())
    }

    fn lookahead_cursor(&self, selection: &Selection) -> VtResult<Box<dyn LookaheadCursor>> {
        let cursor = self.create_cursor(selection)?;
        Ok(Box::new(BufferingLookaheadCursor::new(cursor, self.schema())?))
    }
}

#[derive(Clone, Debug)]
pub struct InMemoryTableOptions {
    /// Number of rows to reserve space for up front.
    pub initial_capacity: usize,
}

impl Default for InMemoryTableOptions {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
        }
    }
}

/// Row-major table held in memory.
#[derive(Clone, Debug)]
pub struct InMemoryTable {
    schema: ColumnarSchema,
    rows: Arc<[Vec<Value>]>,
}

impl InMemoryTable {
    pub fn from_rows(schema: ColumnarSchema, rows: Vec<Vec<Value>>) -> VtResult<Self> {
        let mut builder = InMemoryTableBuilder::with_options(
            schema,
            InMemoryTableOptions {
                initial_capacity: rows.len(),
            },
        );
        for row in rows {
            builder.push_row(row)?;
        }
        Ok(builder.finish())
    }

    /// Copy every row of `table` into memory.
    pub fn materialize(table: &dyn RowAccessible) -> VtResult<Self> {
        let mut builder = InMemoryTableBuilder::new(table.schema().clone());
        let mut cursor = table.cursor()?;
        let copied = (|| {
            let mut writer = builder.writer();
            while cursor.forward()? {
                writer.access().set_from(cursor.access());
                writer.commit()?;
            }
            writer.close()
        })();
        let closed = cursor.close();
        copied?;
        closed?;
        Ok(builder.finish())
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }
}

impl RowAccessible for InMemoryTable {
    fn schema(&self) -> &ColumnarSchema {
        &self.schema
    }

    fn create_cursor(&self, selection: &Selection) -> VtResult<BoxedCursor> {
        Ok(Box::new(InMemoryCursor::new(
            self.schema.clone(),
            self.rows.clone(),
            selection,
        )))
    }

    fn size(&self) -> Option<u64> {
        Some(self.rows.len() as u64)
    }
}

/// Collects rows for an [`InMemoryTable`].
#[derive(Debug)]
pub struct InMemoryTableBuilder {
    schema: ColumnarSchema,
    rows: Vec<Vec<Value>>,
}

impl InMemoryTableBuilder {
    pub fn new(schema: ColumnarSchema) -> Self {
        Self::with_options(schema, InMemoryTableOptions::default())
    }

    pub fn with_options(schema: ColumnarSchema, options: InMemoryTableOptions) -> Self {
        Self {
            schema,
            rows: Vec::with_capacity(options.initial_capacity),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> VtResult<()> {
        if row.len() != self.schema.num_columns()
            || !row.iter().zip(self.schema.kinds()).all(|(v, k)| v.fits(k))
        {
            let actual = row
                .iter()
                .zip(self.schema.kinds())
                .map(|(value, kind)| {
                    if value.fits(kind) {
                        kind.clone()
                    } else {
                        DataKind::Void
                    }
                })
                .collect::<Vec<_>>();
            return Err(VtError::SchemaMismatch {
                what: format!("row {}", self.rows.len()),
                expected: self.schema.clone(),
                actual: ColumnarSchema::of_kinds(actual),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// A write cursor appending rows to this builder.
    pub fn writer(&mut self) -> InMemoryRowWriter<'_> {
        let buffer = BufferedRow::new(&self.schema);
        InMemoryRowWriter {
            builder: self,
            buffer,
        }
    }

    pub fn finish(self) -> InMemoryTable {
        InMemoryTable {
            schema: self.schema,
            rows: self.rows.into(),
        }
    }
}

pub struct InMemoryRowWriter<'a> {
    builder: &'a mut InMemoryTableBuilder,
    buffer: BufferedRow,
}

impl WriteCursor for InMemoryRowWriter<'_> {
    fn access(&self) -> &BufferedRow {
        &self.buffer
    }

    fn commit(&mut self) -> VtResult<()> {
        let values = self.buffer.as_row().values();
        self.buffer.set_missing();
        self.builder.push_row(values)
    }

    fn close(&mut self) -> VtResult<()> {
        Ok(())
    }
}

/// Cursor over an [`InMemoryTable`]; supports lookahead and random access.
struct InMemoryCursor {
    rows: Arc<[Vec<Value>]>,
    columns: Vec<usize>,
    buffers: BufferedRow,
    row: Row,
    start: usize,
    end: usize,
    /// Absolute index of the row the next forward moves to.
    next: usize,
}

impl InMemoryCursor {
    fn new(schema: ColumnarSchema, rows: Arc<[Vec<Value>]>, selection: &Selection) -> Self {
        let columns = selection.columns().indices(schema.num_columns());
        let buffers = BufferedRow::from_kinds(
            columns
                .iter()
                .filter_map(|&idx| schema.kind(idx).cloned()),
        );
        let mut accesses: Vec<AccessRef> = schema
            .kinds()
            .map(|kind| MissingAccess::shared(kind.clone()))
            .collect();
        for (slot, &column) in columns.iter().enumerate() {
            accesses[column] = buffers.buffer(slot).clone() as AccessRef;
        }

        let len = rows.len() as u64;
        let range = selection.rows();
        let start = range.from_index().min(len) as usize;
        let end = (range.to_index().min(len) as usize).max(start);
        Self {
            rows,
            columns,
            buffers,
            row: Row::new(accesses),
            start,
            end,
            next: start,
        }
    }

    fn load(&self, idx: usize) -> VtResult<()> {
        let values = &self.rows[idx];
        for (slot, &column) in self.columns.iter().enumerate() {
            self.buffers.buffer(slot).set(values[column].clone())?;
        }
        Ok(())
    }
}

impl Cursor for InMemoryCursor {
    fn access(&self) -> &Row {
        &self.row
    }

    fn forward(&mut self) -> VtResult<bool> {
        if self.next >= self.end {
            return Ok(false);
        }
        self.load(self.next)?;
        self.next += 1;
        Ok(true)
    }

    fn close(&mut self) -> VtResult<()> {
        self.next = self.end;
        Ok(())
    }

    fn as_random_access(&mut self) -> Option<&mut dyn RandomAccessCursor> {
        Some(self)
    }
}

impl LookaheadCursor for InMemoryCursor {
    fn can_forward(&mut self) -> VtResult<bool> {
        Ok(self.next < self.end)
    }
}

impl RandomAccessCursor for InMemoryCursor {
    fn num_rows(&self) -> u64 {
        (self.end - self.start) as u64
    }

    fn move_to(&mut self, row: u64) -> VtResult<()> {
        let target = (self.start as u64).saturating_add(row);
        if target >= self.end as u64 {
            self.next = self.end;
            return Ok(());
        }
        let target = target as usize;
        self.load(target)?;
        self.next = target + 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::read_all;
    use crate::selection::{ColumnSelection, RowRangeSelection};

    fn table() -> InMemoryTable {
        InMemoryTable::from_rows(
            ColumnarSchema::of_kinds([DataKind::Int, DataKind::String]),
            vec![
                vec![Value::from(1), Value::from("a")],
                vec![Value::from(2), Value::from("b")],
                vec![Value::from(3), Value::from("c")],
            ],
        )
        .unwrap()
    }

    #[test]
    fn selection_is_pushed_into_the_cursor() {
        let selection = Selection::new(ColumnSelection::of([1]), RowRangeSelection::range(1, 3));
        let mut cursor = table().create_cursor(&selection).unwrap();
        assert_eq!(
            read_all(cursor.as_mut()).unwrap(),
            vec![
                vec![Value::Missing, Value::from("b")],
                vec![Value::Missing, Value::from("c")],
            ]
        );
    }

    #[test]
    fn random_access_is_relative_to_the_selected_range() {
        let selection = Selection::all().with_rows(RowRangeSelection::range(1, 3));
        let mut cursor = table().create_cursor(&selection).unwrap();
        let random = cursor.as_random_access().unwrap();
        assert_eq!(random.num_rows(), 2);
        random.move_to(1).unwrap();
        assert!(!random.can_forward().unwrap());
        assert_eq!(cursor.access().values(), vec![Value::from(3), Value::from("c")]);
        assert!(!cursor.forward().unwrap());
    }

    #[test]
    fn rejects_rows_that_do_not_fit() {
        let mut builder =
            InMemoryTableBuilder::new(ColumnarSchema::of_kinds([DataKind::Int]));
        let err = builder.push_row(vec![Value::from("x")]).unwrap_err();
        assert!(matches!(err, VtError::SchemaMismatch { .. }));
    }

    #[test]
    fn materialize_round_trips_through_the_writer() {
        let copy = InMemoryTable::materialize(&table()).unwrap();
        assert_eq!(copy.rows(), table().rows());
    }
}
