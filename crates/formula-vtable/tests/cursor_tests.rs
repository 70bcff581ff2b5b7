mod common;

use common::{table, Events, RecordingTable};
use formula_vtable::cursor::{
    read_all, AppendBranch, AppendedCursor, ConcatBranch, ConcatenatedCursor, SliceCursor,
};
use formula_vtable::{
    AccessRef, BufferedAccess, Cursor, DataKind, DelegatingAccess, ReadAccess, Row,
    RowAccessible, RowRangeSelection, Selection, Value, VtError,
};
use pretty_assertions::assert_eq;
use std::rc::Rc;

fn strings_and_ints() -> formula_vtable::InMemoryTable {
    table(
        &[DataKind::String, DataKind::Int],
        vec![
            vec![Value::from("foo"), Value::from(7)],
            vec![Value::from("bar"), Value::from(42)],
        ],
    )
}

#[test]
fn lookahead_keeps_one_row_instance() {
    let events = Events::default();
    let source = RecordingTable::new("t", strings_and_ints(), &events);
    let mut cursor = source.lookahead_cursor(&Selection::all()).unwrap();
    let view: *const Row = cursor.access();

    assert!(cursor.can_forward().unwrap());
    assert!(cursor.can_forward().unwrap());
    assert!(cursor.forward().unwrap());
    assert_eq!(
        cursor.access().values(),
        vec![Value::from("foo"), Value::from(7)]
    );
    assert!(cursor.can_forward().unwrap());
    assert_eq!(
        cursor.access().values(),
        vec![Value::from("foo"), Value::from(7)]
    );

    assert!(cursor.forward().unwrap());
    assert_eq!(
        cursor.access().values(),
        vec![Value::from("bar"), Value::from(42)]
    );
    assert!(!cursor.can_forward().unwrap());
    assert!(!cursor.forward().unwrap());
    assert!(std::ptr::eq(view, cursor.access()));
    cursor.close().unwrap();

    // Peeking never advances the backing cursor more than once per row.
    assert_eq!(
        events.take(),
        vec![
            "open t cols=* rows=*",
            "forward t",
            "forward t",
            "forward t",
            "close t",
        ]
    );
}

#[test]
fn delegating_access_follows_its_delegate() {
    let access = DelegatingAccess::new(DataKind::Int).unwrap();
    assert!(access.is_missing());
    assert_eq!(access.value(), Value::Missing);

    let buffer = BufferedAccess::shared(DataKind::Int);
    buffer.set(Value::from(5)).unwrap();
    access.set_delegate_access(buffer.clone() as AccessRef).unwrap();
    assert_eq!(access.value(), Value::from(5));

    buffer.set(Value::from(9)).unwrap();
    assert_eq!(access.value(), Value::from(9));
    buffer.set_missing();
    assert!(access.is_missing());

    let wrong_kind = BufferedAccess::shared(DataKind::String) as AccessRef;
    assert!(matches!(
        access.set_delegate_access(wrong_kind),
        Err(VtError::AccessKindMismatch { .. })
    ));

    access.clear_delegate();
    buffer.set(Value::from(1)).unwrap();
    assert!(access.is_missing());

    assert!(matches!(
        DelegatingAccess::new(DataKind::Void),
        Err(VtError::UnsupportedAccessKind(DataKind::Void))
    ));
}

#[test]
fn slice_cursor_skips_and_stops() {
    let source = common::longs(0..10);
    let inner = source.cursor().unwrap();
    let mut cursor = SliceCursor::new(inner, RowRangeSelection::range(3, 6));
    assert_eq!(
        read_all(&mut cursor).unwrap(),
        vec![
            vec![Value::from(3i64)],
            vec![Value::from(4i64)],
            vec![Value::from(5i64)],
        ]
    );
    cursor.close().unwrap();
}

#[test]
fn appended_cursor_pads_the_shorter_branch() {
    let events = Events::default();
    let long = RecordingTable::new("long", common::longs(0..3), &events);
    let short = RecordingTable::new(
        "short",
        table(&[DataKind::String], vec![vec![Value::from("x")]]),
        &events,
    );
    let schema = common::schema(&[DataKind::Long, DataKind::String]);

    let mut cursor = AppendedCursor::new(
        &schema,
        vec![
            AppendBranch::at_offset(long.cursor().unwrap(), 0),
            AppendBranch::at_offset(short.cursor().unwrap(), 1),
        ],
    )
    .unwrap();
    assert_eq!(
        read_all(&mut cursor).unwrap(),
        vec![
            vec![Value::from(0i64), Value::from("x")],
            vec![Value::from(1i64), Value::Missing],
            vec![Value::from(2i64), Value::Missing],
        ]
    );
    cursor.close().unwrap();

    // The exhausted branch is closed while the other keeps going.
    assert_eq!(
        events.lifecycle(),
        vec![
            "open long cols=* rows=*",
            "open short cols=* rows=*",
            "close short",
            "close long",
        ]
    );
}

#[test]
fn concatenated_cursor_closes_each_branch_before_the_next() {
    let events = Events::default();
    let first = RecordingTable::new("a", common::longs(0..2), &events);
    let second = Rc::new(RecordingTable::new("b", common::longs(10..11), &events));
    let schema = common::schema(&[DataKind::Long]);

    let first_cursor = first.cursor().unwrap();
    let first_accesses = first_cursor.access().accesses().iter().cloned().map(Some).collect();
    let deferred = second.clone();
    let mut cursor = ConcatenatedCursor::new(
        &schema,
        vec![
            ConcatBranch::Ready(first_cursor, first_accesses),
            ConcatBranch::Deferred(Box::new(move || {
                let cursor = deferred.cursor()?;
                let accesses = cursor.access().accesses().iter().cloned().map(Some).collect();
                Ok((cursor, accesses))
            })),
        ],
    )
    .unwrap();

    assert_eq!(
        read_all(&mut cursor).unwrap(),
        vec![
            vec![Value::from(0i64)],
            vec![Value::from(1i64)],
            vec![Value::from(10i64)],
        ]
    );
    cursor.close().unwrap();
    assert_eq!(
        events.take(),
        vec![
            "open a cols=* rows=*",
            "forward a",
            "forward a",
            "forward a",
            "close a",
            "open b cols=* rows=*",
            "forward b",
            "forward b",
            "close b",
        ]
    );
}

#[test]
fn unreached_ready_branches_are_closed_with_the_concatenation() {
    let events = Events::default();
    let first = RecordingTable::new("a", common::longs(0..2), &events);
    let second = RecordingTable::new("b", common::longs(0..2), &events);
    let schema = common::schema(&[DataKind::Long]);

    let branches = [&first, &second]
        .into_iter()
        .map(|t| {
            let cursor = t.cursor().unwrap();
            let accesses = cursor.access().accesses().iter().cloned().map(Some).collect();
            ConcatBranch::Ready(cursor, accesses)
        })
        .collect();
    let mut cursor = ConcatenatedCursor::new(&schema, branches).unwrap();
    assert!(cursor.forward().unwrap());
    cursor.close().unwrap();
    cursor.close().unwrap();

    assert_eq!(
        events.lifecycle(),
        vec![
            "open a cols=* rows=*",
            "open b cols=* rows=*",
            "close a",
            "close b",
        ]
    );
}
