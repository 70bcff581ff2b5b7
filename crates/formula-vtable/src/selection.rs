//! Column and row-range restrictions.
//!
//! Both halves of a [`Selection`] only ever narrow: retaining a column set intersects, retaining a
//! row range composes relative to the current range start and clamps to its end.

use std::fmt;

/// Either every column, or a sorted, duplicate-free set of column indices.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColumnSelection {
    #[default]
    All,
    Indices(Vec<usize>),
}

impl ColumnSelection {
    pub fn all() -> Self {
        Self::All
    }

    pub fn of(indices: impl IntoIterator<Item = usize>) -> Self {
        let mut indices: Vec<usize> = indices.into_iter().collect();
        indices.sort_unstable();
        indices.dedup();
        Self::Indices(indices)
    }

    pub fn none() -> Self {
        Self::Indices(Vec::new())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    pub fn is_selected(&self, column: usize) -> bool {
        match self {
            Self::All => true,
            Self::Indices(indices) => indices.binary_search(&column).is_ok(),
        }
    }

    /// Selected indices, given the width of the table the selection applies to.
    pub fn indices(&self, num_columns: usize) -> Vec<usize> {
        match self {
            Self::All => (0..num_columns).collect(),
            Self::Indices(indices) => indices
                .iter()
                .copied()
                .filter(|&idx| idx < num_columns)
                .collect(),
        }
    }

    /// Keep only the given columns (absolute indices) that are also currently selected.
    pub fn retain(&self, columns: &[usize]) -> Self {
        let retained = Self::of(columns.iter().copied());
        self.intersect(&retained)
    }

    pub fn intersect(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::All, other) => other.clone(),
            (this, Self::All) => this.clone(),
            (Self::Indices(a), Self::Indices(b)) => Self::Indices(
                a.iter()
                    .copied()
                    .filter(|idx| b.binary_search(idx).is_ok())
                    .collect(),
            ),
        }
    }

    /// Smallest selection containing both.
    pub fn union(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::Indices(a), Self::Indices(b)) => Self::of(a.iter().chain(b).copied()),
        }
    }
}

/// Either every row, or the half-open range `[from, to)`.
///
/// A range with `to <= from` is empty; it is a legal value and stays empty under [`retain`].
///
/// [`retain`]: RowRangeSelection::retain
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RowRangeSelection {
    #[default]
    All,
    Range { from: u64, to: u64 },
}

impl RowRangeSelection {
    pub fn all() -> Self {
        Self::All
    }

    pub fn range(from: u64, to: u64) -> Self {
        Self::Range { from, to }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    pub fn from_index(&self) -> u64 {
        match self {
            Self::All => 0,
            Self::Range { from, .. } => *from,
        }
    }

    /// Exclusive end, `u64::MAX` for "all".
    pub fn to_index(&self) -> u64 {
        match self {
            Self::All => u64::MAX,
            Self::Range { to, .. } => *to,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_index() <= self.from_index()
    }

    /// Number of selected rows of a table holding `num_rows` rows.
    pub fn num_selected(&self, num_rows: u64) -> u64 {
        let to = self.to_index().min(num_rows);
        to.saturating_sub(self.from_index())
    }

    /// Restrict to `[from, to)` interpreted relative to the start of the current range.
    pub fn retain(&self, from: u64, to: u64) -> Self {
        match self {
            Self::All => Self::Range { from, to },
            Self::Range {
                from: cur_from,
                to: cur_to,
            } => {
                if self.is_empty() {
                    return *self;
                }
                Self::Range {
                    from: cur_from.saturating_add(from),
                    to: cur_from.saturating_add(to).min(*cur_to),
                }
            }
        }
    }

    /// Compose with another range selection interpreted relative to `self`.
    pub fn retain_range(&self, other: &Self) -> Self {
        match other {
            Self::All => *self,
            Self::Range { from, to } => self.retain(*from, *to),
        }
    }
}

/// A column subset together with a row range.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Selection {
    columns: ColumnSelection,
    rows: RowRangeSelection,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(columns: ColumnSelection, rows: RowRangeSelection) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &ColumnSelection {
        &self.columns
    }

    pub fn rows(&self) -> RowRangeSelection {
        self.rows
    }

    pub fn is_all(&self) -> bool {
        self.columns.is_all() && self.rows.is_all()
    }

    pub fn retain_columns(&self, columns: &[usize]) -> Self {
        Self {
            columns: self.columns.retain(columns),
            rows: self.rows,
        }
    }

    pub fn retain_rows(&self, from: u64, to: u64) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.retain(from, to),
        }
    }

    /// Apply `other` on top of `self`: columns intersect, rows compose relatively.
    pub fn retain(&self, other: &Selection) -> Self {
        Self {
            columns: self.columns.intersect(&other.columns),
            rows: self.rows.retain_range(&other.rows),
        }
    }

    pub fn with_columns(&self, columns: ColumnSelection) -> Self {
        Self {
            columns,
            rows: self.rows,
        }
    }

    pub fn with_rows(&self, rows: RowRangeSelection) -> Self {
        Self {
            columns: self.columns.clone(),
            rows,
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.columns {
            ColumnSelection::All => f.write_str("cols=*")?,
            ColumnSelection::Indices(indices) => write!(f, "cols={indices:?}")?,
        }
        match self.rows {
            RowRangeSelection::All => f.write_str(" rows=*"),
            RowRangeSelection::Range { from, to } => write!(f, " rows=[{from},{to})"),
        }
    }
}
