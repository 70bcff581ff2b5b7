use std::collections::BTreeMap;
use std::fmt;

/// The physical kind of values stored in a column.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// A column that carries no data; every value is missing.
    Void,
    Boolean,
    Byte,
    Int,
    Long,
    Float,
    Double,
    String,
    Binary,
    /// Days since the epoch.
    LocalDate,
    /// Nanoseconds since midnight.
    LocalTime,
    /// Microseconds since the epoch, without zone.
    LocalDateTime,
    /// Nanoseconds.
    Duration,
    List(Box<DataKind>),
    Struct(Vec<DataKind>),
}

impl DataKind {
    pub fn list(element: DataKind) -> Self {
        Self::List(Box::new(element))
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("VOID"),
            Self::Boolean => f.write_str("BOOLEAN"),
            Self::Byte => f.write_str("BYTE"),
            Self::Int => f.write_str("INT"),
            Self::Long => f.write_str("LONG"),
            Self::Float => f.write_str("FLOAT"),
            Self::Double => f.write_str("DOUBLE"),
            Self::String => f.write_str("STRING"),
            Self::Binary => f.write_str("BINARY"),
            Self::LocalDate => f.write_str("LOCAL_DATE"),
            Self::LocalTime => f.write_str("LOCAL_TIME"),
            Self::LocalDateTime => f.write_str("LOCAL_DATE_TIME"),
            Self::Duration => f.write_str("DURATION"),
            Self::List(element) => write!(f, "LIST<{element}>"),
            Self::Struct(fields) => {
                f.write_str("STRUCT<")?;
                for (idx, field) in fields.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str(">")
            }
        }
    }
}

/// Per-column annotations (logical type, dictionary encoding hints, ...).
///
/// The engine never interprets traits; it only carries them from sources to outputs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DataTraits {
    entries: BTreeMap<String, String>,
}

impl DataTraits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColumnSchema {
    pub kind: DataKind,
    pub traits: DataTraits,
}

impl ColumnSchema {
    pub fn new(kind: DataKind) -> Self {
        Self {
            kind,
            traits: DataTraits::default(),
        }
    }

    pub fn with_traits(kind: DataKind, traits: DataTraits) -> Self {
        Self { kind, traits }
    }
}

impl From<DataKind> for ColumnSchema {
    fn from(kind: DataKind) -> Self {
        Self::new(kind)
    }
}

/// Ordered list of column kinds and traits. Columns are addressed by index only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ColumnarSchema {
    columns: Vec<ColumnSchema>,
}

impl ColumnarSchema {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Self { columns }
    }

    pub fn of_kinds(kinds: impl IntoIterator<Item = DataKind>) -> Self {
        Self {
            columns: kinds.into_iter().map(ColumnSchema::new).collect(),
        }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, idx: usize) -> Option<&ColumnSchema> {
        self.columns.get(idx)
    }

    pub fn kind(&self, idx: usize) -> Option<&DataKind> {
        self.columns.get(idx).map(|c| &c.kind)
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn kinds(&self) -> impl Iterator<Item = &DataKind> + '_ {
        self.columns.iter().map(|c| &c.kind)
    }

    /// Schema made of the given columns of `self`, in the given order.
    ///
    /// Returns `None` if any index is out of range.
    pub fn select(&self, indices: &[usize]) -> Option<Self> {
        let columns = indices
            .iter()
            .map(|&idx| self.columns.get(idx).cloned())
            .collect::<Option<Vec<_>>>()?;
        Some(Self { columns })
    }

    /// Juxtaposition of several schemas.
    pub fn append<'a>(schemas: impl IntoIterator<Item = &'a ColumnarSchema>) -> Self {
        Self {
            columns: schemas
                .into_iter()
                .flat_map(|s| s.columns.iter().cloned())
                .collect(),
        }
    }

    /// Two schemas can be concatenated when they have the same width and column kinds.
    /// Traits are allowed to differ; the first schema's traits win.
    pub fn is_kind_compatible(&self, other: &Self) -> bool {
        self.columns.len() == other.columns.len() && self.kinds().eq(other.kinds())
    }
}

impl FromIterator<ColumnSchema> for ColumnarSchema {
    fn from_iter<T: IntoIterator<Item = ColumnSchema>>(iter: T) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for ColumnarSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, column) in self.columns.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", column.kind)?;
        }
        f.write_str("]")
    }
}
