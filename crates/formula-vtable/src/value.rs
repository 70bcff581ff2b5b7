use crate::schema::DataKind;
use ordered_float::OrderedFloat;
use std::fmt;
use std::sync::Arc;

/// An owned cell value.
///
/// Floating point values are wrapped in [`OrderedFloat`] so values can be hashed and compared
/// (aggregators key on them).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Missing,
    Boolean(bool),
    Byte(i8),
    Int(i32),
    Long(i64),
    Float(OrderedFloat<f32>),
    Double(OrderedFloat<f64>),
    String(Arc<str>),
    Binary(Arc<[u8]>),
    LocalDate(i64),
    LocalTime(i64),
    LocalDateTime(i64),
    Duration(i64),
    List(Arc<[Value]>),
    Struct(Arc<[Value]>),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Whether this value can be stored in an access of `kind`. Missing fits every kind.
    pub fn fits(&self, kind: &DataKind) -> bool {
        match (self, kind) {
            (Self::Missing, _) => true,
            (Self::Boolean(_), DataKind::Boolean)
            | (Self::Byte(_), DataKind::Byte)
            | (Self::Int(_), DataKind::Int)
            | (Self::Long(_), DataKind::Long)
            | (Self::Float(_), DataKind::Float)
            | (Self::Double(_), DataKind::Double)
            | (Self::String(_), DataKind::String)
            | (Self::Binary(_), DataKind::Binary)
            | (Self::LocalDate(_), DataKind::LocalDate)
            | (Self::LocalTime(_), DataKind::LocalTime)
            | (Self::LocalDateTime(_), DataKind::LocalDateTime)
            | (Self::Duration(_), DataKind::Duration) => true,
            (Self::List(items), DataKind::List(element)) => items.iter().all(|v| v.fits(element)),
            (Self::Struct(fields), DataKind::Struct(kinds)) => {
                fields.len() == kinds.len() && fields.iter().zip(kinds).all(|(v, k)| v.fits(k))
            }
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Integral value of any integer-like kind.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v)
            | Self::LocalDate(v)
            | Self::LocalTime(v)
            | Self::LocalDateTime(v)
            | Self::Duration(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value of any numeric kind, widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(f64::from(v.0)),
            Self::Double(v) => Some(v.0),
            Self::Byte(v) => Some(f64::from(*v)),
            Self::Int(v) => Some(f64::from(*v)),
            Self::Long(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Float(OrderedFloat(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(OrderedFloat(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(Arc::from(value))
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(Arc::from(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Missing)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("?"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Byte(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Binary(v) => write!(f, "<{} bytes>", v.len()),
            Self::LocalDate(v) => write!(f, "date({v})"),
            Self::LocalTime(v) => write!(f, "time({v})"),
            Self::LocalDateTime(v) => write!(f, "datetime({v})"),
            Self::Duration(v) => write!(f, "duration({v})"),
            Self::List(items) | Self::Struct(items) => {
                let (open, close) = if matches!(self, Self::List(_)) {
                    ("[", "]")
                } else {
                    ("{", "}")
                };
                f.write_str(open)?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(close)
            }
        }
    }
}
