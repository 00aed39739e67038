//! Backend-agnostic result rows.

use crate::{ParamValue, RepoError, RepoResult};

/// Wall-clock timestamp type used for creation/update stamps (UTC).
pub type Timestamp = chrono::NaiveDateTime;

/// Storage format for [`Timestamp`] values.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Errors raised while reading typed values out of a [`Row`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("missing column `{0}` in row")]
    MissingColumn(String),
    #[error("column `{column}` cannot be read as {expected}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
    },
}

/// One fetched row: column names in select order, each with its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: Vec<(String, ParamValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            values: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, column: impl Into<String>, value: ParamValue) {
        self.values.push((column.into(), value));
    }

    pub fn get(&self, column: &str) -> Option<&ParamValue> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    /// Borrow a text column without copying it.
    pub fn get_str(&self, column: &str) -> Option<&str> {
        match self.get(column) {
            Some(ParamValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Read a column as `T`, failing on a missing column or incompatible value.
    pub fn try_get<T: FromParam>(&self, column: &str) -> RepoResult<T> {
        let value = self
            .get(column)
            .ok_or_else(|| RepoError::mapping(MappingError::MissingColumn(column.to_string())))?;
        T::from_param(value).ok_or_else(|| {
            RepoError::mapping(MappingError::TypeMismatch {
                column: column.to_string(),
                expected: T::EXPECTED,
            })
        })
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keep only the named columns, in the order given. Missing columns are an error.
    pub fn project(&self, columns: &[&str]) -> RepoResult<Row> {
        let mut out = Row::with_capacity(columns.len());
        for col in columns {
            let value = self
                .get(col)
                .cloned()
                .ok_or_else(|| RepoError::mapping(MappingError::MissingColumn(col.to_string())))?;
            out.push(*col, value);
        }
        Ok(out)
    }
}

impl FromIterator<(String, ParamValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Conversion from a stored [`ParamValue`] into a Rust value.
/// Backends store booleans as integers and timestamps as text, so both are accepted.
pub trait FromParam: Sized {
    /// Human-readable name used in mapping errors.
    const EXPECTED: &'static str;
    fn from_param(value: &ParamValue) -> Option<Self>;
}

impl FromParam for String {
    const EXPECTED: &'static str = "text";
    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromParam for i64 {
    const EXPECTED: &'static str = "integer";
    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::I64(i) => Some(*i),
            ParamValue::I32(i) => Some(i64::from(*i)),
            _ => None,
        }
    }
}

impl FromParam for i32 {
    const EXPECTED: &'static str = "32-bit integer";
    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::I32(i) => Some(*i),
            ParamValue::I64(i) => i32::try_from(*i).ok(),
            _ => None,
        }
    }
}

impl FromParam for f64 {
    const EXPECTED: &'static str = "real";
    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::F64(f) => Some(*f),
            _ => None,
        }
    }
}

impl FromParam for bool {
    const EXPECTED: &'static str = "boolean";
    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Bool(b) => Some(*b),
            ParamValue::I64(i) => Some(*i != 0),
            ParamValue::I32(i) => Some(*i != 0),
            _ => None,
        }
    }
}

impl FromParam for Timestamp {
    const EXPECTED: &'static str = "timestamp";
    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::String(s) => chrono::NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok(),
            _ => None,
        }
    }
}

impl<T: FromParam> FromParam for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;
    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Null => Some(None),
            other => T::from_param(other).map(Some),
        }
    }
}

/// Render a timestamp in the storage format.
pub fn format_timestamp(at: &Timestamp) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

impl From<Timestamp> for ParamValue {
    fn from(at: Timestamp) -> Self {
        ParamValue::String(format_timestamp(&at))
    }
}
