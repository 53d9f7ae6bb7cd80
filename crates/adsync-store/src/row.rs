//! Sparse, ordered rows and JSON flattening.

use std::fmt;

use indexmap::IndexMap;
use serde_json::{Map, Number, Value};

/// A single cell value.
///
/// CSV round-trips everything through text, so two scalars are considered
/// equivalent when they render to the same string.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
}

impl Scalar {
    /// `Null` and the empty string carry no value and never overwrite a
    /// stored one.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(text) => text.is_empty(),
            Self::Bool(_) | Self::Number(_) => false,
        }
    }

    /// Converts a JSON scalar. Arrays and objects have no cell representation.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<f64> for Scalar {
    /// Non-finite values have no JSON number form and become `Null`.
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(Self::Null, Self::Number)
    }
}

/// An ordered mapping of column name to value. Rows of one dataset need not
/// share key sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(IndexMap<String, Scalar>);

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the top-level scalar fields of `object`; nested objects and
    /// arrays are skipped. See [`flatten_json`] to keep nested values.
    #[must_use]
    pub fn from_json_object(object: &Map<String, Value>) -> Self {
        object
            .iter()
            .filter_map(|(key, value)| Scalar::from_json(value).map(|v| (key.clone(), v)))
            .collect()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Scalar>) {
        self.0.insert(column.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.0.get(column)
    }

    /// Removes `column`, preserving the order of the remaining columns.
    pub fn remove(&mut self, column: &str) -> Option<Scalar> {
        self.0.shift_remove(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders `column` as it is written to disk; missing columns render empty.
    #[must_use]
    pub fn render(&self, column: &str) -> String {
        self.0.get(column).map(ToString::to_string).unwrap_or_default()
    }

    /// The stringified values at `key_fields`, used as the row identity.
    #[must_use]
    pub fn key_tuple<S: AsRef<str>>(&self, key_fields: &[S]) -> Vec<String> {
        key_fields.iter().map(|k| self.render(k.as_ref())).collect()
    }

    /// Drops columns whose value is empty.
    #[must_use]
    pub fn without_empty(mut self) -> Self {
        self.0.retain(|_, value| !value.is_empty());
        self
    }

    /// Overwrites stored values with the non-empty values of `incoming`.
    /// Columns new to this row are appended in `incoming`'s order.
    pub fn merge_non_empty(&mut self, incoming: &Row) {
        for (column, value) in &incoming.0 {
            if !value.is_empty() {
                self.0.insert(column.clone(), value.clone());
            }
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Row
where
    K: Into<String>,
    V: Into<Scalar>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Flattens a JSON object into a [`Row`].
///
/// Nested objects contribute `parent<separator>child` columns, arrays are
/// skipped, and scalars are kept. A non-object value yields an empty row.
#[must_use]
pub fn flatten_json(value: &Value, separator: &str) -> Row {
    let mut row = Row::new();
    if let Value::Object(object) = value {
        flatten_into(&mut row, None, object, separator);
    }
    row
}

fn flatten_into(row: &mut Row, prefix: Option<&str>, object: &Map<String, Value>, separator: &str) {
    for (key, value) in object {
        let column = match prefix {
            Some(prefix) => format!("{prefix}{separator}{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) => flatten_into(row, Some(&column), inner, separator),
            Value::Array(_) => {}
            scalar => {
                if let Some(scalar) = Scalar::from_json(scalar) {
                    row.insert(column, scalar);
                }
            }
        }
    }
}
