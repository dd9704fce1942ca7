//! Storage row representation.

use crate::value::Value;

/// A single row exchanged with backing storage.
///
/// Columns keep insertion order; names are unique within a row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a row from parallel column-name and value vectors.
    pub fn from_parts(column_names: Vec<String>, values: Vec<Value>) -> Self {
        let mut row = Self::new();
        for (name, value) in column_names.into_iter().zip(values) {
            row.set(name, value);
        }
        row
    }

    /// Get the number of columns in this row.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if this row is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Check if a column exists by name.
    pub fn contains_column(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Set a column value, replacing any existing value for that column.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    /// Overlay every column of `other` onto this row.
    pub fn merge(&mut self, other: &Row) {
        for (name, value) in other.iter() {
            self.set(name, value.clone());
        }
    }

    /// Iterate over (column name, value) pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.set(k, v.into());
        }
        row
    }
}
