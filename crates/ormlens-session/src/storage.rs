//! Row storage backing session loads and flushes.

use std::collections::HashMap;
use std::sync::Mutex;

use ormlens_core::{Error, Result, Row, Table, Value};

/// A row store addressed by table.
pub trait Storage: Send + Sync {
    /// Insert a row and return it as stored, generated values included.
    fn insert(&self, table: &Table, row: Row) -> Result<Row>;

    /// Update the rows matching `key` and return how many matched.
    fn update(&self, table: &Table, key: &Row, values: Row) -> Result<usize>;

    /// Delete the rows matching `key` and return how many were removed.
    fn delete(&self, table: &Table, key: &Row) -> Result<usize>;

    /// The row matching `key`, if any.
    fn fetch(&self, table: &Table, key: &Row) -> Result<Option<Row>>;

    /// All rows whose columns equal `criteria`, in insertion order.
    fn select_by(&self, table: &Table, criteria: &Row) -> Result<Vec<Row>>;
}

#[derive(Default)]
struct MemoryTable {
    rows: Vec<Row>,
    last_id: i64,
}

/// In-process storage.
///
/// A single integer primary-key column left unset on insert receives the next
/// autoincrement value. Duplicate primary keys are rejected.
#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<HashMap<String, MemoryTable>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows stored for `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    /// Remove rows matching `criteria` behind the session's back.
    pub fn delete_where(&self, table: &str, criteria: &Row) -> usize {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let Some(t) = tables.get_mut(table) else {
            return 0;
        };
        let before = t.rows.len();
        t.rows.retain(|row| !matches(row, criteria));
        before - t.rows.len()
    }
}

/// Integer widths compare by value and doubles by bit pattern, as identity
/// keys do; everything else compares exactly.
fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Value::Double(x), Value::Double(y)) = (a, b) {
        return x.to_bits() == y.to_bits();
    }
    match (integer(a), integer(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Int(v) => Some(i64::from(*v)),
        Value::BigInt(v) => Some(*v),
        _ => None,
    }
}

fn matches(row: &Row, criteria: &Row) -> bool {
    criteria.iter().all(|(name, expected)| {
        row.get_by_name(name)
            .is_some_and(|v| !v.is_null() && values_equal(v, expected))
    })
}

impl Storage for MemoryStorage {
    fn insert(&self, table: &Table, row: Row) -> Result<Row> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let data = tables.entry(table.name().to_string()).or_default();

        let mut stored = Row::new();
        for column in table.columns() {
            let value = row
                .get_by_name(column.name())
                .cloned()
                .unwrap_or(Value::Null);
            stored.set(column.name(), value);
        }

        let pk = table.primary_key();
        if let [only] = pk.as_slice() {
            if only.sql_type().is_integer() {
                match stored.get_by_name(only.name()).and_then(Value::as_i64) {
                    Some(id) => data.last_id = data.last_id.max(id),
                    None => {
                        data.last_id = data.last_id.checked_add(1).ok_or_else(|| {
                            Error::Storage(format!("autoincrement exhausted for {}", table.name()))
                        })?;
                        stored.set(only.name(), Value::BigInt(data.last_id));
                    }
                }
            }
        }

        let key: Row = pk
            .iter()
            .map(|c| {
                let v = stored.get_by_name(c.name()).cloned().unwrap_or(Value::Null);
                (c.name().to_string(), v)
            })
            .collect();
        if key.iter().any(|(_, v)| v.is_null()) {
            return Err(Error::Storage(format!(
                "NOT NULL constraint failed: primary key of {}",
                table.name()
            )));
        }
        if data.rows.iter().any(|r| matches(r, &key)) {
            let cols: Vec<String> = pk.iter().map(|c| c.qualified_name()).collect();
            return Err(Error::Storage(format!(
                "UNIQUE constraint failed: {}",
                cols.join(", ")
            )));
        }
        tracing::trace!(table = %table.name(), "memory insert");
        data.rows.push(stored.clone());
        Ok(stored)
    }

    fn update(&self, table: &Table, key: &Row, values: Row) -> Result<usize> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let Some(data) = tables.get_mut(table.name()) else {
            return Ok(0);
        };
        let mut count = 0;
        for row in data.rows.iter_mut().filter(|r| matches(r, key)) {
            for (name, value) in values.iter() {
                row.set(name, value.clone());
            }
            count += 1;
        }
        Ok(count)
    }

    fn delete(&self, table: &Table, key: &Row) -> Result<usize> {
        Ok(self.delete_where(table.name(), key))
    }

    fn fetch(&self, table: &Table, key: &Row) -> Result<Option<Row>> {
        Ok(self.select_by(table, key)?.into_iter().next())
    }

    fn select_by(&self, table: &Table, criteria: &Row) -> Result<Vec<Row>> {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .get(table.name())
            .map(|t| t.rows.iter().filter(|r| matches(r, criteria)).cloned().collect())
            .unwrap_or_default())
    }
}
