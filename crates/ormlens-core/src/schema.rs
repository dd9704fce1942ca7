//! Table, column and selectable objects.
//!
//! Schema objects are shared through `Arc` handles. Identity matters: the
//! inspection API reports *which* column or table backs a mapping, and
//! callers compare those with [`Arc::ptr_eq`] (or the `ptr_eq` helpers on
//! [`Selectable`]).

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{Error, Result};
use crate::types::SqlType;

/// Shared handle to a column.
pub type ColumnRef = Arc<Column>;

/// Shared handle to a table.
pub type TableRef = Arc<Table>;

/// A column definition, owned by a table or proxied by an alias.
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    table: String,
    sql_type: SqlType,
    primary_key: bool,
    nullable: bool,
    foreign_key: Option<String>,
    proxied: Option<ColumnRef>,
}

impl Column {
    /// Create a detached column; it takes its table name when added to a table.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            table: String::new(),
            sql_type,
            primary_key: false,
            nullable: true,
            foreign_key: None,
            proxied: None,
        }
    }

    /// Shorthand for an integer column.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, SqlType::Integer)
    }

    /// Set primary key flag. Primary key columns are not nullable.
    pub fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        if value {
            self.nullable = false;
        }
        self
    }

    /// Set nullable flag.
    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Set foreign key reference (`"table.column"`).
    pub fn references(mut self, target: impl Into<String>) -> Self {
        self.foreign_key = Some(target.into());
        self
    }

    /// Column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the table or alias this column belongs to.
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Column type.
    pub fn sql_type(&self) -> &SqlType {
        &self.sql_type
    }

    /// Whether this column is part of the primary key.
    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    /// Whether NULL is allowed.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Foreign key reference, if any.
    pub fn foreign_key(&self) -> Option<&str> {
        self.foreign_key.as_deref()
    }

    /// Split the foreign key into (table, column).
    pub fn foreign_key_target(&self) -> Option<(&str, &str)> {
        self.foreign_key.as_deref().and_then(|fk| fk.split_once('.'))
    }

    /// The table column an alias column stands in for.
    pub fn proxied(&self) -> Option<&ColumnRef> {
        self.proxied.as_ref()
    }

    /// Follow alias proxies down to the table column.
    pub fn base_column(self: &Arc<Self>) -> ColumnRef {
        let mut current = Arc::clone(self);
        while let Some(inner) = current.proxied.clone() {
            current = inner;
        }
        current
    }

    /// Whether this column is `other`, or an alias proxy of it.
    pub fn shares_lineage(self: &Arc<Self>, other: &ColumnRef) -> bool {
        Arc::ptr_eq(&self.base_column(), &other.base_column())
    }

    /// Qualified `table.name` form.
    pub fn qualified_name(&self) -> String {
        if self.table.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.table, self.name)
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified_name())
    }
}

/// A named table with an ordered column list.
///
/// Columns may be appended after creation (single-table inheritance adds the
/// subclass columns to the parent table), so the list sits behind a lock.
#[derive(Debug)]
pub struct Table {
    name: String,
    columns: RwLock<Vec<ColumnRef>>,
}

impl Table {
    /// Create a table owning `columns`.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> TableRef {
        let name = name.into();
        let columns = columns
            .into_iter()
            .map(|mut c| {
                c.table.clone_from(&name);
                Arc::new(c)
            })
            .collect();
        Arc::new(Self {
            name,
            columns: RwLock::new(columns),
        })
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All columns in declaration order.
    pub fn columns(&self) -> Vec<ColumnRef> {
        self.columns
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Look up a column by name.
    pub fn c(&self, name: &str) -> Option<ColumnRef> {
        self.columns
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Look up a column by name, failing if it does not exist.
    pub fn column(&self, name: &str) -> Result<ColumnRef> {
        self.c(name).ok_or_else(|| {
            Error::invalid_request(format!("table '{}' has no column '{}'", self.name, name))
        })
    }

    /// Primary key columns in declaration order.
    pub fn primary_key(&self) -> Vec<ColumnRef> {
        self.columns()
            .into_iter()
            .filter(|c| c.primary_key)
            .collect()
    }

    /// Append a column, returning its shared handle.
    pub fn append_column(&self, mut column: Column) -> Result<ColumnRef> {
        let mut columns = self.columns.write().unwrap_or_else(|e| e.into_inner());
        if columns.iter().any(|c| c.name == column.name) {
            return Err(Error::invalid_request(format!(
                "table '{}' already has a column '{}'",
                self.name, column.name
            )));
        }
        column.table.clone_from(&self.name);
        let column = Arc::new(column);
        columns.push(Arc::clone(&column));
        Ok(column)
    }

    /// Pairs of (local foreign-key column, referenced column name) pointing at `other`.
    pub fn foreign_keys_to(&self, other: &str) -> Vec<(ColumnRef, String)> {
        self.columns()
            .into_iter()
            .filter_map(|c| {
                let (table, column) = c.foreign_key_target()?;
                (table == other).then(|| (Arc::clone(&c), column.to_string()))
            })
            .collect()
    }

    /// Names of the tables this table references through foreign keys.
    pub fn referenced_tables(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for column in self.columns() {
            if let Some((table, _)) = column.foreign_key_target() {
                if table != self.name && !out.iter().any(|t| t == table) {
                    out.push(table.to_string());
                }
            }
        }
        out
    }
}

/// A collection of tables by name.
#[derive(Debug, Default)]
pub struct MetaData {
    tables: Mutex<Vec<TableRef>>,
}

impl MetaData {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table and register it.
    pub fn table(&self, name: impl Into<String>, columns: Vec<Column>) -> Result<TableRef> {
        let table = Table::new(name, columns);
        self.add(Arc::clone(&table))?;
        Ok(table)
    }

    /// Register an existing table.
    pub fn add(&self, table: TableRef) -> Result<()> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        if tables.iter().any(|t| t.name == table.name) {
            return Err(Error::invalid_request(format!(
                "table '{}' is already defined for this MetaData",
                table.name
            )));
        }
        tables.push(table);
        Ok(())
    }

    /// Look up a table by name.
    pub fn get(&self, name: &str) -> Option<TableRef> {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    /// All tables in registration order.
    pub fn tables(&self) -> Vec<TableRef> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Anything rows can be selected from.
#[derive(Debug, Clone)]
pub enum Selectable {
    Table(TableRef),
    Alias(Arc<Alias>),
    Join(Arc<Join>),
}

impl Selectable {
    /// Display name of the selectable.
    pub fn name(&self) -> String {
        match self {
            Selectable::Table(t) => t.name().to_string(),
            Selectable::Alias(a) => a.name().to_string(),
            Selectable::Join(j) => format!(
                "{} {} {}",
                j.left.name(),
                if j.outer { "LEFT OUTER JOIN" } else { "JOIN" },
                j.right.name()
            ),
        }
    }

    /// Columns exported by the selectable.
    pub fn columns(&self) -> Vec<ColumnRef> {
        match self {
            Selectable::Table(t) => t.columns(),
            Selectable::Alias(a) => a.columns().to_vec(),
            Selectable::Join(j) => {
                let mut cols = j.left.columns();
                cols.extend(j.right.columns());
                cols
            }
        }
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Selectable) -> bool {
        match (self, other) {
            (Selectable::Table(a), Selectable::Table(b)) => Arc::ptr_eq(a, b),
            (Selectable::Alias(a), Selectable::Alias(b)) => Arc::ptr_eq(a, b),
            (Selectable::Join(a), Selectable::Join(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Whether this selectable is exactly `table`.
    pub fn is_table(&self, table: &TableRef) -> bool {
        matches!(self, Selectable::Table(t) if Arc::ptr_eq(t, table))
    }

    /// The column of this selectable that corresponds to `column`.
    pub fn corresponding_column(&self, column: &ColumnRef) -> Option<ColumnRef> {
        self.columns()
            .into_iter()
            .find(|c| Arc::ptr_eq(c, column) || c.shares_lineage(column))
    }
}

impl From<TableRef> for Selectable {
    fn from(table: TableRef) -> Self {
        Selectable::Table(table)
    }
}

/// An aliased selectable whose columns proxy the element's columns.
#[derive(Debug)]
pub struct Alias {
    name: String,
    element: Selectable,
    columns: Vec<ColumnRef>,
}

impl Alias {
    /// Alias `element` under `name`.
    pub fn new(element: Selectable, name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let columns = element
            .columns()
            .into_iter()
            .map(|c| {
                let mut proxy = (*c).clone();
                proxy.table.clone_from(&name);
                proxy.proxied = Some(c);
                Arc::new(proxy)
            })
            .collect();
        Arc::new(Self {
            name,
            element,
            columns,
        })
    }

    /// Alias `element` under a generated `<name>_<n>` name.
    pub fn anonymous(element: Selectable) -> Arc<Self> {
        static COUNTER: AtomicUsize = AtomicUsize::new(1);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}_{}", element.name().replace(' ', "_"), n);
        Self::new(element, name)
    }

    /// Alias name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The aliased selectable.
    pub fn element(&self) -> &Selectable {
        &self.element
    }

    /// Proxy columns.
    pub fn columns(&self) -> &[ColumnRef] {
        &self.columns
    }
}

/// A join of two selectables.
#[derive(Debug)]
pub struct Join {
    pub left: Selectable,
    pub right: Selectable,
    pub outer: bool,
}

impl Join {
    /// Create a join.
    pub fn new(left: Selectable, right: Selectable, outer: bool) -> Arc<Self> {
        Arc::new(Self { left, right, outer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableRef {
        Table::new(
            "users",
            vec![
                Column::integer("id").primary_key(true),
                Column::new("name", SqlType::VarChar(30)).nullable(false),
            ],
        )
    }

    #[test]
    fn table_owns_columns() {
        let t = users();
        let id = t.c("id").unwrap();
        assert_eq!(id.table_name(), "users");
        assert_eq!(id.to_string(), "users.id");
        assert!(!id.is_nullable());
        assert_eq!(t.primary_key().len(), 1);
        assert!(Arc::ptr_eq(&t.primary_key()[0], &id));
        assert!(t.column("missing").is_err());
    }

    #[test]
    fn append_rejects_duplicates() {
        let t = users();
        t.append_column(Column::integer("age")).unwrap();
        assert!(t.append_column(Column::integer("age")).is_err());
        assert_eq!(t.columns().len(), 3);
    }

    #[test]
    fn foreign_keys() {
        let addresses = Table::new(
            "addresses",
            vec![
                Column::integer("id").primary_key(true),
                Column::integer("user_id").references("users.id"),
            ],
        );
        let fks = addresses.foreign_keys_to("users");
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].0.name(), "user_id");
        assert_eq!(fks[0].1, "id");
        assert_eq!(addresses.referenced_tables(), vec!["users".to_string()]);
    }

    #[test]
    fn alias_proxies_columns() {
        let t = users();
        let alias = Alias::new(Selectable::Table(Arc::clone(&t)), "users_1");
        let aliased = Selectable::Alias(Arc::clone(&alias));
        let id = t.c("id").unwrap();
        let proxy = aliased.corresponding_column(&id).unwrap();
        assert_eq!(proxy.table_name(), "users_1");
        assert!(Arc::ptr_eq(&proxy.base_column(), &id));
        assert!(!aliased.ptr_eq(&Selectable::Table(t)));
    }

    #[test]
    fn metadata_rejects_duplicate_tables() {
        let md = MetaData::new();
        md.table("users", vec![Column::integer("id").primary_key(true)])
            .unwrap();
        assert!(md.table("users", vec![]).is_err());
        assert!(md.get("users").is_some());
    }
}
