//! Static field metadata for `Model` types.

use crate::schema::Column;
use crate::types::SqlType;

/// Metadata about a model field/column.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Rust field name, used as the attribute key
    pub name: &'static str,
    /// Database column name (may differ from field name)
    pub column_name: &'static str,
    /// SQL type for this field
    pub sql_type: SqlType,
    /// Whether this field is nullable
    pub nullable: bool,
    /// Whether this is a primary key
    pub primary_key: bool,
    /// Foreign key reference (table.column)
    pub foreign_key: Option<&'static str>,
}

impl FieldInfo {
    /// Create a new field info with minimal required data.
    pub const fn new(name: &'static str, column_name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            column_name,
            sql_type,
            nullable: false,
            primary_key: false,
            foreign_key: None,
        }
    }

    /// Set the database column name.
    pub const fn column(mut self, name: &'static str) -> Self {
        self.column_name = name;
        self
    }

    /// Set nullable flag.
    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Set primary key flag.
    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Set foreign key reference.
    pub const fn foreign_key(mut self, reference: &'static str) -> Self {
        self.foreign_key = Some(reference);
        self
    }

    /// Build the table column described by this field.
    pub fn to_column(&self) -> Column {
        let mut column = Column::new(self.column_name, self.sql_type.clone())
            .nullable(self.nullable)
            .primary_key(self.primary_key);
        if let Some(fk) = self.foreign_key {
            column = column.references(fk);
        }
        column
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_column() {
        const FIELD: FieldInfo = FieldInfo::new("user_id", "uid", SqlType::Integer)
            .nullable(true)
            .foreign_key("users.id");
        let col = FIELD.to_column();
        assert_eq!(col.name(), "uid");
        assert!(col.is_nullable());
        assert_eq!(col.foreign_key_target(), Some(("users", "id")));
    }

    #[test]
    fn primary_key_is_not_nullable() {
        let col = FieldInfo::new("id", "id", SqlType::BigInt)
            .nullable(true)
            .primary_key(true)
            .to_column();
        assert!(col.is_primary_key());
        assert!(!col.is_nullable());
    }
}
