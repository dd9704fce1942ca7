//! Model trait for statically-described mapped types.
//!
//! A `Model` carries its table layout as constants so it can be mapped
//! without hand-building a `Table`. Instances of the model are converted to
//! attribute values through `to_row`.

use crate::field::FieldInfo;
use crate::relationship::RelationshipInfo;
use crate::schema::{Table, TableRef};
use crate::value::Value;

/// Trait for types that can be mapped to database tables.
///
/// # Example
///
/// ```
/// use ormlens_core::{FieldInfo, Model, SqlType, Value};
///
/// struct Hero {
///     id: Option<i64>,
///     name: String,
/// }
///
/// impl Model for Hero {
///     const TABLE_NAME: &'static str = "heroes";
///     const PRIMARY_KEY: &'static [&'static str] = &["id"];
///
///     fn fields() -> &'static [FieldInfo] {
///         const FIELDS: &[FieldInfo] = &[
///             FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
///             FieldInfo::new("name", "name", SqlType::Text),
///         ];
///         FIELDS
///     }
///
///     fn to_row(&self) -> Vec<(&'static str, Value)> {
///         vec![("id", self.id.into()), ("name", self.name.as_str().into())]
///     }
/// }
///
/// let table = Hero::table();
/// assert_eq!(table.name(), "heroes");
/// assert_eq!(table.primary_key()[0].name(), "id");
/// ```
pub trait Model: Sized + Send + Sync + 'static {
    /// The name of the database table.
    const TABLE_NAME: &'static str;

    /// The primary key column name(s).
    const PRIMARY_KEY: &'static [&'static str];

    /// Relationship metadata for this model.
    const RELATIONSHIPS: &'static [RelationshipInfo] = &[];

    /// Get field metadata for all columns.
    fn fields() -> &'static [FieldInfo];

    /// Convert this model instance to (field name, value) pairs.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Class name used when the model is mapped.
    fn class_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    /// Build the table described by `fields()`.
    fn table() -> TableRef {
        let columns = Self::fields()
            .iter()
            .map(|f| {
                let mut field = f.clone();
                if Self::PRIMARY_KEY.contains(&f.column_name) {
                    field = field.primary_key(true);
                }
                field.to_column()
            })
            .collect();
        Table::new(Self::TABLE_NAME, columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationship::RelationshipKind;
    use crate::types::SqlType;

    struct Address {
        id: Option<i64>,
        email: String,
        user_id: Option<i64>,
    }

    impl Model for Address {
        const TABLE_NAME: &'static str = "addresses";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];
        const RELATIONSHIPS: &'static [RelationshipInfo] =
            &[RelationshipInfo::new("user", "users", RelationshipKind::ManyToOne)
                .local_key("user_id")];

        fn fields() -> &'static [FieldInfo] {
            const FIELDS: &[FieldInfo] = &[
                FieldInfo::new("id", "id", SqlType::BigInt),
                FieldInfo::new("email", "email_address", SqlType::VarChar(50)),
                FieldInfo::new("user_id", "user_id", SqlType::BigInt)
                    .nullable(true)
                    .foreign_key("users.id"),
            ];
            FIELDS
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("id", self.id.into()),
                ("email", self.email.as_str().into()),
                ("user_id", self.user_id.into()),
            ]
        }
    }

    #[test]
    fn table_from_fields() {
        let table = Address::table();
        assert_eq!(table.name(), "addresses");
        let names: Vec<_> = table.columns().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["id", "email_address", "user_id"]);
        assert!(table.c("id").unwrap().is_primary_key());
        assert_eq!(table.foreign_keys_to("users").len(), 1);
        assert_eq!(Address::class_name(), "Address");
    }

    #[test]
    fn to_row_uses_field_names() {
        let a = Address {
            id: None,
            email: "ed@x".into(),
            user_id: Some(3),
        };
        let row = a.to_row();
        assert_eq!(row[0], ("id", Value::Null));
        assert_eq!(row[2], ("user_id", Value::BigInt(3)));
    }
}
