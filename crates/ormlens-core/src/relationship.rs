//! Relationship metadata.
//!
//! Relationships on static `Model` types are described by `RelationshipInfo`
//! constants; the mapper resolves them against mapped tables at
//! configuration time.

/// The type of relationship between two mapped classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationshipKind {
    /// One-to-one: the remote table holds the foreign key, scalar access.
    OneToOne,
    /// Many-to-one: the local table holds the foreign key.
    #[default]
    ManyToOne,
    /// One-to-many: the remote table holds the foreign key, collection access.
    OneToMany,
}

impl RelationshipKind {
    /// Whether the relationship is accessed as a collection.
    pub const fn uselist(&self) -> bool {
        matches!(self, RelationshipKind::OneToMany)
    }

    /// Whether the foreign key lives on the local table.
    pub const fn is_local_fk(&self) -> bool {
        matches!(self, RelationshipKind::ManyToOne)
    }
}

/// Metadata about a relationship between models.
#[derive(Debug, Clone, Copy)]
pub struct RelationshipInfo {
    /// Name of the relationship field.
    pub name: &'static str,

    /// The related model's table name.
    pub related_table: &'static str,

    /// Kind of relationship.
    pub kind: RelationshipKind,

    /// Local foreign key column (for ManyToOne).
    pub local_key: Option<&'static str>,

    /// Remote foreign key column (for OneToMany / OneToOne).
    pub remote_key: Option<&'static str>,

    /// The field on the related model that points back.
    pub back_populates: Option<&'static str>,
}

impl RelationshipInfo {
    /// Create a new relationship with required fields.
    #[must_use]
    pub const fn new(
        name: &'static str,
        related_table: &'static str,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            name,
            related_table,
            kind,
            local_key: None,
            remote_key: None,
            back_populates: None,
        }
    }

    /// Set the local foreign key column (ManyToOne).
    #[must_use]
    pub const fn local_key(mut self, key: &'static str) -> Self {
        self.local_key = Some(key);
        self
    }

    /// Set the remote foreign key column (OneToMany).
    #[must_use]
    pub const fn remote_key(mut self, key: &'static str) -> Self {
        self.remote_key = Some(key);
        self
    }

    /// Set the back-populating field on the related model.
    #[must_use]
    pub const fn back_populates(mut self, field: &'static str) -> Self {
        self.back_populates = Some(field);
        self
    }

    /// The foreign key column name, on whichever side holds it.
    pub const fn foreign_key_column(&self) -> Option<&'static str> {
        if self.kind.is_local_fk() {
            self.local_key
        } else {
            self.remote_key
        }
    }
}

/// Find a relationship by field name.
pub fn find_relationship(
    relationships: &'static [RelationshipInfo],
    name: &str,
) -> Option<&'static RelationshipInfo> {
    relationships.iter().find(|r| r.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELS: &[RelationshipInfo] = &[
        RelationshipInfo::new("addresses", "addresses", RelationshipKind::OneToMany)
            .remote_key("user_id")
            .back_populates("user"),
        RelationshipInfo::new("user", "users", RelationshipKind::ManyToOne).local_key("user_id"),
    ];

    #[test]
    fn kind_flags() {
        assert!(RelationshipKind::OneToMany.uselist());
        assert!(!RelationshipKind::OneToOne.uselist());
        assert!(RelationshipKind::ManyToOne.is_local_fk());
        assert_eq!(RelationshipKind::default(), RelationshipKind::ManyToOne);
    }

    #[test]
    fn lookup_and_fk_side() {
        let rel = find_relationship(RELS, "addresses").unwrap();
        assert_eq!(rel.foreign_key_column(), Some("user_id"));
        assert_eq!(rel.back_populates, Some("user"));
        assert_eq!(
            find_relationship(RELS, "user").unwrap().foreign_key_column(),
            Some("user_id")
        );
        assert!(find_relationship(RELS, "orders").is_none());
    }
}
