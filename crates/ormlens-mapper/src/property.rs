//! Mapper properties and their configuration.
//!
//! A property belongs to the mapper that created it (its `parent`). Inherited
//! properties are shared with subclass mappers and keep their original parent.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use ormlens_core::{
    ColumnRef, Error, MappingErrorKind, RelationshipKind, Result, TableRef,
};

use crate::class::Class;
use crate::mapper::Mapper;

/// A mapped column attribute: one key over one or more columns.
pub struct ColumnProperty {
    key: String,
    columns: Vec<ColumnRef>,
    parent: Weak<Mapper>,
}

impl ColumnProperty {
    pub(crate) fn new(key: String, columns: Vec<ColumnRef>, parent: Weak<Mapper>) -> Self {
        Self {
            key,
            columns,
            parent,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Columns written and read through this attribute.
    pub fn columns(&self) -> &[ColumnRef] {
        &self.columns
    }

    /// The primary column.
    pub fn expression(&self) -> &ColumnRef {
        &self.columns[0]
    }

    /// The mapper this property was configured on.
    pub fn parent(&self) -> Result<Arc<Mapper>> {
        upgrade_parent(&self.parent, &self.key)
    }

    /// The column of this property that lives in `table`.
    pub fn column_for_table(&self, table: &TableRef) -> Option<&ColumnRef> {
        self.columns.iter().find(|c| c.table_name() == table.name())
    }
}

impl fmt::Debug for ColumnProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols: Vec<String> = self.columns.iter().map(|c| c.to_string()).collect();
        f.debug_struct("ColumnProperty")
            .field("key", &self.key)
            .field("columns", &cols)
            .finish()
    }
}

/// How a relationship names its target.
#[derive(Debug, Clone)]
pub enum RelationshipTarget {
    Class(Class),
    /// Class name, resolved through the owning registry.
    ClassName(String),
    /// Table name, resolved to the mapper whose local table it is.
    TableName(String),
}

/// Resolved join between a relationship's parent and target.
#[derive(Debug, Clone)]
pub struct RelationshipJoin {
    /// `ManyToOne` when the parent holds the foreign key, else `OneToMany`.
    pub direction: RelationshipKind,
    /// (referenced column, foreign-key column) pairs.
    pub pairs: Vec<(ColumnRef, ColumnRef)>,
}

/// A mapped relationship to another class.
pub struct RelationshipProperty {
    key: String,
    target: RelationshipTarget,
    uselist: Option<bool>,
    foreign_key: Option<String>,
    back_populates: Option<String>,
    parent: Weak<Mapper>,
    target_mapper: OnceLock<Weak<Mapper>>,
    join: OnceLock<RelationshipJoin>,
}

impl RelationshipProperty {
    pub(crate) fn new(key: String, config: RelationshipConfig, parent: Weak<Mapper>) -> Self {
        Self {
            key,
            target: config.target,
            uselist: config.uselist,
            foreign_key: config.foreign_key,
            back_populates: config.back_populates,
            parent,
            target_mapper: OnceLock::new(),
            join: OnceLock::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn target(&self) -> &RelationshipTarget {
        &self.target
    }

    pub fn back_populates(&self) -> Option<&str> {
        self.back_populates.as_deref()
    }

    /// The mapper this property was configured on.
    pub fn parent(&self) -> Result<Arc<Mapper>> {
        upgrade_parent(&self.parent, &self.key)
    }

    /// The target mapper.
    pub fn mapper(&self) -> Result<Arc<Mapper>> {
        if let Some(m) = self.target_mapper.get().and_then(Weak::upgrade) {
            return Ok(m);
        }
        let parent = self.parent()?;
        let resolved = match &self.target {
            RelationshipTarget::Class(class) => class.mapper(),
            RelationshipTarget::ClassName(name) => parent.registry_mapper(|m| m.class().name() == name),
            RelationshipTarget::TableName(name) => parent.registry_mapper(|m| {
                m.inherits().is_none() && m.local_table().name() == name
            }),
        };
        let mapper = resolved.ok_or_else(|| {
            Error::mapping(
                MappingErrorKind::UnresolvedTarget,
                format!(
                    "relationship '{}.{}' refers to an unmapped target {:?}",
                    parent.class().name(),
                    self.key,
                    self.target
                ),
            )
        })?;
        let _ = self.target_mapper.set(Arc::downgrade(&mapper));
        Ok(mapper)
    }

    /// Resolve direction and column pairs from the foreign keys between the
    /// parent and target tables.
    pub fn join(&self) -> Result<&RelationshipJoin> {
        if let Some(j) = self.join.get() {
            return Ok(j);
        }
        let parent = self.parent()?;
        let target = self.mapper()?;
        let join = resolve_join(
            &parent.tables(),
            &target.tables(),
            self.foreign_key.as_deref(),
        )
        .ok_or_else(|| {
            Error::mapping(
                MappingErrorKind::NoForeignKeys,
                format!(
                    "could not determine join condition between parent/child tables on relationship {}.{}; no foreign keys link {} and {}",
                    parent.class().name(),
                    self.key,
                    parent.local_table().name(),
                    target.local_table().name()
                ),
            )
        })?;
        tracing::trace!(
            relationship = %self.key,
            direction = ?join.direction,
            "resolved relationship join"
        );
        Ok(self.join.get_or_init(|| join))
    }

    pub fn direction(&self) -> Result<RelationshipKind> {
        Ok(self.join()?.direction)
    }

    /// Whether the attribute holds a collection.
    pub fn uselist(&self) -> Result<bool> {
        match self.uselist {
            Some(v) => Ok(v),
            None => Ok(self.direction()? == RelationshipKind::OneToMany),
        }
    }
}

fn resolve_join(
    parent_tables: &[TableRef],
    target_tables: &[TableRef],
    pinned: Option<&str>,
) -> Option<RelationshipJoin> {
    let accept = |fk: &ColumnRef| pinned.is_none_or(|name| fk.name() == name);

    let mut pairs = Vec::new();
    for child in target_tables {
        for parent in parent_tables {
            for (fk, referenced) in child.foreign_keys_to(parent.name()) {
                if let (true, Some(rc)) = (accept(&fk), parent.c(&referenced)) {
                    pairs.push((rc, fk));
                }
            }
        }
    }
    if !pairs.is_empty() {
        return Some(RelationshipJoin {
            direction: RelationshipKind::OneToMany,
            pairs,
        });
    }
    for parent in parent_tables {
        for target in target_tables {
            for (fk, referenced) in parent.foreign_keys_to(target.name()) {
                if let (true, Some(rc)) = (accept(&fk), target.c(&referenced)) {
                    pairs.push((rc, fk));
                }
            }
        }
    }
    (!pairs.is_empty()).then_some(RelationshipJoin {
        direction: RelationshipKind::ManyToOne,
        pairs,
    })
}

impl fmt::Debug for RelationshipProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationshipProperty")
            .field("key", &self.key)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// An alternate key for another property.
pub struct SynonymProperty {
    key: String,
    name: String,
    parent: Weak<Mapper>,
}

impl SynonymProperty {
    pub(crate) fn new(key: String, name: String, parent: Weak<Mapper>) -> Self {
        Self { key, name, parent }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Key of the proxied property.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Result<Arc<Mapper>> {
        upgrade_parent(&self.parent, &self.key)
    }
}

impl fmt::Debug for SynonymProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynonymProperty")
            .field("key", &self.key)
            .field("name", &self.name)
            .finish()
    }
}

fn upgrade_parent(parent: &Weak<Mapper>, key: &str) -> Result<Arc<Mapper>> {
    parent.upgrade().ok_or_else(|| {
        Error::invalid_request(format!(
            "the mapper owning property '{}' no longer exists",
            key
        ))
    })
}

/// Any mapper property. Clones share the underlying property.
#[derive(Debug, Clone)]
pub enum MapperProperty {
    Column(Arc<ColumnProperty>),
    Relationship(Arc<RelationshipProperty>),
    Synonym(Arc<SynonymProperty>),
}

impl MapperProperty {
    pub fn key(&self) -> &str {
        match self {
            MapperProperty::Column(p) => p.key(),
            MapperProperty::Relationship(p) => p.key(),
            MapperProperty::Synonym(p) => p.key(),
        }
    }

    pub fn parent(&self) -> Result<Arc<Mapper>> {
        match self {
            MapperProperty::Column(p) => p.parent(),
            MapperProperty::Relationship(p) => p.parent(),
            MapperProperty::Synonym(p) => p.parent(),
        }
    }

    /// Target mapper; only relationships have one.
    pub fn target_mapper(&self) -> Option<Result<Arc<Mapper>>> {
        match self {
            MapperProperty::Relationship(p) => Some(p.mapper()),
            _ => None,
        }
    }

    pub fn as_column(&self) -> Option<&Arc<ColumnProperty>> {
        match self {
            MapperProperty::Column(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&Arc<RelationshipProperty>> {
        match self {
            MapperProperty::Relationship(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_synonym(&self) -> Option<&Arc<SynonymProperty>> {
        match self {
            MapperProperty::Synonym(p) => Some(p),
            _ => None,
        }
    }

    pub fn ptr_eq(&self, other: &MapperProperty) -> bool {
        match (self, other) {
            (MapperProperty::Column(a), MapperProperty::Column(b)) => Arc::ptr_eq(a, b),
            (MapperProperty::Relationship(a), MapperProperty::Relationship(b)) => Arc::ptr_eq(a, b),
            (MapperProperty::Synonym(a), MapperProperty::Synonym(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for MapperProperty {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

/// Configuration for a relationship, before mapping.
#[derive(Debug, Clone)]
pub struct RelationshipConfig {
    target: RelationshipTarget,
    uselist: Option<bool>,
    foreign_key: Option<String>,
    back_populates: Option<String>,
}

impl RelationshipConfig {
    /// Force scalar (`false`) or collection (`true`) access.
    pub fn uselist(mut self, value: bool) -> Self {
        self.uselist = Some(value);
        self
    }

    /// Restrict the join to the foreign-key column named `column`.
    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    /// Name the property on the target that points back.
    pub fn back_populates(mut self, key: impl Into<String>) -> Self {
        self.back_populates = Some(key.into());
        self
    }
}

/// Relationship to a class.
pub fn relationship(target: &Class) -> RelationshipConfig {
    RelationshipConfig {
        target: RelationshipTarget::Class(target.clone()),
        uselist: None,
        foreign_key: None,
        back_populates: None,
    }
}

/// Relationship to a class named `name`, resolved on first use.
pub fn relationship_to(name: impl Into<String>) -> RelationshipConfig {
    RelationshipConfig {
        target: RelationshipTarget::ClassName(name.into()),
        uselist: None,
        foreign_key: None,
        back_populates: None,
    }
}

pub(crate) fn relationship_to_table(table: impl Into<String>) -> RelationshipConfig {
    RelationshipConfig {
        target: RelationshipTarget::TableName(table.into()),
        uselist: None,
        foreign_key: None,
        back_populates: None,
    }
}

/// Property configuration passed to a mapper.
#[derive(Debug, Clone)]
pub enum PropertyConfig {
    Column(Vec<ColumnRef>),
    Relationship(RelationshipConfig),
    Synonym(String),
}

/// Column property over one or more columns.
pub fn column_property(columns: impl IntoIterator<Item = ColumnRef>) -> PropertyConfig {
    PropertyConfig::Column(columns.into_iter().collect())
}

/// Synonym for the property `name`.
pub fn synonym(name: impl Into<String>) -> PropertyConfig {
    PropertyConfig::Synonym(name.into())
}

impl From<ColumnRef> for PropertyConfig {
    fn from(column: ColumnRef) -> Self {
        PropertyConfig::Column(vec![column])
    }
}

impl From<RelationshipConfig> for PropertyConfig {
    fn from(config: RelationshipConfig) -> Self {
        PropertyConfig::Relationship(config)
    }
}
