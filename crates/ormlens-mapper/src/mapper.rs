//! The class-level mapping: class + table + ordered properties.
//!
//! Property order is fixed at configuration time:
//!
//! 1. explicitly configured properties, in configuration order
//! 2. local table columns not mapped by step 1, in table order
//! 3. inherited properties not overridden, in the parent's order
//! 4. properties added later through [`Mapper::add_property`]
//!
//! An inherited column property whose key collides with a local column is
//! combined with it into one property over both columns.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use ormlens_core::{
    ColumnRef, Error, Join, MappingErrorKind, Result, Selectable, TableRef, Value,
    validate_attribute_key,
};

use crate::attributes::{ParentRef, QueryableAttribute};
use crate::class::{Class, ClassAttribute};
use crate::descriptor::OrmDescriptor;
use crate::identity::IdentityKey;
use crate::properties::Properties;
use crate::property::{
    ColumnProperty, MapperProperty, PropertyConfig, RelationshipConfig, RelationshipProperty,
    SynonymProperty,
};
use crate::registry::RegistryShared;

/// Mapping options for [`Registry::map_imperatively`](crate::Registry::map_imperatively).
#[derive(Debug, Clone, Default)]
pub struct MapperConfig {
    table: Option<TableRef>,
    properties: Vec<(String, PropertyConfig)>,
    inherits: Option<Class>,
    with_polymorphic: Vec<Class>,
}

impl MapperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local table. May be omitted for single-table inheritance.
    pub fn table(mut self, table: &TableRef) -> Self {
        self.table = Some(Arc::clone(table));
        self
    }

    /// Add an explicit property.
    pub fn property(mut self, key: impl Into<String>, config: impl Into<PropertyConfig>) -> Self {
        self.properties.push((key.into(), config.into()));
        self
    }

    /// Inherit from the mapper of `parent`.
    pub fn inherits(mut self, parent: &Class) -> Self {
        self.inherits = Some(parent.clone());
        self
    }

    /// Subclasses whose tables are joined into [`Mapper::selectable`].
    pub fn with_polymorphic(mut self, classes: &[Class]) -> Self {
        self.with_polymorphic = classes.to_vec();
        self
    }
}

enum PropertySpec {
    Column(Vec<ColumnRef>),
    Relationship(RelationshipConfig),
    Synonym(String),
    Inherited(MapperProperty),
}

/// Class-level inspection of a mapped class.
pub struct Mapper {
    class: Class,
    local_table: TableRef,
    base_class: Class,
    base_table: TableRef,
    inherits: Option<Arc<Mapper>>,
    single_table: bool,
    inherit_condition: Vec<(ColumnRef, ColumnRef)>,
    properties: RwLock<Vec<MapperProperty>>,
    polymorphic: Vec<Class>,
    selectable: OnceLock<Selectable>,
    attributes: Mutex<HashMap<String, Arc<QueryableAttribute>>>,
    inheritors: RwLock<Vec<Weak<Mapper>>>,
    registry: Weak<RegistryShared>,
    self_ref: Weak<Mapper>,
}

impl Mapper {
    #[tracing::instrument(level = "debug", skip_all, fields(class = %class.name()))]
    pub(crate) fn configure(
        class: &Class,
        config: MapperConfig,
        registry: Weak<RegistryShared>,
    ) -> Result<Arc<Mapper>> {
        class.check_unmapped()?;
        let MapperConfig {
            table,
            properties,
            inherits,
            with_polymorphic,
        } = config;

        let inherits = inherits.map(|c| c.class_mapper()).transpose()?;
        if let Some(parent) = &inherits {
            if !class.is_subclass_of(parent.class()) {
                return Err(Error::invalid_request(format!(
                    "class '{}' does not inherit from '{}'",
                    class.name(),
                    parent.class().name()
                )));
            }
        }

        let (local_table, single_table) = match (table, &inherits) {
            (Some(t), Some(parent)) => {
                let single = Arc::ptr_eq(&t, parent.local_table());
                (t, single)
            }
            (Some(t), None) => (t, false),
            (None, Some(parent)) => (Arc::clone(parent.local_table()), true),
            (None, None) => {
                return Err(Error::invalid_request(format!(
                    "class '{}' has no table and does not inherit from a mapped class",
                    class.name()
                )));
            }
        };

        let inherit_condition = match (&inherits, single_table) {
            (Some(parent), false) => {
                let pairs = inherit_condition(&local_table, &parent.tables());
                if pairs.is_empty() {
                    return Err(Error::mapping(
                        MappingErrorKind::NoForeignKeys,
                        format!(
                            "can't find any foreign key relationships between '{}' and '{}'",
                            parent.local_table().name(),
                            local_table.name()
                        ),
                    ));
                }
                pairs
            }
            _ => Vec::new(),
        };

        let (base_class, base_table) = match &inherits {
            Some(parent) => (parent.base_class.clone(), Arc::clone(&parent.base_table)),
            None => (class.clone(), Arc::clone(&local_table)),
        };
        if base_table.primary_key().is_empty() {
            return Err(Error::mapping(
                MappingErrorKind::NoPrimaryKey,
                format!(
                    "mapper for class '{}' could not assemble any primary key columns for mapped table '{}'",
                    class.name(),
                    base_table.name()
                ),
            ));
        }

        let specs = Self::plan_properties(
            class,
            &local_table,
            single_table,
            inherits.as_deref(),
            properties,
        )?;

        let mapper = Arc::new_cyclic(|weak: &Weak<Mapper>| {
            let properties = specs
                .into_iter()
                .map(|(key, spec)| build_property(key, spec, weak))
                .collect();
            Mapper {
                class: class.clone(),
                local_table,
                base_class,
                base_table,
                inherits,
                single_table,
                inherit_condition,
                properties: RwLock::new(properties),
                polymorphic: with_polymorphic,
                selectable: OnceLock::new(),
                attributes: Mutex::new(HashMap::new()),
                inheritors: RwLock::new(Vec::new()),
                registry,
                self_ref: weak.clone(),
            }
        });

        class.install_manager(&mapper)?;
        for key in mapper.attrs().keys() {
            class.instrument(key);
        }
        if let Some(parent) = &mapper.inherits {
            parent
                .inheritors
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .push(Arc::downgrade(&mapper));
        }
        tracing::debug!(
            class = %class.name(),
            table = %mapper.local_table.name(),
            properties = mapper.attrs().len(),
            "configured mapper"
        );
        Ok(mapper)
    }

    fn plan_properties(
        class: &Class,
        local_table: &TableRef,
        single_table: bool,
        parent: Option<&Mapper>,
        explicit: Vec<(String, PropertyConfig)>,
    ) -> Result<Vec<(String, PropertySpec)>> {
        let mut specs: Vec<(String, PropertySpec)> = Vec::new();
        for (key, config) in explicit {
            validate_attribute_key(&key)?;
            if specs.iter().any(|(k, _)| *k == key) {
                return Err(Error::invalid_request(format!(
                    "property '{}' is configured twice on class '{}'",
                    key,
                    class.name()
                )));
            }
            let spec = match config {
                PropertyConfig::Column(cols) if cols.is_empty() => {
                    return Err(Error::mapping(
                        MappingErrorKind::InvalidProperty,
                        format!("column property '{}' has no columns", key),
                    ));
                }
                PropertyConfig::Column(cols) => PropertySpec::Column(cols),
                PropertyConfig::Relationship(rel) => PropertySpec::Relationship(rel),
                PropertyConfig::Synonym(name) => PropertySpec::Synonym(name),
            };
            specs.push((key, spec));
        }

        if !single_table {
            for column in local_table.columns() {
                let mapped = specs.iter().any(|(_, s)| match s {
                    PropertySpec::Column(cols) => cols.iter().any(|c| Arc::ptr_eq(c, &column)),
                    _ => false,
                });
                let key = column.name().to_string();
                if mapped || specs.iter().any(|(k, _)| *k == key) {
                    continue;
                }
                validate_attribute_key(&key)?;
                specs.push((key, PropertySpec::Column(vec![column])));
            }
        }

        if let Some(parent) = parent {
            for inherited in parent.attrs().into_iter().map(|(_, p)| p) {
                let key = inherited.key().to_string();
                match specs.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, PropertySpec::Column(local))) => {
                        if let MapperProperty::Column(parent_prop) = &inherited {
                            combine_columns(class, &key, local, parent_prop);
                        }
                    }
                    Some(_) => {}
                    None => specs.push((key, PropertySpec::Inherited(inherited))),
                }
            }
        }

        let keys: Vec<&str> = specs.iter().map(|(k, _)| k.as_str()).collect();
        for (key, spec) in &specs {
            if let PropertySpec::Synonym(name) = spec {
                check_synonym(key, name, |n| {
                    keys.contains(&n)
                        && !matches!(
                            specs.iter().find(|(k, _)| k == n),
                            Some((_, PropertySpec::Synonym(_)))
                        )
                })?;
            }
        }
        Ok(specs)
    }

    pub fn class(&self) -> &Class {
        &self.class
    }

    /// The table this mapper was configured with. For single-table
    /// inheritance this is the parent's table.
    pub fn local_table(&self) -> &TableRef {
        &self.local_table
    }

    /// The selectable rows are persisted to.
    pub fn persist_selectable(&self) -> Selectable {
        Selectable::Table(Arc::clone(&self.local_table))
    }

    /// The selectable rows are loaded from.
    ///
    /// With polymorphic loading configured this is an outer join across the
    /// polymorphic tables, built once and reused.
    pub fn selectable(&self) -> Selectable {
        if self.polymorphic.is_empty() {
            return self.persist_selectable();
        }
        if let Some(s) = self.selectable.get() {
            return s.clone();
        }
        let mut current = self.persist_selectable();
        for class in &self.polymorphic {
            let Some(mapper) = class.mapper() else {
                tracing::trace!(
                    class = %class.name(),
                    "polymorphic class not mapped yet; using persist selectable"
                );
                return self.persist_selectable();
            };
            if Arc::ptr_eq(mapper.local_table(), &self.local_table) {
                continue;
            }
            current = Selectable::Join(Join::new(
                current,
                Selectable::Table(Arc::clone(mapper.local_table())),
                true,
            ));
        }
        self.selectable.get_or_init(|| current).clone()
    }

    pub fn is_mapper(&self) -> bool {
        true
    }

    pub fn is_selectable(&self) -> bool {
        false
    }

    pub fn is_aliased_class(&self) -> bool {
        false
    }

    pub fn is_instance(&self) -> bool {
        false
    }

    /// Shared handle to this mapper.
    pub fn arc(&self) -> Option<Arc<Mapper>> {
        self.self_ref.upgrade()
    }

    pub fn inherits(&self) -> Option<&Arc<Mapper>> {
        self.inherits.as_ref()
    }

    /// Whether this mapper shares its parent's table.
    pub fn is_single_table(&self) -> bool {
        self.single_table
    }

    /// The root of the inheritance hierarchy.
    pub fn base_mapper(self: &Arc<Self>) -> Arc<Mapper> {
        match &self.inherits {
            Some(parent) => parent.base_mapper(),
            None => Arc::clone(self),
        }
    }

    /// Class of the base mapper; identity keys are built against it.
    pub fn base_class(&self) -> &Class {
        &self.base_class
    }

    /// Mappers from the base down to this one.
    pub fn iterate_to_self(&self) -> Vec<Arc<Mapper>> {
        let mut chain = Vec::new();
        let mut current = self.arc();
        while let Some(m) = current {
            current = m.inherits.clone();
            chain.push(m);
        }
        chain.reverse();
        chain
    }

    /// Whether `other` is this mapper or one of its ancestors.
    pub fn isa(&self, other: &Mapper) -> bool {
        self.iterate_to_self()
            .iter()
            .any(|m| std::ptr::eq(Arc::as_ptr(m), other))
    }

    /// Distinct tables of the hierarchy, base first.
    pub fn tables(&self) -> Vec<TableRef> {
        let mut out: Vec<TableRef> = Vec::new();
        for m in self.iterate_to_self() {
            if !out.iter().any(|t| Arc::ptr_eq(t, &m.local_table)) {
                out.push(Arc::clone(&m.local_table));
            }
        }
        if out.is_empty() {
            out.push(Arc::clone(&self.local_table));
        }
        out
    }

    /// (parent column, local foreign-key column) pairs joining this mapper's
    /// table to its parent's in joined inheritance.
    pub fn inherit_condition(&self) -> &[(ColumnRef, ColumnRef)] {
        &self.inherit_condition
    }

    /// Primary key columns of the base table.
    pub fn primary_key(&self) -> Vec<ColumnRef> {
        self.base_table.primary_key()
    }

    /// Column properties holding the primary key, in primary-key order.
    pub fn primary_key_properties(&self) -> Result<Vec<Arc<ColumnProperty>>> {
        self.primary_key()
            .iter()
            .map(|col| {
                self.property_for_column(col).ok_or_else(|| {
                    Error::mapping(
                        MappingErrorKind::NoPrimaryKey,
                        format!(
                            "primary key column '{}' is not mapped on class '{}'",
                            col,
                            self.class.name()
                        ),
                    )
                })
            })
            .collect()
    }

    /// The column property mapping `column`, if any.
    pub fn property_for_column(&self, column: &ColumnRef) -> Option<Arc<ColumnProperty>> {
        self.column_attrs()
            .into_iter()
            .map(|(_, p)| p)
            .find(|p| p.columns().iter().any(|c| Arc::ptr_eq(c, column)))
    }

    pub fn identity_key_from_primary_key(&self, values: Vec<Value>) -> IdentityKey {
        IdentityKey::new(self.base_class.clone(), values)
    }

    /// All properties in order.
    pub fn attrs(&self) -> Properties<MapperProperty> {
        self.properties
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|p| (p.key().to_string(), p.clone()))
            .collect()
    }

    pub fn column_attrs(&self) -> Properties<Arc<ColumnProperty>> {
        self.filter_properties(|p| p.as_column().cloned())
    }

    pub fn relationships(&self) -> Properties<Arc<RelationshipProperty>> {
        self.filter_properties(|p| p.as_relationship().cloned())
    }

    pub fn synonyms(&self) -> Properties<Arc<SynonymProperty>> {
        self.filter_properties(|p| p.as_synonym().cloned())
    }

    /// `key -> first column` for every column property.
    pub fn columns(&self) -> Properties<ColumnRef> {
        self.filter_properties(|p| p.as_column().map(|c| Arc::clone(c.expression())))
    }

    fn filter_properties<T>(&self, f: impl Fn(&MapperProperty) -> Option<T>) -> Properties<T> {
        self.properties
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(|p| f(p).map(|item| (p.key().to_string(), item)))
            .collect()
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|p| p.key() == key)
    }

    pub fn get_property(&self, key: &str) -> Result<MapperProperty> {
        self.properties
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|p| p.key() == key)
            .cloned()
            .ok_or_else(|| {
                Error::invalid_request(format!(
                    "mapper '{}' has no property '{}'",
                    self.class.name(),
                    key
                ))
            })
    }

    /// Add a property after configuration. Inheriting mappers receive it too.
    #[tracing::instrument(level = "debug", skip(self, config), fields(class = %self.class.name()))]
    pub fn add_property(&self, key: &str, config: impl Into<PropertyConfig>) -> Result<()> {
        validate_attribute_key(key)?;
        if self.has_property(key) {
            return Err(Error::invalid_request(format!(
                "mapper '{}' already has a property '{}'",
                self.class.name(),
                key
            )));
        }
        let spec = match config.into() {
            PropertyConfig::Column(cols) if cols.is_empty() => {
                return Err(Error::mapping(
                    MappingErrorKind::InvalidProperty,
                    format!("column property '{}' has no columns", key),
                ));
            }
            PropertyConfig::Column(cols) => PropertySpec::Column(cols),
            PropertyConfig::Relationship(rel) => PropertySpec::Relationship(rel),
            PropertyConfig::Synonym(name) => {
                check_synonym(key, &name, |n| {
                    self.get_property(n)
                        .is_ok_and(|p| p.as_synonym().is_none())
                })?;
                PropertySpec::Synonym(name)
            }
        };
        let property = build_property(key.to_string(), spec, &self.self_ref);
        self.install_property(property);
        Ok(())
    }

    fn install_property(&self, property: MapperProperty) {
        let key = property.key().to_string();
        self.properties
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(property.clone());
        self.class.instrument(&key);
        let inheritors: Vec<Arc<Mapper>> = self
            .inheritors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for sub in inheritors {
            if !sub.has_property(&key) {
                sub.install_property(property.clone());
            }
        }
    }

    /// Class-bound attribute, like `User.addresses`. Repeated lookups return
    /// the same object.
    pub fn attribute(&self, key: &str) -> Result<Arc<QueryableAttribute>> {
        let mut cache = self.attributes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(attr) = cache.get(key) {
            return Ok(Arc::clone(attr));
        }
        let property = self.get_property(key)?;
        let attr = Arc::new(QueryableAttribute::new(
            key.to_string(),
            property,
            ParentRef::Mapper(self.self_ref.clone()),
        ));
        cache.insert(key.to_string(), Arc::clone(&attr));
        Ok(attr)
    }

    /// Every ORM-level descriptor reachable from the class.
    ///
    /// Keys follow class dictionary order walking the class chain most-derived
    /// first. A key that an ancestor also defines is ordered at the ancestor's
    /// position, with the most-derived definition as its value.
    pub fn all_orm_descriptors(&self) -> Properties<OrmDescriptor> {
        let mro = self.class.mro();
        let mut out = Properties::new();
        for (depth, class) in mro.iter().enumerate() {
            for (key, _) in class.dict() {
                if out.contains_key(&key) {
                    continue;
                }
                let defined_above = mro[depth + 1..]
                    .iter()
                    .any(|c| c.own_attribute(&key).is_some());
                if defined_above {
                    continue;
                }
                if let Some(descriptor) = self.resolve_descriptor(&key) {
                    out.insert_first(key, descriptor);
                }
            }
        }
        out
    }

    fn resolve_descriptor(&self, key: &str) -> Option<OrmDescriptor> {
        let (owner, attr) = self.class.lookup(key)?;
        match attr {
            ClassAttribute::Instrumented => owner
                .mapper()
                .and_then(|m| m.attribute(key).ok())
                .map(OrmDescriptor::Attribute),
            ClassAttribute::Hybrid(h) => Some(OrmDescriptor::Hybrid(h)),
            ClassAttribute::HybridMethod(m) => Some(OrmDescriptor::HybridMethod(m)),
            ClassAttribute::AssociationProxy(p) => Some(OrmDescriptor::AssociationProxy(p)),
            ClassAttribute::Value(_) | ClassAttribute::Object(_) => None,
        }
    }

    /// Mappers configured through `with_polymorphic`, once mapped.
    pub fn with_polymorphic_mappers(&self) -> Vec<Arc<Mapper>> {
        self.polymorphic.iter().filter_map(Class::mapper).collect()
    }

    /// Mappers that directly inherit from this one.
    pub fn inheritors(&self) -> Vec<Arc<Mapper>> {
        self.inheritors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub(crate) fn registry_mapper(&self, pred: impl Fn(&Mapper) -> bool) -> Option<Arc<Mapper>> {
        self.registry.upgrade().and_then(|r| r.find(pred))
    }
}

fn build_property(key: String, spec: PropertySpec, parent: &Weak<Mapper>) -> MapperProperty {
    match spec {
        PropertySpec::Column(cols) => {
            MapperProperty::Column(Arc::new(ColumnProperty::new(key, cols, parent.clone())))
        }
        PropertySpec::Relationship(rel) => MapperProperty::Relationship(Arc::new(
            RelationshipProperty::new(key, rel, parent.clone()),
        )),
        PropertySpec::Synonym(name) => {
            MapperProperty::Synonym(Arc::new(SynonymProperty::new(key, name, parent.clone())))
        }
        PropertySpec::Inherited(p) => p,
    }
}

fn inherit_condition(local: &TableRef, parent_tables: &[TableRef]) -> Vec<(ColumnRef, ColumnRef)> {
    parent_tables
        .iter()
        .flat_map(|parent| {
            local
                .foreign_keys_to(parent.name())
                .into_iter()
                .filter_map(|(fk, referenced)| parent.c(&referenced).map(|rc| (rc, fk)))
        })
        .collect()
}

fn combine_columns(
    class: &Class,
    key: &str,
    local: &mut Vec<ColumnRef>,
    inherited: &ColumnProperty,
) {
    let related = local.iter().any(|l| {
        inherited.columns().iter().any(|p| {
            l.foreign_key_target() == Some((p.table_name(), p.name()))
        })
    });
    if !related {
        tracing::warn!(
            class = %class.name(),
            key,
            "implicitly combining columns {} under attribute '{}'",
            local
                .iter()
                .chain(inherited.columns())
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            key
        );
    }
    for column in inherited.columns() {
        if !local.iter().any(|c| Arc::ptr_eq(c, column)) {
            local.push(Arc::clone(column));
        }
    }
}

fn check_synonym(key: &str, name: &str, exists: impl Fn(&str) -> bool) -> Result<()> {
    if exists(name) {
        Ok(())
    } else {
        Err(Error::mapping(
            MappingErrorKind::InvalidProperty,
            format!(
                "synonym '{}' refers to '{}', which is not a mapped column or relationship",
                key, name
            ),
        ))
    }
}

impl fmt::Debug for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Mapper {}; {}>",
            self.class.name(),
            self.local_table.name()
        )
    }
}
