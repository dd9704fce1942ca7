//! Mapper registry: imperative, declarative and `Model`-driven mapping.

use std::sync::{Arc, RwLock};

use ormlens_core::{Column, Error, MetaData, Model, RelationshipKind, Result, validate_attribute_key};

use crate::class::{Class, ClassAttribute};
use crate::descriptor::{AssociationProxy, HybridMethod, HybridProperty};
use crate::mapper::{Mapper, MapperConfig};
use crate::property::{PropertyConfig, RelationshipConfig, relationship_to_table};

#[derive(Default)]
pub(crate) struct RegistryShared {
    mappers: RwLock<Vec<Arc<Mapper>>>,
    metadata: MetaData,
}

impl RegistryShared {
    pub(crate) fn find(&self, pred: impl Fn(&Mapper) -> bool) -> Option<Arc<Mapper>> {
        self.mappers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|m| pred(m))
            .cloned()
    }
}

/// Owns the mappers of a set of classes.
///
/// Classes hold only weak references to their mappers, so a registry must
/// outlive the mappings it created.
#[derive(Clone, Default)]
pub struct Registry(Arc<RegistryShared>);

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables created through declarative mapping.
    pub fn metadata(&self) -> &MetaData {
        &self.0.metadata
    }

    /// Map `class` with an explicit configuration.
    pub fn map_imperatively(&self, class: &Class, config: MapperConfig) -> Result<Arc<Mapper>> {
        let mapper = Mapper::configure(class, config, Arc::downgrade(&self.0))?;
        self.0
            .mappers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&mapper));
        Ok(mapper)
    }

    /// Build and map a class from a declarative body.
    pub fn declare(&self, decl: Declarative) -> Result<Class> {
        let Declarative {
            name,
            parent,
            table_name,
            body,
        } = decl;
        let class = match &parent {
            Some(p) => Class::subclass(name, p),
            None => Class::new(name),
        };
        let parent_mapper = parent.as_ref().and_then(Class::mapper);

        let mut columns: Vec<(String, Column)> = Vec::new();
        let mut config = MapperConfig::new();
        let mut deferred: Vec<(String, PropertyConfig)> = Vec::new();
        for (key, item) in body {
            validate_attribute_key(&key)?;
            match item {
                BodyItem::Column(column) => {
                    class.set_attribute(key.clone(), ClassAttribute::Instrumented)?;
                    columns.push((key, column));
                }
                BodyItem::Relationship(rel) => {
                    class.set_attribute(key.clone(), ClassAttribute::Instrumented)?;
                    deferred.push((key, rel.into()));
                }
                BodyItem::Synonym(target) => {
                    class.set_attribute(key.clone(), ClassAttribute::Instrumented)?;
                    deferred.push((key, PropertyConfig::Synonym(target)));
                }
                BodyItem::Attribute(attr) => class.set_attribute(key, attr)?,
            }
        }

        let mut table_columns = Vec::new();
        let mut column_keys = Vec::new();
        match (&table_name, &parent_mapper) {
            (Some(table_name), _) => {
                for (key, column) in columns {
                    column_keys.push((key, column.name().to_string()));
                    table_columns.push(column);
                }
                let table = self.0.metadata.table(table_name.clone(), table_columns)?;
                for (key, column_name) in column_keys {
                    config = config.property(key, table.column(&column_name)?);
                }
                config = config.table(&table);
            }
            (None, Some(parent_mapper)) => {
                let table = parent_mapper.local_table();
                for (key, column) in columns {
                    let column = table.append_column(column)?;
                    config = config.property(key, column);
                }
            }
            (None, None) => {
                return Err(Error::invalid_request(format!(
                    "class '{}' does not have a table name and does not inherit from a mapped class",
                    class.name()
                )));
            }
        }
        for (key, property) in deferred {
            config = config.property(key, property);
        }
        if let Some(parent) = &parent {
            if parent_mapper.is_some() {
                config = config.inherits(parent);
            }
        }
        self.map_imperatively(&class, config)?;
        Ok(class)
    }

    /// Map a static `Model` type under class name `M::class_name()`.
    ///
    /// Relationships resolve by table name against this registry on first use.
    pub fn map_model<M: Model>(&self) -> Result<Class> {
        let class = Class::new(M::class_name());
        let table = M::table();
        self.0.metadata.add(Arc::clone(&table))?;
        let mut config = MapperConfig::new().table(&table);
        for field in M::fields() {
            config = config.property(field.name, table.column(field.column_name)?);
        }
        for rel in M::RELATIONSHIPS {
            let mut rc = relationship_to_table(rel.related_table);
            if let Some(fk) = rel.foreign_key_column() {
                rc = rc.foreign_key(fk);
            }
            if let Some(back) = rel.back_populates {
                rc = rc.back_populates(back);
            }
            if rel.kind == RelationshipKind::OneToOne {
                rc = rc.uselist(false);
            }
            config = config.property(rel.name, rc);
        }
        self.map_imperatively(&class, config)?;
        Ok(class)
    }

    /// All mappers in configuration order.
    pub fn mappers(&self) -> Vec<Arc<Mapper>> {
        self.0
            .mappers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Find the mapper for a class name.
    pub fn mapper_for(&self, class_name: &str) -> Option<Arc<Mapper>> {
        self.0.find(|m| m.class().name() == class_name)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("mappers", &self.mappers().len())
            .finish()
    }
}

enum BodyItem {
    Column(Column),
    Relationship(RelationshipConfig),
    Synonym(String),
    Attribute(ClassAttribute),
}

/// A class body for [`Registry::declare`].
///
/// Entries keep declaration order; that order becomes the class dictionary
/// order and thus the `all_orm_descriptors` order.
pub struct Declarative {
    name: String,
    parent: Option<Class>,
    table_name: Option<String>,
    body: Vec<(String, BodyItem)>,
}

impl Declarative {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            table_name: None,
            body: Vec::new(),
        }
    }

    /// Derive from `parent`. Without a table name, the class uses
    /// single-table inheritance on the parent's table.
    pub fn subclass_of(mut self, parent: &Class) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Create a table named `name` for this class.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    /// A column, keyed by its name.
    pub fn column(mut self, column: Column) -> Self {
        self.body
            .push((column.name().to_string(), BodyItem::Column(column)));
        self
    }

    pub fn relationship(mut self, key: impl Into<String>, config: RelationshipConfig) -> Self {
        self.body
            .push((key.into(), BodyItem::Relationship(config)));
        self
    }

    pub fn synonym(mut self, key: impl Into<String>, name: impl Into<String>) -> Self {
        self.body
            .push((key.into(), BodyItem::Synonym(name.into())));
        self
    }

    pub fn hybrid(mut self, hybrid: Arc<HybridProperty>) -> Self {
        self.body.push((
            hybrid.name().to_string(),
            BodyItem::Attribute(ClassAttribute::Hybrid(hybrid)),
        ));
        self
    }

    pub fn hybrid_method(mut self, method: Arc<HybridMethod>) -> Self {
        self.body.push((
            method.name().to_string(),
            BodyItem::Attribute(ClassAttribute::HybridMethod(method)),
        ));
        self
    }

    pub fn association_proxy(mut self, proxy: Arc<AssociationProxy>) -> Self {
        self.body.push((
            proxy.name().to_string(),
            BodyItem::Attribute(ClassAttribute::AssociationProxy(proxy)),
        ));
        self
    }

    /// A plain class attribute.
    pub fn attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.body
            .push((key.into(), BodyItem::Attribute(ClassAttribute::Value(value))));
        self
    }
}
