//! Class-bound attributes (`User.name`, `aliased_user.addresses`).

use std::fmt;
use std::sync::{Arc, Weak};

use ormlens_core::{ColumnRef, Error, Result, Selectable};

use crate::aliased::{AliasedClass, AliasedInsp};
use crate::class::Class;
use crate::mapper::Mapper;
use crate::property::MapperProperty;

/// The entity an attribute is bound to: a mapper or an aliased class.
#[derive(Debug, Clone)]
pub enum Entity {
    Mapper(Arc<Mapper>),
    Aliased(Arc<AliasedInsp>),
}

impl Entity {
    pub fn mapper(&self) -> Arc<Mapper> {
        match self {
            Entity::Mapper(m) => Arc::clone(m),
            Entity::Aliased(a) => Arc::clone(a.mapper()),
        }
    }

    /// The mapped class behind the entity.
    pub fn class(&self) -> Class {
        self.mapper().class().clone()
    }

    /// The aliased class, when the entity is an alias.
    pub fn aliased_class(&self) -> Option<AliasedClass> {
        match self {
            Entity::Mapper(_) => None,
            Entity::Aliased(a) => Some(AliasedClass::from_insp(Arc::clone(a))),
        }
    }

    pub fn is_aliased_class(&self) -> bool {
        matches!(self, Entity::Aliased(_))
    }

    pub fn selectable(&self) -> Selectable {
        match self {
            Entity::Mapper(m) => m.selectable(),
            Entity::Aliased(a) => a.selectable().clone(),
        }
    }

    pub fn ptr_eq(&self, other: &Entity) -> bool {
        match (self, other) {
            (Entity::Mapper(a), Entity::Mapper(b)) => Arc::ptr_eq(a, b),
            (Entity::Aliased(a), Entity::Aliased(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Clone)]
pub(crate) enum ParentRef {
    Mapper(Weak<Mapper>),
    Aliased(Weak<AliasedInsp>),
}

/// SQL-side expression of an attribute.
#[derive(Debug, Clone)]
pub enum Expression {
    /// A column, adapted to the parent entity's selectable.
    Column(ColumnRef),
    /// A relationship join condition as (referenced, foreign-key) column pairs.
    JoinCondition(Vec<(ColumnRef, ColumnRef)>),
}

impl Expression {
    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expression::Column(c) => Some(c),
            Expression::JoinCondition(_) => None,
        }
    }
}

/// A mapped attribute as seen from a class or aliased class.
pub struct QueryableAttribute {
    key: String,
    property: MapperProperty,
    parent: ParentRef,
}

impl QueryableAttribute {
    pub(crate) fn new(key: String, property: MapperProperty, parent: ParentRef) -> Self {
        Self {
            key,
            property,
            parent,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The mapper property behind this attribute. For a synonym this is the
    /// synonym property itself.
    pub fn property(&self) -> &MapperProperty {
        &self.property
    }

    /// The entity this attribute was accessed through.
    pub fn parent(&self) -> Result<Entity> {
        let entity = match &self.parent {
            ParentRef::Mapper(m) => m.upgrade().map(Entity::Mapper),
            ParentRef::Aliased(a) => a.upgrade().map(Entity::Aliased),
        };
        entity.ok_or_else(|| {
            Error::invalid_request(format!(
                "the entity owning attribute '{}' no longer exists",
                self.key
            ))
        })
    }

    /// Mapper of the parent entity.
    pub fn parent_mapper(&self) -> Result<Arc<Mapper>> {
        Ok(self.parent()?.mapper())
    }

    /// Target mapper of a relationship attribute; `None` for other attributes.
    pub fn mapper(&self) -> Result<Option<Arc<Mapper>>> {
        self.property.target_mapper().transpose()
    }

    /// The property a synonym stands for, or the property itself.
    pub fn resolved_property(&self) -> Result<MapperProperty> {
        match &self.property {
            MapperProperty::Synonym(s) => self.parent_mapper()?.get_property(s.name()),
            other => Ok(other.clone()),
        }
    }

    /// Column expression (adapted to an alias when accessed through one), or
    /// the join condition of a relationship.
    pub fn expression(&self) -> Result<Expression> {
        let parent = self.parent()?;
        match self.resolved_property()? {
            MapperProperty::Column(c) => {
                let column = c.expression();
                let adapted = match &parent {
                    Entity::Aliased(a) => a.selectable().corresponding_column(column),
                    Entity::Mapper(_) => None,
                };
                Ok(Expression::Column(adapted.unwrap_or_else(|| Arc::clone(column))))
            }
            MapperProperty::Relationship(r) => {
                Ok(Expression::JoinCondition(r.join()?.pairs.clone()))
            }
            MapperProperty::Synonym(s) => Err(Error::invalid_request(format!(
                "synonym '{}' refers to another synonym '{}'",
                self.key,
                s.name()
            ))),
        }
    }
}

impl fmt::Debug for QueryableAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryableAttribute")
            .field("key", &self.key)
            .field("property", &self.property)
            .finish_non_exhaustive()
    }
}
