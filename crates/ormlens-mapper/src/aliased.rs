//! Aliased classes: a mapped class viewed through an alias of its selectable.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use ormlens_core::{Alias, Result, Selectable};

use crate::attributes::{ParentRef, QueryableAttribute};
use crate::class::Class;
use crate::mapper::Mapper;

/// Inspection view of an aliased class.
pub struct AliasedInsp {
    mapper: Arc<Mapper>,
    selectable: Selectable,
    name: String,
    attributes: Mutex<HashMap<String, Arc<QueryableAttribute>>>,
}

impl AliasedInsp {
    pub fn mapper(&self) -> &Arc<Mapper> {
        &self.mapper
    }

    /// The alias this entity selects from.
    pub fn selectable(&self) -> &Selectable {
        &self.selectable
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> &Class {
        self.mapper.class()
    }

    /// The aliased class handle for this view.
    pub fn entity(self: &Arc<Self>) -> AliasedClass {
        AliasedClass(Arc::clone(self))
    }

    pub fn is_aliased_class(&self) -> bool {
        true
    }

    pub fn is_selectable(&self) -> bool {
        false
    }

    pub fn is_instance(&self) -> bool {
        false
    }

    /// Attribute bound to this alias. Repeated lookups return the same object.
    pub fn attribute(self: &Arc<Self>, key: &str) -> Result<Arc<QueryableAttribute>> {
        let mut cache = self.attributes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(attr) = cache.get(key) {
            return Ok(Arc::clone(attr));
        }
        let property = self.mapper.get_property(key)?;
        let attr = Arc::new(QueryableAttribute::new(
            key.to_string(),
            property,
            ParentRef::Aliased(Arc::downgrade(self)),
        ));
        cache.insert(key.to_string(), Arc::clone(&attr));
        Ok(attr)
    }
}

impl fmt::Debug for AliasedInsp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<AliasedInsp at {}; {}>", self.name, self.class().name())
    }
}

/// A handle to an aliased class. Clones share the same alias.
#[derive(Clone)]
pub struct AliasedClass(Arc<AliasedInsp>);

impl AliasedClass {
    pub(crate) fn from_insp(insp: Arc<AliasedInsp>) -> Self {
        AliasedClass(insp)
    }

    /// Alias `mapper` under an anonymous alias of its selectable.
    pub fn new(mapper: &Arc<Mapper>) -> Self {
        let alias = Alias::anonymous(mapper.selectable());
        Self::from_alias(mapper, alias)
    }

    /// Alias `mapper` under `name`.
    pub fn named(mapper: &Arc<Mapper>, name: impl Into<String>) -> Self {
        let alias = Alias::new(mapper.selectable(), name);
        Self::from_alias(mapper, alias)
    }

    fn from_alias(mapper: &Arc<Mapper>, alias: Arc<Alias>) -> Self {
        let name = alias.name().to_string();
        AliasedClass(Arc::new(AliasedInsp {
            mapper: Arc::clone(mapper),
            selectable: Selectable::Alias(alias),
            name,
            attributes: Mutex::new(HashMap::new()),
        }))
    }

    /// The inspection view of this alias.
    pub fn insp(&self) -> &Arc<AliasedInsp> {
        &self.0
    }

    /// Attribute bound to this alias, like `ua.addresses`.
    pub fn attr(&self, key: &str) -> Result<Arc<QueryableAttribute>> {
        self.0.attribute(key)
    }

    pub fn ptr_eq(&self, other: &AliasedClass) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for AliasedClass {
    type Target = AliasedInsp;

    fn deref(&self) -> &AliasedInsp {
        &self.0
    }
}

impl fmt::Debug for AliasedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<AliasedClass {}; {}>", self.0.name, self.0.class().name())
    }
}

/// Alias a mapped class.
pub fn aliased(class: &Class) -> Result<AliasedClass> {
    Ok(AliasedClass::new(&class.class_mapper()?))
}
