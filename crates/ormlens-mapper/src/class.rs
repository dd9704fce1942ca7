//! Runtime class objects.
//!
//! A `Class` is the unit a mapper is attached to. It has a name, an optional
//! parent class and an ordered attribute dictionary. Mapping installs an
//! [`ClassAttribute::Instrumented`] marker for every mapper property, in
//! property order, so the dictionary order is the declaration order.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock, Weak};

use ormlens_core::{Error, MappingErrorKind, Result, validate_attribute_key};

use crate::attributes::QueryableAttribute;
use crate::descriptor::{AssociationProxy, HybridMethod, HybridProperty};
use crate::mapper::Mapper;

/// An entry in a class dictionary.
#[derive(Clone)]
pub enum ClassAttribute {
    /// Placeholder for a mapped attribute; resolved through the class mapper.
    Instrumented,
    Hybrid(Arc<HybridProperty>),
    HybridMethod(Arc<HybridMethod>),
    AssociationProxy(Arc<AssociationProxy>),
    /// Plain data value.
    Value(serde_json::Value),
    /// Any other object stored on the class.
    Object(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for ClassAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassAttribute::Instrumented => write!(f, "Instrumented"),
            ClassAttribute::Hybrid(h) => write!(f, "Hybrid({})", h.name()),
            ClassAttribute::HybridMethod(m) => write!(f, "HybridMethod({})", m.name()),
            ClassAttribute::AssociationProxy(p) => write!(f, "AssociationProxy({})", p.name()),
            ClassAttribute::Value(v) => write!(f, "Value({})", v),
            ClassAttribute::Object(_) => write!(f, "Object(..)"),
        }
    }
}

struct ClassDef {
    name: String,
    parent: Option<Class>,
    dict: RwLock<Vec<(String, ClassAttribute)>>,
    manager: OnceLock<Weak<Mapper>>,
}

/// A shared handle to a runtime class. Clones refer to the same class.
#[derive(Clone)]
pub struct Class(Arc<ClassDef>);

impl Class {
    /// Create a root class.
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), None)
    }

    /// Create a class deriving from `parent`.
    pub fn subclass(name: impl Into<String>, parent: &Class) -> Self {
        Self::build(name.into(), Some(parent.clone()))
    }

    fn build(name: String, parent: Option<Class>) -> Self {
        Class(Arc::new(ClassDef {
            name,
            parent,
            dict: RwLock::new(Vec::new()),
            manager: OnceLock::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<&Class> {
        self.0.parent.as_ref()
    }

    /// This class followed by its ancestors, most-derived first.
    pub fn mro(&self) -> Vec<Class> {
        let mut out = vec![self.clone()];
        let mut current = self.parent();
        while let Some(c) = current {
            out.push(c.clone());
            current = c.parent();
        }
        out
    }

    /// Whether this class is `other` or derives from it.
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        self.mro().iter().any(|c| c.ptr_eq(other))
    }

    pub fn ptr_eq(&self, other: &Class) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Set an attribute in this class's own dictionary.
    ///
    /// Re-assigning an existing key keeps its position.
    pub fn set_attribute(&self, key: impl Into<String>, attr: ClassAttribute) -> Result<()> {
        let key = key.into();
        validate_attribute_key(&key)?;
        let mut dict = self.0.dict.write().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = dict.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = attr;
        } else {
            dict.push((key, attr));
        }
        Ok(())
    }

    /// Look up `key` in this class's own dictionary.
    pub fn own_attribute(&self, key: &str) -> Option<ClassAttribute> {
        self.0
            .dict
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Look up `key` along the class chain.
    pub fn lookup(&self, key: &str) -> Option<(Class, ClassAttribute)> {
        self.mro()
            .into_iter()
            .find_map(|c| c.own_attribute(key).map(|a| (c, a)))
    }

    /// Snapshot of this class's own dictionary, in order.
    pub fn dict(&self) -> Vec<(String, ClassAttribute)> {
        self.0
            .dict
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The mapper attached to this class, if it is mapped.
    ///
    /// The registry owns mappers; a class whose registry was dropped reports
    /// itself unmapped.
    pub fn mapper(&self) -> Option<Arc<Mapper>> {
        self.0.manager.get().and_then(Weak::upgrade)
    }

    pub fn is_mapped(&self) -> bool {
        self.mapper().is_some()
    }

    /// The mapper for this class, or an unmapped-class error.
    pub fn class_mapper(&self) -> Result<Arc<Mapper>> {
        self.mapper()
            .ok_or_else(|| Error::UnmappedClass(self.name().to_string()))
    }

    /// Class-bound queryable attribute, like `User.name`.
    pub fn attr(&self, key: &str) -> Result<Arc<QueryableAttribute>> {
        self.class_mapper()?.attribute(key)
    }

    pub(crate) fn install_manager(&self, mapper: &Arc<Mapper>) -> Result<()> {
        self.0
            .manager
            .set(Arc::downgrade(mapper))
            .map_err(|_| already_mapped(self))
    }

    pub(crate) fn check_unmapped(&self) -> Result<()> {
        if self.0.manager.get().is_some() {
            return Err(already_mapped(self));
        }
        Ok(())
    }

    /// Place an instrumented marker for `key`, unless a descriptor already owns it.
    pub(crate) fn instrument(&self, key: &str) {
        let mut dict = self.0.dict.write().unwrap_or_else(|e| e.into_inner());
        match dict.iter_mut().find(|(k, _)| k == key) {
            Some((_, attr @ (ClassAttribute::Value(_) | ClassAttribute::Object(_)))) => {
                *attr = ClassAttribute::Instrumented;
            }
            Some(_) => {}
            None => dict.push((key.to_string(), ClassAttribute::Instrumented)),
        }
    }
}

fn already_mapped(class: &Class) -> Error {
    Error::mapping(
        MappingErrorKind::AlreadyMapped,
        format!("class '{}' already has a primary mapper defined", class.name()),
    )
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Class {}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}'>", self.name())
    }
}
