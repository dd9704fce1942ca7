//! Class-level descriptors: hybrids, association proxies and the
//! `all_orm_descriptors` item type.

use std::fmt;
use std::sync::Arc;

use ormlens_core::{Result, Value, validate_attribute_key};

use crate::attributes::QueryableAttribute;

/// Which extension, if any, provides a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionType {
    /// A plain instrumented mapped attribute.
    NotExtension,
    HybridProperty,
    HybridMethod,
    AssociationProxy,
}

/// Read access to an object's attributes, as seen by hybrid getters.
pub trait AttributeSource {
    /// Current scalar value of `key`.
    fn attribute_value(&self, key: &str) -> Result<Value>;
}

type HybridGetter = dyn Fn(&dyn AttributeSource) -> Result<Value> + Send + Sync;
type HybridFn = dyn Fn(&dyn AttributeSource, &[Value]) -> Result<Value> + Send + Sync;

/// A computed instance-level attribute.
pub struct HybridProperty {
    name: String,
    getter: Box<HybridGetter>,
}

impl HybridProperty {
    /// Create a hybrid property named `name`.
    pub fn new<F>(name: impl Into<String>, getter: F) -> Result<Arc<Self>>
    where
        F: Fn(&dyn AttributeSource) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        validate_attribute_key(&name)?;
        Ok(Arc::new(Self {
            name,
            getter: Box::new(getter),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate against an object.
    pub fn get(&self, source: &dyn AttributeSource) -> Result<Value> {
        (self.getter)(source)
    }

    pub fn extension_type(&self) -> ExtensionType {
        ExtensionType::HybridProperty
    }
}

impl fmt::Debug for HybridProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridProperty")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A computed instance-level method taking arguments.
pub struct HybridMethod {
    name: String,
    func: Box<HybridFn>,
}

impl HybridMethod {
    /// Create a hybrid method named `name`.
    pub fn new<F>(name: impl Into<String>, func: F) -> Result<Arc<Self>>
    where
        F: Fn(&dyn AttributeSource, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        validate_attribute_key(&name)?;
        Ok(Arc::new(Self {
            name,
            func: Box::new(func),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke against an object.
    pub fn call(&self, source: &dyn AttributeSource, args: &[Value]) -> Result<Value> {
        (self.func)(source, args)
    }

    pub fn extension_type(&self) -> ExtensionType {
        ExtensionType::HybridMethod
    }
}

impl fmt::Debug for HybridMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridMethod")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Proxies one attribute of each member of a collection relationship.
///
/// `some_assoc = proxy("addresses", "email_address")` reads as the list of
/// `email_address` values across `addresses`.
#[derive(Debug)]
pub struct AssociationProxy {
    name: String,
    target_collection: String,
    value_attr: String,
}

impl AssociationProxy {
    pub fn new(
        name: impl Into<String>,
        target_collection: impl Into<String>,
        value_attr: impl Into<String>,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        let target_collection = target_collection.into();
        let value_attr = value_attr.into();
        validate_attribute_key(&name)?;
        validate_attribute_key(&target_collection)?;
        validate_attribute_key(&value_attr)?;
        Ok(Arc::new(Self {
            name,
            target_collection,
            value_attr,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Relationship the proxy reads through.
    pub fn target_collection(&self) -> &str {
        &self.target_collection
    }

    /// Attribute read on each member.
    pub fn value_attr(&self) -> &str {
        &self.value_attr
    }

    pub fn extension_type(&self) -> ExtensionType {
        ExtensionType::AssociationProxy
    }
}

/// One item of `Mapper::all_orm_descriptors`.
#[derive(Debug, Clone)]
pub enum OrmDescriptor {
    Attribute(Arc<QueryableAttribute>),
    Hybrid(Arc<HybridProperty>),
    HybridMethod(Arc<HybridMethod>),
    AssociationProxy(Arc<AssociationProxy>),
}

impl OrmDescriptor {
    pub fn extension_type(&self) -> ExtensionType {
        match self {
            OrmDescriptor::Attribute(_) => ExtensionType::NotExtension,
            OrmDescriptor::Hybrid(h) => h.extension_type(),
            OrmDescriptor::HybridMethod(m) => m.extension_type(),
            OrmDescriptor::AssociationProxy(p) => p.extension_type(),
        }
    }

    /// Key the descriptor is exposed under.
    pub fn key(&self) -> &str {
        match self {
            OrmDescriptor::Attribute(a) => a.key(),
            OrmDescriptor::Hybrid(h) => h.name(),
            OrmDescriptor::HybridMethod(m) => m.name(),
            OrmDescriptor::AssociationProxy(p) => p.name(),
        }
    }

    /// Identity comparison with another descriptor.
    pub fn ptr_eq(&self, other: &OrmDescriptor) -> bool {
        match (self, other) {
            (OrmDescriptor::Attribute(a), OrmDescriptor::Attribute(b)) => Arc::ptr_eq(a, b),
            (OrmDescriptor::Hybrid(a), OrmDescriptor::Hybrid(b)) => Arc::ptr_eq(a, b),
            (OrmDescriptor::HybridMethod(a), OrmDescriptor::HybridMethod(b)) => Arc::ptr_eq(a, b),
            (OrmDescriptor::AssociationProxy(a), OrmDescriptor::AssociationProxy(b)) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }

    pub fn as_attribute(&self) -> Option<&Arc<QueryableAttribute>> {
        match self {
            OrmDescriptor::Attribute(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_hybrid(&self) -> Option<&Arc<HybridProperty>> {
        match self {
            OrmDescriptor::Hybrid(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_association_proxy(&self) -> Option<&Arc<AssociationProxy>> {
        match self {
            OrmDescriptor::AssociationProxy(p) => Some(p),
            _ => None,
        }
    }
}
