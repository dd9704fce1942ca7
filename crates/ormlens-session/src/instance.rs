//! Instances of mapped classes.

use std::fmt;
use std::sync::{Arc, Weak};

use ormlens_core::{Error, Result, Value};
use ormlens_mapper::{AttributeSource, Class, ClassAttribute};

use crate::state::InstanceState;

/// The value held by one attribute slot.
#[derive(Clone)]
pub enum AttrValue {
    /// A column value.
    Scalar(Value),
    /// A scalar reference; `None` when empty.
    Object(Option<Instance>),
    /// A collection of related instances.
    Collection(Vec<Instance>),
}

impl AttrValue {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            AttrValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<Option<&Instance>> {
        match self {
            AttrValue::Object(o) => Some(o.as_ref()),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&[Instance]> {
        match self {
            AttrValue::Collection(c) => Some(c),
            _ => None,
        }
    }

    /// The scalar value, or NULL for non-scalars.
    pub(crate) fn to_scalar(&self) -> Value {
        self.as_scalar().cloned().unwrap_or(Value::Null)
    }

    /// Related instances: a collection's members or a set reference.
    pub(crate) fn to_collection(&self) -> Vec<Instance> {
        match self {
            AttrValue::Collection(c) => c.clone(),
            AttrValue::Object(Some(i)) => vec![i.clone()],
            AttrValue::Object(None) | AttrValue::Scalar(_) => Vec::new(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AttrValue::Scalar(_) => "scalar",
            AttrValue::Object(_) => "object reference",
            AttrValue::Collection(_) => "collection",
        }
    }
}

impl PartialEq for AttrValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttrValue::Scalar(a), AttrValue::Scalar(b)) => a == b,
            (AttrValue::Object(a), AttrValue::Object(b)) => match (a, b) {
                (Some(a), Some(b)) => a.ptr_eq(b),
                (None, None) => true,
                _ => false,
            },
            (AttrValue::Collection(a), AttrValue::Collection(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.ptr_eq(y))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Scalar(v) => write!(f, "{}", v),
            AttrValue::Object(Some(i)) => write!(f, "{:?}", i),
            AttrValue::Object(None) => write!(f, "None"),
            AttrValue::Collection(c) => f.debug_list().entries(c).finish(),
        }
    }
}

impl From<Value> for AttrValue {
    fn from(v: Value) -> Self {
        AttrValue::Scalar(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Scalar(v.into())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Scalar(v.into())
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Scalar(v.into())
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Scalar(v.into())
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Scalar(v.into())
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Scalar(v.into())
    }
}

impl From<Instance> for AttrValue {
    fn from(i: Instance) -> Self {
        AttrValue::Object(Some(i))
    }
}

impl From<&Instance> for AttrValue {
    fn from(i: &Instance) -> Self {
        AttrValue::Object(Some(i.clone()))
    }
}

impl From<Option<Instance>> for AttrValue {
    fn from(i: Option<Instance>) -> Self {
        AttrValue::Object(i)
    }
}

impl From<Vec<Instance>> for AttrValue {
    fn from(items: Vec<Instance>) -> Self {
        AttrValue::Collection(items)
    }
}

pub(crate) struct InstanceInner {
    class: Class,
    state: Option<Arc<InstanceState>>,
}

/// A shared handle to an object of a runtime class.
///
/// Instances of mapped classes carry an [`InstanceState`]; instances of
/// unmapped classes carry none and reject attribute access.
#[derive(Clone)]
pub struct Instance(Arc<InstanceInner>);

impl Instance {
    /// Create a transient instance of `class`.
    pub fn new(class: &Class) -> Self {
        let mapper = class.mapper();
        Instance(Arc::new_cyclic(|weak: &Weak<InstanceInner>| InstanceInner {
            class: class.clone(),
            state: mapper.map(|m| Arc::new(InstanceState::new(m, weak.clone()))),
        }))
    }

    pub(crate) fn from_inner(inner: Arc<InstanceInner>) -> Self {
        Instance(inner)
    }

    pub fn class(&self) -> &Class {
        &self.0.class
    }

    /// The instance state, if the class is mapped.
    pub fn state(&self) -> Option<&Arc<InstanceState>> {
        self.0.state.as_ref()
    }

    /// The instance state, or an unmapped-instance error.
    pub fn instance_state(&self) -> Result<&Arc<InstanceState>> {
        self.0
            .state
            .as_ref()
            .ok_or_else(|| Error::UnmappedInstance(self.0.class.name().to_string()))
    }

    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Read an attribute: a mapped attribute (loading it if needed) or a
    /// hybrid property evaluated against this instance.
    pub fn get(&self, key: &str) -> Result<AttrValue> {
        if let Some((_, ClassAttribute::Hybrid(h))) = self.0.class.lookup(key) {
            return Ok(AttrValue::Scalar(h.get(self)?));
        }
        self.instance_state()?.get(key)
    }

    /// Read a scalar attribute.
    pub fn get_scalar(&self, key: &str) -> Result<Value> {
        match self.get(key)? {
            AttrValue::Scalar(v) => Ok(v),
            other => Err(kind_mismatch(key, "scalar", &other)),
        }
    }

    /// Read a many-to-one reference.
    pub fn get_object(&self, key: &str) -> Result<Option<Instance>> {
        match self.get(key)? {
            AttrValue::Object(o) => Ok(o),
            other => Err(kind_mismatch(key, "object reference", &other)),
        }
    }

    /// Read a collection.
    pub fn get_collection(&self, key: &str) -> Result<Vec<Instance>> {
        match self.get(key)? {
            AttrValue::Collection(c) => Ok(c),
            other => Err(kind_mismatch(key, "collection", &other)),
        }
    }

    /// Assign a mapped attribute.
    pub fn set(&self, key: &str, value: impl Into<AttrValue>) -> Result<()> {
        if let Some((_, attr)) = self.0.class.lookup(key) {
            if !matches!(
                attr,
                ClassAttribute::Instrumented | ClassAttribute::Value(_) | ClassAttribute::Object(_)
            ) {
                return Err(Error::invalid_request(format!(
                    "can't set attribute '{}' on {:?}; it is a read-only descriptor",
                    key, self
                )));
            }
        }
        self.instance_state()?.set(key, value.into())
    }

    /// Append to a collection attribute, loading it first if needed.
    pub fn append(&self, key: &str, item: &Instance) -> Result<()> {
        let state = self.instance_state()?;
        let mut items = match state.get(key)? {
            AttrValue::Collection(c) => c,
            other => return Err(kind_mismatch(key, "collection", &other)),
        };
        items.push(item.clone());
        state.set(key, AttrValue::Collection(items))
    }

    /// Remove `item` from a collection attribute.
    pub fn remove(&self, key: &str, item: &Instance) -> Result<()> {
        let state = self.instance_state()?;
        let mut items = match state.get(key)? {
            AttrValue::Collection(c) => c,
            other => return Err(kind_mismatch(key, "collection", &other)),
        };
        let before = items.len();
        items.retain(|i| !i.ptr_eq(item));
        if items.len() == before {
            return Err(Error::invalid_request(format!(
                "{:?} is not in collection '{}'",
                item, key
            )));
        }
        state.set(key, AttrValue::Collection(items))
    }

    /// Whether a value is present in the slot for `key` (set or loaded).
    pub fn is_loaded(&self, key: &str) -> Result<bool> {
        Ok(self.instance_state()?.attr(key)?.loaded_value().is_some())
    }

    /// Invoke a hybrid method against this instance.
    pub fn call(&self, key: &str, args: &[Value]) -> Result<Value> {
        match self.0.class.lookup(key) {
            Some((_, ClassAttribute::HybridMethod(m))) => m.call(self, args),
            _ => Err(Error::invalid_request(format!(
                "'{}' is not a hybrid method of class '{}'",
                key,
                self.0.class.name()
            ))),
        }
    }

    /// Values read through an association proxy.
    pub fn proxy_values(&self, key: &str) -> Result<Vec<Value>> {
        let Some((_, ClassAttribute::AssociationProxy(proxy))) = self.0.class.lookup(key) else {
            return Err(Error::invalid_request(format!(
                "'{}' is not an association proxy of class '{}'",
                key,
                self.0.class.name()
            )));
        };
        self.get_collection(proxy.target_collection())?
            .iter()
            .map(|member| member.get_scalar(proxy.value_attr()))
            .collect()
    }
}

impl AttributeSource for Instance {
    fn attribute_value(&self, key: &str) -> Result<Value> {
        self.get_scalar(key)
    }
}

fn kind_mismatch(key: &str, expected: &str, found: &AttrValue) -> Error {
    Error::invalid_request(format!(
        "attribute '{}' holds a {}, not a {}",
        key,
        found.kind(),
        expected
    ))
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} at {:p}>", self.0.class.name(), Arc::as_ptr(&self.0))
    }
}
