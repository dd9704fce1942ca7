//! Per-instance persistence state and attribute slots.
//!
//! Each attribute slot keeps three things apart:
//!
//! - `value`: what is present in the instance, because it was set or loaded
//! - `materialized`: a default produced by reading an absent attribute
//! - `original`: the value seen at the first change after the last flush
//!
//! Only `value` counts as loaded, and only `value` feeds history.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use ormlens_core::{Error, Result, SessionErrorKind, Value};
use ormlens_mapper::{IdentityKey, Mapper, MapperProperty, Properties};

use crate::history::{History, Original};
use crate::instance::{AttrValue, Instance, InstanceInner};
use crate::{Session, SessionShared};

#[derive(Debug, Clone, Default)]
pub(crate) struct Slot {
    pub(crate) value: Option<AttrValue>,
    pub(crate) materialized: Option<AttrValue>,
    pub(crate) original: Original,
}

/// Lifecycle of an instance relative to a session and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Not in a session, no identity.
    Transient,
    /// In a session, not yet flushed.
    Pending,
    /// In a session with an identity.
    Persistent,
    /// Has an identity but no session.
    Detached,
}

/// Instance-level inspection of a mapped object.
pub struct InstanceState {
    mapper: Arc<Mapper>,
    obj: Weak<InstanceInner>,
    slots: Mutex<HashMap<String, Slot>>,
    key: Mutex<Option<IdentityKey>>,
    session: Mutex<Option<Weak<SessionShared>>>,
    info: Mutex<serde_json::Map<String, serde_json::Value>>,
}

impl InstanceState {
    pub(crate) fn new(mapper: Arc<Mapper>, obj: Weak<InstanceInner>) -> Self {
        Self {
            mapper,
            obj,
            slots: Mutex::new(HashMap::new()),
            key: Mutex::new(None),
            session: Mutex::new(None),
            info: Mutex::new(serde_json::Map::new()),
        }
    }

    pub fn mapper(&self) -> &Arc<Mapper> {
        &self.mapper
    }

    /// The instance this state belongs to, while it is alive.
    pub fn object(&self) -> Option<Instance> {
        self.obj.upgrade().map(Instance::from_inner)
    }

    pub fn is_instance(&self) -> bool {
        true
    }

    pub fn is_mapper(&self) -> bool {
        false
    }

    pub fn is_aliased_class(&self) -> bool {
        false
    }

    pub fn is_selectable(&self) -> bool {
        false
    }

    pub fn lifecycle(&self) -> Lifecycle {
        let attached = self.session_shared().is_some();
        let has_key = self.key_lock().is_some();
        match (attached, has_key) {
            (false, false) => Lifecycle::Transient,
            (true, false) => Lifecycle::Pending,
            (true, true) => Lifecycle::Persistent,
            (false, true) => Lifecycle::Detached,
        }
    }

    pub fn transient(&self) -> bool {
        self.lifecycle() == Lifecycle::Transient
    }

    pub fn pending(&self) -> bool {
        self.lifecycle() == Lifecycle::Pending
    }

    pub fn persistent(&self) -> bool {
        self.lifecycle() == Lifecycle::Persistent
    }

    pub fn detached(&self) -> bool {
        self.lifecycle() == Lifecycle::Detached
    }

    /// Primary key values, once the instance has been persisted.
    pub fn identity(&self) -> Option<Vec<Value>> {
        self.key_lock().as_ref().map(|k| k.values().to_vec())
    }

    pub fn identity_key(&self) -> Option<IdentityKey> {
        self.key_lock().clone()
    }

    /// The session this instance is attached to.
    pub fn session(&self) -> Option<Session> {
        self.session_shared().map(Session::from_shared)
    }

    /// Free-form user data attached to this state.
    pub fn info(&self) -> MutexGuard<'_, serde_json::Map<String, serde_json::Value>> {
        self.info.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attribute states for every mapper property, in property order.
    pub fn attrs(self: &Arc<Self>) -> Properties<AttributeState> {
        self.mapper
            .attrs()
            .iter()
            .map(|(key, _)| {
                (
                    key.to_string(),
                    AttributeState {
                        state: Arc::clone(self),
                        key: key.to_string(),
                    },
                )
            })
            .collect()
    }

    /// The attribute state for `key`.
    pub fn attr(self: &Arc<Self>, key: &str) -> Result<AttributeState> {
        self.mapper.get_property(key)?;
        Ok(AttributeState {
            state: Arc::clone(self),
            key: key.to_string(),
        })
    }

    /// Keys of properties with no value present.
    pub fn unloaded(&self) -> Vec<String> {
        let slots = self.slots_lock();
        self.mapper
            .attrs()
            .iter()
            .filter(|(_, p)| p.as_synonym().is_none())
            .filter(|(k, _)| slots.get(*k).is_none_or(|s| s.value.is_none()))
            .map(|(k, _)| k.to_string())
            .collect()
    }

    /// Whether any attribute changed since the last flush.
    pub fn has_changes(&self) -> bool {
        self.slots_lock().values().any(|s| s.original.is_modified())
    }

    /// Resolve `key` through synonyms to the property that owns the slot.
    pub(crate) fn resolve(&self, key: &str) -> Result<MapperProperty> {
        match self.mapper.get_property(key)? {
            MapperProperty::Synonym(s) => self.mapper.get_property(s.name()),
            other => Ok(other),
        }
    }

    pub(crate) fn loaded(&self, key: &str) -> Option<AttrValue> {
        self.slots_lock().get(key).and_then(|s| s.value.clone())
    }

    /// Read an attribute, loading it when the instance has an identity.
    pub(crate) fn get(&self, key: &str) -> Result<AttrValue> {
        let property = self.resolve(key)?;
        let key = property.key();
        if let Some(v) = self.loaded(key) {
            return Ok(v);
        }
        if self.key_lock().is_some() {
            let session = self.bound_session(key)?;
            session.load_attribute(self, &property)?;
            if let Some(v) = self.loaded(key) {
                return Ok(v);
            }
        }
        self.materialize(&property)
    }

    fn materialize(&self, property: &MapperProperty) -> Result<AttrValue> {
        let default = match property {
            MapperProperty::Relationship(r) if r.uselist()? => AttrValue::Collection(Vec::new()),
            MapperProperty::Relationship(_) => AttrValue::Object(None),
            _ => AttrValue::Scalar(Value::Null),
        };
        let mut slots = self.slots_lock();
        let slot = slots.entry(property.key().to_string()).or_default();
        Ok(slot.materialized.get_or_insert(default).clone())
    }

    pub(crate) fn set(&self, key: &str, value: AttrValue) -> Result<()> {
        let property = self.resolve(key)?;
        self.check_assignable(&property, &value)?;
        let mut slots = self.slots_lock();
        let slot = slots.entry(property.key().to_string()).or_default();
        if !slot.original.is_modified() {
            slot.original = slot
                .value
                .clone()
                .map_or(Original::NoValue, Original::Value);
        }
        slot.value = Some(value);
        slot.materialized = None;
        Ok(())
    }

    fn check_assignable(&self, property: &MapperProperty, value: &AttrValue) -> Result<()> {
        let fits = match (property, value) {
            (MapperProperty::Column(_), AttrValue::Scalar(_)) => true,
            (MapperProperty::Relationship(r), AttrValue::Collection(items)) => {
                r.uselist()? && self.related_fit(r.mapper()?.as_ref(), items)
            }
            (MapperProperty::Relationship(r), AttrValue::Object(item)) => {
                !r.uselist()? && self.related_fit(r.mapper()?.as_ref(), item.as_slice())
            }
            _ => false,
        };
        if fits {
            Ok(())
        } else {
            Err(Error::invalid_request(format!(
                "can't assign {:?} to attribute '{}.{}'",
                value,
                self.mapper.class().name(),
                property.key()
            )))
        }
    }

    fn related_fit(&self, target: &Mapper, items: &[Instance]) -> bool {
        items
            .iter()
            .all(|i| i.class().is_subclass_of(target.class()))
    }

    /// History of `key` without loading.
    pub(crate) fn history(&self, key: &str) -> Result<History> {
        let property = self.resolve(key)?;
        let slots = self.slots_lock();
        let Some(slot) = slots.get(property.key()) else {
            return Ok(History::empty());
        };
        Ok(match (&slot.value, &property) {
            (Some(AttrValue::Scalar(v)), _) => History::from_scalar(Some(v), &slot.original),
            (Some(AttrValue::Object(o)), _) => History::from_object(Some(o), &slot.original),
            (Some(AttrValue::Collection(c)), _) => {
                History::from_collection(Some(c), &slot.original)
            }
            (None, MapperProperty::Column(_)) => History::from_scalar(None, &slot.original),
            (None, _) => History::empty(),
        })
    }

    /// Load `key` if it is absent and loadable, then report history.
    pub(crate) fn load_history(&self, key: &str) -> Result<History> {
        let property = self.resolve(key)?;
        if self.loaded(property.key()).is_none() && self.key_lock().is_some() {
            let session = self.bound_session(property.key())?;
            session.load_attribute(self, &property)?;
        }
        self.history(key)
    }

    /// Fill an absent slot with a loaded value. Present values win.
    pub(crate) fn populate(&self, key: &str, value: AttrValue) {
        let mut slots = self.slots_lock();
        let slot = slots.entry(key.to_string()).or_default();
        if slot.value.is_none() {
            slot.value = Some(value);
            slot.materialized = None;
        }
    }

    /// Overwrite a slot without recording history.
    pub(crate) fn write_committed(&self, key: &str, value: AttrValue) {
        let mut slots = self.slots_lock();
        let slot = slots.entry(key.to_string()).or_default();
        slot.value = Some(value);
        slot.materialized = None;
    }

    /// Snapshot of all slots.
    pub(crate) fn slots(&self) -> HashMap<String, Slot> {
        self.slots_lock().clone()
    }

    /// Sync point: forget originals and materialized defaults.
    pub(crate) fn commit_all(&self) {
        for slot in self.slots_lock().values_mut() {
            slot.original = Original::Unmodified;
            slot.materialized = None;
        }
    }

    /// Evict slots for `keys`, or all slots.
    pub(crate) fn expire(&self, keys: Option<&[String]>) {
        let mut slots = self.slots_lock();
        match keys {
            Some(keys) => {
                for key in keys {
                    slots.remove(key);
                }
            }
            None => slots.clear(),
        }
    }

    pub(crate) fn set_identity(&self, key: Option<IdentityKey>) {
        *self.key_lock() = key;
    }

    pub(crate) fn attach(&self, session: Weak<SessionShared>) {
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(session);
    }

    pub(crate) fn detach(&self) {
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub(crate) fn session_shared(&self) -> Option<Arc<SessionShared>> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn bound_session(&self, key: &str) -> Result<Session> {
        self.session().ok_or_else(|| {
            Error::session(
                SessionErrorKind::DetachedInstance,
                format!(
                    "parent instance {} is not bound to a session; lazy load operation of attribute '{}' cannot proceed",
                    self.describe(),
                    key
                ),
            )
        })
    }

    fn describe(&self) -> String {
        match self.object() {
            Some(obj) => format!("{:?}", obj),
            None => format!("<{} (dropped)>", self.mapper.class().name()),
        }
    }

    fn slots_lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key_lock(&self) -> MutexGuard<'_, Option<IdentityKey>> {
        self.key.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceState")
            .field("object", &self.describe())
            .field("lifecycle", &self.lifecycle())
            .field("identity", &self.identity_key())
            .finish()
    }
}

/// Inspection of one attribute of one instance.
#[derive(Clone)]
pub struct AttributeState {
    state: Arc<InstanceState>,
    key: String,
}

impl AttributeState {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> &Arc<InstanceState> {
        &self.state
    }

    /// The current value, loading it or materializing a default if absent.
    pub fn value(&self) -> Result<AttrValue> {
        self.state.get(&self.key)
    }

    /// The value present in the instance, if it was set or loaded.
    ///
    /// A default materialized by [`value`](Self::value) does not count.
    pub fn loaded_value(&self) -> Option<AttrValue> {
        let property = self.state.resolve(&self.key).ok()?;
        self.state.loaded(property.key())
    }

    /// Changes since the last flush, without loading.
    pub fn history(&self) -> Result<History> {
        self.state.history(&self.key)
    }

    /// Load the attribute if needed, then report its history.
    pub fn load_history(&self) -> Result<History> {
        self.state.load_history(&self.key)
    }
}

impl fmt::Debug for AttributeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeState")
            .field("key", &self.key)
            .field("loaded_value", &self.loaded_value())
            .finish()
    }
}
