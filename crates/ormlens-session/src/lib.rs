//! Instance state, attribute history and the session for ormlens.
//!
//! `ormlens-session` is the **state-tracking layer**. Every instance of a
//! mapped class carries an [`InstanceState`] recording which attributes are
//! loaded, what changed since the last flush, and where the instance stands in
//! its lifecycle:
//!
//! ```text
//! transient --add--> pending --flush--> persistent --expunge--> detached
//! ```
//!
//! A [`Session`] tracks instances, writes them to a [`Storage`] on flush and
//! loads unloaded attributes on access.
//!
//! # Design
//!
//! - **Explicit over implicit**: No autoflush by default.
//! - **Shared handles**: `Session`, `Instance` and `InstanceState` are cheap
//!   clones of shared state; instances refer back to their session weakly.
//! - **No transactions**: commit is flush plus expiry.
//!
//! # Example
//!
//! ```ignore
//! let session = Session::new(Arc::new(MemoryStorage::new()));
//! let u = Instance::new(&user);
//! u.set("name", "ed")?;
//! session.add(&u)?;
//! session.commit()?;
//! assert!(u.state().unwrap().persistent());
//! ```

pub mod flush;
pub mod history;
pub mod identity_map;
pub mod instance;
mod loading;
pub mod state;
pub mod storage;

pub use flush::FlushOrderer;
pub use history::{History, HistoryItem};
pub use identity_map::IdentityMap;
pub use instance::{AttrValue, Instance};
pub use state::{AttributeState, InstanceState, Lifecycle};
pub use storage::{MemoryStorage, Storage};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ormlens_core::{Error, Result, SessionErrorKind, Value};
use ormlens_mapper::Mapper;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration for Session behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Whether to auto-flush before storage reads.
    pub auto_flush: bool,
    /// Whether to expire all persistent instances after commit.
    pub expire_on_commit: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_flush: false,
            expire_on_commit: true,
        }
    }
}

#[derive(Default)]
struct SessionInner {
    /// Pending instances in add order.
    new: Vec<Instance>,
    identity_map: IdentityMap,
}

pub(crate) struct SessionShared {
    id: u64,
    storage: Arc<dyn Storage>,
    config: SessionConfig,
    inner: Mutex<SessionInner>,
    flushing: AtomicBool,
}

/// The unit-of-work session. Clones share the same session.
#[derive(Clone)]
pub struct Session(Arc<SessionShared>);

impl Session {
    /// Create a session over `storage` with default configuration.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_config(storage, SessionConfig::default())
    }

    pub fn with_config(storage: Arc<dyn Storage>, config: SessionConfig) -> Self {
        Session(Arc::new(SessionShared {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            storage,
            config,
            inner: Mutex::new(SessionInner::default()),
            flushing: AtomicBool::new(false),
        }))
    }

    pub(crate) fn from_shared(shared: Arc<SessionShared>) -> Self {
        Session(shared)
    }

    /// Process-unique session id.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.0.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.0.storage
    }

    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn inner(&self) -> MutexGuard<'_, SessionInner> {
        self.0.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn owns(&self, state: &InstanceState) -> bool {
        state
            .session_shared()
            .is_some_and(|s| Arc::ptr_eq(&s, &self.0))
    }

    /// Attach an instance. Transient instances become pending; detached
    /// instances return to the identity map.
    #[tracing::instrument(level = "debug", skip_all, fields(session = self.0.id))]
    pub fn add(&self, instance: &Instance) -> Result<()> {
        let state = instance.instance_state()?;
        if let Some(other) = state.session_shared() {
            if Arc::ptr_eq(&other, &self.0) {
                return Ok(());
            }
            return Err(Error::session(
                SessionErrorKind::AlreadyAttached,
                format!(
                    "object {:?} is already attached to session {} (this is {})",
                    instance, other.id, self.0.id
                ),
            ));
        }

        let mut inner = self.inner();
        match state.identity_key() {
            Some(key) => {
                if let Some(existing) = inner.identity_map.get(&key) {
                    if !existing.ptr_eq(instance) {
                        return Err(Error::invalid_request(format!(
                            "can't attach instance {:?}; another instance with key {:?} is already present in this session",
                            instance, key
                        )));
                    }
                }
                inner.identity_map.insert(key, instance.clone());
            }
            None => inner.new.push(instance.clone()),
        }
        state.attach(Arc::downgrade(&self.0));
        tracing::debug!(instance = ?instance, lifecycle = ?state.lifecycle(), "added instance");
        Ok(())
    }

    pub fn add_all<'a>(&self, instances: impl IntoIterator<Item = &'a Instance>) -> Result<()> {
        for instance in instances {
            self.add(instance)?;
        }
        Ok(())
    }

    /// Whether `instance` is pending or persistent in this session.
    pub fn contains(&self, instance: &Instance) -> bool {
        instance.state().is_some_and(|s| self.owns(s))
    }

    /// Pending instances in add order.
    pub fn new_instances(&self) -> Vec<Instance> {
        self.inner().new.clone()
    }

    /// Persistent instances in identity-map order.
    pub fn identity_map(&self) -> Vec<Instance> {
        self.inner().identity_map.instances()
    }

    /// Whether any attribute of `instance` has net changes since the last flush.
    pub fn is_modified(&self, instance: &Instance) -> Result<bool> {
        let state = instance.instance_state()?;
        for (key, _) in state.mapper().attrs().iter() {
            if state.history(key)?.has_changes() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Remove `instance` from the session. Pending instances become transient,
    /// persistent ones detached.
    #[tracing::instrument(level = "debug", skip_all, fields(session = self.0.id))]
    pub fn expunge(&self, instance: &Instance) -> Result<()> {
        let state = instance.instance_state()?;
        if !self.owns(state) {
            return Err(not_in_session(instance));
        }
        {
            let mut inner = self.inner();
            inner.new.retain(|i| !i.ptr_eq(instance));
            if let Some(key) = state.identity_key() {
                inner.identity_map.remove(&key);
            }
        }
        state.detach();
        tracing::debug!(instance = ?instance, lifecycle = ?state.lifecycle(), "expunged instance");
        Ok(())
    }

    /// Remove every instance from the session.
    #[tracing::instrument(level = "debug", skip_all, fields(session = self.0.id))]
    pub fn expunge_all(&self) {
        let instances: Vec<Instance> = {
            let mut inner = self.inner();
            let mut all = std::mem::take(&mut inner.new);
            all.extend(inner.identity_map.instances());
            inner.identity_map.clear();
            all
        };
        for instance in &instances {
            if let Some(state) = instance.state() {
                state.detach();
            }
        }
        tracing::debug!(count = instances.len(), "expunged all instances");
    }

    /// Flush, then expire all persistent instances if configured to.
    #[tracing::instrument(level = "debug", skip_all, fields(session = self.0.id))]
    pub fn commit(&self) -> Result<()> {
        self.flush()?;
        if self.0.config.expire_on_commit {
            self.expire_all();
        }
        tracing::debug!("commit complete");
        Ok(())
    }

    /// The instance with primary key `pk`, from the identity map or storage.
    #[tracing::instrument(level = "debug", skip(self, mapper), fields(session = self.0.id, class = %mapper.class().name()))]
    pub fn get(&self, mapper: &Arc<Mapper>, pk: &[Value]) -> Result<Option<Instance>> {
        let columns = mapper.primary_key();
        if pk.len() != columns.len() {
            let names: Vec<String> = columns.iter().map(|c| c.qualified_name()).collect();
            return Err(Error::invalid_request(format!(
                "Incorrect number of values in identifier: expected {} for primary key ({}), got {}",
                columns.len(),
                names.join(", "),
                pk.len()
            )));
        }
        let key = mapper.identity_key_from_primary_key(pk.to_vec());
        if key.has_null() {
            return Ok(None);
        }
        if let Some(found) = self.inner().identity_map.get(&key).cloned() {
            tracing::trace!("identity map hit");
            return Ok(found
                .class()
                .is_subclass_of(mapper.class())
                .then_some(found));
        }
        self.autoflush()?;
        self.load_identity(mapper, key)
    }

    /// Expire attributes of a persistent instance: `keys`, or all of them.
    #[tracing::instrument(level = "debug", skip(self, instance), fields(session = self.0.id))]
    pub fn expire(&self, instance: &Instance, keys: Option<&[&str]>) -> Result<()> {
        let state = self.persistent_state(instance)?;
        let keys = keys
            .map(|keys| {
                keys.iter()
                    .map(|k| state.resolve(k).map(|p| p.key().to_string()))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;
        state.expire(keys.as_deref());
        tracing::debug!(instance = ?instance, "expired attributes");
        Ok(())
    }

    /// Expire every attribute of every persistent instance.
    #[tracing::instrument(level = "debug", skip_all, fields(session = self.0.id))]
    pub fn expire_all(&self) {
        let instances = self.identity_map();
        for instance in &instances {
            if let Some(state) = instance.state() {
                state.expire(None);
            }
        }
        tracing::debug!(count = instances.len(), "expired all instances");
    }

    /// Expire and immediately reload the column attributes of `instance`.
    #[tracing::instrument(level = "debug", skip_all, fields(session = self.0.id))]
    pub fn refresh(&self, instance: &Instance) -> Result<()> {
        let state = self.persistent_state(instance)?;
        state.expire(None);
        self.load_columns(state)
    }

    fn persistent_state<'a>(&self, instance: &'a Instance) -> Result<&'a Arc<InstanceState>> {
        let state = instance.instance_state()?;
        if !self.owns(state) || state.identity_key().is_none() {
            return Err(Error::session(
                SessionErrorKind::NotInSession,
                format!("instance {:?} is not persistent within this session", instance),
            ));
        }
        Ok(state)
    }

    fn autoflush(&self) -> Result<()> {
        if self.0.config.auto_flush && !self.0.flushing.load(Ordering::Acquire) {
            tracing::trace!("autoflush");
            self.flush()?;
        }
        Ok(())
    }
}

fn not_in_session(instance: &Instance) -> Error {
    Error::session(
        SessionErrorKind::NotInSession,
        format!("instance {:?} is not present in this session", instance),
    )
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner();
        f.debug_struct("Session")
            .field("id", &self.0.id)
            .field("new", &inner.new.len())
            .field("identity_map", &inner.identity_map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormlens_core::{Column, Row, SqlType};
    use ormlens_mapper::{Class, Declarative, Registry, relationship_to};

    struct Fixture {
        _registry: Registry,
        user: Class,
        address: Class,
        storage: Arc<MemoryStorage>,
    }

    fn fixture() -> Fixture {
        let registry = Registry::new();
        let user = registry
            .declare(
                Declarative::new("User")
                    .table("users")
                    .column(Column::integer("id").primary_key(true))
                    .column(Column::new("name", SqlType::VarChar(30)).nullable(true))
                    .relationship("addresses", relationship_to("Address")),
            )
            .unwrap();
        let address = registry
            .declare(
                Declarative::new("Address")
                    .table("addresses")
                    .column(Column::integer("id").primary_key(true))
                    .column(Column::integer("user_id").references("users.id").nullable(true))
                    .column(Column::new("email_address", SqlType::VarChar(50)).nullable(true))
                    .relationship("user", relationship_to("User").uselist(false)),
            )
            .unwrap();
        Fixture {
            _registry: registry,
            user,
            address,
            storage: Arc::new(MemoryStorage::new()),
        }
    }

    fn lifecycle(instance: &Instance) -> Lifecycle {
        instance.state().unwrap().lifecycle()
    }

    #[test]
    fn lifecycle_transitions() {
        let f = fixture();
        let session = Session::new(f.storage.clone());
        let u = Instance::new(&f.user);
        u.set("name", "ed").unwrap();
        assert_eq!(lifecycle(&u), Lifecycle::Transient);
        session.add(&u).unwrap();
        assert_eq!(lifecycle(&u), Lifecycle::Pending);
        session.flush().unwrap();
        assert_eq!(lifecycle(&u), Lifecycle::Persistent);
        assert_eq!(u.state().unwrap().identity(), Some(vec![Value::BigInt(1)]));
        session.expunge(&u).unwrap();
        assert_eq!(lifecycle(&u), Lifecycle::Detached);
    }

    #[test]
    fn expunge_pending_returns_to_transient() {
        let f = fixture();
        let session = Session::new(f.storage.clone());
        let u = Instance::new(&f.user);
        session.add(&u).unwrap();
        session.expunge(&u).unwrap();
        assert_eq!(lifecycle(&u), Lifecycle::Transient);
        let err = session.expunge(&u).unwrap_err();
        assert_eq!(err.session_kind(), Some(SessionErrorKind::NotInSession));
    }

    #[test]
    fn add_to_second_session_fails() {
        let f = fixture();
        let s1 = Session::new(f.storage.clone());
        let s2 = Session::new(f.storage.clone());
        let u = Instance::new(&f.user);
        s1.add(&u).unwrap();
        let err = s2.add(&u).unwrap_err();
        assert_eq!(err.session_kind(), Some(SessionErrorKind::AlreadyAttached));
        drop(s1);
        assert_eq!(lifecycle(&u), Lifecycle::Transient);
        s2.add(&u).unwrap();
    }

    #[test]
    fn unmapped_instance_rejected() {
        let f = fixture();
        let session = Session::new(f.storage.clone());
        let plain = Instance::new(&Class::new("Plain"));
        assert!(matches!(session.add(&plain), Err(Error::UnmappedInstance(_))));
        assert!(matches!(plain.get("x"), Err(Error::UnmappedInstance(_))));
    }

    #[test]
    fn get_uses_identity_map_then_storage() {
        let f = fixture();
        let session = Session::new(f.storage.clone());
        let u = Instance::new(&f.user);
        u.set("name", "ed").unwrap();
        session.add(&u).unwrap();
        session.commit().unwrap();
        let mapper = f.user.class_mapper().unwrap();
        let again = session.get(&mapper, &[Value::Int(1)]).unwrap().unwrap();
        assert!(again.ptr_eq(&u));

        let other = Session::new(f.storage.clone());
        let loaded = other.get(&mapper, &[Value::BigInt(1)]).unwrap().unwrap();
        assert!(!loaded.ptr_eq(&u));
        assert_eq!(loaded.get_scalar("name").unwrap(), Value::from("ed"));
        assert!(other.get(&mapper, &[Value::BigInt(2)]).unwrap().is_none());
    }

    #[test]
    fn get_rejects_wrong_number_of_key_values() {
        let f = fixture();
        let session = Session::new(f.storage.clone());
        let u = Instance::new(&f.user);
        session.add(&u).unwrap();
        session.commit().unwrap();

        let other = Session::new(f.storage.clone());
        let mapper = f.user.class_mapper().unwrap();
        for pk in [&[][..], &[Value::BigInt(1), Value::BigInt(99)][..]] {
            let err = other.get(&mapper, pk).unwrap_err();
            assert!(matches!(
                &err,
                Error::InvalidRequest(m) if m.starts_with("Incorrect number of values in identifier")
            ));
        }
        assert!(other.identity_map().is_empty());
        let loaded = other.get(&mapper, &[Value::BigInt(1)]).unwrap().unwrap();
        assert_eq!(loaded.state().unwrap().identity(), Some(vec![Value::BigInt(1)]));
    }

    #[test]
    fn exhausted_autoincrement_fails_flush() {
        let f = fixture();
        let session = Session::new(f.storage.clone());
        let first = Instance::new(&f.user);
        first.set("id", i64::MAX).unwrap();
        session.add(&first).unwrap();
        session.flush().unwrap();

        let second = Instance::new(&f.user);
        session.add(&second).unwrap();
        let err = session.flush().unwrap_err();
        assert!(matches!(err, Error::Storage(m) if m == "autoincrement exhausted for users"));
        assert_eq!(lifecycle(&second), Lifecycle::Pending);
        assert_eq!(f.storage.row_count("users"), 1);
    }

    #[test]
    fn failed_flush_removes_inserted_rows_and_can_be_retried() {
        let f = fixture();
        let addresses = f.address.class_mapper().unwrap().local_table().clone();
        f.storage
            .insert(&addresses, Row::from_iter([("id", Value::BigInt(5))]))
            .unwrap();

        let session = Session::new(f.storage.clone());
        let u = Instance::new(&f.user);
        u.set("name", "ed").unwrap();
        let a = Instance::new(&f.address);
        a.set("id", 5i64).unwrap();
        u.append("addresses", &a).unwrap();
        session.add(&u).unwrap();

        let err = session.flush().unwrap_err();
        assert!(matches!(err, Error::Storage(m) if m.contains("addresses.id")));
        assert_eq!(lifecycle(&u), Lifecycle::Pending);
        assert_eq!(lifecycle(&a), Lifecycle::Pending);
        assert_eq!(f.storage.row_count("users"), 0);
        assert_eq!(f.storage.row_count("addresses"), 1);

        a.set("id", 6i64).unwrap();
        session.flush().unwrap();
        assert_eq!(lifecycle(&u), Lifecycle::Persistent);
        assert_eq!(lifecycle(&a), Lifecycle::Persistent);
        assert_eq!(f.storage.row_count("users"), 1);
        assert_eq!(f.storage.row_count("addresses"), 2);
        assert_eq!(a.get_scalar("user_id").unwrap(), u.get_scalar("id").unwrap());
        assert_eq!(u.get_scalar("name").unwrap(), Value::from("ed"));
    }

    #[test]
    fn flush_syncs_foreign_keys_and_lazy_loads() {
        let f = fixture();
        let session = Session::new(f.storage.clone());
        let u = Instance::new(&f.user);
        u.set("name", "ed").unwrap();
        let a = Instance::new(&f.address);
        a.set("email_address", "ed@wood.com").unwrap();
        u.append("addresses", &a).unwrap();
        session.add(&u).unwrap();
        session.commit().unwrap();

        assert!(session.contains(&a));
        assert_eq!(a.get_scalar("user_id").unwrap(), Value::BigInt(1));
        assert_eq!(f.storage.row_count("addresses"), 1);

        let other = Session::new(f.storage.clone());
        let mapper = f.user.class_mapper().unwrap();
        let loaded = other.get(&mapper, &[Value::BigInt(1)]).unwrap().unwrap();
        let addresses = loaded.get_collection("addresses").unwrap();
        assert_eq!(addresses.len(), 1);
        let back = addresses[0].get_object("user").unwrap().unwrap();
        assert!(back.ptr_eq(&loaded));
    }

    #[test]
    fn update_writes_only_modified_columns() {
        let f = fixture();
        let session = Session::new(f.storage.clone());
        let u = Instance::new(&f.user);
        u.set("name", "ed").unwrap();
        session.add(&u).unwrap();
        session.flush().unwrap();
        assert!(!session.is_modified(&u).unwrap());

        u.set("name", "jack").unwrap();
        assert!(session.is_modified(&u).unwrap());
        session.flush().unwrap();
        assert!(!session.is_modified(&u).unwrap());
        let users = f.user.class_mapper().unwrap().local_table().clone();
        let row = f
            .storage
            .fetch(&users, &Row::from_iter([("id", Value::BigInt(1))]))
            .unwrap()
            .unwrap();
        assert_eq!(row.get_by_name("name"), Some(&Value::from("jack")));
    }

    #[test]
    fn deleted_row_reports_object_deleted() {
        let f = fixture();
        let session = Session::new(f.storage.clone());
        let u = Instance::new(&f.user);
        u.set("name", "ed").unwrap();
        session.add(&u).unwrap();
        session.commit().unwrap();
        f.storage
            .delete_where("users", &Row::from_iter([("id", Value::BigInt(1))]));
        let err = u.get("name").unwrap_err();
        assert_eq!(err.session_kind(), Some(SessionErrorKind::ObjectDeleted));
    }

    #[test]
    fn detached_lazy_load_fails() {
        let f = fixture();
        let session = Session::new(f.storage.clone());
        let u = Instance::new(&f.user);
        session.add(&u).unwrap();
        session.commit().unwrap();
        session.expunge(&u).unwrap();
        let err = u.get("addresses").unwrap_err();
        assert_eq!(err.session_kind(), Some(SessionErrorKind::DetachedInstance));
    }

    #[test]
    fn expire_discards_pending_changes() {
        let f = fixture();
        let session = Session::new(f.storage.clone());
        let u = Instance::new(&f.user);
        u.set("name", "ed").unwrap();
        session.add(&u).unwrap();
        session.flush().unwrap();
        u.set("name", "jack").unwrap();
        session.expire(&u, Some(&["name"][..])).unwrap();
        assert!(!u.is_loaded("name").unwrap());
        assert_eq!(u.get_scalar("name").unwrap(), Value::from("ed"));
    }

    #[test]
    fn auto_flush_before_get() {
        let f = fixture();
        let config = SessionConfig {
            auto_flush: true,
            ..SessionConfig::default()
        };
        let session = Session::with_config(f.storage.clone(), config);
        let u = Instance::new(&f.user);
        u.set("id", 5i64).unwrap();
        session.add(&u).unwrap();
        let mapper = f.user.class_mapper().unwrap();
        let found = session.get(&mapper, &[Value::BigInt(5)]).unwrap().unwrap();
        assert!(found.ptr_eq(&u));
        assert!(u.state().unwrap().persistent());
    }
}
