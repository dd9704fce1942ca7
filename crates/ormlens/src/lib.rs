//! ormlens - runtime inspection of ORM mappings, instances and attribute history.
//!
//! A single entry point, [`inspect`], turns any library object into an
//! [`Inspection`] view:
//!
//! - a mapped [`Class`] or a [`Mapper`] gives the class-level mapping metadata
//! - an [`Instance`] gives its [`InstanceState`]: lifecycle, identity and
//!   per-attribute value, loaded value and history
//! - an [`AliasedClass`] gives its aliased entity
//! - class attributes, mapper properties, descriptors and selectables give
//!   themselves
//!
//! Handlers for other types can be added with [`register_inspection`], and
//! type ancestry declared with [`declare_subtype`].
//!
//! # Quick Start
//!
//! ```ignore
//! use ormlens::prelude::*;
//!
//! let registry = Registry::new();
//! let user = registry.declare(
//!     Declarative::new("User")
//!         .table("users")
//!         .column(Column::integer("id").primary_key(true))
//!         .column(Column::new("name", SqlType::Text)),
//! )?;
//!
//! let mapper = inspect(&user)?.mapper().unwrap();
//! assert_eq!(mapper.attrs().keys(), ["id", "name"]);
//!
//! let session = Session::new(Arc::new(MemoryStorage::new()));
//! let u = Instance::new(&user);
//! u.set("name", "ed")?;
//! session.add(&u)?;
//! session.flush()?;
//!
//! let insp = inspect(&u)?;
//! let state = insp.as_instance().unwrap();
//! assert!(state.persistent());
//! assert_eq!(state.attr("name")?.loaded_value(), Some(Value::from("ed")));
//! ```

pub mod inspection;
pub mod view;

pub use inspection::{
    InspectionRegistry, declare_subtype, global_registry, inspect, inspect_opt,
    register_inspection,
};
pub use view::Inspection;

pub use ormlens_core::{
    Alias, Column, ColumnRef, Error, FieldInfo, Join, MappingError, MappingErrorKind, MetaData,
    Model, RelationshipInfo, RelationshipKind, Result, Row, Selectable, SessionError,
    SessionErrorKind, SqlType, Table, TableRef, Value,
};
pub use ormlens_mapper::{
    AliasedClass, AliasedInsp, AssociationProxy, AttributeSource, Class, ClassAttribute,
    ColumnProperty, Declarative, Entity, Expression, ExtensionType, HybridMethod, HybridProperty,
    IdentityKey, Mapper, MapperConfig, MapperProperty, OrmDescriptor, Properties, PropertyConfig,
    QueryableAttribute, Registry, RelationshipConfig, RelationshipProperty, SynonymProperty,
    aliased, column_property, relationship, relationship_to, synonym,
};
pub use ormlens_session::{
    AttrValue, AttributeState, History, HistoryItem, Instance, InstanceState, Lifecycle,
    MemoryStorage, Session, SessionConfig, Storage,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use ormlens::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        AliasedClass, AttrValue, Class, Column, Declarative, Error, History, Inspection, Instance,
        Lifecycle, Mapper, MapperConfig, MemoryStorage, Registry, Result, Session, SessionConfig,
        SqlType, Table, Value, aliased, inspect, inspect_opt, relationship, relationship_to,
        synonym,
    };
    pub use std::sync::Arc;
}
