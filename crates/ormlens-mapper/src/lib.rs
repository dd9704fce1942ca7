//! Class mapping for ormlens.
//!
//! `ormlens-mapper` turns runtime [`Class`] objects and core [`Table`]s into
//! [`Mapper`]s with ordered properties, class-bound attributes and aliased
//! views. Mappers are owned by a [`Registry`].
//!
//! [`Table`]: ormlens_core::Table

pub mod aliased;
pub mod attributes;
pub mod class;
pub mod descriptor;
pub mod identity;
pub mod mapper;
pub mod properties;
pub mod property;
pub mod registry;

pub use aliased::{AliasedClass, AliasedInsp, aliased};
pub use attributes::{Entity, Expression, QueryableAttribute};
pub use class::{Class, ClassAttribute};
pub use descriptor::{
    AssociationProxy, AttributeSource, ExtensionType, HybridMethod, HybridProperty, OrmDescriptor,
};
pub use identity::IdentityKey;
pub use mapper::{Mapper, MapperConfig};
pub use properties::Properties;
pub use property::{
    ColumnProperty, MapperProperty, PropertyConfig, RelationshipConfig, RelationshipJoin,
    RelationshipProperty, RelationshipTarget, SynonymProperty, column_property, relationship,
    relationship_to, synonym,
};
pub use registry::{Declarative, Registry};
