//! The polymorphic result of `inspect`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use ormlens_core::Selectable;
use ormlens_mapper::{AliasedInsp, Mapper, MapperProperty, OrmDescriptor, QueryableAttribute};
use ormlens_session::InstanceState;

/// An inspection view. Each variant exposes a different capability subset;
/// the shared handles inside are the library objects themselves, so views
/// compare by identity with what they were produced from.
#[derive(Clone)]
pub enum Inspection {
    /// Class-level mapping metadata.
    Mapper(Arc<Mapper>),
    /// Persistence state of one mapped instance.
    Instance(Arc<InstanceState>),
    /// An aliased entity.
    Aliased(Arc<AliasedInsp>),
    /// A class-bound attribute.
    Attribute(Arc<QueryableAttribute>),
    Property(MapperProperty),
    /// Hybrid or association-proxy descriptor.
    Descriptor(OrmDescriptor),
    Selectable(Selectable),
    /// View produced by a third-party handler.
    Extension(Arc<dyn Any + Send + Sync>),
}

impl Inspection {
    /// Short name of the variant, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Inspection::Mapper(_) => "mapper",
            Inspection::Instance(_) => "instance",
            Inspection::Aliased(_) => "aliased",
            Inspection::Attribute(_) => "attribute",
            Inspection::Property(_) => "property",
            Inspection::Descriptor(_) => "descriptor",
            Inspection::Selectable(_) => "selectable",
            Inspection::Extension(_) => "extension",
        }
    }

    pub fn is_mapper(&self) -> bool {
        matches!(self, Inspection::Mapper(_))
    }

    pub fn is_instance(&self) -> bool {
        matches!(self, Inspection::Instance(_))
    }

    pub fn is_aliased_class(&self) -> bool {
        matches!(self, Inspection::Aliased(_))
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self, Inspection::Attribute(_))
    }

    pub fn is_property(&self) -> bool {
        matches!(self, Inspection::Property(_))
    }

    pub fn is_selectable(&self) -> bool {
        matches!(self, Inspection::Selectable(_))
    }

    pub fn as_mapper(&self) -> Option<&Arc<Mapper>> {
        match self {
            Inspection::Mapper(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Arc<InstanceState>> {
        match self {
            Inspection::Instance(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_aliased(&self) -> Option<&Arc<AliasedInsp>> {
        match self {
            Inspection::Aliased(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_attribute(&self) -> Option<&Arc<QueryableAttribute>> {
        match self {
            Inspection::Attribute(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_property(&self) -> Option<&MapperProperty> {
        match self {
            Inspection::Property(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_descriptor(&self) -> Option<&OrmDescriptor> {
        match self {
            Inspection::Descriptor(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_selectable(&self) -> Option<&Selectable> {
        match self {
            Inspection::Selectable(s) => Some(s),
            _ => None,
        }
    }

    /// The extension view, if it is a `T`.
    pub fn extension<T: Any>(&self) -> Option<&T> {
        match self {
            Inspection::Extension(e) => e.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// The mapper behind the view, for views that have one.
    ///
    /// Attributes and properties report their parent mapper.
    pub fn mapper(&self) -> Option<Arc<Mapper>> {
        match self {
            Inspection::Mapper(m) => Some(Arc::clone(m)),
            Inspection::Instance(s) => Some(Arc::clone(s.mapper())),
            Inspection::Aliased(a) => Some(Arc::clone(a.mapper())),
            Inspection::Attribute(a) => a.parent_mapper().ok(),
            Inspection::Property(p) => p.parent().ok(),
            Inspection::Descriptor(OrmDescriptor::Attribute(a)) => a.parent_mapper().ok(),
            Inspection::Descriptor(_) | Inspection::Selectable(_) | Inspection::Extension(_) => {
                None
            }
        }
    }
}

impl fmt::Debug for Inspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inspection::Mapper(m) => write!(f, "Inspection::Mapper({})", m.class().name()),
            Inspection::Instance(s) => {
                write!(f, "Inspection::Instance({}, {:?})", s.mapper().class().name(), s.lifecycle())
            }
            Inspection::Aliased(a) => write!(f, "Inspection::Aliased({})", a.name()),
            Inspection::Attribute(a) => write!(f, "Inspection::Attribute({:?})", a),
            Inspection::Property(p) => write!(f, "Inspection::Property({})", p.key()),
            Inspection::Descriptor(d) => write!(f, "Inspection::Descriptor({})", d.key()),
            Inspection::Selectable(s) => write!(f, "Inspection::Selectable({})", s.name()),
            Inspection::Extension(_) => write!(f, "Inspection::Extension(..)"),
        }
    }
}
