//! Type-keyed inspection dispatch.
//!
//! Handlers are registered per concrete type. Types may declare supertypes
//! through an upcast function; a lookup walks the declared ancestry
//! breadth-first, so the nearest ancestor with a handler wins and ties go to
//! the supertype declared first.

use std::any::{Any, TypeId, type_name};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ormlens_core::{Alias, Error, Join, MappingErrorKind, Result, Selectable, TableRef};
use ormlens_mapper::{
    AliasedClass, AliasedInsp, AssociationProxy, Class, ColumnProperty, HybridMethod,
    HybridProperty, Mapper, MapperProperty, OrmDescriptor, QueryableAttribute,
    RelationshipProperty, SynonymProperty,
};
use ormlens_session::{Instance, InstanceState};

use crate::view::Inspection;

type Handler = Arc<dyn Fn(&dyn Any) -> Option<Inspection> + Send + Sync>;

trait Upcast: Send + Sync {
    fn apply<'a>(&self, subject: &'a dyn Any) -> Option<&'a dyn Any>;
}

struct UpcastFn<Sub: 'static, Sup: 'static>(fn(&Sub) -> &Sup);

impl<Sub: Any, Sup: Any> Upcast for UpcastFn<Sub, Sup> {
    fn apply<'a>(&self, subject: &'a dyn Any) -> Option<&'a dyn Any> {
        subject
            .downcast_ref::<Sub>()
            .map(|s| (self.0)(s) as &dyn Any)
    }
}

struct Entry {
    type_name: &'static str,
    handler: Handler,
}

struct Edge {
    target: TypeId,
    upcast: Arc<dyn Upcast>,
}

#[derive(Default)]
struct Tables {
    handlers: HashMap<TypeId, Entry>,
    supertypes: HashMap<TypeId, Vec<Edge>>,
}

impl Tables {
    fn handle<T, F>(&mut self, handler: F)
    where
        T: Any,
        F: Fn(&T) -> Option<Inspection> + Send + Sync + 'static,
    {
        let handler: Handler =
            Arc::new(move |subject: &dyn Any| subject.downcast_ref::<T>().and_then(|s| handler(s)));
        self.handlers.insert(
            TypeId::of::<T>(),
            Entry {
                type_name: type_name::<T>(),
                handler,
            },
        );
    }

    fn edge<Sub: Any, Sup: Any>(&mut self, upcast: fn(&Sub) -> &Sup) {
        let edges = self.supertypes.entry(TypeId::of::<Sub>()).or_default();
        let target = TypeId::of::<Sup>();
        if edges.iter().any(|e| e.target == target) {
            return;
        }
        edges.push(Edge {
            target,
            upcast: Arc::new(UpcastFn(upcast)),
        });
    }

    /// Whether `to` is reachable from `from` along declared supertype edges.
    fn reaches(&self, from: TypeId, to: TypeId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(edges) = self.supertypes.get(&current) {
                stack.extend(edges.iter().map(|e| e.target));
            }
        }
        false
    }

    /// The nearest handler for `subject`, with the subject upcast to the
    /// handler's type.
    fn lookup<'a>(
        &self,
        subject: &'a dyn Any,
        id: TypeId,
    ) -> Option<(Handler, &'a dyn Any, &'static str, usize)> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([(subject, id, 0usize)]);
        while let Some((current, id, depth)) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(entry) = self.handlers.get(&id) {
                return Some((Arc::clone(&entry.handler), current, entry.type_name, depth));
            }
            for edge in self.supertypes.get(&id).into_iter().flatten() {
                if let Some(up) = edge.upcast.apply(current) {
                    queue.push_back((up, edge.target, depth + 1));
                }
            }
        }
        None
    }
}

/// A table of inspection handlers.
#[derive(Default)]
pub struct InspectionRegistry {
    tables: RwLock<Tables>,
}

impl InspectionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the handlers for every library type.
    pub fn with_builtins() -> Self {
        let mut tables = Tables::default();
        install_builtins(&mut tables);
        Self {
            tables: RwLock::new(tables),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register the handler for `T`. A handler returning `None` declines the
    /// subject. At most one handler exists per type.
    pub fn register<T, F>(&self, handler: F) -> Result<()>
    where
        T: Any,
        F: Fn(&T) -> Option<Inspection> + Send + Sync + 'static,
    {
        let mut tables = self.write();
        if tables.handlers.contains_key(&TypeId::of::<T>()) {
            return Err(Error::invalid_request(format!(
                "an inspection handler is already registered for {}",
                type_name::<T>()
            )));
        }
        tables.handle::<T, F>(handler);
        tracing::debug!(subject = type_name::<T>(), "registered inspection handler");
        Ok(())
    }

    pub fn is_registered<T: Any>(&self) -> bool {
        self.read().handlers.contains_key(&TypeId::of::<T>())
    }

    /// Declare `Sub` a subtype of `Sup`. Lookups for a `Sub` that find no
    /// handler of their own continue with `upcast(subject)`.
    pub fn declare_subtype<Sub: Any, Sup: Any>(&self, upcast: fn(&Sub) -> &Sup) -> Result<()> {
        let mut tables = self.write();
        let (sub, sup) = (TypeId::of::<Sub>(), TypeId::of::<Sup>());
        if tables.reaches(sup, sub) {
            return Err(Error::mapping(
                MappingErrorKind::AncestryCycle,
                format!(
                    "declaring {} a subtype of {} creates an ancestry cycle",
                    type_name::<Sub>(),
                    type_name::<Sup>()
                ),
            ));
        }
        tables.edge::<Sub, Sup>(upcast);
        Ok(())
    }

    /// Inspect `subject`, failing when no handler accepts it.
    pub fn inspect<T: Any>(&self, subject: &T) -> Result<Inspection> {
        self.inspect_opt(subject)
            .ok_or_else(|| Error::NoInspectionAvailable {
                type_name: type_name::<T>().to_string(),
            })
    }

    /// Inspect `subject`, returning `None` when no handler accepts it.
    pub fn inspect_opt<T: Any>(&self, subject: &T) -> Option<Inspection> {
        let found = self.read().lookup(subject, TypeId::of::<T>());
        let Some((handler, target, handler_type, depth)) = found else {
            tracing::trace!(subject = type_name::<T>(), "no inspection handler");
            return None;
        };
        let view = handler(target);
        tracing::trace!(
            subject = type_name::<T>(),
            handler = handler_type,
            depth,
            view = view.as_ref().map_or("declined", Inspection::kind),
            "inspection dispatch"
        );
        view
    }
}

fn deref_arc<T>(arc: &Arc<T>) -> &T {
    arc
}

fn install_builtins(tables: &mut Tables) {
    tables.handle::<Class, _>(|class| class.mapper().map(Inspection::Mapper));
    tables.handle::<Mapper, _>(|mapper| mapper.arc().map(Inspection::Mapper));
    tables.edge::<Arc<Mapper>, Mapper>(deref_arc);

    tables.handle::<Instance, _>(|instance| instance.state().cloned().map(Inspection::Instance));
    tables.handle::<Arc<InstanceState>, _>(|state| Some(Inspection::Instance(Arc::clone(state))));

    tables.handle::<Arc<AliasedInsp>, _>(|insp| Some(Inspection::Aliased(Arc::clone(insp))));
    tables.edge::<AliasedClass, Arc<AliasedInsp>>(AliasedClass::insp);

    tables.handle::<Arc<QueryableAttribute>, _>(|attr| {
        Some(Inspection::Attribute(Arc::clone(attr)))
    });

    tables.handle::<MapperProperty, _>(|prop| Some(Inspection::Property(prop.clone())));
    tables.handle::<Arc<ColumnProperty>, _>(|prop| {
        Some(Inspection::Property(MapperProperty::Column(Arc::clone(prop))))
    });
    tables.handle::<Arc<RelationshipProperty>, _>(|prop| {
        Some(Inspection::Property(MapperProperty::Relationship(Arc::clone(prop))))
    });
    tables.handle::<Arc<SynonymProperty>, _>(|prop| {
        Some(Inspection::Property(MapperProperty::Synonym(Arc::clone(prop))))
    });

    tables.handle::<OrmDescriptor, _>(|descriptor| match descriptor {
        OrmDescriptor::Attribute(attr) => Some(Inspection::Attribute(Arc::clone(attr))),
        other => Some(Inspection::Descriptor(other.clone())),
    });
    tables.handle::<Arc<HybridProperty>, _>(|h| {
        Some(Inspection::Descriptor(OrmDescriptor::Hybrid(Arc::clone(h))))
    });
    tables.handle::<Arc<HybridMethod>, _>(|m| {
        Some(Inspection::Descriptor(OrmDescriptor::HybridMethod(Arc::clone(m))))
    });
    tables.handle::<Arc<AssociationProxy>, _>(|p| {
        Some(Inspection::Descriptor(OrmDescriptor::AssociationProxy(Arc::clone(p))))
    });

    tables.handle::<Selectable, _>(|s| Some(Inspection::Selectable(s.clone())));
    tables.handle::<TableRef, _>(|t| Some(Inspection::Selectable(Selectable::Table(Arc::clone(t)))));
    tables.handle::<Arc<Alias>, _>(|a| Some(Inspection::Selectable(Selectable::Alias(Arc::clone(a)))));
    tables.handle::<Arc<Join>, _>(|j| Some(Inspection::Selectable(Selectable::Join(Arc::clone(j)))));
}

static GLOBAL: OnceLock<InspectionRegistry> = OnceLock::new();

/// The process-wide registry, created with the built-in handlers on first use.
pub fn global_registry() -> &'static InspectionRegistry {
    GLOBAL.get_or_init(InspectionRegistry::with_builtins)
}

/// Inspect `subject` through the process-wide registry.
///
/// Fails with [`Error::NoInspectionAvailable`] when no handler for the
/// subject's type or its declared ancestry accepts it.
pub fn inspect<T: Any>(subject: &T) -> Result<Inspection> {
    global_registry().inspect(subject)
}

pub fn inspect_opt<T: Any>(subject: &T) -> Option<Inspection> {
    global_registry().inspect_opt(subject)
}

/// Register a handler in the process-wide registry.
pub fn register_inspection<T, F>(handler: F) -> Result<()>
where
    T: Any,
    F: Fn(&T) -> Option<Inspection> + Send + Sync + 'static,
{
    global_registry().register::<T, F>(handler)
}

/// Declare a subtype edge in the process-wide registry.
pub fn declare_subtype<Sub: Any, Sup: Any>(upcast: fn(&Sub) -> &Sup) -> Result<()> {
    global_registry().declare_subtype(upcast)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Base(u32);
    struct Middle {
        base: Base,
    }
    struct Leaf {
        middle: Middle,
    }
    struct Stranger;

    #[derive(Debug, PartialEq)]
    struct Seen(u32);

    fn hierarchy() -> InspectionRegistry {
        let registry = InspectionRegistry::new();
        registry
            .register::<Base, _>(|b| Some(Inspection::Extension(Arc::new(Seen(b.0)))))
            .unwrap();
        registry
            .declare_subtype::<Middle, Base>(|m| &m.base)
            .unwrap();
        registry
            .declare_subtype::<Leaf, Middle>(|l| &l.middle)
            .unwrap();
        registry
    }

    fn leaf(n: u32) -> Leaf {
        Leaf {
            middle: Middle { base: Base(n) },
        }
    }

    #[test]
    fn ancestor_handler_sees_upcast_subject() {
        let registry = hierarchy();
        let view = registry.inspect(&leaf(7)).unwrap();
        assert_eq!(view.extension::<Seen>(), Some(&Seen(7)));
    }

    #[test]
    fn nearest_handler_wins() {
        let registry = hierarchy();
        registry
            .register::<Middle, _>(|m| Some(Inspection::Extension(Arc::new(Seen(m.base.0 + 100)))))
            .unwrap();
        let view = registry.inspect(&leaf(1)).unwrap();
        assert_eq!(view.extension::<Seen>(), Some(&Seen(101)));
        let view = registry.inspect(&Base(1)).unwrap();
        assert_eq!(view.extension::<Seen>(), Some(&Seen(1)));
    }

    #[test]
    fn unregistered_type_has_no_inspection() {
        let registry = hierarchy();
        let err = registry.inspect(&Stranger).unwrap_err();
        assert!(err.is_no_inspection());
        assert!(err.to_string().starts_with(
            "No inspection system is available for object of type"
        ));
        assert!(err.to_string().contains("Stranger"));
        assert!(registry.inspect_opt(&Stranger).is_none());
    }

    #[test]
    fn declined_subject_is_no_inspection() {
        let registry = InspectionRegistry::new();
        registry
            .register::<Base, _>(|b| (b.0 > 0).then(|| Inspection::Extension(Arc::new(Seen(b.0)))))
            .unwrap();
        assert!(registry.inspect(&Base(3)).is_ok());
        assert!(registry.inspect(&Base(0)).unwrap_err().is_no_inspection());
    }

    #[test]
    fn duplicate_handler_rejected() {
        let registry = hierarchy();
        let err = registry
            .register::<Base, _>(|_| None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert!(registry.is_registered::<Base>());
        assert!(!registry.is_registered::<Leaf>());
    }

    #[test]
    fn ancestry_cycle_rejected() {
        let registry = hierarchy();
        let err = registry
            .declare_subtype::<Base, Leaf>(|_| any_leaf())
            .unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::AncestryCycle));
        let err = registry
            .declare_subtype::<Base, Base>(|b| b)
            .unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::AncestryCycle));
    }

    fn any_leaf() -> &'static Leaf {
        static LEAF: OnceLock<Leaf> = OnceLock::new();
        LEAF.get_or_init(|| leaf(0))
    }

    #[test]
    fn builtins_cover_library_types() {
        let registry = InspectionRegistry::with_builtins();
        assert!(registry.is_registered::<Class>());
        assert!(registry.is_registered::<Instance>());
        assert!(registry.is_registered::<Arc<AliasedInsp>>());
        assert!(!registry.is_registered::<AliasedClass>());
        let unmapped = Class::new("Plain");
        assert!(registry.inspect(&unmapped).unwrap_err().is_no_inspection());
        assert!(registry.inspect(&Instance::new(&unmapped)).unwrap_err().is_no_inspection());
    }
}
