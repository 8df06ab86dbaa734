//! Type registry.
//!
//! Maps Rust types to the API group, version and kind recorded in owner
//! references. Built once at startup and shared read-only; tests build their
//! own, possibly incomplete, registries.

use std::any::{TypeId, type_name};
use std::collections::HashMap;

use crate::error::Error;
use crate::meta::Resource;
use crate::result::Result;

/// API identity of a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl TypeDescriptor {
    /// Create a descriptor.
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// Immutable map from Rust type to [`TypeDescriptor`].
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<TypeId, TypeDescriptor>,
}

impl TypeRegistry {
    /// Start building a registry.
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::default()
    }

    /// Resolve the descriptor registered for `T`.
    pub fn resolve<T: Resource>(&self) -> Option<&TypeDescriptor> {
        self.types.get(&TypeId::of::<T>())
    }

    /// Like [`TypeRegistry::resolve`], but a missing type is an error.
    pub fn require<T: Resource>(&self) -> Result<&TypeDescriptor> {
        self.resolve::<T>()
            .ok_or_else(|| Error::unresolved_type(type_name::<T>()))
    }
}

/// Builder for [`TypeRegistry`].
#[derive(Debug, Default)]
pub struct TypeRegistryBuilder {
    types: HashMap<TypeId, TypeDescriptor>,
}

impl TypeRegistryBuilder {
    /// Register `T` under `descriptor`. Registering twice keeps the last one.
    #[must_use]
    pub fn register<T: Resource>(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.insert(TypeId::of::<T>(), descriptor);
        self
    }

    /// Freeze the registry.
    pub fn build(self) -> TypeRegistry {
        TypeRegistry { types: self.types }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ObjectMeta;

    #[derive(Clone)]
    struct Widget {
        meta: ObjectMeta,
    }

    impl Resource for Widget {
        const KIND: &'static str = "Widget";

        fn meta(&self) -> &ObjectMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.meta
        }
    }

    #[derive(Clone)]
    struct Gadget {
        meta: ObjectMeta,
    }

    impl Resource for Gadget {
        const KIND: &'static str = "Gadget";

        fn meta(&self) -> &ObjectMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.meta
        }
    }

    #[test]
    fn test_resolve_registered_type() {
        let registry = TypeRegistry::builder()
            .register::<Widget>(TypeDescriptor::new("example.com", "v1", "Widget"))
            .build();

        let desc = registry.resolve::<Widget>();
        assert_eq!(desc.map(TypeDescriptor::api_version), Some("example.com/v1".to_string()));
        assert!(registry.resolve::<Gadget>().is_none());
    }

    #[test]
    fn test_require_missing_type() {
        let registry = TypeRegistry::default();
        let result = registry.require::<Gadget>();
        assert!(matches!(result, Err(Error::UnresolvedType { .. })));
    }

    #[test]
    fn test_core_group_api_version() {
        assert_eq!(TypeDescriptor::new("", "v1", "Pod").api_version(), "v1");
    }

    #[test]
    fn test_resource_key_from_meta() {
        let w = Widget {
            meta: ObjectMeta::new("default", "w"),
        };
        let g = Gadget {
            meta: ObjectMeta::new("default", "g"),
        };
        assert_eq!(w.key().name, "w");
        assert_eq!(g.key().name, "g");
    }
}
