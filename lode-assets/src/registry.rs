use crate::dispatch::ResourceLoader;
use crate::key::TypeKey;
use fnv::FnvHashMap;

pub type FactoryFn = Box<dyn Fn() -> Box<dyn ResourceLoader> + Send + Sync>;

/// Maps a resource-type key (derived from a file extension) to the factory
/// that constructs its load logic. Built once at startup and read-only
/// afterwards, so lookups need no lock.
pub struct FactoryRegistry {
    factories: FnvHashMap<TypeKey, FactoryFn>,
}

impl FactoryRegistry {
    pub fn builder() -> FactoryRegistryBuilder {
        FactoryRegistryBuilder {
            factories: Default::default(),
        }
    }

    pub fn lookup(
        &self,
        type_key: TypeKey,
    ) -> Option<&FactoryFn> {
        self.factories.get(&type_key)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

pub struct FactoryRegistryBuilder {
    factories: FnvHashMap<TypeKey, FactoryFn>,
}

impl FactoryRegistryBuilder {
    /// Registers a factory for a file extension (with or without the
    /// leading dot). Panics if the extension already has a factory; a
    /// silently shadowed factory would make request results depend on
    /// registration order.
    pub fn register<F>(
        mut self,
        extension: &str,
        factory: F,
    ) -> Self
    where
        F: Fn() -> Box<dyn ResourceLoader> + Send + Sync + 'static,
    {
        let type_key = TypeKey::from_extension(extension);
        let previous = self.factories.insert(type_key, Box::new(factory));
        assert!(
            previous.is_none(),
            "extension '{}' already has a resource factory registered",
            extension
        );
        self
    }

    pub fn build(self) -> FactoryRegistry {
        FactoryRegistry {
            factories: self.factories,
        }
    }
}
