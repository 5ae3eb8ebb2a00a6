//! Type Catalog Data
//!
//! Reflection tokens and the tables that map registered names to them.
//! Registration and lookup live in catalog_operations.rs

use super::TypeKey;
use crate::error::{StorageError, StorageResult};
use crate::slot::{ErasedInstance, InstanceCell, Storable};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Default-constructs an erased instance of the token's type
pub type ErasedFactory = Arc<dyn Fn() -> StorageResult<Arc<dyn ErasedInstance>> + Send + Sync>;

/// Moves a script-provided value into a fresh cell, or hands it back on type mismatch
pub type ErasedWrap = fn(Box<dyn Any + Send>) -> Result<Arc<dyn ErasedInstance>, Box<dyn Any + Send>>;

/// Runtime handle on a storable type, as produced by the reflection layer.
///
/// Carries everything the registry needs to work with a type it cannot name
/// statically: its identity, a registered name, its size and a way to build
/// a default instance.
#[derive(Clone)]
pub struct TypeToken {
    pub(crate) key: TypeKey,
    pub(crate) name: Arc<str>,
    pub(crate) size: usize,
    pub(crate) factory: ErasedFactory,
    pub(crate) wrap: ErasedWrap,
}

impl TypeToken {
    /// Token whose factory is `T::default()`
    pub fn of<T: Storable + Default>(name: &str) -> Self {
        Self::with_factory::<T, std::convert::Infallible>(name, || Ok(T::default()))
    }

    /// Token with a custom, possibly failing, factory
    pub fn with_factory<T, E>(
        name: &str,
        factory: impl Fn() -> Result<T, E> + Send + Sync + 'static,
    ) -> Self
    where
        T: Storable,
        E: fmt::Display,
    {
        let key = TypeKey::of::<T>();
        Self {
            key,
            name: Arc::from(name),
            size: std::mem::size_of::<T>(),
            factory: Arc::new(move || {
                factory()
                    .map(|value| InstanceCell::new(key, value) as Arc<dyn ErasedInstance>)
                    .map_err(|e| StorageError::construction(key.name(), e))
            }),
            wrap: wrap_value::<T>,
        }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Name the token was registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes of one instance
    pub fn size(&self) -> usize {
        self.size
    }

    /// Builds a default instance through the token's factory
    pub fn construct(&self) -> StorageResult<Arc<dyn ErasedInstance>> {
        (self.factory)()
    }

    /// Wraps a caller-provided value, checking it has the token's type
    pub fn wrap(&self, value: Box<dyn Any + Send>) -> StorageResult<Arc<dyn ErasedInstance>> {
        (self.wrap)(value).map_err(|_| StorageError::TypeMismatch {
            expected: self.key.name(),
            found: "<erased value>",
        })
    }

    /// Identity comparison, independent of the registered name
    pub fn same_type(&self, other: &TypeToken) -> bool {
        self.key == other.key
    }
}

impl fmt::Debug for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeToken")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("size", &self.size)
            .finish()
    }
}

fn wrap_value<T: Storable>(
    value: Box<dyn Any + Send>,
) -> Result<Arc<dyn ErasedInstance>, Box<dyn Any + Send>> {
    value
        .downcast::<T>()
        .map(|value| InstanceCell::new(TypeKey::of::<T>(), *value) as Arc<dyn ErasedInstance>)
}

/// Catalog tables
#[derive(Default)]
pub(crate) struct CatalogTables {
    /// Registered name to token
    pub by_name: FxHashMap<String, TypeToken>,
    /// First name each type was registered under
    pub names_by_key: FxHashMap<TypeKey, String>,
    /// Renamed types: old name to new name
    pub redirects: FxHashMap<String, String>,
}

/// Name-addressable set of reflection tokens.
///
/// This is the registry's view of the host reflection system. The scripting
/// bridge resolves type names here at edit time; the registry itself only
/// ever sees the resulting [`TypeKey`]s.
#[derive(Default)]
pub struct TypeCatalog {
    pub(crate) tables: RwLock<CatalogTables>,
}
