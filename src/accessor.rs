//! Accessor protocol: typed get/set sugar over the registry
//!
//! `get::<T>` is `get_or_create` with `T::default()` as the factory.
//! [`Accessor`] binds the type once so a call site pays for key derivation
//! at construction and never again.

use crate::error::StorageResult;
use crate::registry::Registry;
use crate::scope::ScopeHandle;
use crate::slot::{Handle, ReadHandle, Storable};
use crate::type_key::TypeKey;
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;

/// Factory used by [`get`]: `T::default()`, which cannot fail
pub fn default_factory<T: Default>() -> Result<T, Infallible> {
    Ok(T::default())
}

/// Instance of `T` in `scope`, default-constructed on first access
pub fn get<T: Storable + Default>(
    registry: &Registry,
    scope: &ScopeHandle,
) -> StorageResult<Handle<T>> {
    registry.get_or_create(scope, default_factory::<T>)
}

/// Same lookup as [`get`], with read-only access
pub fn get_read_only<T: Storable + Default>(
    registry: &Registry,
    scope: &ScopeHandle,
) -> StorageResult<ReadHandle<T>> {
    get::<T>(registry, scope).map(|handle| handle.read_only())
}

pub fn try_get<T: Storable>(registry: &Registry, scope: &ScopeHandle) -> Option<Handle<T>> {
    registry.try_get(scope)
}

/// Assign `value` into the slot of `T`, creating it if needed. Last write wins.
pub fn set<T: Storable>(
    registry: &Registry,
    scope: &ScopeHandle,
    value: T,
) -> StorageResult<Handle<T>> {
    registry.set(scope, value)
}

pub fn release<T: Storable>(registry: &Registry, scope: &ScopeHandle) -> StorageResult<bool> {
    registry.release(scope, TypeKey::of::<T>())
}

/// Call site bound to one type
pub struct Accessor<T> {
    key: TypeKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Storable> Accessor<T> {
    pub fn new() -> Self {
        Self {
            key: TypeKey::of::<T>(),
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn try_get(&self, registry: &Registry, scope: &ScopeHandle) -> Option<Handle<T>> {
        registry
            .try_get_erased(scope, self.key)
            .and_then(|handle| handle.downcast().ok())
    }

    pub fn set(&self, registry: &Registry, scope: &ScopeHandle, value: T) -> StorageResult<Handle<T>> {
        registry.set_keyed(scope, self.key, value)
    }

    pub fn release(&self, registry: &Registry, scope: &ScopeHandle) -> StorageResult<bool> {
        registry.release(scope, self.key)
    }
}

impl<T: Storable + Default> Accessor<T> {
    pub fn get(&self, registry: &Registry, scope: &ScopeHandle) -> StorageResult<Handle<T>> {
        registry.get_or_create_keyed(scope, self.key, default_factory::<T>)
    }

    pub fn get_read_only(
        &self,
        registry: &Registry,
        scope: &ScopeHandle,
    ) -> StorageResult<ReadHandle<T>> {
        self.get(registry, scope).map(|handle| handle.read_only())
    }
}

impl<T: Storable> Default for Accessor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Accessor<T> {}

impl<T> fmt::Debug for Accessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Accessor").field(&self.key).finish()
    }
}
