//! Handles returned by the accessor protocol
//!
//! Handles share identity: every caller that reaches a Ready slot gets a
//! handle to the same cell. A handle keeps the cell alive but never the
//! instance; after release or scope teardown `read`/`write` return `None`.

use super::instance::{AssignRejected, ErasedInstance, InstanceCell, Storable};
use crate::error::{StorageError, StorageResult};
use crate::type_key::TypeKey;
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLockReadGuard, RwLockWriteGuard};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Read-write handle to a stored `T`
pub struct Handle<T> {
    cell: Arc<InstanceCell<T>>,
}

impl<T: Storable> Handle<T> {
    pub(crate) fn from_erased(cell: Arc<dyn ErasedInstance>) -> StorageResult<Self> {
        let found = cell.type_key();
        cell.into_any()
            .downcast::<InstanceCell<T>>()
            .map(|cell| Self { cell })
            .map_err(|_| StorageError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                found: found.name(),
            })
    }

    pub fn type_key(&self) -> TypeKey {
        self.cell.type_key()
    }

    pub fn is_alive(&self) -> bool {
        self.cell.is_alive()
    }

    pub fn read(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
        RwLockReadGuard::try_map(self.cell.value.read(), Option::as_ref).ok()
    }

    pub fn write(&self) -> Option<MappedRwLockWriteGuard<'_, T>> {
        RwLockWriteGuard::try_map(self.cell.value.write(), Option::as_mut).ok()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.read().map(|value| f(&value))
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.write().map(|mut value| f(&mut value))
    }

    /// Assign a new value; returns the previous one.
    /// Does nothing and returns the value back if the instance was released.
    pub fn replace(&self, value: T) -> Result<T, T> {
        let mut guard = self.cell.value.write();
        match guard.as_mut() {
            Some(current) => Ok(std::mem::replace(current, value)),
            None => Err(value),
        }
    }

    /// Same underlying instance
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    pub fn read_only(&self) -> ReadHandle<T> {
        ReadHandle {
            inner: self.clone(),
        }
    }

    pub fn erased(&self) -> ErasedHandle {
        ErasedHandle {
            cell: self.cell.clone(),
        }
    }
}

impl<T: Storable + Clone> Handle<T> {
    pub fn get_cloned(&self) -> Option<T> {
        self.with(T::clone)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Storable> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("type", &self.type_key())
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Read-only handle, handed out by `get_read_only`
pub struct ReadHandle<T> {
    inner: Handle<T>,
}

impl<T: Storable> ReadHandle<T> {
    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    pub fn read(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
        self.inner.read()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.inner.with(f)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }

    /// Same instance as a read-write handle
    pub fn same_instance(&self, other: &Handle<T>) -> bool {
        self.inner.ptr_eq(other)
    }
}

impl<T> Clone for ReadHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Storable> fmt::Debug for ReadHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadHandle")
            .field("type", &self.inner.type_key())
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Handle for callers that only know the [`TypeKey`], e.g. graph call sites
#[derive(Clone)]
pub struct ErasedHandle {
    pub(crate) cell: Arc<dyn ErasedInstance>,
}

impl ErasedHandle {
    pub(crate) fn new(cell: Arc<dyn ErasedInstance>) -> Self {
        Self { cell }
    }

    pub fn type_key(&self) -> TypeKey {
        self.cell.type_key()
    }

    pub fn is_alive(&self) -> bool {
        self.cell.is_alive()
    }

    pub fn downcast<T: Storable>(&self) -> StorageResult<Handle<T>> {
        Handle::from_erased(self.cell.clone())
    }

    /// Assign an erased value of the instance's type.
    /// Fails with `Released` once the instance is gone.
    pub fn assign(&self, value: Box<dyn Any + Send>) -> StorageResult<()> {
        self.cell.assign_any(value).map_err(|rejected| match rejected {
            AssignRejected::WrongType(_) => StorageError::TypeMismatch {
                expected: self.type_key().name(),
                found: "<erased value>",
            },
            AssignRejected::Released(_) => StorageError::Released {
                type_name: self.type_key().name(),
            },
        })
    }

    /// Run `f` on the instance as `dyn Any`; `None` once released
    pub fn inspect<R>(&self, f: impl FnOnce(&dyn Any) -> R) -> Option<R> {
        let mut f = Some(f);
        let mut out = None;
        self.cell.inspect(&mut |value| {
            if let (Some(value), Some(f)) = (value, f.take()) {
                out = Some(f(value));
            }
        });
        out
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.cell), Arc::as_ptr(&other.cell))
    }
}

impl fmt::Debug for ErasedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedHandle")
            .field("type", &self.type_key())
            .field("alive", &self.is_alive())
            .finish()
    }
}
