//! Type-erased instance cells
//!
//! A cell owns one instance behind a lock. Releasing a cell drops the value
//! in place; anyone still holding a handle afterwards reads `None`.
//!
//! Liveness is tracked apart from the value lock, so the registry can check
//! it under a scope lock while a caller holds the instance's write guard.

use crate::type_key::TypeKey;
use parking_lot::RwLock;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Why an erased assignment was refused. The value is handed back either way.
pub enum AssignRejected {
    /// The value is not of the cell's type
    WrongType(Box<dyn Any + Send>),
    /// The cell was released; assigning would revive it outside any slot
    Released(Box<dyn Any + Send>),
}

impl AssignRejected {
    pub fn into_value(self) -> Box<dyn Any + Send> {
        match self {
            AssignRejected::WrongType(value) | AssignRejected::Released(value) => value,
        }
    }
}

impl std::fmt::Debug for AssignRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignRejected::WrongType(_) => f.write_str("WrongType"),
            AssignRejected::Released(_) => f.write_str("Released"),
        }
    }
}

/// Anything that can live in the registry
pub trait Storable: Any + Send + Sync {}

impl<T: Any + Send + Sync> Storable for T {}

/// Object-safe view of an [`InstanceCell`] for code that only has a [`TypeKey`]
pub trait ErasedInstance: Send + Sync + 'static {
    fn type_key(&self) -> TypeKey;

    /// True until the instance is released. Never takes the value lock.
    fn is_alive(&self) -> bool;

    /// Drop the instance. Returns false if it was already released.
    fn release(&self) -> bool;

    /// Replace the instance with a value of the same type.
    /// Refuses, handing the value back, on a type mismatch or a released cell.
    fn assign_any(&self, value: Box<dyn Any + Send>) -> Result<(), AssignRejected>;

    /// Borrow the instance as `dyn Any`, `None` once released
    fn inspect(&self, f: &mut dyn FnMut(Option<&dyn Any>));

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Storage cell for one instance of `T`
pub struct InstanceCell<T> {
    key: TypeKey,
    alive: AtomicBool,
    pub(crate) value: RwLock<Option<T>>,
}

impl<T: Storable> InstanceCell<T> {
    pub(crate) fn new(key: TypeKey, value: T) -> Arc<Self> {
        Arc::new(Self {
            key,
            alive: AtomicBool::new(true),
            value: RwLock::new(Some(value)),
        })
    }
}

impl<T: Storable> ErasedInstance for InstanceCell<T> {
    fn type_key(&self) -> TypeKey {
        self.key
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn release(&self) -> bool {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return false;
        }
        // Take under the lock, drop after it
        let taken = self.value.write().take();
        drop(taken);
        true
    }

    fn assign_any(&self, value: Box<dyn Any + Send>) -> Result<(), AssignRejected> {
        let value = value.downcast::<T>().map_err(AssignRejected::WrongType)?;
        if !self.is_alive() {
            return Err(AssignRejected::Released(value));
        }
        let mut guard = self.value.write();
        match guard.as_mut() {
            Some(current) => {
                let previous = std::mem::replace(current, *value);
                drop(guard);
                drop(previous);
                Ok(())
            }
            None => Err(AssignRejected::Released(value)),
        }
    }

    fn inspect(&self, f: &mut dyn FnMut(Option<&dyn Any>)) {
        let guard = self.value.read();
        f(guard.as_ref().map(|value| value as &dyn Any));
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
