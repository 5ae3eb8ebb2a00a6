//! Slot Data
//!
//! One storage cell per (scope, type). State transitions are driven by
//! registry/slot_operations.rs under the owning scope's lock.

use super::instance::ErasedInstance;
use crate::type_key::TypeKey;
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

/// Slot lifecycle.
///
/// `Uninitialized -> Constructing -> Ready -> Released -> Constructing -> ...`
/// A failed construction goes back to `Uninitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    Uninitialized,
    Constructing,
    Ready,
    Released,
}

/// What a slot holds
#[derive(Clone)]
pub(crate) enum SlotStorage {
    Empty,
    /// The scope owns the instance and releases it on teardown
    Owned(Arc<dyn ErasedInstance>),
    /// Back-reference to an instance owned elsewhere
    Observed(Weak<dyn ErasedInstance>),
}

pub(crate) struct Slot {
    pub key: TypeKey,
    pub state: SlotState,
    pub storage: SlotStorage,
    /// Thread running the factory while `Constructing`
    pub constructor: Option<ThreadId>,
    /// Scope-wide sequence number of the last transition to `Ready`
    pub sequence: u64,
    /// Completed constructions or installs
    pub generation: u32,
}

impl Slot {
    pub fn new(key: TypeKey) -> Self {
        Self {
            key,
            state: SlotState::Uninitialized,
            storage: SlotStorage::Empty,
            constructor: None,
            sequence: 0,
            generation: 0,
        }
    }

    /// The live instance of a Ready slot
    pub fn instance(&self) -> Option<Arc<dyn ErasedInstance>> {
        if self.state != SlotState::Ready {
            return None;
        }
        let cell = match &self.storage {
            SlotStorage::Owned(cell) => Some(cell.clone()),
            SlotStorage::Observed(weak) => weak.upgrade(),
            SlotStorage::Empty => None,
        };
        cell.filter(|cell| cell.is_alive())
    }

    /// Reset a Ready slot whose instance went away underneath it: an
    /// observed owner dropped it, or an alias sharing the cell released it.
    pub fn settle_dangling(&mut self) {
        if self.state != SlotState::Ready || self.instance().is_some() {
            return;
        }
        self.state = match self.storage {
            SlotStorage::Observed(_) => SlotState::Uninitialized,
            _ => SlotState::Released,
        };
        self.storage = SlotStorage::Empty;
    }

    /// Move out an owned instance, leaving the slot empty
    pub fn take_owned(&mut self) -> Option<Arc<dyn ErasedInstance>> {
        match std::mem::replace(&mut self.storage, SlotStorage::Empty) {
            SlotStorage::Owned(cell) => Some(cell),
            _ => None,
        }
    }

    pub fn is_observed(&self) -> bool {
        matches!(self.storage, SlotStorage::Observed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::InstanceCell;

    #[test]
    fn test_new_slot_is_uninitialized() {
        let slot = Slot::new(TypeKey::of::<u8>());
        assert_eq!(slot.state, SlotState::Uninitialized);
        assert!(slot.instance().is_none());
    }

    #[test]
    fn test_settle_released_alias() {
        let cell: Arc<dyn ErasedInstance> = InstanceCell::new(TypeKey::of::<u8>(), 1u8);
        let mut slot = Slot::new(TypeKey::of::<u8>());
        slot.state = SlotState::Ready;
        slot.storage = SlotStorage::Owned(cell.clone());
        assert!(slot.instance().is_some());

        cell.release();
        slot.settle_dangling();
        assert_eq!(slot.state, SlotState::Released);
        assert!(slot.take_owned().is_none());
    }

    #[test]
    fn test_settle_dead_observer() {
        let cell: Arc<dyn ErasedInstance> = InstanceCell::new(TypeKey::of::<u8>(), 1u8);
        let mut slot = Slot::new(TypeKey::of::<u8>());
        slot.state = SlotState::Ready;
        slot.storage = SlotStorage::Observed(Arc::downgrade(&cell));
        assert!(slot.is_observed());

        drop(cell);
        slot.settle_dangling();
        assert_eq!(slot.state, SlotState::Uninitialized);
    }
}
