//! Registry Data
//!
//! Counters, statistics and registration results. The registry itself and
//! its operations live in storage_registry.rs and slot_operations.rs

use crate::slot::{Handle, Storable};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals, updated without taking any scope lock
#[derive(Default)]
pub(crate) struct RegistryCounters {
    pub constructions: AtomicU64,
    pub construction_failures: AtomicU64,
    pub releases: AtomicU64,
    pub waits: AtomicU64,
    pub scopes_created: AtomicU64,
    pub scopes_torn_down: AtomicU64,
}

impl RegistryCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, amount: usize) {
        counter.fetch_add(amount as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, live_scopes: usize) -> RegistryStats {
        RegistryStats {
            constructions: self.constructions.load(Ordering::Relaxed),
            construction_failures: self.construction_failures.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            scopes_created: self.scopes_created.load(Ordering::Relaxed),
            scopes_torn_down: self.scopes_torn_down.load(Ordering::Relaxed),
            live_scopes,
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Factories that completed successfully
    pub constructions: u64,
    pub construction_failures: u64,
    /// Instances destroyed by release, replacement or teardown
    pub releases: u64,
    /// Times a caller blocked on another thread's construction
    pub waits: u64,
    pub scopes_created: u64,
    pub scopes_torn_down: u64,
    pub live_scopes: usize,
}

/// What `register` did with the slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Slot was empty; the value is now the instance
    Installed,
    /// A previous instance was released and replaced
    Replaced,
    /// A Ready instance already existed and was kept; the value was dropped
    KeptExisting,
}

/// Result of registering a caller-built value
pub struct Registration<T> {
    /// The slot's instance after registration
    pub handle: Handle<T>,
    pub outcome: RegisterOutcome,
}

impl<T: Storable> fmt::Debug for Registration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("handle", &self.handle)
            .field("outcome", &self.outcome)
            .finish()
    }
}
