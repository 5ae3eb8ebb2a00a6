//! Scope Data
//!
//! Lifetime boundaries and the slot table each one owns.

use crate::slot::Slot;
use crate::type_key::TypeKey;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Lifetime boundary kind.
///
/// Declaration order is the shutdown order reversed: owners go first,
/// then sessions, then the global scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScopeKind {
    /// Process lifetime
    Global,
    /// One session / world
    PerSession,
    /// One owning host object
    PerOwner,
}

/// Identity of a session or owning object, chosen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey(pub u64);

impl InstanceKey {
    /// Unit key used by the global scope
    pub const UNIT: InstanceKey = InstanceKey(0);
}

impl From<u64> for InstanceKey {
    fn from(value: u64) -> Self {
        InstanceKey(value)
    }
}

/// `(kind, instance)` pair naming a scope. Unique among live scopes only:
/// a scope torn down and resolved again is a different scope at the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeAddress {
    pub kind: ScopeKind,
    pub instance: InstanceKey,
}

impl ScopeAddress {
    /// Global addresses always carry [`InstanceKey::UNIT`]
    pub fn new(kind: ScopeKind, instance: impl Into<InstanceKey>) -> Self {
        let instance = match kind {
            ScopeKind::Global => InstanceKey::UNIT,
            _ => instance.into(),
        };
        Self { kind, instance }
    }

    pub fn global() -> Self {
        Self::new(ScopeKind::Global, InstanceKey::UNIT)
    }

    pub fn session(id: impl Into<InstanceKey>) -> Self {
        Self::new(ScopeKind::PerSession, id)
    }

    pub fn owner(id: impl Into<InstanceKey>) -> Self {
        Self::new(ScopeKind::PerOwner, id)
    }
}

impl fmt::Display for ScopeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScopeKind::Global => f.write_str("global"),
            ScopeKind::PerSession => write!(f, "session#{}", self.instance.0),
            ScopeKind::PerOwner => write!(f, "owner#{}", self.instance.0),
        }
    }
}

/// Process-unique scope id; distinguishes successive scopes at one address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u64);

/// Everything guarded by the scope lock
pub(crate) struct ScopeInner {
    pub slots: FxHashMap<TypeKey, Slot>,
    pub torn_down: bool,
    pub next_sequence: u64,
}

impl ScopeInner {
    pub fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }
}

pub(crate) struct ScopeData {
    pub id: ScopeId,
    pub address: ScopeAddress,
    pub created_at: Instant,
    pub inner: Mutex<ScopeInner>,
    /// Signalled whenever a slot leaves `Constructing` or the scope is torn down
    pub settled: Condvar,
}

impl ScopeData {
    pub fn new(id: ScopeId, address: ScopeAddress) -> Self {
        Self {
            id,
            address,
            created_at: Instant::now(),
            inner: Mutex::new(ScopeInner {
                slots: FxHashMap::default(),
                torn_down: false,
                next_sequence: 0,
            }),
            settled: Condvar::new(),
        }
    }
}
