use super::scope_data::{ScopeAddress, ScopeData, ScopeId, ScopeKind};
use crate::slot::SlotState;
use crate::type_key::TypeKey;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Handle on one live (or torn down) scope.
///
/// Cheap to clone. Two handles are equal only if they name the same scope
/// instance; a handle obtained before a teardown never reaches the scope
/// resolved afterwards at the same address.
#[derive(Clone)]
pub struct ScopeHandle {
    pub(crate) data: Arc<ScopeData>,
}

impl ScopeHandle {
    pub(crate) fn new(data: ScopeData) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.data.id
    }

    pub fn address(&self) -> ScopeAddress {
        self.data.address
    }

    pub fn kind(&self) -> ScopeKind {
        self.data.address.kind
    }

    pub fn is_torn_down(&self) -> bool {
        self.data.inner.lock().torn_down
    }

    pub fn age(&self) -> Duration {
        self.data.created_at.elapsed()
    }

    /// Number of slots ever touched in this scope, in any state
    pub fn slot_count(&self) -> usize {
        self.data.inner.lock().slots.len()
    }

    /// Snapshot of slot states, ordered by key
    pub fn slot_states(&self) -> Vec<(TypeKey, SlotState)> {
        let inner = self.data.inner.lock();
        let mut states: Vec<_> = inner
            .slots
            .values()
            .map(|slot| (slot.key, slot.state))
            .collect();
        states.sort_by_key(|(key, _)| *key);
        states
    }

    pub fn slot_state(&self, key: TypeKey) -> SlotState {
        self.data
            .inner
            .lock()
            .slots
            .get(&key)
            .map(|slot| slot.state)
            .unwrap_or(SlotState::Uninitialized)
    }
}

impl PartialEq for ScopeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.data.id == other.data.id
    }
}

impl Eq for ScopeHandle {}

impl fmt::Debug for ScopeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeHandle")
            .field("id", &self.data.id.0)
            .field("address", &self.data.address)
            .finish()
    }
}

impl fmt::Display for ScopeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.data.address, self.data.id.0)
    }
}
