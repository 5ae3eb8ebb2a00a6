//! Host lifecycle adapter
//!
//! The registry holds no hooks into the host's object model. The host calls
//! these notifications from its own session and object callbacks instead.

mod events;

pub use events::{ScopeEvent, TeardownListener};
pub(crate) use events::TeardownListeners;

use crate::error::StorageResult;
use crate::registry::Registry;
use crate::scope::{InstanceKey, ScopeAddress, ScopeHandle};
use std::sync::Arc;

/// Translates host session and object events into scope resolve/teardown
#[derive(Clone, Debug)]
pub struct HostLifecycle {
    registry: Arc<Registry>,
}

impl HostLifecycle {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// A session / world began
    pub fn on_session_begin(&self, session: impl Into<InstanceKey>) -> StorageResult<ScopeHandle> {
        self.registry.session(session)
    }

    /// A session ended; owner scopes are unaffected
    pub fn on_session_end(&self, session: impl Into<InstanceKey>) -> usize {
        self.registry
            .teardown_address(ScopeAddress::session(session))
    }

    pub fn on_owner_created(&self, owner: impl Into<InstanceKey>) -> StorageResult<ScopeHandle> {
        self.registry.owner(owner)
    }

    pub fn on_owner_destroyed(&self, owner: impl Into<InstanceKey>) -> usize {
        self.registry.teardown_address(ScopeAddress::owner(owner))
    }

    /// Owner scope that lives exactly as long as the returned guard
    pub fn owner_guard(&self, owner: impl Into<InstanceKey>) -> StorageResult<OwnerGuard> {
        OwnerGuard::new(self.registry.clone(), owner)
    }

    pub fn on_process_exit(&self) -> usize {
        log::info!("[HostLifecycle::on_process_exit] Shutting down storage registry");
        self.registry.shutdown()
    }
}

/// Tears its owner scope down when dropped
#[derive(Debug)]
pub struct OwnerGuard {
    registry: Arc<Registry>,
    scope: ScopeHandle,
}

impl OwnerGuard {
    pub fn new(registry: Arc<Registry>, owner: impl Into<InstanceKey>) -> StorageResult<Self> {
        let scope = registry.owner(owner)?;
        Ok(Self { registry, scope })
    }

    pub fn scope(&self) -> &ScopeHandle {
        &self.scope
    }
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        let released = self.registry.teardown(&self.scope);
        log::debug!(
            "[OwnerGuard::drop] {} dropped, released {} instances",
            self.scope,
            released
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeKind;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Health(u32);

    #[derive(Default)]
    struct CleanupLog {
        events: Mutex<Vec<(ScopeAddress, usize)>>,
    }

    impl TeardownListener for CleanupLog {
        fn on_scope_torn_down(&self, event: &ScopeEvent) {
            self.events.lock().push((event.address, event.released));
        }
    }

    fn lifecycle() -> HostLifecycle {
        HostLifecycle::new(Arc::new(Registry::with_defaults()))
    }

    #[test]
    fn test_session_end_leaves_owners_alone() {
        let host = lifecycle();
        let session = host.on_session_begin(1u64).expect("Failed to begin session");
        let owner = host.on_owner_created(1u64).expect("Failed to create owner");
        host.registry()
            .get_or_create(&owner, || Ok::<_, String>(Health(3)))
            .expect("Failed to create Health");

        assert_eq!(host.on_session_end(1u64), 0);
        assert!(session.is_torn_down());
        assert!(!owner.is_torn_down());
        assert_eq!(host.on_owner_destroyed(1u64), 1);
        assert_eq!(host.on_owner_destroyed(1u64), 0);
    }

    #[test]
    fn test_owner_guard_tears_down_on_drop() {
        let host = lifecycle();
        let listener = Arc::new(CleanupLog::default());
        host.registry().subscribe(&listener);

        let guard = host.owner_guard(42u64).expect("Failed to create owner guard");
        assert_eq!(guard.scope().kind(), ScopeKind::PerOwner);
        let health = host
            .registry()
            .get_or_create(guard.scope(), || Ok::<_, String>(Health(10)))
            .expect("Failed to create Health");
        drop(guard);

        assert!(!health.is_alive());
        assert_eq!(
            *listener.events.lock(),
            vec![(ScopeAddress::owner(42u64), 1)]
        );
    }

    #[test]
    fn test_process_exit() {
        let host = lifecycle();
        host.on_session_begin(1u64).expect("Failed to begin session");
        host.on_process_exit();
        assert!(host.on_session_begin(2u64).is_err());
    }
}
