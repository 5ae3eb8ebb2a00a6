//! Scope events and the listeners interested in them

use crate::scope::{ScopeAddress, ScopeId};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Emitted after a scope has been torn down and its slots released
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeEvent {
    pub address: ScopeAddress,
    pub id: ScopeId,
    /// Instances actually destroyed by the teardown
    pub released: usize,
    pub timestamp: Instant,
}

/// Host-side hook for scope teardown (world cleanup, owner destruction)
pub trait TeardownListener: Send + Sync {
    fn on_scope_torn_down(&self, event: &ScopeEvent);
}

/// Listeners are held weakly; dropping the last `Arc` unsubscribes
#[derive(Default)]
pub(crate) struct TeardownListeners {
    subscribers: RwLock<Vec<Weak<dyn TeardownListener>>>,
}

impl TeardownListeners {
    pub fn subscribe<L: TeardownListener + 'static>(&self, listener: &Arc<L>) {
        let listener: Arc<dyn TeardownListener> = listener.clone();
        self.subscribers.write().push(Arc::downgrade(&listener));
    }

    /// Deliver `event` outside the subscriber lock. Returns listeners reached.
    pub fn notify(&self, event: &ScopeEvent) -> usize {
        let (live, any_dead) = {
            let subscribers = self.subscribers.read();
            let live: Vec<_> = subscribers.iter().filter_map(Weak::upgrade).collect();
            let any_dead = live.len() != subscribers.len();
            (live, any_dead)
        };

        if any_dead {
            self.subscribers
                .write()
                .retain(|weak| weak.strong_count() > 0);
        }

        for listener in &live {
            listener.on_scope_torn_down(event);
        }
        live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ScopeAddress>>,
    }

    impl TeardownListener for Recorder {
        fn on_scope_torn_down(&self, event: &ScopeEvent) {
            self.seen.lock().push(event.address);
        }
    }

    fn event(address: ScopeAddress) -> ScopeEvent {
        ScopeEvent {
            address,
            id: ScopeId(1),
            released: 0,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn test_notify_reaches_live_listeners() {
        let listeners = TeardownListeners::default();
        let recorder = Arc::new(Recorder::default());
        listeners.subscribe(&recorder);

        assert_eq!(listeners.notify(&event(ScopeAddress::session(1u64))), 1);
        assert_eq!(*recorder.seen.lock(), vec![ScopeAddress::session(1u64)]);
    }

    #[test]
    fn test_dropped_listener_unsubscribes() {
        let listeners = TeardownListeners::default();
        let recorder = Arc::new(Recorder::default());
        listeners.subscribe(&recorder);
        drop(recorder);

        assert_eq!(listeners.notify(&event(ScopeAddress::owner(2u64))), 0);
        assert!(listeners.subscribers.read().is_empty());
    }
}
