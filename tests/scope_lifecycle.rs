//! Scope lifetimes as the host drives them

use hearth_storages::{
    accessor, HostLifecycle, Registry, RegistryConfig, ScopeEvent, SlotState, StorageError,
    TeardownListener, TeardownOrder, TypeCatalog, TypeKey,
};
use std::io::Write;
use std::sync::{Arc, Mutex};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Default, Clone, PartialEq)]
struct SessionConfig {
    difficulty: u8,
}

#[derive(Debug, Default)]
struct Lobby {
    players: Vec<String>,
}

struct DropLog {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Drop for DropLog {
    fn drop(&mut self) {
        self.log.lock().expect("Drop log poisoned").push(self.name);
    }
}

struct First(DropLog);
struct Second(DropLog);

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<ScopeEvent>>,
}

impl TeardownListener for EventLog {
    fn on_scope_torn_down(&self, event: &ScopeEvent) {
        self.events.lock().expect("Event log poisoned").push(event.clone());
    }
}

#[test]
fn try_get_before_creation_is_empty() {
    init_logging();
    let registry = Registry::with_defaults();
    let scope = registry.session(1u64).expect("Failed to resolve session");

    assert!(registry.try_get::<SessionConfig>(&scope).is_none());
    assert_eq!(
        scope.slot_state(TypeKey::of::<SessionConfig>()),
        SlotState::Uninitialized
    );
    assert_eq!(registry.stats().constructions, 0);
}

#[test]
fn release_then_get_constructs_new_instance() {
    init_logging();
    let registry = Registry::with_defaults();
    let scope = registry.session(1u64).expect("Failed to resolve session");

    let first = accessor::set(&registry, &scope, SessionConfig { difficulty: 3 })
        .expect("Failed to set SessionConfig");
    assert!(accessor::release::<SessionConfig>(&registry, &scope).expect("Failed to release"));
    assert_eq!(
        scope.slot_state(TypeKey::of::<SessionConfig>()),
        SlotState::Released
    );

    let second =
        accessor::get::<SessionConfig>(&registry, &scope).expect("Failed to get SessionConfig");
    assert!(!second.ptr_eq(&first));
    assert_eq!(second.get_cloned(), Some(SessionConfig::default()));
    assert_eq!(registry.stats().constructions, 2);
}

#[test]
fn torn_down_scope_is_never_resurrected() {
    init_logging();
    let registry = Registry::with_defaults();
    let scope = registry.session(4u64).expect("Failed to resolve session");
    accessor::get::<Lobby>(&registry, &scope).expect("Failed to get Lobby");

    registry.teardown(&scope);

    assert!(matches!(
        accessor::get::<Lobby>(&registry, &scope),
        Err(StorageError::ScopeGone { .. })
    ));
    assert!(accessor::try_get::<Lobby>(&registry, &scope).is_none());
    assert!(registry.lookup(scope.address()).is_none());
}

#[test]
fn new_session_does_not_reuse_old_slots() {
    init_logging();
    let host = HostLifecycle::new(Arc::new(Registry::with_defaults()));
    let registry = host.registry().clone();

    let s1 = host.on_session_begin(7u64).expect("Failed to begin session");
    let config = accessor::set(&registry, &s1, SessionConfig { difficulty: 9 })
        .expect("Failed to set SessionConfig");
    assert_eq!(host.on_session_end(7u64), 1);
    assert!(config.read().is_none());

    let s2 = host.on_session_begin(7u64).expect("Failed to begin session");
    assert_eq!(s2.address(), s1.address());
    assert_ne!(s2.id(), s1.id());
    assert!(s2.slot_states().is_empty());

    let fresh = accessor::get::<SessionConfig>(&registry, &s2).expect("Failed to get SessionConfig");
    assert_eq!(fresh.get_cloned(), Some(SessionConfig::default()));
}

#[test]
fn construction_failure_is_retryable() {
    init_logging();
    let registry = Registry::with_defaults();
    let scope = registry.owner(1u64).expect("Failed to resolve owner");

    let err = registry
        .get_or_create(&scope, || Err::<Lobby, _>("matchmaking unavailable"))
        .expect_err("Factory failure should surface");
    assert!(err.is_retryable());
    assert_eq!(
        scope.slot_state(TypeKey::of::<Lobby>()),
        SlotState::Uninitialized
    );

    let lobby = registry
        .get_or_create(&scope, || {
            Ok::<_, String>(Lobby {
                players: vec!["ada".to_string()],
            })
        })
        .expect("Retry should succeed");
    assert_eq!(lobby.with(|l| l.players.len()), Some(1));
    assert_eq!(registry.stats().construction_failures, 1);
}

#[test]
fn configured_forward_teardown_order() {
    init_logging();
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    write!(
        file,
        "teardown_order = \"construction\"\nslow_construction_warn_ms = 0\n"
    )
    .expect("Failed to write config");

    let config = RegistryConfig::load(file.path()).expect("Failed to load config");
    assert_eq!(config.teardown_order, TeardownOrder::Construction);

    let registry =
        Registry::new(config, Arc::new(TypeCatalog::new())).expect("Failed to create registry");
    let listener = Arc::new(EventLog::default());
    registry.subscribe(&listener);

    let log = Arc::new(Mutex::new(Vec::new()));
    let scope = registry.session(1u64).expect("Failed to resolve session");
    let make = |name| DropLog {
        name,
        log: log.clone(),
    };
    registry
        .get_or_create(&scope, || Ok::<_, String>(First(make("first"))))
        .expect("Failed to create First");
    registry
        .get_or_create(&scope, || Ok::<_, String>(Second(make("second"))))
        .expect("Failed to create Second");

    assert_eq!(registry.teardown(&scope), 2);
    assert_eq!(*log.lock().expect("Drop log poisoned"), vec!["first", "second"]);

    let events = listener.events.lock().expect("Event log poisoned");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].address, scope.address());
    assert_eq!(events[0].released, 2);
}

#[test]
fn priorities_from_config_are_resolved_by_name() {
    init_logging();
    let catalog = Arc::new(TypeCatalog::new());
    catalog
        .register::<Lobby>("net::Lobby")
        .expect("Failed to register Lobby");

    let config = RegistryConfig::from_toml_str("[teardown_priorities]\n\"net::Lobby\" = -5\n")
        .expect("Failed to parse config");
    let registry = Registry::new(config, catalog).expect("Failed to create registry");
    assert_eq!(registry.config().teardown_priorities.len(), 1);

    let bad = RegistryConfig::from_toml_str("[teardown_priorities]\n\"net::Missing\" = 1\n")
        .expect("Failed to parse config");
    assert!(matches!(
        Registry::new(bad, Arc::new(TypeCatalog::new())),
        Err(StorageError::InvalidConfig { .. })
    ));
}
