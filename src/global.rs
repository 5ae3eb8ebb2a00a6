//! Process-wide registry
//!
//! Explicit rather than ambient: the host calls [`init`] at startup (or lets
//! the first [`registry`] call create a default one) and [`shutdown`] at
//! process exit. Everything else takes a `&Registry`, so tests build their own.

use crate::config::RegistryConfig;
use crate::error::{StorageError, StorageResult};
use crate::registry::Registry;
use crate::type_key::TypeCatalog;
use parking_lot::RwLock;
use std::sync::Arc;

lazy_static::lazy_static! {
    static ref GLOBAL_REGISTRY: RwLock<Option<Arc<Registry>>> = RwLock::new(None);
}

/// Install the process-wide registry. Fails if one is already live.
pub fn init(config: RegistryConfig, catalog: Arc<TypeCatalog>) -> StorageResult<Arc<Registry>> {
    let mut slot = GLOBAL_REGISTRY.write();
    if slot.as_ref().is_some_and(|live| !live.is_shut_down()) {
        return Err(StorageError::InvalidConfig {
            field: "global".to_string(),
            value: "initialized".to_string(),
            reason: "the process-wide registry is already initialized".to_string(),
        });
    }
    let registry = Arc::new(Registry::new(config, catalog)?);
    *slot = Some(registry.clone());
    log::info!("[global::init] Process-wide registry initialized");
    Ok(registry)
}

/// The process-wide registry, created with defaults on first use.
/// After [`shutdown`] a fresh one is created.
pub fn registry() -> Arc<Registry> {
    if let Some(live) = GLOBAL_REGISTRY.read().as_ref() {
        if !live.is_shut_down() {
            return live.clone();
        }
    }

    let mut slot = GLOBAL_REGISTRY.write();
    match slot.as_ref() {
        Some(live) if !live.is_shut_down() => live.clone(),
        _ => {
            log::info!("[global::registry] Creating default process-wide registry");
            let registry = Arc::new(Registry::with_defaults());
            *slot = Some(registry.clone());
            registry
        }
    }
}

pub fn is_initialized() -> bool {
    GLOBAL_REGISTRY
        .read()
        .as_ref()
        .is_some_and(|live| !live.is_shut_down())
}

/// Tear down every scope of the process-wide registry.
/// Returns false if there was nothing to shut down.
pub fn shutdown() -> bool {
    let taken = GLOBAL_REGISTRY.write().take();
    match taken {
        Some(registry) if !registry.is_shut_down() => {
            let released = registry.shutdown();
            log::info!(
                "[global::shutdown] Process-wide registry shut down, released {} instances",
                released
            );
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FrameCounter(u64);

    // The only test in this crate that touches the process-wide registry
    #[test]
    fn test_global_lifecycle() {
        let registry = registry();
        assert!(is_initialized());
        assert!(Arc::ptr_eq(&registry, &super::registry()));
        assert!(init(RegistryConfig::default(), Arc::new(TypeCatalog::new())).is_err());

        let global = registry.global().expect("Failed to resolve global");
        let counter = registry
            .get_or_create(&global, || Ok::<_, String>(FrameCounter(1)))
            .expect("Failed to create FrameCounter");

        assert!(shutdown());
        assert!(!is_initialized());
        assert!(!counter.is_alive());
        assert!(!shutdown());

        let fresh = init(RegistryConfig::default(), Arc::new(TypeCatalog::new()))
            .expect("Failed to init after shutdown");
        assert!(!Arc::ptr_eq(&registry, &fresh));
        assert!(shutdown());
    }
}
