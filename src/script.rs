//! Visual-scripting bridge
//!
//! Graph nodes pick a type by name in the editor. [`CallSite::compile`]
//! resolves that name through the [`TypeCatalog`] once, at edit time; at
//! runtime the site only carries a [`TypeToken`] and calls straight into
//! the registry. Runtime failures are logged and yield an empty result,
//! since graphs are expected to handle absent values.

use crate::error::StorageResult;
use crate::registry::Registry;
use crate::scope::ScopeHandle;
use crate::slot::ErasedHandle;
use crate::type_key::{TypeCatalog, TypeKey, TypeToken};
use std::any::Any;

/// Operation a graph node performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Get, default-constructing on first access
    Get,
    /// Lookup only
    TryGet,
    Set,
    Release,
}

/// Compiled call site for one node
#[derive(Debug, Clone)]
pub struct CallSite {
    token: TypeToken,
    kind: CallKind,
}

impl CallSite {
    /// Resolve `type_name` (following redirects) into a call site.
    /// Fails with `UnknownType` if the catalog does not know it.
    pub fn compile(catalog: &TypeCatalog, type_name: &str, kind: CallKind) -> StorageResult<Self> {
        let token = catalog.token(type_name)?;
        log::debug!(
            "[CallSite::compile] {:?} node bound to {} ({})",
            kind,
            token.name(),
            token.key()
        );
        Ok(Self { token, kind })
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn type_key(&self) -> TypeKey {
        self.token.key()
    }

    pub fn type_name(&self) -> &str {
        self.token.name()
    }

    /// Run a `Get`, `TryGet` or `Release` node.
    ///
    /// Release yields `None`; `Set` nodes must go through [`invoke_set`](Self::invoke_set).
    pub fn invoke(&self, registry: &Registry, scope: &ScopeHandle) -> Option<ErasedHandle> {
        match self.kind {
            CallKind::Get => self.report(registry.get_or_create_token(scope, &self.token)),
            CallKind::TryGet => registry.try_get_erased(scope, self.token.key()),
            CallKind::Release => {
                self.report(registry.release(scope, self.token.key()));
                None
            }
            CallKind::Set => {
                log::warn!(
                    "[CallSite::invoke] Set node for {} invoked without a value",
                    self.token.name()
                );
                None
            }
        }
    }

    /// Run a `Set` node with the value wired into it
    pub fn invoke_set(
        &self,
        registry: &Registry,
        scope: &ScopeHandle,
        value: Box<dyn Any + Send>,
    ) -> Option<ErasedHandle> {
        if self.kind != CallKind::Set {
            log::warn!(
                "[CallSite::invoke_set] {:?} node for {} cannot assign",
                self.kind,
                self.token.name()
            );
            return None;
        }
        self.report(registry.set_erased(scope, &self.token, value))
    }

    fn report<T>(&self, result: StorageResult<T>) -> Option<T> {
        result
            .map_err(|e| {
                log::warn!(
                    "[CallSite] {:?} node for {} failed: {}",
                    self.kind,
                    self.token.name(),
                    e
                );
            })
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use std::sync::Arc;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Inventory {
        slots: u8,
    }

    fn catalog() -> Arc<TypeCatalog> {
        let catalog = Arc::new(TypeCatalog::new());
        catalog
            .register::<Inventory>("game::Inventory")
            .expect("Failed to register Inventory");
        catalog
    }

    #[test]
    fn test_compile_unknown_type() {
        let catalog = catalog();
        assert!(matches!(
            CallSite::compile(&catalog, "game::Missing", CallKind::Get),
            Err(StorageError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_get_matches_native_access() {
        let catalog = catalog();
        let registry = Registry::new(Default::default(), catalog.clone())
            .expect("Failed to create registry");
        let scope = registry.global().expect("Failed to resolve global");

        let site = CallSite::compile(&catalog, "game::Inventory", CallKind::Get)
            .expect("Failed to compile call site");
        assert_eq!(site.type_key(), TypeKey::of::<Inventory>());

        let from_graph = site.invoke(&registry, &scope).expect("Get should yield");
        let native = registry
            .try_get::<Inventory>(&scope)
            .expect("Inventory should exist");
        assert!(from_graph
            .downcast::<Inventory>()
            .expect("Failed to downcast")
            .ptr_eq(&native));
    }

    #[test]
    fn test_set_and_redirect() {
        let catalog = catalog();
        catalog
            .add_redirect("legacy::Bag", "game::Inventory")
            .expect("Failed to add redirect");
        let registry = Registry::with_defaults();
        let scope = registry.session(1u64).expect("Failed to resolve session");

        let set = CallSite::compile(&catalog, "legacy::Bag", CallKind::Set)
            .expect("Failed to compile call site");
        assert_eq!(set.type_name(), "game::Inventory");
        assert!(set.invoke(&registry, &scope).is_none());
        assert!(set
            .invoke_set(&registry, &scope, Box::new(Inventory { slots: 4 }))
            .is_some());
        // Wrong value type yields empty rather than failing the graph
        assert!(set.invoke_set(&registry, &scope, Box::new(4u8)).is_none());

        let try_get = CallSite::compile(&catalog, "game::Inventory", CallKind::TryGet)
            .expect("Failed to compile call site");
        let value = try_get
            .invoke(&registry, &scope)
            .and_then(|h| h.inspect(|v| v.downcast_ref::<Inventory>().cloned()))
            .flatten();
        assert_eq!(value, Some(Inventory { slots: 4 }));

        let release = CallSite::compile(&catalog, "game::Inventory", CallKind::Release)
            .expect("Failed to compile call site");
        assert!(release.invoke(&registry, &scope).is_none());
        assert!(try_get.invoke(&registry, &scope).is_none());
    }
}
