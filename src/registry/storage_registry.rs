//! The scoped instance registry
//!
//! Owns the set of live scopes and drives every slot transition through
//! slot_operations.rs. One lock per scope; the scope table itself is a
//! sharded map so unrelated scopes never contend.

use super::registry_data::{RegisterOutcome, Registration, RegistryCounters, RegistryStats};
use super::slot_operations::{self, Acquired, SlotContext};
use crate::config::RegistryConfig;
use crate::error::{StorageError, StorageResult};
use crate::lifecycle::{ScopeEvent, TeardownListener, TeardownListeners};
use crate::scope::{InstanceKey, ScopeAddress, ScopeData, ScopeHandle, ScopeId, ScopeKind};
use crate::slot::{AssignRejected, ErasedHandle, ErasedInstance, Handle, InstanceCell, Storable};
use crate::type_key::{TypeCatalog, TypeKey, TypeToken};
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};
use std::any::Any;
use std::fmt;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

type ScopeTable = DashMap<ScopeAddress, ScopeHandle, BuildHasherDefault<FxHasher>>;

/// Type-keyed instance registry with scoped lifetimes.
///
/// Instances are constructed lazily on first access, exactly once per
/// (scope, type) even under concurrent first access, and released when
/// their scope is torn down. Tests and hosts construct isolated registries;
/// the process-wide one lives in [`crate::global`].
pub struct Registry {
    config: RegistryConfig,
    catalog: Arc<TypeCatalog>,
    scopes: ScopeTable,
    priorities: RwLock<FxHashMap<TypeKey, i32>>,
    next_scope_id: AtomicU64,
    shut_down: AtomicBool,
    counters: RegistryCounters,
    listeners: TeardownListeners,
}

impl Registry {
    /// Build a registry, resolving configured teardown priorities through `catalog`
    pub fn new(config: RegistryConfig, catalog: Arc<TypeCatalog>) -> StorageResult<Self> {
        config.validate()?;
        let priorities = config.resolve_priorities(&catalog)?;
        log::info!(
            "[Registry::new] Created registry ({} catalog types, {} teardown priorities)",
            catalog.len(),
            priorities.len()
        );
        Ok(Self::build(config, catalog, priorities))
    }

    /// Registry with default config and an empty catalog
    pub fn with_defaults() -> Self {
        Self::build(
            RegistryConfig::default(),
            Arc::new(TypeCatalog::new()),
            FxHashMap::default(),
        )
    }

    fn build(
        config: RegistryConfig,
        catalog: Arc<TypeCatalog>,
        priorities: FxHashMap<TypeKey, i32>,
    ) -> Self {
        Self {
            config,
            catalog,
            scopes: ScopeTable::default(),
            priorities: RwLock::new(priorities),
            next_scope_id: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            counters: RegistryCounters::default(),
            listeners: TeardownListeners::default(),
        }
    }

    fn slot_context(&self) -> SlotContext<'_> {
        SlotContext {
            counters: &self.counters,
            slow_construction: self.config.slow_construction_threshold(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        &self.catalog
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    // ---- Scopes ----

    /// Existing scope at `(kind, instance)`, or a fresh one
    pub fn resolve(
        &self,
        kind: ScopeKind,
        instance: impl Into<InstanceKey>,
    ) -> StorageResult<ScopeHandle> {
        if self.is_shut_down() {
            return Err(StorageError::RegistryShutDown);
        }

        let address = ScopeAddress::new(kind, instance);
        if let Some(live) = self.scopes.get(&address) {
            return Ok(live.value().clone());
        }

        let mut created = false;
        let handle = self
            .scopes
            .entry(address)
            .or_insert_with(|| {
                created = true;
                let id = ScopeId(self.next_scope_id.fetch_add(1, Ordering::Relaxed) + 1);
                ScopeHandle::new(ScopeData::new(id, address))
            })
            .value()
            .clone();

        if created {
            RegistryCounters::bump(&self.counters.scopes_created);
            log::info!("[Registry::resolve] Created scope {}", handle);

            let live = self.scopes.len();
            if live > self.config.max_live_scopes {
                log::warn!(
                    "[Registry::resolve] {} live scopes exceed the configured maximum of {}; \
                     are owners being torn down?",
                    live,
                    self.config.max_live_scopes
                );
            }

            // Lost a race with shutdown: do not leave the new scope behind
            if self.is_shut_down() {
                self.teardown_scope(&handle);
                return Err(StorageError::RegistryShutDown);
            }
        }

        Ok(handle)
    }

    pub fn global(&self) -> StorageResult<ScopeHandle> {
        self.resolve(ScopeKind::Global, InstanceKey::UNIT)
    }

    pub fn session(&self, id: impl Into<InstanceKey>) -> StorageResult<ScopeHandle> {
        self.resolve(ScopeKind::PerSession, id)
    }

    pub fn owner(&self, id: impl Into<InstanceKey>) -> StorageResult<ScopeHandle> {
        self.resolve(ScopeKind::PerOwner, id)
    }

    /// Live scope at `address` without creating one
    pub fn lookup(&self, address: ScopeAddress) -> Option<ScopeHandle> {
        self.scopes.get(&address).map(|live| live.value().clone())
    }

    /// Live scopes in creation order
    pub fn live_scopes(&self) -> Vec<ScopeHandle> {
        let mut scopes: Vec<_> = self.scopes.iter().map(|e| e.value().clone()).collect();
        scopes.sort_by_key(ScopeHandle::id);
        scopes
    }

    /// Release every slot of `scope` and forget it.
    ///
    /// Returns the number of instances destroyed. Tearing down a scope
    /// twice is a no-op returning 0. Tearing down the global scope shuts
    /// the whole registry down.
    pub fn teardown(&self, scope: &ScopeHandle) -> usize {
        if scope.kind() == ScopeKind::Global {
            return self.shutdown();
        }
        self.teardown_scope(scope)
    }

    /// Teardown of whatever scope currently lives at `address`
    pub fn teardown_address(&self, address: ScopeAddress) -> usize {
        match self.lookup(address) {
            Some(scope) => self.teardown(&scope),
            None => 0,
        }
    }

    fn teardown_scope(&self, scope: &ScopeHandle) -> usize {
        self.scopes
            .remove_if(&scope.address(), |_, live| live.id() == scope.id());

        let cells = {
            let priorities = self.priorities.read();
            slot_operations::drain(
                &scope.data,
                |key| priorities.get(&key).copied().unwrap_or(0),
                self.config.teardown_order,
            )
        };
        let Some(cells) = cells else {
            log::debug!("[Registry::teardown] {} already torn down", scope);
            return 0;
        };

        let released = cells.into_iter().filter(|cell| cell.release()).count();
        RegistryCounters::add(&self.counters.releases, released);
        RegistryCounters::bump(&self.counters.scopes_torn_down);
        log::info!(
            "[Registry::teardown] Tore down {} after {:?}, released {} instances",
            scope,
            scope.age(),
            released
        );

        self.listeners.notify(&ScopeEvent {
            address: scope.address(),
            id: scope.id(),
            released,
            timestamp: Instant::now(),
        });
        released
    }

    /// Tear down every scope: owners, then sessions, then global, each group
    /// newest first. Afterwards `resolve` fails with `RegistryShutDown`.
    pub fn shutdown(&self) -> usize {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let mut scopes: Vec<_> = self.scopes.iter().map(|e| e.value().clone()).collect();
        scopes.sort_by(|a, b| b.kind().cmp(&a.kind()).then(b.id().cmp(&a.id())));

        let count = scopes.len();
        let released: usize = scopes.iter().map(|scope| self.teardown_scope(scope)).sum();
        log::info!(
            "[Registry::shutdown] Shut down {} scopes, released {} instances",
            count,
            released
        );
        released
    }

    pub fn subscribe<L: TeardownListener + 'static>(&self, listener: &Arc<L>) {
        self.listeners.subscribe(listener);
    }

    // ---- Slots ----

    /// Return the instance of `T` in `scope`, constructing it with `factory` on first access
    pub fn get_or_create<T, E, F>(&self, scope: &ScopeHandle, factory: F) -> StorageResult<Handle<T>>
    where
        T: Storable,
        E: fmt::Display,
        F: FnOnce() -> Result<T, E>,
    {
        self.get_or_create_keyed(scope, TypeKey::of::<T>(), factory)
    }

    /// [`get_or_create`](Self::get_or_create) with a key the caller derived for `T` up front
    pub(crate) fn get_or_create_keyed<T, E, F>(
        &self,
        scope: &ScopeHandle,
        key: TypeKey,
        factory: F,
    ) -> StorageResult<Handle<T>>
    where
        T: Storable,
        E: fmt::Display,
        F: FnOnce() -> Result<T, E>,
    {
        let erased = self.get_or_create_erased(scope, key, || {
            factory()
                .map(|value| InstanceCell::new(key, value) as Arc<dyn ErasedInstance>)
                .map_err(|e| StorageError::construction(key.name(), e))
        })?;
        Handle::from_erased(erased.cell)
    }

    /// Untyped form of [`get_or_create`](Self::get_or_create)
    pub fn get_or_create_erased<F>(
        &self,
        scope: &ScopeHandle,
        key: TypeKey,
        factory: F,
    ) -> StorageResult<ErasedHandle>
    where
        F: FnOnce() -> StorageResult<Arc<dyn ErasedInstance>>,
    {
        slot_operations::acquire(&scope.data, key, &self.slot_context(), factory)
            .map(|acquired| ErasedHandle::new(acquired.into_cell()))
    }

    /// Construct through a reflection token's default factory
    pub fn get_or_create_token(
        &self,
        scope: &ScopeHandle,
        token: &TypeToken,
    ) -> StorageResult<ErasedHandle> {
        self.get_or_create_erased(scope, token.key(), || token.construct())
    }

    /// Ready instance of `T`, if any. Never constructs and never blocks.
    pub fn try_get<T: Storable>(&self, scope: &ScopeHandle) -> Option<Handle<T>> {
        self.try_get_erased(scope, TypeKey::of::<T>())
            .and_then(|handle| handle.downcast().ok())
    }

    pub fn try_get_erased(&self, scope: &ScopeHandle, key: TypeKey) -> Option<ErasedHandle> {
        slot_operations::try_get(&scope.data, key).map(ErasedHandle::new)
    }

    /// Assign `value` as the instance of `T`, constructing the slot if needed.
    ///
    /// Concurrent sets are last-write-wins.
    pub fn set<T: Storable>(&self, scope: &ScopeHandle, value: T) -> StorageResult<Handle<T>> {
        self.set_keyed(scope, TypeKey::of::<T>(), value)
    }

    pub(crate) fn set_keyed<T: Storable>(
        &self,
        scope: &ScopeHandle,
        key: TypeKey,
        value: T,
    ) -> StorageResult<Handle<T>> {
        let mut pending = Some(value);
        loop {
            let acquired = slot_operations::acquire(&scope.data, key, &self.slot_context(), || {
                pending
                    .take()
                    .map(|value| InstanceCell::new(key, value) as Arc<dyn ErasedInstance>)
                    .ok_or_else(|| StorageError::construction(key.name(), "value already consumed"))
            })?;

            match acquired {
                Acquired::Constructed(cell) => return Handle::from_erased(cell),
                Acquired::Existing(cell) => {
                    let handle = Handle::<T>::from_erased(cell)?;
                    let Some(value) = pending.take() else {
                        return Ok(handle);
                    };
                    match handle.replace(value) {
                        Ok(_previous) => return Ok(handle),
                        // Released between lookup and assignment; go again
                        Err(value) => pending = Some(value),
                    }
                }
            }
        }
    }

    /// Erased form of [`set`](Self::set) for callers holding a token
    pub fn set_erased(
        &self,
        scope: &ScopeHandle,
        token: &TypeToken,
        value: Box<dyn Any + Send>,
    ) -> StorageResult<ErasedHandle> {
        let key = token.key();
        let mut pending = Some(value);
        loop {
            let acquired = slot_operations::acquire(&scope.data, key, &self.slot_context(), || {
                match pending.take() {
                    Some(value) => token.wrap(value),
                    None => Err(StorageError::construction(key.name(), "value already consumed")),
                }
            })?;

            let cell = match (acquired, pending.take()) {
                (Acquired::Existing(cell), Some(value)) => match cell.assign_any(value) {
                    Ok(()) => cell,
                    // Released between lookup and assignment; go again
                    Err(AssignRejected::Released(value)) => {
                        pending = Some(value);
                        continue;
                    }
                    Err(AssignRejected::WrongType(_)) => {
                        return Err(StorageError::TypeMismatch {
                            expected: key.name(),
                            found: "<erased value>",
                        })
                    }
                },
                (acquired, _) => acquired.into_cell(),
            };
            return Ok(ErasedHandle::new(cell));
        }
    }

    /// Destroy the Ready instance of `key` in `scope`. Returns false if there was none.
    pub fn release(&self, scope: &ScopeHandle, key: TypeKey) -> StorageResult<bool> {
        slot_operations::release(&scope.data, key, &self.slot_context())
    }

    /// Release the slot of `key` in every live scope. Returns how many held an instance.
    pub fn release_everywhere(&self, key: TypeKey) -> usize {
        let released = self
            .live_scopes()
            .iter()
            .filter(|scope| matches!(self.release(scope, key), Ok(true)))
            .count();
        log::debug!(
            "[Registry::release_everywhere] Released {} from {} scopes",
            key.short_name(),
            released
        );
        released
    }

    /// Install a caller-built value as the instance of `T`
    pub fn register<T: Storable>(
        &self,
        scope: &ScopeHandle,
        value: T,
        replace_existing: bool,
    ) -> StorageResult<Registration<T>> {
        let key = TypeKey::of::<T>();
        let cell: Arc<dyn ErasedInstance> = InstanceCell::new(key, value);
        let (outcome, cell) = slot_operations::install(
            &scope.data,
            key,
            cell,
            false,
            replace_existing,
            &self.slot_context(),
        )?;
        Ok(Registration {
            handle: Handle::from_erased(cell)?,
            outcome,
        })
    }

    /// Make `handle`'s instance reachable under an extra key as well.
    /// Both keys share the one instance.
    pub fn register_as<T: Storable>(
        &self,
        scope: &ScopeHandle,
        alias: TypeKey,
        handle: &Handle<T>,
        replace_existing: bool,
    ) -> StorageResult<RegisterOutcome> {
        slot_operations::install(
            &scope.data,
            alias,
            handle.erased().cell,
            false,
            replace_existing,
            &self.slot_context(),
        )
        .map(|(outcome, _)| outcome)
    }

    /// Reference an instance owned outside the registry from an owner scope.
    ///
    /// The scope never destroys it. Once its owner drops it, the slot reads
    /// empty and a later `get_or_create` constructs an owned instance.
    pub fn observe<T: Storable>(
        &self,
        scope: &ScopeHandle,
        handle: &Handle<T>,
    ) -> StorageResult<RegisterOutcome> {
        if scope.kind() != ScopeKind::PerOwner {
            return Err(StorageError::ObserveUnsupported {
                scope: scope.address(),
            });
        }
        slot_operations::install(
            &scope.data,
            handle.type_key(),
            handle.erased().cell,
            true,
            true,
            &self.slot_context(),
        )
        .map(|(outcome, _)| outcome)
    }

    /// Change a type's teardown priority; lower is released first
    pub fn set_teardown_priority(&self, key: TypeKey, priority: i32) {
        self.priorities.write().insert(key, priority);
    }

    pub fn stats(&self) -> RegistryStats {
        self.counters.snapshot(self.scopes.len())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("live_scopes", &self.scopes.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
