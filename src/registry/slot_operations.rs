//! Slot Operations - state transitions under the scope lock
//!
//! Every function here takes the owning scope's lock for bookkeeping only.
//! Factories and instance destructors always run with the lock released;
//! `Constructing` is the publication barrier other threads wait on.

use super::registry_data::{RegisterOutcome, RegistryCounters};
use crate::config::TeardownOrder;
use crate::error::{StorageError, StorageResult};
use crate::scope::{ScopeData, ScopeInner};
use crate::slot::{ErasedInstance, Slot, SlotState, SlotStorage};
use crate::type_key::TypeKey;
use parking_lot::MutexGuard;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Shared inputs of the slot operations
pub(crate) struct SlotContext<'a> {
    pub counters: &'a RegistryCounters,
    pub slow_construction: Option<Duration>,
}

/// How `acquire` obtained its instance
pub(crate) enum Acquired {
    Existing(Arc<dyn ErasedInstance>),
    Constructed(Arc<dyn ErasedInstance>),
}

impl Acquired {
    pub fn into_cell(self) -> Arc<dyn ErasedInstance> {
        match self {
            Acquired::Existing(cell) | Acquired::Constructed(cell) => cell,
        }
    }
}

enum Step {
    Wait,
    Proceed,
}

fn scope_gone(scope: &ScopeData) -> StorageError {
    StorageError::ScopeGone {
        scope: scope.address,
    }
}

fn reentrant(key: TypeKey) -> StorageError {
    StorageError::construction(key.name(), "re-entrant construction of the same slot")
}

/// Slot for `key`, created on first touch, with dangling instances settled
fn slot_mut(inner: &mut ScopeInner, key: TypeKey) -> &mut Slot {
    let slot = inner.slots.entry(key).or_insert_with(|| Slot::new(key));
    slot.settle_dangling();
    slot
}

/// Block until another thread's construction of `key` settles
fn wait_for_construction(
    scope: &ScopeData,
    inner: &mut MutexGuard<'_, ScopeInner>,
    key: TypeKey,
    ctx: &SlotContext<'_>,
) {
    RegistryCounters::bump(&ctx.counters.waits);
    log::trace!(
        "[SlotOperations::wait] {} in {} is constructing, waiting",
        key.short_name(),
        scope.address
    );
    scope.settled.wait(inner);
}

/// Reverts a `Constructing` slot if the factory unwinds
struct ConstructionGuard<'a> {
    scope: &'a ScopeData,
    key: TypeKey,
    armed: bool,
}

impl Drop for ConstructionGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut inner = self.scope.inner.lock();
            if let Some(slot) = inner.slots.get_mut(&self.key) {
                if slot.state == SlotState::Constructing {
                    slot.state = SlotState::Uninitialized;
                    slot.constructor = None;
                }
            }
        }
        self.scope.settled.notify_all();
        log::warn!(
            "[SlotOperations::acquire] Factory for {} in {} panicked; slot reset",
            self.key.short_name(),
            self.scope.address
        );
    }
}

/// Return the Ready instance for `key`, or construct it exactly once.
///
/// Concurrent callers block until the winning construction settles. On
/// failure the slot goes back to `Uninitialized` so a later call may retry.
pub(crate) fn acquire<F>(
    scope: &ScopeData,
    key: TypeKey,
    ctx: &SlotContext<'_>,
    factory: F,
) -> StorageResult<Acquired>
where
    F: FnOnce() -> StorageResult<Arc<dyn ErasedInstance>>,
{
    let me = thread::current().id();
    let mut inner = scope.inner.lock();

    loop {
        if inner.torn_down {
            return Err(scope_gone(scope));
        }

        let step = {
            let slot = slot_mut(&mut inner, key);
            if let Some(cell) = slot.instance() {
                return Ok(Acquired::Existing(cell));
            }
            match slot.state {
                SlotState::Constructing if slot.constructor == Some(me) => {
                    return Err(reentrant(key));
                }
                SlotState::Constructing => Step::Wait,
                _ => {
                    slot.state = SlotState::Constructing;
                    slot.constructor = Some(me);
                    Step::Proceed
                }
            }
        };

        match step {
            Step::Wait => wait_for_construction(scope, &mut inner, key, ctx),
            Step::Proceed => break,
        }
    }
    drop(inner);

    let mut guard = ConstructionGuard {
        scope,
        key,
        armed: true,
    };
    let started = Instant::now();
    let result = factory();
    let elapsed = started.elapsed();

    let mut inner = scope.inner.lock();
    guard.armed = false;

    if inner.torn_down {
        drop(inner);
        scope.settled.notify_all();
        if let Ok(cell) = result {
            cell.release();
        }
        log::debug!(
            "[SlotOperations::acquire] {} torn down while constructing {}",
            scope.address,
            key.short_name()
        );
        return Err(scope_gone(scope));
    }

    let sequence = inner.next_sequence();
    let slot = inner.slots.entry(key).or_insert_with(|| Slot::new(key));
    slot.constructor = None;

    let mut discarded = None;
    let outcome = match result {
        Ok(cell) if cell.type_key() != key => {
            slot.state = SlotState::Uninitialized;
            let found = cell.type_key().name();
            discarded = Some(cell);
            Err(StorageError::TypeMismatch {
                expected: key.name(),
                found,
            })
        }
        Ok(cell) => {
            slot.state = SlotState::Ready;
            slot.storage = SlotStorage::Owned(cell.clone());
            slot.sequence = sequence;
            slot.generation = slot.generation.wrapping_add(1);
            Ok(Acquired::Constructed(cell))
        }
        Err(e) => {
            slot.state = SlotState::Uninitialized;
            Err(e)
        }
    };
    let generation = slot.generation;
    drop(inner);
    scope.settled.notify_all();

    if let Some(cell) = discarded {
        cell.release();
    }

    match &outcome {
        Ok(_) => {
            RegistryCounters::bump(&ctx.counters.constructions);
            log::debug!(
                "[SlotOperations::acquire] Constructed {} in {} (generation {}) in {:?}",
                key.short_name(),
                scope.address,
                generation,
                elapsed
            );
            if let Some(threshold) = ctx.slow_construction {
                if elapsed > threshold {
                    log::warn!(
                        "[SlotOperations::acquire] Slow construction of {} in {}: {:?} (threshold {:?})",
                        key.name(),
                        scope.address,
                        elapsed,
                        threshold
                    );
                }
            }
        }
        Err(e) => {
            RegistryCounters::bump(&ctx.counters.construction_failures);
            log::warn!("[SlotOperations::acquire] {} in {}: {}", key.short_name(), scope.address, e);
        }
    }

    outcome
}

/// Non-constructing lookup. Never blocks on an in-flight construction.
pub(crate) fn try_get(scope: &ScopeData, key: TypeKey) -> Option<Arc<dyn ErasedInstance>> {
    let mut inner = scope.inner.lock();
    if inner.torn_down {
        return None;
    }
    let slot = inner.slots.get_mut(&key)?;
    slot.settle_dangling();
    slot.instance()
}

/// Destroy the Ready instance for `key` and mark the slot `Released`.
///
/// Waits for an in-flight construction first. Observed instances are only
/// forgotten, never destroyed. Returns false if there was nothing to release.
pub(crate) fn release(
    scope: &ScopeData,
    key: TypeKey,
    ctx: &SlotContext<'_>,
) -> StorageResult<bool> {
    let me = thread::current().id();
    let mut inner = scope.inner.lock();

    let owned = loop {
        if inner.torn_down {
            return Ok(false);
        }
        let Some(slot) = inner.slots.get_mut(&key) else {
            return Ok(false);
        };
        slot.settle_dangling();

        match slot.state {
            SlotState::Constructing if slot.constructor == Some(me) => {
                return Err(reentrant(key));
            }
            SlotState::Constructing => {}
            SlotState::Ready => {
                let owned = slot.take_owned();
                slot.storage = SlotStorage::Empty;
                slot.state = SlotState::Released;
                break owned;
            }
            SlotState::Uninitialized | SlotState::Released => return Ok(false),
        }
        wait_for_construction(scope, &mut inner, key, ctx);
    };
    drop(inner);

    match owned {
        Some(cell) => {
            let destroyed = cell.release();
            if destroyed {
                RegistryCounters::bump(&ctx.counters.releases);
            }
            log::debug!(
                "[SlotOperations::release] Released {} in {}",
                key.short_name(),
                scope.address
            );
        }
        None => log::debug!(
            "[SlotOperations::release] Forgot observed {} in {}",
            key.short_name(),
            scope.address
        ),
    }
    Ok(true)
}

/// Install a caller-provided cell under `key`, owned or observed.
///
/// Without `replace_existing` a Ready instance wins and is returned. With
/// it, the previous owned instance is released after the swap.
pub(crate) fn install(
    scope: &ScopeData,
    key: TypeKey,
    cell: Arc<dyn ErasedInstance>,
    observed: bool,
    replace_existing: bool,
    ctx: &SlotContext<'_>,
) -> StorageResult<(RegisterOutcome, Arc<dyn ErasedInstance>)> {
    let me = thread::current().id();
    let mut inner = scope.inner.lock();

    let (outcome, displaced) = loop {
        if inner.torn_down {
            return Err(scope_gone(scope));
        }
        let sequence = inner.next_sequence();
        let slot = slot_mut(&mut inner, key);

        if slot.state == SlotState::Constructing {
            if slot.constructor == Some(me) {
                return Err(reentrant(key));
            }
            wait_for_construction(scope, &mut inner, key, ctx);
            continue;
        }

        let existing = slot.instance();
        if let (Some(existing), false) = (&existing, replace_existing) {
            return Ok((RegisterOutcome::KeptExisting, existing.clone()));
        }

        let displaced = slot.take_owned();
        slot.storage = if observed {
            SlotStorage::Observed(Arc::downgrade(&cell))
        } else {
            SlotStorage::Owned(cell.clone())
        };
        slot.state = SlotState::Ready;
        slot.sequence = sequence;
        slot.generation = slot.generation.wrapping_add(1);

        let outcome = match existing {
            Some(_) => RegisterOutcome::Replaced,
            None => RegisterOutcome::Installed,
        };
        break (outcome, displaced);
    };
    drop(inner);
    scope.settled.notify_all();

    if let Some(previous) = displaced {
        let same = std::ptr::addr_eq(Arc::as_ptr(&previous), Arc::as_ptr(&cell));
        if !same && previous.release() {
            RegistryCounters::bump(&ctx.counters.releases);
        }
    }

    log::debug!(
        "[SlotOperations::install] {:?} {}{} in {}",
        outcome,
        key.short_name(),
        if observed { " (observed)" } else { "" },
        scope.address
    );
    Ok((outcome, cell))
}

/// Mark the scope torn down and hand back its owned instances in release order.
///
/// Returns `None` if the scope was already torn down. Waiters are woken and
/// will observe the teardown; in-flight constructions discard their result.
pub(crate) fn drain(
    scope: &ScopeData,
    priority_of: impl Fn(TypeKey) -> i32,
    order: TeardownOrder,
) -> Option<Vec<Arc<dyn ErasedInstance>>> {
    let slots = {
        let mut inner = scope.inner.lock();
        if inner.torn_down {
            return None;
        }
        inner.torn_down = true;
        std::mem::take(&mut inner.slots)
    };
    scope.settled.notify_all();

    let mut owned: Vec<(i32, u64, Arc<dyn ErasedInstance>)> = slots
        .into_values()
        .filter(|slot| slot.state == SlotState::Ready)
        .filter_map(|mut slot| {
            let sequence = slot.sequence;
            let priority = priority_of(slot.key);
            slot.take_owned().map(|cell| (priority, sequence, cell))
        })
        .collect();

    owned.sort_by(|a, b| {
        a.0.cmp(&b.0).then_with(|| match order {
            TeardownOrder::ReverseConstruction => b.1.cmp(&a.1),
            TeardownOrder::Construction => a.1.cmp(&b.1),
        })
    });

    Some(owned.into_iter().map(|(_, _, cell)| cell).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{ScopeAddress, ScopeId};
    use crate::slot::InstanceCell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scope() -> ScopeData {
        ScopeData::new(ScopeId(1), ScopeAddress::session(1u64))
    }

    fn cell_of(value: u32) -> Arc<dyn ErasedInstance> {
        InstanceCell::new(TypeKey::of::<u32>(), value)
    }

    fn ctx(counters: &RegistryCounters) -> SlotContext<'_> {
        SlotContext {
            counters,
            slow_construction: None,
        }
    }

    #[test]
    fn test_acquire_constructs_once() {
        let scope = scope();
        let counters = RegistryCounters::default();
        let key = TypeKey::of::<u32>();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            acquire(&scope, key, &ctx(&counters), || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(cell_of(7))
            })
            .expect("Failed to acquire u32");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(counters.snapshot(0).constructions, 1);
    }

    #[test]
    fn test_failed_construction_reverts() {
        let scope = scope();
        let counters = RegistryCounters::default();
        let key = TypeKey::of::<u32>();

        let result = acquire(&scope, key, &ctx(&counters), || {
            Err(StorageError::construction(key.name(), "nope"))
        });
        assert!(matches!(result, Err(StorageError::Construction { .. })));
        assert_eq!(
            scope.inner.lock().slots.get(&key).map(|s| s.state),
            Some(SlotState::Uninitialized)
        );
        assert!(scope
            .inner
            .lock()
            .slots
            .get(&key)
            .and_then(|s| s.constructor)
            .is_none());

        let retried = acquire(&scope, key, &ctx(&counters), || Ok(cell_of(1)));
        assert!(matches!(retried, Ok(Acquired::Constructed(_))));
    }

    #[test]
    fn test_acquire_rejects_wrong_type() {
        let scope = scope();
        let counters = RegistryCounters::default();
        let result = acquire(&scope, TypeKey::of::<u64>(), &ctx(&counters), || {
            Ok(cell_of(1))
        });
        assert!(matches!(result, Err(StorageError::TypeMismatch { .. })));
    }

    #[test]
    fn test_reentrant_construction_fails() {
        let scope = scope();
        let counters = RegistryCounters::default();
        let key = TypeKey::of::<u32>();

        let result = acquire(&scope, key, &ctx(&counters), || {
            let inner = acquire(&scope, key, &ctx(&counters), || Ok(cell_of(2)));
            assert!(matches!(inner, Err(StorageError::Construction { .. })));
            Ok(cell_of(1))
        });
        assert!(result.is_ok());
    }

    #[test]
    fn test_panicking_factory_resets_slot() {
        let scope = scope();
        let counters = RegistryCounters::default();
        let key = TypeKey::of::<u32>();

        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = acquire(&scope, key, &ctx(&counters), || panic!("factory exploded"));
        }));
        assert!(caught.is_err());
        assert_eq!(
            scope.inner.lock().slots.get(&key).map(|s| s.state),
            Some(SlotState::Uninitialized)
        );
        assert!(acquire(&scope, key, &ctx(&counters), || Ok(cell_of(3))).is_ok());
    }

    #[test]
    fn test_release_then_reacquire() {
        let scope = scope();
        let counters = RegistryCounters::default();
        let key = TypeKey::of::<u32>();

        let first = acquire(&scope, key, &ctx(&counters), || Ok(cell_of(1)))
            .expect("Failed to acquire")
            .into_cell();
        assert!(release(&scope, key, &ctx(&counters)).expect("Failed to release"));
        assert!(!first.is_alive());
        assert!(try_get(&scope, key).is_none());
        assert!(!release(&scope, key, &ctx(&counters)).expect("Failed to release"));

        let second = acquire(&scope, key, &ctx(&counters), || Ok(cell_of(2)));
        assert!(matches!(second, Ok(Acquired::Constructed(_))));
    }

    #[test]
    fn test_install_keep_or_replace() {
        let scope = scope();
        let counters = RegistryCounters::default();
        let key = TypeKey::of::<u32>();
        let first = cell_of(1);

        let (outcome, _) = install(&scope, key, first.clone(), false, false, &ctx(&counters))
            .expect("Failed to install");
        assert_eq!(outcome, RegisterOutcome::Installed);

        let (outcome, kept) = install(&scope, key, cell_of(2), false, false, &ctx(&counters))
            .expect("Failed to install");
        assert_eq!(outcome, RegisterOutcome::KeptExisting);
        assert!(std::ptr::addr_eq(Arc::as_ptr(&kept), Arc::as_ptr(&first)));

        let (outcome, _) = install(&scope, key, cell_of(3), false, true, &ctx(&counters))
            .expect("Failed to install");
        assert_eq!(outcome, RegisterOutcome::Replaced);
        assert!(!first.is_alive());
    }

    #[test]
    fn test_generation_wraps() {
        let scope = scope();
        let counters = RegistryCounters::default();
        let key = TypeKey::of::<u32>();

        install(&scope, key, cell_of(1), false, false, &ctx(&counters)).expect("Failed to install");
        if let Some(slot) = scope.inner.lock().slots.get_mut(&key) {
            slot.generation = u32::MAX;
        }
        install(&scope, key, cell_of(2), false, true, &ctx(&counters)).expect("Failed to install");
        assert_eq!(scope.inner.lock().slots.get(&key).map(|s| s.generation), Some(0));

        if let Some(slot) = scope.inner.lock().slots.get_mut(&key) {
            slot.generation = u32::MAX;
        }
        assert!(release(&scope, key, &ctx(&counters)).expect("Failed to release"));
        acquire(&scope, key, &ctx(&counters), || Ok(cell_of(3))).expect("Failed to acquire");
        assert_eq!(scope.inner.lock().slots.get(&key).map(|s| s.generation), Some(0));
    }

    #[test]
    fn test_lookup_while_instance_locked() {
        let scope = scope();
        let counters = RegistryCounters::default();
        let key = TypeKey::of::<u32>();
        let cell = InstanceCell::new(key, 4u32);
        install(&scope, key, cell.clone(), false, false, &ctx(&counters)).expect("Failed to install");

        let _writer = cell.value.write();
        assert!(try_get(&scope, key).is_some());
        assert!(matches!(
            acquire(&scope, key, &ctx(&counters), || Ok(cell_of(0))),
            Ok(Acquired::Existing(_))
        ));
        let (outcome, _) = install(&scope, key, cell_of(5), false, false, &ctx(&counters))
            .expect("Failed to install");
        assert_eq!(outcome, RegisterOutcome::KeptExisting);
    }

    #[test]
    fn test_drain_order() {
        let scope = scope();
        let counters = RegistryCounters::default();
        let a = InstanceCell::new(TypeKey::of::<u8>(), 1u8) as Arc<dyn ErasedInstance>;
        let b = InstanceCell::new(TypeKey::of::<u16>(), 2u16) as Arc<dyn ErasedInstance>;
        let c = InstanceCell::new(TypeKey::of::<u32>(), 3u32) as Arc<dyn ErasedInstance>;
        for cell in [&a, &b, &c] {
            install(&scope, cell.type_key(), cell.clone(), false, false, &ctx(&counters))
                .expect("Failed to install");
        }

        let u8_first = |key: TypeKey| if key == TypeKey::of::<u8>() { -1 } else { 0 };
        let order = drain(&scope, u8_first, TeardownOrder::ReverseConstruction)
            .expect("Scope drained twice");
        let keys: Vec<_> = order.iter().map(|cell| cell.type_key()).collect();
        assert_eq!(
            keys,
            vec![TypeKey::of::<u8>(), TypeKey::of::<u32>(), TypeKey::of::<u16>()]
        );

        assert!(drain(&scope, |_| 0, TeardownOrder::Construction).is_none());
        assert!(matches!(
            acquire(&scope, TypeKey::of::<u32>(), &ctx(&counters), || Ok(cell_of(1))),
            Err(StorageError::ScopeGone { .. })
        ));
    }
}
