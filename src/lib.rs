// Hearth Storages - type-keyed scoped instance storage
//
// Maps storable types to instances whose lifetime is bound to a scope:
// - Global: the process
// - PerSession: one session / world
// - PerOwner: one host object
//
// Instances are constructed lazily, exactly once per (scope, type), and
// released when their scope is torn down. Native code goes through the
// `accessor` functions; visual-scripting graphs go through `script` call
// sites compiled from type names at edit time. Both end up in the same
// `Registry` calls.

// Core types
pub mod error;
pub mod config;
pub mod type_key;
pub mod slot;
pub mod scope;

// Registry and its front ends
pub mod registry;
pub mod accessor;
pub mod script;
pub mod lifecycle;
pub mod global;

pub use accessor::Accessor;
pub use config::{RegistryConfig, TeardownOrder};
pub use error::{OptionExt, StorageError, StorageResult};
pub use lifecycle::{HostLifecycle, OwnerGuard, ScopeEvent, TeardownListener};
pub use registry::{RegisterOutcome, Registration, Registry, RegistryStats};
pub use scope::{InstanceKey, ScopeAddress, ScopeHandle, ScopeId, ScopeKind};
pub use script::{CallKind, CallSite};
pub use slot::{ErasedHandle, Handle, ReadHandle, SlotState, Storable};
pub use type_key::{TypeCatalog, TypeKey, TypeToken};
