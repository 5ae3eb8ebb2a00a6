//! Registry: scopes, slots and the get-or-create protocol
//!
//! - `registry_data`: counters, stats and registration results
//! - `slot_operations`: slot state transitions under the scope lock
//! - `storage_registry`: the [`Registry`] tying scopes and slots together

mod storage_registry;
mod registry_data;
mod slot_operations;

pub use storage_registry::Registry;
pub use registry_data::{RegisterOutcome, Registration, RegistryStats};
