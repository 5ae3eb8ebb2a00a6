//! Scopes: lifetime boundaries that own a set of slots
//!
//! Scopes are created and torn down through the [`Registry`](crate::Registry);
//! this module only defines their identity and the handle callers hold.

mod handle;
pub(crate) mod scope_data;

pub use handle::ScopeHandle;
pub use scope_data::{InstanceKey, ScopeAddress, ScopeId, ScopeKind};
pub(crate) use scope_data::{ScopeData, ScopeInner};
