//! Error handling for Hearth Storages
//!
//! Every fallible registry operation returns a [`StorageResult`]. Nothing in
//! this crate is fatal to the host: a failed lookup simply yields no instance.

use crate::scope::ScopeAddress;

/// Main error type for the storage registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// A runtime type token could not be resolved to a registered type
    #[error("Unknown type: '{token}'")]
    UnknownType { token: String },

    /// The factory for a slot failed; the slot is back to `Uninitialized`
    #[error("Construction of {type_name} failed: {reason}")]
    Construction {
        type_name: &'static str,
        reason: String,
    },

    /// The scope was torn down before or during the operation
    #[error("Scope {scope} has been torn down")]
    ScopeGone { scope: ScopeAddress },

    /// The instance was released or its scope torn down; it cannot be assigned
    #[error("Instance of {type_name} has been released")]
    Released { type_name: &'static str },

    /// A slot holds an instance of a different type than requested
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A name handed to the type catalog is not a valid type path
    #[error("Invalid type name '{name}': {reason}")]
    InvalidTypeName { name: String, reason: String },

    /// Weak observation is only meaningful for owner scopes
    #[error("Scope {scope} cannot observe external instances")]
    ObserveUnsupported { scope: ScopeAddress },

    /// The registry has been shut down and accepts no new scopes
    #[error("Registry has been shut down")]
    RegistryShutDown,

    #[error("Invalid config: {field} = {value} ({reason})")]
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },
}

impl StorageError {
    pub(crate) fn construction(type_name: &'static str, reason: impl std::fmt::Display) -> Self {
        StorageError::Construction {
            type_name,
            reason: reason.to_string(),
        }
    }

    /// True when retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Construction { .. })
    }
}

/// Type alias for Results in Hearth Storages
pub type StorageResult<T> = Result<T, StorageError>;

/// Convert Option to Result with context
pub trait OptionExt<T> {
    fn ok_or_storage<F>(self, f: F) -> StorageResult<T>
    where
        F: FnOnce() -> StorageError;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_storage<F>(self, f: F) -> StorageResult<T>
    where
        F: FnOnce() -> StorageError,
    {
        self.ok_or_else(f)
    }
}
