//! Type identity for the storage registry
//!
//! - `key`: the [`TypeKey`] map key, derivable from a static type or a token
//! - `catalog_data`: reflection tokens and the catalog tables
//! - `catalog_operations`: name validation, registration and resolution

mod catalog_data;
mod catalog_operations;
mod key;

pub use catalog_data::{TypeCatalog, TypeToken};
pub use catalog_operations::validate_type_name;
pub use key::TypeKey;
