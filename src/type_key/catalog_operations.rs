//! Type Catalog Operations
//!
//! Registration, redirects and name resolution over the catalog tables.

use super::catalog_data::TypeCatalog;
use super::{TypeKey, TypeToken};
use crate::error::{OptionExt, StorageError, StorageResult};
use crate::slot::Storable;
use regex::Regex;

/// Redirect chains longer than this are treated as cycles
const MAX_REDIRECT_DEPTH: usize = 16;

lazy_static::lazy_static! {
    static ref TYPE_PATH: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(::[A-Za-z_][A-Za-z0-9_]*)*$")
            .expect("type path pattern is valid");
}

/// Check that a name is a usable type path (`Name` or `module::Name`)
pub fn validate_type_name(name: &str) -> StorageResult<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.contains(char::is_whitespace) {
        "contains whitespace"
    } else if !TYPE_PATH.is_match(name) {
        "names with a path must separate segments with '::' (i.e. game::Inventory)"
    } else {
        return Ok(());
    };

    Err(StorageError::InvalidTypeName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `name` with `T::default()` as its factory
    pub fn register<T: Storable + Default>(&self, name: &str) -> StorageResult<TypeToken> {
        let token = TypeToken::of::<T>(name);
        self.register_token(token.clone())?;
        Ok(token)
    }

    /// Register a token built by the host reflection layer.
    ///
    /// Registering the same name for the same type again is a no-op; reusing
    /// a name for a different type is rejected.
    pub fn register_token(&self, token: TypeToken) -> StorageResult<()> {
        validate_type_name(token.name())?;

        let mut tables = self.tables.write();
        if let Some(existing) = tables.by_name.get(token.name()) {
            if existing.same_type(&token) {
                return Ok(());
            }
            return Err(StorageError::InvalidTypeName {
                name: token.name().to_string(),
                reason: format!("already registered for {}", existing.key().name()),
            });
        }
        if tables.redirects.contains_key(token.name()) {
            return Err(StorageError::InvalidTypeName {
                name: token.name().to_string(),
                reason: "name is already a redirect".to_string(),
            });
        }

        log::debug!(
            "[TypeCatalog::register] '{}' -> {} ({} bytes)",
            token.name(),
            token.key().name(),
            token.size()
        );
        tables
            .names_by_key
            .entry(token.key())
            .or_insert_with(|| token.name().to_string());
        tables.by_name.insert(token.name().to_string(), token);
        Ok(())
    }

    /// Point an old (renamed) type name at its current name
    pub fn add_redirect(&self, old_name: &str, new_name: &str) -> StorageResult<()> {
        validate_type_name(old_name)?;
        validate_type_name(new_name)?;

        let mut tables = self.tables.write();
        if tables.by_name.contains_key(old_name) {
            return Err(StorageError::InvalidTypeName {
                name: old_name.to_string(),
                reason: "name is registered to a live type".to_string(),
            });
        }
        log::debug!("[TypeCatalog::add_redirect] '{}' -> '{}'", old_name, new_name);
        tables
            .redirects
            .insert(old_name.to_string(), new_name.to_string());
        Ok(())
    }

    /// Look up the token for a name, following redirects
    pub fn token(&self, name: &str) -> StorageResult<TypeToken> {
        validate_type_name(name)?;

        let tables = self.tables.read();
        let mut current = name;
        for _ in 0..=MAX_REDIRECT_DEPTH {
            if let Some(token) = tables.by_name.get(current) {
                return Ok(token.clone());
            }
            match tables.redirects.get(current) {
                Some(next) => current = next.as_str(),
                None => break,
            }
        }

        Err(StorageError::UnknownType {
            token: name.to_string(),
        })
    }

    /// `FromRuntimeToken`: resolve a type name to its key
    pub fn resolve(&self, name: &str) -> StorageResult<TypeKey> {
        self.token(name).map(|token| token.key())
    }

    /// Token registered for a key, if any
    pub fn token_for(&self, key: TypeKey) -> StorageResult<TypeToken> {
        let tables = self.tables.read();
        tables
            .names_by_key
            .get(&key)
            .and_then(|name| tables.by_name.get(name))
            .cloned()
            .ok_or_storage(|| StorageError::UnknownType {
                token: key.name().to_string(),
            })
    }

    /// Registered name of a key, if any
    pub fn name_of(&self, key: TypeKey) -> Option<String> {
        self.tables.read().names_by_key.get(&key).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.token(name).is_ok()
    }

    /// Number of registered names (redirects excluded)
    pub fn len(&self) -> usize {
        self.tables.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
