//! Registry configuration
//!
//! Loaded from TOML by the host, validated before a [`Registry`](crate::Registry)
//! is built from it.

use crate::error::{StorageError, StorageResult};
use crate::type_key::{TypeCatalog, TypeKey};
use anyhow::Context;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Order in which sibling slots of one scope are released on teardown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownOrder {
    /// Last constructed, first released
    #[default]
    ReverseConstruction,
    /// First constructed, first released
    Construction,
}

/// Registry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub teardown_order: TeardownOrder,
    /// Registered type name to teardown priority; lower goes first, default 0
    pub teardown_priorities: BTreeMap<String, i32>,
    /// Factories slower than this log a warning; 0 disables the check
    pub slow_construction_warn_ms: u64,
    /// Soft cap on live scopes; exceeding it only warns
    pub max_live_scopes: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            teardown_order: TeardownOrder::default(),
            teardown_priorities: BTreeMap::new(),
            slow_construction_warn_ms: 50,
            max_live_scopes: 65_536,
        }
    }
}

impl RegistryConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        let config: RegistryConfig =
            toml::from_str(source).context("RegistryConfig: malformed TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("RegistryConfig: failed to read {}", path.display()))?;
        let config = Self::from_toml_str(&source)
            .with_context(|| format!("RegistryConfig: invalid config in {}", path.display()))?;
        log::info!("[RegistryConfig::load] Loaded {}", path.display());
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> StorageResult<()> {
        if self.max_live_scopes == 0 {
            return Err(StorageError::InvalidConfig {
                field: "max_live_scopes".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        for name in self.teardown_priorities.keys() {
            crate::type_key::validate_type_name(name).map_err(|e| {
                StorageError::InvalidConfig {
                    field: format!("teardown_priorities.{}", name),
                    value: name.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        log::debug!(
            "[RegistryConfig] Validated: order={:?}, priorities={}, slow_warn={}ms, max_scopes={}",
            self.teardown_order,
            self.teardown_priorities.len(),
            self.slow_construction_warn_ms,
            self.max_live_scopes
        );
        Ok(())
    }

    /// Map configured priorities onto type keys through the catalog
    pub fn resolve_priorities(
        &self,
        catalog: &TypeCatalog,
    ) -> StorageResult<FxHashMap<TypeKey, i32>> {
        let mut resolved = FxHashMap::default();
        for (name, priority) in &self.teardown_priorities {
            let key = catalog.resolve(name).map_err(|e| StorageError::InvalidConfig {
                field: format!("teardown_priorities.{}", name),
                value: priority.to_string(),
                reason: e.to_string(),
            })?;
            resolved.insert(key, *priority);
        }
        Ok(resolved)
    }

    pub fn slow_construction_threshold(&self) -> Option<Duration> {
        (self.slow_construction_warn_ms > 0)
            .then(|| Duration::from_millis(self.slow_construction_warn_ms))
    }
}
