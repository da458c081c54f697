//! Configuration management for Palisade
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (PALISADE_* prefix, `__` between section and key)
//! 2. palisade.local.toml (gitignored, local overrides)
//! 3. palisade.toml (git-tracked, project config)
//! 4. ~/.config/palisade/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)
//!
//! The action/resource catalog lives here rather than in compiled-in
//! constants, so a deployment can add resource types or actions without
//! recompiling the engine.

use anyhow::Result;
use palisade_types::{Action, ClearanceLevel, NetworkRange, ResourceType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Palisade configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PalisadeConfig {
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub audit: AuditConfig,
    pub bulk: BulkConfig,
    pub network: NetworkConfig,
    pub catalog: CatalogConfig,
    pub policies: PolicySourceConfig,
}

/// Wall-clock settings used to derive environment attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// First business hour (inclusive).
    pub business_hours_start: u32,
    /// Last business hour (exclusive).
    pub business_hours_end: u32,
    /// Offset from UTC of the wall clock that business hours refer to.
    pub utc_offset_minutes: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            business_hours_start: 8,
            business_hours_end: 18,
            utc_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Oldest entries are dropped once this many are retained.
    pub max_entries: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    pub parallel: bool,
    /// Requests per work unit; cancellation is observed between chunks.
    pub chunk_size: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            chunk_size: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// CIDR blocks whose addresses count as a trusted network.
    pub trusted_networks: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            trusted_networks: vec![
                "127.0.0.0/8".to_string(),
                "::1/128".to_string(),
                "10.0.0.0/8".to_string(),
                "172.16.0.0/12".to_string(),
                "192.168.0.0/16".to_string(),
            ],
        }
    }
}

impl NetworkConfig {
    /// Parses the configured CIDR blocks.
    pub fn ranges(&self) -> Result<Vec<NetworkRange>, ConfigError> {
        self.trusted_networks
            .iter()
            .map(|cidr| {
                cidr.parse::<NetworkRange>()
                    .map_err(|e| ConfigError::ValidationError(e.to_string()))
            })
            .collect()
    }
}

/// One resource type and the actions that can be checked against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub resource_type: ResourceType,
    pub actions: Vec<Action>,
    /// Classification assumed when the directory has no record for a resource.
    #[serde(default)]
    pub classification: ClearanceLevel,
    #[serde(default)]
    pub audit_required: bool,
}

impl CatalogEntry {
    pub fn new(
        resource_type: ResourceType,
        actions: impl IntoIterator<Item = Action>,
        classification: ClearanceLevel,
        audit_required: bool,
    ) -> Self {
        Self {
            resource_type,
            actions: actions.into_iter().collect(),
            classification,
            audit_required,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub resources: Vec<CatalogEntry>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        use Action::{Approve, Create, Delete, Export, Import, Manage, Reject, Update, View};
        use ClearanceLevel::{Confidential, Internal, Restricted};

        Self {
            resources: vec![
                CatalogEntry::new(
                    ResourceType::PurchaseRequest,
                    [View, Create, Update, Delete, Approve, Reject, Export],
                    Confidential,
                    true,
                ),
                CatalogEntry::new(
                    ResourceType::Inventory,
                    [View, Create, Update, Delete, Export, Import],
                    Internal,
                    false,
                ),
                CatalogEntry::new(
                    ResourceType::Department,
                    [View, Create, Update, Delete, Manage],
                    Internal,
                    false,
                ),
                CatalogEntry::new(
                    ResourceType::Location,
                    [View, Create, Update, Delete, Manage],
                    Internal,
                    false,
                ),
                CatalogEntry::new(
                    ResourceType::WastageReport,
                    [View, Create, Update, Delete, Approve, Export],
                    Internal,
                    true,
                ),
                CatalogEntry::new(ResourceType::Report, [View, Export], Confidential, false),
                CatalogEntry::new(
                    ResourceType::User,
                    [View, Create, Update, Delete, Manage],
                    Restricted,
                    true,
                ),
                CatalogEntry::new(
                    ResourceType::Role,
                    [View, Create, Update, Delete, Manage],
                    Restricted,
                    true,
                ),
                CatalogEntry::new(
                    ResourceType::Policy,
                    [View, Create, Update, Delete, Manage],
                    Restricted,
                    true,
                ),
                CatalogEntry::new(
                    ResourceType::AuditLog,
                    [View, Export, Delete],
                    Restricted,
                    true,
                ),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySourceConfig {
    /// JSON document holding the initial policy set.
    pub file: Option<PathBuf>,
}

impl PalisadeConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Parse a single TOML file without layering.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants the type system cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let start = self.engine.business_hours_start;
        let end = self.engine.business_hours_end;
        if end > 24 || start >= end {
            return Err(ConfigError::ValidationError(format!(
                "business hours window [{start}, {end}) is empty or exceeds 24h"
            )));
        }
        if self.engine.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::ValidationError(format!(
                "utc_offset_minutes {} is outside (-1440, 1440)",
                self.engine.utc_offset_minutes
            )));
        }
        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "cache.capacity must be > 0 when the cache is enabled".to_string(),
            ));
        }
        if self.bulk.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "bulk.chunk_size must be > 0".to_string(),
            ));
        }
        self.network.ranges()?;

        let mut seen = std::collections::HashSet::new();
        for entry in &self.catalog.resources {
            if !seen.insert(&entry.resource_type) {
                return Err(ConfigError::ValidationError(format!(
                    "resource type '{}' appears twice in the catalog",
                    entry.resource_type
                )));
            }
        }
        Ok(())
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if let Some(file) = &self.policies.file {
            if file.is_relative() {
                self.policies.file = Some(base.join(file));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PalisadeConfig::default();
        assert_eq!(config.engine.business_hours_start, 8);
        assert_eq!(config.engine.business_hours_end, 18);
        assert!(config.cache.enabled);
        assert_eq!(config.catalog.resources.len(), ResourceType::BUILT_IN.len());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_catalog_covers_purchase_approval() {
        let config = PalisadeConfig::default();
        let entry = config
            .catalog
            .resources
            .iter()
            .find(|e| e.resource_type == ResourceType::PurchaseRequest)
            .expect("purchase-request entry");
        assert!(entry.actions.contains(&Action::Approve));
        assert!(entry.audit_required);
    }

    #[test]
    fn test_validate_rejects_inverted_hours() {
        let mut config = PalisadeConfig::default();
        config.engine.business_hours_start = 18;
        config.engine.business_hours_end = 8;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_cidr() {
        let mut config = PalisadeConfig::default();
        config.network.trusted_networks.push("10.0.0.0/99".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_catalog_entry() {
        let mut config = PalisadeConfig::default();
        let dup = config.catalog.resources[0].clone();
        config.catalog.resources.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_path_resolution() {
        let mut config = PalisadeConfig::default();
        config.policies.file = Some(PathBuf::from("policies.json"));
        config.resolve_paths("/srv/app");

        assert_eq!(
            config.policies.file,
            Some(PathBuf::from("/srv/app/policies.json"))
        );
    }
}
