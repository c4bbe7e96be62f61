//! Registry configuration.
//!
//! Loaded once at startup from YAML, optionally overridden from
//! `CARREL_*` environment variables, validated, and then turned into the
//! read-only [`MountTable`] used for cache key derivation.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ConfigError, RegistryError, RegistryResult};
use crate::path;

// ============================================================================
// DATABASE & REMOTE INSTANCES
// ============================================================================

/// Connection settings for one backing database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl DatabaseConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            username: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Identity of the physical store: `<user-without-realm>@<url>`.
    pub fn connection_id(&self) -> String {
        let user = self
            .username
            .as_deref()
            .and_then(|u| u.split('@').next())
            .unwrap_or("");
        format!("{}@{}", user, self.url)
    }
}

/// A remote registry instance that mounts may point at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteInstanceConfig {
    pub id: String,
    /// Name of a configured database
    #[serde(default)]
    pub db_config: Option<String>,
    /// Explicit cache partition; takes precedence over `db_config`
    #[serde(default)]
    pub cache_id: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

/// A configured mount: `path` is served from `target_path` on `instance_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    pub path: String,
    pub target_path: String,
    pub instance_id: String,
}

// ============================================================================
// CACHE & EVENTING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Upper bound on cached entries; unbounded when unset
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventingPattern {
    /// Regular expression matched against the whole path
    pub pattern: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventingConfig {
    #[serde(default)]
    pub default_url: Option<String>,
    #[serde(default)]
    pub patterns: Vec<EventingPattern>,
}

// ============================================================================
// REGISTRY CONFIG
// ============================================================================

/// Top-level registry configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
    /// Name of the database backing the local registry
    #[serde(default)]
    pub default_database: Option<String>,
    #[serde(default)]
    pub remote_instances: Vec<RemoteInstanceConfig>,
    /// Mounts in declaration order; the first match wins
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
    /// Regular expressions for paths that must never be cached
    #[serde(default)]
    pub no_cache_paths: Vec<String>,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub eventing: EventingConfig,
    /// Base prefix when the registry is chrooted
    #[serde(default)]
    pub chroot: Option<String>,
}

impl RegistryConfig {
    /// Parse configuration from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> RegistryResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            RegistryError::Config(ConfigError::Parse {
                reason: e.to_string(),
            })
        })
    }

    /// Read and parse a YAML configuration file.
    pub fn from_yaml_file(file: impl AsRef<Path>) -> RegistryResult<Self> {
        let file = file.as_ref();
        let yaml = std::fs::read_to_string(file).map_err(|e| {
            RegistryError::Config(ConfigError::Io {
                path: file.display().to_string(),
                reason: e.to_string(),
            })
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Default configuration with environment overrides applied.
    pub fn from_env() -> RegistryResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment overrides.
    ///
    /// - `CARREL_DB_URL`: URL of the default database (created if absent)
    /// - `CARREL_DB_USERNAME`: username of the default database
    /// - `CARREL_CHROOT`: chroot base prefix
    /// - `CARREL_CACHE_ENABLED`: "true"/"1" or "false"/"0"
    /// - `CARREL_CACHE_MAX_ENTRIES`: positive integer
    pub fn apply_env_overrides(&mut self) -> RegistryResult<()> {
        if let Ok(url) = std::env::var("CARREL_DB_URL") {
            self.default_database_mut().url = url;
        }
        if let Ok(username) = std::env::var("CARREL_DB_USERNAME") {
            self.default_database_mut().username = Some(username);
        }
        if let Ok(chroot) = std::env::var("CARREL_CHROOT") {
            self.chroot = Some(chroot);
        }
        if let Ok(enabled) = std::env::var("CARREL_CACHE_ENABLED") {
            self.cache.enabled = match enabled.as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    return Err(RegistryError::Config(ConfigError::InvalidValue {
                        field: "CARREL_CACHE_ENABLED".to_string(),
                        value: other.to_string(),
                        reason: "expected true, false, 1 or 0".to_string(),
                    }))
                }
            };
        }
        if let Ok(max) = std::env::var("CARREL_CACHE_MAX_ENTRIES") {
            let parsed = max.parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(|| {
                RegistryError::Config(ConfigError::InvalidValue {
                    field: "CARREL_CACHE_MAX_ENTRIES".to_string(),
                    value: max.clone(),
                    reason: "expected a positive integer".to_string(),
                })
            })?;
            self.cache.max_entries = Some(parsed);
        }
        Ok(())
    }

    fn default_database_mut(&mut self) -> &mut DatabaseConfig {
        let name = self
            .default_database
            .get_or_insert_with(|| "default".to_string())
            .clone();
        let idx = match self.databases.iter().position(|d| d.name == name) {
            Some(idx) => idx,
            None => {
                self.databases.push(DatabaseConfig::new(name, ""));
                self.databases.len() - 1
            }
        };
        &mut self.databases[idx]
    }

    pub fn database(&self, name: &str) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|d| d.name == name)
    }

    pub fn default_database_config(&self) -> Option<&DatabaseConfig> {
        self.default_database
            .as_deref()
            .and_then(|name| self.database(name))
    }

    pub fn remote_instance(&self, id: &str) -> Option<&RemoteInstanceConfig> {
        self.remote_instances.iter().find(|i| i.id == id)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> RegistryResult<()> {
        if let Some(name) = &self.default_database {
            if self.database(name).is_none() {
                return Err(RegistryError::Config(ConfigError::UnknownDatabase {
                    name: name.clone(),
                }));
            }
        }

        for (idx, instance) in self.remote_instances.iter().enumerate() {
            match (&instance.cache_id, &instance.db_config) {
                (None, None) => {
                    return Err(RegistryError::Config(ConfigError::MissingRequired {
                        field: format!("remote_instances[{}].db_config", idx),
                    }))
                }
                (None, Some(db)) if self.database(db).is_none() => {
                    return Err(RegistryError::Config(ConfigError::UnknownDatabase {
                        name: db.clone(),
                    }))
                }
                _ => {}
            }
        }

        for (idx, mount) in self.mounts.iter().enumerate() {
            for (field, value) in [("path", &mount.path), ("target_path", &mount.target_path)] {
                if !value.starts_with('/') {
                    return Err(RegistryError::Config(ConfigError::InvalidValue {
                        field: format!("mounts[{}].{}", idx, field),
                        value: value.clone(),
                        reason: "mount paths must be absolute".to_string(),
                    }));
                }
            }
            if self.remote_instance(&mount.instance_id).is_none() {
                return Err(RegistryError::Config(ConfigError::UnknownInstance {
                    instance_id: mount.instance_id.clone(),
                }));
            }
        }

        if let Some(chroot) = &self.chroot {
            if !chroot.starts_with('/') {
                return Err(RegistryError::Config(ConfigError::InvalidValue {
                    field: "chroot".to_string(),
                    value: chroot.clone(),
                    reason: "chroot must be absolute".to_string(),
                }));
            }
        }

        for pattern in self.no_cache_paths.iter().chain(self.eventing.patterns.iter().map(|p| &p.pattern)) {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(RegistryError::Config(ConfigError::InvalidValue {
                    field: "pattern".to_string(),
                    value: pattern.clone(),
                    reason: e.to_string(),
                }));
            }
        }

        Ok(())
    }

    /// Build the mount table in declaration order.
    ///
    /// An instance with a `cache_id` maps to a cache partition; otherwise
    /// its database configuration is used.
    pub fn mount_table(&self) -> RegistryResult<MountTable> {
        let mut table = MountTable::new();
        for mount in &self.mounts {
            let instance = self.remote_instance(&mount.instance_id).ok_or_else(|| {
                RegistryError::Config(ConfigError::UnknownInstance {
                    instance_id: mount.instance_id.clone(),
                })
            })?;
            let target = match (&instance.cache_id, &instance.db_config) {
                (Some(cache_id), _) => MountTarget::CachePartition(cache_id.clone()),
                (None, Some(db)) => {
                    let config = self.database(db).ok_or_else(|| {
                        RegistryError::Config(ConfigError::UnknownDatabase { name: db.clone() })
                    })?;
                    MountTarget::Database(config.clone())
                }
                (None, None) => {
                    return Err(RegistryError::Config(ConfigError::MissingRequired {
                        field: format!("remote_instances.{}.db_config", instance.id),
                    }))
                }
            };
            table.push(MountEntry {
                source_prefix: mount.path.clone(),
                target_prefix: mount.target_path.clone(),
                target,
            });
        }
        Ok(table)
    }
}

// ============================================================================
// MOUNT TABLE
// ============================================================================

/// Where a mounted prefix is physically stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountTarget {
    Database(DatabaseConfig),
    CachePartition(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source_prefix: String,
    pub target_prefix: String,
    pub target: MountTarget,
}

impl MountEntry {
    /// Rewrite `path` into the target prefix if this entry matches it.
    pub fn rewrite(&self, path: &str) -> Option<String> {
        path.strip_prefix(&self.source_prefix)
            .map(|rest| format!("{}{}", self.target_prefix, rest))
    }
}

/// Ordered mount table. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<MountEntry>) -> Self {
        Self { entries }
    }

    pub fn push(&mut self, entry: MountEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// First entry, in declaration order, whose source prefix prefixes `path`.
    pub fn first_match(&self, path: &str) -> Option<&MountEntry> {
        self.entries
            .iter()
            .find(|e| path.starts_with(&e.source_prefix))
    }
}

/// True when `path` falls under `prefix` as a path, not merely as a string.
pub fn is_under(path: &str, prefix: &str) -> bool {
    path == prefix || path::is_descendant(path, prefix)
}
