//! Shard configuration catalog
//!
//! Loads the shards document (environment → shard group → shard →
//! connection parameters) once per resolved file path and caches it
//! process-wide. JSON and TOML documents are accepted, chosen by file
//! extension.
//!
//! ```text
//! {
//!   "development": {
//!     "alpha": {
//!       "shard1": { "adapter": "memory", "database": "alpha_1", "pool": 5 },
//!       "shard2": { "adapter": "memory", "database": "alpha_2" }
//!     }
//!   }
//! }
//! ```

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shardkit_core::{ShardGroupName, ShardKey, ShardName, ShardPart, ShardingConfig};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Result, ShardingError};
use crate::types::{DEFAULT_CHECKOUT_TIMEOUT_MS, DEFAULT_POOL_SIZE, TEST_ENVIRONMENT};

/// Connection parameters for one shard in one environment
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Driver adapter; a shard without one is a configuration error
    pub adapter: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    /// Maximum number of live connections in this shard's pool
    #[serde(default = "default_pool_size")]
    pub pool: u32,
    /// How long a checkout may wait for a free connection
    #[serde(default = "default_checkout_timeout_ms")]
    pub checkout_timeout_ms: u64,
    /// Driver-specific parameters not modelled above
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

fn default_checkout_timeout_ms() -> u64 {
    DEFAULT_CHECKOUT_TIMEOUT_MS
}

impl ConnectionConfig {
    /// A config for `adapter` with every other field at its default
    pub fn for_adapter(adapter: impl Into<String>) -> Self {
        Self {
            adapter: Some(adapter.into()),
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            pool: DEFAULT_POOL_SIZE,
            checkout_timeout_ms: DEFAULT_CHECKOUT_TIMEOUT_MS,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_pool(mut self, pool: u32) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_checkout_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.checkout_timeout_ms = timeout_ms;
        self
    }

    /// The adapter name, if one is set and non-blank
    pub fn adapter(&self) -> Option<&str> {
        self.adapter.as_deref().map(str::trim).filter(|a| !a.is_empty())
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("adapter", &self.adapter)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("pool", &self.pool)
            .field("checkout_timeout_ms", &self.checkout_timeout_ms)
            .field("extra", &self.extra)
            .finish()
    }
}

/// Shard groups of one environment
pub type EnvironmentShards = BTreeMap<ShardGroupName, BTreeMap<ShardName, ConnectionConfig>>;

/// Shard groups of one environment as written in the document
type RawEnvironment = BTreeMap<String, BTreeMap<String, ConnectionConfig>>;

/// A parsed shards document, keyed by environment name
#[derive(Debug, Clone, Default)]
pub struct ShardsDocument {
    environments: BTreeMap<String, Arc<EnvironmentShards>>,
}

impl ShardsDocument {
    fn parse(path: &Path, contents: &str) -> Result<Self> {
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        let parsed: BTreeMap<String, RawEnvironment> = if is_toml {
            toml::from_str(contents).map_err(|e| ShardingError::ConfigParse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        } else {
            serde_json::from_str(contents).map_err(|e| ShardingError::ConfigParse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        };

        let mut environments = BTreeMap::new();
        for (environment, raw) in parsed {
            let shards = Self::normalize(path, &environment, raw)?;
            environments.insert(environment, Arc::new(shards));
        }
        Ok(Self { environments })
    }

    /// Normalize group and shard names. Two keys that normalize to the same
    /// identifier are rejected rather than merged.
    fn normalize(path: &Path, environment: &str, raw: RawEnvironment) -> Result<EnvironmentShards> {
        let invalid = |reason: String| ShardingError::ConfigParse {
            path: path.to_path_buf(),
            reason,
        };

        let mut groups = EnvironmentShards::new();
        for (raw_group, raw_shards) in raw {
            let group = ShardGroupName::parse(&raw_group).ok_or_else(|| {
                invalid(format!("blank shard group name in environment '{}'", environment))
            })?;
            if groups.contains_key(&group) {
                return Err(invalid(format!(
                    "shard group '{}' in environment '{}' collides with another group named '{}'",
                    raw_group, environment, group
                )));
            }

            let mut shards = BTreeMap::new();
            for (raw_name, config) in raw_shards {
                let name = ShardName::parse(&raw_name).ok_or_else(|| {
                    invalid(format!(
                        "blank shard name in group '{}' of environment '{}'",
                        group, environment
                    ))
                })?;
                if shards.contains_key(&name) {
                    return Err(invalid(format!(
                        "shard '{}' in group '{}' of environment '{}' collides with another shard named '{}'",
                        raw_name, group, environment, name
                    )));
                }
                shards.insert(name, config);
            }
            groups.insert(group, shards);
        }
        Ok(groups)
    }

    pub fn environment(&self, environment: &str) -> Option<Arc<EnvironmentShards>> {
        self.environments.get(environment).cloned()
    }

    pub fn environments(&self) -> impl Iterator<Item = &str> {
        self.environments.keys().map(String::as_str)
    }
}

static DOCUMENTS: Lazy<RwLock<HashMap<PathBuf, Arc<ShardsDocument>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn resolve(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ShardingError::ConfigNotFound(format!("{} file was not found", path.display()))
        } else {
            ShardingError::ConfigParse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    })
}

/// Optional equality filters for [`ShardConfigCatalog::for_each_shard`]
#[derive(Debug, Clone, Default)]
pub struct ShardFilter {
    environment: Option<String>,
    group: Option<ShardGroupName>,
    name: Option<ShardName>,
}

impl ShardFilter {
    /// Every shard of the catalog's active environment
    pub fn all() -> Self {
        Self::default()
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Only shards of this group. A blank group leaves the filter unset.
    pub fn group(mut self, group: impl ShardPart) -> Self {
        self.group = group.shard_part().and_then(ShardGroupName::parse);
        self
    }

    /// Only shards with this name. A blank name leaves the filter unset.
    pub fn name(mut self, name: impl ShardPart) -> Self {
        self.name = name.shard_part().and_then(ShardName::parse);
        self
    }
}

/// Catalog over one shards document and one active environment
#[derive(Debug, Clone)]
pub struct ShardConfigCatalog {
    path: PathBuf,
    environment: String,
    /// Where `path` pointed the last time the document was read
    resolved: Arc<RwLock<Option<PathBuf>>>,
}

impl ShardConfigCatalog {
    pub fn new(path: impl Into<PathBuf>, environment: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            environment: environment.into(),
            resolved: Arc::new(RwLock::new(None)),
        }
    }

    pub fn from_config(config: &ShardingConfig) -> Self {
        Self::new(config.shards_config_file.clone(), config.environment.clone())
    }

    /// Parse the document at `path`, or return the cached copy.
    pub fn load(path: impl AsRef<Path>) -> Result<Arc<ShardsDocument>> {
        Self::load_resolved(resolve(path.as_ref())?)
    }

    fn load_resolved(resolved: PathBuf) -> Result<Arc<ShardsDocument>> {
        if let Some(document) = DOCUMENTS.read().get(&resolved) {
            return Ok(document.clone());
        }

        let contents = std::fs::read_to_string(&resolved).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ShardingError::ConfigNotFound(format!("{} file was not found", resolved.display()))
            } else {
                ShardingError::ConfigParse {
                    path: resolved.clone(),
                    reason: e.to_string(),
                }
            }
        })?;
        let document = Arc::new(ShardsDocument::parse(&resolved, &contents)?);

        info!(
            path = %resolved.display(),
            environments = document.environments.len(),
            "Loaded shards configuration"
        );

        // A concurrent loader may have won the race; keep whichever landed first.
        let mut documents = DOCUMENTS.write();
        Ok(documents.entry(resolved).or_insert(document).clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn document(&self) -> Result<Arc<ShardsDocument>> {
        let resolved = resolve(&self.path)?;
        *self.resolved.write() = Some(resolved.clone());
        Self::load_resolved(resolved)
    }

    /// Shard groups of `environment`
    pub fn configurations(&self, environment: &str) -> Result<Arc<EnvironmentShards>> {
        self.document()?.environment(environment).ok_or_else(|| {
            ShardingError::ConfigNotFound(format!(
                "Found no shard configurations for environment \"{}\" in {}",
                environment,
                self.path.display()
            ))
        })
    }

    /// Shard groups of the active environment
    pub fn active_configurations(&self) -> Result<Arc<EnvironmentShards>> {
        self.configurations(&self.environment)
    }

    pub fn test_configurations(&self) -> Result<Arc<EnvironmentShards>> {
        self.configurations(TEST_ENVIRONMENT)
    }

    /// Shard groups defined for the active environment
    pub fn shard_groups(&self) -> Result<Vec<ShardGroupName>> {
        Ok(self.active_configurations()?.keys().cloned().collect())
    }

    /// Shard names of `group` in the active environment
    pub fn shard_names(&self, group: impl ShardPart) -> Result<Vec<ShardName>> {
        let configurations = self.active_configurations()?;
        let shards = group
            .shard_part()
            .and_then(ShardGroupName::parse)
            .and_then(|group| configurations.get(&group))
            .ok_or_else(|| {
                ShardingError::ConfigNotFound(format!(
                    "Cannot find shard_group '{}' in environment '{}' in {}",
                    group.shard_part().unwrap_or_default(),
                    self.environment,
                    self.path.display()
                ))
            })?;
        Ok(shards.keys().cloned().collect())
    }

    /// Visit every `(group, name, config)` matching `filter`.
    ///
    /// Traversal order is deterministic (sorted) but callers must not rely on it.
    pub fn for_each_shard<F>(&self, filter: &ShardFilter, mut visit: F) -> Result<()>
    where
        F: FnMut(&ShardGroupName, &ShardName, &ConnectionConfig),
    {
        let environment = filter.environment.as_deref().unwrap_or(&self.environment);
        let configurations = self.configurations(environment)?;

        for (group, shards) in configurations.iter() {
            if filter.group.as_ref().is_some_and(|wanted| wanted != group) {
                continue;
            }
            for (name, config) in shards {
                if filter.name.as_ref().is_some_and(|wanted| wanted != name) {
                    continue;
                }
                visit(group, name, config);
            }
        }
        Ok(())
    }

    /// Every shard key of the active environment
    pub fn shard_keys(&self) -> Result<Vec<ShardKey>> {
        let mut keys = Vec::new();
        self.for_each_shard(&ShardFilter::all(), |group, name, _| {
            keys.push(ShardKey::new(group.clone(), name.clone()));
        })?;
        Ok(keys)
    }

    /// Connection parameters for `key` in `environment` (default: active).
    ///
    /// Fails with `ConfigNotFound` when the environment, group, or shard is
    /// absent, or when the shard does not name an adapter.
    pub fn connection_config(
        &self,
        key: &ShardKey,
        environment: Option<&str>,
    ) -> Result<ConnectionConfig> {
        let environment = environment.unwrap_or(&self.environment);
        let configurations = self.configurations(environment)?;

        let group = configurations.get(&key.group).ok_or_else(|| {
            ShardingError::ConfigNotFound(format!(
                "Cannot find configuration for shard_group '{}' in environment '{}' in {}",
                key.group,
                environment,
                self.path.display()
            ))
        })?;

        let config = group
            .get(&key.name)
            .filter(|config| config.adapter().is_some())
            .ok_or_else(|| {
                ShardingError::ConfigNotFound(format!(
                    "Cannot find configuration for shard '{}' in environment '{}' in {}, or it does not specify :adapter",
                    key,
                    environment,
                    self.path.display()
                ))
            })?;

        debug!(shard = %key, environment, "Resolved connection config");
        Ok(config.clone())
    }

    /// Drop the cached document so the next read goes back to the file
    pub fn invalidate_cache(&self) {
        // The file may be gone by now, so fall back to where it was read from.
        let mut targets: Vec<PathBuf> = self.resolved.read().iter().cloned().collect();
        if let Ok(current) = std::fs::canonicalize(&self.path) {
            if !targets.contains(&current) {
                targets.push(current);
            }
        }

        let mut documents = DOCUMENTS.write();
        let mut removed = 0;
        for target in &targets {
            if documents.remove(target).is_some() {
                removed += 1;
            }
        }
        debug!(path = %self.path.display(), removed, "Invalidated shards configuration cache");
    }

    /// Drop every cached document
    pub fn invalidate_all() {
        DOCUMENTS.write().clear();
    }
}
