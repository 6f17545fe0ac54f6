//! Sharding facade
//!
//! [`Sharding`] ties one catalog, one pool registry, and the process
//! settings together and is the object applications hold on to:
//!
//! ```rust,ignore
//! let sharding = Sharding::builder(ShardingConfig::from_env())
//!     .driver(Arc::new(MemoryDriver::new()))
//!     .setup()?;
//!
//! sharding.using_shard("alpha", "shard1", || {
//!     Query::table("users").insert(&sharding, json!({"id": 1}))
//! })?;
//! ```

use shardkit_core::{ShardGroupName, ShardKey, ShardName, ShardPart, ShardingConfig};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::catalog::{ConnectionConfig, EnvironmentShards, ShardConfigCatalog, ShardFilter};
use crate::context::ShardContextStack;
use crate::driver::{ConnectionPool, Driver, QueryResult};
use crate::error::{Result, ShardingError};
use crate::query::Executor;
use crate::registry::ConnectionPoolRegistry;
use crate::router::ShardRouter;
use crate::scope::ShardScope;

/// Builder for [`Sharding`]
pub struct ShardingBuilder {
    config: ShardingConfig,
    drivers: Vec<Arc<dyn Driver>>,
    master: Option<Arc<dyn ConnectionPool>>,
}

impl ShardingBuilder {
    /// Register a driver for the adapter it serves
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.drivers.push(driver);
        self
    }

    /// Pool used when no shard is selected
    pub fn master_pool(mut self, pool: Arc<dyn ConnectionPool>) -> Self {
        self.master = Some(pool);
        self
    }

    /// Adjust the settings before setup
    pub fn configure(mut self, f: impl FnOnce(&mut ShardingConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Load the shards document and, when configured, establish a pool for
    /// every shard of the active environment.
    pub fn setup(self) -> Result<Sharding> {
        let catalog = ShardConfigCatalog::from_config(&self.config);
        // Fail early on a missing or broken document or environment.
        catalog.active_configurations()?;

        let registry = Arc::new(ConnectionPoolRegistry::new(
            catalog,
            self.config.add_shard_tag_to_query_logs,
        ));
        for driver in self.drivers {
            registry.register_driver(driver);
        }
        if let Some(master) = self.master {
            registry.set_master_pool(master);
        }

        if self.config.establish_all_connections_on_setup {
            registry.establish_all()?;
        }

        info!(
            environment = %self.config.environment,
            shards_config_file = %self.config.shards_config_file.display(),
            established = registry.established_keys().len(),
            "Sharding set up"
        );

        Ok(Sharding {
            scope: ShardScope::from_config(&self.config),
            router: ShardRouter::new(registry.clone()),
            registry,
            config: self.config,
        })
    }
}

/// Entry point to shard routing
#[derive(Debug, Clone)]
pub struct Sharding {
    config: ShardingConfig,
    registry: Arc<ConnectionPoolRegistry>,
    router: ShardRouter,
    scope: ShardScope,
}

impl Sharding {
    pub fn builder(config: ShardingConfig) -> ShardingBuilder {
        ShardingBuilder {
            config,
            drivers: Vec::new(),
            master: None,
        }
    }

    pub fn config(&self) -> &ShardingConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionPoolRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &ShardConfigCatalog {
        self.registry.catalog()
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    pub fn scope(&self) -> ShardScope {
        self.scope
    }

    /// Run `body` with `(group, name)` selected; see [`ShardScope::using_shard`]
    pub fn using_shard<T, F>(&self, group: impl ShardPart, name: impl ShardPart, body: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.scope.using_shard(group, name, body)
    }

    /// Async form of [`Sharding::using_shard`]
    pub fn using_shard_async<F>(
        &self,
        group: impl ShardPart,
        name: impl ShardPart,
        body: F,
    ) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        self.scope.using_shard_async(group, name, body)
    }

    /// The current selection, `None` for master
    pub fn current_shard(&self) -> Option<ShardKey> {
        ShardContextStack::current()
    }

    /// Forget every selection of this execution context
    pub fn connect_back_to_master(&self) {
        ShardContextStack::reset();
    }

    /// Shard groups of `environment` (default: the active one)
    pub fn configurations(&self, environment: Option<&str>) -> Result<Arc<EnvironmentShards>> {
        match environment {
            Some(environment) => self.catalog().configurations(environment),
            None => self.catalog().active_configurations(),
        }
    }

    pub fn test_configurations(&self) -> Result<Arc<EnvironmentShards>> {
        self.catalog().test_configurations()
    }

    pub fn shard_groups(&self) -> Result<Vec<ShardGroupName>> {
        self.catalog().shard_groups()
    }

    pub fn shard_names(&self, group: impl ShardPart) -> Result<Vec<ShardName>> {
        self.catalog().shard_names(group)
    }

    pub fn for_each_shard<F>(&self, filter: &ShardFilter, visit: F) -> Result<()>
    where
        F: FnMut(&ShardGroupName, &ShardName, &ConnectionConfig),
    {
        self.catalog().for_each_shard(filter, visit)
    }

    /// Establish (or re-establish) the pool for `(group, name)`
    pub fn establish(
        &self,
        group: impl ShardPart,
        name: impl ShardPart,
        environment: Option<&str>,
    ) -> Result<ShardKey> {
        let key = self.key(group, name)?;
        self.registry.establish(&key, environment)?;
        Ok(key)
    }

    pub fn establish_all(&self) -> Result<usize> {
        self.registry.establish_all()
    }

    pub fn remove(&self, group: impl ShardPart, name: impl ShardPart) -> Result<bool> {
        let key = self.key(group, name)?;
        Ok(self.registry.remove(&key))
    }

    /// Whether `(group, name)` has opened at least one connection
    pub fn connected(&self, group: impl ShardPart, name: impl ShardPart) -> bool {
        ShardKey::select(group, name)
            .map(|key| self.registry.connected(&key))
            .unwrap_or(false)
    }

    /// Return every connection reserved by this execution context
    pub fn clear_active_connections(&self) -> usize {
        self.registry.clear_active_connections()
    }

    fn key(&self, group: impl ShardPart, name: impl ShardPart) -> Result<ShardKey> {
        let raw = format!(
            "{}:{}",
            group.shard_part().unwrap_or_default(),
            name.shard_part().unwrap_or_default()
        );
        ShardKey::select(group, name).ok_or_else(|| {
            ShardingError::ConfigNotFound(format!(
                "'{}' does not name a shard: group and name must both be set",
                raw
            ))
        })
    }
}

impl Executor for Sharding {
    fn run(&self, sql: &str) -> Result<QueryResult> {
        self.router.run(sql)
    }
}

impl From<&Sharding> for ShardScope {
    fn from(sharding: &Sharding) -> Self {
        sharding.scope
    }
}
