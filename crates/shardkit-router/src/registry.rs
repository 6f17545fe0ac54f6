//! Connection pool registry
//!
//! Holds exactly one pool per [`ShardKey`]. Structural changes (`establish`,
//! `remove`) take the write lock; checkouts only clone the pool handle
//! under the read lock and then talk to the pool, which is itself safe for
//! concurrent use.

use parking_lot::RwLock;
use shardkit_core::ShardKey;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::ShardConfigCatalog;
use crate::connection::PooledConnection;
use crate::context::ShardContextStack;
use crate::driver::{ConnectionPool, Driver};
use crate::error::{Result, ShardingError};

/// Owner of every shard pool and of the optional master pool
pub struct ConnectionPoolRegistry {
    catalog: ShardConfigCatalog,
    drivers: RwLock<HashMap<String, Arc<dyn Driver>>>,
    pools: RwLock<HashMap<ShardKey, Arc<dyn ConnectionPool>>>,
    master: RwLock<Option<Arc<dyn ConnectionPool>>>,
    tag_query_logs: bool,
}

impl ConnectionPoolRegistry {
    pub fn new(catalog: ShardConfigCatalog, tag_query_logs: bool) -> Self {
        Self {
            catalog,
            drivers: RwLock::new(HashMap::new()),
            pools: RwLock::new(HashMap::new()),
            master: RwLock::new(None),
            tag_query_logs,
        }
    }

    pub fn catalog(&self) -> &ShardConfigCatalog {
        &self.catalog
    }

    pub fn tags_query_logs(&self) -> bool {
        self.tag_query_logs
    }

    /// Register the driver serving `driver.adapter()`, replacing any previous one
    pub fn register_driver(&self, driver: Arc<dyn Driver>) {
        let adapter = driver.adapter().to_string();
        info!(adapter = %adapter, "Registering driver");
        self.drivers.write().insert(adapter, driver);
    }

    /// Pool used when no shard is selected
    pub fn set_master_pool(&self, pool: Arc<dyn ConnectionPool>) {
        info!(pool = %pool.name(), "Setting master pool");
        if let Some(previous) = self.master.write().replace(pool) {
            previous.disconnect();
        }
    }

    pub fn master_pool(&self) -> Result<Arc<dyn ConnectionPool>> {
        self.master.read().clone().ok_or_else(|| {
            ShardingError::Uninitialized("no master pool configured".to_string())
        })
    }

    /// Create a fresh pool for `key` from its configuration in
    /// `environment` (default: the catalog's active environment).
    ///
    /// Any existing pool for `key` is replaced atomically and then
    /// disconnected. No connection is opened.
    pub fn establish(&self, key: &ShardKey, environment: Option<&str>) -> Result<()> {
        let config = self.catalog.connection_config(key, environment)?;
        let adapter = config.adapter().unwrap_or_default();

        let driver = self.drivers.read().get(adapter).cloned().ok_or_else(|| {
            ShardingError::ConfigNotFound(format!(
                "Shard '{}' uses adapter '{}' but no driver is registered for it",
                key, adapter
            ))
        })?;

        let pool = driver.new_pool(&key.tag(), &config)?;
        let previous = self.pools.write().insert(key.clone(), pool);

        info!(
            shard = %key,
            adapter = %adapter,
            environment = environment.unwrap_or(self.catalog.environment()),
            replaced = previous.is_some(),
            "Established connection pool"
        );

        if let Some(previous) = previous {
            previous.disconnect();
        }
        Ok(())
    }

    /// Establish every shard of the active environment.
    ///
    /// Stops at the first failure; pools established before it are kept.
    pub fn establish_all(&self) -> Result<usize> {
        let keys = self.catalog.shard_keys()?;
        for key in &keys {
            self.establish(key, None)?;
        }
        info!(count = keys.len(), "Established all shard connection pools");
        Ok(keys.len())
    }

    /// The pool for `key`
    pub fn pool(&self, key: &ShardKey) -> Result<Arc<dyn ConnectionPool>> {
        self.pools
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ShardingError::PoolNotEstablished(key.clone()))
    }

    /// Keys with an established pool
    pub fn established_keys(&self) -> Vec<ShardKey> {
        let mut keys: Vec<_> = self.pools.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Whether `key` has a pool that has opened at least one connection
    pub fn connected(&self, key: &ShardKey) -> bool {
        self.pools
            .read()
            .get(key)
            .map(|pool| pool.open_connections() > 0)
            .unwrap_or(false)
    }

    /// Dispose of the pool for `key`. Returns whether one existed.
    pub fn remove(&self, key: &ShardKey) -> bool {
        let removed = self.pools.write().remove(key);
        match removed {
            Some(pool) => {
                pool.disconnect();
                info!(shard = %key, "Removed connection pool");
                true
            }
            None => false,
        }
    }

    /// Check a connection out of `key`'s pool, blocking per the pool's
    /// wait policy. Tagged with `group:name` when query-log tagging is on.
    pub fn acquire(&self, key: &ShardKey) -> Result<PooledConnection> {
        let pool = self.pool(key)?;
        let connection = pool.checkout()?;
        let mut connection = PooledConnection::new(connection, pool);
        if self.tag_query_logs {
            connection.tag_queries(&key.tag())?;
        }
        debug!(shard = %key, connection = %connection.id(), "Checked out connection");
        Ok(connection)
    }

    /// Return `connection` to its pool
    pub fn release(&self, key: &ShardKey, connection: PooledConnection) {
        debug!(shard = %key, connection = %connection.id(), "Releasing connection");
        drop(connection);
    }

    /// Run `f` with a connection checked out for this call only.
    ///
    /// The connection goes back to the pool on every exit path.
    pub fn with_connection<T, E, F>(&self, key: &ShardKey, f: F) -> std::result::Result<T, E>
    where
        E: From<ShardingError>,
        F: FnOnce(&mut PooledConnection) -> std::result::Result<T, E>,
    {
        let mut connection = self.acquire(key)?;
        let result = f(&mut connection);
        self.release(key, connection);
        result
    }

    /// Run `f` with the connection reserved for `key` in this execution
    /// context, reserving one first if needed.
    ///
    /// The reservation outlives the call. It ends at
    /// [`release_connection`](Self::release_connection), at
    /// [`clear_active_connections`](Self::clear_active_connections), or when
    /// the enclosing `using_shard` scope for `key` exits.
    pub fn retrieve_connection<T, F>(&self, key: &ShardKey, f: F) -> Result<T>
    where
        F: FnOnce(&mut PooledConnection) -> Result<T>,
    {
        let mut connection = match ShardContextStack::take_reserved(key) {
            Some(connection) => connection,
            None => {
                let connection = self.acquire(key)?;
                debug!(shard = %key, connection = %connection.id(), "Reserved connection");
                connection
            }
        };

        let result = f(&mut connection);
        ShardContextStack::put_reserved(key.clone(), connection);
        result
    }

    /// Whether this execution context holds a reservation for `key`
    pub fn has_reserved_connection(&self, key: &ShardKey) -> bool {
        ShardContextStack::has_reserved(key)
    }

    /// Return this context's reserved connection for `key`, if any
    pub fn release_connection(&self, key: &ShardKey) -> bool {
        ShardContextStack::release_reserved(key)
    }

    /// Return every connection reserved by this execution context
    pub fn clear_active_connections(&self) -> usize {
        let released = ShardContextStack::release_all_reserved();
        if released > 0 {
            debug!(released, "Cleared active connections");
        }
        released
    }

    /// Run `f` with a connection from the master pool
    pub fn with_master_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PooledConnection) -> Result<T>,
    {
        let pool = self.master_pool()?;
        let connection = pool.checkout()?;
        let mut connection = PooledConnection::new(connection, pool);
        f(&mut connection)
    }

    /// Disconnect every pool, master included
    pub fn disconnect_all(&self) {
        let pools: Vec<_> = self.pools.write().drain().collect();
        for (key, pool) in pools {
            debug!(shard = %key, "Disconnecting pool");
            pool.disconnect();
        }
        if let Some(master) = self.master.write().take() {
            master.disconnect();
        }
        warn!("Disconnected all connection pools");
    }
}

impl std::fmt::Debug for ConnectionPoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPoolRegistry")
            .field("catalog", &self.catalog)
            .field("drivers", &self.drivers.read().keys().collect::<Vec<_>>())
            .field("pools", &self.established_keys())
            .field("master", &self.master.read().as_ref().map(|p| p.name().to_string()))
            .field("tag_query_logs", &self.tag_query_logs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDriver;
    use std::io::Write;

    const DOCUMENT: &str = r#"{
        "development": {
            "alpha": {
                "shard1": { "adapter": "memory", "database": "reg_alpha_1", "pool": 2, "checkout_timeout_ms": 50 },
                "shard2": { "adapter": "memory", "database": "reg_alpha_2" }
            },
            "beta": {
                "shard1": { "adapter": "postgres", "database": "reg_beta_1" }
            }
        }
    }"#;

    fn registry() -> (tempfile::NamedTempFile, ConnectionPoolRegistry) {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(DOCUMENT.as_bytes()).unwrap();
        let registry =
            ConnectionPoolRegistry::new(ShardConfigCatalog::new(file.path(), "development"), true);
        registry.register_driver(Arc::new(MemoryDriver::new()));
        (file, registry)
    }

    fn key(group: &str, name: &str) -> ShardKey {
        ShardKey::select(group, name).unwrap()
    }

    #[test]
    fn test_pool_requires_establish() {
        let (_file, registry) = registry();
        let shard = key("alpha", "shard1");

        assert!(matches!(
            registry.pool(&shard),
            Err(ShardingError::PoolNotEstablished(_))
        ));

        registry.establish(&shard, None).unwrap();
        assert!(registry.pool(&shard).is_ok());
        assert!(!registry.connected(&shard));
    }

    #[test]
    fn test_establish_replaces_pool() {
        let (_file, registry) = registry();
        let shard = key("alpha", "shard1");

        registry.establish(&shard, None).unwrap();
        let first = registry.pool(&shard).unwrap();
        registry.establish(&shard, None).unwrap();
        let second = registry.pool(&shard).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(first.checkout().is_err());
        assert_eq!(registry.established_keys(), vec![shard]);
    }

    #[test]
    fn test_unknown_adapter_is_config_error() {
        let (_file, registry) = registry();
        let result = registry.establish(&key("beta", "shard1"), None);
        assert!(matches!(result, Err(ShardingError::ConfigNotFound(_))));
        assert!(registry.established_keys().is_empty());
    }

    #[test]
    fn test_establish_all_aborts_on_first_failure() {
        let (_file, registry) = registry();
        assert!(registry.establish_all().is_err());
        // alpha sorts before beta, so its pools were kept
        assert_eq!(registry.established_keys().len(), 2);
    }

    #[test]
    fn test_with_connection_tags_and_releases() {
        let (_file, registry) = registry();
        let shard = key("alpha", "shard1");
        registry.establish(&shard, None).unwrap();

        let tag = registry
            .with_connection(&shard, |connection| {
                Ok::<_, ShardingError>(connection.shard_tag().map(str::to_owned))
            })
            .unwrap();
        assert_eq!(tag.as_deref(), Some("alpha:shard1"));
        assert!(registry.connected(&shard));

        // Pool size is 2: both checkouts succeed only if the first went back.
        let a = registry.acquire(&shard).unwrap();
        let b = registry.acquire(&shard).unwrap();
        drop((a, b));
    }

    #[test]
    fn test_retrieve_connection_reserves_until_released() {
        let (_file, registry) = registry();
        let shard = key("alpha", "shard1");
        registry.establish(&shard, None).unwrap();

        let first = registry
            .retrieve_connection(&shard, |c| Ok(c.id().to_string()))
            .unwrap();
        let second = registry
            .retrieve_connection(&shard, |c| Ok(c.id().to_string()))
            .unwrap();
        assert_eq!(first, second);
        assert!(registry.has_reserved_connection(&shard));

        assert!(registry.release_connection(&shard));
        assert!(!registry.has_reserved_connection(&shard));
        assert_eq!(registry.clear_active_connections(), 0);
    }

    #[test]
    fn test_master_pool() {
        let (_file, registry) = registry();
        assert!(matches!(
            registry.with_master_connection(|_| Ok(())),
            Err(ShardingError::Uninitialized(_))
        ));

        let driver = MemoryDriver::new();
        registry.set_master_pool(driver.standalone_pool("master", "reg_master", 1));
        assert!(registry.with_master_connection(|c| Ok(c.pool_name() == "master")).unwrap());
    }

    #[test]
    fn test_remove() {
        let (_file, registry) = registry();
        let shard = key("alpha", "shard2");
        registry.establish(&shard, None).unwrap();
        assert!(registry.remove(&shard));
        assert!(!registry.remove(&shard));
        assert!(registry.acquire(&shard).is_err());
    }
}
