//! In-memory driver
//!
//! Serves adapter `"memory"`. Each distinct `database` name in the shards
//! document maps to one [`MemoryDatabase`] shared by every pool that names
//! it, so re-establishing a shard keeps its data.

mod database;
mod pool;

pub use database::MemoryDatabase;
pub use pool::{MemoryConnection, MemoryPool, PoolStats};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::catalog::ConnectionConfig;
use crate::driver::{ConnectionPool, Driver};
use crate::error::DriverError;
use crate::types::MEMORY_ADAPTER;

/// Driver for in-memory databases
#[derive(Default)]
pub struct MemoryDriver {
    databases: Mutex<HashMap<String, Arc<MemoryDatabase>>>,
    pools: Mutex<HashMap<String, Arc<MemoryPool>>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The database called `name`, created on first use
    pub fn database(&self, name: &str) -> Arc<MemoryDatabase> {
        self.databases
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryDatabase::new(name)))
            .clone()
    }

    /// The most recent pool created under `name`
    pub fn pool(&self, name: &str) -> Option<Arc<MemoryPool>> {
        self.pools.lock().get(name).cloned()
    }

    /// A pool that is not tied to any shard, e.g. for the master database
    pub fn standalone_pool(&self, name: &str, database: &str, size: usize) -> Arc<MemoryPool> {
        Arc::new(MemoryPool::new(
            name,
            self.database(database),
            size,
            Duration::from_millis(crate::types::DEFAULT_CHECKOUT_TIMEOUT_MS),
        ))
    }
}

impl Driver for MemoryDriver {
    fn adapter(&self) -> &str {
        MEMORY_ADAPTER
    }

    fn new_pool(
        &self,
        name: &str,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn ConnectionPool>, DriverError> {
        let database_name = config.database.as_deref().unwrap_or(name);
        let pool = Arc::new(MemoryPool::new(
            name,
            self.database(database_name),
            config.pool as usize,
            Duration::from_millis(config.checkout_timeout_ms),
        ));

        info!(
            pool = name,
            database = database_name,
            size = pool.size(),
            "Created in-memory pool"
        );

        self.pools.lock().insert(name.to_string(), pool.clone());
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pools_share_database_by_name() {
        let driver = MemoryDriver::new();
        let config = ConnectionConfig::for_adapter(MEMORY_ADAPTER).with_database("shared");

        let first = driver.new_pool("a:1", &config).unwrap();
        let second = driver.new_pool("a:2", &config).unwrap();

        let mut connection = first.checkout().unwrap();
        connection
            .execute(r#"INSERT INTO things {"id":1}"#, None)
            .unwrap();
        first.checkin(connection);

        let mut connection = second.checkout().unwrap();
        let rows = connection.execute("SELECT * FROM things", None).unwrap().rows;
        second.checkin(connection);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_pool_respects_config() {
        let driver = MemoryDriver::new();
        let config = ConnectionConfig::for_adapter(MEMORY_ADAPTER)
            .with_pool(2)
            .with_checkout_timeout_ms(10);

        let pool = driver.new_pool("a:1", &config).unwrap();
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.open_connections(), 0);
        assert!(driver.pool("a:1").is_some());
    }
}
