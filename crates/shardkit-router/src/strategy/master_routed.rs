//! Routing to the master database

use tracing::trace;

use super::ConnectionStrategy;
use crate::driver::QueryResult;
use crate::error::Result;
use crate::registry::ConnectionPoolRegistry;
use crate::types::ConnectionTarget;

/// Sends statements to the registry's master pool
pub struct MasterRouted<'a> {
    registry: &'a ConnectionPoolRegistry,
}

impl<'a> MasterRouted<'a> {
    pub fn new(registry: &'a ConnectionPoolRegistry) -> Self {
        Self { registry }
    }
}

impl ConnectionStrategy for MasterRouted<'_> {
    fn name(&self) -> &'static str {
        "MasterRouted"
    }

    fn target(&self) -> ConnectionTarget {
        ConnectionTarget::Master
    }

    fn execute(&self, sql: &str) -> Result<QueryResult> {
        self.registry.with_master_connection(|connection| {
            trace!(connection = %connection.id(), "Routed to master");
            connection.execute(sql)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ShardConfigCatalog;
    use crate::error::ShardingError;
    use crate::memory::MemoryDriver;

    #[test]
    fn test_requires_master_pool() {
        let registry =
            ConnectionPoolRegistry::new(ShardConfigCatalog::new("unused.json", "test"), false);
        let strategy = MasterRouted::new(&registry);

        assert!(strategy.target().is_master());
        assert!(matches!(
            strategy.execute("SELECT * FROM users"),
            Err(ShardingError::Uninitialized(_))
        ));
    }

    #[test]
    fn test_executes_on_master() {
        let registry =
            ConnectionPoolRegistry::new(ShardConfigCatalog::new("unused.json", "test"), false);
        let driver = MemoryDriver::new();
        registry.set_master_pool(driver.standalone_pool("master", "strategy_master", 1));

        let strategy = MasterRouted::new(&registry);
        strategy.execute(r#"INSERT INTO users {"id":1}"#).unwrap();
        assert_eq!(strategy.query("SELECT * FROM users").unwrap().len(), 1);
        assert_eq!(driver.database("strategy_master").row_count("users"), 1);
    }
}
