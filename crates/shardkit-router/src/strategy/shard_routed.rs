//! Routing to the selected shard

use shardkit_core::ShardKey;
use tracing::trace;

use super::ConnectionStrategy;
use crate::context::ShardContextStack;
use crate::driver::QueryResult;
use crate::error::Result;
use crate::registry::ConnectionPoolRegistry;
use crate::types::ConnectionTarget;

/// Sends statements to the connection reserved for one shard.
///
/// The top context frame is marked used once a connection is resolved, so
/// the scope does not report the shard as unused.
pub struct ShardRouted<'a> {
    registry: &'a ConnectionPoolRegistry,
    key: ShardKey,
}

impl<'a> ShardRouted<'a> {
    pub fn new(registry: &'a ConnectionPoolRegistry, key: ShardKey) -> Self {
        Self { registry, key }
    }

    pub fn key(&self) -> &ShardKey {
        &self.key
    }
}

impl ConnectionStrategy for ShardRouted<'_> {
    fn name(&self) -> &'static str {
        "ShardRouted"
    }

    fn target(&self) -> ConnectionTarget {
        ConnectionTarget::Shard(self.key.clone())
    }

    fn execute(&self, sql: &str) -> Result<QueryResult> {
        self.registry.retrieve_connection(&self.key, |connection| {
            ShardContextStack::mark_used();
            trace!(shard = %self.key, connection = %connection.id(), "Routed to shard");
            connection.execute(sql)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ShardConfigCatalog;
    use crate::error::ShardingError;

    #[test]
    fn test_unestablished_shard_does_not_mark_used() {
        let registry =
            ConnectionPoolRegistry::new(ShardConfigCatalog::new("unused.json", "test"), false);
        let key = ShardKey::select("alpha", "shard1").unwrap();
        let strategy = ShardRouted::new(&registry, key.clone());

        assert_eq!(strategy.target(), ConnectionTarget::Shard(key.clone()));

        ShardContextStack::push_key(Some(key));
        assert!(matches!(
            strategy.execute("SELECT * FROM users"),
            Err(ShardingError::PoolNotEstablished(_))
        ));
        assert!(!ShardContextStack::pop().unwrap().used);
    }
}
