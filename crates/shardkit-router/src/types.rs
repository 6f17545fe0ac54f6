//! Common types for the sharding layer
//!
//! Centralizes type definitions to avoid duplication across modules.

use serde::{Deserialize, Serialize};
use shardkit_core::ShardKey;

/// One result row as returned by a driver
pub type Row = serde_json::Value;

/// All rows returned by one statement
pub type Rows = Vec<Row>;

/// Pool size used when a shard does not configure `pool`
pub const DEFAULT_POOL_SIZE: u32 = 5;

/// Checkout wait used when a shard does not configure `checkout_timeout_ms`
pub const DEFAULT_CHECKOUT_TIMEOUT_MS: u64 = 5_000;

/// Environment name used by `ShardConfigCatalog::test_configurations`
pub const TEST_ENVIRONMENT: &str = "test";

/// Adapter name served by the in-memory driver
pub const MEMORY_ADAPTER: &str = "memory";

/// Where a data-access call was routed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionTarget {
    /// No shard selected: the default database
    Master,
    /// The selected shard
    Shard(ShardKey),
}

impl ConnectionTarget {
    pub fn from_selection(selection: Option<ShardKey>) -> Self {
        match selection {
            Some(key) => ConnectionTarget::Shard(key),
            None => ConnectionTarget::Master,
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, ConnectionTarget::Master)
    }

    pub fn shard_key(&self) -> Option<&ShardKey> {
        match self {
            ConnectionTarget::Master => None,
            ConnectionTarget::Shard(key) => Some(key),
        }
    }
}

impl std::fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionTarget::Master => write!(f, "master"),
            ConnectionTarget::Shard(key) => write!(f, "{}", key),
        }
    }
}
