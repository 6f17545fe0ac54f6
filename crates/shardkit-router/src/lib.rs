//! Shardkit Router - Shard Connection Routing
//!
//! Routes database statements to one of many shard databases, grouped into
//! named shard groups, without passing a connection through every call.
//!
//! # Architecture
//!
//! ```text
//! caller
//!     │  using_shard(group, name, || ...)   /   query.using_shard(..).chain(..)
//!     ▼
//! ┌─────────────────────────┐
//! │  ShardScope / Proxy     │  push frame, run, pop frame, release
//! └───────────┬─────────────┘
//!             │
//!             ▼
//! ┌─────────────────────────┐
//! │  ShardContextStack      │  per-thread / per-task selection stack
//! └───────────┬─────────────┘
//!             │ current()
//!             ▼
//! ┌─────────────────────────┐
//! │  ShardRouter            │  MasterRouted or ShardRouted
//! └───────────┬─────────────┘
//!             │
//!             ▼
//! ┌─────────────────────────┐
//! │ ConnectionPoolRegistry  │  one pool per (group, name), from the catalog
//! └─────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use shardkit_router::{MemoryDriver, Query, Sharding, ShardingConfig};
//!
//! let sharding = Sharding::builder(ShardingConfig::from_env())
//!     .driver(Arc::new(MemoryDriver::new()))
//!     .setup()?;
//!
//! let users = sharding.using_shard("alpha", "shard1", || {
//!     Query::table("users").filter("active", true).all(&sharding)
//! })?;
//! ```

// Core modules
mod error;
mod types;
mod catalog;
mod driver;
mod connection;

// Context and scoping
mod context;
mod scope;

// Pools and routing
mod registry;
mod strategy;
mod router;

// Query composition
mod query;
mod proxy;

mod sharding;

/// In-memory driver
pub mod memory;

// Re-exports: Identifiers and settings
pub use shardkit_core::{
    normalize, ShardGroupName, ShardKey, ShardName, ShardPart, ShardingConfig,
    DEFAULT_ENVIRONMENT, DEFAULT_SHARDS_CONFIG_FILE, KEY_SEPARATOR,
};

// Re-exports: Error types
pub use error::{DriverError, Result, ShardingError};

// Re-exports: Core types
pub use types::{
    ConnectionTarget, Row, Rows, DEFAULT_CHECKOUT_TIMEOUT_MS, DEFAULT_POOL_SIZE, MEMORY_ADAPTER,
    TEST_ENVIRONMENT,
};

// Re-exports: Configuration catalog
pub use catalog::{
    ConnectionConfig, EnvironmentShards, ShardConfigCatalog, ShardFilter, ShardsDocument,
};

// Re-exports: Driver interface
pub use connection::PooledConnection;
pub use driver::{Connection, ConnectionPool, Driver, QueryResult};

// Re-exports: Context and scoping
pub use context::{ContextFrame, ShardContextStack};
pub use scope::{ScopeGuard, ShardScope};

// Re-exports: Pools and routing
pub use registry::ConnectionPoolRegistry;
pub use router::ShardRouter;
pub use strategy::{ConnectionStrategy, MasterRouted, ShardRouted};

// Re-exports: Query composition
pub use proxy::{Outcome, QueryRouteProxy, Routed, UsingShard};
pub use query::{Composable, Executor, Query};

// Re-exports: Facade
pub use memory::MemoryDriver;
pub use sharding::{Sharding, ShardingBuilder};
