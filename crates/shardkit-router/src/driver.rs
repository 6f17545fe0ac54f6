//! Database driver interface
//!
//! The sharding layer never talks to a database directly. A [`Driver`]
//! turns one shard's [`ConnectionConfig`] into a [`ConnectionPool`]; the
//! pool hands out [`Connection`]s with its own wait policy.

use std::sync::Arc;

use crate::catalog::ConnectionConfig;
use crate::error::DriverError;
use crate::types::Rows;

/// Result of executing one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Rows,
    pub rows_affected: u64,
}

impl QueryResult {
    pub fn rows(rows: Rows) -> Self {
        Self { rows, rows_affected: 0 }
    }

    pub fn affected(rows_affected: u64) -> Self {
        Self { rows: Vec::new(), rows_affected }
    }
}

/// A live connection to one database
pub trait Connection: Send {
    /// Stable identity of this connection object
    fn id(&self) -> &str;

    /// Execute one statement. `tag` is the shard tag attached to this
    /// connection, if any, for the driver's own logging.
    fn execute(&mut self, sql: &str, tag: Option<&str>) -> Result<QueryResult, DriverError>;

    /// Tag currently attached to this connection object
    fn shard_tag(&self) -> Option<&str>;

    /// Attach `tag` to this connection object
    fn attach_tag(&mut self, tag: &str);
}

/// A bounded set of reusable connections to one database
pub trait ConnectionPool: Send + Sync {
    /// Pool name, `group:name` for shard pools
    fn name(&self) -> &str;

    /// Check a connection out, blocking up to the pool's checkout timeout.
    /// Connections are opened lazily on first demand.
    fn checkout(&self) -> Result<Box<dyn Connection>, DriverError>;

    /// Return a connection previously checked out from this pool
    fn checkin(&self, connection: Box<dyn Connection>);

    /// Maximum number of live connections
    fn size(&self) -> usize;

    /// Number of connections opened so far (idle or checked out)
    fn open_connections(&self) -> usize;

    /// Close idle connections and refuse further checkouts
    fn disconnect(&self);
}

/// Creates pools for one adapter
pub trait Driver: Send + Sync {
    /// Adapter name this driver serves (the `adapter` config field)
    fn adapter(&self) -> &str;

    /// Build a pool for `config`. Must not open any connection yet.
    fn new_pool(
        &self,
        name: &str,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn ConnectionPool>, DriverError>;
}
