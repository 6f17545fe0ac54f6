//! Checked-out connections
//!
//! A [`PooledConnection`] owns one driver connection for as long as it is
//! checked out and returns it to its pool when dropped, on every exit path.

use std::sync::Arc;
use tracing::{debug, info_span};

use crate::driver::{Connection, ConnectionPool, QueryResult};
use crate::error::{DriverError, Result};

/// A connection checked out of a pool
pub struct PooledConnection {
    connection: Option<Box<dyn Connection>>,
    pool: Arc<dyn ConnectionPool>,
}

impl PooledConnection {
    pub(crate) fn new(connection: Box<dyn Connection>, pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            connection: Some(connection),
            pool,
        }
    }

    fn inner_mut(&mut self) -> Result<&mut Box<dyn Connection>> {
        self.connection
            .as_mut()
            .ok_or_else(|| DriverError::PoolDisconnected(self.pool.name().to_string()).into())
    }

    /// Identity of the underlying connection object
    pub fn id(&self) -> &str {
        self.connection.as_deref().map(|c| c.id()).unwrap_or_default()
    }

    /// Name of the pool this connection belongs to
    pub fn pool_name(&self) -> &str {
        self.pool.name()
    }

    pub fn shard_tag(&self) -> Option<&str> {
        self.connection.as_deref().and_then(|c| c.shard_tag())
    }

    /// Attach a shard tag to the underlying connection object.
    ///
    /// Tagging the same object twice with the same tag is a no-op.
    pub fn tag_queries(&mut self, tag: &str) -> Result<()> {
        let connection = self.inner_mut()?;
        if connection.shard_tag() != Some(tag) {
            connection.attach_tag(tag);
            debug!(connection = %connection.id(), tag, "Tagged connection for query logs");
        }
        Ok(())
    }

    /// Execute a statement.
    ///
    /// When the connection carries a shard tag, every log event emitted
    /// while the statement runs is recorded inside a `shard_query` span
    /// carrying that tag.
    pub fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        let connection = self.inner_mut()?;
        let result = match connection.shard_tag().map(str::to_owned) {
            Some(tag) => {
                let span = info_span!("shard_query", shard = %tag);
                let _entered = span.enter();
                debug!(sql, "Executing statement");
                connection.execute(sql, Some(&tag))
            }
            None => {
                debug!(sql, "Executing statement");
                connection.execute(sql, None)
            }
        };
        Ok(result?)
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.name())
            .field("connection", &self.connection.as_ref().map(|c| c.id().to_string()))
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            debug!(pool = %self.pool.name(), connection = %connection.id(), "Checking connection in");
            self.pool.checkin(connection);
        }
    }
}
