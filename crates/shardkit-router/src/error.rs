//! Error types for the sharding layer

use shardkit_core::ShardKey;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by this crate
#[derive(Debug, Error)]
pub enum ShardingError {
    /// Shards document missing, or environment/group/shard absent, or the
    /// shard does not name an adapter
    #[error("Configuration not found: {0}")]
    ConfigNotFound(String),

    /// Shards document exists but could not be parsed
    #[error("Invalid shards configuration in {}: {reason}", .path.display())]
    ConfigParse { path: PathBuf, reason: String },

    /// No pool was ever established for this shard
    #[error("No connection pool for shard {0}")]
    PoolNotEstablished(ShardKey),

    /// Programmer error in how the API was called
    #[error("Wrong usage: {0}")]
    WrongUsage(String),

    /// `pop` on an empty context stack
    #[error("Shard context stack underflow")]
    StackUnderflow,

    /// A collaborator needed for the request was never set up
    #[error("Not initialized: {0}")]
    Uninitialized(String),

    /// Failure reported by the database driver, passed through unchanged
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Errors reported by a database driver
#[derive(Debug, Error)]
pub enum DriverError {
    /// No connection became free within the pool's checkout timeout
    #[error("Timed out after {waited:?} waiting for a connection to {pool}")]
    CheckoutTimeout { pool: String, waited: Duration },

    /// The database refused or could not open a connection
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// The statement failed
    #[error("Statement failed: {0}")]
    Statement(String),

    /// The pool was disconnected and no longer hands out connections
    #[error("Pool disconnected: {0}")]
    PoolDisconnected(String),
}

pub type Result<T> = std::result::Result<T, ShardingError>;
