//! Connection routing strategies
//!
//! Every data-access call is routed by exactly one strategy, picked per
//! call from the current shard selection:
//!
//! - `MasterRouted`: no shard selected, use the master pool
//! - `ShardRouted`: a shard is selected, use the connection reserved for it
//!   in this execution context and mark the frame used
//!
//! # Strategy Selection
//!
//! ```text
//! data-access call
//!     │
//!     ▼
//! ┌─────────────────────────┐
//! │ ShardContextStack       │  current() → master or (group, name)
//! └───────────┬─────────────┘
//!             │
//!      ┌──────┴───────┐
//!      ▼              ▼
//! MasterRouted    ShardRouted
//! ```

mod master_routed;
mod shard_routed;

pub use master_routed::MasterRouted;
pub use shard_routed::ShardRouted;

use crate::driver::QueryResult;
use crate::error::Result;
use crate::types::{ConnectionTarget, Rows};

/// Trait for resolving and using the connection of one routing decision
pub trait ConnectionStrategy: Send + Sync {
    /// Strategy name for logging
    fn name(&self) -> &'static str;

    /// Where statements executed through this strategy go
    fn target(&self) -> ConnectionTarget;

    /// Execute one statement on the resolved connection
    fn execute(&self, sql: &str) -> Result<QueryResult>;

    /// Execute one statement and return its rows
    fn query(&self, sql: &str) -> Result<Rows> {
        Ok(self.execute(sql)?.rows)
    }
}
