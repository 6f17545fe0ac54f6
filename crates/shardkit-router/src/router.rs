//! Per-call connection routing
//!
//! [`ShardRouter`] is the data-access side of the context stack: for every
//! statement it reads the current selection and dispatches to the matching
//! [`ConnectionStrategy`].

use std::sync::Arc;
use tracing::trace;

use crate::context::ShardContextStack;
use crate::driver::QueryResult;
use crate::error::Result;
use crate::query::Executor;
use crate::registry::ConnectionPoolRegistry;
use crate::strategy::{ConnectionStrategy, MasterRouted, ShardRouted};
use crate::types::ConnectionTarget;

/// Routes statements to master or to the currently selected shard
#[derive(Debug, Clone)]
pub struct ShardRouter {
    registry: Arc<ConnectionPoolRegistry>,
}

impl ShardRouter {
    pub fn new(registry: Arc<ConnectionPoolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionPoolRegistry> {
        &self.registry
    }

    /// Pick the strategy for the current selection
    pub fn resolve(&self) -> Box<dyn ConnectionStrategy + '_> {
        match ShardContextStack::current_target() {
            ConnectionTarget::Master => Box::new(MasterRouted::new(&self.registry)),
            ConnectionTarget::Shard(key) => Box::new(ShardRouted::new(&self.registry, key)),
        }
    }
}

impl Executor for ShardRouter {
    fn run(&self, sql: &str) -> Result<QueryResult> {
        let strategy = self.resolve();
        trace!(strategy = strategy.name(), target = %strategy.target(), "Routing statement");
        strategy.execute(sql)
    }
}
