//! Shard-bound query chains
//!
//! `query.using_shard(scope, group, name)` wraps any [`Composable`] value in
//! a [`QueryRouteProxy`]. Every operation applied through the proxy runs
//! inside its own `using_shard` scope for the proxy's selection:
//!
//! ```rust,ignore
//! let names = Query::table("users")
//!     .using_shard(&sharding, "alpha", "shard1")
//!     .chain(|q| q.filter("active", true))
//!     .chain(|q| q.order_by("name"))
//!     .fetch(|q| q.all(&router))?;
//! ```
//!
//! Operations that produce a new composable value keep the chain going;
//! any other result is returned as is.

use shardkit_core::{ShardKey, ShardPart};

use crate::error::{Result, ShardingError};
use crate::query::Composable;
use crate::scope::ShardScope;

/// Result of an operation forwarded with [`QueryRouteProxy::invoke`]
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<Q, R> {
    /// The operation produced a new composable value
    Chain(Q),
    /// The operation produced a terminal value
    Done(R),
}

/// What [`QueryRouteProxy::invoke`] hands back
#[derive(Debug)]
pub enum Routed<Q, R> {
    /// Still bound to the same shard, ready for more operations
    Chained(QueryRouteProxy<Q>),
    Done(R),
}

impl<Q, R> Routed<Q, R> {
    pub fn is_chained(&self) -> bool {
        matches!(self, Routed::Chained(_))
    }

    /// The terminal value, or `None` if the chain continues
    pub fn done(self) -> Option<R> {
        match self {
            Routed::Done(value) => Some(value),
            Routed::Chained(_) => None,
        }
    }

    /// The proxy, or `None` if the chain ended
    pub fn chained(self) -> Option<QueryRouteProxy<Q>> {
        match self {
            Routed::Chained(proxy) => Some(proxy),
            Routed::Done(_) => None,
        }
    }
}

/// A composable value bound to one shard selection
#[derive(Debug, Clone)]
pub struct QueryRouteProxy<Q> {
    scope: ShardScope,
    selection: Option<ShardKey>,
    query: Q,
}

impl<Q> QueryRouteProxy<Q> {
    pub fn new(scope: ShardScope, selection: Option<ShardKey>, query: Q) -> Self {
        Self {
            scope,
            selection,
            query,
        }
    }

    /// The shard every forwarded operation runs on, `None` for master
    pub fn selection(&self) -> Option<&ShardKey> {
        self.selection.as_ref()
    }

    /// Rebind this proxy to another shard. The last selection wins.
    pub fn using_shard(mut self, group: impl ShardPart, name: impl ShardPart) -> Self {
        self.selection = ShardKey::select(group, name);
        self
    }

    /// Block form of selection. Always rejected: a proxy scopes each
    /// operation, never a block.
    pub fn using_shard_with<F>(
        self,
        _group: impl ShardPart,
        _name: impl ShardPart,
        _body: F,
    ) -> Result<Self>
    where
        F: FnOnce(),
    {
        Err(block_form_rejected())
    }

    /// Apply a composing operation on the selected shard and keep chaining
    pub fn chain<F>(self, op: F) -> Self
    where
        F: FnOnce(Q) -> Q,
    {
        let Self {
            scope,
            selection,
            query,
        } = self;
        // Composition alone never resolves a connection.
        let query = ShardScope::new(false).using_key(selection.clone(), || op(query));
        Self {
            scope,
            selection,
            query,
        }
    }

    /// Run a terminal operation on the selected shard
    pub fn fetch<R, F>(&self, op: F) -> R
    where
        F: FnOnce(&Q) -> R,
    {
        self.scope.using_key(self.selection.clone(), || op(&self.query))
    }

    /// Run an operation that may either compose or terminate
    pub fn invoke<R, F>(self, op: F) -> Routed<Q, R>
    where
        F: FnOnce(Q) -> Outcome<Q, R>,
    {
        let Self {
            scope,
            selection,
            query,
        } = self;
        match scope.using_key(selection.clone(), || op(query)) {
            Outcome::Chain(query) => Routed::Chained(Self {
                scope,
                selection,
                query,
            }),
            Outcome::Done(value) => Routed::Done(value),
        }
    }

    /// The wrapped value, for matching on its own type
    pub fn query(&self) -> &Q {
        &self.query
    }

    pub fn into_query(self) -> Q {
        self.query
    }
}

impl<Q> AsRef<Q> for QueryRouteProxy<Q> {
    fn as_ref(&self) -> &Q {
        &self.query
    }
}

/// Compares the wrapped value on the selected shard
impl<Q, T> PartialEq<T> for QueryRouteProxy<Q>
where
    Q: PartialEq<T>,
{
    fn eq(&self, other: &T) -> bool {
        self.fetch(|query| query == other)
    }
}

fn block_form_rejected() -> ShardingError {
    ShardingError::WrongUsage(
        "using_shard on a query takes no block; wrap the block in ShardScope::using_shard instead"
            .to_string(),
    )
}

/// Shard selection for composable values
pub trait UsingShard: Composable + Sized {
    /// Bind this value to `(group, name)`. A blank part selects master.
    fn using_shard(
        self,
        scope: impl Into<ShardScope>,
        group: impl ShardPart,
        name: impl ShardPart,
    ) -> QueryRouteProxy<Self> {
        QueryRouteProxy::new(scope.into(), ShardKey::select(group, name), self)
    }

    /// Block form of selection. Always rejected with `WrongUsage`.
    fn using_shard_with<F>(
        self,
        _scope: impl Into<ShardScope>,
        _group: impl ShardPart,
        _name: impl ShardPart,
        _body: F,
    ) -> Result<QueryRouteProxy<Self>>
    where
        F: FnOnce(),
    {
        Err(block_form_rejected())
    }
}

impl<Q: Composable> UsingShard for Q {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ShardContextStack;
    use crate::query::Query;

    fn key(group: &str, name: &str) -> ShardKey {
        ShardKey::select(group, name).unwrap()
    }

    fn quiet() -> ShardScope {
        ShardScope::new(false)
    }

    #[test]
    fn test_each_operation_runs_on_selected_shard() {
        let proxy = Query::table("users")
            .using_shard(quiet(), "alpha", "shard1")
            .chain(|q| {
                assert_eq!(ShardContextStack::current(), Some(key("alpha", "shard1")));
                q.filter("id", 1)
            });

        assert!(ShardContextStack::is_master());

        let seen = proxy.fetch(|q| (ShardContextStack::current(), q.to_sql()));
        assert_eq!(seen.0, Some(key("alpha", "shard1")));
        assert_eq!(seen.1, "SELECT * FROM users WHERE id = 1");
    }

    #[test]
    fn test_reselection_is_last_wins() {
        let proxy = Query::table("users")
            .using_shard(quiet(), "alpha", "shard1")
            .using_shard("alpha", "shard2");

        assert_eq!(proxy.selection(), Some(&key("alpha", "shard2")));
        let current = proxy.fetch(|_| ShardContextStack::current());
        assert_eq!(current, Some(key("alpha", "shard2")));
        assert_eq!(ShardContextStack::depth(), 0);
    }

    #[test]
    fn test_invoke_rewraps_composable_results() {
        let proxy = Query::table("users").using_shard(quiet(), "beta", "shard1");

        let routed: Routed<Query, usize> = proxy.invoke(|q| Outcome::Chain(q.limit(3)));
        let proxy = routed.chained().unwrap();
        assert_eq!(proxy.query().to_sql(), "SELECT * FROM users LIMIT 3");

        let routed = proxy.invoke(|q| Outcome::<Query, _>::Done(q.table_name().len()));
        assert_eq!(routed.done(), Some(5));
    }

    #[test]
    fn test_block_form_is_rejected() {
        let result = Query::table("users").using_shard_with(quiet(), "alpha", "shard1", || {});
        assert!(matches!(result, Err(ShardingError::WrongUsage(_))));

        let proxy = Query::table("users").using_shard(quiet(), "alpha", "shard1");
        assert!(matches!(
            proxy.using_shard_with("alpha", "shard2", || {}),
            Err(ShardingError::WrongUsage(_))
        ));
    }

    #[test]
    fn test_equality_unwraps_and_routes() {
        let proxy = Query::table("users").using_shard(quiet(), "alpha", "shard1");
        assert!(proxy == Query::table("users"));
        assert!(proxy != Query::table("orders"));
        assert_eq!(proxy.as_ref().table_name(), "users");
    }

    #[test]
    fn test_blank_selection_routes_to_master() {
        let proxy = Query::table("users").using_shard(quiet(), "", "shard1");
        assert_eq!(proxy.selection(), None);
        assert_eq!(proxy.fetch(|_| ShardContextStack::depth()), 1);
        assert!(proxy.fetch(|_| ShardContextStack::is_master()));
    }
}
