//! Scoped shard selection
//!
//! [`ShardScope::using_shard`] pushes a frame, runs the body, and on every
//! exit path (return, error, panic, or future cancellation) pops the frame,
//! warns if a shard frame never resolved a connection, and releases the
//! connection reserved for that shard in this context.

use shardkit_core::{ShardKey, ShardPart, ShardingConfig};
use std::future::Future;
use std::marker::PhantomData;
use tracing::{debug, warn};

use crate::context::{ShardContextStack, Storage};

/// Entry point for running code against one shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardScope {
    warn_unused: bool,
}

impl Default for ShardScope {
    fn default() -> Self {
        Self { warn_unused: true }
    }
}

impl ShardScope {
    pub fn new(warn_unused: bool) -> Self {
        Self { warn_unused }
    }

    pub fn from_config(config: &ShardingConfig) -> Self {
        Self::new(config.no_connection_retrieved_warning)
    }

    /// Whether exiting an unused shard frame emits a warning
    pub fn warns_unused(&self) -> bool {
        self.warn_unused
    }

    /// Push a frame for `(group, name)` and return the guard that pops it.
    ///
    /// A blank group or name selects master.
    pub fn enter(&self, group: impl ShardPart, name: impl ShardPart) -> ScopeGuard {
        self.enter_key(ShardKey::select(group, name))
    }

    pub fn enter_key(&self, selection: Option<ShardKey>) -> ScopeGuard {
        ScopeGuard {
            frame: FrameGuard::push(Storage::current(), selection, self.warn_unused),
            _not_send: PhantomData,
        }
    }

    /// Run `body` with `(group, name)` selected.
    ///
    /// Whatever `body` returns, including an `Err`, is handed back unchanged
    /// after cleanup.
    pub fn using_shard<T, F>(&self, group: impl ShardPart, name: impl ShardPart, body: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.using_key(ShardKey::select(group, name), body)
    }

    pub fn using_key<T, F>(&self, selection: Option<ShardKey>, body: F) -> T
    where
        F: FnOnce() -> T,
    {
        let guard = self.enter_key(selection);
        let output = body();
        guard.exit();
        output
    }

    /// Async form of [`ShardScope::using_shard`].
    ///
    /// `body` runs on a stack of its own, seeded with a copy of the caller's
    /// frames. The selection survives `.await` points and worker-thread
    /// hops, and scopes polled concurrently by one task (`join!`,
    /// `select!`) never see each other's frames.
    pub fn using_shard_async<F>(
        &self,
        group: impl ShardPart,
        name: impl ShardPart,
        body: F,
    ) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        let selection = ShardKey::select(group, name);
        let warn_unused = self.warn_unused;
        let scoped = async move {
            let mut frame = FrameGuard::push(Storage::Task, selection, warn_unused);
            let output = body.await;
            frame.finish();
            output
        };

        async move {
            let inherited = ShardContextStack::inherit();
            ShardContextStack::forked(inherited, scoped).await
        }
    }
}

/// Guard for one frame pushed by [`ShardScope::enter`].
///
/// Dropping it runs the exit protocol. It is bound to the thread that
/// created it.
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct ScopeGuard {
    frame: FrameGuard,
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    pub fn selection(&self) -> Option<&ShardKey> {
        self.frame.selection.as_ref()
    }

    /// Run the exit protocol now
    pub fn exit(mut self) {
        self.frame.finish();
    }
}

impl std::fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("selection", &self.frame.selection)
            .field("depth", &self.frame.depth)
            .finish()
    }
}

struct FrameGuard {
    storage: Storage,
    selection: Option<ShardKey>,
    /// Stack depth right after our push
    depth: usize,
    warn_unused: bool,
    finished: bool,
}

impl FrameGuard {
    fn push(storage: Storage, selection: Option<ShardKey>, warn_unused: bool) -> Self {
        let depth = ShardContextStack::push_in(storage, selection.clone());
        Self {
            storage,
            selection,
            depth,
            warn_unused,
            finished: false,
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let depth = ShardContextStack::depth_in(self.storage);
        if depth > self.depth {
            let discarded = ShardContextStack::truncate_in(self.storage, self.depth);
            warn!(discarded, "Discarding shard frames left open by inner scopes");
        }

        if depth < self.depth {
            debug!(
                selection = ?self.selection,
                "Shard context was reset inside the scope, nothing to pop"
            );
        } else {
            match ShardContextStack::pop_in(self.storage) {
                Ok(frame) => self.report_unused(frame.used),
                Err(error) => warn!(%error, "Shard scope exit found an empty stack"),
            }
        }

        if let Some(key) = &self.selection {
            ShardContextStack::release_reserved_in(self.storage, key);
        }
    }

    fn report_unused(&self, used: bool) {
        if let Some(key) = &self.selection {
            if self.warn_unused && !used {
                warn!(
                    shard = %key,
                    "No connection to shard '{}' was retrieved inside the using_shard scope. \
                     Make sure the data access is routed through the shard router. \
                     Disable this warning with `no_connection_retrieved_warning = false`.",
                    key
                );
            }
        }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(group: &str, name: &str) -> ShardKey {
        ShardKey::select(group, name).unwrap()
    }

    #[test]
    fn test_nesting_restores_outer_selection() {
        let scope = ShardScope::new(false);

        scope.using_shard("alpha", "shard1", || {
            assert_eq!(ShardContextStack::current(), Some(key("alpha", "shard1")));

            scope.using_shard("alpha", "shard2", || {
                assert_eq!(ShardContextStack::current(), Some(key("alpha", "shard2")));
            });

            assert_eq!(ShardContextStack::current(), Some(key("alpha", "shard1")));
        });

        assert!(ShardContextStack::is_master());
        assert_eq!(ShardContextStack::depth(), 0);
    }

    #[test]
    fn test_body_error_passes_through() {
        let scope = ShardScope::new(false);
        let result: std::result::Result<(), &str> =
            scope.using_shard("alpha", "shard1", || Err("boom"));

        assert_eq!(result, Err("boom"));
        assert_eq!(ShardContextStack::depth(), 0);
    }

    #[test]
    fn test_panic_still_pops() {
        let scope = ShardScope::new(false);
        let outcome = std::panic::catch_unwind(|| {
            scope.using_shard("alpha", "shard1", || panic!("body failed"));
        });

        assert!(outcome.is_err());
        assert_eq!(ShardContextStack::depth(), 0);
    }

    #[test]
    fn test_reset_inside_scope() {
        let scope = ShardScope::new(false);
        scope.using_shard("alpha", "shard1", || {
            ShardContextStack::reset();
            assert!(ShardContextStack::is_master());
        });
        assert_eq!(ShardContextStack::depth(), 0);
    }

    #[test]
    fn test_leaked_inner_guard_is_discarded() {
        let scope = ShardScope::new(false);
        scope.using_shard("alpha", "shard1", || {
            std::mem::forget(scope.enter("beta", "shard1"));
            assert_eq!(ShardContextStack::depth(), 2);
        });
        assert_eq!(ShardContextStack::depth(), 0);
    }

    #[test]
    fn test_guard_exit() {
        let scope = ShardScope::default();
        let guard = scope.enter("Alpha", " shard1 ");
        assert_eq!(guard.selection(), Some(&key("alpha", "shard1")));
        ShardContextStack::mark_used();
        guard.exit();
        assert!(ShardContextStack::is_master());
    }

    #[tokio::test]
    async fn test_async_scope_survives_await() {
        let scope = ShardScope::new(false);
        let seen = scope
            .using_shard_async("alpha", "shard2", async {
                tokio::task::yield_now().await;
                ShardContextStack::current()
            })
            .await;

        assert_eq!(seen, Some(key("alpha", "shard2")));
        assert!(ShardContextStack::is_master());
    }

    #[tokio::test]
    async fn test_nested_async_scopes_inherit_outer_selection() {
        let scope = ShardScope::new(false);
        let frames = scope
            .using_shard_async("beta", "shard9", async {
                scope
                    .using_shard_async("alpha", "shard1", async {
                        tokio::task::yield_now().await;
                        ShardContextStack::frames()
                    })
                    .await
            })
            .await;

        let selections: Vec<_> = frames.into_iter().map(|frame| frame.selection).collect();
        assert_eq!(selections, vec![Some(key("beta", "shard9")), Some(key("alpha", "shard1"))]);
    }

    #[tokio::test]
    async fn test_joined_async_scopes_do_not_share_frames() {
        let scope = ShardScope::new(false);
        let (first, second, after) = scope
            .using_shard_async("beta", "shard9", async {
                let (first, second) = futures::join!(
                    scope.using_shard_async("alpha", "shard1", async {
                        tokio::task::yield_now().await;
                        let seen = ShardContextStack::current();
                        tokio::task::yield_now().await;
                        (seen, ShardContextStack::depth())
                    }),
                    scope.using_shard_async("alpha", "shard2", async {
                        tokio::task::yield_now().await;
                        let seen = ShardContextStack::current();
                        tokio::task::yield_now().await;
                        (seen, ShardContextStack::depth())
                    }),
                );
                (first, second, ShardContextStack::frames())
            })
            .await;

        assert_eq!(first, (Some(key("alpha", "shard1")), 2));
        assert_eq!(second, (Some(key("alpha", "shard2")), 2));
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].selection, Some(key("beta", "shard9")));
        assert!(ShardContextStack::is_master());
    }
}
