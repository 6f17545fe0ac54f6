//! Per-execution-context shard selection
//!
//! Every thread owns one [`ShardContextStack`]. A tokio task can be given its
//! own stack with [`ShardContextStack::isolated`]; while such a task is being
//! polled its stack takes precedence over the thread's, so a task migrating
//! between worker threads keeps its selection and never observes another
//! task's.
//!
//! An empty stack means "connected to master". The top frame is
//! authoritative for routing.
//!
//! The same storage holds the connections reserved by
//! `ConnectionPoolRegistry::retrieve_connection`, so a reservation is owned
//! by exactly one execution context.

use shardkit_core::{ShardKey, ShardPart};
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, trace};

use crate::connection::PooledConnection;
use crate::error::{Result, ShardingError};
use crate::types::ConnectionTarget;

/// One nesting level of shard selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFrame {
    /// Selected shard, `None` for master
    pub selection: Option<ShardKey>,
    /// Whether a connection was resolved through this frame
    pub used: bool,
}

impl ContextFrame {
    pub fn is_master(&self) -> bool {
        self.selection.is_none()
    }

    pub fn target(&self) -> ConnectionTarget {
        ConnectionTarget::from_selection(self.selection.clone())
    }
}

#[derive(Default)]
struct ContextState {
    frames: Vec<ContextFrame>,
    reserved: HashMap<ShardKey, PooledConnection>,
}

thread_local! {
    static THREAD_STATE: RefCell<ContextState> = RefCell::new(ContextState::default());
}

tokio::task_local! {
    static TASK_STATE: RefCell<ContextState>;
}

/// Which storage a stack operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Storage {
    Task,
    Thread,
}

impl Storage {
    /// The task's stack when running inside [`ShardContextStack::isolated`],
    /// the thread's otherwise
    pub(crate) fn current() -> Self {
        if TASK_STATE.try_with(|_| ()).is_ok() {
            Storage::Task
        } else {
            Storage::Thread
        }
    }
}

// Callers must not run foreign code inside `f`: the state is borrowed.
fn with_storage<R>(storage: Storage, f: impl FnOnce(&mut ContextState) -> R) -> R {
    match storage {
        Storage::Task if TASK_STATE.try_with(|_| ()).is_ok() => {
            TASK_STATE.with(|cell| f(&mut cell.borrow_mut()))
        }
        _ => THREAD_STATE.with(|cell| f(&mut cell.borrow_mut())),
    }
}

fn with_state<R>(f: impl FnOnce(&mut ContextState) -> R) -> R {
    with_storage(Storage::current(), f)
}

/// Context-local stack of shard selections
pub struct ShardContextStack;

impl ShardContextStack {
    /// Push a selection. The previous top frame, if any, is marked used so
    /// an outer scope overridden by a nested one does not warn. A blank
    /// group or name pushes a master frame.
    ///
    /// Returns the normalized selection that was pushed.
    pub fn push(group: impl ShardPart, name: impl ShardPart) -> Option<ShardKey> {
        let selection = ShardKey::select(group, name);
        Self::push_key(selection.clone());
        selection
    }

    /// Push an already-normalized selection
    pub fn push_key(selection: Option<ShardKey>) {
        Self::push_in(Storage::current(), selection);
    }

    /// Remove and return the top frame
    pub fn pop() -> Result<ContextFrame> {
        Self::pop_in(Storage::current())
    }

    /// Mark the top frame as having resolved a connection.
    ///
    /// Returns `false` when the stack is empty.
    pub fn mark_used() -> bool {
        with_state(|state| match state.frames.last_mut() {
            Some(frame) => {
                frame.used = true;
                true
            }
            None => false,
        })
    }

    /// The current selection, `None` for master
    pub fn current() -> Option<ShardKey> {
        with_state(|state| state.frames.last().and_then(|frame| frame.selection.clone()))
    }

    pub fn current_target() -> ConnectionTarget {
        ConnectionTarget::from_selection(Self::current())
    }

    pub fn is_master() -> bool {
        Self::current().is_none()
    }

    pub fn depth() -> usize {
        Self::depth_in(Storage::current())
    }

    /// Snapshot of the stack, bottom first
    pub fn frames() -> Vec<ContextFrame> {
        with_state(|state| state.frames.clone())
    }

    /// Drop every frame, returning this context to master.
    ///
    /// Open scopes notice the reset when they exit and skip their pop.
    /// Reserved connections are left alone.
    pub fn reset() {
        let cleared = with_state(|state| std::mem::take(&mut state.frames).len());
        debug!(cleared, "Reset shard context stack");
    }

    /// Run `future` with a fresh, empty stack of its own.
    ///
    /// Connections still reserved when the future completes (or is dropped)
    /// go back to their pools.
    pub async fn isolated<F: Future>(future: F) -> F::Output {
        TASK_STATE
            .scope(RefCell::new(ContextState::default()), future)
            .await
    }

    /// Run `future` on a stack of its own that starts as a copy of `frames`.
    ///
    /// Reservations are never inherited.
    pub(crate) async fn forked<F: Future>(frames: Vec<ContextFrame>, future: F) -> F::Output {
        let state = ContextState {
            frames,
            reserved: HashMap::new(),
        };
        TASK_STATE.scope(RefCell::new(state), future).await
    }

    /// Copy of the caller's stack for a child scope. The caller's top frame
    /// is marked used, as a nested push would.
    pub(crate) fn inherit() -> Vec<ContextFrame> {
        with_state(|state| {
            if let Some(top) = state.frames.last_mut() {
                top.used = true;
            }
            state.frames.clone()
        })
    }

    /// Whether the caller runs inside [`ShardContextStack::isolated`]
    pub fn in_task_scope() -> bool {
        Storage::current() == Storage::Task
    }

    pub(crate) fn push_in(storage: Storage, selection: Option<ShardKey>) -> usize {
        with_storage(storage, |state| {
            if let Some(previous) = state.frames.last_mut() {
                previous.used = true;
            }
            trace!(selection = ?selection, depth = state.frames.len() + 1, "Pushing shard frame");
            state.frames.push(ContextFrame {
                selection,
                used: false,
            });
            state.frames.len()
        })
    }

    pub(crate) fn pop_in(storage: Storage) -> Result<ContextFrame> {
        with_storage(storage, |state| state.frames.pop()).ok_or(ShardingError::StackUnderflow)
    }

    pub(crate) fn depth_in(storage: Storage) -> usize {
        with_storage(storage, |state| state.frames.len())
    }

    /// Discard frames above `depth`, returning how many were discarded
    pub(crate) fn truncate_in(storage: Storage, depth: usize) -> usize {
        with_storage(storage, |state| {
            let excess = state.frames.len().saturating_sub(depth);
            state.frames.truncate(depth);
            excess
        })
    }

    pub(crate) fn take_reserved(key: &ShardKey) -> Option<PooledConnection> {
        with_state(|state| state.reserved.remove(key))
    }

    /// Store `connection` as the reservation for `key`
    pub(crate) fn put_reserved(key: ShardKey, connection: PooledConnection) {
        // The displaced connection, if any, is checked in after the borrow ends.
        let displaced = with_state(|state| state.reserved.insert(key, connection));
        drop(displaced);
    }

    pub(crate) fn has_reserved(key: &ShardKey) -> bool {
        with_state(|state| state.reserved.contains_key(key))
    }

    pub(crate) fn release_reserved_in(storage: Storage, key: &ShardKey) -> bool {
        let released = with_storage(storage, |state| state.reserved.remove(key));
        match released {
            Some(connection) => {
                debug!(shard = %key, connection = %connection.id(), "Releasing reserved connection");
                drop(connection);
                true
            }
            None => false,
        }
    }

    pub(crate) fn release_reserved(key: &ShardKey) -> bool {
        Self::release_reserved_in(Storage::current(), key)
    }

    /// Release every reservation of this context, returning how many there were
    pub(crate) fn release_all_reserved() -> usize {
        let released: Vec<_> = with_state(|state| state.reserved.drain().collect());
        let count = released.len();
        drop(released);
        count
    }
}
