//! Bounded blocking pool of in-memory connections

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::database::MemoryDatabase;
use crate::driver::{Connection, ConnectionPool, QueryResult};
use crate::error::DriverError;

/// A connection to a [`MemoryDatabase`]
pub struct MemoryConnection {
    id: String,
    database: Arc<MemoryDatabase>,
    tag: Option<String>,
}

impl MemoryConnection {
    fn open(database: Arc<MemoryDatabase>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            database,
            tag: None,
        }
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn execute(&mut self, sql: &str, tag: Option<&str>) -> Result<QueryResult, DriverError> {
        let started = Instant::now();
        let result = self.database.execute(sql);
        debug!(
            target: "shardkit::memory::query",
            database = %self.database.name(),
            tag = tag.unwrap_or(""),
            elapsed_us = started.elapsed().as_micros() as u64,
            ok = result.is_ok(),
            "{}",
            sql
        );
        result
    }

    fn shard_tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn attach_tag(&mut self, tag: &str) {
        self.tag = Some(tag.to_string());
    }
}

#[derive(Default)]
struct PoolState {
    idle: Vec<Box<dyn Connection>>,
    open: usize,
    disconnected: bool,
}

/// Checkout/checkin counters, for tests and diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub checkouts: u64,
    pub checkins: u64,
    pub open: usize,
    pub idle: usize,
}

/// Pool of at most `size` connections; checkout waits up to `timeout`
pub struct MemoryPool {
    name: String,
    database: Arc<MemoryDatabase>,
    size: usize,
    timeout: Duration,
    state: Mutex<PoolState>,
    available: Condvar,
    checkouts: AtomicU64,
    checkins: AtomicU64,
}

impl MemoryPool {
    pub fn new(
        name: impl Into<String>,
        database: Arc<MemoryDatabase>,
        size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            database,
            size: size.max(1),
            timeout,
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
            checkouts: AtomicU64::new(0),
            checkins: AtomicU64::new(0),
        }
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.database
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            checkouts: self.checkouts.load(Ordering::Relaxed),
            checkins: self.checkins.load(Ordering::Relaxed),
            open: state.open,
            idle: state.idle.len(),
        }
    }
}

impl ConnectionPool for MemoryPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn checkout(&self) -> Result<Box<dyn Connection>, DriverError> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.state.lock();

        loop {
            if state.disconnected {
                return Err(DriverError::PoolDisconnected(self.name.clone()));
            }
            if let Some(connection) = state.idle.pop() {
                self.checkouts.fetch_add(1, Ordering::Relaxed);
                trace!(pool = %self.name, connection = %connection.id(), "Reusing idle connection");
                return Ok(connection);
            }
            if state.open < self.size {
                state.open += 1;
                self.checkouts.fetch_add(1, Ordering::Relaxed);
                let connection = MemoryConnection::open(self.database.clone());
                debug!(
                    pool = %self.name,
                    connection = %connection.id,
                    open = state.open,
                    "Opened connection"
                );
                return Ok(Box::new(connection));
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return Err(DriverError::CheckoutTimeout {
                    pool: self.name.clone(),
                    waited: self.timeout,
                });
            }
        }
    }

    fn checkin(&self, connection: Box<dyn Connection>) {
        self.checkins.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        if state.disconnected {
            state.open = state.open.saturating_sub(1);
            return;
        }
        state.idle.push(connection);
        drop(state);
        self.available.notify_one();
    }

    fn size(&self) -> usize {
        self.size
    }

    fn open_connections(&self) -> usize {
        self.state.lock().open
    }

    fn disconnect(&self) {
        let mut state = self.state.lock();
        state.disconnected = true;
        let closed = state.idle.len();
        state.open = state.open.saturating_sub(closed);
        state.idle.clear();
        drop(state);
        self.available.notify_all();
        debug!(pool = %self.name, closed, "Disconnected pool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(size: usize, timeout_ms: u64) -> MemoryPool {
        MemoryPool::new(
            "alpha:shard1",
            Arc::new(MemoryDatabase::new("alpha_1")),
            size,
            Duration::from_millis(timeout_ms),
        )
    }

    #[test]
    fn test_lazy_open_and_reuse() {
        let pool = pool(2, 50);
        assert_eq!(pool.open_connections(), 0);

        let first = pool.checkout().unwrap();
        let first_id = first.id().to_string();
        pool.checkin(first);

        let again = pool.checkout().unwrap();
        assert_eq!(again.id(), first_id);
        assert_eq!(pool.open_connections(), 1);
        pool.checkin(again);

        let stats = pool.stats();
        assert_eq!((stats.checkouts, stats.checkins), (2, 2));
    }

    #[test]
    fn test_checkout_times_out_when_exhausted() {
        let pool = pool(1, 20);
        let held = pool.checkout().unwrap();

        let result = pool.checkout();
        assert!(matches!(result, Err(DriverError::CheckoutTimeout { .. })));

        pool.checkin(held);
        assert!(pool.checkout().is_ok());
    }

    #[test]
    fn test_waiting_checkout_is_woken_by_checkin() {
        let pool = Arc::new(pool(1, 2_000));
        let held = pool.checkout().unwrap();

        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.checkout().map(|c| c.id().to_string()))
        };

        std::thread::sleep(Duration::from_millis(20));
        let held_id = held.id().to_string();
        pool.checkin(held);

        assert_eq!(waiter.join().unwrap().unwrap(), held_id);
    }

    #[test]
    fn test_disconnect_refuses_checkout() {
        let pool = pool(1, 20);
        pool.disconnect();
        assert!(matches!(pool.checkout(), Err(DriverError::PoolDisconnected(_))));
    }

    #[test]
    fn test_connection_tag() {
        let pool = pool(1, 20);
        let mut connection = pool.checkout().unwrap();
        assert_eq!(connection.shard_tag(), None);
        connection.attach_tag("alpha:shard1");
        assert_eq!(connection.shard_tag(), Some("alpha:shard1"));
    }
}
