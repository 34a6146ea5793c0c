//! Physical-connection pool with two-tier warm/cold staleness and
//! opportunistic leak recovery
//!
//! Connections are handed out LIFO within a tier, warm preferred over cold,
//! to maximize cache-hot reuse. There is no upper bound on pool size: a miss
//! on both stacks always ends in a fresh allocation, and the pruning sweep
//! bounds steady-state size instead.
//!
//! Lock discipline: the pool's three collections live behind one mutex that
//! is held only for stack and pointer manipulation, never across native I/O.
//! Per-connection checkout flags live behind their own lock (see
//! [`PhysicalConnection`]), so checkout misses, leak scans, and clear's
//! poison pass never wait for a statement running on a checked-out
//! connection. No two of these locks are ever held at once.

use crate::driver::Driver;
use crate::options::ConnectionOptions;
use crate::physical::PhysicalConnection;
use crate::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// A physical connection shared between the pool's tracking set and whichever
/// caller currently holds it
pub(crate) type SharedPhysical = Arc<PhysicalConnection>;

/// Lock a mutex, ignoring poisoning: pool state stays consistent because
/// every mutation completes before the guard drops.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
   mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PoolState {
   Active,
   Disabled,
}

struct PoolInner {
   state: PoolState,
   /// Every connection this pool has ever created and not yet disposed,
   /// including checked-out ones. Used for leak detection and clearing.
   all: Vec<SharedPhysical>,
   /// Recently returned, assumed still valid
   warm: Vec<SharedPhysical>,
   /// Idle for at least one prune interval; next tick disposes these
   cold: Vec<SharedPhysical>,
}

/// Object pool over physical connections for one pool group
pub(crate) struct ConnectionPool {
   options: Arc<ConnectionOptions>,
   driver: Arc<dyn Driver>,
   created: AtomicU64,
   inner: Mutex<PoolInner>,
}

impl ConnectionPool {
   pub(crate) fn new(options: Arc<ConnectionOptions>, driver: Arc<dyn Driver>) -> Self {
      Self {
         options,
         driver,
         created: AtomicU64::new(0),
         inner: Mutex::new(PoolInner {
            state: PoolState::Active,
            all: Vec::new(),
            warm: Vec::new(),
            cold: Vec::new(),
         }),
      }
   }

   /// Check a connection out of the pool, or open a new one on a miss.
   ///
   /// Returns `None` if the pool has been shut down; the caller falls back to
   /// an unpooled connection. The returned connection is not yet activated.
   pub(crate) fn get_connection(&self) -> Result<Option<SharedPhysical>> {
      loop {
         let total = {
            let mut inner = lock(&self.inner);
            if inner.state == PoolState::Disabled {
               return Ok(None);
            }
            if let Some(conn) = inner.warm.pop().or_else(|| inner.cold.pop()) {
               return Ok(Some(conn));
            }
            inner.all.len()
         };

         // Leak reclamation walks the whole tracked set, so throttle it to
         // every other miss. A reclaimed connection lands back in warm and
         // the loop picks it up on the next pass.
         if total % 2 == 0 && self.reclaim_leaked() {
            continue;
         }

         // Native open happens outside the pool lock
         let conn = self.driver.open(&self.options)?;
         let physical = Arc::new(PhysicalConnection::new(conn, true));

         let mut inner = lock(&self.inner);
         if inner.state == PoolState::Disabled {
            drop(inner);
            physical.dispose();
            return Ok(None);
         }
         inner.all.push(Arc::clone(&physical));
         self.created.fetch_add(1, Ordering::SeqCst);
         return Ok(Some(physical));
      }
   }

   /// Return a connection: deactivate it, then re-pool to warm or dispose.
   ///
   /// Disposal happens when the pool was shut down or the connection was
   /// poisoned while out. Idempotent for a connection that was already
   /// returned, so a racing leak-reclamation sweep cannot double-pool it.
   pub(crate) fn return_connection(&self, physical: SharedPhysical) {
      if !physical.begin_return() {
         return;
      }
      physical.deactivate();

      if physical.can_be_pooled() && !physical.is_disposed() {
         let mut inner = lock(&self.inner);
         if inner.state == PoolState::Active {
            inner.warm.push(physical);
            return;
         }
      }

      physical.dispose();
      self.forget(&physical);
   }

   /// Dispose every idle connection and poison the checked-out ones so their
   /// eventual return disposes them too
   pub(crate) fn clear(&self) {
      let (in_use, idle) = {
         let mut inner = lock(&self.inner);
         let mut idle: Vec<_> = inner.warm.drain(..).collect();
         idle.extend(inner.cold.drain(..));
         inner
            .all
            .retain(|conn| !idle.iter().any(|i| Arc::ptr_eq(conn, i)));
         (inner.all.clone(), idle)
      };

      debug!(idle = idle.len(), in_use = in_use.len(), "clearing pool");
      for conn in &in_use {
         conn.poison();
      }
      for conn in idle {
         conn.dispose();
      }

      // Catch handles that were already leaked before the clear
      self.reclaim_leaked();
   }

   /// Stop handing out connections. Does not touch existing connections;
   /// draining happens via `clear` or natural returns.
   pub(crate) fn shutdown(&self) {
      lock(&self.inner).state = PoolState::Disabled;
   }

   /// One aging step: dispose the cold stack, then demote warm to cold.
   ///
   /// A returned connection therefore survives at least one full prune
   /// interval unused before it becomes eligible for disposal.
   pub(crate) fn prune_tick(&self) {
      let stale = {
         let mut inner = lock(&self.inner);
         if inner.state == PoolState::Disabled {
            return;
         }
         let stale: Vec<_> = inner.cold.drain(..).collect();
         let demoted: Vec<_> = inner.warm.drain(..).collect();
         inner.cold = demoted;
         inner
            .all
            .retain(|conn| !stale.iter().any(|s| Arc::ptr_eq(conn, s)));
         stale
      };

      if !stale.is_empty() {
         debug!(count = stale.len(), "pruning cold connections");
      }
      for conn in stale {
         conn.dispose();
      }
   }

   /// Scan for connections that are marked checked-out but whose owner handle
   /// no longer exists, and force-return them.
   ///
   /// The scan touches only each connection's checkout flags, never its
   /// driver lock. With RAII returns this is a diagnostic fallback, not the
   /// primary cleanup path. Returns whether anything was reclaimed, which the
   /// checkout loop uses as a signal to retry the pop instead of allocating.
   pub(crate) fn reclaim_leaked(&self) -> bool {
      let snapshot = lock(&self.inner).all.clone();

      let mut reclaimed = false;
      for conn in snapshot {
         if conn.is_leaked() {
            warn!(id = conn.id(), "reclaiming leaked connection");
            reclaimed = true;
            self.return_connection(conn);
         }
      }
      reclaimed
   }

   /// No live connections tracked (idle or checked out)
   pub(crate) fn is_empty(&self) -> bool {
      lock(&self.inner).all.is_empty()
   }

   /// Total physical connections ever constructed by this pool
   pub(crate) fn connections_created(&self) -> u64 {
      self.created.load(Ordering::SeqCst)
   }

   #[cfg(test)]
   fn counts(&self) -> (usize, usize, usize) {
      let inner = lock(&self.inner);
      (inner.all.len(), inner.warm.len(), inner.cold.len())
   }

   fn forget(&self, physical: &SharedPhysical) {
      let mut inner = lock(&self.inner);
      inner.all.retain(|conn| !Arc::ptr_eq(conn, physical));
      inner.warm.retain(|conn| !Arc::ptr_eq(conn, physical));
      inner.cold.retain(|conn| !Arc::ptr_eq(conn, physical));
   }
}

impl std::fmt::Debug for ConnectionPool {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      let inner = lock(&self.inner);
      f.debug_struct("ConnectionPool")
         .field("state", &inner.state)
         .field("tracked", &inner.all.len())
         .field("warm", &inner.warm.len())
         .field("cold", &inner.cold.len())
         .finish()
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::mock::MockDriver;
   use crate::physical::OwnerToken;
   use std::time::{Duration, Instant};

   fn mock_pool() -> (Arc<ConnectionPool>, Arc<MockDriver>) {
      let driver = Arc::new(MockDriver::new());
      let options = Arc::new(ConnectionOptions {
         data_source: "mock.db".into(),
         ..Default::default()
      });
      let pool = Arc::new(ConnectionPool::new(options, Arc::clone(&driver) as Arc<dyn Driver>));
      (pool, driver)
   }

   fn check_out(pool: &ConnectionPool) -> (SharedPhysical, Arc<OwnerToken>) {
      let conn = pool.get_connection().unwrap().expect("pool disabled");
      let owner = Arc::new(OwnerToken);
      conn.activate(&owner);
      (conn, owner)
   }

   #[test]
   fn test_warm_reuse_constructs_once() {
      let (pool, driver) = mock_pool();

      for _ in 0..5 {
         let (conn, owner) = check_out(&pool);
         pool.return_connection(conn);
         drop(owner);
      }

      assert_eq!(driver.opened(), 1, "sequential open/close must reuse one connection");
      assert_eq!(pool.connections_created(), 1);
   }

   #[test]
   fn test_concurrent_checkouts_get_distinct_connections() {
      let (pool, driver) = mock_pool();

      let held: Vec<_> = (0..5).map(|_| check_out(&pool)).collect();
      assert_eq!(driver.opened(), 5);
      assert_eq!(pool.counts().0, 5, "all five must be tracked in the full set");

      for (conn, owner) in held {
         pool.return_connection(conn);
         drop(owner);
      }
      assert_eq!(pool.counts(), (5, 5, 0));
   }

   #[test]
   fn test_at_most_one_owner_under_contention() {
      let (pool, _driver) = mock_pool();

      let handles: Vec<_> = (0..4)
         .map(|_| {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
               for _ in 0..100 {
                  let conn = pool.get_connection().unwrap().unwrap();
                  let owner = Arc::new(OwnerToken);
                  assert!(
                     !conn.is_active(),
                     "same connection issued to two callers simultaneously"
                  );
                  conn.activate(&owner);
                  pool.return_connection(conn);
                  drop(owner);
               }
            })
         })
         .collect();

      for handle in handles {
         handle.join().unwrap();
      }
   }

   #[test]
   fn test_aging_requires_two_ticks() {
      let (pool, driver) = mock_pool();
      let (conn, owner) = check_out(&pool);
      pool.return_connection(conn);
      drop(owner);

      // First tick demotes warm to cold; the connection survives
      pool.prune_tick();
      assert_eq!(pool.counts(), (1, 0, 1));
      assert_eq!(driver.dropped(), 0);

      // Second tick disposes it
      pool.prune_tick();
      assert_eq!(pool.counts(), (0, 0, 0));
      assert_eq!(driver.dropped(), 1);
   }

   #[test]
   fn test_reuse_resets_aging_grace_period() {
      let (pool, driver) = mock_pool();
      let (conn, owner) = check_out(&pool);
      pool.return_connection(conn);
      drop(owner);

      pool.prune_tick(); // warm -> cold

      // Reuse from cold and return: back to warm, grace period restarts
      let (conn, owner) = check_out(&pool);
      pool.return_connection(conn);
      drop(owner);

      pool.prune_tick();
      assert_eq!(driver.dropped(), 0, "reused connection must get a fresh grace period");
      assert_eq!(pool.counts(), (1, 0, 1));
   }

   #[test]
   fn test_clear_drains_idle_and_poisons_in_use() {
      let (pool, driver) = mock_pool();

      let (held, held_owner) = check_out(&pool);
      let (idle, idle_owner) = check_out(&pool);
      pool.return_connection(idle);
      drop(idle_owner);

      pool.clear();
      assert_eq!(driver.dropped(), 1, "idle connection disposed synchronously");
      assert_eq!(pool.counts(), (1, 0, 0), "in-use connection stays tracked");

      // The survivor was poisoned: its return disposes instead of re-pooling
      pool.return_connection(held);
      drop(held_owner);
      assert_eq!(driver.dropped(), 2);
      assert_eq!(pool.counts(), (0, 0, 0));

      // The pool itself stays usable after a clear
      let (conn, owner) = check_out(&pool);
      assert_eq!(driver.opened(), 3);
      pool.return_connection(conn);
      drop(owner);
   }

   #[test]
   fn test_disabled_pool_refuses_checkouts_and_disposes_returns() {
      let (pool, driver) = mock_pool();
      let (held, held_owner) = check_out(&pool);

      pool.shutdown();
      assert!(pool.get_connection().unwrap().is_none());

      pool.return_connection(held);
      drop(held_owner);
      assert_eq!(driver.dropped(), 1, "return to a disabled pool must dispose");
      assert!(pool.is_empty());
   }

   #[test]
   fn test_leak_reclamation_on_even_totals() {
      let (pool, driver) = mock_pool();

      // Leak one connection: checked out, owner token dropped without return
      let (leaked, leaked_owner) = check_out(&pool);
      drop(leaked_owner);

      // Total is 1 (odd): the next miss allocates instead of scanning
      let (second, second_owner) = check_out(&pool);
      assert_eq!(driver.opened(), 2);

      // Total is now 2 (even): the next miss reclaims the leaked connection
      let reclaimed = pool.get_connection().unwrap().unwrap();
      assert!(Arc::ptr_eq(&reclaimed, &leaked), "leaked connection should be recycled");
      assert_eq!(driver.opened(), 2, "no new allocation when reclamation succeeds");
      assert!(!reclaimed.is_active(), "reclaimed connection was deactivated");

      pool.return_connection(second);
      drop(second_owner);
   }

   #[test]
   fn test_reclaim_reports_nothing_without_leaks() {
      let (pool, _driver) = mock_pool();
      let (conn, owner) = check_out(&pool);
      assert!(!pool.reclaim_leaked(), "live owner is not a leak");
      pool.return_connection(conn);
      drop(owner);
      assert!(!pool.reclaim_leaked(), "idle connections are not leaks");
   }

   #[test]
   fn test_checkout_does_not_wait_on_in_flight_io() {
      let (pool, driver) = mock_pool();
      let (busy, _busy_owner) = check_out(&pool);
      let (_other, _other_owner) = check_out(&pool);

      // Simulate a long-running statement on one checked-out connection
      let io = {
         let busy = Arc::clone(&busy);
         std::thread::spawn(move || {
            busy.with_driver(|_| {
               std::thread::sleep(Duration::from_millis(400));
               Ok(())
            })
         })
      };
      std::thread::sleep(Duration::from_millis(50));

      // Total is 2 (even): this miss runs the leak scan, which must not
      // touch the in-flight connection's driver lock.
      let start = Instant::now();
      let (fresh, fresh_owner) = check_out(&pool);
      assert!(
         start.elapsed() < Duration::from_millis(200),
         "checkout must not wait for another connection's in-flight I/O"
      );
      assert_eq!(driver.opened(), 3);

      io.join().unwrap().unwrap();
      pool.return_connection(fresh);
      drop(fresh_owner);
   }

   #[test]
   fn test_clear_does_not_wait_on_in_flight_io() {
      let (pool, driver) = mock_pool();
      let (busy, busy_owner) = check_out(&pool);

      let io = {
         let busy = Arc::clone(&busy);
         std::thread::spawn(move || {
            busy.with_driver(|_| {
               std::thread::sleep(Duration::from_millis(400));
               Ok(())
            })
         })
      };
      std::thread::sleep(Duration::from_millis(50));

      // The poison pass only flips checkout flags, so clear returns while
      // the query is still running.
      let start = Instant::now();
      pool.clear();
      assert!(
         start.elapsed() < Duration::from_millis(200),
         "clear must not wait for in-flight I/O"
      );

      io.join().unwrap().unwrap();
      pool.return_connection(busy);
      drop(busy_owner);
      assert_eq!(driver.dropped(), 1, "poisoned connection disposes on return");
   }
}
