//! Process-wide connection factory: pool groups keyed by connection-string
//! text, deferred pool release, and the periodic pruning sweep

use crate::config::PoolConfig;
use crate::connection::{Connection, Route};
use crate::driver::Driver;
use crate::error::Error;
use crate::group::PoolGroup;
use crate::native::NativeDriver;
use crate::options::ConnectionOptions;
use crate::physical::{OwnerToken, PhysicalConnection};
use crate::pool::{lock, ConnectionPool, SharedPhysical};
use crate::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::JoinHandle;
use tracing::{debug, error};

static GLOBAL_FACTORY: OnceLock<Arc<ConnectionFactory>> = OnceLock::new();

/// Maps connection-string text to pool groups and owns the pruning sweep
///
/// Constructed explicitly rather than relying on process-exit hooks: call
/// [`shutdown`](Self::shutdown) to flush native handles deterministically.
/// Dropping the factory performs the same teardown as a best-effort fallback.
///
/// The raw connection-string text is the cache key. Two strings that are
/// semantically identical but textually different (key order, aliases) get
/// separate pool groups; this is a documented simplicity tradeoff.
pub struct ConnectionFactory {
   driver: Arc<dyn Driver>,
   config: PoolConfig,
   groups: Mutex<HashMap<String, Arc<PoolGroup>>>,
   /// Pools shut down but possibly still tracking checked-out connections;
   /// fully drained across pruning sweeps
   pools_to_release: Mutex<Vec<Arc<ConnectionPool>>>,
   pruner: Mutex<Option<JoinHandle<()>>>,
   prune_signal: Arc<(Mutex<bool>, Condvar)>,
   is_shut_down: AtomicBool,
}

impl ConnectionFactory {
   /// Create a factory with its own driver and configuration.
   ///
   /// With `background_pruning` enabled (the default) a thread sweeps idle
   /// pools and groups every [`PoolConfig::prune_interval_secs`] seconds.
   pub fn new(driver: Arc<dyn Driver>, config: PoolConfig) -> Arc<Self> {
      let factory = Arc::new(Self {
         driver,
         config,
         groups: Mutex::new(HashMap::new()),
         pools_to_release: Mutex::new(Vec::new()),
         pruner: Mutex::new(None),
         prune_signal: Arc::new((Mutex::new(false), Condvar::new())),
         is_shut_down: AtomicBool::new(false),
      });

      if factory.config.background_pruning {
         factory.spawn_pruner();
      }
      factory
   }

   /// The process-wide factory used by [`Connection::open`], created on
   /// first use with the native driver and default configuration
   pub fn global() -> &'static Arc<ConnectionFactory> {
      GLOBAL_FACTORY
         .get_or_init(|| ConnectionFactory::new(Arc::new(NativeDriver), PoolConfig::default()))
   }

   /// Open a connection for `connection_string`, reusing a pooled physical
   /// connection when one is available.
   ///
   /// A disabled pool or group encountered mid-operation is never an error:
   /// the factory silently falls back to a fresh group or a fresh unpooled
   /// connection.
   pub fn get_connection(&self, connection_string: &str) -> Result<Connection> {
      if self.is_shut_down.load(Ordering::SeqCst) {
         return Err(Error::FactoryShutdown);
      }

      let group = self.pool_group(connection_string)?;

      let (physical, route) = match group.get_pool(&self.driver) {
         Some(pool) => match pool.get_connection()? {
            Some(physical) => (physical, Route::Pooled(pool)),
            // Pool was shut down between lookup and checkout
            None => (self.open_unpooled(group.options())?, Route::Unpooled),
         },
         None => (self.open_unpooled(group.options())?, Route::Unpooled),
      };

      let owner = Arc::new(OwnerToken);
      physical.activate(&owner);

      Ok(Connection::new(
         physical,
         route,
         owner,
         Arc::clone(group.options()),
      ))
   }

   /// Resolve the pool group for a connection string, creating it (or
   /// replacing a disabled poolable one) under the registry lock with a
   /// double check.
   ///
   /// A disabled non-pooled group is kept as-is: it has no pool to replace,
   /// every checkout through it opens fresh anyway, and the next sweep
   /// evicts it.
   pub(crate) fn pool_group(&self, connection_string: &str) -> Result<Arc<PoolGroup>> {
      {
         let groups = lock(&self.groups);
         if let Some(group) = groups.get(connection_string) {
            if !group.is_disabled() || group.is_non_pooled() {
               return Ok(Arc::clone(group));
            }
         }
      }

      // Parse outside the lock, then double-check: another thread may have
      // inserted the group while we were parsing.
      let options = Arc::new(ConnectionOptions::parse(connection_string)?);

      let mut groups = lock(&self.groups);
      match groups.get(connection_string) {
         Some(group) if !group.is_disabled() || group.is_non_pooled() => Ok(Arc::clone(group)),
         _ => {
            let group = Arc::new(PoolGroup::new(options));
            groups.insert(connection_string.to_string(), Arc::clone(&group));
            Ok(group)
         }
      }
   }

   /// Shut a pool down and queue it for deferred cleanup.
   ///
   /// With `clearing` the idle connections close synchronously; otherwise
   /// disposal is left to the next pruning sweep.
   pub(crate) fn release_pool(&self, pool: Arc<ConnectionPool>, clearing: bool) {
      pool.shutdown();
      if clearing {
         pool.clear();
      }
      lock(&self.pools_to_release).push(pool);
   }

   /// Close every idle connection pooled for `connection_string`.
   ///
   /// Checked-out connections are unaffected until returned, at which point
   /// they see the disabled pool and dispose themselves.
   pub fn clear_pool(&self, connection_string: &str) {
      let group = lock(&self.groups).get(connection_string).cloned();
      if let Some(group) = group {
         self.clear_group(&group);
      }
   }

   /// [`clear_pool`](Self::clear_pool) across every group
   pub fn clear_all_pools(&self) {
      let groups: Vec<_> = lock(&self.groups).values().cloned().collect();
      debug!(groups = groups.len(), "clearing all pools");
      for group in groups {
         self.clear_group(&group);
      }
   }

   /// One full pruning sweep, also available to tests and embedders that
   /// disabled background pruning
   pub fn prune_now(&self) {
      // Finish off pools released on earlier passes; requeue any that still
      // track checked-out connections.
      let queued = std::mem::take(&mut *lock(&self.pools_to_release));
      let mut still_live = Vec::new();
      for pool in queued {
         pool.clear();
         if !pool.is_empty() {
            still_live.push(pool);
         }
      }
      lock(&self.pools_to_release).extend(still_live);

      // Groups disabled on a previous pass leave the registry now
      lock(&self.groups).retain(|_, group| !group.is_disabled());

      // Age each live pool, then advance each group's idle state
      let groups: Vec<_> = lock(&self.groups).values().cloned().collect();
      for group in groups {
         if let Some(pool) = group.pool() {
            pool.prune_tick();
         }
         let (released, _) = group.prune();
         if let Some(pool) = released {
            self.release_pool(pool, false);
         }
      }
   }

   /// Stop the pruner thread and close every pooled native handle.
   ///
   /// Idempotent. After shutdown the factory refuses new connections.
   pub fn shutdown(&self) {
      if self.is_shut_down.swap(true, Ordering::SeqCst) {
         return;
      }

      {
         let (flag, cvar) = &*self.prune_signal;
         *lock(flag) = true;
         cvar.notify_all();
      }
      if let Some(handle) = lock(&self.pruner).take() {
         let _ = handle.join();
      }

      self.clear_all_pools();
      for pool in std::mem::take(&mut *lock(&self.pools_to_release)) {
         pool.clear();
      }
      debug!("connection factory shut down");
   }

   fn clear_group(&self, group: &PoolGroup) {
      if let Some(pool) = group.take_pool_for_clear() {
         self.release_pool(pool, true);
      }
   }

   fn open_unpooled(&self, options: &Arc<ConnectionOptions>) -> Result<SharedPhysical> {
      let conn = self.driver.open(options)?;
      Ok(Arc::new(PhysicalConnection::new(conn, false)))
   }

   fn spawn_pruner(self: &Arc<Self>) {
      let weak = Arc::downgrade(self);
      let signal = Arc::clone(&self.prune_signal);
      let interval = self.config.prune_interval();

      let spawned = std::thread::Builder::new()
         .name("sqlite-pool-pruner".into())
         .spawn(move || {
            let (flag, cvar) = &*signal;
            loop {
               let guard = lock(flag);
               let (guard, _) = cvar
                  .wait_timeout(guard, interval)
                  .unwrap_or_else(std::sync::PoisonError::into_inner);
               if *guard {
                  break;
               }
               drop(guard);

               let Some(factory) = weak.upgrade() else {
                  break;
               };
               factory.prune_now();
            }
         });

      match spawned {
         Ok(handle) => *lock(&self.pruner) = Some(handle),
         Err(e) => error!(error = %e, "failed to spawn pool pruner thread"),
      }
   }
}

impl Drop for ConnectionFactory {
   fn drop(&mut self) {
      // Best-effort fallback for embedders that never called shutdown()
      self.shutdown();
   }
}

impl std::fmt::Debug for ConnectionFactory {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("ConnectionFactory")
         .field("groups", &lock(&self.groups).len())
         .field("shut_down", &self.is_shut_down.load(Ordering::SeqCst))
         .finish()
   }
}
