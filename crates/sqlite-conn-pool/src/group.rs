//! Pool groups: per-connection-string state machines gating pool creation

use crate::driver::Driver;
use crate::options::ConnectionOptions;
use crate::pool::{lock, ConnectionPool};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Idle-state progression for a pool group.
///
/// Only the pruning sweep advances the state, one notch per sweep with an
/// empty pool; any acquisition activity resets it to Active. Disabled is
/// terminal: a disabled group is evicted from the registry and replaced by a
/// fresh group on next use of the same string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GroupState {
   Active,
   Idle,
   Disabled,
}

struct GroupInner {
   state: GroupState,
   pool: Option<Arc<ConnectionPool>>,
}

/// Owns zero or one connection pool for one distinct connection-string text
pub(crate) struct PoolGroup {
   options: Arc<ConnectionOptions>,
   is_non_pooled: bool,
   inner: Mutex<GroupInner>,
}

impl PoolGroup {
   pub(crate) fn new(options: Arc<ConnectionOptions>) -> Self {
      let is_non_pooled = options.is_non_pooled();
      Self {
         options,
         is_non_pooled,
         inner: Mutex::new(GroupInner {
            state: GroupState::Active,
            pool: None,
         }),
      }
   }

   /// The group's pool, created lazily on first use.
   ///
   /// Non-pooled groups just record activity and return `None`: every
   /// checkout becomes a fresh unpooled connection. Returns `None` for a
   /// Disabled group too; the caller must fetch a replacement group.
   pub(crate) fn get_pool(&self, driver: &Arc<dyn Driver>) -> Option<Arc<ConnectionPool>> {
      if self.is_non_pooled {
         self.keep_alive();
         return None;
      }

      let mut inner = lock(&self.inner);
      if inner.state == GroupState::Disabled {
         return None;
      }
      inner.state = GroupState::Active;

      if let Some(pool) = &inner.pool {
         return Some(Arc::clone(pool));
      }
      let pool = Arc::new(ConnectionPool::new(
         Arc::clone(&self.options),
         Arc::clone(driver),
      ));
      inner.pool = Some(Arc::clone(&pool));
      Some(pool)
   }

   /// Record activity: Idle goes back to Active. Returns false only when the
   /// group is Disabled, which refuses to resurrect it.
   pub(crate) fn keep_alive(&self) -> bool {
      let mut inner = lock(&self.inner);
      if inner.state == GroupState::Disabled {
         return false;
      }
      inner.state = GroupState::Active;
      true
   }

   /// Detach this group's pool for release, if it has one.
   ///
   /// The caller (the factory) shuts the pool down and clears it; the group
   /// just forgets it ever owned one.
   pub(crate) fn take_pool_for_clear(&self) -> Option<Arc<ConnectionPool>> {
      lock(&self.inner).pool.take()
   }

   /// One pruning step. An empty pool is released (deferred disposal, so the
   /// sweep never blocks on native closes); a poolless group advances one
   /// notch toward Disabled. Returns the released pool, if any, and whether
   /// the group is now fully disabled.
   pub(crate) fn prune(&self) -> (Option<Arc<ConnectionPool>>, bool) {
      let mut inner = lock(&self.inner);

      let mut released = None;
      if inner.pool.as_ref().is_some_and(|pool| pool.is_empty()) {
         released = inner.pool.take();
      }

      if inner.pool.is_none() {
         inner.state = match inner.state {
            GroupState::Active => GroupState::Idle,
            GroupState::Idle | GroupState::Disabled => GroupState::Disabled,
         };
         if inner.state == GroupState::Disabled {
            debug!(data_source = %self.options.data_source, "pool group disabled");
         }
      }

      (released, inner.state == GroupState::Disabled)
   }

   pub(crate) fn is_disabled(&self) -> bool {
      lock(&self.inner).state == GroupState::Disabled
   }

   pub(crate) fn pool(&self) -> Option<Arc<ConnectionPool>> {
      lock(&self.inner).pool.clone()
   }

   pub(crate) fn options(&self) -> &Arc<ConnectionOptions> {
      &self.options
   }

   pub(crate) fn is_non_pooled(&self) -> bool {
      self.is_non_pooled
   }
}

impl std::fmt::Debug for PoolGroup {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      let inner = lock(&self.inner);
      f.debug_struct("PoolGroup")
         .field("state", &inner.state)
         .field("non_pooled", &self.is_non_pooled)
         .field("has_pool", &inner.pool.is_some())
         .finish()
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::mock::MockDriver;

   fn group_for(connection_string: &str) -> (PoolGroup, Arc<dyn Driver>) {
      let options = Arc::new(ConnectionOptions::parse(connection_string).unwrap());
      let driver: Arc<dyn Driver> = Arc::new(MockDriver::new());
      (PoolGroup::new(options), driver)
   }

   #[test]
   fn test_non_pooled_group_never_creates_a_pool() {
      for cs in [
         "Data Source=:memory:",
         "Data Source=x.db;Mode=Memory",
         "",
         "Data Source=x.db;Pooling=False",
      ] {
         let (group, driver) = group_for(cs);
         assert!(group.is_non_pooled(), "{cs:?} should be exempt from pooling");
         assert!(group.get_pool(&driver).is_none());
         assert!(group.pool().is_none());
      }
   }

   #[test]
   fn test_lazy_pool_is_created_once() {
      let (group, driver) = group_for("Data Source=x.db");
      let a = group.get_pool(&driver).unwrap();
      let b = group.get_pool(&driver).unwrap();
      assert!(Arc::ptr_eq(&a, &b));
   }

   #[test]
   fn test_idle_state_advances_only_on_empty_prunes() {
      let (group, driver) = group_for("Data Source=x.db");
      let pool = group.get_pool(&driver).unwrap();

      // A non-empty pool blocks the idle march
      let conn = pool.get_connection().unwrap().unwrap();
      let (released, disabled) = group.prune();
      assert!(released.is_none());
      assert!(!disabled);

      // Empty the pool: first prune releases it (Active -> Idle)
      {
         let owner = Arc::new(crate::physical::OwnerToken);
         conn.activate(&owner);
         pool.return_connection(conn);
      }
      pool.clear();
      let (released, disabled) = group.prune();
      assert!(released.is_some());
      assert!(!disabled);
      assert!(!group.is_disabled());

      // Second empty prune: Idle -> Disabled
      let (_, disabled) = group.prune();
      assert!(disabled);
      assert!(group.is_disabled());
   }

   #[test]
   fn test_keep_alive_resets_idle_but_not_disabled() {
      let (group, _driver) = group_for("Data Source=x.db");

      group.prune(); // Active -> Idle (no pool was ever created)
      assert!(group.keep_alive(), "idle group must come back to life");

      let (_, disabled) = group.prune();
      assert!(!disabled, "keep_alive reset the idle march");

      group.prune();
      assert!(group.is_disabled());
      assert!(!group.keep_alive(), "disabled group must refuse resurrection");
   }

   #[test]
   fn test_disabled_group_returns_no_pool() {
      let (group, driver) = group_for("Data Source=x.db");
      group.prune();
      group.prune();
      assert!(group.is_disabled());
      assert!(group.get_pool(&driver).is_none());
   }
}
