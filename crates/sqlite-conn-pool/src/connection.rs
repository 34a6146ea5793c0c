//! Outer connection handle: the public, RAII-scoped face of a checkout

use crate::driver::{
   AggregateFinalCallback, AggregateStepCallback, CollationCallback, ScalarCallback,
};
use crate::error::Error;
use crate::factory::ConnectionFactory;
use crate::options::ConnectionOptions;
use crate::physical::OwnerToken;
use crate::pool::{ConnectionPool, SharedPhysical};
use crate::Result;
use std::sync::Arc;

/// How the physical connection goes back when this handle closes
pub(crate) enum Route {
   Pooled(Arc<ConnectionPool>),
   Unpooled,
}

/// A checked-out database connection.
///
/// Dropping the handle returns the physical connection to its pool (or closes
/// it, for non-pooled connection strings); there is no failure mode on the
/// way out. [`close`](Self::close) exists for callers that want the return to
/// read explicitly.
pub struct Connection {
   physical: Option<SharedPhysical>,
   route: Route,
   // Held for its liveness: the physical connection watches this token via a
   // weak reference to detect abandonment.
   _owner: Arc<OwnerToken>,
   options: Arc<ConnectionOptions>,
}

impl Connection {
   /// Open a connection through the process-wide factory.
   ///
   /// ```no_run
   /// # fn main() -> sqlite_conn_pool::Result<()> {
   /// let mut conn = sqlite_conn_pool::Connection::open("Data Source=app.db")?;
   /// conn.execute("CREATE TABLE IF NOT EXISTS t (x INTEGER)")?;
   /// # Ok(())
   /// # }
   /// ```
   pub fn open(connection_string: &str) -> Result<Self> {
      ConnectionFactory::global().get_connection(connection_string)
   }

   pub(crate) fn new(
      physical: SharedPhysical,
      route: Route,
      owner: Arc<OwnerToken>,
      options: Arc<ConnectionOptions>,
   ) -> Self {
      Self {
         physical: Some(physical),
         route,
         _owner: owner,
         options,
      }
   }

   /// The parsed options this connection was opened with
   pub fn options(&self) -> &ConnectionOptions {
      &self.options
   }

   /// Run one or more SQL statements, returning the rows changed by the last
   /// one. Busy retries use the connection string's `Default Timeout`.
   pub fn execute(&mut self, sql: &str) -> Result<u64> {
      let timeout = self.options.default_timeout;
      self.physical()?.with_driver(|driver| driver.execute(sql, timeout))
   }

   /// Run a query and return the first column of its first row, or `None`
   /// for an empty result set
   pub fn query_scalar_i64(&mut self, sql: &str) -> Result<Option<i64>> {
      let timeout = self.options.default_timeout;
      self.physical()?.with_driver(|driver| driver.query_scalar_i64(sql, timeout))
   }

   /// Register a scalar SQL function for this connection's session.
   ///
   /// Registrations are scoped to the checkout: they are wiped when the
   /// connection returns to the pool.
   pub fn create_scalar_function(
      &mut self,
      name: &str,
      n_args: i32,
      f: ScalarCallback,
   ) -> Result<()> {
      self.physical()?.with_driver(|driver| driver.create_scalar_function(name, n_args, f))
   }

   /// Register a collation for this connection's session, wiped on return
   /// like scalar functions
   pub fn create_collation(&mut self, name: &str, f: CollationCallback) -> Result<()> {
      self.physical()?.with_driver(|driver| driver.create_collation(name, f))
   }

   /// Register an aggregate SQL function for this connection's session.
   ///
   /// The accumulator starts as [`Value::Null`](crate::Value::Null) for each
   /// group; `step` folds rows into it and `finalize` produces the result.
   /// Wiped on return like scalar functions.
   pub fn create_aggregate(
      &mut self,
      name: &str,
      n_args: i32,
      step: AggregateStepCallback,
      finalize: AggregateFinalCallback,
   ) -> Result<()> {
      self.physical()?.with_driver(|driver| driver.create_aggregate(name, n_args, step, finalize))
   }

   /// Allow or forbid `load_extension()` for this session. Always reset to
   /// forbidden when the connection returns to the pool.
   pub fn enable_load_extension(&mut self, enabled: bool) -> Result<()> {
      self.physical()?.with_driver(|driver| driver.enable_load_extension(enabled))
   }

   /// Return the connection explicitly. Equivalent to dropping the handle.
   pub fn close(self) {}

   fn physical(&self) -> Result<&SharedPhysical> {
      self.physical.as_ref().ok_or(Error::ConnectionClosed)
   }
}

impl Drop for Connection {
   fn drop(&mut self) {
      let Some(physical) = self.physical.take() else {
         return;
      };
      match &self.route {
         Route::Pooled(pool) => pool.return_connection(physical),
         Route::Unpooled => physical.dispose(),
      }
   }
}

impl std::fmt::Debug for Connection {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("Connection")
         .field("data_source", &self.options.data_source)
         .field("pooled", &matches!(self.route, Route::Pooled(_)))
         .finish()
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::config::PoolConfig;
   use crate::driver::Driver;
   use crate::mock::MockDriver;

   fn factory() -> (Arc<ConnectionFactory>, Arc<MockDriver>) {
      let driver = Arc::new(MockDriver::new());
      let config = PoolConfig {
         background_pruning: false,
         ..Default::default()
      };
      let factory = ConnectionFactory::new(Arc::clone(&driver) as Arc<dyn Driver>, config);
      (factory, driver)
   }

   #[test]
   fn test_options_reflect_the_connection_string() {
      let (factory, _) = factory();
      let conn = factory
         .get_connection("Data Source=x.db;Default Timeout=5")
         .unwrap();
      assert_eq!(conn.options().data_source, "x.db");
      assert_eq!(conn.options().default_timeout, 5);
   }

   #[test]
   fn test_execute_after_internal_dispose_reports_closed() {
      let (factory, _) = factory();
      let mut conn = factory.get_connection("Data Source=x.db").unwrap();

      // Simulate the pool tearing the physical connection down under us
      conn.physical().unwrap().dispose();
      assert!(matches!(
         conn.execute("SELECT 1"),
         Err(Error::ConnectionClosed)
      ));
   }

   #[test]
   fn test_close_is_a_normal_return() {
      let (factory, driver) = factory();
      let conn = factory.get_connection("Data Source=x.db").unwrap();
      conn.close();
      assert_eq!(driver.dropped(), 0, "pooled close must not dispose");

      factory.get_connection("Data Source=x.db").unwrap().close();
      assert_eq!(driver.opened(), 1, "closed connection must be reused");
   }
}
