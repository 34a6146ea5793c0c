//! Capability traits consumed by the pool core
//!
//! The pool never touches the native layer directly; it goes through these
//! traits so its behavior can be tested against a mock that counts opens and
//! simulates contention.

use crate::options::ConnectionOptions;
use crate::Result;
use sqlite_native::Value;
use std::cmp::Ordering;

/// Callback type for user-defined scalar functions
pub type ScalarCallback = Box<dyn Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync>;

/// Callback type for user-defined collations
pub type CollationCallback = Box<dyn Fn(&str, &str) -> Ordering + Send + Sync>;

/// Callback type for the per-row step of a user-defined aggregate. The
/// accumulator starts as [`Value::Null`] for each group.
pub type AggregateStepCallback =
   Box<dyn Fn(&mut Value, &[Value]) -> std::result::Result<(), String> + Send + Sync>;

/// Callback type producing a user-defined aggregate's final result from its
/// accumulator
pub type AggregateFinalCallback =
   Box<dyn Fn(Value) -> std::result::Result<Value, String> + Send + Sync>;

/// Opens physical connections for a set of connection options
pub trait Driver: Send + Sync + 'static {
   /// Open a connection and run its setup (pragmas, password verification)
   fn open(&self, options: &ConnectionOptions) -> Result<Box<dyn DriverConnection>>;
}

/// One open physical connection
///
/// Ownership transfers fully to whichever caller currently holds it; the pool
/// never invokes these methods on a checked-out connection.
pub trait DriverConnection: Send {
   /// Execute every statement in `sql` and return the rows changed by the
   /// last one
   fn execute(&mut self, sql: &str, timeout_secs: u32) -> Result<u64>;

   /// Execute `sql` and return the first column of the first row as an
   /// integer, or `None` for an empty result
   fn query_scalar_i64(&mut self, sql: &str, timeout_secs: u32) -> Result<Option<i64>>;

   /// Register a scalar SQL function on this connection
   fn create_scalar_function(&mut self, name: &str, n_args: i32, f: ScalarCallback) -> Result<()>;

   /// Register a collation on this connection
   fn create_collation(&mut self, name: &str, f: CollationCallback) -> Result<()>;

   /// Register an aggregate SQL function on this connection
   fn create_aggregate(
      &mut self,
      name: &str,
      n_args: i32,
      step: AggregateStepCallback,
      finalize: AggregateFinalCallback,
   ) -> Result<()>;

   /// Remove every function and collation registered through this wrapper.
   ///
   /// Runs when a connection is returned to the pool so the next owner starts
   /// from a clean session.
   fn clear_registrations(&mut self) -> Result<()>;

   /// Allow or forbid extension loading on this connection
   fn enable_load_extension(&mut self, enabled: bool) -> Result<()>;
}
