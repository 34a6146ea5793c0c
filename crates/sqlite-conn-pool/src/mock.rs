//! Test double for the driver traits: counts opens and disposals without
//! touching the native library

use crate::driver::{
   AggregateFinalCallback, AggregateStepCallback, CollationCallback, Driver, DriverConnection,
   ScalarCallback,
};
use crate::options::ConnectionOptions;
use crate::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Driver that fabricates connections and records lifecycle counts
#[derive(Debug, Default)]
pub(crate) struct MockDriver {
   opened: AtomicUsize,
   dropped: Arc<AtomicUsize>,
}

impl MockDriver {
   pub(crate) fn new() -> Self {
      Self::default()
   }

   /// Total connections this driver has opened
   pub(crate) fn opened(&self) -> usize {
      self.opened.load(Ordering::SeqCst)
   }

   /// Total mock connections that have been dropped (i.e. disposed)
   pub(crate) fn dropped(&self) -> usize {
      self.dropped.load(Ordering::SeqCst)
   }
}

impl Driver for MockDriver {
   fn open(&self, _options: &ConnectionOptions) -> Result<Box<dyn DriverConnection>> {
      self.opened.fetch_add(1, Ordering::SeqCst);
      Ok(Box::new(MockConnection {
         dropped: Arc::clone(&self.dropped),
         registrations: 0,
      }))
   }
}

struct MockConnection {
   dropped: Arc<AtomicUsize>,
   registrations: usize,
}

impl DriverConnection for MockConnection {
   fn execute(&mut self, _sql: &str, _timeout_secs: u32) -> Result<u64> {
      Ok(0)
   }

   fn query_scalar_i64(&mut self, _sql: &str, _timeout_secs: u32) -> Result<Option<i64>> {
      Ok(Some(0))
   }

   fn create_scalar_function(
      &mut self,
      _name: &str,
      _n_args: i32,
      _f: ScalarCallback,
   ) -> Result<()> {
      self.registrations += 1;
      Ok(())
   }

   fn create_collation(&mut self, _name: &str, _f: CollationCallback) -> Result<()> {
      self.registrations += 1;
      Ok(())
   }

   fn create_aggregate(
      &mut self,
      _name: &str,
      _n_args: i32,
      _step: AggregateStepCallback,
      _finalize: AggregateFinalCallback,
   ) -> Result<()> {
      self.registrations += 1;
      Ok(())
   }

   fn clear_registrations(&mut self) -> Result<()> {
      self.registrations = 0;
      Ok(())
   }

   fn enable_load_extension(&mut self, _enabled: bool) -> Result<()> {
      Ok(())
   }
}

impl Drop for MockConnection {
   fn drop(&mut self) {
      self.dropped.fetch_add(1, Ordering::SeqCst);
   }
}
