//! The production driver, backed by sqlite-native

use crate::driver::{
   AggregateFinalCallback, AggregateStepCallback, CollationCallback, Driver, DriverConnection,
   ScalarCallback,
};
use crate::options::{CacheMode, ConnectionOptions, OpenMode};
use crate::Result;
use sqlite_native::{NativeConnection, OpenFlags};
use tracing::debug;

/// Opens real SQLite connections according to [`ConnectionOptions`]
#[derive(Debug, Default)]
pub struct NativeDriver;

impl Driver for NativeDriver {
   fn open(&self, options: &ConnectionOptions) -> Result<Box<dyn DriverConnection>> {
      let mut flags = match options.mode {
         OpenMode::ReadWriteCreate => OpenFlags::new().read_write().create(),
         OpenMode::ReadWrite => OpenFlags::new().read_write(),
         OpenMode::ReadOnly => OpenFlags::new().read_only(),
         OpenMode::Memory => OpenFlags::new().read_write().create().memory(),
      };
      flags = match options.cache {
         CacheMode::Default => flags,
         CacheMode::Private => flags.private_cache(),
         CacheMode::Shared => flags.shared_cache(),
      };
      if options.data_source.starts_with("file:") {
         flags = flags.uri();
      }

      let conn = NativeConnection::open(&options.data_source, flags)?;
      let timeout = options.default_timeout;

      if !options.password.is_empty() {
         conn.execute(&format!("PRAGMA key = {};", quote(&options.password)), timeout)?;
         // The key pragma does not touch the file; reading the schema does,
         // so a wrong key (or a non-database file) fails here.
         conn.query_scalar_i64("SELECT COUNT(*) FROM sqlite_master", timeout)?;
      }

      if let Some(enabled) = options.foreign_keys {
         conn.execute(
            &format!("PRAGMA foreign_keys = {};", i32::from(enabled)),
            timeout,
         )?;
      }
      if options.recursive_triggers {
         conn.execute("PRAGMA recursive_triggers = 1;", timeout)?;
      }

      debug!(data_source = %options.data_source, "opened physical connection");
      Ok(Box::new(NativeDriverConnection {
         conn,
         functions: Vec::new(),
         collations: Vec::new(),
      }))
   }
}

/// A native connection plus the registrations made through it, so they can be
/// cleared when the connection goes back to the pool
struct NativeDriverConnection {
   conn: NativeConnection,
   functions: Vec<(String, i32)>,
   collations: Vec<String>,
}

impl DriverConnection for NativeDriverConnection {
   fn execute(&mut self, sql: &str, timeout_secs: u32) -> Result<u64> {
      Ok(self.conn.execute(sql, timeout_secs)?)
   }

   fn query_scalar_i64(&mut self, sql: &str, timeout_secs: u32) -> Result<Option<i64>> {
      Ok(self.conn.query_scalar_i64(sql, timeout_secs)?)
   }

   fn create_scalar_function(&mut self, name: &str, n_args: i32, f: ScalarCallback) -> Result<()> {
      self.conn.create_scalar_function(name, n_args, move |args| f(args))?;
      self.functions.push((name.to_string(), n_args));
      Ok(())
   }

   fn create_collation(&mut self, name: &str, f: CollationCallback) -> Result<()> {
      self.conn.create_collation(name, move |l, r| f(l, r))?;
      self.collations.push(name.to_string());
      Ok(())
   }

   fn create_aggregate(
      &mut self,
      name: &str,
      n_args: i32,
      step: AggregateStepCallback,
      finalize: AggregateFinalCallback,
   ) -> Result<()> {
      self.conn.create_aggregate(
         name,
         n_args,
         move |acc: &mut sqlite_native::Value, args: &[sqlite_native::Value]| step(acc, args),
         move |acc: sqlite_native::Value| finalize(acc),
      )?;
      // Aggregates share the scalar removal path
      self.functions.push((name.to_string(), n_args));
      Ok(())
   }

   fn clear_registrations(&mut self) -> Result<()> {
      for (name, n_args) in self.functions.drain(..) {
         self.conn.remove_function(&name, n_args)?;
      }
      for name in self.collations.drain(..) {
         self.conn.remove_collation(&name)?;
      }
      Ok(())
   }

   fn enable_load_extension(&mut self, enabled: bool) -> Result<()> {
      Ok(self.conn.enable_load_extension(enabled)?)
   }
}

/// Single-quote a string for use in a pragma, doubling embedded quotes
fn quote(s: &str) -> String {
   format!("'{}'", s.replace('\'', "''"))
}
