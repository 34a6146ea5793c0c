//! Database handle ownership: open, close, prepare, execute

use crate::code::is_success;
use crate::error::Error;
use crate::retry::retry_while_busy;
use crate::statement::{NativeStatement, StepOutcome};
use crate::Result;
use libsqlite3_sys as ffi;
use std::ffi::CString;
use std::os::raw::{c_char, c_int};
use std::ptr;
use tracing::warn;

/// The subset of `SQLITE_OPEN_*` flags this crate passes to `sqlite3_open_v2`
///
/// Flags are combined with the builder methods; `read_write().create()` is the
/// conventional "open or create" combination.
///
/// # Examples
///
/// ```
/// use sqlite_native::OpenFlags;
///
/// let flags = OpenFlags::new().read_write().create();
/// let memory = OpenFlags::new().read_write().create().memory();
/// assert_ne!(flags, memory);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenFlags {
   bits: c_int,
}

impl OpenFlags {
   /// Empty flag set. `sqlite3_open_v2` requires at least one access-mode
   /// flag, so combine with `read_only()` or `read_write()`.
   pub fn new() -> Self {
      Self::default()
   }

   /// `SQLITE_OPEN_READONLY`
   pub fn read_only(self) -> Self {
      self.with(ffi::SQLITE_OPEN_READONLY)
   }

   /// `SQLITE_OPEN_READWRITE`
   pub fn read_write(self) -> Self {
      self.with(ffi::SQLITE_OPEN_READWRITE)
   }

   /// `SQLITE_OPEN_CREATE`
   pub fn create(self) -> Self {
      self.with(ffi::SQLITE_OPEN_CREATE)
   }

   /// `SQLITE_OPEN_MEMORY` - the database lives in memory regardless of path
   pub fn memory(self) -> Self {
      self.with(ffi::SQLITE_OPEN_MEMORY)
   }

   /// `SQLITE_OPEN_URI` - interpret the path as a `file:` URI
   pub fn uri(self) -> Self {
      self.with(ffi::SQLITE_OPEN_URI)
   }

   /// `SQLITE_OPEN_SHAREDCACHE`
   pub fn shared_cache(self) -> Self {
      self.with(ffi::SQLITE_OPEN_SHAREDCACHE)
   }

   /// `SQLITE_OPEN_PRIVATECACHE`
   pub fn private_cache(self) -> Self {
      self.with(ffi::SQLITE_OPEN_PRIVATECACHE)
   }

   fn with(mut self, flag: c_int) -> Self {
      self.bits |= flag;
      self
   }

   pub(crate) fn bits(self) -> c_int {
      self.bits
   }
}

/// An open database handle, owned exclusively for the lifetime of this value
///
/// Closing happens on drop. The handle is `Send` (ownership may move between
/// threads) but not `Sync`; concurrent access must be serialized by the caller.
pub struct NativeConnection {
   db: *mut ffi::sqlite3,
}

// SAFETY: the raw handle is owned exclusively by this value and SQLite handles
// are safe to use from any single thread at a time. `Sync` is deliberately not
// implemented.
unsafe impl Send for NativeConnection {}

impl NativeConnection {
   /// Open a database at `path` with the given flags.
   ///
   /// The path is passed through verbatim, so `:memory:` and (with the `uri`
   /// flag) `file:` URIs work as SQLite documents them. Extended result codes
   /// are enabled on the returned handle.
   pub fn open(path: &str, flags: OpenFlags) -> Result<Self> {
      let c_path = CString::new(path)?;
      let mut db: *mut ffi::sqlite3 = ptr::null_mut();

      let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags.bits(), ptr::null()) };
      if rc != ffi::SQLITE_OK {
         // Even on failure SQLite usually allocates a handle so the error
         // message can be read; it must still be closed.
         let err = if db.is_null() {
            Error::from_code(rc)
         } else {
            let err = unsafe { Error::from_handle(db) };
            unsafe { ffi::sqlite3_close(db) };
            err
         };
         return Err(err);
      }

      unsafe { ffi::sqlite3_extended_result_codes(db, 1) };
      Ok(Self { db })
   }

   /// Prepare the first statement in `sql`, retrying while the database
   /// reports lock contention.
   ///
   /// Returns `None` when `sql` contains no statement (whitespace or comments
   /// only). Trailing statements after the first are ignored; use
   /// [`execute`](Self::execute) to run a whole batch.
   pub fn prepare<'conn>(
      &'conn self,
      sql: &str,
      timeout_secs: u32,
   ) -> Result<Option<NativeStatement<'conn>>> {
      let (stmt, _tail) = self.prepare_tail(sql, timeout_secs)?;
      Ok(stmt)
   }

   /// Execute every statement in `sql`, discarding any rows, and return the
   /// number of rows changed by the last statement.
   pub fn execute(&self, sql: &str, timeout_secs: u32) -> Result<u64> {
      let mut remaining = sql;

      while !remaining.trim().is_empty() {
         let (stmt, tail) = self.prepare_tail(remaining, timeout_secs)?;
         remaining = tail;

         let Some(mut stmt) = stmt else {
            continue;
         };
         while stmt.step(timeout_secs)? == StepOutcome::Row {}
      }

      Ok(self.changes())
   }

   /// Execute `sql` and return the first column of the first row as an
   /// integer, or `None` if the query produced no rows.
   ///
   /// This is the shape every internal setup query needs (pragma reads,
   /// password verification), so it gets a dedicated helper.
   pub fn query_scalar_i64(&self, sql: &str, timeout_secs: u32) -> Result<Option<i64>> {
      let Some(mut stmt) = self.prepare(sql, timeout_secs)? else {
         return Ok(None);
      };

      match stmt.step(timeout_secs)? {
         StepOutcome::Row => Ok(Some(stmt.column_value(0).as_integer().unwrap_or(0))),
         StepOutcome::Done => Ok(None),
      }
   }

   /// Rows changed by the most recent INSERT/UPDATE/DELETE on this handle
   pub fn changes(&self) -> u64 {
      let n = unsafe { ffi::sqlite3_changes(self.db) };
      n.max(0) as u64
   }

   /// Allow or forbid `load_extension()` on this handle.
   ///
   /// The pool disables extension loading whenever a connection is returned,
   /// so a reused connection never inherits the previous owner's setting.
   pub fn enable_load_extension(&self, enabled: bool) -> Result<()> {
      let rc = unsafe { ffi::sqlite3_enable_load_extension(self.db, c_int::from(enabled)) };
      self.check(rc)
   }

   fn prepare_tail<'conn, 'sql>(
      &'conn self,
      sql: &'sql str,
      timeout_secs: u32,
   ) -> Result<(Option<NativeStatement<'conn>>, &'sql str)> {
      let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
      let mut tail: *const c_char = ptr::null();
      let ptr = sql.as_ptr() as *const c_char;
      let db = self.db;

      // Preparation itself can report SQLITE_LOCKED under shared cache while
      // another connection holds the schema lock.
      let rc = retry_while_busy(timeout_secs, || {}, || unsafe {
         ffi::sqlite3_prepare_v2(db, ptr, sql.len() as c_int, &mut stmt, &mut tail)
      });
      if rc != ffi::SQLITE_OK {
         return Err(unsafe { Error::from_handle(db) });
      }

      let consumed = if tail.is_null() {
         sql.len()
      } else {
         (tail as usize).saturating_sub(ptr as usize).min(sql.len())
      };
      let rest = &sql[consumed..];

      if stmt.is_null() {
         // Whitespace or comments only
         return Ok((None, rest));
      }
      Ok((Some(unsafe { NativeStatement::from_raw(stmt, db) }), rest))
   }

   pub(crate) fn handle(&self) -> *mut ffi::sqlite3 {
      self.db
   }

   pub(crate) fn last_error(&self) -> Error {
      unsafe { Error::from_handle(self.db) }
   }

   pub(crate) fn check(&self, rc: c_int) -> Result<()> {
      if is_success(rc) {
         Ok(())
      } else {
         Err(self.last_error())
      }
   }
}

impl Drop for NativeConnection {
   fn drop(&mut self) {
      // sqlite3_close_v2 defers destruction if statements are somehow still
      // outstanding instead of returning SQLITE_BUSY and leaking the handle.
      let rc = unsafe { ffi::sqlite3_close_v2(self.db) };
      if rc != ffi::SQLITE_OK {
         warn!(code = rc, "failed to close SQLite handle");
      }
   }
}

impl std::fmt::Debug for NativeConnection {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("NativeConnection")
         .field("db", &self.db)
         .finish()
   }
}
