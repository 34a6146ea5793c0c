//! Prepared statement lifecycle: bind, step, reset, finalize

use crate::error::Error;
use crate::retry::retry_while_busy;
use crate::value::Value;
use crate::Result;
use libsqlite3_sys as ffi;
use std::marker::PhantomData;
use std::os::raw::{c_char, c_int, c_void};

/// Outcome of a successful step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
   /// A row is available for column reads
   Row,
   /// The statement ran to completion
   Done,
}

/// A prepared statement, finalized on drop
///
/// Borrows its connection so the statement can never outlive the handle it
/// was prepared on.
pub struct NativeStatement<'conn> {
   stmt: *mut ffi::sqlite3_stmt,
   db: *mut ffi::sqlite3,
   _conn: PhantomData<&'conn super::NativeConnection>,
}

impl<'conn> NativeStatement<'conn> {
   /// # Safety
   ///
   /// `stmt` must be a statement prepared on `db`, and both must remain valid
   /// for the lifetime of the returned value (guaranteed by the borrow).
   pub(crate) unsafe fn from_raw(stmt: *mut ffi::sqlite3_stmt, db: *mut ffi::sqlite3) -> Self {
      Self {
         stmt,
         db,
         _conn: PhantomData,
      }
   }

   /// Advance the statement, retrying while the database reports lock
   /// contention.
   ///
   /// A busy step is reset before each retry so it re-runs from the top;
   /// SQLite requires this for steps that fail after having already returned
   /// rows.
   pub fn step(&mut self, timeout_secs: u32) -> Result<StepOutcome> {
      let stmt = self.stmt;
      let rc = retry_while_busy(
         timeout_secs,
         || unsafe {
            ffi::sqlite3_reset(stmt);
         },
         || unsafe { ffi::sqlite3_step(stmt) },
      );

      match rc {
         ffi::SQLITE_ROW => Ok(StepOutcome::Row),
         ffi::SQLITE_DONE => Ok(StepOutcome::Done),
         _ => Err(unsafe { Error::from_handle(self.db) }),
      }
   }

   /// Reset the statement so it can be stepped again from the top.
   ///
   /// Bindings are retained across a reset.
   pub fn reset(&mut self) -> Result<()> {
      let rc = unsafe { ffi::sqlite3_reset(self.stmt) };
      if rc == ffi::SQLITE_OK {
         Ok(())
      } else {
         Err(unsafe { Error::from_handle(self.db) })
      }
   }

   /// Bind `value` to the 1-based parameter `index`
   pub fn bind(&mut self, index: i32, value: &Value) -> Result<()> {
      let stmt = self.stmt;
      let rc = match value {
         Value::Null => unsafe { ffi::sqlite3_bind_null(stmt, index) },
         Value::Integer(v) => unsafe { ffi::sqlite3_bind_int64(stmt, index, *v) },
         Value::Real(v) => unsafe { ffi::sqlite3_bind_double(stmt, index, *v) },
         Value::Text(v) => unsafe {
            ffi::sqlite3_bind_text(
               stmt,
               index,
               v.as_ptr() as *const c_char,
               v.len() as c_int,
               ffi::SQLITE_TRANSIENT(),
            )
         },
         Value::Blob(v) => unsafe {
            ffi::sqlite3_bind_blob(
               stmt,
               index,
               v.as_ptr() as *const c_void,
               v.len() as c_int,
               ffi::SQLITE_TRANSIENT(),
            )
         },
      };

      if rc == ffi::SQLITE_OK {
         Ok(())
      } else {
         Err(unsafe { Error::from_handle(self.db) })
      }
   }

   /// Number of bindable parameters in this statement
   pub fn parameter_count(&self) -> i32 {
      unsafe { ffi::sqlite3_bind_parameter_count(self.stmt) }
   }

   /// Number of columns in the result set
   pub fn column_count(&self) -> i32 {
      unsafe { ffi::sqlite3_column_count(self.stmt) }
   }

   /// Read the 0-based column `index` of the current row.
   ///
   /// Only meaningful after [`step`](Self::step) returned [`StepOutcome::Row`].
   pub fn column_value(&self, index: i32) -> Value {
      let stmt = self.stmt;
      unsafe {
         match ffi::sqlite3_column_type(stmt, index) {
            ffi::SQLITE_INTEGER => Value::Integer(ffi::sqlite3_column_int64(stmt, index)),
            ffi::SQLITE_FLOAT => Value::Real(ffi::sqlite3_column_double(stmt, index)),
            ffi::SQLITE_TEXT => {
               let len = ffi::sqlite3_column_bytes(stmt, index) as usize;
               let ptr = ffi::sqlite3_column_text(stmt, index);
               let bytes = if ptr.is_null() {
                  &[][..]
               } else {
                  std::slice::from_raw_parts(ptr, len)
               };
               Value::Text(String::from_utf8_lossy(bytes).into_owned())
            }
            ffi::SQLITE_BLOB => {
               let len = ffi::sqlite3_column_bytes(stmt, index) as usize;
               let ptr = ffi::sqlite3_column_blob(stmt, index);
               let bytes = if ptr.is_null() {
                  &[][..]
               } else {
                  std::slice::from_raw_parts(ptr as *const u8, len)
               };
               Value::Blob(bytes.to_vec())
            }
            _ => Value::Null,
         }
      }
   }
}

impl Drop for NativeStatement<'_> {
   fn drop(&mut self) {
      // Finalize never fails in a way that matters here; any pending error
      // was already surfaced by the last step.
      unsafe { ffi::sqlite3_finalize(self.stmt) };
   }
}

impl std::fmt::Debug for NativeStatement<'_> {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("NativeStatement")
         .field("stmt", &self.stmt)
         .finish()
   }
}
