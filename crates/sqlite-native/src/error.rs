//! Error types for sqlite-native

use libsqlite3_sys as ffi;
use std::ffi::CStr;
use thiserror::Error;

/// Errors that may occur when driving the SQLite C API
#[derive(Error, Debug)]
pub enum Error {
   /// A native call returned a non-success result code. Carries the extended
   /// result code and the message text SQLite reported for it.
   #[error("SQLite error {code}: {message}")]
   Sqlite {
      /// Extended native result code (e.g. 5 for `SQLITE_BUSY`, 262 for
      /// `SQLITE_LOCKED_SHAREDCACHE`)
      code: i32,
      /// Human-readable message from `sqlite3_errmsg` / `sqlite3_errstr`
      message: String,
   },

   /// A path or identifier contained an interior NUL byte and cannot be
   /// passed across the C boundary
   #[error("interior NUL byte in string passed to SQLite: {0}")]
   Nul(#[from] std::ffi::NulError),
}

impl Error {
   /// Build an error from a bare result code, without a handle to ask for
   /// message text. Used when open itself fails to produce a handle.
   pub(crate) fn from_code(code: i32) -> Self {
      let message = unsafe {
         let ptr = ffi::sqlite3_errstr(code);
         if ptr.is_null() {
            String::from("unknown error")
         } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
         }
      };
      Error::Sqlite { code, message }
   }

   /// Build an error from the handle's current error state.
   ///
   /// # Safety
   ///
   /// `db` must be a valid, open `sqlite3*` handle.
   pub(crate) unsafe fn from_handle(db: *mut ffi::sqlite3) -> Self {
      let code = unsafe { ffi::sqlite3_extended_errcode(db) };
      let message = unsafe {
         let ptr = ffi::sqlite3_errmsg(db);
         if ptr.is_null() {
            String::from("unknown error")
         } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
         }
      };
      Error::Sqlite { code, message }
   }

   /// The native result code carried by this error, if any
   pub fn code(&self) -> Option<i32> {
      match self {
         Error::Sqlite { code, .. } => Some(*code),
         Error::Nul(_) => None,
      }
   }
}
