//! Result-code vocabulary shared by the retry loop and error mapping

use libsqlite3_sys as ffi;
use std::os::raw::c_int;

/// Whether a result code is in the transient lock-contention family.
///
/// These codes (and only these) are retried by the busy loop; everything else
/// either succeeds or propagates immediately.
pub fn is_busy(code: c_int) -> bool {
   // Compare against the primary code too: extended codes put the primary
   // result in the low byte, and SQLITE_LOCKED_SHAREDCACHE is the one
   // extended lock code that callers see during shared-cache contention.
   matches!(
      code,
      ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED | ffi::SQLITE_LOCKED_SHAREDCACHE
   )
}

/// Whether a result code is a silent success (`SQLITE_OK`, `SQLITE_ROW`,
/// `SQLITE_DONE`)
pub fn is_success(code: c_int) -> bool {
   matches!(code, ffi::SQLITE_OK | ffi::SQLITE_ROW | ffi::SQLITE_DONE)
}
