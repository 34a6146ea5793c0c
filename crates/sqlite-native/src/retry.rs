//! Busy-wait retry loop for native calls that may report transient lock
//! contention
//!
//! Statement preparation, stepping, and the ad hoc queries issued during
//! connection setup all funnel through [`retry_while_busy`]. The loop polls
//! the native operation at a fixed interval rather than installing a busy
//! handler, which keeps behavior uniform across native builds that may not
//! support a true blocking wait callback.

use crate::code::is_busy;
use std::os::raw::c_int;
use std::time::{Duration, Instant};

/// Fixed interval slept between retries while the database reports BUSY or
/// LOCKED
const RETRY_INTERVAL: Duration = Duration::from_millis(150);

/// Retry `op` while it returns a code in the BUSY/LOCKED family, for up to
/// `timeout_secs` seconds of wall-clock time. Zero means retry forever.
///
/// `reset` runs before each retry; stepping uses it to reset the statement so
/// it can be re-stepped from the top. The final result code is returned
/// unchanged: on timeout expiry the caller observes whatever lock status the
/// database last reported, not a distinct timeout error.
pub fn retry_while_busy<R, F>(timeout_secs: u32, reset: R, op: F) -> c_int
where
   R: FnMut(),
   F: FnMut() -> c_int,
{
   let timeout = Duration::from_secs(u64::from(timeout_secs));
   retry_with_interval(timeout, RETRY_INTERVAL, reset, op)
}

/// Same loop with an injectable timeout and poll interval, so tests can run
/// without multi-second sleeps. `Duration::ZERO` timeout means unbounded.
pub fn retry_with_interval<R, F>(
   timeout: Duration,
   interval: Duration,
   mut reset: R,
   mut op: F,
) -> c_int
where
   R: FnMut(),
   F: FnMut() -> c_int,
{
   let start = Instant::now();

   loop {
      let rc = op();
      if !is_busy(rc) {
         return rc;
      }

      // The budget is checked after the call, so a single attempt always runs
      // even with an already-expired timeout.
      if !timeout.is_zero() && start.elapsed() >= timeout {
         return rc;
      }

      std::thread::sleep(interval);
      reset();
   }
}
