//! Configuration for the connection factory

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`ConnectionFactory`](crate::ConnectionFactory)
///
/// # Examples
///
/// ```
/// use sqlite_conn_pool::PoolConfig;
///
/// // Use defaults
/// let config = PoolConfig::default();
///
/// // Override just one field
/// let config = PoolConfig {
///     prune_interval_secs: 60,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
   /// Seconds between pruning sweeps
   ///
   /// Each sweep disposes connections that have sat cold for a full interval,
   /// demotes warm connections to cold, and advances idle pool groups toward
   /// eviction. An idle connection therefore lives between one and two
   /// intervals before its native handle is closed.
   ///
   /// Default: 180
   pub prune_interval_secs: u64,

   /// Whether the factory runs its pruning sweep on a background thread
   ///
   /// Disable for deterministic tests and drive sweeps manually with
   /// [`ConnectionFactory::prune_now`](crate::ConnectionFactory::prune_now).
   ///
   /// Default: true
   pub background_pruning: bool,
}

impl Default for PoolConfig {
   fn default() -> Self {
      Self {
         prune_interval_secs: 180,
         background_pruning: true,
      }
   }
}

impl PoolConfig {
   pub(crate) fn prune_interval(&self) -> Duration {
      Duration::from_secs(self.prune_interval_secs.max(1))
   }
}
