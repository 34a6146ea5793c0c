//! # sqlite-conn-pool
//!
//! Physical-connection pooling for SQLite with warm/cold aging, pool groups
//! keyed by connection-string text, and opportunistic leak recovery.
//!
//! ## Core Types
//!
//! - **[`Connection`]**: user-facing handle; returns its physical connection
//!   to the pool on drop
//! - **[`ConnectionFactory`]**: process-wide registry mapping connection
//!   strings to pool groups, with a background pruning sweep
//! - **[`ConnectionOptions`]**: immutable parsed connection-string configuration
//! - **[`PoolConfig`]**: factory-level tuning (prune interval, background pruning)
//! - **[`Error`]**: error type for connection and pooling operations
//!
//! ## Architecture
//!
//! - **Pool groups**: one group per distinct connection-string text, created
//!   lazily and exactly once under the factory's lock. The raw text is the
//!   cache key; two strings that differ only in key order or aliasing get
//!   separate groups (a deliberate simplicity tradeoff).
//! - **Two-tier aging**: returned connections go to a warm stack; each prune
//!   tick disposes the cold stack and demotes warm to cold, so an idle
//!   connection survives at least one full prune interval before disposal.
//! - **Non-pooled exemption**: in-memory targets, empty data sources, and
//!   `Pooling=False` strings never pool; every checkout opens a fresh
//!   connection that closes on return.
//! - **RAII return**: dropping a [`Connection`] always routes its physical
//!   connection back to the pool (or disposes it), so there is no leak window
//!   in normal use. A scan-based reclamation pass remains as a diagnostic
//!   fallback for abnormal teardown.
//!
//! ## Usage
//!
//! ```no_run
//! use sqlite_conn_pool::Connection;
//!
//! fn main() -> sqlite_conn_pool::Result<()> {
//!     let mut conn = Connection::open("Data Source=app.db")?;
//!     conn.execute("CREATE TABLE IF NOT EXISTS users (name TEXT)")?;
//!     conn.execute("INSERT INTO users (name) VALUES ('Alice')")?;
//!
//!     // Dropping the connection returns it to the warm stack; the next
//!     // open with the same string reuses the same physical connection.
//!     drop(conn);
//!     let conn = Connection::open("Data Source=app.db")?;
//!     drop(conn);
//!     Ok(())
//! }
//! ```

mod config;
mod connection;
mod driver;
mod error;
mod factory;
mod group;
mod native;
mod options;
mod physical;
mod pool;

#[cfg(test)]
pub(crate) mod mock;

pub use config::PoolConfig;
pub use connection::Connection;
pub use driver::{
   AggregateFinalCallback, AggregateStepCallback, CollationCallback, Driver, DriverConnection,
   ScalarCallback,
};
pub use error::Error;
pub use factory::ConnectionFactory;
pub use native::NativeDriver;
pub use options::{CacheMode, ConnectionOptions, OpenMode};

// Re-export the value type callers bind and read through this crate
pub use sqlite_native::Value;

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
