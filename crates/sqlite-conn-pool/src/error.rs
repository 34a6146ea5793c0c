//! Error types for sqlite-conn-pool

use thiserror::Error;

/// Errors that may occur when working with sqlite-conn-pool
#[derive(Error, Debug)]
pub enum Error {
   /// Error from the native SQLite layer, carrying the numeric result code
   /// and message text. Transient BUSY/LOCKED codes only surface here after
   /// the retry budget is spent.
   #[error(transparent)]
   Native(#[from] sqlite_native::Error),

   /// The connection string could not be parsed
   #[error("invalid connection string: {0}")]
   InvalidConnectionString(String),

   /// The connection string used a keyword this provider does not recognize
   #[error("connection string keyword '{0}' is not supported")]
   UnknownKeyword(String),

   /// The connection has been closed and cannot be used
   #[error("connection has been closed")]
   ConnectionClosed,

   /// The factory has been shut down and no longer hands out connections
   #[error("connection factory has been shut down")]
   FactoryShutdown,
}
