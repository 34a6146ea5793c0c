//! # sqlite-native
//!
//! A thin safe wrapper over the SQLite C API, exposing exactly the capability
//! set the connection-pooling layer consumes: open/close a database handle,
//! prepare/step/bind/reset statements, register and remove user-defined scalar
//! functions and collations, and toggle extension loading.
//!
//! ## Core Types
//!
//! - **[`NativeConnection`]**: owns one `sqlite3*` handle for its lifetime
//! - **[`NativeStatement`]**: owns one `sqlite3_stmt*`, borrowed from its connection
//! - **[`Value`]**: dynamically-typed SQLite value for binding and column reads
//! - **[`OpenFlags`]**: the subset of `SQLITE_OPEN_*` flags used here
//! - **[`Error`]**: native error code plus message text
//!
//! ## Busy handling
//!
//! SQLite reports transient lock contention as `SQLITE_BUSY` / `SQLITE_LOCKED`.
//! Every prepare and step in this crate runs through [`retry::retry_while_busy`],
//! which polls the native call at a fixed interval until it succeeds, fails with
//! a non-transient code, or the caller's timeout budget is spent. A timeout of
//! zero seconds retries indefinitely.
//!
//! ## Threading contract
//!
//! A `NativeConnection` is `Send` but not `Sync`: ownership transfers fully to
//! whichever thread currently holds it, and the handle is never accessed from
//! two threads concurrently. Callers that share a connection must serialize
//! access externally (the pooling layer does this with a mutex per connection).

mod code;
mod connection;
mod error;
mod functions;
pub mod retry;
mod statement;
mod value;

pub use code::{is_busy, is_success};
pub use connection::{NativeConnection, OpenFlags};
pub use error::Error;
pub use statement::{NativeStatement, StepOutcome};
pub use value::Value;

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
