//! Connection-string parsing into immutable connection options

use crate::error::Error;
use crate::Result;
use serde::{Deserialize, Serialize};

/// How the database file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
   /// Open for reading and writing, creating the file if missing (default)
   ReadWriteCreate,
   /// Open for reading and writing; fail if the file does not exist
   ReadWrite,
   /// Open read-only; fail if the file does not exist
   ReadOnly,
   /// Open an in-memory database
   Memory,
}

/// Shared-cache mode for the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMode {
   /// Use the process default (private unless compiled otherwise)
   Default,
   /// `SQLITE_OPEN_PRIVATECACHE`
   Private,
   /// `SQLITE_OPEN_SHAREDCACHE`
   Shared,
}

/// Immutable configuration parsed from a connection string
///
/// Parsed once per distinct connection-string text; the raw text (not a
/// canonical form) keys the factory's pool-group registry.
///
/// # Examples
///
/// ```
/// use sqlite_conn_pool::{ConnectionOptions, OpenMode};
///
/// let options = ConnectionOptions::parse("Data Source=app.db;Mode=ReadOnly").unwrap();
/// assert_eq!(options.data_source, "app.db");
/// assert_eq!(options.mode, OpenMode::ReadOnly);
/// assert!(options.pooling);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOptions {
   /// Path to the database file, `:memory:`, or a `file:` URI
   pub data_source: String,
   /// Open mode
   pub mode: OpenMode,
   /// Cache mode
   pub cache: CacheMode,
   /// Whether physical connections are pooled for reuse
   pub pooling: bool,
   /// Per-call retry budget in whole seconds for busy databases; zero retries
   /// forever
   pub default_timeout: u32,
   /// Encryption key, applied with `PRAGMA key` at connection setup; empty
   /// means none
   pub password: String,
   /// `PRAGMA foreign_keys` setting applied at setup, if configured
   pub foreign_keys: Option<bool>,
   /// `PRAGMA recursive_triggers` applied at setup
   pub recursive_triggers: bool,
}

impl Default for ConnectionOptions {
   fn default() -> Self {
      Self {
         data_source: String::new(),
         mode: OpenMode::ReadWriteCreate,
         cache: CacheMode::Default,
         pooling: true,
         default_timeout: 30,
         password: String::new(),
         foreign_keys: None,
         recursive_triggers: false,
      }
   }
}

impl ConnectionOptions {
   /// Parse a semicolon-separated `key=value` connection string.
   ///
   /// Keys are case-insensitive and the documented aliases are accepted
   /// (`Data Source` / `DataSource` / `Filename` / `Uri`; `Default Timeout` /
   /// `Command Timeout`). Values may be single- or double-quoted. Unknown
   /// keys are rejected rather than ignored.
   pub fn parse(connection_string: &str) -> Result<Self> {
      let mut options = Self::default();

      for pair in split_pairs(connection_string) {
         let pair = pair.trim();
         if pair.is_empty() {
            continue;
         }

         let Some((key, value)) = pair.split_once('=') else {
            return Err(Error::InvalidConnectionString(format!(
               "expected 'key=value', got '{pair}'"
            )));
         };
         let key = normalize_key(key);
         let value = unquote(value.trim());

         match key.as_str() {
            "data source" | "datasource" | "filename" | "uri" => {
               options.data_source = value.to_string();
            }
            "mode" => {
               options.mode = parse_mode(value)?;
            }
            "cache" => {
               options.cache = parse_cache(value)?;
            }
            "pooling" => {
               options.pooling = parse_bool(&key, value)?;
            }
            "default timeout" | "command timeout" => {
               options.default_timeout = value.parse().map_err(|_| {
                  Error::InvalidConnectionString(format!(
                     "'{value}' is not a valid timeout in seconds"
                  ))
               })?;
            }
            "password" => {
               options.password = value.to_string();
            }
            "foreign keys" => {
               options.foreign_keys = Some(parse_bool(&key, value)?);
            }
            "recursive triggers" => {
               options.recursive_triggers = parse_bool(&key, value)?;
            }
            _ => return Err(Error::UnknownKeyword(key)),
         }
      }

      Ok(options)
   }

   /// Whether the data source names the transient in-memory database
   pub fn is_memory_data_source(&self) -> bool {
      self.data_source.eq_ignore_ascii_case(":memory:")
   }

   /// Whether connections for these options are exempt from pooling.
   ///
   /// In-memory databases vanish on close so there is nothing to reuse; an
   /// empty data source cannot open at all; and `Pooling=False` opts out
   /// explicitly.
   pub fn is_non_pooled(&self) -> bool {
      self.data_source.is_empty()
         || self.mode == OpenMode::Memory
         || self.is_memory_data_source()
         || !self.pooling
   }
}

/// Split on semicolons that are outside quoted values
fn split_pairs(s: &str) -> Vec<&str> {
   let mut pairs = Vec::new();
   let mut start = 0;
   let mut quote: Option<char> = None;

   for (i, c) in s.char_indices() {
      match (quote, c) {
         (None, '\'' | '"') => quote = Some(c),
         (Some(q), c) if c == q => quote = None,
         (None, ';') => {
            pairs.push(&s[start..i]);
            start = i + 1;
         }
         _ => {}
      }
   }
   pairs.push(&s[start..]);
   pairs
}

/// Lowercase and collapse interior runs of whitespace to a single space
fn normalize_key(key: &str) -> String {
   key.trim()
      .split_whitespace()
      .collect::<Vec<_>>()
      .join(" ")
      .to_ascii_lowercase()
}

fn unquote(value: &str) -> &str {
   let bytes = value.as_bytes();
   if bytes.len() >= 2 && (bytes[0] == b'\'' || bytes[0] == b'"') && bytes[bytes.len() - 1] == bytes[0]
   {
      &value[1..value.len() - 1]
   } else {
      value
   }
}

fn parse_mode(value: &str) -> Result<OpenMode> {
   match value.to_ascii_lowercase().as_str() {
      "readwritecreate" => Ok(OpenMode::ReadWriteCreate),
      "readwrite" => Ok(OpenMode::ReadWrite),
      "readonly" => Ok(OpenMode::ReadOnly),
      "memory" => Ok(OpenMode::Memory),
      _ => Err(Error::InvalidConnectionString(format!(
         "'{value}' is not a valid Mode"
      ))),
   }
}

fn parse_cache(value: &str) -> Result<CacheMode> {
   match value.to_ascii_lowercase().as_str() {
      "default" => Ok(CacheMode::Default),
      "private" => Ok(CacheMode::Private),
      "shared" => Ok(CacheMode::Shared),
      _ => Err(Error::InvalidConnectionString(format!(
         "'{value}' is not a valid Cache mode"
      ))),
   }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
   match value.to_ascii_lowercase().as_str() {
      "true" | "yes" | "on" | "1" => Ok(true),
      "false" | "no" | "off" | "0" => Ok(false),
      _ => Err(Error::InvalidConnectionString(format!(
         "'{value}' is not a valid boolean for '{key}'"
      ))),
   }
}
