//! Dynamically-typed SQLite values for parameter binding and column reads

/// A SQLite storage-class value
///
/// SQLite's type system is dynamic: any column can hold any of these five
/// storage classes. This enum is the boundary type for binding parameters,
/// reading columns, and passing arguments to user-defined functions.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
   /// SQL NULL
   Null,
   /// 64-bit signed integer
   Integer(i64),
   /// 64-bit IEEE float
   Real(f64),
   /// UTF-8 text
   Text(String),
   /// Raw bytes
   Blob(Vec<u8>),
}

impl Default for Value {
   fn default() -> Self {
      Value::Null
   }
}

impl From<i64> for Value {
   fn from(v: i64) -> Self {
      Value::Integer(v)
   }
}

impl From<f64> for Value {
   fn from(v: f64) -> Self {
      Value::Real(v)
   }
}

impl From<&str> for Value {
   fn from(v: &str) -> Self {
      Value::Text(v.to_owned())
   }
}

impl From<String> for Value {
   fn from(v: String) -> Self {
      Value::Text(v)
   }
}

impl From<Vec<u8>> for Value {
   fn from(v: Vec<u8>) -> Self {
      Value::Blob(v)
   }
}

impl<T: Into<Value>> From<Option<T>> for Value {
   fn from(v: Option<T>) -> Self {
      match v {
         Some(v) => v.into(),
         None => Value::Null,
      }
   }
}

impl Value {
   /// The integer payload, if this value is an `Integer`
   pub fn as_integer(&self) -> Option<i64> {
      match self {
         Value::Integer(v) => Some(*v),
         _ => None,
      }
   }

   /// The text payload, if this value is `Text`
   pub fn as_text(&self) -> Option<&str> {
      match self {
         Value::Text(v) => Some(v),
         _ => None,
      }
   }
}
