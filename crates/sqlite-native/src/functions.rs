//! User-defined scalar functions and collations
//!
//! Callbacks are boxed and handed to SQLite as application data; the
//! `xDestroy` destructor frees them when the registration is removed or
//! overwritten, so removal through [`NativeConnection::remove_function`] /
//! [`NativeConnection::remove_collation`] does not leak.

use crate::connection::NativeConnection;
use crate::value::Value;
use crate::Result;
use libsqlite3_sys as ffi;
use std::cmp::Ordering;
use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;

type ScalarFn = dyn Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync;
type CollationFn = dyn Fn(&str, &str) -> Ordering + Send + Sync;

/// Type-erased aggregate: the accumulator travels as a raw pointer minted by
/// `init` and consumed exactly once by `finish`
struct AggregateDef {
   init: Box<dyn Fn() -> *mut c_void + Send + Sync>,
   step: Box<dyn Fn(*mut c_void, &[Value]) -> std::result::Result<(), String> + Send + Sync>,
   finish: Box<dyn Fn(*mut c_void) -> std::result::Result<Value, String> + Send + Sync>,
}

impl NativeConnection {
   /// Register a scalar SQL function callable as `name(...)`.
   ///
   /// `n_args` of -1 accepts any arity. Re-registering the same name and
   /// arity replaces the previous implementation.
   pub fn create_scalar_function<F>(&self, name: &str, n_args: i32, f: F) -> Result<()>
   where
      F: Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
   {
      let c_name = CString::new(name)?;
      let boxed: Box<Box<ScalarFn>> = Box::new(Box::new(f));

      let rc = unsafe {
         ffi::sqlite3_create_function_v2(
            self.handle(),
            c_name.as_ptr(),
            n_args,
            ffi::SQLITE_UTF8,
            Box::into_raw(boxed) as *mut c_void,
            Some(scalar_trampoline),
            None,
            None,
            Some(drop_scalar),
         )
      };
      self.check(rc)
   }

   /// Remove a previously registered scalar function
   pub fn remove_function(&self, name: &str, n_args: i32) -> Result<()> {
      let c_name = CString::new(name)?;
      let rc = unsafe {
         ffi::sqlite3_create_function_v2(
            self.handle(),
            c_name.as_ptr(),
            n_args,
            ffi::SQLITE_UTF8,
            ptr::null_mut(),
            None,
            None,
            None,
            None,
         )
      };
      self.check(rc)
   }

   /// Register an aggregate SQL function callable as `name(...)` over a
   /// group of rows.
   ///
   /// `step` folds each row's arguments into the accumulator; `finish`
   /// produces the result once the group is exhausted. A group that never
   /// steps (an aggregate over zero rows) finishes from `A::default()`.
   /// Removal goes through [`remove_function`](Self::remove_function) like a
   /// scalar.
   pub fn create_aggregate<A, S, F>(&self, name: &str, n_args: i32, step: S, finish: F) -> Result<()>
   where
      A: Default + Send + 'static,
      S: Fn(&mut A, &[Value]) -> std::result::Result<(), String> + Send + Sync + 'static,
      F: Fn(A) -> std::result::Result<Value, String> + Send + Sync + 'static,
   {
      let c_name = CString::new(name)?;
      let def = Box::new(AggregateDef {
         init: Box::new(|| Box::into_raw(Box::new(A::default())) as *mut c_void),
         step: Box::new(move |acc, args| {
            // SAFETY: every accumulator pointer comes from `init` above
            let acc = unsafe { &mut *(acc as *mut A) };
            step(acc, args)
         }),
         finish: Box::new(move |acc| {
            // SAFETY: takes back the ownership `init` leaked; called once
            let acc = unsafe { Box::from_raw(acc as *mut A) };
            finish(*acc)
         }),
      });

      let rc = unsafe {
         ffi::sqlite3_create_function_v2(
            self.handle(),
            c_name.as_ptr(),
            n_args,
            ffi::SQLITE_UTF8,
            Box::into_raw(def) as *mut c_void,
            None,
            Some(aggregate_step_trampoline),
            Some(aggregate_final_trampoline),
            Some(drop_aggregate),
         )
      };
      self.check(rc)
   }

   /// Register a collation usable as `COLLATE name`.
   ///
   /// Inputs that are not valid UTF-8 are compared after lossy conversion.
   pub fn create_collation<F>(&self, name: &str, f: F) -> Result<()>
   where
      F: Fn(&str, &str) -> Ordering + Send + Sync + 'static,
   {
      let c_name = CString::new(name)?;
      let boxed: Box<Box<CollationFn>> = Box::new(Box::new(f));

      let rc = unsafe {
         ffi::sqlite3_create_collation_v2(
            self.handle(),
            c_name.as_ptr(),
            ffi::SQLITE_UTF8,
            Box::into_raw(boxed) as *mut c_void,
            Some(collation_trampoline),
            Some(drop_collation),
         )
      };
      self.check(rc)
   }

   /// Remove a previously registered collation
   pub fn remove_collation(&self, name: &str) -> Result<()> {
      let c_name = CString::new(name)?;
      let rc = unsafe {
         ffi::sqlite3_create_collation_v2(
            self.handle(),
            c_name.as_ptr(),
            ffi::SQLITE_UTF8,
            ptr::null_mut(),
            None,
            None,
         )
      };
      self.check(rc)
   }
}

unsafe fn value_from_raw(raw: *mut ffi::sqlite3_value) -> Value {
   unsafe {
      match ffi::sqlite3_value_type(raw) {
         ffi::SQLITE_INTEGER => Value::Integer(ffi::sqlite3_value_int64(raw)),
         ffi::SQLITE_FLOAT => Value::Real(ffi::sqlite3_value_double(raw)),
         ffi::SQLITE_TEXT => {
            let len = ffi::sqlite3_value_bytes(raw) as usize;
            let ptr = ffi::sqlite3_value_text(raw);
            let bytes = if ptr.is_null() {
               &[][..]
            } else {
               std::slice::from_raw_parts(ptr, len)
            };
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
         }
         ffi::SQLITE_BLOB => {
            let len = ffi::sqlite3_value_bytes(raw) as usize;
            let ptr = ffi::sqlite3_value_blob(raw);
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

unsafe fn set_result(ctx: *mut ffi::sqlite3_context, value: &Value) {
   unsafe {
      match value {
         Value::Null => ffi::sqlite3_result_null(ctx),
         Value::Integer(v) => ffi::sqlite3_result_int64(ctx, *v),
         Value::Real(v) => ffi::sqlite3_result_double(ctx, *v),
         Value::Text(v) => ffi::sqlite3_result_text(
            ctx,
            v.as_ptr() as *const c_char,
            v.len() as c_int,
            ffi::SQLITE_TRANSIENT(),
         ),
         Value::Blob(v) => ffi::sqlite3_result_blob(
            ctx,
            v.as_ptr() as *const c_void,
            v.len() as c_int,
            ffi::SQLITE_TRANSIENT(),
         ),
      }
   }
}

unsafe extern "C" fn scalar_trampoline(
   ctx: *mut ffi::sqlite3_context,
   argc: c_int,
   argv: *mut *mut ffi::sqlite3_value,
) {
   let f = unsafe { &*(ffi::sqlite3_user_data(ctx) as *mut Box<ScalarFn>) };

   let args: Vec<Value> = (0..argc as usize)
      .map(|i| unsafe { value_from_raw(*argv.add(i)) })
      .collect();

   match f(&args) {
      Ok(value) => unsafe { set_result(ctx, &value) },
      Err(message) => {
         let c_message = CString::new(message).unwrap_or_default();
         unsafe { ffi::sqlite3_result_error(ctx, c_message.as_ptr(), -1) };
      }
   }
}

unsafe extern "C" fn drop_scalar(p: *mut c_void) {
   drop(unsafe { Box::from_raw(p as *mut Box<ScalarFn>) });
}

unsafe extern "C" fn aggregate_step_trampoline(
   ctx: *mut ffi::sqlite3_context,
   argc: c_int,
   argv: *mut *mut ffi::sqlite3_value,
) {
   let def = unsafe { &*(ffi::sqlite3_user_data(ctx) as *mut AggregateDef) };

   // Per-group slot holding the accumulator pointer; SQLite allocates it
   // zeroed on the first step of each group.
   let slot = unsafe {
      ffi::sqlite3_aggregate_context(ctx, size_of::<*mut c_void>() as c_int)
   } as *mut *mut c_void;
   if slot.is_null() {
      unsafe { ffi::sqlite3_result_error_nomem(ctx) };
      return;
   }
   if unsafe { *slot }.is_null() {
      unsafe { *slot = (def.init)() };
   }

   let args: Vec<Value> = (0..argc as usize)
      .map(|i| unsafe { value_from_raw(*argv.add(i)) })
      .collect();

   if let Err(message) = (def.step)(unsafe { *slot }, &args) {
      let c_message = CString::new(message).unwrap_or_default();
      unsafe { ffi::sqlite3_result_error(ctx, c_message.as_ptr(), -1) };
   }
}

unsafe extern "C" fn aggregate_final_trampoline(ctx: *mut ffi::sqlite3_context) {
   let def = unsafe { &*(ffi::sqlite3_user_data(ctx) as *mut AggregateDef) };

   // Zero-size lookup: NULL when no row ever stepped this group, in which
   // case the aggregate finishes from a fresh default accumulator.
   let slot = unsafe { ffi::sqlite3_aggregate_context(ctx, 0) } as *mut *mut c_void;
   let acc = if slot.is_null() || unsafe { *slot }.is_null() {
      (def.init)()
   } else {
      let acc = unsafe { *slot };
      unsafe { *slot = ptr::null_mut() };
      acc
   };

   match (def.finish)(acc) {
      Ok(value) => unsafe { set_result(ctx, &value) },
      Err(message) => {
         let c_message = CString::new(message).unwrap_or_default();
         unsafe { ffi::sqlite3_result_error(ctx, c_message.as_ptr(), -1) };
      }
   }
}

unsafe extern "C" fn drop_aggregate(p: *mut c_void) {
   drop(unsafe { Box::from_raw(p as *mut AggregateDef) });
}

unsafe extern "C" fn collation_trampoline(
   arg: *mut c_void,
   left_len: c_int,
   left: *const c_void,
   right_len: c_int,
   right: *const c_void,
) -> c_int {
   let f = unsafe { &*(arg as *mut Box<CollationFn>) };

   let left = unsafe { std::slice::from_raw_parts(left as *const u8, left_len as usize) };
   let right = unsafe { std::slice::from_raw_parts(right as *const u8, right_len as usize) };
   let left = String::from_utf8_lossy(left);
   let right = String::from_utf8_lossy(right);

   match f(&left, &right) {
      Ordering::Less => -1,
      Ordering::Equal => 0,
      Ordering::Greater => 1,
   }
}

unsafe extern "C" fn drop_collation(p: *mut c_void) {
   drop(unsafe { Box::from_raw(p as *mut Box<CollationFn>) });
}
