//! Physical connection wrapper: one driver connection plus checkout state

use crate::driver::DriverConnection;
use crate::error::Error;
use crate::pool::lock;
use crate::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Token held by the outer [`Connection`](crate::Connection) for as long as it
/// is alive
///
/// The physical connection keeps only a weak reference to it; a checked-out
/// connection whose token no longer upgrades was abandoned without a normal
/// return and is treated as leaked.
#[derive(Debug, Default)]
pub(crate) struct OwnerToken;

/// Checkout bookkeeping, kept apart from the driver handle so pool scans and
/// poisoning never wait behind a statement running on this connection
struct CheckoutState {
   active: bool,
   can_be_pooled: bool,
   disposed: bool,
   owner: Weak<OwnerToken>,
}

/// Owns exactly one driver connection for its lifetime.
///
/// At any instant a physical connection is in exactly one of four states:
/// checked out to a caller, in the warm stack, in the cold stack, or disposed.
///
/// Two locks, never held together: the driver lock serializes native I/O and
/// is held by the checkout owner for the duration of each call; the state
/// lock guards the flags above and is only ever held for field access, so
/// leak scans, poisoning, and checkout misses stay responsive while a query
/// is in flight.
pub(crate) struct PhysicalConnection {
   driver: Mutex<Option<Box<dyn DriverConnection>>>,
   state: Mutex<CheckoutState>,
   id: u64,
}

impl PhysicalConnection {
   pub(crate) fn new(conn: Box<dyn DriverConnection>, can_be_pooled: bool) -> Self {
      Self {
         driver: Mutex::new(Some(conn)),
         state: Mutex::new(CheckoutState {
            active: false,
            can_be_pooled,
            disposed: false,
            owner: Weak::new(),
         }),
         id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
      }
   }

   /// Hand this connection to a caller, binding the back-reference used for
   /// leak detection
   pub(crate) fn activate(&self, owner: &Arc<OwnerToken>) {
      let mut state = lock(&self.state);
      state.active = true;
      state.owner = Arc::downgrade(owner);
   }

   /// Claim the exclusive right to return this connection.
   ///
   /// Only one of the owner's drop and a racing leak sweep can win; the loser
   /// sees `false` and must leave the connection alone.
   pub(crate) fn begin_return(&self) -> bool {
      let mut state = lock(&self.state);
      if !state.active {
         return false;
      }
      state.active = false;
      true
   }

   /// Prepare this connection for re-pooling: clear user registrations and
   /// disable extension loading so the next owner starts clean.
   ///
   /// A failure here poisons the connection instead of surfacing an error;
   /// the pool will dispose it rather than hand out a dirty session.
   pub(crate) fn deactivate(&self) {
      lock(&self.state).owner = Weak::new();

      let reset = {
         let mut driver = lock(&self.driver);
         match driver.as_deref_mut() {
            Some(conn) => conn
               .clear_registrations()
               .and_then(|()| conn.enable_load_extension(false)),
            None => return,
         }
      };
      if let Err(error) = reset {
         debug!(id = self.id, %error, "failed to reset connection session; poisoning");
         lock(&self.state).can_be_pooled = false;
      }
   }

   /// Close the underlying driver connection
   pub(crate) fn dispose(&self) {
      {
         let mut state = lock(&self.state);
         state.active = false;
         state.disposed = true;
      }
      // Dropping the driver box closes the native handle
      *lock(&self.driver) = None;
   }

   pub(crate) fn is_disposed(&self) -> bool {
      lock(&self.state).disposed
   }

   /// Checked out, but the outer handle no longer exists
   pub(crate) fn is_leaked(&self) -> bool {
      let state = lock(&self.state);
      state.active && state.owner.upgrade().is_none()
   }

   pub(crate) fn is_active(&self) -> bool {
      lock(&self.state).active
   }

   pub(crate) fn can_be_pooled(&self) -> bool {
      lock(&self.state).can_be_pooled
   }

   /// Mark this connection as unfit for re-pooling; its eventual return will
   /// dispose it
   pub(crate) fn poison(&self) {
      lock(&self.state).can_be_pooled = false;
   }

   pub(crate) fn id(&self) -> u64 {
      self.id
   }

   /// Run `f` with exclusive access to the driver connection, failing if it
   /// was already disposed.
   ///
   /// The driver lock is held for the duration of the call; every
   /// checkout-state operation stays available to other threads throughout.
   pub(crate) fn with_driver<T>(
      &self,
      f: impl FnOnce(&mut dyn DriverConnection) -> Result<T>,
   ) -> Result<T> {
      let mut driver = lock(&self.driver);
      let conn = driver.as_deref_mut().ok_or(Error::ConnectionClosed)?;
      f(conn)
   }
}

impl std::fmt::Debug for PhysicalConnection {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      let state = lock(&self.state);
      f.debug_struct("PhysicalConnection")
         .field("id", &self.id)
         .field("active", &state.active)
         .field("can_be_pooled", &state.can_be_pooled)
         .field("disposed", &state.disposed)
         .finish()
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::driver::Driver;
   use crate::mock::MockDriver;
   use crate::options::ConnectionOptions;
   use std::time::{Duration, Instant};

   fn physical() -> PhysicalConnection {
      let driver = MockDriver::new();
      let conn = driver.open(&ConnectionOptions::default()).unwrap();
      PhysicalConnection::new(conn, true)
   }

   #[test]
   fn test_leak_detection_via_owner_token() {
      let phys = physical();
      assert!(!phys.is_leaked(), "inactive connections are never leaked");

      let owner = Arc::new(OwnerToken);
      phys.activate(&owner);
      assert!(!phys.is_leaked(), "live owner token means no leak");

      drop(owner);
      assert!(phys.is_leaked(), "active with a dead owner token is a leak");
   }

   #[test]
   fn test_return_claim_is_exclusive() {
      let phys = physical();
      let owner = Arc::new(OwnerToken);
      phys.activate(&owner);

      assert!(phys.begin_return(), "first claimant wins the return");
      assert!(!phys.begin_return(), "second claimant must back off");
      assert!(!phys.is_active());
   }

   #[test]
   fn test_deactivate_clears_owner() {
      let phys = physical();
      let owner = Arc::new(OwnerToken);
      phys.activate(&owner);
      drop(owner);

      assert!(phys.begin_return());
      phys.deactivate();
      assert!(!phys.is_leaked());
   }

   #[test]
   fn test_dispose_detaches_driver() {
      let phys = physical();
      assert!(phys.with_driver(|_| Ok(())).is_ok());

      phys.dispose();
      assert!(phys.is_disposed());
      assert!(matches!(
         phys.with_driver(|_| Ok(())),
         Err(Error::ConnectionClosed)
      ));
   }

   #[test]
   fn test_state_flags_stay_available_during_driver_io() {
      let phys = Arc::new(physical());
      let owner = Arc::new(OwnerToken);
      phys.activate(&owner);

      let io = {
         let phys = Arc::clone(&phys);
         std::thread::spawn(move || {
            phys.with_driver(|_| {
               std::thread::sleep(Duration::from_millis(200));
               Ok(())
            })
         })
      };
      std::thread::sleep(Duration::from_millis(50));

      let start = Instant::now();
      assert!(!phys.is_leaked());
      phys.poison();
      assert!(!phys.can_be_pooled());
      assert!(
         start.elapsed() < Duration::from_millis(100),
         "flag access must not wait for in-flight I/O"
      );
      io.join().unwrap().unwrap();
   }
}
