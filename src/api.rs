//! The four lifecycle calls with sentinel results: `None` or `false` for a missing handle or a
//! call that could not be carried out. Failures are logged, never raised.
//!
//! ```
//! use fibrous::api;
//! use std::ptr;
//!
//! fn noop(_: &fibrous::Fiber) {}
//!
//! // a minor fiber needs a primary
//! assert!(api::create(None, 0, Some(noop), ptr::null_mut()).is_none());
//! assert!(!api::switch(None));
//! assert!(!api::is_current(None));
//! assert!(!api::delete(None));
//! ```
use crate::error::FiberError;
use crate::fiber::{Fiber, FiberProc, OwnedFiber};
use log::warn;

/// Creates a primary fiber (`primary` and `proc_` both `None`) or a minor fiber (both `Some`).
///
/// `stack` is ignored for a primary fiber; for a minor fiber zero means the default size.
pub fn create(
  primary: Option<&Fiber>,
  stack: usize,
  proc_: Option<FiberProc>,
  userdata: *mut (),
) -> Option<OwnedFiber> {
  let created = match (primary, proc_) {
    (None, None) => Fiber::new_primary(userdata),
    (Some(primary), Some(proc_)) => Fiber::new_minor(primary, stack, proc_, userdata),
    _ => Err(FiberError::Mismatched),
  };
  created.map_err(|err| warn!("fiber not created: {}", err)).ok()
}

/// Deletes a fiber. Minor fibers go before their primary.
pub fn delete(fb: Option<OwnedFiber>) -> bool {
  match fb {
    Some(fb) => {
      drop(fb);
      true
    }
    None => false,
  }
}

/// Switches to `fb`, returning once control comes back.
pub fn switch(fb: Option<&Fiber>) -> bool {
  match fb {
    Some(fb) => fb.switch().map_err(|err| warn!("switch to {:p} refused: {}", fb, err)).is_ok(),
    None => false,
  }
}

pub fn is_current(fb: Option<&Fiber>) -> bool {
  fb.map_or(false, Fiber::is_current)
}
