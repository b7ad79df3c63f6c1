//! Raw stack switching: start a fresh stack at an entry function, then trade control between
//! paused stacks. A paused stack is just its stack pointer; everything needed to resume it was
//! spilled onto the stack itself.
mod arch;
pub use arch::*;

/// Entry point of a freshly linked stack.
///
/// Receives the paused stack of whoever linked it and the word passed to `link_detached`. It must
/// never return.
pub type InitFn = unsafe extern "C" fn(*mut usize, usize);

/// What a `switch` call comes back with.
#[repr(C)]
pub struct Switch {
  /// The paused stack of whoever switched to us.
  pub stack: *mut usize,
  pub arg: usize,
}
