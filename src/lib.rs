//! Fibers: independently stacked execution contexts that are switched to and from explicitly.
//!
//! There is no scheduler and no preemption. A thread first turns its own running context into a
//! *primary* fiber, then creates *minor* fibers from it, each with its own stack, an entry
//! callback and an opaque payload. Control only ever moves when some fiber calls
//! [`Fiber::switch`].
//!
//! ```
//! use fibrous::Fiber;
//! use std::cell::Cell;
//! use std::ptr;
//!
//! fn ping(fiber: &Fiber) {
//!   let hits = unsafe { &*(fiber.userdata() as *const Cell<u32>) };
//!   loop {
//!     hits.set(hits.get() + 1);
//!     fiber.primary().switch().unwrap();
//!   }
//! }
//!
//! let hits = Cell::new(0u32);
//! let primary = Fiber::new_primary(ptr::null_mut()).unwrap();
//! let minor = Fiber::new_minor(&primary, 0, ping, &hits as *const Cell<u32> as *mut ()).unwrap();
//! for _ in 0..3 {
//!   minor.switch().unwrap();
//! }
//! assert_eq!(hits.get(), 3);
//!
//! // minors go before their primary
//! drop(minor);
//! drop(primary);
//! ```
//!
//! The stack-switch mechanism is picked at build time: `swapcontext` on unix, native fibers on
//! windows, or stackful coroutines on unix with the `coroutine` feature. All of them behave the
//! same through this API.

pub mod api;
mod backend;
pub mod config;
pub mod error;
mod fiber;
pub mod heap;
#[cfg(unix)]
mod stack;
#[cfg(all(unix, feature="coroutine"))]
mod switch;

pub use config::{DEFAULT_STACK_SIZE, MIN_STACK_SIZE};
pub use error::FiberError;
pub use fiber::{Fiber, FiberProc, OwnedFiber, State};
