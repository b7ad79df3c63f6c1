//! Stack switching strategies. Exactly one is compiled in per target.
//!
//! | target                     | backend     | mechanism                                  |
//! |----------------------------|-------------|--------------------------------------------|
//! | unix except apple          | `ucontext`  | `getcontext`/`makecontext`/`swapcontext`   |
//! | unix + `coroutine` feature | `coroutine` | coroutines resumed from the primary fiber  |
//! | windows                    | `os_fiber`  | `CreateFiber`/`SwitchToFiber`              |
use crate::error::FiberError;
use crate::fiber::Fiber;

/// The four things a stack switch mechanism has to do for a fiber.
///
/// Every method works on the fiber's own context record, reached through [`Fiber::context`].
/// Fibers never move once allocated, so records may point into themselves.
pub(crate) trait Strategy {
  type Context;

  /// A record that has not been bootstrapped yet.
  fn empty() -> Self::Context;

  /// Gives a minor fiber a stack of `stack_size` bytes, arranged so that entering it for the
  /// first time runs [`crate::fiber::run_entry`] with the fiber's address.
  ///
  /// # Safety
  ///
  /// `fiber` is a freshly allocated minor fiber that no one else can see yet.
  unsafe fn bootstrap(fiber: &Fiber, stack_size: usize) -> Result<(), FiberError>;

  /// Captures the calling thread's running context as the primary fiber.
  ///
  /// # Safety
  ///
  /// As for `bootstrap`.
  unsafe fn bootstrap_primary(fiber: &Fiber) -> Result<(), FiberError>;

  /// Saves the running context into `from` and resumes `to`. Returns when `from` is entered
  /// again.
  ///
  /// # Safety
  ///
  /// * `from` is the fiber running on this thread.
  /// * `to` belongs to the same family and has not terminated.
  unsafe fn enter(from: &Fiber, to: &Fiber) -> Result<(), FiberError>;

  /// Releases whatever `bootstrap` or `bootstrap_primary` acquired.
  ///
  /// # Safety
  ///
  /// `fiber` is not running and is never entered again.
  unsafe fn release(fiber: &Fiber);
}

// Darwin's ucontext_t keeps its machine context out of line, and getcontext writes past the
// end of the struct. The coroutine switch has no apple port either.
#[cfg(target_vendor="apple")]
compile_error!("Apple targets are not supported!");

#[cfg(all(unix, not(target_vendor="apple"), not(feature="coroutine")))]
mod ucontext;
#[cfg(all(unix, not(target_vendor="apple"), not(feature="coroutine")))]
pub(crate) use ucontext::Ucontext as Backend;

#[cfg(all(unix, feature="coroutine"))]
mod coroutine;
#[cfg(all(unix, feature="coroutine"))]
pub(crate) use coroutine::Coroutine as Backend;

#[cfg(windows)]
mod os_fiber;
#[cfg(windows)]
pub(crate) use os_fiber::OsFiber as Backend;

#[cfg(not(any(unix, windows)))]
compile_error!("Unsupported target platform!");

pub(crate) type Context = <Backend as Strategy>::Context;
