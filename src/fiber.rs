//! Fibers, the family cell they share, and the lifecycle every backend has in common.
use crate::backend::{Backend, Context, Strategy};
use crate::config;
use crate::error::FiberError;
use crate::heap;
use log::{debug, error, trace};
use std::any::Any;
use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::ptr::{self, NonNull};

/// Entry callback of a minor fiber. Runs once, on the fiber's own stack.
pub type FiberProc = fn(&Fiber);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
  /// Bootstrapped, never entered.
  Created,
  Running,
  Suspended,
  /// The callback returned (or panicked). The fiber can only be deleted now.
  Terminated,
}

/// Shared by a primary fiber and every minor fiber created from it. Owned by the primary.
struct Family {
  /// The one fiber of the family holding the thread.
  current: Cell<NonNull<Fiber>>,
  primary: NonNull<Fiber>,
  minors: Cell<usize>,
  /// A panic that escaped a minor's callback, waiting to resume on the primary.
  panic: Cell<Option<Box<dyn Any + Send>>>,
}

/// An execution context with its own stack.
///
/// Fibers are only ever handled by reference: creation hands out an [`OwnedFiber`], callbacks
/// receive `&Fiber`. Two fibers are the same fiber iff they are at the same address.
pub struct Fiber {
  family: NonNull<Family>,
  stack_size: usize,
  context: UnsafeCell<Context>,
  proc_: Option<FiberProc>,
  userdata: *mut (),
  state: Cell<State>,
}

impl Fiber {
  /// Turns the calling thread's running context into the primary fiber of a new family.
  ///
  /// The primary is the fiber switched back to when a minor's callback returns, and must
  /// outlive every minor created from it.
  pub fn new_primary(userdata: *mut ()) -> Result<OwnedFiber, FiberError> {
    let fiber = heap::alloc_value(Fiber {
      family: NonNull::dangling(),
      stack_size: 0,
      context: UnsafeCell::new(Backend::empty()),
      proc_: None,
      userdata,
      state: Cell::new(State::Running),
    })?;
    let family = Family {
      current: Cell::new(fiber),
      primary: fiber,
      minors: Cell::new(0),
      panic: Cell::new(None),
    };
    let family = match heap::alloc_value(family) {
      Ok(family) => family,
      Err(err) => {
        unsafe { heap::free_value(fiber) };
        return Err(err);
      }
    };
    unsafe {
      (*fiber.as_ptr()).family = family;
      if let Err(err) = Backend::bootstrap_primary(fiber.as_ref()) {
        heap::free_value(family);
        heap::free_value(fiber);
        return Err(err);
      }
    }
    debug!("created primary fiber {:p}", fiber);
    Ok(OwnedFiber(fiber))
  }

  /// Creates a fiber in `primary`'s family that will run `proc_` on a stack of its own.
  ///
  /// A `stack_size` of zero means [`DEFAULT_STACK_SIZE`](crate::DEFAULT_STACK_SIZE). Nothing runs
  /// until the fiber is first switched to.
  pub fn new_minor(
    primary: &Fiber,
    stack_size: usize,
    proc_: FiberProc,
    userdata: *mut (),
  ) -> Result<OwnedFiber, FiberError> {
    let stack_size = config::resolve_stack_size(stack_size)
      .ok_or(FiberError::OutOfMemory { size: stack_size })?;
    let fiber = heap::alloc_value(Fiber {
      family: primary.family,
      stack_size,
      context: UnsafeCell::new(Backend::empty()),
      proc_: Some(proc_),
      userdata,
      state: Cell::new(State::Created),
    })?;
    if let Err(err) = unsafe { Backend::bootstrap(fiber.as_ref(), stack_size) } {
      unsafe { heap::free_value(fiber) };
      return Err(err);
    }
    let family = primary.family();
    family.minors.set(family.minors.get() + 1);
    debug!("created fiber {:p} with {} bytes of stack", fiber, stack_size);
    Ok(OwnedFiber(fiber))
  }

  /// Hands the thread to this fiber. Returns once some fiber switches back to the caller.
  ///
  /// Switching to the fiber that is already running does nothing. If a minor's callback
  /// panics, the panic resumes here on the primary fiber.
  pub fn switch(&self) -> Result<(), FiberError> {
    let family = self.family();
    let target = NonNull::from(self);
    let prev = family.current.get();
    if prev == target {
      return Ok(());
    }
    let entered = self.state.get();
    if entered == State::Terminated {
      return Err(FiberError::Terminated);
    }
    let prev = unsafe { prev.as_ref() };
    trace!("switching from fiber {:p} to {:p}", prev, self);
    prev.state.set(State::Suspended);
    self.state.set(State::Running);
    family.current.set(target);
    if let Err(err) = unsafe { Backend::enter(prev, self) } {
      self.state.set(entered);
      prev.state.set(State::Running);
      family.current.set(NonNull::from(prev));
      error!("switching from fiber {:p} to {:p} failed: {}", prev, self, err);
      return Err(err);
    }
    if let Some(payload) = family.panic.take() {
      panic::resume_unwind(payload);
    }
    Ok(())
  }

  /// Whether this fiber currently holds the thread.
  pub fn is_current(&self) -> bool {
    self.family().current.get() == NonNull::from(self)
  }

  /// The fiber of this family currently holding the thread.
  pub fn running(&self) -> &Fiber {
    unsafe { self.family().current.get().as_ref() }
  }

  /// The primary fiber of this family.
  pub fn primary(&self) -> &Fiber {
    unsafe { self.family().primary.as_ref() }
  }

  pub fn is_primary(&self) -> bool { self.proc_.is_none() }

  /// Reserved stack in bytes, zero for a primary fiber.
  pub fn stack_size(&self) -> usize { self.stack_size }

  /// The payload given at creation, untouched.
  pub fn userdata(&self) -> *mut () { self.userdata }

  pub fn state(&self) -> State { self.state.get() }

  pub(crate) fn context(&self) -> *mut Context { self.context.get() }

  fn family(&self) -> &Family {
    // the primary keeps the family alive until every minor is gone
    unsafe { self.family.as_ref() }
  }

  /// Marks the fiber terminated and hands the thread to the primary for good.
  fn finish(&self) -> ! {
    let family = self.family();
    let primary = self.primary();
    debug!("fiber {:p} returned, handing the thread to primary {:p}", self, primary);
    self.state.set(State::Terminated);
    primary.state.set(State::Running);
    family.current.set(NonNull::from(primary));
    if let Err(err) = unsafe { Backend::enter(self, primary) } {
      error!("terminated fiber {:p} could not reach its primary: {}", self, err);
    }
    // terminated fibers are never entered again
    process::abort()
  }
}

impl PartialEq for Fiber {
  fn eq(&self, other: &Fiber) -> bool { ptr::eq(self, other) }
}

impl Eq for Fiber {}

impl fmt::Debug for Fiber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Fiber")
      .field("addr", &(self as *const Fiber))
      .field("primary", &self.is_primary())
      .field("stack_size", &self.stack_size)
      .field("state", &self.state.get())
      .finish()
  }
}

/// Body of every backend trampoline: runs the callback on the fiber's own stack, then hands the
/// thread to the primary. Does nothing for a null fiber.
///
/// # Safety
///
/// `fiber` is null or a minor fiber being entered for the first time.
pub(crate) unsafe fn run_entry(fiber: *const Fiber) {
  let Some(fiber) = fiber.as_ref() else { return };
  if let Some(proc_) = fiber.proc_ {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| proc_(fiber))) {
      debug!("fiber {:p} panicked", fiber);
      fiber.family().panic.set(Some(payload));
    }
  }
  fiber.finish()
}

/// Owning handle to a fiber. Dropping it deletes the fiber.
///
/// Minor fibers must be dropped before their primary, and never while running. Handles are
/// bound to the thread that created them:
///
/// ```compile_fail
/// let primary = fibrous::Fiber::new_primary(std::ptr::null_mut()).unwrap();
/// std::thread::spawn(move || drop(primary));
/// ```
pub struct OwnedFiber(NonNull<Fiber>);

impl Deref for OwnedFiber {
  type Target = Fiber;
  fn deref(&self) -> &Fiber { unsafe { self.0.as_ref() } }
}

impl fmt::Debug for OwnedFiber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Debug::fmt(&**self, f) }
}

impl Drop for OwnedFiber {
  fn drop(&mut self) {
    let fiber = unsafe { self.0.as_ref() };
    let family = fiber.family();
    if fiber.is_primary() {
      let minors = family.minors.get();
      debug_assert_eq!(minors, 0, "primary fiber deleted before its minor fibers");
      if minors != 0 {
        // the minors still point at the family and may switch back here
        error!("primary fiber {:p} deleted with {} minor fibers alive, leaking it", fiber, minors);
        return;
      }
      debug!("deleting primary fiber {:p}", fiber);
      let family = fiber.family;
      unsafe {
        Backend::release(fiber);
        heap::free_value(family);
        heap::free_value(self.0);
      }
    } else {
      debug_assert!(!fiber.is_current(), "a running fiber cannot be deleted");
      if fiber.is_current() {
        // we are standing on its stack
        error!("fiber {:p} deleted while running, leaking it", fiber);
        return;
      }
      debug!("deleting fiber {:p}", fiber);
      family.minors.set(family.minors.get() - 1);
      unsafe {
        Backend::release(fiber);
        heap::free_value(self.0);
      }
    }
  }
}
