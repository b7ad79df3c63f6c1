//! Minor fibers as stackful coroutines with a yield/resume pair.
//!
//! Only the primary fiber ever resumes a coroutine. A minor fiber that switches somewhere
//! publishes its target in the primary's frame and yields; the primary's resume loop then
//! resumes whatever was published until the primary itself is.
use super::Strategy;
use crate::error::FiberError;
use crate::fiber::{self, Fiber};
use crate::stack::{AllocatorStack, Stack};
use crate::switch::{link_detached, switch};
use std::cell::Cell;
use std::ptr::{self, NonNull};

pub(crate) struct Coroutine;

pub(crate) enum Frame {
  Unlinked,
  Primary {
    /// The fiber the resume loop enters next.
    next: Cell<Option<NonNull<Fiber>>>,
    /// The resume loop, paused while a coroutine runs.
    paused: Cell<*mut usize>,
  },
  Minor {
    stack: AllocatorStack,
    paused: Cell<*mut usize>,
  },
}

impl Strategy for Coroutine {
  type Context = Frame;

  fn empty() -> Frame { Frame::Unlinked }

  unsafe fn bootstrap(fiber: &Fiber, stack_size: usize) -> Result<(), FiberError> {
    let stack = AllocatorStack::new(stack_size)?;
    let paused = link_detached(entry, fiber as *const Fiber as usize, stack.end());
    *fiber.context() = Frame::Minor { stack, paused: Cell::new(paused) };
    Ok(())
  }

  unsafe fn bootstrap_primary(fiber: &Fiber) -> Result<(), FiberError> {
    *fiber.context() = Frame::Primary { next: Cell::new(None), paused: Cell::new(ptr::null_mut()) };
    Ok(())
  }

  unsafe fn enter(from: &Fiber, to: &Fiber) -> Result<(), FiberError> {
    let primary = from.primary();
    let (next, loop_paused) = primary_frame(primary);
    next.set(Some(NonNull::from(to)));
    if !from.is_primary() {
      // yield. the resume loop picks `next` up from here
      let resumed = switch(loop_paused.get(), 0);
      loop_paused.set(resumed.stack);
      return Ok(());
    }
    let primary = NonNull::from(primary);
    while let Some(target) = next.get().filter(|target| *target != primary) {
      let Frame::Minor { paused, .. } = &*target.as_ref().context() else {
        unreachable!("only minor fibers are resumed");
      };
      let yielded = switch(paused.get(), 0);
      paused.set(yielded.stack);
    }
    Ok(())
  }

  unsafe fn release(fiber: &Fiber) {
    // drops the stack of a minor
    *fiber.context() = Frame::Unlinked;
  }
}

unsafe fn primary_frame(primary: &Fiber) -> (&Cell<Option<NonNull<Fiber>>>, &Cell<*mut usize>) {
  match &*primary.context() {
    Frame::Primary { next, paused } => (next, paused),
    _ => unreachable!("primary fiber without a resume loop frame"),
  }
}

unsafe extern "C" fn entry(linker: *mut usize, arg: usize) {
  // Hand the linker its stack back straight away. We are next entered from the resume loop.
  let resumed = switch(linker, 0);
  let fiber = arg as *const Fiber;
  if let Some(fiber) = fiber.as_ref() {
    primary_frame(fiber.primary()).1.set(resumed.stack);
  }
  fiber::run_entry(fiber);
}
