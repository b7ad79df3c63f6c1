//! Native windows fibers. The OS owns the stacks and does the switching.
use super::Strategy;
use crate::error::FiberError;
use crate::fiber::{self, Fiber};
use std::ptr;
use winapi::shared::minwindef::LPVOID;
use winapi::um::winbase::{ConvertFiberToThread, ConvertThreadToFiber, CreateFiber, DeleteFiber, SwitchToFiber};

pub(crate) struct OsFiber;

/// The OS fiber object, null until bootstrapped.
pub(crate) struct Native(LPVOID);

impl Strategy for OsFiber {
  type Context = Native;

  fn empty() -> Native { Native(ptr::null_mut()) }

  unsafe fn bootstrap(fiber: &Fiber, stack_size: usize) -> Result<(), FiberError> {
    // The OS passes our parameter straight through, no need to squeeze the pointer.
    let native = CreateFiber(stack_size, Some(start), fiber as *const Fiber as LPVOID);
    if native.is_null() {
      return Err(FiberError::last_os_error("CreateFiber"));
    }
    (*fiber.context()).0 = native;
    Ok(())
  }

  unsafe fn bootstrap_primary(fiber: &Fiber) -> Result<(), FiberError> {
    let native = ConvertThreadToFiber(ptr::null_mut());
    if native.is_null() {
      return Err(FiberError::last_os_error("ConvertThreadToFiber"));
    }
    (*fiber.context()).0 = native;
    Ok(())
  }

  unsafe fn enter(_from: &Fiber, to: &Fiber) -> Result<(), FiberError> {
    // directed: the OS saves whichever fiber is running
    SwitchToFiber((*to.context()).0);
    Ok(())
  }

  unsafe fn release(fiber: &Fiber) {
    let native = (*fiber.context()).0;
    if fiber.is_primary() {
      ConvertFiberToThread();
    } else if !native.is_null() {
      DeleteFiber(native);
    }
  }
}

unsafe extern "system" fn start(param: LPVOID) {
  // returning from a fiber start routine ends the thread
  fiber::run_entry(param as *const Fiber);
}
