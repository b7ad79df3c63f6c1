//! Context records from the C library: a saved register set plus a stack we allocate.
use super::Strategy;
use crate::error::FiberError;
use crate::fiber::{self, Fiber};
use crate::stack::{AllocatorStack, Stack};
use libc::{c_int, c_uint, ucontext_t};
use std::{mem, ptr};

extern "C" {
  fn getcontext(ucp: *mut ucontext_t) -> c_int;
  fn makecontext(ucp: *mut ucontext_t, func: extern "C" fn(), argc: c_int, ...);
  fn swapcontext(oucp: *mut ucontext_t, ucp: *const ucontext_t) -> c_int;
}

pub(crate) struct Ucontext;

pub(crate) struct Record {
  // x86-64 glibc points uc_mcontext.fpregs back into the record: it must never move.
  uc: ucontext_t,
  stack: Option<AllocatorStack>,
}

impl Strategy for Ucontext {
  type Context = Record;

  fn empty() -> Record {
    Record { uc: unsafe { mem::zeroed() }, stack: None }
  }

  unsafe fn bootstrap(fiber: &Fiber, stack_size: usize) -> Result<(), FiberError> {
    let stack = AllocatorStack::new(stack_size)?;
    let record = &mut *fiber.context();
    if getcontext(&mut record.uc) != 0 {
      return Err(FiberError::last_os_error("getcontext"));
    }
    record.uc.uc_stack.ss_sp = stack.start().cast();
    record.uc.uc_stack.ss_size = stack.size();
    record.uc.uc_stack.ss_flags = 0;
    // the trampoline never returns, so there is nothing to link to
    record.uc.uc_link = ptr::null_mut();
    make(&mut record.uc, fiber as *const Fiber as usize);
    record.stack = Some(stack);
    Ok(())
  }

  unsafe fn bootstrap_primary(_fiber: &Fiber) -> Result<(), FiberError> {
    // the zeroed record is filled in by the first swap away from this thread's stack
    Ok(())
  }

  unsafe fn enter(from: &Fiber, to: &Fiber) -> Result<(), FiberError> {
    let from = ptr::addr_of_mut!((*from.context()).uc);
    let to = ptr::addr_of!((*to.context()).uc);
    match swapcontext(from, to) {
      0 => Ok(()),
      _ => Err(FiberError::last_os_error("swapcontext")),
    }
  }

  unsafe fn release(fiber: &Fiber) {
    drop((*fiber.context()).stack.take());
  }
}

// makecontext only promises to pass `int`-sized arguments, so on 64-bit the fiber's address
// travels in two halves.

#[cfg(target_pointer_width="64")]
fn split(addr: usize) -> (c_uint, c_uint) {
  (addr as c_uint, (addr >> 32) as c_uint)
}

#[cfg(target_pointer_width="64")]
fn join(lo: c_uint, hi: c_uint) -> usize {
  lo as usize | (hi as usize) << 32
}

#[cfg(target_pointer_width="64")]
unsafe fn make(uc: &mut ucontext_t, addr: usize) {
  let entry: extern "C" fn(c_uint, c_uint) = trampoline;
  let (lo, hi) = split(addr);
  makecontext(uc, mem::transmute::<extern "C" fn(c_uint, c_uint), extern "C" fn()>(entry), 2, lo, hi);
}

#[cfg(target_pointer_width="64")]
extern "C" fn trampoline(lo: c_uint, hi: c_uint) {
  unsafe { fiber::run_entry(join(lo, hi) as *const Fiber) }
}

#[cfg(target_pointer_width="32")]
unsafe fn make(uc: &mut ucontext_t, addr: usize) {
  let entry: extern "C" fn(c_uint) = trampoline;
  makecontext(uc, mem::transmute::<extern "C" fn(c_uint), extern "C" fn()>(entry), 1, addr as c_uint);
}

#[cfg(target_pointer_width="32")]
extern "C" fn trampoline(addr: c_uint) {
  unsafe { fiber::run_entry(addr as usize as *const Fiber) }
}
