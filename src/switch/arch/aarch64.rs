//! AArch64 has no red zone on linux, so we move `sp` down before spilling.
//!
//! Fun ABI facts:
//!
//! * `sp` must be 16-byte aligned whenever it is used to access memory.
//! * `x19` and `x29` (fp) can't be asm operands, so we spill and restore them by hand along with
//!   the link register. `x20`-`x28` are declared clobbered and llvm saves them; `clobber_abi("C")`
//!   already covers the vector registers because only their low halves are callee-saved.
use crate::switch::{InitFn, Switch};
use core::arch::{asm, global_asm};

/// Starts a new call stack at the trampoline, which calls `fun(paused, arg)`.
///
/// Returns once `fun` switches back, with the paused stack pointer of the new stack.
///
/// # Safety
///
/// * `stack` must be a 16-byte aligned pointer to the end of a region.
/// * `stack` must either have a guard page allocated or not overflow.
/// * `fun` must never return.
#[inline(always)]
pub unsafe fn link_detached(fun: InitFn, arg: usize, stack: *mut usize) -> *mut usize {
  let paused: *mut usize;
  asm!(
    // step 1: set up the trampoline frame in the new stack. implies x2 -= 16
    "stp x0, x3, [x2, #-16]!",
    // | new x2 rel | data                |
    // |------------|---------------------|
    // | +8         | trampoline function |
    // | 0          | entrypoint function |

    // step 2: state preservation. we must spill our state to the stack so we may be resumed.
    "adr x30, 2f",            // resume at the end of this function
    "sub sp, sp, #32",
    "stp x29, x30, [sp]",     // frame pointer and return address
    "str x19, [sp, #16]",     // llvm's base pointer
    // | sp rel | data           |
    // |--------|----------------|
    // | +16    | x19            |
    // | +8     | return address |
    // | 0      | frame pointer  |

    // step 3: parameters. x1 (arg) is untouched.
    "mov x0, sp",             // our stack pointer -> arg 1

    // step 4: calling trampoline on the new stack.
    "mov sp, x2",
    "mov x29, xzr",           // "top of call chain"
    "mov x30, xzr",
    "br x3",

    // resumed by switch(). register layout is now:
    // | register | value                   |
    // |----------|-------------------------|
    // | x1       | arg                     |
    // | x2       | paused stack pointer    |
    "2:",
    inout("x0") fun => _,
    inout("x1") arg => _,
    inout("x2") stack => paused,
    inout("x3") fibrous_trampoline as usize => _,
    out("x20") _, out("x21") _, out("x22") _, out("x23") _, out("x24") _,
    out("x25") _, out("x26") _, out("x27") _, out("x28") _,
    clobber_abi("C"),
  );
  paused
}

/// Pauses the current stack and resumes `to`, handing it `arg`.
///
/// # Safety
///
/// `to` must be a stack paused by `switch` or `link_detached` that has not been resumed since.
#[inline(always)]
pub unsafe fn switch(to: *mut usize, arg: usize) -> Switch {
  let paused: *mut usize;
  let arg_out: usize;
  asm!(
    // step 1: spill to stack
    "adr x30, 2f",
    "sub sp, sp, #32",
    "stp x29, x30, [sp]",
    "str x19, [sp, #16]",

    // step 2: switch stacks
    "mov x2, sp",             // our paused stack pointer goes to the other side in x2
    "mov sp, x0",

    // step 3: state restoration (inverse of preservation) and branching
    "ldr x19, [sp, #16]",
    "ldp x29, x30, [sp]",
    "add sp, sp, #32",
    "br x30",

    // | register | value                   |
    // |----------|-------------------------|
    // | x1       | arg                     |
    // | x2       | paused stack pointer    |
    "2:",
    inout("x0") to => _,
    inout("x1") arg => arg_out,
    out("x2") paused,
    out("x20") _, out("x21") _, out("x22") _, out("x23") _, out("x24") _,
    out("x25") _, out("x26") _, out("x27") _, out("x28") _,
    clobber_abi("C"),
  );
  Switch { stack: paused, arg: arg_out }
}

/* Trampoline function (terminates the call chain, becoming the first frame):
 * - called with an artificial frame.
 * - calls the function in a new frame.
 * - expects that function never to return.
 */
extern "C" {
  fn fibrous_trampoline();
}

global_asm!(
  ".text",
  ".global fibrous_trampoline",
  ".p2align 4",
  "fibrous_trampoline:",
  ".cfi_startproc",
  ".cfi_def_cfa sp, 16",     // the frame ends at the top of the stack
  ".cfi_undefined x30",      // no return address: unwinders stop here
  "ldr x9, [sp]",
  "blr x9",                  // call the function in a new stack frame.
  "brk #1",                  // it returned. that's a bug.
  ".cfi_endproc",
);
