//! X86-64 is pretty simple. We have loads of registers to play with and only spill three words.
//!
//! Fun ABI facts:
//!
//! * `sp` ought to be aligned to 16 bytes when making a function call, so a function is entered
//!   with `sp + 8` aligned.
//! * There is a 128-byte red zone below the stack we can use for leaf function storage.
//! * `rbx` and `rbp` can't be asm operands, so we spill and restore them by hand. The other
//!   callee-saved registers (r12-r15) are declared clobbered and llvm saves them for us.
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
    // step 1: state preservation. we spill our state into the red zone so we may be resumed.
    "lea rax, [rip + 2f]", // calculate address of end of this function with forward ref
    "mov [rsp - 8],  rax", // save end of function as the return address
    "mov [rsp - 16], rbp", // save the frame pointer
    "mov [rsp - 24], rbx", // save llvm's nefarious porpoises register.
    // | rsp rel | data           |
    // |---------|----------------|
    // | -8      | return address |
    // | -16     | frame pointer  |
    // | -24     | llvm obscurity |

    // step 2: set up the trampoline frame in the new stack
    "mov [rdx - 8],  rcx", // trampoline
    "mov [rdx - 16], rdi", // fun
    // | end rel | data                |
    // |---------|---------------------|
    // | -8      | trampoline function |
    // | -16     | entrypoint function |

    // step 3: parameters. rsi (arg) is untouched.
    "mov rdi, rsp",        // our stack pointer -> arg 1

    // step 4: calling trampoline on the new stack.
    "xor ebx, ebx",
    "xor ebp, ebp",        // "top of call chain"
    "lea rsp, [rdx - 16]",
    "jmp rcx",

    // resumed by switch(). register layout is now:
    // | register | value                   |
    // |----------|-------------------------|
    // | rsi      | arg                     |
    // | rdx      | paused stack pointer    |
    "2:",
    inout("rdi") fun => _,
    inout("rsi") arg => _,
    inout("rdx") stack => paused,
    inout("rcx") fibrous_trampoline as usize => _,
    out("r12") _, out("r13") _, out("r14") _, out("r15") _,
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
    "lea rax, [rip + 2f]",
    "mov [rsp - 8],  rax",
    "mov [rsp - 16], rbp",
    "mov [rsp - 24], rbx",

    // step 2: switch stacks
    "mov rdx, rsp",        // our paused stack pointer goes to the other side in rdx
    "mov rsp, rdi",

    // step 3: state restoration (inverse of preservation) and branching
    "mov rbx, [rdi - 24]",
    "mov rbp, [rdi - 16]",
    "jmp qword ptr [rdi - 8]",

    // | register | value                   |
    // |----------|-------------------------|
    // | rsi      | arg                     |
    // | rdx      | paused stack pointer    |
    "2:",
    inout("rdi") to => _,
    inout("rsi") arg => arg_out,
    out("rdx") paused,
    out("r12") _, out("r13") _, out("r14") _, out("r15") _,
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
  ".p2align 4",              // put it at the start of a quadword to increase fetch perf.
  "fibrous_trampoline:",
  ".cfi_startproc simple",
  ".cfi_def_cfa rsp, 16",    // the frame ends at the top of the stack
  ".cfi_undefined rip",      // no return address: unwinders stop here
  "call qword ptr [rsp]",    // call the function in a new stack frame.
  "ud2",                     // it returned. that's a bug.
  ".cfi_endproc",
);
