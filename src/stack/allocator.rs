use crate::config::STACK_ALIGN;
use crate::error::FiberError;
use crate::heap;
use super::Stack;
use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;

/// A dynamically-sized stack from the allocator hook.
pub struct AllocatorStack {
  start: NonNull<u8>,
  size: usize,
}

impl AllocatorStack {
  /// Allocates a stack of `size` bytes, which must already be a multiple of `STACK_ALIGN`.
  ///
  /// It's the drop that's dangerous: you promise not to drop it while a fiber runs on it.
  pub fn new(size: usize) -> Result<AllocatorStack, FiberError> {
    debug_assert_eq!(size % STACK_ALIGN, 0);
    let layout = Layout::from_size_align(size, STACK_ALIGN)
      .map_err(|_| FiberError::OutOfMemory { size })?;
    match NonNull::new(heap::allocator().alloc(layout)) {
      Some(start) => Ok(AllocatorStack { start, size }),
      None => Err(FiberError::OutOfMemory { size }),
    }
  }
}

impl fmt::Debug for AllocatorStack {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "AllocatorStack<{:x}-{:x}>", self.start() as usize, self.end() as usize)
  }
}

impl Drop for AllocatorStack {
  fn drop(&mut self) {
    // the layout was validated in new()
    let layout = unsafe { Layout::from_size_align_unchecked(self.size, STACK_ALIGN) };
    unsafe { heap::allocator().dealloc(self.start.as_ptr(), layout) }
  }
}

unsafe impl Stack for AllocatorStack {
  fn start(&self) -> *mut u8 { self.start.as_ptr() }
  fn end(&self) -> *mut usize {
    unsafe { self.start.as_ptr().add(self.size) }.cast()
  }
  fn size(&self) -> usize { self.size }
}
