
/// # Safety
///
/// * end() must return an appropriately aligned pointer.
/// * start()..end() must be writable for as long as the stack lives.
pub unsafe trait Stack {
  /// Returns the lowest address of the stack.
  fn start(&self) -> *mut u8;
  /// Returns a pointer past the end of the stack.
  fn end(&self) -> *mut usize;
  /// Usable size in bytes.
  fn size(&self) -> usize;
}

mod allocator;
pub use allocator::*;
