//! The raw memory hook. Fiber handles, family cells and stacks are all allocated through it.
//!
//! The default is [`Heap`], the global Rust allocator. An embedding application may install its
//! own [`RawAlloc`] once, before the first fiber is created.
use crate::error::FiberError;
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::OnceLock;

/// A source of raw memory.
///
/// # Safety
///
/// * `alloc` returns null or a block valid for `layout`.
/// * `dealloc` is only handed blocks from `alloc`, with the layout they were allocated with.
pub unsafe trait RawAlloc: Sync {
  fn alloc(&self, layout: Layout) -> *mut u8;
  /// # Safety
  ///
  /// `ptr` came from `alloc` with this `layout` and has not been released yet.
  unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout);
}

/// The global allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct Heap;

unsafe impl RawAlloc for Heap {
  fn alloc(&self, layout: Layout) -> *mut u8 {
    // every layout we request has a non-zero size
    unsafe { alloc::alloc(layout) }
  }
  unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
    alloc::dealloc(ptr, layout)
  }
}

static HOOK: OnceLock<&'static dyn RawAlloc> = OnceLock::new();

/// Installs the allocator used for all subsequent fiber allocations.
///
/// Fails once any fiber memory has been allocated, or if a hook is already installed.
pub fn set_allocator(hook: &'static dyn RawAlloc) -> Result<(), FiberError> {
  HOOK.set(hook).map_err(|_| FiberError::AllocatorInstalled)
}

pub(crate) fn allocator() -> &'static dyn RawAlloc {
  *HOOK.get_or_init(|| &Heap as &'static dyn RawAlloc)
}

/// Moves `value` into hook-allocated memory.
pub(crate) fn alloc_value<T>(value: T) -> Result<NonNull<T>, FiberError> {
  let layout = Layout::new::<T>();
  let ptr = NonNull::new(allocator().alloc(layout).cast::<T>())
    .ok_or(FiberError::OutOfMemory { size: layout.size() })?;
  unsafe { ptr.as_ptr().write(value) };
  Ok(ptr)
}

/// Drops and releases a value from [`alloc_value`].
///
/// # Safety
///
/// `ptr` came from `alloc_value::<T>` and is not used again.
pub(crate) unsafe fn free_value<T>(ptr: NonNull<T>) {
  ptr.as_ptr().drop_in_place();
  allocator().dealloc(ptr.as_ptr().cast(), Layout::new::<T>());
}
