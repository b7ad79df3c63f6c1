use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FiberError {
  /// A primary fiber takes neither parent nor callback; a minor fiber takes both.
  #[error("a primary fiber has no parent and no callback, a minor fiber needs both")]
  Mismatched,
  #[error("out of memory reserving {size} bytes")]
  OutOfMemory { size: usize },
  #[error("{op} failed: {source}")]
  Os { op: &'static str, #[source] source: io::Error },
  /// The target fiber's callback has already returned.
  #[error("fiber has terminated")]
  Terminated,
  #[error("the allocator hook was already installed or in use")]
  AllocatorInstalled,
}

impl FiberError {
  /// Wraps `errno` (or `GetLastError`) after a failed call to `op`.
  #[cfg(any(windows, not(feature="coroutine")))]
  pub(crate) fn last_os_error(op: &'static str) -> Self {
    FiberError::Os { op, source: io::Error::last_os_error() }
  }
}
