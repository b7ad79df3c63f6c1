//! Build-time knobs for stack sizing.

/// Stack size, in bytes, for minor fibers created with a requested size of zero.
///
/// 1 MiB unless the crate is compiled with `FIBROUS_STACK_SIZE` set in the environment.
pub const DEFAULT_STACK_SIZE: usize = match option_env!("FIBROUS_STACK_SIZE") {
  Some(size) => parse_size(size),
  None => 1024 * 1024,
};

/// Smallest stack a minor fiber gets, whatever it asks for.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Alignment of the top of every stack we allocate. Satisfies every supported ABI.
pub const STACK_ALIGN: usize = 16;

/// Turns a caller's requested stack size into the size actually reserved.
///
/// `None` when rounding up would overflow `usize`.
pub const fn resolve_stack_size(requested: usize) -> Option<usize> {
  let size = if requested == 0 { DEFAULT_STACK_SIZE } else { requested };
  let size = if size < MIN_STACK_SIZE { MIN_STACK_SIZE } else { size };
  // round up so that start + size stays aligned
  match size.checked_add(STACK_ALIGN - 1) {
    Some(size) => Some(size & !(STACK_ALIGN - 1)),
    None => None,
  }
}

const fn parse_size(text: &str) -> usize {
  let bytes = text.as_bytes();
  assert!(!bytes.is_empty(), "FIBROUS_STACK_SIZE is empty");
  let mut size: usize = 0;
  let mut i = 0;
  while i < bytes.len() {
    let digit = bytes[i];
    assert!(digit.is_ascii_digit(), "FIBROUS_STACK_SIZE must be a decimal byte count");
    size = match size.checked_mul(10) {
      Some(size) => size,
      None => panic!("FIBROUS_STACK_SIZE overflows usize"),
    };
    size = match size.checked_add((digit - b'0') as usize) {
      Some(size) => size,
      None => panic!("FIBROUS_STACK_SIZE overflows usize"),
    };
    i += 1;
  }
  assert!(size > 0, "FIBROUS_STACK_SIZE must not be zero");
  size
}
