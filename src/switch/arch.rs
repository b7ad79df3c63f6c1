#[cfg(all(target_arch="aarch64", unix, not(target_vendor="apple")))]
mod aarch64;
#[cfg(all(target_arch="aarch64", unix, not(target_vendor="apple")))]
pub use aarch64::*;

#[cfg(all(target_arch="x86_64", unix, not(target_vendor="apple")))]
mod x86_64_unix;
#[cfg(all(target_arch="x86_64", unix, not(target_vendor="apple")))]
pub use x86_64_unix::*;

#[cfg(not(all(
  any(target_arch="aarch64", target_arch="x86_64"),
  unix,
  not(target_vendor="apple"),
)))]
compile_error!("The coroutine backend supports x86_64 and aarch64 on non-apple unix only!");
