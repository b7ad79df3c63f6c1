use fibrous::Fiber;
use std::cell::Cell;
use std::ptr;

fn adder(fb: &Fiber) {
  let total = unsafe { &*(fb.userdata() as *const Cell<usize>) };
  let mut input = 0;
  loop {
    input += 1;
    total.set(total.get() + input);
    fb.primary().switch().unwrap();
  }
}

fn main() {
  let total = Cell::new(0usize);
  let primary = Fiber::new_primary(ptr::null_mut()).unwrap();
  let minor = Fiber::new_minor(&primary, 0, adder, &total as *const Cell<usize> as *mut ()).unwrap();
  for _ in 1..10 {
    minor.switch().unwrap();
  }
  println!("total: {}", total.get());
  drop(minor);
  drop(primary);
}
