use fibrous::{api, config, Fiber, FiberError, OwnedFiber, State, DEFAULT_STACK_SIZE, MIN_STACK_SIZE};
use std::backtrace::Backtrace;
use std::cell::{Cell, OnceCell, RefCell};
use std::hint::black_box;
use std::panic::{self, AssertUnwindSafe};
use std::{mem, ptr};

#[derive(Default)]
struct Test {
  sum: Cell<i32>,
  trace: RefCell<Vec<(&'static str, i32)>>,
  fb0: OnceCell<OwnedFiber>,
  fb1: OnceCell<OwnedFiber>,
  fb2: OnceCell<OwnedFiber>,
}

impl Test {
  fn of<'a>(fb: &Fiber) -> &'a Test {
    unsafe { &*(fb.userdata() as *const Test) }
  }
  fn bump(&self, label: &'static str) {
    let sum = self.sum.get() + 1;
    self.sum.set(sum);
    self.trace.borrow_mut().push((label, sum));
  }
}

fn get(cell: &OnceCell<OwnedFiber>) -> Option<&Fiber> {
  cell.get().map(|fb| &**fb)
}

fn fiber1(fb: &Fiber) {
  let t = Test::of(fb);
  for _ in 0..3 {
    assert!(api::is_current(get(&t.fb1)));
    t.bump("A");
    assert!(api::switch(get(&t.fb2)));
  }
}

fn fiber2(fb: &Fiber) {
  let t = Test::of(fb);
  for _ in 0..3 {
    assert!(api::is_current(get(&t.fb2)));
    t.bump("B");
    assert!(api::switch(get(&t.fb0)));
  }
}

#[test]
fn three_fibers_take_turns() {
  let mut test = Test::default();
  let t = &test as *const Test as *mut ();
  test.fb0.set(api::create(None, 0, None, t).unwrap()).unwrap();
  test.fb1.set(api::create(get(&test.fb0), 0, Some(fiber1), t).unwrap()).unwrap();
  test.fb2.set(api::create(get(&test.fb0), 0, Some(fiber2), t).unwrap()).unwrap();

  for _ in 0..3 {
    assert!(api::is_current(get(&test.fb0)));
    assert!(api::switch(get(&test.fb1)));
  }
  assert!(api::is_current(get(&test.fb0)));
  assert_eq!(
    test.trace.borrow().as_slice(),
    &[("A", 1), ("B", 2), ("A", 3), ("B", 4), ("A", 5), ("B", 6)],
  );

  assert!(api::delete(test.fb2.take()));
  assert!(api::delete(test.fb1.take()));
  assert!(api::delete(test.fb0.take()));
  assert_eq!(test.sum.get(), 6);
}

#[test]
fn null_handles_are_refused() {
  assert!(!api::switch(None));
  assert!(!api::delete(None));
  assert!(!api::is_current(None));
}

fn never_runs(_: &Fiber) {
  unreachable!();
}

#[test]
fn create_rejects_mixed_call_shapes() {
  assert!(api::create(None, 0, Some(never_runs), ptr::null_mut()).is_none());
  let primary = api::create(None, 0, None, ptr::null_mut()).unwrap();
  assert!(api::create(Some(&primary), 0, None, ptr::null_mut()).is_none());
  assert!(api::delete(Some(primary)));
}

struct Identity {
  a: OnceCell<OwnedFiber>,
  b: OnceCell<OwnedFiber>,
}

fn check_identity(fb: &Fiber) {
  let ids = unsafe { &*(fb.userdata() as *const Identity) };
  loop {
    let me: &Fiber = fb;
    let other: &Fiber = if ptr::eq(me, &**ids.a.get().unwrap()) { ids.b.get().unwrap() } else { ids.a.get().unwrap() };
    assert!(me.is_current());
    assert!(!other.is_current());
    assert!(!fb.primary().is_current());
    assert_eq!(fb.running(), me);
    fb.primary().switch().unwrap();
  }
}

#[test]
fn exactly_one_fiber_is_current() {
  let ids = Identity { a: OnceCell::new(), b: OnceCell::new() };
  let data = &ids as *const Identity as *mut ();
  let primary = Fiber::new_primary(ptr::null_mut()).unwrap();
  ids.a.set(Fiber::new_minor(&primary, 0, check_identity, data).unwrap()).unwrap();
  ids.b.set(Fiber::new_minor(&primary, 0, check_identity, data).unwrap()).unwrap();
  let (a, b) = (ids.a.get().unwrap(), ids.b.get().unwrap());

  assert!(primary.is_current());
  assert_eq!(primary.running(), &*primary);
  for _ in 0..4 {
    a.switch().unwrap();
    assert!(primary.is_current() && !a.is_current() && !b.is_current());
    b.switch().unwrap();
    assert!(primary.is_current() && !a.is_current() && !b.is_current());
  }
  drop(ids);
  drop(primary);
}

const ROUNDS: u64 = 5;

fn accumulate(fb: &Fiber) {
  let out = unsafe { &*(fb.userdata() as *const Cell<u64>) };
  let mut local = [0u64; 64];
  for round in 0..ROUNDS {
    for (i, slot) in local.iter_mut().enumerate() {
      *slot += round * i as u64;
    }
    out.set(black_box(&local).iter().sum());
    fb.primary().switch().unwrap();
  }
}

#[test]
fn locals_survive_suspension() {
  let out = Cell::new(0u64);
  let primary = Fiber::new_primary(ptr::null_mut()).unwrap();
  let minor = Fiber::new_minor(&primary, 0, accumulate, &out as *const Cell<u64> as *mut ()).unwrap();
  let mine = black_box(String::from("still here"));
  for round in 0..ROUNDS {
    minor.switch().unwrap();
    // sum over i of i * (0 + 1 + .. + round)
    assert_eq!(out.get(), 2016 * round * (round + 1) / 2);
    assert_eq!(mine, "still here");
    assert_eq!(minor.state(), State::Suspended);
  }
  // the callback returns on the next entry and the primary gets the thread back
  minor.switch().unwrap();
  assert_eq!(minor.state(), State::Terminated);
  assert!(primary.is_current());
}

fn returns_at_once(_: &Fiber) {}

#[test]
fn terminated_fibers_refuse_switches() {
  let primary = Fiber::new_primary(ptr::null_mut()).unwrap();
  let minor = Fiber::new_minor(&primary, 0, returns_at_once, ptr::null_mut()).unwrap();
  assert_eq!(minor.state(), State::Created);
  assert!(api::switch(Some(&minor)));
  assert_eq!(minor.state(), State::Terminated);
  assert_eq!(primary.state(), State::Running);
  assert!(matches!(minor.switch(), Err(FiberError::Terminated)));
  assert!(!api::switch(Some(&minor)));
  assert!(primary.is_current());
}

fn record_payload(fb: &Fiber) {
  let seen = unsafe { &*(fb.userdata() as *const Cell<*mut ()>) };
  loop {
    seen.set(fb.userdata());
    fb.primary().switch().unwrap();
  }
}

#[test]
fn payload_reaches_the_callback_unchanged() {
  let seen = Cell::new(ptr::null_mut::<()>());
  let payload = &seen as *const Cell<*mut ()> as *mut ();
  let primary = Fiber::new_primary(ptr::null_mut()).unwrap();
  let minor = Fiber::new_minor(&primary, 0, record_payload, payload).unwrap();
  assert_eq!(minor.userdata(), payload);
  for _ in 0..3 {
    seen.set(ptr::null_mut());
    minor.switch().unwrap();
    assert_eq!(seen.get(), payload);
  }
}

#[test]
fn stack_sizes_are_resolved() {
  let primary = Fiber::new_primary(ptr::null_mut()).unwrap();
  assert!(primary.is_primary());
  assert_eq!(primary.stack_size(), 0);
  let default = Fiber::new_minor(&primary, 0, never_runs, ptr::null_mut()).unwrap();
  assert!(!default.is_primary());
  assert_eq!(Some(default.stack_size()), config::resolve_stack_size(0));
  assert!(default.stack_size() >= DEFAULT_STACK_SIZE);
  let tiny = Fiber::new_minor(&primary, 1, never_runs, ptr::null_mut()).unwrap();
  assert_eq!(tiny.stack_size(), MIN_STACK_SIZE);
  let custom = Fiber::new_minor(&primary, 256 * 1024, never_runs, ptr::null_mut()).unwrap();
  assert_eq!(custom.stack_size(), 256 * 1024);
}

#[test]
fn oversized_stacks_are_refused() {
  let primary = api::create(None, 0, None, ptr::null_mut()).unwrap();
  assert!(api::create(Some(&primary), usize::MAX, Some(never_runs), ptr::null_mut()).is_none());
  assert!(api::create(Some(&primary), usize::MAX / 2, Some(never_runs), ptr::null_mut()).is_none());
  assert!(matches!(
    Fiber::new_minor(&primary, usize::MAX, never_runs, ptr::null_mut()),
    Err(FiberError::OutOfMemory { size: usize::MAX }),
  ));
  assert!(api::delete(Some(primary)));
}

fn switch_to_self(fb: &Fiber) {
  fb.switch().unwrap();
  assert!(fb.is_current());
}

#[test]
fn switching_to_the_running_fiber_does_nothing() {
  let primary = Fiber::new_primary(ptr::null_mut()).unwrap();
  primary.switch().unwrap();
  assert!(primary.is_current());
  let minor = Fiber::new_minor(&primary, 0, switch_to_self, ptr::null_mut()).unwrap();
  minor.switch().unwrap();
  assert_eq!(minor.state(), State::Terminated);
}

fn recurse(depth: usize) -> usize {
  let frame = black_box([depth as u8; 256]);
  if depth == 0 { frame[0] as usize } else { recurse(depth - 1) + frame[1] as usize }
}

fn deep(fb: &Fiber) {
  let out = unsafe { &*(fb.userdata() as *const Cell<usize>) };
  out.set(recurse(200));
}

#[test]
fn minor_stacks_hold_deep_calls() {
  let out = Cell::new(0usize);
  let primary = Fiber::new_primary(ptr::null_mut()).unwrap();
  let minor = Fiber::new_minor(&primary, 0, deep, &out as *const Cell<usize> as *mut ()).unwrap();
  minor.switch().unwrap();
  assert_eq!(out.get(), recurse(200));
}

fn explode(_: &Fiber) {
  panic!("boom");
}

#[test]
#[should_panic(expected = "boom")]
fn panics_resume_on_the_primary() {
  let primary = Fiber::new_primary(ptr::null_mut()).unwrap();
  let minor = Fiber::new_minor(&primary, 0, explode, ptr::null_mut()).unwrap();
  let _ = minor.switch();
}

fn capture_backtrace(fb: &Fiber) {
  let frames = unsafe { &*(fb.userdata() as *const Cell<usize>) };
  // walks the whole minor stack, down to its first frame
  let trace = Backtrace::force_capture().to_string();
  frames.set(trace.lines().count());
}

#[test]
fn backtraces_end_at_the_base_of_a_minor_stack() {
  let frames = Cell::new(0usize);
  let primary = Fiber::new_primary(ptr::null_mut()).unwrap();
  let minor = Fiber::new_minor(&primary, 0, capture_backtrace, &frames as *const Cell<usize> as *mut ()).unwrap();
  minor.switch().unwrap();
  assert_eq!(minor.state(), State::Terminated);
  assert!(frames.get() > 0);
}

fn explode_with_backtrace(fb: &Fiber) {
  let _ = Backtrace::force_capture().to_string();
  explode(fb);
}

#[test]
fn panics_with_backtraces_resume_on_the_primary() {
  let primary = Fiber::new_primary(ptr::null_mut()).unwrap();
  let minor = Fiber::new_minor(&primary, 0, explode_with_backtrace, ptr::null_mut()).unwrap();
  let payload = panic::catch_unwind(AssertUnwindSafe(|| minor.switch())).unwrap_err();
  assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
  assert_eq!(minor.state(), State::Terminated);
  assert!(primary.is_current());
}

fn ping(fb: &Fiber) {
  let hits = unsafe { &*(fb.userdata() as *const Cell<u32>) };
  loop {
    hits.set(hits.get() + 1);
    fb.primary().switch().unwrap();
  }
}

#[test]
fn families_on_separate_threads_are_independent() {
  let threads: Vec<_> = (0..4u32)
    .map(|n| std::thread::spawn(move || {
      let hits = Cell::new(0u32);
      let primary = Fiber::new_primary(ptr::null_mut()).unwrap();
      let minor = Fiber::new_minor(&primary, 64 * 1024, ping, &hits as *const Cell<u32> as *mut ()).unwrap();
      for _ in 0..(100 + n) {
        minor.switch().unwrap();
        assert!(primary.is_current());
      }
      drop(minor);
      drop(primary);
      hits.get()
    }))
    .collect();
  for (n, thread) in threads.into_iter().enumerate() {
    assert_eq!(thread.join().unwrap(), 100 + n as u32);
  }
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "primary fiber deleted before its minor fibers")]
fn deleting_the_primary_first_is_caught() {
  let primary = Fiber::new_primary(ptr::null_mut()).unwrap();
  let _minor = Fiber::new_minor(&primary, 0, never_runs, ptr::null_mut()).unwrap();
  drop(primary);
}

fn delete_self(fb: &Fiber) {
  let handle = unsafe { &*(fb.userdata() as *const RefCell<Option<OwnedFiber>>) };
  let own = handle.borrow_mut().take();
  api::delete(own);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> Option<&str> {
  payload.downcast_ref::<&str>().copied().or_else(|| payload.downcast_ref::<String>().map(String::as_str))
}

#[test]
fn deleting_the_running_fiber_leaks_it() {
  let handle = RefCell::new(None);
  let primary = Fiber::new_primary(ptr::null_mut()).unwrap();
  let minor = Fiber::new_minor(&primary, 0, delete_self, &handle as *const RefCell<Option<OwnedFiber>> as *mut ()).unwrap();
  let fiber: *const Fiber = &*minor;
  *handle.borrow_mut() = Some(minor);

  let switched = panic::catch_unwind(AssertUnwindSafe(|| unsafe { &*fiber }.switch()));
  if cfg!(debug_assertions) {
    let payload = switched.unwrap_err();
    assert_eq!(panic_message(&*payload), Some("a running fiber cannot be deleted"));
  } else {
    assert!(switched.unwrap().is_ok());
  }
  assert!(handle.borrow().is_none());
  // still allocated: it ran to the end after its handle was dropped
  assert_eq!(unsafe { &*fiber }.state(), State::Terminated);
  assert!(primary.is_current());
  // the leaked minor still counts against the primary
  mem::forget(primary);
}
