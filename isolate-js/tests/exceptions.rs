use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use isolate_js::in_process::InProcessVm;
use isolate_js::in_process::SimValue;
use isolate_js::in_process::STACK_OVERFLOW_MESSAGE;
use isolate_js::BridgeError;
use isolate_js::Handle;
use isolate_js::HandleScope;
use isolate_js::Isolate;
use isolate_js::IsolateOptions;
use isolate_js::TryCatch;
use isolate_js::STACK_SIZE_RESERVE;

#[test]
fn try_catch_sees_and_clears_thrown_exceptions() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  let _scope = HandleScope::new(&isolate);
  assert!(!isolate.try_catch_exists());

  {
    let try_catch = TryCatch::new(&isolate);
    assert!(isolate.try_catch_exists());
    assert_eq!(isolate.try_catch_count(), 1);

    let error = isolate.string_new("bad")?;
    assert_eq!(isolate.throw_exception(error)?, isolate.undefined());
    assert!(try_catch.has_caught());
    let caught = try_catch.exception()?.expect("caught exception");
    assert_eq!(isolate.string_value(caught)?, "bad");
    assert!(!try_catch.has_terminated()?);
  }
  assert!(!isolate.has_pending_exception());
  assert_eq!(isolate.try_catch_count(), 0);
  Ok(())
}

#[test]
fn rethrow_leaves_the_exception_pending() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  let _scope = HandleScope::new(&isolate);

  let outer = TryCatch::new(&isolate);
  {
    let mut inner = TryCatch::new(&isolate);
    vm.set_pending_exception(SimValue::String("escaping".to_string()));
    inner.rethrow();
  }
  assert!(outer.has_caught());
  drop(outer);
  assert!(!vm.has_pending_exception());
  Ok(())
}

#[test]
fn try_catch_leaves_exceptions_thrown_before_it_opened() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  let _scope = HandleScope::new(&isolate);

  vm.set_pending_exception(SimValue::String("earlier".to_string()));
  {
    let try_catch = TryCatch::new(&isolate);
    assert!(try_catch.has_caught());
  }
  assert!(vm.has_pending_exception());
  let pending = isolate.pending_exception()?.expect("earlier exception");
  assert_eq!(isolate.string_value(pending)?, "earlier");

  isolate.clear_pending_exception()?;
  {
    let _try_catch = TryCatch::new(&isolate);
    vm.set_pending_exception(SimValue::String("inner".to_string()));
  }
  assert!(!vm.has_pending_exception());
  Ok(())
}

#[test]
fn termination_is_distinguished_from_ordinary_exceptions() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;

  let mut try_catch = TryCatch::new(&isolate);
  vm.set_pending_exception(SimValue::Termination);
  assert!(try_catch.has_terminated()?);
  try_catch.reset();
  assert!(!try_catch.has_caught());
  assert!(!try_catch.has_terminated()?);
  assert_eq!(vm.live_local_refs(), 0);
  Ok(())
}

static VERBOSE_REPORTS: AtomicUsize = AtomicUsize::new(0);

fn count_verbose_report(_: &Isolate, _: Handle) {
  VERBOSE_REPORTS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn verbose_try_catch_reports_before_clearing() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  isolate.add_message_listener(count_verbose_report);

  {
    let mut try_catch = TryCatch::new(&isolate);
    try_catch.set_verbose(true);
    assert!(try_catch.is_verbose());
    vm.set_pending_exception(SimValue::Object);
  }
  assert_eq!(VERBOSE_REPORTS.load(Ordering::SeqCst), 1);
  assert!(!vm.has_pending_exception());

  isolate.remove_message_listeners(count_verbose_report);
  {
    let mut try_catch = TryCatch::new(&isolate);
    try_catch.set_verbose(true);
    vm.set_pending_exception(SimValue::Object);
  }
  assert_eq!(VERBOSE_REPORTS.load(Ordering::SeqCst), 1);
  Ok(())
}

#[test]
fn stack_overflow_check_throws_past_the_limit() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let options = IsolateOptions {
    stack_size: Some(STACK_SIZE_RESERVE + 64),
    ..IsolateOptions::default()
  };
  let isolate = Isolate::try_new(vm.clone(), options)?;
  let bottom = isolate.stack_bottom();

  assert!(!isolate.stack_overflow_check(bottom - 32)?);
  assert!(!vm.has_pending_exception());

  let try_catch = TryCatch::new(&isolate);
  assert!(isolate.stack_overflow_check(bottom - 128)?);
  let _scope = HandleScope::new(&isolate);
  let error = try_catch.exception()?.expect("stack overflow error");
  assert_eq!(isolate.string_value(error)?, STACK_OVERFLOW_MESSAGE);
  Ok(())
}

#[test]
fn stack_overflow_check_is_off_without_a_stack_size() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  assert!(!isolate.stack_overflow_check(0)?);
  assert!(!isolate.check_stack_here()?);
  assert_eq!(vm.call_count("isolateThrowStackOverflowError"), 0);
  Ok(())
}

#[test]
fn internal_error_check_forwards_pending_exceptions() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let options = IsolateOptions {
    internal_error_check: true,
    ..IsolateOptions::default()
  };
  let isolate = Isolate::try_new(vm.clone(), options)?;
  let _scope = HandleScope::new(&isolate);

  isolate.context_new()?;
  assert_eq!(vm.internal_error_checks(), 0);

  let try_catch = TryCatch::new(&isolate);
  let error = isolate.string_new("checked")?;
  isolate.throw_exception(error)?;
  assert_eq!(vm.internal_error_checks(), 1);
  assert!(try_catch.has_caught());
  drop(try_catch);
  // The context and the string; the forwarded exception reference was released.
  assert_eq!(vm.live_local_refs(), 2);
  Ok(())
}

static REJECTIONS: AtomicUsize = AtomicUsize::new(0);

fn on_reject(_: &Isolate, _: Handle, _: Handle) {
  REJECTIONS.fetch_add(1, Ordering::SeqCst);
}

fn on_reject_again(_: &Isolate, _: Handle, _: Handle) {
  REJECTIONS.fetch_add(10, Ordering::SeqCst);
}

#[test]
fn promise_reject_callback_toggles_managed_reporting() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;

  isolate.set_promise_reject_callback(Some(on_reject))?;
  isolate.set_promise_reject_callback(Some(on_reject_again))?;
  assert!(vm.promise_reject_enabled());
  assert_eq!(vm.call_count("isolateEnablePromiseRejectCallback"), 1);

  isolate.notify_promise_reject(isolate.undefined(), isolate.null());
  assert_eq!(REJECTIONS.load(Ordering::SeqCst), 10);

  isolate.set_promise_reject_callback(None)?;
  assert!(!vm.promise_reject_enabled());
  isolate.notify_promise_reject(isolate.undefined(), isolate.null());
  assert_eq!(REJECTIONS.load(Ordering::SeqCst), 10);
  Ok(())
}
