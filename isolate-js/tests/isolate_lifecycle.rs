use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use isolate_js::in_process::InProcessVm;
use isolate_js::in_process::ManagedJob;
use isolate_js::in_process::SimValue;
use isolate_js::BridgeError;
use isolate_js::GcCallback;
use isolate_js::GcCallbackFlags;
use isolate_js::GcType;
use isolate_js::Handle;
use isolate_js::HandleScope;
use isolate_js::Isolate;
use isolate_js::IsolateOptions;

#[test]
fn missing_binding_fails_creation_cleanly() {
  let vm = InProcessVm::with_missing_bindings(&["valueType"]);
  let err = Isolate::try_new(vm.clone(), IsolateOptions::default())
    .err()
    .expect("creation should fail");
  match err {
    BridgeError::MissingBinding { name } => assert_eq!(name, "valueType"),
    other => panic!("expected MissingBinding, got {other:?}"),
  }
  assert_eq!(vm.attached_threads(), 0);
  assert_eq!(vm.live_global_refs(), 0);

  let vm = InProcessVm::with_missing_bindings(&["sharedBuffer"]);
  let err = Isolate::try_new(vm.clone(), IsolateOptions::default())
    .err()
    .expect("creation should fail");
  assert_eq!(err, BridgeError::MissingBinding { name: "sharedBuffer" });
  assert_eq!(vm.live_global_refs(), 0);
}

#[test]
fn dispose_releases_everything_once() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let options = IsolateOptions {
    main: false,
    ..IsolateOptions::default()
  };
  let isolate = Isolate::try_new(vm.clone(), options)?;
  assert!(vm.is_attached(std::thread::current().id()));

  let scope = HandleScope::new(&isolate);
  let context = isolate.context_new()?;
  isolate.context_enter(context)?;
  let kept = isolate.copy_handle(isolate.string_new("kept")?, true)?;
  let weak = isolate.copy_handle(isolate.object_new(context)?, true)?;
  isolate.make_weak_with_callback(weak, |_, _| {})?;
  isolate.number_new(5.0)?;
  isolate.internal_field_key(0)?;
  isolate.enqueue_microtask(|_| panic!("disposed isolates run no microtasks"));

  isolate.dispose_with(true, 3);
  isolate.dispose();
  drop(scope);

  assert!(isolate.is_disposed());
  assert_eq!(vm.disposed_with(), Some((true, 3)));
  assert_eq!(vm.call_count("isolateDispose"), 1);
  assert_eq!(vm.live_local_refs(), 0);
  assert_eq!(vm.live_global_refs(), 0);
  assert_eq!(vm.live_weak_refs(), 0);
  assert_eq!(vm.invalid_releases(), 0);
  assert!(!vm.is_attached(std::thread::current().id()));
  assert_eq!(isolate.stats().live_handles, 0);
  assert_eq!(isolate.pending_microtasks(), 0);

  // Reference bookkeeping after disposal is a no-op; everything else reports the disposal.
  isolate.reference_removed(kept)?;
  assert!(!isolate.is_valid(kept));
  assert_eq!(isolate.string_new("late"), Err(BridgeError::Disposed));
  assert_eq!(isolate.reference_added(kept), Err(BridgeError::Disposed));
  assert_eq!(isolate.run_microtasks(), Err(BridgeError::Disposed));
  Ok(())
}

#[test]
fn dropping_the_isolate_disposes_it_with_the_main_flag() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  drop(isolate);
  assert_eq!(vm.disposed_with(), Some((true, 0)));
  assert_eq!(vm.live_global_refs(), 0);
  Ok(())
}

#[test]
fn microtasks_run_fifo_and_defer_reentrant_enqueues() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  let log = Rc::new(RefCell::new(Vec::new()));

  let first = log.clone();
  isolate.enqueue_microtask(move |isolate| {
    first.borrow_mut().push(1);
    let third = first.clone();
    isolate.enqueue_microtask(move |_| third.borrow_mut().push(3));
  });
  let second = log.clone();
  isolate.enqueue_microtask(move |_| second.borrow_mut().push(2));
  assert_eq!(isolate.pending_microtasks(), 2);

  isolate.run_microtasks()?;
  assert_eq!(*log.borrow(), vec![1, 2]);
  assert_eq!(isolate.pending_microtasks(), 1);

  isolate.run_microtasks()?;
  assert_eq!(*log.borrow(), vec![1, 2, 3]);
  assert_eq!(vm.microtask_drains(), 2);
  Ok(())
}

static UNCAUGHT: AtomicUsize = AtomicUsize::new(0);

fn record_uncaught(isolate: &Isolate, exception: Handle) {
  if isolate.string_value(exception).as_deref() == Ok("boom") {
    UNCAUGHT.fetch_add(1, Ordering::SeqCst);
  }
}

#[test]
fn exceptions_from_the_managed_drain_are_reported() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  isolate.add_message_listener(record_uncaught);

  vm.queue_managed_microtask(ManagedJob::Run);
  vm.queue_managed_microtask(ManagedJob::Throw(SimValue::String("boom".to_string())));
  isolate.run_microtasks()?;

  assert_eq!(vm.managed_microtasks_run(), 2);
  assert_eq!(UNCAUGHT.load(Ordering::SeqCst), 1);
  assert!(!isolate.has_pending_exception());
  assert_eq!(isolate.handle_scope_len(), 0);
  assert_eq!(vm.live_local_refs(), 0);
  Ok(())
}

static PROLOGUES: AtomicUsize = AtomicUsize::new(0);
static EPILOGUES: AtomicUsize = AtomicUsize::new(0);

fn prologue(_: &Isolate, gc_type: GcType, flags: GcCallbackFlags) {
  assert_eq!(gc_type, GcType::MarkSweepCompact);
  assert!(flags.contains(GcCallbackFlags::FORCED));
  PROLOGUES.fetch_add(1, Ordering::SeqCst);
}

fn epilogue(_: &Isolate, _: GcType, _: GcCallbackFlags, data: usize) {
  assert_eq!(data, 7);
  // The prologue of the same collection already ran.
  assert_eq!(PROLOGUES.load(Ordering::SeqCst), EPILOGUES.load(Ordering::SeqCst) + 1);
  EPILOGUES.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn gc_callbacks_bracket_a_requested_collection() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;

  isolate.add_gc_prologue_callback(GcCallback::Isolate(prologue));
  isolate.add_gc_epilogue_callback(GcCallback::IsolateWithData(epilogue, 7));
  assert_eq!(isolate.gc_callback_counts(), (1, 1));

  isolate.request_garbage_collection()?;
  assert_eq!(vm.gc_count(), 1);
  assert_eq!(PROLOGUES.load(Ordering::SeqCst), 1);
  assert_eq!(EPILOGUES.load(Ordering::SeqCst), 1);

  isolate.remove_gc_prologue_callback(GcCallback::Isolate(prologue));
  isolate.remove_gc_epilogue_callback(GcCallback::IsolateWithData(epilogue, 0));
  assert_eq!(isolate.gc_callback_counts(), (0, 0));
  isolate.request_garbage_collection()?;
  assert_eq!(PROLOGUES.load(Ordering::SeqCst), 1);
  assert_eq!(vm.gc_count(), 2);
  Ok(())
}

#[test]
fn options_are_read_from_the_environment_lookup() {
  let options = IsolateOptions::from_lookup(|key| match key {
    "NODE_STACK_SIZE" => Some("1048576".to_string()),
    "ISOLATE_JS_INTERNAL_ERROR_CHECK" => Some("1".to_string()),
    _ => None,
  });
  assert_eq!(options.stack_size, Some(1_048_576));
  assert!(options.internal_error_check);

  let vm = InProcessVm::new();
  let isolate = Isolate::new(vm.clone(), options);
  assert!(isolate.options().internal_error_check);
  assert_eq!(isolate.options().stack_limit(), Some(1_048_576 - 150_000));
  drop(isolate);
  assert_eq!(Arc::strong_count(&vm), 1);
}
