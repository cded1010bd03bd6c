use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use isolate_js::in_process::InProcessVm;
use isolate_js::in_process::SimValue;
use isolate_js::BridgeError;
use isolate_js::Isolate;
use isolate_js::IsolateHandle;
use isolate_js::IsolateOptions;
use isolate_js::IsolateScope;

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn isolate_handle_is_thread_safe() {
  assert_send_sync::<IsolateHandle>();
  assert_send_sync::<InProcessVm>();
}

#[test]
fn terminate_from_another_thread() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  let handle = isolate.handle();

  thread::spawn(move || handle.terminate_execution())
    .join()
    .expect("terminating thread panicked")?;
  assert!(vm.terminate_requested());
  // The helper thread attached only for the call.
  assert_eq!(vm.attached_threads(), 1);
  assert_eq!(vm.attach_count(), 2);

  let handle = isolate.handle();
  thread::spawn(move || handle.cancel_terminate_execution())
    .join()
    .expect("cancelling thread panicked")?;
  assert!(!vm.terminate_requested());
  Ok(())
}

#[test]
fn terminate_on_the_isolate_thread_reuses_its_attachment() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  let _entered = IsolateScope::new(&isolate)?;

  isolate.handle().terminate_execution()?;
  assert!(vm.terminate_requested());
  assert_eq!(vm.attach_count(), 1);
  assert!(vm.is_attached(thread::current().id()));
  Ok(())
}

#[test]
fn owner_thread_keeps_its_attachment_without_entering() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  assert!(!isolate.is_entered());
  vm.set_pending_exception(SimValue::String("still pending".to_string()));

  let handle = isolate.handle();
  handle.terminate_execution()?;
  handle.cancel_terminate_execution()?;
  handle.request_interrupt(|_| {})?;

  let thread = thread::current().id();
  assert!(vm.is_attached(thread));
  assert_eq!(vm.attach_count(), 1);
  assert!(vm.has_pending_exception());
  assert!(isolate.has_pending_exception());
  assert_eq!(vm.interrupt_requests(), 1);
  assert_eq!(isolate.handle_interrupts(), 1);

  drop(isolate);
  assert!(!vm.is_attached(thread));
  Ok(())
}

#[test]
fn disposing_one_isolate_keeps_a_sibling_attached() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let first = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  let second = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  let thread = thread::current().id();

  first.dispose();
  assert!(vm.is_attached(thread));
  second.handle().terminate_execution()?;
  assert_eq!(vm.attach_count(), 1);

  second.dispose();
  assert!(!vm.is_attached(thread));
  Ok(())
}

#[test]
fn interrupts_run_on_the_isolate_thread() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  let ran = Arc::new(AtomicUsize::new(0));

  let isolate_thread = thread::current().id();
  for _ in 0..2 {
    let handle = isolate.handle();
    let ran = ran.clone();
    thread::spawn(move || {
      handle.request_interrupt(move |isolate| {
        assert_eq!(thread::current().id(), isolate_thread);
        assert!(!isolate.is_disposed());
        ran.fetch_add(1, Ordering::SeqCst);
      })
    })
    .join()
    .expect("interrupting thread panicked")?;
  }
  assert_eq!(vm.interrupt_requests(), 2);
  assert_eq!(ran.load(Ordering::SeqCst), 0);

  assert_eq!(isolate.handle_interrupts(), 2);
  assert_eq!(ran.load(Ordering::SeqCst), 2);
  assert_eq!(isolate.handle_interrupts(), 0);
  Ok(())
}

#[test]
fn locker_is_exclusive_across_threads() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  let handle = isolate.handle();

  let locker = handle.lock();
  assert!(handle.is_locked());
  assert!(handle.is_locked_by_current_thread());

  let other = handle.clone();
  let observer = thread::spawn(move || (other.is_locked(), other.is_locked_by_current_thread()));
  assert_eq!(observer.join().expect("observer panicked"), (true, false));

  drop(locker);
  assert!(!handle.is_locked());
  assert!(!handle.is_locked_by_current_thread());

  let other = handle.clone();
  let taker = thread::spawn(move || {
    let _locker = other.lock();
    other.is_locked_by_current_thread()
  });
  assert!(taker.join().expect("locking thread panicked"));
  Ok(())
}
