use std::rc::Rc;

use isolate_js::current;
use isolate_js::in_process::InProcessVm;
use isolate_js::BridgeError;
use isolate_js::ContextScope;
use isolate_js::HandleScope;
use isolate_js::Isolate;
use isolate_js::IsolateOptions;
use isolate_js::IsolateScope;

#[test]
fn nested_scopes_release_in_lifo_order() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;

  isolate.handle_scope_enter();
  let outer = isolate.string_new("outer")?;
  isolate.handle_scope_enter();
  let inner = isolate.string_new("inner")?;
  let shared = isolate.copy_handle(outer, false)?;
  isolate.handle_scope_reference(outer)?;
  assert_eq!(isolate.handle_scope_depth(), 2);
  assert_eq!(isolate.ref_count(outer)?, 2);

  isolate.handle_scope_exit()?;
  assert!(!isolate.is_valid(inner));
  assert!(!isolate.is_valid(shared));
  assert_eq!(isolate.ref_count(outer)?, 1);
  assert_eq!(vm.live_local_refs(), 1);

  isolate.handle_scope_exit()?;
  assert!(!isolate.is_valid(outer));
  assert_eq!(isolate.handle_scope_len(), 0);
  assert_eq!(vm.live_local_refs(), 0);

  match isolate.handle_scope_exit() {
    Err(BridgeError::ScopeUnderflow) => {}
    other => panic!("expected ScopeUnderflow, got {other:?}"),
  }
  match isolate.handle_scope_reference(isolate.undefined()) {
    Err(BridgeError::ScopeUnderflow) => {}
    other => panic!("expected ScopeUnderflow, got {other:?}"),
  }
  Ok(())
}

#[test]
fn scope_depth_counts_scopes_not_handles() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;

  let outer = HandleScope::new(&isolate);
  for i in 0..512 {
    isolate.string_new(&format!("s{i}"))?;
  }
  assert_eq!(isolate.handle_scope_depth(), 1);
  assert_eq!(isolate.handle_scope_len(), 513);
  {
    let _inner = HandleScope::new(&isolate);
    isolate.string_new("inner")?;
    assert_eq!(isolate.handle_scope_depth(), 2);
  }
  assert_eq!(isolate.handle_scope_depth(), 1);
  drop(outer);
  assert_eq!(isolate.handle_scope_depth(), 0);

  // A failed exit leaves the depth alone.
  assert!(isolate.handle_scope_exit().is_err());
  assert_eq!(isolate.handle_scope_depth(), 0);

  isolate.handle_scope_enter();
  isolate.handle_scope_enter();
  isolate.dispose();
  assert_eq!(isolate.handle_scope_depth(), 0);
  Ok(())
}

#[test]
fn escape_moves_a_handle_to_the_enclosing_scope() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;

  let outer = HandleScope::new(&isolate);
  let escaped = {
    let inner = HandleScope::new(&isolate);
    let value = isolate.string_new("escapee")?;
    isolate.string_new("dropped")?;
    inner.escape(value)?
  };
  assert_eq!(isolate.handle_scope_depth(), 1);
  assert_eq!(isolate.ref_count(escaped)?, 1);
  assert_eq!(isolate.string_value(escaped)?, "escapee");
  assert_eq!(vm.live_local_refs(), 1);
  drop(outer);
  assert!(!isolate.is_valid(escaped));

  let only = HandleScope::new(&isolate);
  let value = isolate.string_new("nowhere")?;
  match only.escape(value) {
    Err(BridgeError::ScopeUnderflow) => {}
    other => panic!("expected ScopeUnderflow, got {other:?}"),
  }
  Ok(())
}

#[test]
fn context_exit_must_match_the_current_context() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  let _scope = HandleScope::new(&isolate);

  let a = isolate.context_new()?;
  let b = isolate.context_new()?;
  isolate.context_enter(a)?;
  assert_eq!(isolate.context_depth(), 1);

  match isolate.context_exit(b) {
    Err(BridgeError::ContextMismatch) => {}
    other => panic!("expected ContextMismatch, got {other:?}"),
  }
  assert_eq!(isolate.context_depth(), 1);

  let current = isolate.current_context().expect("current context");
  assert!(isolate.same_data(current, a)?);
  isolate.context_exit(a)?;
  assert_eq!(isolate.context_depth(), 0);

  match isolate.context_exit(a) {
    Err(BridgeError::ContextStackEmpty) => {}
    other => panic!("expected ContextStackEmpty, got {other:?}"),
  }
  Ok(())
}

#[test]
fn context_scope_keeps_the_context_alive() -> Result<(), BridgeError> {
  let vm = InProcessVm::new();
  let isolate = Isolate::try_new(vm.clone(), IsolateOptions::default())?;
  let globals_at_start = vm.live_global_refs();

  let scope = HandleScope::new(&isolate);
  let context = isolate.context_new()?;
  let context_scope = ContextScope::new(&isolate, context)?;
  drop(scope);

  // The stack's own global copy survives the handle scope.
  let current = isolate.current_context().expect("current context");
  assert_eq!(vm.live_global_refs(), globals_at_start + 1);
  {
    let _scope = HandleScope::new(&isolate);
    let global = isolate.context_global(current)?;
    assert_eq!(isolate.wrapper(global)?.type_name(), "object");
    let object = isolate.object_new(current)?;
    let array = isolate.array_new(current, 4)?;
    assert_eq!(isolate.wrapper(object)?.type_name(), "object");
    assert_eq!(isolate.wrapper(array)?.type_name(), "array");
  }

  drop(context_scope);
  assert_eq!(isolate.context_depth(), 0);
  assert_eq!(vm.live_global_refs(), globals_at_start);
  assert_eq!(vm.invalid_releases(), 0);
  Ok(())
}

#[test]
fn current_isolate_follows_enter_and_exit() -> Result<(), BridgeError> {
  let a = Isolate::try_new(InProcessVm::new(), IsolateOptions::default())?;
  let b = Isolate::try_new(InProcessVm::new(), IsolateOptions::default())?;
  assert!(current().is_none());

  a.enter()?;
  b.enter()?;
  assert!(Rc::ptr_eq(&current().expect("current isolate"), &b));
  assert!(a.is_entered());

  match a.exit() {
    Err(BridgeError::NotCurrent) => {}
    other => panic!("expected NotCurrent, got {other:?}"),
  }
  b.exit()?;
  assert!(Rc::ptr_eq(&Isolate::current().expect("current isolate"), &a));
  a.exit()?;
  assert!(!a.is_entered());
  assert!(current().is_none());

  match a.exit() {
    Err(BridgeError::NoCurrentIsolate) => {}
    other => panic!("expected NoCurrentIsolate, got {other:?}"),
  }

  {
    let _entered = IsolateScope::new(&a)?;
    assert!(a.is_entered());
  }
  assert!(!a.is_entered());
  Ok(())
}

#[test]
fn disposed_isolate_cannot_be_entered() -> Result<(), BridgeError> {
  let isolate = Isolate::try_new(InProcessVm::new(), IsolateOptions::default())?;
  isolate.dispose();
  match isolate.enter() {
    Err(BridgeError::Disposed) => {}
    other => panic!("expected Disposed, got {other:?}"),
  }
  Ok(())
}
