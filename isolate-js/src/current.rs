//! The per-thread "current isolate" registry.
//!
//! Code written against the embedding API often omits the isolate parameter. Entering an isolate
//! pushes it onto this thread's stack; exiting pops it and the previously entered isolate (if any)
//! becomes current again.
//!
//! Independently of entering, the registry remembers which managed runtimes this thread is
//! attached to by a live isolate. Cross-thread operations use it to tell the owning thread (whose
//! attachment must survive the call) from a stranger that needs a transient one.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::foreign::ManagedVm;
use crate::BridgeError;
use crate::Isolate;

thread_local! {
  static ENTERED: RefCell<Vec<Rc<Isolate>>> = const { RefCell::new(Vec::new()) };
  /// One entry per live isolate created on this thread, keyed by its managed runtime.
  static ATTACHED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

fn vm_key(vm: &Arc<dyn ManagedVm>) -> usize {
  Arc::as_ptr(vm) as *const () as usize
}

/// Records that an isolate attached this thread to `vm`.
pub(crate) fn register_attachment(vm: &Arc<dyn ManagedVm>) {
  let key = vm_key(vm);
  let _ = ATTACHED.try_with(|attached| attached.borrow_mut().push(key));
}

/// Forgets one attachment to `vm`. Returns whether another live isolate on this thread still
/// relies on it.
pub(crate) fn unregister_attachment(vm: &Arc<dyn ManagedVm>) -> bool {
  let key = vm_key(vm);
  ATTACHED
    .try_with(|attached| {
      let mut attached = attached.borrow_mut();
      if let Some(index) = attached.iter().position(|k| *k == key) {
        attached.swap_remove(index);
      }
      attached.contains(&key)
    })
    .unwrap_or(false)
}

/// Whether a live isolate keeps this thread attached to `vm`.
pub(crate) fn is_attached_to(vm: &Arc<dyn ManagedVm>) -> bool {
  let key = vm_key(vm);
  ATTACHED
    .try_with(|attached| attached.borrow().contains(&key))
    .unwrap_or(false)
}

/// The isolate most recently entered on this thread.
pub fn current() -> Option<Rc<Isolate>> {
  ENTERED.with(|entered| entered.borrow().last().cloned())
}

impl Isolate {
  /// Makes this isolate the current isolate of the calling thread.
  ///
  /// Nested entries are not deduplicated; every `enter` needs its own `exit`.
  pub fn enter(self: &Rc<Self>) -> Result<(), BridgeError> {
    if self.is_disposed() {
      return Err(BridgeError::Disposed);
    }
    ENTERED.with(|entered| entered.borrow_mut().push(self.clone()));
    self.entry_depth.set(self.entry_depth.get() + 1);
    Ok(())
  }

  /// Undoes the most recent [`Isolate::enter`]. The isolate must be the current one.
  pub fn exit(&self) -> Result<(), BridgeError> {
    let popped = ENTERED.with(|entered| {
      let mut entered = entered.borrow_mut();
      match entered.last().map(|top| std::ptr::eq(Rc::as_ptr(top), self)) {
        None => Err(BridgeError::NoCurrentIsolate),
        Some(false) => Err(BridgeError::NotCurrent),
        Some(true) => Ok(entered.pop()),
      }
    });
    match popped {
      Ok(isolate) => {
        self.entry_depth.set(self.entry_depth.get() - 1);
        // The registry's reference may be the last one; let it go outside the borrow.
        drop(isolate);
        Ok(())
      }
      Err(err) => {
        tracing::warn!(%err, "unbalanced isolate exit");
        Err(err)
      }
    }
  }

  /// The isolate most recently entered on this thread.
  pub fn current() -> Option<Rc<Isolate>> {
    current()
  }

  /// Whether this isolate is entered (possibly more than once) on its thread.
  pub fn is_entered(&self) -> bool {
    self.entry_depth.get() > 0
  }
}

/// Enters an isolate for the lifetime of the guard.
pub struct IsolateScope {
  isolate: Rc<Isolate>,
}

impl IsolateScope {
  pub fn new(isolate: &Rc<Isolate>) -> Result<Self, BridgeError> {
    isolate.enter()?;
    Ok(Self {
      isolate: isolate.clone(),
    })
  }
}

impl Drop for IsolateScope {
  fn drop(&mut self) {
    let _ = self.isolate.exit();
  }
}
