//! Operations that may be invoked from threads other than the isolate's own.
//!
//! [`IsolateHandle`] is the `Send + Sync` face of an isolate. It never touches the isolate's
//! thread-bound call surface: it borrows the current thread's attachment when a live isolate
//! already keeps the thread attached to the same managed runtime, and otherwise attaches the
//! thread for the duration of the call.

use std::rc::Rc;
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;
use parking_lot::MutexGuard;

use crate::current;
use crate::foreign::ManagedEnv;
use crate::foreign::ManagedVm;
use crate::gateway::AccessMethod;
use crate::gateway::Gateway;
use crate::BridgeError;
use crate::Isolate;

/// A callback queued by [`IsolateHandle::request_interrupt`].
pub type InterruptCallback = Box<dyn FnOnce(&Isolate) + Send>;

pub(crate) struct IsolateShared {
  pub vm: Arc<dyn ManagedVm>,
  pub gateway: Gateway,
  lock: Mutex<()>,
  lock_owner: Mutex<Option<ThreadId>>,
  interrupts: Mutex<Vec<InterruptCallback>>,
}

impl IsolateShared {
  pub fn new(vm: Arc<dyn ManagedVm>, gateway: Gateway) -> Self {
    Self {
      vm,
      gateway,
      lock: Mutex::new(()),
      lock_owner: Mutex::new(None),
      interrupts: Mutex::new(Vec::new()),
    }
  }

  pub fn clear_interrupts(&self) {
    self.interrupts.lock().clear();
  }
}

/// Attaches the calling thread for the lifetime of the guard.
struct TransientAttach<'a> {
  vm: &'a dyn ManagedVm,
  env: Rc<dyn ManagedEnv>,
}

impl<'a> TransientAttach<'a> {
  fn new(vm: &'a dyn ManagedVm) -> Result<Self, BridgeError> {
    let env = vm.attach_current_thread()?;
    Ok(Self { vm, env })
  }
}

impl Drop for TransientAttach<'_> {
  fn drop(&mut self) {
    self.vm.detach_current_thread();
  }
}

/// A cloneable, thread-safe handle to an isolate.
#[derive(Clone)]
pub struct IsolateHandle {
  shared: Arc<IsolateShared>,
}

impl IsolateHandle {
  pub(crate) fn new(shared: Arc<IsolateShared>) -> Self {
    Self { shared }
  }

  fn call_void_from_any_thread(&self, method: AccessMethod) -> Result<(), BridgeError> {
    let gateway = &self.shared.gateway;
    if current::is_attached_to(&self.shared.vm) {
      // Attaching an attached thread hands back its existing call surface.
      let env = self.shared.vm.attach_current_thread()?;
      gateway.call_void(&*env, method, &[], false);
      return Ok(());
    }
    tracing::trace!(method = method.name(), "attaching transient thread");
    let attach = TransientAttach::new(&*self.shared.vm)?;
    gateway.call_void(&*attach.env, method, &[], false);
    Ok(())
  }

  /// Asks the managed runtime to stop executing script at its next check.
  pub fn terminate_execution(&self) -> Result<(), BridgeError> {
    self.call_void_from_any_thread(AccessMethod::IsolateTerminateExecution)
  }

  pub fn cancel_terminate_execution(&self) -> Result<(), BridgeError> {
    self.call_void_from_any_thread(AccessMethod::IsolateCancelTerminateExecution)
  }

  /// Queues `callback` to run on the isolate's thread and asks the managed runtime to interrupt
  /// script execution so it gets there.
  pub fn request_interrupt(
    &self,
    callback: impl FnOnce(&Isolate) + Send + 'static,
  ) -> Result<(), BridgeError> {
    self.shared.interrupts.lock().push(Box::new(callback));
    self.call_void_from_any_thread(AccessMethod::IsolateRequestInterrupt)
  }

  /// Blocks until the isolate's cooperative lock is free and takes it.
  pub fn lock(&self) -> Locker<'_> {
    let guard = self.shared.lock.lock();
    *self.shared.lock_owner.lock() = Some(std::thread::current().id());
    Locker {
      shared: &self.shared,
      _guard: guard,
    }
  }

  pub fn is_locked(&self) -> bool {
    self.shared.lock.is_locked()
  }

  pub fn is_locked_by_current_thread(&self) -> bool {
    *self.shared.lock_owner.lock() == Some(std::thread::current().id())
  }
}

/// Holds an isolate's cooperative lock. The bridge itself never takes this lock.
pub struct Locker<'a> {
  shared: &'a IsolateShared,
  _guard: MutexGuard<'a, ()>,
}

impl Drop for Locker<'_> {
  fn drop(&mut self) {
    *self.shared.lock_owner.lock() = None;
  }
}

impl Isolate {
  /// Runs the callbacks queued through [`IsolateHandle::request_interrupt`], oldest first.
  ///
  /// This is the entry point the managed runtime calls once it has interrupted script execution.
  pub fn handle_interrupts(&self) -> usize {
    let callbacks = std::mem::take(&mut *self.shared.interrupts.lock());
    let count = callbacks.len();
    for callback in callbacks {
      callback(self);
    }
    count
  }
}
