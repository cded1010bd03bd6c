//! Pending exceptions, catch scopes and uncaught-exception reporting.
//!
//! Script-level exceptions live on the owning thread's call surface, not in return values. They
//! are only cleared by a [`TryCatch`] going out of scope, by an explicit
//! [`Isolate::clear_pending_exception`], or when the microtask checkpoint reports them as
//! uncaught.

use crate::error::fatal_error;
use crate::foreign::Arg;
use crate::gateway::AccessMethod;
use crate::handle::Handle;
use crate::scope::HandleScope;
use crate::BridgeError;
use crate::Isolate;

/// Receives exceptions nobody caught (and caught ones from verbose catch scopes).
pub type MessageListener = fn(&Isolate, Handle);

/// Receives promise rejections once the managed side has been asked to report them.
pub type PromiseRejectCallback = fn(&Isolate, Handle, Handle);

/// An entry on the exception-trap stack.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum TrapKind {
  /// A real catch scope.
  Catch,
  /// Marks a region (the microtask checkpoint) whose exceptions count as uncaught.
  Dummy,
}

pub(crate) struct TrapGuard<'i> {
  isolate: &'i Isolate,
}

impl Drop for TrapGuard<'_> {
  fn drop(&mut self) {
    self.isolate.traps.borrow_mut().pop();
  }
}

impl Isolate {
  pub(crate) fn push_trap(&self, kind: TrapKind) -> TrapGuard<'_> {
    self.traps.borrow_mut().push(kind);
    TrapGuard { isolate: self }
  }

  /// Whether an exception thrown now would be caught by a native catch scope.
  pub fn try_catch_exists(&self) -> bool {
    self.traps.borrow().last() == Some(&TrapKind::Catch)
  }

  /// Number of open catch scopes.
  pub fn try_catch_count(&self) -> usize {
    self
      .traps
      .borrow()
      .iter()
      .filter(|kind| **kind == TrapKind::Catch)
      .count()
  }

  pub fn has_pending_exception(&self) -> bool {
    self.env().map_or(false, |env| env.exception_check())
  }

  /// The pending exception as a handle in the current scope.
  pub fn pending_exception(&self) -> Result<Option<Handle>, BridgeError> {
    let env = self.env()?;
    match env.exception_occurred() {
      Some(exception) => self.from_foreign(Some(exception)).map(Some),
      None => Ok(None),
    }
  }

  pub fn clear_pending_exception(&self) -> Result<(), BridgeError> {
    self.env()?.exception_clear();
    Ok(())
  }

  /// Throws `exception` in the managed runtime. Returns `undefined`, like the embedding API.
  pub fn throw_exception(&self, exception: Handle) -> Result<Handle, BridgeError> {
    let foreign = self.foreign_ref(exception)?;
    self.call_void(AccessMethod::IsolateThrowException, &[Arg::Ref(foreign)])?;
    Ok(self.singletons.undefined)
  }

  pub fn add_message_listener(&self, listener: MessageListener) {
    self.message_listeners.borrow_mut().push(listener);
  }

  pub fn remove_message_listeners(&self, listener: MessageListener) {
    self
      .message_listeners
      .borrow_mut()
      .retain(|registered| *registered as usize != listener as usize);
  }

  pub(crate) fn report_message(&self, exception: Handle) {
    let listeners = self.message_listeners.borrow().clone();
    if listeners.is_empty() {
      tracing::error!(?exception, "uncaught exception");
    }
    for listener in listeners {
      listener(self, exception);
    }
  }

  /// Clears the pending exception and hands it to the message listeners.
  pub(crate) fn report_uncaught_exception(&self) -> Result<(), BridgeError> {
    let env = self.env()?;
    let exception = env.exception_occurred();
    env.exception_clear();
    let scope = HandleScope::new(self);
    let exception = self.from_foreign(exception)?;
    self.report_message(exception);
    drop(scope);
    if self.options.abort_on_uncaught_exception {
      fatal_error("Isolate::run_microtasks", "uncaught exception");
    }
    Ok(())
  }

  /// Installs (or removes) the promise rejection callback. The managed side is only told when
  /// the callback appears or disappears.
  pub fn set_promise_reject_callback(
    &self,
    callback: Option<PromiseRejectCallback>,
  ) -> Result<(), BridgeError> {
    let was_set = self.promise_reject_callback.get().is_some();
    if was_set != callback.is_some() {
      self.call_void(
        AccessMethod::IsolateEnablePromiseRejectCallback,
        &[Arg::Bool(callback.is_some())],
      )?;
    }
    self.promise_reject_callback.set(callback);
    Ok(())
  }

  /// Entry point for the managed side: `promise` was rejected with `value`.
  pub fn notify_promise_reject(&self, promise: Handle, value: Handle) {
    if let Some(callback) = self.promise_reject_callback.get() {
      callback(self, promise, value);
    }
  }
}

/// A native catch scope.
///
/// While it is open, exceptions thrown by gateway calls stay pending and can be inspected. When it
/// is dropped, a caught exception is cleared (after being reported, if the scope is verbose)
/// unless [`TryCatch::rethrow`] was called. An exception already pending when the scope opens
/// belongs to an outer scope and is left alone.
pub struct TryCatch<'i> {
  isolate: &'i Isolate,
  _trap: TrapGuard<'i>,
  verbose: bool,
  rethrow: bool,
}

impl<'i> TryCatch<'i> {
  pub fn new(isolate: &'i Isolate) -> Self {
    Self {
      isolate,
      _trap: isolate.push_trap(TrapKind::Catch),
      verbose: false,
      rethrow: isolate.has_pending_exception(),
    }
  }

  pub fn has_caught(&self) -> bool {
    self.isolate.has_pending_exception()
  }

  /// The caught exception, as a handle in the current scope.
  pub fn exception(&self) -> Result<Option<Handle>, BridgeError> {
    self.isolate.pending_exception()
  }

  /// Whether the caught exception is the managed runtime's termination signal.
  pub fn has_terminated(&self) -> Result<bool, BridgeError> {
    let env = self.isolate.env()?;
    let Some(exception) = env.exception_occurred() else {
      return Ok(false);
    };
    let terminated = self
      .isolate
      .call(AccessMethod::TryCatchHasTerminated, &[Arg::Ref(Some(exception))])?
      .into_bool(AccessMethod::TryCatchHasTerminated);
    env.delete_local_ref(exception);
    terminated
  }

  /// Lets the caught exception propagate past this scope.
  pub fn rethrow(&mut self) -> Handle {
    self.rethrow = true;
    self.isolate.undefined()
  }

  /// Clears the caught exception.
  pub fn reset(&mut self) {
    let _ = self.isolate.clear_pending_exception();
  }

  pub fn set_verbose(&mut self, verbose: bool) {
    self.verbose = verbose;
  }

  pub fn is_verbose(&self) -> bool {
    self.verbose
  }
}

impl Drop for TryCatch<'_> {
  fn drop(&mut self) {
    if self.rethrow || !self.has_caught() {
      return;
    }
    if self.verbose {
      let scope = HandleScope::new(self.isolate);
      if let Ok(Some(exception)) = self.isolate.pending_exception() {
        self.isolate.report_message(exception);
      }
      drop(scope);
    }
    let _ = self.isolate.clear_pending_exception();
  }
}
