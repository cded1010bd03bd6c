//! Handle scopes and the context stack.
//!
//! The handle-scope stack is a flat `Vec<Option<Handle>>`: `None` marks where a scope begins, and
//! exiting a scope pops (and releases) everything down to and including its marker. This is the
//! same discipline as a stack-allocated arena: scopes are strictly nested and released LIFO.

use crate::handle::Handle;
use crate::BridgeError;
use crate::Isolate;

impl Isolate {
  pub fn handle_scope_enter(&self) {
    self.handle_scopes.borrow_mut().push(None);
    self.handle_scope_depth.set(self.handle_scope_depth.get() + 1);
  }

  /// Adds a reference to `handle` owned by the innermost scope.
  pub fn handle_scope_reference(&self, handle: Handle) -> Result<(), BridgeError> {
    if self.handle_scope_depth() == 0 {
      tracing::warn!(?handle, "handle scope reference without an open handle scope");
      return Err(BridgeError::ScopeUnderflow);
    }
    self.reference_added(handle)?;
    self.handle_scopes.borrow_mut().push(Some(handle));
    Ok(())
  }

  /// Closes the innermost scope, releasing every reference it holds.
  pub fn handle_scope_exit(&self) -> Result<(), BridgeError> {
    let released = {
      let mut stack = self.handle_scopes.borrow_mut();
      let Some(start) = stack.iter().rposition(Option::is_none) else {
        tracing::warn!("handle scope exit without a matching enter");
        return Err(BridgeError::ScopeUnderflow);
      };
      stack.split_off(start)
    };
    self.handle_scope_depth.set(self.handle_scope_depth.get() - 1);
    let mut result = Ok(());
    for handle in released.into_iter().flatten() {
      if let Err(err) = self.reference_removed(handle) {
        result = Err(err);
      }
    }
    result
  }

  /// Number of open handle scopes.
  #[inline]
  pub fn handle_scope_depth(&self) -> usize {
    self.handle_scope_depth.get()
  }

  /// Length of the handle-scope stack, scope markers included.
  pub fn handle_scope_len(&self) -> usize {
    self.handle_scopes.borrow().len()
  }

  /// Makes `context` the current context. The stack holds its own global copy.
  pub fn context_enter(&self, context: Handle) -> Result<(), BridgeError> {
    let global = self.copy_handle(context, true)?;
    self.contexts.borrow_mut().push(global);
    Ok(())
  }

  /// Leaves `context`, which must be the current context. On a mismatch nothing is popped.
  pub fn context_exit(&self, context: Handle) -> Result<(), BridgeError> {
    let Some(top) = self.contexts.borrow().last().copied() else {
      tracing::warn!(?context, "context exit with an empty context stack");
      return Err(BridgeError::ContextStackEmpty);
    };
    if !self.same_data(top, context)? {
      tracing::warn!(?context, ?top, "exited context does not match the current context");
      return Err(BridgeError::ContextMismatch);
    }
    self.contexts.borrow_mut().pop();
    self.reference_removed(top)
  }

  pub fn current_context(&self) -> Option<Handle> {
    self.contexts.borrow().last().copied()
  }

  pub fn context_depth(&self) -> usize {
    self.contexts.borrow().len()
  }
}

/// An RAII handle scope: entered on construction, exited on drop.
pub struct HandleScope<'i> {
  isolate: &'i Isolate,
  open: bool,
}

impl<'i> HandleScope<'i> {
  pub fn new(isolate: &'i Isolate) -> Self {
    isolate.handle_scope_enter();
    Self {
      isolate,
      open: true,
    }
  }

  #[inline]
  pub fn isolate(&self) -> &'i Isolate {
    self.isolate
  }

  /// Closes this scope and re-registers `handle` with the enclosing one, so it survives.
  pub fn escape(mut self, handle: Handle) -> Result<Handle, BridgeError> {
    if self.isolate.handle_scope_depth() < 2 {
      return Err(BridgeError::ScopeUnderflow);
    }
    self.isolate.reference_added(handle)?;
    self.open = false;
    let exited = self.isolate.handle_scope_exit();
    let moved = self.isolate.handle_scope_reference(handle);
    self.isolate.reference_removed(handle)?;
    exited?;
    moved?;
    Ok(handle)
  }
}

impl Drop for HandleScope<'_> {
  fn drop(&mut self) {
    if self.open {
      let _ = self.isolate.handle_scope_exit();
    }
  }
}

/// An RAII context scope: enters the context on construction and exits it on drop.
///
/// The scope exits with the context stack's own copy, so the handle passed to
/// [`ContextScope::new`] may be released while the scope is open.
pub struct ContextScope<'i> {
  isolate: &'i Isolate,
  context: Handle,
}

impl<'i> ContextScope<'i> {
  pub fn new(isolate: &'i Isolate, context: Handle) -> Result<Self, BridgeError> {
    isolate.context_enter(context)?;
    let context = isolate
      .current_context()
      .ok_or(BridgeError::ContextStackEmpty)?;
    Ok(Self { isolate, context })
  }

  /// The entered context, as held by the context stack.
  #[inline]
  pub fn context(&self) -> Handle {
    self.context
  }
}

impl Drop for ContextScope<'_> {
  fn drop(&mut self) {
    // Mismatches were already reported by `context_exit`.
    let _ = self.isolate.context_exit(self.context);
  }
}
