use std::fmt::Display;

/// Errors produced by the bridge itself.
///
/// Script-level exceptions raised by the managed runtime are not represented here: they stay
/// pending on the calling thread's execution state until a catch scope or the embedder clears
/// them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
  /// A named operation (or the shared scratch region) could not be resolved against the managed
  /// runtime's binding surface.
  #[error("missing managed binding `{name}`")]
  MissingBinding { name: &'static str },

  /// The managed runtime refused to attach the current thread or to create its access object.
  #[error("failed to attach to the managed runtime: {0}")]
  AttachFailed(String),

  /// The isolate has already been disposed; the call surface is gone.
  #[error("isolate is disposed")]
  Disposed,

  /// A handle was used after it was recycled (or belongs to another isolate).
  #[error("invalid handle")]
  InvalidHandle,

  /// `reference_removed` was called on a handle whose reference count is already zero.
  #[error("reference count underflow")]
  RefCountUnderflow,

  /// `handle_scope_exit` was called without a matching `handle_scope_enter`.
  #[error("handle scope underflow")]
  ScopeUnderflow,

  /// `context_exit` was called with a context that is not the top of the context stack.
  #[error("exited context does not match the current context")]
  ContextMismatch,

  /// `context_exit` was called while no context was entered.
  #[error("context stack is empty")]
  ContextStackEmpty,

  /// A scratch-buffer access would run past the end of the shared region.
  #[error("scratch buffer overflow: {width} bytes at position {position} exceed length {len}")]
  ScratchBufferOverflow {
    position: usize,
    width: usize,
    len: usize,
  },

  /// A gateway call returned a value of a different shape than its signature declares.
  #[error("unexpected return shape from `{0}`")]
  UnexpectedReturn(&'static str),

  /// The handle does not wrap the kind of value the operation requires.
  #[error("handle is not a {expected}")]
  WrongKind { expected: &'static str },

  /// A weak reference was requested for a handle that is not global.
  #[error("only global handles can be made weak")]
  NotGlobal,

  /// No isolate is entered on the current thread.
  #[error("no isolate is entered on this thread")]
  NoCurrentIsolate,

  /// `exit` was called on an isolate that is not the current isolate of this thread.
  #[error("isolate is not the current isolate of this thread")]
  NotCurrent,
}

/// Reports an unrecoverable bridge failure and terminates the process.
///
/// The bridge has no degraded mode: a failed binding resolution or a failing teardown leaves the
/// native side without a usable call surface.
pub fn fatal_error(location: &str, message: impl Display) -> ! {
  tracing::error!(%location, %message, "fatal error");
  eprintln!("\n#\n# Fatal error in {location}\n# {message}\n#\n");
  std::process::exit(1)
}
