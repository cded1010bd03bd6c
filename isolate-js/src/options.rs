use crate::pool::DEFAULT_POOL_CAPACITY;

/// Environment variable holding the native stack size (in bytes) used by the stack overflow check.
pub const STACK_SIZE_ENV: &str = "NODE_STACK_SIZE";
/// Environment variable enabling the post-call internal error check.
pub const INTERNAL_ERROR_CHECK_ENV: &str = "ISOLATE_JS_INTERNAL_ERROR_CHECK";

/// Headroom kept below the configured stack size for the bridge's own frames.
pub const STACK_SIZE_RESERVE: usize = 150_000;

#[derive(Debug, Clone)]
pub struct IsolateOptions {
  /// Capacity of each wrapper pool.
  pub pool_capacity: usize,
  /// Forward any pending exception to the managed side after every gateway call.
  pub internal_error_check: bool,
  /// Native stack size in bytes. The stack overflow check is disabled when `None`.
  pub stack_size: Option<usize>,
  /// Terminate the process when an exception escapes the microtask drain.
  pub abort_on_uncaught_exception: bool,
  /// Whether this is the main isolate; passed to the managed side as the exit flag on dispose.
  pub main: bool,
  /// Arguments handed to the managed side when the access object is created.
  pub startup_args: Vec<String>,
}

impl Default for IsolateOptions {
  fn default() -> Self {
    Self {
      pool_capacity: DEFAULT_POOL_CAPACITY,
      internal_error_check: false,
      stack_size: None,
      abort_on_uncaught_exception: false,
      main: true,
      startup_args: Vec::new(),
    }
  }
}

impl IsolateOptions {
  /// Defaults, overridden by the process environment.
  pub fn from_env() -> Self {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Like [`IsolateOptions::from_env`], reading variables through `lookup`.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
    let mut options = Self::default();
    options.stack_size = lookup(STACK_SIZE_ENV)
      .and_then(|raw| raw.trim().parse::<usize>().ok())
      .filter(|size| *size > 0);
    options.internal_error_check = lookup(INTERNAL_ERROR_CHECK_ENV)
      .map(|raw| matches!(raw.trim(), "1" | "true" | "TRUE" | "yes"))
      .unwrap_or(false);
    options
  }

  /// The maximum distance from the recorded stack bottom before script-visible stack overflow is
  /// raised.
  pub fn stack_limit(&self) -> Option<usize> {
    self
      .stack_size
      .map(|size| size.saturating_sub(STACK_SIZE_RESERVE))
  }
}
