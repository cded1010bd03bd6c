//! The binding surface of the managed runtime.
//!
//! The bridge never talks to the managed runtime directly. Everything goes through two traits:
//! - [`ManagedVm`] is the process-wide runtime handle. It is `Send + Sync` and can attach any
//!   native thread.
//! - [`ManagedEnv`] is the call surface of one attached thread. It is thread-bound and must not
//!   leave the thread that attached it.
//!
//! Values living in the managed runtime are referenced through opaque [`ForeignRef`] tokens. A
//! token is always one of three reference kinds (local, global, weak global), and each kind has
//! its own release primitive. "null" is `None`.

use core::fmt;
use std::num::NonZeroU64;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::BridgeError;

/// An opaque reference to an object living in the managed runtime.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ForeignRef(NonZeroU64);

impl ForeignRef {
  #[inline]
  pub fn from_raw(raw: NonZeroU64) -> Self {
    Self(raw)
  }

  #[inline]
  pub fn raw(self) -> NonZeroU64 {
    self.0
  }
}

impl fmt::Debug for ForeignRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ForeignRef({:#x})", self.0)
  }
}

/// A resolved callable binding, valid for the lifetime of the access object it was resolved
/// against.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct MethodId(pub u32);

/// An argument passed across the boundary.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Arg {
  Ref(Option<ForeignRef>),
  Int(i32),
  Long(i64),
  Double(f64),
  Bool(bool),
}

impl From<ForeignRef> for Arg {
  fn from(r: ForeignRef) -> Self {
    Arg::Ref(Some(r))
  }
}

/// A value returned across the boundary by the "returns a value" calling shape.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Ret {
  Ref(Option<ForeignRef>),
  Int(i32),
  Long(i64),
  Double(f64),
  Bool(bool),
}

/// A raw view of the shared scratch region exported by the managed runtime.
#[derive(Clone, Copy, Debug)]
pub struct RawRegion {
  ptr: NonNull<u8>,
  len: usize,
}

impl RawRegion {
  /// # Safety
  ///
  /// `ptr` must be valid for reads and writes of `len` bytes for as long as the access object
  /// that exported it is alive, and nothing may hold a Rust reference into the region.
  pub unsafe fn new(ptr: NonNull<u8>, len: usize) -> Self {
    Self { ptr, len }
  }

  #[inline]
  pub fn ptr(&self) -> NonNull<u8> {
    self.ptr
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.len
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.len == 0
  }
}

// The region is plain memory; the single-writer/single-reader discipline is enforced by the
// isolate that owns it.
unsafe impl Send for RawRegion {}
unsafe impl Sync for RawRegion {}

/// The process-wide managed runtime.
pub trait ManagedVm: Send + Sync {
  /// Attaches the calling thread (or returns its existing attachment).
  fn attach_current_thread(&self) -> Result<Rc<dyn ManagedEnv>, BridgeError>;

  /// Detaches the calling thread. Detaching a thread that is not attached is a no-op.
  fn detach_current_thread(&self);
}

/// The call surface of one attached thread.
///
/// Calls never report script-level exceptions through their return value. A call that throws
/// leaves the exception pending on this env and returns a default-shaped value; callers check
/// [`ManagedEnv::exception_check`].
pub trait ManagedEnv {
  /// Creates the managed access object the gateway resolves its bindings against.
  fn create_access(&self, args: &[String]) -> Option<ForeignRef>;

  fn resolve_method(&self, name: &str, signature: &str) -> Option<MethodId>;

  /// The scratch region belonging to `access`.
  fn shared_buffer(&self, access: ForeignRef) -> Option<RawRegion>;

  fn call(&self, receiver: ForeignRef, method: MethodId, args: &[Arg]) -> Ret;

  fn call_void(&self, receiver: ForeignRef, method: MethodId, args: &[Arg]);

  fn new_local_ref(&self, obj: ForeignRef) -> Option<ForeignRef>;
  fn delete_local_ref(&self, obj: ForeignRef);
  fn new_global_ref(&self, obj: ForeignRef) -> Option<ForeignRef>;
  fn delete_global_ref(&self, obj: ForeignRef);
  fn new_weak_global_ref(&self, obj: ForeignRef) -> Option<ForeignRef>;
  fn delete_weak_global_ref(&self, obj: ForeignRef);

  /// Identity comparison. A weak reference whose referent was collected is the same as `None`.
  fn is_same_object(&self, a: Option<ForeignRef>, b: Option<ForeignRef>) -> bool;

  /// Creates a managed string and returns a local reference to it.
  fn new_string(&self, value: &str) -> Option<ForeignRef>;

  /// The UTF-8 contents of a managed string, or `None` if `obj` is not a string.
  fn string_utf8(&self, obj: ForeignRef) -> Option<String>;

  fn exception_check(&self) -> bool;
  /// A local reference to the pending exception, if any.
  fn exception_occurred(&self) -> Option<ForeignRef>;
  fn exception_clear(&self);
  /// Makes `exception` the pending exception of this thread.
  fn throw(&self, exception: ForeignRef);
}
