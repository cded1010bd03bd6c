//! GC prologue/epilogue callbacks.
//!
//! The managed collector does not expose its phases, so every notification is reported as a
//! forced full collection.

use core::fmt;

use crate::gateway::AccessMethod;
use crate::BridgeError;
use crate::Isolate;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GcType {
  Scavenge,
  MarkSweepCompact,
  IncrementalMarking,
  ProcessWeakCallbacks,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct GcCallbackFlags(u32);

impl GcCallbackFlags {
  pub const NONE: GcCallbackFlags = GcCallbackFlags(0);
  pub const CONSTRUCT_RETAINED_OBJECT_INFOS: GcCallbackFlags = GcCallbackFlags(1 << 1);
  pub const FORCED: GcCallbackFlags = GcCallbackFlags(1 << 2);
  pub const SYNCHRONOUS_PHANTOM_CALLBACK_PROCESSING: GcCallbackFlags = GcCallbackFlags(1 << 3);

  #[inline]
  pub fn bits(self) -> u32 {
    self.0
  }

  #[inline]
  pub fn contains(self, other: GcCallbackFlags) -> bool {
    self.0 & other.0 == other.0
  }
}

pub type IsolateGcCallback = fn(&Isolate, GcType, GcCallbackFlags);
pub type IsolateGcCallbackWithData = fn(&Isolate, GcType, GcCallbackFlags, usize);
pub type GlobalGcCallback = fn(GcType, GcCallbackFlags);

/// A registered callback together with the calling convention it expects.
#[derive(Clone, Copy)]
pub enum GcCallback {
  Isolate(IsolateGcCallback),
  IsolateWithData(IsolateGcCallbackWithData, usize),
  Global(GlobalGcCallback),
}

impl GcCallback {
  /// The function address; registrations are matched by it alone.
  fn address(&self) -> usize {
    match *self {
      GcCallback::Isolate(f) => f as usize,
      GcCallback::IsolateWithData(f, _) => f as usize,
      GcCallback::Global(f) => f as usize,
    }
  }

  fn invoke(&self, isolate: &Isolate, gc_type: GcType, flags: GcCallbackFlags) {
    match *self {
      GcCallback::Isolate(f) => f(isolate, gc_type, flags),
      GcCallback::IsolateWithData(f, data) => f(isolate, gc_type, flags, data),
      GcCallback::Global(f) => f(gc_type, flags),
    }
  }
}

impl fmt::Debug for GcCallback {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let kind = match self {
      GcCallback::Isolate(_) => "Isolate",
      GcCallback::IsolateWithData(..) => "IsolateWithData",
      GcCallback::Global(_) => "Global",
    };
    write!(f, "GcCallback::{kind}({:#x})", self.address())
  }
}

#[derive(Default, Debug)]
pub(crate) struct GcCallbackList {
  entries: Vec<GcCallback>,
}

impl GcCallbackList {
  pub fn add(&mut self, callback: GcCallback) {
    self.entries.push(callback);
  }

  /// Removes every registration of `callback`'s function. Order is not preserved.
  pub fn remove(&mut self, callback: GcCallback) {
    let address = callback.address();
    let mut i = 0;
    while i < self.entries.len() {
      if self.entries[i].address() == address {
        self.entries.swap_remove(i);
      } else {
        i += 1;
      }
    }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn snapshot(&self) -> Vec<GcCallback> {
    self.entries.clone()
  }
}

impl Isolate {
  pub fn add_gc_prologue_callback(&self, callback: GcCallback) {
    self.gc_prologue_callbacks.borrow_mut().add(callback);
  }

  pub fn remove_gc_prologue_callback(&self, callback: GcCallback) {
    self.gc_prologue_callbacks.borrow_mut().remove(callback);
  }

  pub fn add_gc_epilogue_callback(&self, callback: GcCallback) {
    self.gc_epilogue_callbacks.borrow_mut().add(callback);
  }

  pub fn remove_gc_epilogue_callback(&self, callback: GcCallback) {
    self.gc_epilogue_callbacks.borrow_mut().remove(callback);
  }

  pub fn gc_callback_counts(&self) -> (usize, usize) {
    (
      self.gc_prologue_callbacks.borrow().len(),
      self.gc_epilogue_callbacks.borrow().len(),
    )
  }

  /// Invokes the prologue (or epilogue) callbacks in registration order.
  ///
  /// This is also the entry point the managed runtime uses around its own collections.
  pub fn notify_gc_callbacks(&self, prologue: bool) {
    let callbacks = if prologue {
      self.gc_prologue_callbacks.borrow().snapshot()
    } else {
      self.gc_epilogue_callbacks.borrow().snapshot()
    };
    for callback in callbacks {
      callback.invoke(self, GcType::MarkSweepCompact, GcCallbackFlags::FORCED);
    }
  }

  /// Asks the managed runtime for a full collection, bracketed by the GC callbacks.
  pub fn request_garbage_collection(&self) -> Result<(), BridgeError> {
    self.notify_gc_callbacks(true);
    self.call_void(AccessMethod::IsolatePerformGc, &[])?;
    self.notify_gc_callbacks(false);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::sync::atomic::Ordering;

  static CALLS: AtomicUsize = AtomicUsize::new(0);

  fn first(_: GcType, _: GcCallbackFlags) {
    CALLS.fetch_add(1, Ordering::Relaxed);
  }
  fn second(_: GcType, _: GcCallbackFlags) {
    CALLS.fetch_add(2, Ordering::Relaxed);
  }
  fn with_data(_: &Isolate, _: GcType, _: GcCallbackFlags, data: usize) {
    CALLS.fetch_add(data, Ordering::Relaxed);
  }

  #[test]
  fn remove_drops_every_registration_of_the_function() {
    let mut list = GcCallbackList::default();
    list.add(GcCallback::Global(first));
    list.add(GcCallback::Global(second));
    list.add(GcCallback::Global(first));
    list.add(GcCallback::IsolateWithData(with_data, 1));
    list.add(GcCallback::IsolateWithData(with_data, 2));

    list.remove(GcCallback::Global(first));
    assert_eq!(list.len(), 3);
    list.remove(GcCallback::IsolateWithData(with_data, 0));
    assert_eq!(list.len(), 1);
    assert!(matches!(list.snapshot()[0], GcCallback::Global(_)));
  }

  #[test]
  fn forced_flag_is_reported() {
    assert!(GcCallbackFlags::FORCED.contains(GcCallbackFlags::FORCED));
    assert!(!GcCallbackFlags::NONE.contains(GcCallbackFlags::FORCED));
  }
}
