use core::fmt;

use crate::foreign::ForeignRef;
use crate::foreign::ManagedEnv;
use crate::value::Wrapper;
use crate::BridgeError;

/// A stable identifier for a handle slot in an isolate's handle table.
///
/// This is a packed `{ index: u32, generation: u32 }`. The generation is incremented every time
/// the slot is recycled, so stale handles are detected instead of aliasing a newer handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct HandleId(u64);

impl HandleId {
  fn from_parts(index: u32, generation: u32) -> Self {
    Self((index as u64) | ((generation as u64) << 32))
  }

  #[inline]
  pub fn index(self) -> u32 {
    self.0 as u32
  }

  #[inline]
  pub fn generation(self) -> u32 {
    (self.0 >> 32) as u32
  }
}

impl fmt::Debug for HandleId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HandleId")
      .field("index", &self.index())
      .field("generation", &self.generation())
      .finish()
  }
}

/// A native-side proxy for one value living in the managed runtime.
///
/// `Handle` is a plain identifier; its lifetime is governed by the reference count kept in the
/// isolate's handle table (see [`Isolate::reference_added`](crate::Isolate::reference_added)).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct Handle(pub(crate) HandleId);

impl Handle {
  #[inline]
  pub fn id(self) -> HandleId {
    self.0
  }
}

/// How a handle holds its foreign reference.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RefKind {
  /// Bound to the handle scope that created it.
  Local,
  /// Outlives handle scopes; released explicitly.
  Global,
  /// Like `Global`, but does not keep the referent alive.
  GlobalWeak,
}

/// The state behind one handle slot.
#[derive(Debug)]
pub(crate) struct HandleEntry {
  pub foreign: Option<ForeignRef>,
  pub ref_kind: RefKind,
  pub ref_count: u32,
  pub wrapper: Wrapper,
}

impl HandleEntry {
  pub fn new(foreign: Option<ForeignRef>, ref_kind: RefKind, wrapper: Wrapper) -> Self {
    Self {
      foreign,
      ref_kind,
      ref_count: 0,
      wrapper,
    }
  }

  /// Prepares a pooled entry for reuse. Every field is overwritten, including any cached scalar.
  pub fn reinitialize(&mut self, foreign: Option<ForeignRef>, ref_kind: RefKind, wrapper: Wrapper) {
    self.foreign = foreign;
    self.ref_kind = ref_kind;
    self.ref_count = 0;
    self.wrapper = wrapper;
  }

  /// Global → weak. Returns whether a transition happened. Local handles must be copied to a
  /// global one first.
  pub fn make_weak(&mut self, env: &dyn ManagedEnv) -> Result<bool, BridgeError> {
    match self.ref_kind {
      RefKind::GlobalWeak => return Ok(false),
      RefKind::Local => return Err(BridgeError::NotGlobal),
      RefKind::Global => {}
    }
    if let Some(strong) = self.foreign {
      self.foreign = env.new_weak_global_ref(strong);
      env.delete_global_ref(strong);
    }
    self.ref_kind = RefKind::GlobalWeak;
    Ok(true)
  }

  /// Weak → global. Returns whether a transition happened.
  pub fn clear_weak(&mut self, env: &dyn ManagedEnv) -> bool {
    if self.ref_kind != RefKind::GlobalWeak {
      return false;
    }
    if let Some(weak) = self.foreign {
      self.foreign = env.new_global_ref(weak);
      env.delete_weak_global_ref(weak);
    }
    self.ref_kind = RefKind::Global;
    true
  }

  /// Releases the foreign reference with the primitive matching its kind.
  pub fn release(&mut self, env: &dyn ManagedEnv) {
    if let Some(foreign) = self.foreign.take() {
      match self.ref_kind {
        RefKind::Local => env.delete_local_ref(foreign),
        RefKind::Global => env.delete_global_ref(foreign),
        RefKind::GlobalWeak => env.delete_weak_global_ref(foreign),
      }
    }
  }
}

struct Slot {
  generation: u32,
  entry: Option<Box<HandleEntry>>,
}

/// Generation-checked storage for live handles.
#[derive(Default)]
pub(crate) struct HandleTable {
  slots: Vec<Slot>,
  free: Vec<u32>,
  live: usize,
}

impl HandleTable {
  pub fn insert(&mut self, entry: Box<HandleEntry>) -> Handle {
    self.live += 1;
    if let Some(index) = self.free.pop() {
      let slot = &mut self.slots[index as usize];
      debug_assert!(slot.entry.is_none());
      slot.entry = Some(entry);
      return Handle(HandleId::from_parts(index, slot.generation));
    }
    let index = self.slots.len() as u32;
    self.slots.push(Slot {
      generation: 0,
      entry: Some(entry),
    });
    Handle(HandleId::from_parts(index, 0))
  }

  pub fn get(&self, handle: Handle) -> Result<&HandleEntry, BridgeError> {
    let id = handle.id();
    match self.slots.get(id.index() as usize) {
      Some(Slot {
        generation,
        entry: Some(entry),
      }) if *generation == id.generation() => Ok(&**entry),
      _ => Err(BridgeError::InvalidHandle),
    }
  }

  pub fn get_mut(&mut self, handle: Handle) -> Result<&mut HandleEntry, BridgeError> {
    let id = handle.id();
    match self.slots.get_mut(id.index() as usize) {
      Some(Slot {
        generation,
        entry: Some(entry),
      }) if *generation == id.generation() => Ok(&mut **entry),
      _ => Err(BridgeError::InvalidHandle),
    }
  }

  pub fn remove(&mut self, handle: Handle) -> Result<Box<HandleEntry>, BridgeError> {
    let id = handle.id();
    let slot = self
      .slots
      .get_mut(id.index() as usize)
      .filter(|slot| slot.generation == id.generation() && slot.entry.is_some())
      .ok_or(BridgeError::InvalidHandle)?;
    let entry = slot.entry.take().ok_or(BridgeError::InvalidHandle)?;
    slot.generation = slot.generation.wrapping_add(1);
    self.free.push(id.index());
    self.live -= 1;
    Ok(entry)
  }

  #[inline]
  pub fn is_valid(&self, handle: Handle) -> bool {
    self.get(handle).is_ok()
  }

  #[inline]
  pub fn live(&self) -> usize {
    self.live
  }

  /// Removes every live entry, invalidating all outstanding handles.
  pub fn drain(&mut self) -> Vec<Box<HandleEntry>> {
    let mut out = Vec::with_capacity(self.live);
    for (index, slot) in self.slots.iter_mut().enumerate() {
      if let Some(entry) = slot.entry.take() {
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index as u32);
        out.push(entry);
      }
    }
    self.live = 0;
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry() -> Box<HandleEntry> {
    Box::new(HandleEntry::new(None, RefKind::Local, Wrapper::Object))
  }

  #[test]
  fn removed_handles_become_stale_when_the_slot_is_reused() {
    let mut table = HandleTable::default();
    let a = table.insert(entry());
    table.remove(a).unwrap();
    let b = table.insert(entry());
    assert_eq!(a.id().index(), b.id().index());
    assert_ne!(a, b);
    assert_eq!(table.get(a).unwrap_err(), BridgeError::InvalidHandle);
    assert!(table.is_valid(b));
    assert_eq!(table.live(), 1);
  }

  #[test]
  fn drain_invalidates_everything() {
    let mut table = HandleTable::default();
    let handles: Vec<_> = (0..4).map(|_| table.insert(entry())).collect();
    assert_eq!(table.drain().len(), 4);
    assert_eq!(table.live(), 0);
    for handle in handles {
      assert!(!table.is_valid(handle));
    }
  }
}
