//! An in-process managed runtime.
//!
//! [`InProcessVm`] implements the binding surface over a small simulated heap. It keeps exact
//! books on every reference it hands out (per kind), on every call made through the gateway, and
//! on the pending exception of each thread. It is what the crate's own tests run against, and
//! embedders can use it to test code written on top of the bridge without a managed runtime.

use std::num::NonZeroU64;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::ThreadId;

use ahash::AHashMap;
use ahash::AHashSet;
use parking_lot::Mutex;

use crate::foreign::Arg;
use crate::foreign::ForeignRef;
use crate::foreign::ManagedEnv;
use crate::foreign::ManagedVm;
use crate::foreign::MethodId;
use crate::foreign::RawRegion;
use crate::foreign::Ret;
use crate::gateway::AccessMethod;
use crate::handle::RefKind;
use crate::value_type::BufferStorage;
use crate::value_type::ElementKind;
use crate::value_type::ValueType;
use crate::BridgeError;

/// Size of each access object's scratch region, in bytes.
pub const SCRATCH_REGION_LEN: usize = 256;

/// Description of the exception raised by the managed stack overflow check.
pub const STACK_OVERFLOW_MESSAGE: &str = "RangeError: Maximum call stack size exceeded";

/// A value in the simulated heap.
#[derive(Clone, Debug, PartialEq)]
pub enum SimValue {
  Undefined,
  Null,
  Boolean(bool),
  Number(f64),
  String(String),
  /// A string the engine has not flattened yet.
  LazyString(String),
  External(usize),
  Symbol(String),
  BigInt(i64),
  Object,
  Function,
  Array(u32),
  Date(f64),
  RegExp,
  Map,
  Set,
  Promise,
  Proxy,
  ArrayBuffer {
    storage: BufferStorage,
    byte_length: i32,
  },
  /// A view the engine reports without its concrete kind.
  ArrayBufferView {
    byte_length: i32,
    byte_offset: i32,
  },
  TypedArray {
    element: ElementKind,
    storage: BufferStorage,
    byte_length: i32,
    byte_offset: i32,
  },
  DataView {
    byte_length: i32,
    byte_offset: i32,
  },
  Context,
  /// A value kind the bridge does not know, reported with an arbitrary tag.
  Opaque {
    tag: i32,
    description: String,
  },
  /// The engine's termination signal, as seen by catch scopes.
  Termination,
  /// The access object bindings are resolved against.
  Access,
}

impl SimValue {
  fn tag(&self) -> i32 {
    let ty = match self {
      SimValue::Undefined => ValueType::Undefined,
      SimValue::Null => ValueType::Null,
      SimValue::Boolean(true) => ValueType::True,
      SimValue::Boolean(false) => ValueType::False,
      SimValue::Number(_) => ValueType::Number,
      SimValue::String(_) => ValueType::String,
      SimValue::LazyString(_) => ValueType::LazyString,
      SimValue::External(_) => ValueType::External,
      SimValue::Symbol(_) => ValueType::Symbol,
      SimValue::BigInt(_) => ValueType::BigInt,
      SimValue::Function => ValueType::Function,
      SimValue::Array(_) => ValueType::Array,
      SimValue::Date(_) => ValueType::Date,
      SimValue::RegExp => ValueType::RegExp,
      SimValue::Map => ValueType::Map,
      SimValue::Set => ValueType::Set,
      SimValue::Promise => ValueType::Promise,
      SimValue::Proxy => ValueType::Proxy,
      SimValue::ArrayBuffer { storage, .. } => ValueType::ArrayBuffer(*storage),
      SimValue::ArrayBufferView { .. } => ValueType::ArrayBufferView,
      SimValue::TypedArray {
        element, storage, ..
      } => ValueType::TypedArray(*element, *storage),
      SimValue::DataView { .. } => ValueType::DataView,
      SimValue::Opaque { tag, .. } => return *tag,
      SimValue::Object | SimValue::Context | SimValue::Termination | SimValue::Access => {
        ValueType::Object
      }
    };
    ty.tag()
  }

  fn view_range(&self) -> Option<(i32, i32)> {
    match *self {
      SimValue::ArrayBufferView {
        byte_length,
        byte_offset,
      }
      | SimValue::TypedArray {
        byte_length,
        byte_offset,
        ..
      }
      | SimValue::DataView {
        byte_length,
        byte_offset,
      } => Some((byte_length, byte_offset)),
      _ => None,
    }
  }
}

/// Work queued on the simulated engine's own microtask queue.
#[derive(Clone, Debug, PartialEq)]
pub enum ManagedJob {
  /// Completes normally.
  Run,
  /// Throws the given value.
  Throw(SimValue),
}

struct SimObject {
  value: SimValue,
  collected: bool,
  /// For contexts, the global object.
  global: Option<u32>,
}

#[derive(Clone, Copy)]
struct RefRecord {
  object: u32,
  kind: RefKind,
}

/// A heap allocation handed to the bridge as a raw scratch region.
struct OwnedRegion {
  words: NonNull<u64>,
  len_words: usize,
}

impl OwnedRegion {
  fn new(len: usize) -> Self {
    let len_words = len.div_ceil(8);
    let boxed: Box<[u64]> = vec![0u64; len_words].into_boxed_slice();
    let raw = Box::into_raw(boxed) as *mut u64;
    Self {
      // SAFETY: `Box::into_raw` never returns null.
      words: unsafe { NonNull::new_unchecked(raw) },
      len_words,
    }
  }

  fn raw(&self) -> RawRegion {
    // SAFETY: the allocation lives until the simulated runtime is dropped and is only accessed
    // through raw pointers.
    unsafe { RawRegion::new(self.words.cast::<u8>(), self.len_words * 8) }
  }

  fn write(&self, offset: usize, bytes: &[u8]) {
    assert!(offset + bytes.len() <= self.len_words * 8);
    // SAFETY: bounds checked above; the region is plain bytes.
    unsafe {
      std::ptr::copy_nonoverlapping(
        bytes.as_ptr(),
        self.words.cast::<u8>().as_ptr().add(offset),
        bytes.len(),
      )
    };
  }
}

impl Drop for OwnedRegion {
  fn drop(&mut self) {
    // SAFETY: reconstructs the box leaked in `new`.
    unsafe {
      drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
        self.words.as_ptr(),
        self.len_words,
      )))
    };
  }
}

// Only the raw pointer keeps this from being automatically `Send`/`Sync`; all access goes through
// the runtime's mutex or the owning isolate's thread.
unsafe impl Send for OwnedRegion {}
unsafe impl Sync for OwnedRegion {}

struct SimState {
  objects: Vec<SimObject>,
  refs: AHashMap<u64, RefRecord>,
  next_ref: u64,
  regions: AHashMap<u32, OwnedRegion>,
  missing: AHashSet<String>,
  undefined: u32,
  null: u32,
  true_value: u32,
  false_value: u32,
  placeholders: [u32; 3],
  attached: AHashSet<ThreadId>,
  attach_count: usize,
  pending: AHashMap<ThreadId, u32>,
  calls: AHashMap<&'static str, usize>,
  invalid_releases: usize,
  terminate_requested: bool,
  interrupt_requests: usize,
  managed_jobs: Vec<ManagedJob>,
  managed_jobs_run: usize,
  microtask_drains: usize,
  gc_count: usize,
  internal_error_checks: usize,
  promise_reject_enabled: bool,
  weak_registrations: AHashMap<i64, u32>,
  weak_notifications: Vec<i64>,
  disposed_with: Option<(bool, i32)>,
}

impl SimState {
  fn new(missing: AHashSet<String>) -> Self {
    let mut state = Self {
      objects: Vec::new(),
      refs: AHashMap::new(),
      next_ref: 1,
      regions: AHashMap::new(),
      missing,
      undefined: 0,
      null: 0,
      true_value: 0,
      false_value: 0,
      placeholders: [0; 3],
      attached: AHashSet::new(),
      attach_count: 0,
      pending: AHashMap::new(),
      calls: AHashMap::new(),
      invalid_releases: 0,
      terminate_requested: false,
      interrupt_requests: 0,
      managed_jobs: Vec::new(),
      managed_jobs_run: 0,
      microtask_drains: 0,
      gc_count: 0,
      internal_error_checks: 0,
      promise_reject_enabled: false,
      weak_registrations: AHashMap::new(),
      weak_notifications: Vec::new(),
      disposed_with: None,
    };
    state.undefined = state.alloc(SimValue::Undefined);
    state.null = state.alloc(SimValue::Null);
    state.true_value = state.alloc(SimValue::Boolean(true));
    state.false_value = state.alloc(SimValue::Boolean(false));
    state.placeholders = [
      state.alloc(SimValue::Number(0.0)),
      state.alloc(SimValue::Number(0.0)),
      state.alloc(SimValue::Number(0.0)),
    ];
    state
  }

  fn alloc(&mut self, value: SimValue) -> u32 {
    self.objects.push(SimObject {
      value,
      collected: false,
      global: None,
    });
    (self.objects.len() - 1) as u32
  }

  fn new_ref(&mut self, object: u32, kind: RefKind) -> ForeignRef {
    let token = self.next_ref;
    self.next_ref += 1;
    self.refs.insert(token, RefRecord { object, kind });
    // `next_ref` starts at 1 and only grows.
    ForeignRef::from_raw(NonZeroU64::new(token).unwrap_or(NonZeroU64::MIN))
  }

  fn alloc_local(&mut self, value: SimValue) -> ForeignRef {
    let object = self.alloc(value);
    self.new_ref(object, RefKind::Local)
  }

  /// The object a reference points at; `None` for unknown references and cleared weak ones.
  fn object_of(&self, r: ForeignRef) -> Option<u32> {
    let record = self.refs.get(&r.raw().get())?;
    if record.kind == RefKind::GlobalWeak && self.objects[record.object as usize].collected {
      return None;
    }
    Some(record.object)
  }

  fn value_of(&self, r: Option<ForeignRef>) -> Option<&SimValue> {
    let object = self.object_of(r?)?;
    Some(&self.objects[object as usize].value)
  }

  fn delete_ref(&mut self, r: ForeignRef, kind: RefKind) {
    match self.refs.get(&r.raw().get()) {
      Some(record) if record.kind == kind => {
        self.refs.remove(&r.raw().get());
      }
      _ => self.invalid_releases += 1,
    }
  }

  fn live_refs(&self, kind: RefKind) -> usize {
    self.refs.values().filter(|record| record.kind == kind).count()
  }

  /// Collects every object reachable only through weak references.
  fn collect_garbage(&mut self) {
    let mut strong = AHashSet::new();
    for record in self.refs.values() {
      if record.kind != RefKind::GlobalWeak {
        strong.insert(record.object);
      }
    }
    for record in self.refs.values() {
      if record.kind == RefKind::GlobalWeak && !strong.contains(&record.object) {
        self.objects[record.object as usize].collected = true;
      }
    }
    let mut collected: Vec<i64> = self
      .weak_registrations
      .iter()
      .filter(|(_, object)| self.objects[**object as usize].collected)
      .map(|(id, _)| *id)
      .collect();
    collected.sort_unstable();
    for id in &collected {
      self.weak_registrations.remove(id);
    }
    self.weak_notifications.extend(collected);
  }

  fn write_scratch(&self, access: u32, offset: usize, bytes: &[u8]) {
    if let Some(region) = self.regions.get(&access) {
      region.write(offset, bytes);
    }
  }

  fn throw(&mut self, thread: ThreadId, value: SimValue) {
    let object = self.alloc(value);
    self.pending.insert(thread, object);
  }
}

struct SimShared {
  state: Mutex<SimState>,
}

/// The simulated managed runtime.
pub struct InProcessVm {
  shared: Arc<SimShared>,
}

impl InProcessVm {
  pub fn new() -> Arc<Self> {
    Self::with_missing_bindings(&[])
  }

  /// A runtime that does not expose the named bindings.
  pub fn with_missing_bindings(names: &[&str]) -> Arc<Self> {
    let missing = names.iter().map(|name| name.to_string()).collect();
    Arc::new(Self {
      shared: Arc::new(SimShared {
        state: Mutex::new(SimState::new(missing)),
      }),
    })
  }

  /// Allocates `value` and returns a new local reference to it.
  pub fn alloc_local(&self, value: SimValue) -> ForeignRef {
    self.shared.state.lock().alloc_local(value)
  }

  /// The value behind a reference, or `None` for unknown or cleared references.
  pub fn value_of(&self, r: ForeignRef) -> Option<SimValue> {
    self.shared.state.lock().value_of(Some(r)).cloned()
  }

  /// Marks the object behind `r` as collected, clearing every weak reference to it.
  pub fn collect(&self, r: ForeignRef) {
    let mut state = self.shared.state.lock();
    if let Some(object) = state.object_of(r) {
      state.objects[object as usize].collected = true;
    }
  }

  pub fn live_local_refs(&self) -> usize {
    self.shared.state.lock().live_refs(RefKind::Local)
  }

  pub fn live_global_refs(&self) -> usize {
    self.shared.state.lock().live_refs(RefKind::Global)
  }

  pub fn live_weak_refs(&self) -> usize {
    self.shared.state.lock().live_refs(RefKind::GlobalWeak)
  }

  /// Releases of unknown references, or with the wrong release primitive.
  pub fn invalid_releases(&self) -> usize {
    self.shared.state.lock().invalid_releases
  }

  /// How often the operation with this managed-side name was called.
  pub fn call_count(&self, name: &str) -> usize {
    self
      .shared
      .state
      .lock()
      .calls
      .get(name)
      .copied()
      .unwrap_or(0)
  }

  pub fn terminate_requested(&self) -> bool {
    self.shared.state.lock().terminate_requested
  }

  pub fn interrupt_requests(&self) -> usize {
    self.shared.state.lock().interrupt_requests
  }

  /// Makes `value` the pending exception of the calling thread.
  pub fn set_pending_exception(&self, value: SimValue) {
    let thread = std::thread::current().id();
    self.shared.state.lock().throw(thread, value);
  }

  pub fn has_pending_exception(&self) -> bool {
    let thread = std::thread::current().id();
    self.shared.state.lock().pending.contains_key(&thread)
  }

  pub fn queue_managed_microtask(&self, job: ManagedJob) {
    self.shared.state.lock().managed_jobs.push(job);
  }

  pub fn managed_microtasks_run(&self) -> usize {
    self.shared.state.lock().managed_jobs_run
  }

  pub fn microtask_drains(&self) -> usize {
    self.shared.state.lock().microtask_drains
  }

  pub fn gc_count(&self) -> usize {
    self.shared.state.lock().gc_count
  }

  pub fn internal_error_checks(&self) -> usize {
    self.shared.state.lock().internal_error_checks
  }

  pub fn promise_reject_enabled(&self) -> bool {
    self.shared.state.lock().promise_reject_enabled
  }

  /// Ids whose referents were collected; the embedder forwards them to
  /// [`Isolate::notify_weak_callback`](crate::Isolate::notify_weak_callback).
  pub fn take_weak_notifications(&self) -> Vec<i64> {
    std::mem::take(&mut self.shared.state.lock().weak_notifications)
  }

  pub fn weak_registrations(&self) -> usize {
    self.shared.state.lock().weak_registrations.len()
  }

  pub fn disposed_with(&self) -> Option<(bool, i32)> {
    self.shared.state.lock().disposed_with
  }

  pub fn is_attached(&self, thread: ThreadId) -> bool {
    self.shared.state.lock().attached.contains(&thread)
  }

  pub fn attached_threads(&self) -> usize {
    self.shared.state.lock().attached.len()
  }

  /// Number of detached → attached transitions so far.
  pub fn attach_count(&self) -> usize {
    self.shared.state.lock().attach_count
  }
}

impl ManagedVm for InProcessVm {
  fn attach_current_thread(&self) -> Result<Rc<dyn ManagedEnv>, BridgeError> {
    let thread = std::thread::current().id();
    let mut state = self.shared.state.lock();
    if state.attached.insert(thread) {
      state.attach_count += 1;
    }
    Ok(Rc::new(InProcessEnv {
      shared: self.shared.clone(),
      thread,
    }))
  }

  fn detach_current_thread(&self) {
    let thread = std::thread::current().id();
    let mut state = self.shared.state.lock();
    state.attached.remove(&thread);
    state.pending.remove(&thread);
  }
}

/// The call surface of one thread attached to an [`InProcessVm`].
pub struct InProcessEnv {
  shared: Arc<SimShared>,
  thread: ThreadId,
}

fn arg_ref(args: &[Arg], index: usize) -> Option<ForeignRef> {
  match args.get(index) {
    Some(Arg::Ref(r)) => *r,
    _ => None,
  }
}

fn arg_int(args: &[Arg], index: usize) -> i32 {
  match args.get(index) {
    Some(Arg::Int(v)) => *v,
    _ => 0,
  }
}

fn arg_long(args: &[Arg], index: usize) -> i64 {
  match args.get(index) {
    Some(Arg::Long(v)) => *v,
    _ => 0,
  }
}

fn arg_double(args: &[Arg], index: usize) -> f64 {
  match args.get(index) {
    Some(Arg::Double(v)) => *v,
    _ => f64::NAN,
  }
}

fn arg_bool(args: &[Arg], index: usize) -> bool {
  matches!(args.get(index), Some(Arg::Bool(true)))
}

impl InProcessEnv {
  fn method(method: MethodId) -> Option<AccessMethod> {
    AccessMethod::ALL.get(method.0 as usize).copied()
  }

  fn dispatch(&self, receiver: ForeignRef, method: AccessMethod, args: &[Arg]) -> Ret {
    let mut guard = self.shared.state.lock();
    let state = &mut *guard;
    *state.calls.entry(method.name()).or_default() += 1;
    let access = state.object_of(receiver).unwrap_or(u32::MAX);
    match method {
      AccessMethod::UndefinedInstance => Ret::Ref(Some(state.new_ref(state.undefined, RefKind::Local))),
      AccessMethod::NullInstance => Ret::Ref(Some(state.new_ref(state.null, RefKind::Local))),
      AccessMethod::TrueInstance => Ret::Ref(Some(state.new_ref(state.true_value, RefKind::Local))),
      AccessMethod::FalseInstance => {
        Ret::Ref(Some(state.new_ref(state.false_value, RefKind::Local)))
      }
      AccessMethod::IsolateGetIntPlaceholder => {
        Ret::Ref(Some(state.new_ref(state.placeholders[0], RefKind::Local)))
      }
      AccessMethod::IsolateGetLargeIntPlaceholder => {
        Ret::Ref(Some(state.new_ref(state.placeholders[1], RefKind::Local)))
      }
      AccessMethod::IsolateGetDoublePlaceholder => {
        Ret::Ref(Some(state.new_ref(state.placeholders[2], RefKind::Local)))
      }
      AccessMethod::ValueType => {
        let Some(value) = state.value_of(arg_ref(args, 0)).cloned() else {
          return Ret::Int(ValueType::Null.tag());
        };
        if arg_bool(args, 1) {
          match value {
            SimValue::Number(v) | SimValue::Date(v) => {
              state.write_scratch(access, 0, &v.to_ne_bytes())
            }
            _ => {
              if let Some((byte_length, byte_offset)) = value.view_range() {
                state.write_scratch(access, 0, &byte_length.to_ne_bytes());
                state.write_scratch(access, 4, &byte_offset.to_ne_bytes());
              }
            }
          }
        }
        Ret::Int(value.tag())
      }
      AccessMethod::ValueDouble | AccessMethod::DateValueOf => {
        match state.value_of(arg_ref(args, 0)) {
          Some(SimValue::Number(v)) | Some(SimValue::Date(v)) => Ret::Double(*v),
          _ => Ret::Double(f64::NAN),
        }
      }
      AccessMethod::ValueFlatten => match state.value_of(arg_ref(args, 0)).cloned() {
        Some(SimValue::LazyString(s)) | Some(SimValue::String(s)) => {
          Ret::Ref(Some(state.alloc_local(SimValue::String(s))))
        }
        _ => Ret::Ref(None),
      },
      AccessMethod::ValueExternal => match state.value_of(arg_ref(args, 0)) {
        Some(SimValue::External(p)) => Ret::Long(*p as i64),
        _ => Ret::Long(0),
      },
      AccessMethod::ValueUnknown => {
        let description = match state.value_of(arg_ref(args, 0)) {
          Some(SimValue::Opaque { description, .. }) => description.clone(),
          Some(other) => format!("{other:?}"),
          None => "null".to_string(),
        };
        Ret::Ref(Some(state.alloc_local(SimValue::String(description))))
      }
      AccessMethod::ValueStrictEquals => {
        let a = arg_ref(args, 0).and_then(|r| state.object_of(r));
        let b = arg_ref(args, 1).and_then(|r| state.object_of(r));
        let equal = match (a, b) {
          (Some(a), Some(b)) if a == b => true,
          (Some(a), Some(b)) => match (&state.objects[a as usize].value, &state.objects[b as usize].value) {
            (SimValue::Number(x), SimValue::Number(y)) => x == y,
            (SimValue::String(x), SimValue::String(y)) => x == y,
            (SimValue::Boolean(x), SimValue::Boolean(y)) => x == y,
            (SimValue::Undefined, SimValue::Undefined) | (SimValue::Null, SimValue::Null) => true,
            _ => false,
          },
          _ => false,
        };
        Ret::Bool(equal)
      }
      AccessMethod::StringEquals => {
        let a = state.value_of(arg_ref(args, 0));
        let b = state.value_of(arg_ref(args, 1));
        let equal = matches!(
          (a, b),
          (Some(SimValue::String(x)), Some(SimValue::String(y))) if x == y
        );
        Ret::Bool(equal)
      }
      AccessMethod::ObjectNew => Ret::Ref(Some(state.alloc_local(SimValue::Object))),
      AccessMethod::ArrayNew => {
        let length = arg_int(args, 1).max(0) as u32;
        Ret::Ref(Some(state.alloc_local(SimValue::Array(length))))
      }
      AccessMethod::ExternalNew => {
        let pointer = arg_long(args, 1) as usize;
        Ret::Ref(Some(state.alloc_local(SimValue::External(pointer))))
      }
      AccessMethod::NumberNew => {
        let value = arg_double(args, 0);
        Ret::Ref(Some(state.alloc_local(SimValue::Number(value))))
      }
      AccessMethod::DateNew => {
        let time = arg_double(args, 1);
        Ret::Ref(Some(state.alloc_local(SimValue::Date(time))))
      }
      AccessMethod::ArrayBufferViewByteLength | AccessMethod::ArrayBufferViewByteOffset => {
        let range = state.value_of(arg_ref(args, 0)).and_then(SimValue::view_range);
        match (range, method) {
          (Some((length, _)), AccessMethod::ArrayBufferViewByteLength) => Ret::Int(length),
          (Some((_, offset)), _) => Ret::Int(offset),
          (None, _) => Ret::Int(0),
        }
      }
      AccessMethod::ContextNew => {
        let global = state.alloc(SimValue::Object);
        let context = state.alloc(SimValue::Context);
        state.objects[context as usize].global = Some(global);
        Ret::Ref(Some(state.new_ref(context, RefKind::Local)))
      }
      AccessMethod::ContextGlobal => {
        let global = arg_ref(args, 0)
          .and_then(|r| state.object_of(r))
          .and_then(|context| state.objects[context as usize].global);
        Ret::Ref(global.map(|global| state.new_ref(global, RefKind::Local)))
      }
      AccessMethod::IsolateCreateInternalFieldKey => {
        let index = arg_int(args, 0);
        Ret::Ref(Some(
          state.alloc_local(SimValue::Symbol(format!("internal field {index}"))),
        ))
      }
      AccessMethod::TryCatchHasTerminated => {
        Ret::Bool(matches!(state.value_of(arg_ref(args, 0)), Some(SimValue::Termination)))
      }
      _ => {
        drop(guard);
        self.dispatch_void(method, args);
        Ret::Bool(false)
      }
    }
  }

  fn dispatch_void(&self, method: AccessMethod, args: &[Arg]) {
    let mut guard = self.shared.state.lock();
    let state = &mut *guard;
    match method {
      AccessMethod::MakeWeak => {
        if let Some(object) = arg_ref(args, 0).and_then(|r| state.object_of(r)) {
          state.weak_registrations.insert(arg_long(args, 1), object);
        }
      }
      AccessMethod::ClearWeak => {
        state.weak_registrations.remove(&arg_long(args, 1));
      }
      AccessMethod::IsolateThrowException => {
        if let Some(object) = arg_ref(args, 0).and_then(|r| state.object_of(r)) {
          state.pending.insert(self.thread, object);
        }
      }
      AccessMethod::IsolateRunMicrotasks => {
        state.microtask_drains += 1;
        let jobs = std::mem::take(&mut state.managed_jobs);
        for job in jobs {
          state.managed_jobs_run += 1;
          if let ManagedJob::Throw(value) = job {
            state.throw(self.thread, value);
          }
        }
      }
      AccessMethod::IsolateInternalErrorCheck => state.internal_error_checks += 1,
      AccessMethod::IsolateThrowStackOverflowError => {
        state.throw(self.thread, SimValue::String(STACK_OVERFLOW_MESSAGE.to_string()));
      }
      AccessMethod::IsolateTerminateExecution => state.terminate_requested = true,
      AccessMethod::IsolateCancelTerminateExecution => state.terminate_requested = false,
      AccessMethod::IsolateRequestInterrupt => state.interrupt_requests += 1,
      AccessMethod::IsolatePerformGc => {
        state.gc_count += 1;
        state.collect_garbage();
      }
      AccessMethod::IsolateEnablePromiseRejectCallback => {
        state.promise_reject_enabled = arg_bool(args, 0);
      }
      AccessMethod::IsolateDispose => {
        state.disposed_with = Some((arg_bool(args, 0), arg_int(args, 1)));
      }
      _ => {}
    }
  }
}

impl ManagedEnv for InProcessEnv {
  fn create_access(&self, _args: &[String]) -> Option<ForeignRef> {
    let mut state = self.shared.state.lock();
    let access = state.alloc(SimValue::Access);
    state
      .regions
      .insert(access, OwnedRegion::new(SCRATCH_REGION_LEN));
    Some(state.new_ref(access, RefKind::Local))
  }

  fn resolve_method(&self, name: &str, signature: &str) -> Option<MethodId> {
    let state = self.shared.state.lock();
    if state.missing.contains(name) {
      return None;
    }
    AccessMethod::ALL
      .iter()
      .position(|method| method.name() == name && method.signature() == signature)
      .map(|index| MethodId(index as u32))
  }

  fn shared_buffer(&self, access: ForeignRef) -> Option<RawRegion> {
    let state = self.shared.state.lock();
    if state.missing.contains(crate::gateway::SHARED_BUFFER_BINDING) {
      return None;
    }
    let object = state.object_of(access)?;
    state.regions.get(&object).map(OwnedRegion::raw)
  }

  fn call(&self, receiver: ForeignRef, method: MethodId, args: &[Arg]) -> Ret {
    match Self::method(method) {
      Some(method) => self.dispatch(receiver, method, args),
      None => Ret::Ref(None),
    }
  }

  fn call_void(&self, receiver: ForeignRef, method: MethodId, args: &[Arg]) {
    let Some(method) = Self::method(method) else {
      return;
    };
    {
      let mut state = self.shared.state.lock();
      *state.calls.entry(method.name()).or_default() += 1;
      if state.object_of(receiver).is_none() {
        return;
      }
    }
    self.dispatch_void(method, args);
  }

  fn new_local_ref(&self, obj: ForeignRef) -> Option<ForeignRef> {
    let mut state = self.shared.state.lock();
    let object = state.object_of(obj)?;
    Some(state.new_ref(object, RefKind::Local))
  }

  fn delete_local_ref(&self, obj: ForeignRef) {
    self.shared.state.lock().delete_ref(obj, RefKind::Local);
  }

  fn new_global_ref(&self, obj: ForeignRef) -> Option<ForeignRef> {
    let mut state = self.shared.state.lock();
    let object = state.object_of(obj)?;
    Some(state.new_ref(object, RefKind::Global))
  }

  fn delete_global_ref(&self, obj: ForeignRef) {
    self.shared.state.lock().delete_ref(obj, RefKind::Global);
  }

  fn new_weak_global_ref(&self, obj: ForeignRef) -> Option<ForeignRef> {
    let mut state = self.shared.state.lock();
    let object = state.object_of(obj)?;
    Some(state.new_ref(object, RefKind::GlobalWeak))
  }

  fn delete_weak_global_ref(&self, obj: ForeignRef) {
    self.shared.state.lock().delete_ref(obj, RefKind::GlobalWeak);
  }

  fn is_same_object(&self, a: Option<ForeignRef>, b: Option<ForeignRef>) -> bool {
    let state = self.shared.state.lock();
    let a = a.and_then(|r| state.object_of(r));
    let b = b.and_then(|r| state.object_of(r));
    a == b
  }

  fn new_string(&self, value: &str) -> Option<ForeignRef> {
    Some(
      self
        .shared
        .state
        .lock()
        .alloc_local(SimValue::String(value.to_string())),
    )
  }

  fn string_utf8(&self, obj: ForeignRef) -> Option<String> {
    match self.shared.state.lock().value_of(Some(obj)) {
      Some(SimValue::String(s)) | Some(SimValue::LazyString(s)) => Some(s.clone()),
      _ => None,
    }
  }

  fn exception_check(&self) -> bool {
    self.shared.state.lock().pending.contains_key(&self.thread)
  }

  fn exception_occurred(&self) -> Option<ForeignRef> {
    let mut state = self.shared.state.lock();
    let object = *state.pending.get(&self.thread)?;
    Some(state.new_ref(object, RefKind::Local))
  }

  fn exception_clear(&self) {
    self.shared.state.lock().pending.remove(&self.thread);
  }

  fn throw(&self, exception: ForeignRef) {
    let mut state = self.shared.state.lock();
    if let Some(object) = state.object_of(exception) {
      state.pending.insert(self.thread, object);
    }
  }
}
