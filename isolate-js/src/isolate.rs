use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use ahash::AHashMap;
use once_cell::unsync::OnceCell;

use crate::error::fatal_error;
use crate::foreign::Arg;
use crate::foreign::ForeignRef;
use crate::foreign::ManagedEnv;
use crate::foreign::ManagedVm;
use crate::foreign::Ret;
use crate::gateway::AccessMethod;
use crate::gateway::Gateway;
use crate::gateway::SHARED_BUFFER_BINDING;
use crate::gc::GcCallbackList;
use crate::handle::Handle;
use crate::handle::HandleEntry;
use crate::handle::HandleTable;
use crate::handle::RefKind;
use crate::interrupt::IsolateShared;
use crate::microtasks::MicrotaskQueue;
use crate::pool::Pools;
use crate::scratch::ScratchBuffer;
use crate::try_catch::MessageListener;
use crate::try_catch::PromiseRejectCallback;
use crate::try_catch::TrapKind;
use crate::value::PoolKind;
use crate::value::Wrapper;
use crate::BridgeError;
use crate::IsolateHandle;
use crate::IsolateOptions;

/// Lowest integer served from the small-integer cache.
pub const NUMBER_CACHE_LOW: i32 = -128;
/// Highest integer served from the small-integer cache.
pub const NUMBER_CACHE_HIGH: i32 = 127;

/// Callback run when the managed runtime reports that a weak referent was collected.
pub type WeakCallback = Box<dyn FnOnce(&Isolate, Handle)>;

/// Handles created once per isolate and kept alive until disposal.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Singletons {
  pub undefined: Handle,
  pub null: Handle,
  pub true_value: Handle,
  pub false_value: Handle,
  pub empty_string: Handle,
  pub int32_placeholder: Handle,
  pub uint32_placeholder: Handle,
  pub double_placeholder: Handle,
}

/// Counters describing handle churn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IsolateStats {
  /// Handles currently present in the handle table.
  pub live_handles: usize,
  /// Entries allocated fresh because their pool was empty (or the kind is not pooled).
  pub allocated: u64,
  /// Entries taken from a pool.
  pub reused: u64,
  /// Handles whose reference count dropped to zero.
  pub recycled: u64,
}

/// The thread-affine root of the bridge.
///
/// An isolate owns the resolved gateway, the scratch buffer, every handle created through it, the
/// handle-scope and context stacks, the microtask list and the GC callback lists. It is not `Send`:
/// the only things that may leave its thread are [`IsolateHandle`]s.
pub struct Isolate {
  pub(crate) shared: Arc<IsolateShared>,
  /// `None` once disposed; handle releases check this before touching the managed side.
  pub(crate) env: RefCell<Option<Rc<dyn ManagedEnv>>>,
  pub(crate) options: IsolateOptions,
  pub(crate) scratch: ScratchBuffer,
  pub(crate) handles: RefCell<HandleTable>,
  pub(crate) pools: RefCell<Pools>,
  pub(crate) singletons: Singletons,
  number_cache: Box<[OnceCell<Handle>]>,
  pub(crate) handle_scopes: RefCell<Vec<Option<Handle>>>,
  /// Number of scope markers in `handle_scopes`.
  pub(crate) handle_scope_depth: Cell<usize>,
  pub(crate) contexts: RefCell<Vec<Handle>>,
  pub(crate) microtasks: RefCell<MicrotaskQueue>,
  pub(crate) gc_prologue_callbacks: RefCell<GcCallbackList>,
  pub(crate) gc_epilogue_callbacks: RefCell<GcCallbackList>,
  pub(crate) traps: RefCell<Vec<TrapKind>>,
  pub(crate) message_listeners: RefCell<Vec<MessageListener>>,
  pub(crate) promise_reject_callback: Cell<Option<PromiseRejectCallback>>,
  eternals: RefCell<Vec<Handle>>,
  internal_field_keys: RefCell<Vec<Option<Handle>>>,
  weak_callbacks: RefCell<AHashMap<i64, (Handle, WeakCallback)>>,
  next_weak_callback_id: Cell<i64>,
  stack_bottom: usize,
  pub(crate) entry_depth: Cell<u32>,
  allocated: Cell<u64>,
  reused: Cell<u64>,
  recycled: Cell<u64>,
  disposed: Cell<bool>,
}

impl Isolate {
  /// Creates an isolate, terminating the process if the managed runtime cannot be bound.
  pub fn new(vm: Arc<dyn ManagedVm>, options: IsolateOptions) -> Rc<Self> {
    match Self::try_new(vm, options) {
      Ok(isolate) => isolate,
      Err(err) => fatal_error("Isolate::new", err),
    }
  }

  /// Creates an isolate: attaches the calling thread, resolves every gateway binding, maps the
  /// scratch buffer and caches the singleton handles.
  pub fn try_new(vm: Arc<dyn ManagedVm>, options: IsolateOptions) -> Result<Rc<Self>, BridgeError> {
    let stack_marker = 0u8;
    let stack_bottom = &stack_marker as *const u8 as usize;
    let _span = tracing::debug_span!("isolate_create").entered();

    let env = vm.attach_current_thread()?;
    let access = match env
      .create_access(&options.startup_args)
      .and_then(|local| {
        let global = env.new_global_ref(local);
        env.delete_local_ref(local);
        global
      }) {
      Some(access) => access,
      None => {
        if !crate::current::is_attached_to(&vm) {
          vm.detach_current_thread();
        }
        return Err(BridgeError::AttachFailed(
          "managed access object could not be created".to_string(),
        ));
      }
    };

    let bound = Gateway::resolve(&*env, access).and_then(|gateway| {
      let region = env
        .shared_buffer(access)
        .ok_or(BridgeError::MissingBinding {
          name: SHARED_BUFFER_BINDING,
        })?;
      let mut handles = HandleTable::default();
      let singletons = create_singletons(&*env, &gateway, &mut handles)?;
      Ok((gateway, region, handles, singletons))
    });
    let (gateway, region, handles, singletons) = match bound {
      Ok(bound) => bound,
      Err(err) => {
        tracing::error!(%err, "failed to bind the managed runtime");
        env.delete_global_ref(access);
        drop(env);
        if !crate::current::is_attached_to(&vm) {
          vm.detach_current_thread();
        }
        return Err(err);
      }
    };

    let cache_len = (NUMBER_CACHE_HIGH - NUMBER_CACHE_LOW + 1) as usize;
    let isolate = Rc::new(Self {
      shared: Arc::new(IsolateShared::new(vm, gateway)),
      env: RefCell::new(Some(env)),
      scratch: ScratchBuffer::new(region),
      pools: RefCell::new(Pools::new(options.pool_capacity)),
      options,
      handles: RefCell::new(handles),
      singletons,
      number_cache: (0..cache_len).map(|_| OnceCell::new()).collect(),
      handle_scopes: RefCell::new(Vec::new()),
      handle_scope_depth: Cell::new(0),
      contexts: RefCell::new(Vec::new()),
      microtasks: RefCell::new(MicrotaskQueue::new()),
      gc_prologue_callbacks: RefCell::new(GcCallbackList::default()),
      gc_epilogue_callbacks: RefCell::new(GcCallbackList::default()),
      traps: RefCell::new(Vec::new()),
      message_listeners: RefCell::new(Vec::new()),
      promise_reject_callback: Cell::new(None),
      eternals: RefCell::new(Vec::new()),
      internal_field_keys: RefCell::new(Vec::new()),
      weak_callbacks: RefCell::new(AHashMap::new()),
      next_weak_callback_id: Cell::new(1),
      stack_bottom,
      entry_depth: Cell::new(0),
      allocated: Cell::new(0),
      reused: Cell::new(0),
      recycled: Cell::new(0),
      disposed: Cell::new(false),
    });
    crate::current::register_attachment(&isolate.shared.vm);
    tracing::debug!(
      bindings = AccessMethod::COUNT,
      scratch_len = isolate.scratch.len(),
      "isolate created"
    );
    Ok(isolate)
  }

  #[inline]
  pub fn options(&self) -> &IsolateOptions {
    &self.options
  }

  #[inline]
  pub fn scratch(&self) -> &ScratchBuffer {
    &self.scratch
  }

  /// A `Send + Sync` handle for the cross-thread operations.
  pub fn handle(&self) -> IsolateHandle {
    IsolateHandle::new(self.shared.clone())
  }

  #[inline]
  pub fn is_disposed(&self) -> bool {
    self.disposed.get()
  }

  /// The call surface of the owning thread.
  pub fn env(&self) -> Result<Rc<dyn ManagedEnv>, BridgeError> {
    self.env.borrow().clone().ok_or(BridgeError::Disposed)
  }

  /// Invokes `method` through the "returns a value" calling shape.
  pub fn call(&self, method: AccessMethod, args: &[Arg]) -> Result<Ret, BridgeError> {
    let env = self.env()?;
    Ok(
      self
        .shared
        .gateway
        .call(&*env, method, args, self.options.internal_error_check),
    )
  }

  /// Invokes `method` through the "returns nothing" calling shape.
  pub fn call_void(&self, method: AccessMethod, args: &[Arg]) -> Result<(), BridgeError> {
    let env = self.env()?;
    self
      .shared
      .gateway
      .call_void(&*env, method, args, self.options.internal_error_check);
    Ok(())
  }

  pub fn stats(&self) -> IsolateStats {
    IsolateStats {
      live_handles: self.handles.borrow().live(),
      allocated: self.allocated.get(),
      reused: self.reused.get(),
      recycled: self.recycled.get(),
    }
  }

  /// Number of recycled wrappers currently held by the pool for `kind`.
  pub fn pool_len(&self, kind: PoolKind) -> usize {
    self.pools.borrow().get(kind).len()
  }

  // Singletons.

  #[inline]
  pub fn undefined(&self) -> Handle {
    self.singletons.undefined
  }

  #[inline]
  pub fn null(&self) -> Handle {
    self.singletons.null
  }

  #[inline]
  pub fn boolean(&self, value: bool) -> Handle {
    if value {
      self.singletons.true_value
    } else {
      self.singletons.false_value
    }
  }

  #[inline]
  pub fn empty_string(&self) -> Handle {
    self.singletons.empty_string
  }

  #[inline]
  pub fn int32_placeholder(&self) -> Handle {
    self.singletons.int32_placeholder
  }

  #[inline]
  pub fn uint32_placeholder(&self) -> Handle {
    self.singletons.uint32_placeholder
  }

  #[inline]
  pub fn double_placeholder(&self) -> Handle {
    self.singletons.double_placeholder
  }

  // Handle table.

  pub(crate) fn alloc_entry(
    &self,
    foreign: Option<ForeignRef>,
    ref_kind: RefKind,
    wrapper: Wrapper,
  ) -> Handle {
    let pooled = wrapper
      .pool_kind()
      .and_then(|kind| self.pools.borrow_mut().get_mut(kind).pop());
    let entry = match pooled {
      Some(mut entry) => {
        entry.reinitialize(foreign, ref_kind, wrapper);
        self.reused.set(self.reused.get() + 1);
        entry
      }
      None => {
        self.allocated.set(self.allocated.get() + 1);
        Box::new(HandleEntry::new(foreign, ref_kind, wrapper))
      }
    };
    self.handles.borrow_mut().insert(entry)
  }

  /// Wraps a local reference and registers it with the innermost handle scope.
  pub(crate) fn local_handle(
    &self,
    foreign: Option<ForeignRef>,
    wrapper: Wrapper,
  ) -> Result<Handle, BridgeError> {
    let handle = self.alloc_entry(foreign, RefKind::Local, wrapper);
    if self.handle_scope_depth() == 0 {
      tracing::warn!(kind = wrapper.type_name(), "local handle created outside of a handle scope");
    } else {
      self.handle_scope_reference(handle)?;
    }
    Ok(handle)
  }

  /// Promotes a local reference to a global one owned by a new handle with one reference.
  pub(crate) fn global_handle(
    &self,
    local: ForeignRef,
    wrapper: Wrapper,
  ) -> Result<Handle, BridgeError> {
    let env = self.env()?;
    let global = env.new_global_ref(local);
    env.delete_local_ref(local);
    let handle = self.alloc_entry(global, RefKind::Global, wrapper);
    self.reference_added(handle)?;
    Ok(handle)
  }

  pub fn is_valid(&self, handle: Handle) -> bool {
    self.handles.borrow().is_valid(handle)
  }

  pub fn ref_count(&self, handle: Handle) -> Result<u32, BridgeError> {
    Ok(self.handles.borrow().get(handle)?.ref_count)
  }

  pub fn ref_kind(&self, handle: Handle) -> Result<RefKind, BridgeError> {
    Ok(self.handles.borrow().get(handle)?.ref_kind)
  }

  pub fn wrapper(&self, handle: Handle) -> Result<Wrapper, BridgeError> {
    Ok(self.handles.borrow().get(handle)?.wrapper)
  }

  pub fn foreign_ref(&self, handle: Handle) -> Result<Option<ForeignRef>, BridgeError> {
    Ok(self.handles.borrow().get(handle)?.foreign)
  }

  pub fn reference_added(&self, handle: Handle) -> Result<(), BridgeError> {
    if self.is_disposed() {
      return Err(BridgeError::Disposed);
    }
    self.handles.borrow_mut().get_mut(handle)?.ref_count += 1;
    Ok(())
  }

  /// Drops one reference; the last one recycles the handle.
  ///
  /// After disposal this is a no-op: the managed side is gone and every handle was already
  /// released.
  pub fn reference_removed(&self, handle: Handle) -> Result<(), BridgeError> {
    if self.is_disposed() {
      return Ok(());
    }
    let remaining = {
      let mut handles = self.handles.borrow_mut();
      let entry = handles.get_mut(handle)?;
      if entry.ref_count == 0 {
        tracing::error!(?handle, "reference count underflow");
        return Err(BridgeError::RefCountUnderflow);
      }
      entry.ref_count -= 1;
      entry.ref_count
    };
    if remaining == 0 {
      self.recycle(handle)?;
    }
    Ok(())
  }

  fn recycle(&self, handle: Handle) -> Result<(), BridgeError> {
    let mut entry = self.handles.borrow_mut().remove(handle)?;
    let env = self.env.borrow().clone();
    if let Some(env) = env {
      entry.release(&*env);
    }
    if entry.ref_kind == RefKind::GlobalWeak {
      self
        .weak_callbacks
        .borrow_mut()
        .retain(|_, (registered, _)| *registered != handle);
    }
    self.recycled.set(self.recycled.get() + 1);
    if let Some(kind) = entry.wrapper.pool_kind() {
      // A full pool hands the entry back and it is dropped here.
      let _ = self.pools.borrow_mut().get_mut(kind).push(entry);
    }
    Ok(())
  }

  /// Creates a new handle for the same managed value.
  ///
  /// A global copy starts with one reference owned by the caller. A local copy is registered
  /// with the innermost handle scope.
  pub fn copy_handle(&self, handle: Handle, make_global: bool) -> Result<Handle, BridgeError> {
    let env = self.env()?;
    let (foreign, wrapper) = {
      let handles = self.handles.borrow();
      let entry = handles.get(handle)?;
      (entry.foreign, entry.wrapper)
    };
    if make_global {
      let copy = foreign.and_then(|foreign| env.new_global_ref(foreign));
      let copy = self.alloc_entry(copy, RefKind::Global, wrapper);
      self.reference_added(copy)?;
      Ok(copy)
    } else {
      let copy = foreign.and_then(|foreign| env.new_local_ref(foreign));
      self.local_handle(copy, wrapper)
    }
  }

  /// Downgrades a global handle's reference to a weak one. Idempotent; local handles are
  /// rejected with [`BridgeError::NotGlobal`].
  pub fn make_weak(&self, handle: Handle) -> Result<(), BridgeError> {
    let env = self.env()?;
    self.handles.borrow_mut().get_mut(handle)?.make_weak(&*env)?;
    Ok(())
  }

  /// Makes the handle weak and asks the managed runtime to report when the referent is collected.
  /// The report arrives through [`Isolate::notify_weak_callback`].
  pub fn make_weak_with_callback(
    &self,
    handle: Handle,
    callback: impl FnOnce(&Isolate, Handle) + 'static,
  ) -> Result<i64, BridgeError> {
    self.make_weak(handle)?;
    let id = self.next_weak_callback_id.get();
    self.next_weak_callback_id.set(id + 1);
    let foreign = self.foreign_ref(handle)?;
    self.call_void(AccessMethod::MakeWeak, &[Arg::Ref(foreign), Arg::Long(id)])?;
    self
      .weak_callbacks
      .borrow_mut()
      .insert(id, (handle, Box::new(callback)));
    Ok(id)
  }

  /// Entry point for the managed side: the referent registered under `id` was collected.
  pub fn notify_weak_callback(&self, id: i64) -> Result<bool, BridgeError> {
    let Some((handle, callback)) = self.weak_callbacks.borrow_mut().remove(&id) else {
      return Ok(false);
    };
    callback(self, handle);
    Ok(true)
  }

  /// Promotes a weak handle back to a strong global one. Idempotent.
  pub fn clear_weak(&self, handle: Handle) -> Result<(), BridgeError> {
    let env = self.env()?;
    let registered = {
      let weak_callbacks = self.weak_callbacks.borrow();
      weak_callbacks
        .iter()
        .find(|(_, (registered, _))| *registered == handle)
        .map(|(id, _)| *id)
    };
    if let Some(id) = registered {
      let foreign = self.foreign_ref(handle)?;
      self.call_void(AccessMethod::ClearWeak, &[Arg::Ref(foreign), Arg::Long(id)])?;
      self.weak_callbacks.borrow_mut().remove(&id);
    }
    self.handles.borrow_mut().get_mut(handle)?.clear_weak(&*env);
    Ok(())
  }

  /// For weak handles, whether the managed collector already reclaimed the referent.
  pub fn is_empty(&self, handle: Handle) -> Result<bool, BridgeError> {
    let (foreign, ref_kind) = {
      let handles = self.handles.borrow();
      let entry = handles.get(handle)?;
      (entry.foreign, entry.ref_kind)
    };
    if ref_kind != RefKind::GlobalWeak {
      return Ok(false);
    }
    let env = self.env()?;
    Ok(env.is_same_object(foreign, None))
  }

  /// Whether two handles stand for the same managed value.
  pub fn same_data(&self, a: Handle, b: Handle) -> Result<bool, BridgeError> {
    if a == b {
      return Ok(true);
    }
    let (a_entry, b_entry) = {
      let handles = self.handles.borrow();
      let a = handles.get(a)?;
      let b = handles.get(b)?;
      ((a.foreign, a.wrapper), (b.foreign, b.wrapper))
    };
    let (Some(a_foreign), Some(b_foreign)) = (a_entry.0, b_entry.0) else {
      return Ok(false);
    };
    let env = self.env()?;
    if env.is_same_object(Some(a_foreign), Some(b_foreign)) {
      return Ok(true);
    }
    if a_entry.1.is_string() && b_entry.1.is_string() {
      return self
        .call(
          AccessMethod::StringEquals,
          &[Arg::Ref(Some(a_foreign)), Arg::Ref(Some(b_foreign))],
        )?
        .into_bool(AccessMethod::StringEquals);
    }
    Ok(false)
  }

  /// JavaScript `===`, answered by the managed side.
  pub fn strict_equals(&self, a: Handle, b: Handle) -> Result<bool, BridgeError> {
    let a = self.foreign_ref(a)?;
    let b = self.foreign_ref(b)?;
    self
      .call(AccessMethod::ValueStrictEquals, &[Arg::Ref(a), Arg::Ref(b)])?
      .into_bool(AccessMethod::ValueStrictEquals)
  }

  // Eternals and internal field keys.

  /// Keeps a global copy of `handle` alive until the isolate is disposed.
  pub fn eternalize(&self, handle: Handle) -> Result<usize, BridgeError> {
    let copy = self.copy_handle(handle, true)?;
    let mut eternals = self.eternals.borrow_mut();
    eternals.push(copy);
    Ok(eternals.len() - 1)
  }

  pub fn eternal(&self, index: usize) -> Option<Handle> {
    self.eternals.borrow().get(index).copied()
  }

  /// The managed-side key object used for internal field `index`, created on first use.
  pub fn internal_field_key(&self, index: usize) -> Result<Handle, BridgeError> {
    if let Some(Some(key)) = self.internal_field_keys.borrow().get(index) {
      return Ok(*key);
    }
    let local = self
      .call(
        AccessMethod::IsolateCreateInternalFieldKey,
        &[Arg::Int(index as i32)],
      )?
      .into_ref(AccessMethod::IsolateCreateInternalFieldKey)?
      .ok_or(BridgeError::UnexpectedReturn(
        AccessMethod::IsolateCreateInternalFieldKey.name(),
      ))?;
    let key = self.global_handle(local, Wrapper::Object)?;
    let mut keys = self.internal_field_keys.borrow_mut();
    if keys.len() <= index {
      keys.resize(index + 1, None);
    }
    keys[index] = Some(key);
    Ok(key)
  }

  // Numbers and the scalar return path.

  fn cached_number(&self, value: f64) -> Option<Result<Handle, BridgeError>> {
    let is_small_int = value.fract() == 0.0
      && value >= NUMBER_CACHE_LOW as f64
      && value <= NUMBER_CACHE_HIGH as f64
      && !(value == 0.0 && value.is_sign_negative());
    if !is_small_int {
      return None;
    }
    let index = (value as i32 - NUMBER_CACHE_LOW) as usize;
    Some(
      self.number_cache[index]
        .get_or_try_init(|| {
          let local = self.new_number_ref(value)?;
          self.global_handle(local, Wrapper::Number(value))
        })
        .copied(),
    )
  }

  fn new_number_ref(&self, value: f64) -> Result<ForeignRef, BridgeError> {
    self
      .call(AccessMethod::NumberNew, &[Arg::Double(value)])?
      .into_ref(AccessMethod::NumberNew)?
      .ok_or(BridgeError::UnexpectedReturn(AccessMethod::NumberNew.name()))
  }

  /// A Number handle. Small integers come from the per-isolate cache.
  pub fn number_new(&self, value: f64) -> Result<Handle, BridgeError> {
    if let Some(cached) = self.cached_number(value) {
      return cached;
    }
    let local = self.new_number_ref(value)?;
    self.local_handle(Some(local), Wrapper::Number(value))
  }

  fn placeholder_kind(&self, handle: Handle) -> Result<Option<ScalarKind>, BridgeError> {
    let singletons = self.singletons;
    let candidates = [
      (singletons.int32_placeholder, ScalarKind::Int32),
      (singletons.uint32_placeholder, ScalarKind::Uint32),
      (singletons.double_placeholder, ScalarKind::Double),
    ];
    if let Some((_, kind)) = candidates.iter().find(|(p, _)| *p == handle) {
      return Ok(Some(*kind));
    }
    if !matches!(self.wrapper(handle)?, Wrapper::Number(_)) {
      return Ok(None);
    }
    for (placeholder, kind) in candidates {
      if self.same_data(placeholder, handle)? {
        return Ok(Some(kind));
      }
    }
    Ok(None)
  }

  /// Replaces a numeric placeholder with the Number the managed side left in the scratch buffer.
  /// Any other handle is returned unchanged.
  pub fn correct_return_value(&self, handle: Handle) -> Result<Handle, BridgeError> {
    let Some(kind) = self.placeholder_kind(handle)? else {
      return Ok(handle);
    };
    self.scratch.reset();
    let value = match kind {
      ScalarKind::Int32 => self.scratch.read_i32()? as f64,
      ScalarKind::Uint32 => self.scratch.read_i64()? as f64,
      ScalarKind::Double => self.scratch.read_f64()?,
    };
    self.number_new(value)
  }

  /// Encodes a native callback's numeric result into the scratch buffer and returns the
  /// placeholder the managed side decodes it with.
  pub fn prepare_return_value(&self, value: f64) -> Result<Handle, BridgeError> {
    self.scratch.reset();
    let integral = value.fract() == 0.0 && !(value == 0.0 && value.is_sign_negative());
    if integral && value >= i32::MIN as f64 && value <= i32::MAX as f64 {
      self.scratch.write_i32(value as i32)?;
      Ok(self.singletons.int32_placeholder)
    } else if integral && value >= 0.0 && value <= u32::MAX as f64 {
      self.scratch.write_i64(value as i64)?;
      Ok(self.singletons.uint32_placeholder)
    } else {
      self.scratch.write_f64(value)?;
      Ok(self.singletons.double_placeholder)
    }
  }

  // Constructors and accessors used by embedders.

  fn new_ref(&self, method: AccessMethod, args: &[Arg]) -> Result<ForeignRef, BridgeError> {
    self
      .call(method, args)?
      .into_ref(method)?
      .ok_or(BridgeError::UnexpectedReturn(method.name()))
  }

  pub fn string_new(&self, value: &str) -> Result<Handle, BridgeError> {
    if value.is_empty() {
      return Ok(self.singletons.empty_string);
    }
    let env = self.env()?;
    let local = env
      .new_string(value)
      .ok_or(BridgeError::UnexpectedReturn("newString"))?;
    self.local_handle(Some(local), Wrapper::String)
  }

  pub fn object_new(&self, context: Handle) -> Result<Handle, BridgeError> {
    let context = self.foreign_ref(context)?;
    let local = self.new_ref(AccessMethod::ObjectNew, &[Arg::Ref(context)])?;
    self.local_handle(Some(local), Wrapper::Object)
  }

  pub fn array_new(&self, context: Handle, length: i32) -> Result<Handle, BridgeError> {
    let context = self.foreign_ref(context)?;
    let local = self.new_ref(AccessMethod::ArrayNew, &[Arg::Ref(context), Arg::Int(length)])?;
    self.local_handle(Some(local), Wrapper::Array)
  }

  pub fn external_new(&self, context: Handle, pointer: usize) -> Result<Handle, BridgeError> {
    let context = self.foreign_ref(context)?;
    let local = self.new_ref(
      AccessMethod::ExternalNew,
      &[Arg::Ref(context), Arg::Long(pointer as i64)],
    )?;
    self.local_handle(Some(local), Wrapper::External(pointer))
  }

  pub fn date_new(&self, context: Handle, time: f64) -> Result<Handle, BridgeError> {
    let context = self.foreign_ref(context)?;
    let local = self.new_ref(AccessMethod::DateNew, &[Arg::Ref(context), Arg::Double(time)])?;
    self.local_handle(Some(local), Wrapper::Date(time))
  }

  pub fn context_new(&self) -> Result<Handle, BridgeError> {
    let local = self.new_ref(AccessMethod::ContextNew, &[])?;
    self.local_handle(Some(local), Wrapper::Context)
  }

  /// The global object of `context`.
  pub fn context_global(&self, context: Handle) -> Result<Handle, BridgeError> {
    let context = self.foreign_ref(context)?;
    let global = self
      .call(AccessMethod::ContextGlobal, &[Arg::Ref(context)])?
      .into_ref(AccessMethod::ContextGlobal)?;
    self.from_foreign(global)
  }

  pub fn number_value(&self, handle: Handle) -> Result<f64, BridgeError> {
    self
      .wrapper(handle)?
      .number_value()
      .ok_or(BridgeError::WrongKind { expected: "number" })
  }

  pub fn boolean_value(&self, handle: Handle) -> Result<bool, BridgeError> {
    match self.wrapper(handle)? {
      Wrapper::Boolean(value) => Ok(value),
      _ => Err(BridgeError::WrongKind {
        expected: "boolean",
      }),
    }
  }

  pub fn external_value(&self, handle: Handle) -> Result<usize, BridgeError> {
    match self.wrapper(handle)? {
      Wrapper::External(pointer) => Ok(pointer),
      _ => Err(BridgeError::WrongKind {
        expected: "external",
      }),
    }
  }

  /// The UTF-8 contents of a string handle.
  pub fn string_value(&self, handle: Handle) -> Result<String, BridgeError> {
    let (foreign, wrapper) = {
      let handles = self.handles.borrow();
      let entry = handles.get(handle)?;
      (entry.foreign, entry.wrapper)
    };
    if !wrapper.is_string() {
      return Err(BridgeError::WrongKind { expected: "string" });
    }
    let Some(foreign) = foreign else {
      return Ok(String::new());
    };
    self
      .env()?
      .string_utf8(foreign)
      .ok_or(BridgeError::WrongKind { expected: "string" })
  }

  // Stack overflow check.

  /// The stack address recorded when the isolate was created.
  #[inline]
  pub fn stack_bottom(&self) -> usize {
    self.stack_bottom
  }

  /// Raises a script-visible stack overflow when `stack_top` is further from the recorded stack
  /// bottom than the configured limit. Returns whether it did.
  pub fn stack_overflow_check(&self, stack_top: usize) -> Result<bool, BridgeError> {
    let Some(limit) = self.options.stack_limit() else {
      return Ok(false);
    };
    if stack_top.abs_diff(self.stack_bottom) > limit {
      self.call_void(AccessMethod::IsolateThrowStackOverflowError, &[])?;
      return Ok(true);
    }
    Ok(false)
  }

  /// [`Isolate::stack_overflow_check`] at the caller's current stack position.
  #[inline(never)]
  pub fn check_stack_here(&self) -> Result<bool, BridgeError> {
    let marker = 0u8;
    self.stack_overflow_check(&marker as *const u8 as usize)
  }

  // Disposal.

  /// Disposes the isolate, using the configured `main` flag as the exit flag.
  pub fn dispose(&self) {
    self.dispose_with(self.options.main, 0);
  }

  /// Tears the isolate down: releases every handle (cached globals and singletons included),
  /// tells the managed side to shut down, detaches the thread and empties the pools. Only the
  /// first call does anything.
  pub fn dispose_with(&self, exit: bool, status: i32) {
    if self.disposed.replace(true) {
      return;
    }
    let _span = tracing::debug_span!("isolate_dispose", exit, status).entered();
    let Some(env) = self.env.borrow_mut().take() else {
      return;
    };

    self.microtasks.borrow_mut().clear();
    self.weak_callbacks.borrow_mut().clear();
    self.shared.clear_interrupts();
    self.handle_scopes.borrow_mut().clear();
    self.handle_scope_depth.set(0);
    self.contexts.borrow_mut().clear();
    self.eternals.borrow_mut().clear();
    self.internal_field_keys.borrow_mut().clear();

    let entries = self.handles.borrow_mut().drain();
    let released = entries.len();
    for mut entry in entries {
      entry.release(&*env);
    }
    self.pools.borrow_mut().clear();

    let gateway = &self.shared.gateway;
    env.call_void(
      gateway.access(),
      gateway.method(AccessMethod::IsolateDispose),
      &[Arg::Bool(exit), Arg::Int(status)],
    );
    env.exception_clear();
    env.delete_global_ref(gateway.access());
    drop(env);
    if !crate::current::unregister_attachment(&self.shared.vm) {
      self.shared.vm.detach_current_thread();
    }
    tracing::debug!(released, "isolate disposed");
  }
}

impl Drop for Isolate {
  fn drop(&mut self) {
    self.dispose();
  }
}

#[derive(Clone, Copy, Debug)]
enum ScalarKind {
  Int32,
  Uint32,
  Double,
}

fn create_singletons(
  env: &dyn ManagedEnv,
  gateway: &Gateway,
  handles: &mut HandleTable,
) -> Result<Singletons, BridgeError> {
  let mut cache = |method: AccessMethod, wrapper: Wrapper| -> Result<Handle, BridgeError> {
    let local = gateway
      .call(env, method, &[], false)
      .into_ref(method)?
      .ok_or_else(|| BridgeError::AttachFailed(format!("`{}` returned null", method.name())))?;
    Ok(cache_global(env, handles, local, wrapper))
  };
  let undefined = cache(AccessMethod::UndefinedInstance, Wrapper::Undefined)?;
  let null = cache(AccessMethod::NullInstance, Wrapper::Null)?;
  let true_value = cache(AccessMethod::TrueInstance, Wrapper::Boolean(true))?;
  let false_value = cache(AccessMethod::FalseInstance, Wrapper::Boolean(false))?;
  let int32_placeholder = cache(AccessMethod::IsolateGetIntPlaceholder, Wrapper::Number(0.0))?;
  let uint32_placeholder = cache(
    AccessMethod::IsolateGetLargeIntPlaceholder,
    Wrapper::Number(0.0),
  )?;
  let double_placeholder = cache(AccessMethod::IsolateGetDoublePlaceholder, Wrapper::Number(0.0))?;
  let empty = env
    .new_string("")
    .ok_or_else(|| BridgeError::AttachFailed("empty string could not be created".to_string()))?;
  let empty_string = cache_global(env, handles, empty, Wrapper::String);
  Ok(Singletons {
    undefined,
    null,
    true_value,
    false_value,
    empty_string,
    int32_placeholder,
    uint32_placeholder,
    double_placeholder,
  })
}

fn cache_global(
  env: &dyn ManagedEnv,
  handles: &mut HandleTable,
  local: ForeignRef,
  wrapper: Wrapper,
) -> Handle {
  let global = env.new_global_ref(local);
  env.delete_local_ref(local);
  let mut entry = HandleEntry::new(global, RefKind::Global, wrapper);
  entry.ref_count = 1;
  handles.insert(Box::new(entry))
}
