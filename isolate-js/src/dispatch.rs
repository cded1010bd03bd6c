//! Value dispatch: turning an opaque foreign reference plus a type tag into a typed handle.

use crate::foreign::Arg;
use crate::foreign::ForeignRef;
use crate::gateway::AccessMethod;
use crate::handle::Handle;
use crate::value::View;
use crate::value::ViewKind;
use crate::value::Wrapper;
use crate::value_type::ValueType;
use crate::BridgeError;
use crate::Isolate;

/// How [`Isolate::materialize`] obtains scalar payloads and constructs the handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchMode {
  /// The managed side just wrote the scalar payload (number, date value, view byte range) into
  /// the scratch buffer.
  pub use_shared_buffer: bool,
  /// Always construct a fresh handle, even for values that have a cached singleton.
  pub placement: bool,
}

impl DispatchMode {
  pub const SHARED_BUFFER: DispatchMode = DispatchMode {
    use_shared_buffer: true,
    placement: false,
  };
  pub const PLACEMENT: DispatchMode = DispatchMode {
    use_shared_buffer: false,
    placement: true,
  };
}

impl Isolate {
  /// Wraps `foreign`, asking the managed side for its type tag and, if needed, its scalar payload.
  pub fn from_foreign(&self, foreign: Option<ForeignRef>) -> Result<Handle, BridgeError> {
    let Some(obj) = foreign else {
      return self.materialize(None, 0, DispatchMode::default());
    };
    let tag = self
      .call(AccessMethod::ValueType, &[Arg::Ref(Some(obj)), Arg::Bool(false)])?
      .into_int(AccessMethod::ValueType)?;
    self.materialize(Some(obj), tag, DispatchMode::default())
  }

  /// Like [`Isolate::from_foreign`], but has the type query deposit scalar payloads in the scratch
  /// buffer so no second round trip is needed.
  pub fn from_foreign_fast(&self, foreign: Option<ForeignRef>) -> Result<Handle, BridgeError> {
    let Some(obj) = foreign else {
      return self.materialize(None, 0, DispatchMode::default());
    };
    self.scratch.reset();
    let tag = self
      .call(AccessMethod::ValueType, &[Arg::Ref(Some(obj)), Arg::Bool(true)])?
      .into_int(AccessMethod::ValueType)?;
    self.materialize(Some(obj), tag, DispatchMode::SHARED_BUFFER)
  }

  /// Constructs the wrapper for a local reference whose type tag is already known.
  ///
  /// Ownership of the local reference passes to the returned handle (or is released, when a
  /// cached singleton or a flattened copy is returned instead). Unknown tags never fail: the
  /// managed side is asked to describe the value and the description is wrapped as a string.
  pub fn materialize(
    &self,
    foreign: Option<ForeignRef>,
    tag: i32,
    mode: DispatchMode,
  ) -> Result<Handle, BridgeError> {
    let Some(obj) = foreign else {
      tracing::warn!(tag, "null foreign reference reached value dispatch");
      return Ok(self.singletons.null);
    };
    let Some(ty) = ValueType::from_tag(tag) else {
      return self.materialize_unknown(obj, tag);
    };
    if mode.use_shared_buffer {
      self.scratch.reset();
    }

    let singleton = match ty {
      ValueType::Undefined => Some(self.singletons.undefined),
      ValueType::Null => Some(self.singletons.null),
      ValueType::True => Some(self.singletons.true_value),
      ValueType::False => Some(self.singletons.false_value),
      _ => None,
    };
    if let (Some(singleton), false) = (singleton, mode.placement) {
      self.env()?.delete_local_ref(obj);
      return Ok(singleton);
    }

    let wrapper = match ty {
      ValueType::Undefined => Wrapper::Undefined,
      ValueType::Null => Wrapper::Null,
      ValueType::True => Wrapper::Boolean(true),
      ValueType::False => Wrapper::Boolean(false),
      ValueType::String => Wrapper::String,
      ValueType::LazyString => return self.materialize_flattened(obj),
      ValueType::Number => Wrapper::Number(self.scalar(obj, mode, AccessMethod::ValueDouble)?),
      ValueType::Date => Wrapper::Date(self.scalar(obj, mode, AccessMethod::DateValueOf)?),
      ValueType::External => {
        let pointer = self
          .call(AccessMethod::ValueExternal, &[Arg::Ref(Some(obj))])?
          .into_long(AccessMethod::ValueExternal)?;
        Wrapper::External(pointer as usize)
      }
      ValueType::Symbol => Wrapper::Symbol,
      ValueType::BigInt => Wrapper::BigInt,
      ValueType::Function => Wrapper::Function,
      ValueType::Array => Wrapper::Array,
      ValueType::RegExp => Wrapper::RegExp,
      ValueType::Object => Wrapper::Object,
      ValueType::Map => Wrapper::Map,
      ValueType::Set => Wrapper::Set,
      ValueType::Promise => Wrapper::Promise,
      ValueType::Proxy => Wrapper::Proxy,
      ValueType::ArrayBuffer(storage) => Wrapper::ArrayBuffer(storage),
      ValueType::ArrayBufferView => self.view(ViewKind::Unknown, mode)?,
      ValueType::TypedArray(element, storage) => {
        self.view(ViewKind::TypedArray(element, storage), mode)?
      }
      ValueType::DataView => self.view(ViewKind::DataView, mode)?,
    };
    self.local_handle(Some(obj), wrapper)
  }

  fn scalar(
    &self,
    obj: ForeignRef,
    mode: DispatchMode,
    slow_path: AccessMethod,
  ) -> Result<f64, BridgeError> {
    if mode.use_shared_buffer {
      return self.scratch.read_f64();
    }
    self
      .call(slow_path, &[Arg::Ref(Some(obj))])?
      .into_double(slow_path)
  }

  fn view(&self, kind: ViewKind, mode: DispatchMode) -> Result<Wrapper, BridgeError> {
    let (byte_length, byte_offset) = if mode.use_shared_buffer {
      let byte_length = self.scratch.read_i32()?;
      let byte_offset = self.scratch.read_i32()?;
      (Some(byte_length), Some(byte_offset))
    } else {
      (None, None)
    };
    Ok(Wrapper::ArrayBufferView(View {
      kind,
      byte_length,
      byte_offset,
    }))
  }

  fn materialize_flattened(&self, obj: ForeignRef) -> Result<Handle, BridgeError> {
    let flat = self
      .call(AccessMethod::ValueFlatten, &[Arg::Ref(Some(obj))])?
      .into_ref(AccessMethod::ValueFlatten)?;
    self.env()?.delete_local_ref(obj);
    match flat {
      Some(flat) => self.local_handle(Some(flat), Wrapper::String),
      None => Ok(self.singletons.empty_string),
    }
  }

  fn materialize_unknown(&self, obj: ForeignRef, tag: i32) -> Result<Handle, BridgeError> {
    tracing::debug!(tag, "unknown value type; wrapping its description");
    let description = self
      .call(AccessMethod::ValueUnknown, &[Arg::Ref(Some(obj))])?
      .into_ref(AccessMethod::ValueUnknown)?;
    self.env()?.delete_local_ref(obj);
    match description {
      Some(description) => self.local_handle(Some(description), Wrapper::String),
      None => Ok(self.singletons.empty_string),
    }
  }

  /// Byte length of an array buffer view, from the cached value when dispatch received one.
  pub fn view_byte_length(&self, handle: Handle) -> Result<i32, BridgeError> {
    self.view_field(handle, |view| view.byte_length, AccessMethod::ArrayBufferViewByteLength)
  }

  /// Byte offset of an array buffer view, from the cached value when dispatch received one.
  pub fn view_byte_offset(&self, handle: Handle) -> Result<i32, BridgeError> {
    self.view_field(handle, |view| view.byte_offset, AccessMethod::ArrayBufferViewByteOffset)
  }

  fn view_field(
    &self,
    handle: Handle,
    cached: impl Fn(&View) -> Option<i32>,
    slow_path: AccessMethod,
  ) -> Result<i32, BridgeError> {
    let Wrapper::ArrayBufferView(view) = self.wrapper(handle)? else {
      return Err(BridgeError::WrongKind {
        expected: "array buffer view",
      });
    };
    if let Some(value) = cached(&view) {
      return Ok(value);
    }
    let obj = self.foreign_ref(handle)?;
    self
      .call(slow_path, &[Arg::Ref(obj)])?
      .into_int(slow_path)
  }
}
