use crate::value_type::BufferStorage;
use crate::value_type::ElementKind;

/// The kind of array buffer view a wrapper stands for.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ViewKind {
  /// The managed side reported a view without saying which kind.
  Unknown,
  TypedArray(ElementKind, BufferStorage),
  DataView,
}

/// An array buffer view, with the byte range cached when dispatch received it through the
/// scratch buffer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct View {
  pub kind: ViewKind,
  pub byte_length: Option<i32>,
  pub byte_offset: Option<i32>,
}

/// The concrete native wrapper a handle carries.
///
/// Scalar payloads (numbers, dates, booleans, externals) are cached on the native side so reading
/// them never crosses the boundary.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Wrapper {
  Undefined,
  Null,
  Boolean(bool),
  Number(f64),
  String,
  Symbol,
  BigInt,
  External(usize),
  Object,
  Function,
  Array,
  Date(f64),
  RegExp,
  Map,
  Set,
  Promise,
  Proxy,
  ArrayBuffer(BufferStorage),
  ArrayBufferView(View),
  Context,
}

/// The wrapper kinds that keep a free list of recycled wrappers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PoolKind {
  Object,
  String,
  Context,
  Function,
  Array,
  Number,
  External,
}

impl PoolKind {
  pub const ALL: [PoolKind; 7] = [
    PoolKind::Object,
    PoolKind::String,
    PoolKind::Context,
    PoolKind::Function,
    PoolKind::Array,
    PoolKind::Number,
    PoolKind::External,
  ];
}

impl Wrapper {
  pub fn pool_kind(&self) -> Option<PoolKind> {
    match self {
      Wrapper::Object => Some(PoolKind::Object),
      Wrapper::String => Some(PoolKind::String),
      Wrapper::Context => Some(PoolKind::Context),
      Wrapper::Function => Some(PoolKind::Function),
      Wrapper::Array => Some(PoolKind::Array),
      Wrapper::Number(_) => Some(PoolKind::Number),
      Wrapper::External(_) => Some(PoolKind::External),
      _ => None,
    }
  }

  pub fn type_name(&self) -> &'static str {
    match self {
      Wrapper::Undefined => "undefined",
      Wrapper::Null => "null",
      Wrapper::Boolean(_) => "boolean",
      Wrapper::Number(_) => "number",
      Wrapper::String => "string",
      Wrapper::Symbol => "symbol",
      Wrapper::BigInt => "bigint",
      Wrapper::External(_) => "external",
      Wrapper::Object => "object",
      Wrapper::Function => "function",
      Wrapper::Array => "array",
      Wrapper::Date(_) => "date",
      Wrapper::RegExp => "regexp",
      Wrapper::Map => "map",
      Wrapper::Set => "set",
      Wrapper::Promise => "promise",
      Wrapper::Proxy => "proxy",
      Wrapper::ArrayBuffer(_) => "array buffer",
      Wrapper::ArrayBufferView(_) => "array buffer view",
      Wrapper::Context => "context",
    }
  }

  #[inline]
  pub fn is_string(&self) -> bool {
    matches!(self, Wrapper::String)
  }

  /// The numeric value of number-like wrappers.
  pub fn number_value(&self) -> Option<f64> {
    match self {
      Wrapper::Number(v) | Wrapper::Date(v) => Some(*v),
      _ => None,
    }
  }
}
