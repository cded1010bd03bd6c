//! The closed set of value type tags reported by the managed runtime.

/// Element type of a typed array view.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ElementKind {
  Uint8,
  Uint8Clamped,
  Uint32,
  Int8,
  Uint16,
  Int16,
  Int32,
  Float32,
  Float64,
  BigInt64,
  BigUint64,
}

impl ElementKind {
  /// Tag order of the element kinds within each storage family.
  pub const ALL: [ElementKind; 11] = [
    ElementKind::Uint8,
    ElementKind::Uint8Clamped,
    ElementKind::Uint32,
    ElementKind::Int8,
    ElementKind::Uint16,
    ElementKind::Int16,
    ElementKind::Int32,
    ElementKind::Float32,
    ElementKind::Float64,
    ElementKind::BigInt64,
    ElementKind::BigUint64,
  ];

  pub fn size_bytes(self) -> usize {
    match self {
      ElementKind::Uint8 | ElementKind::Uint8Clamped | ElementKind::Int8 => 1,
      ElementKind::Uint16 | ElementKind::Int16 => 2,
      ElementKind::Uint32 | ElementKind::Int32 | ElementKind::Float32 => 4,
      ElementKind::Float64 | ElementKind::BigInt64 | ElementKind::BigUint64 => 8,
    }
  }
}

/// Where the bytes of a buffer live.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BufferStorage {
  /// A direct (native-addressable) buffer.
  Direct,
  /// A buffer backed by a foreign interop object.
  Interop,
}

/// The decoded form of a value type tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ValueType {
  Undefined,
  Null,
  True,
  False,
  String,
  Number,
  External,
  Function,
  Array,
  Date,
  RegExp,
  Object,
  LazyString,
  /// An array buffer view whose concrete kind the managed side did not report.
  ArrayBufferView,
  ArrayBuffer(BufferStorage),
  Symbol,
  TypedArray(ElementKind, BufferStorage),
  Map,
  Set,
  Promise,
  Proxy,
  DataView,
  BigInt,
}

const DIRECT_TYPED_ARRAY_FIRST: i32 = 17;
const DIRECT_BIGINT64_ARRAY: i32 = 32;
const DIRECT_BIGUINT64_ARRAY: i32 = 33;
const INTEROP_TYPED_ARRAY_FIRST: i32 = 35;

impl ValueType {
  /// Decodes a wire tag. Unknown tags yield `None`.
  pub fn from_tag(tag: i32) -> Option<Self> {
    use BufferStorage::*;
    Some(match tag {
      1 => ValueType::Undefined,
      2 => ValueType::Null,
      3 => ValueType::True,
      4 => ValueType::False,
      5 => ValueType::String,
      6 => ValueType::Number,
      7 => ValueType::External,
      8 => ValueType::Function,
      9 => ValueType::Array,
      10 => ValueType::Date,
      11 => ValueType::RegExp,
      12 => ValueType::Object,
      13 => ValueType::LazyString,
      14 => ValueType::ArrayBufferView,
      15 => ValueType::ArrayBuffer(Direct),
      16 => ValueType::Symbol,
      17..=25 => {
        ValueType::TypedArray(ElementKind::ALL[(tag - DIRECT_TYPED_ARRAY_FIRST) as usize], Direct)
      }
      26 => ValueType::Map,
      27 => ValueType::Set,
      28 => ValueType::Promise,
      29 => ValueType::Proxy,
      30 => ValueType::DataView,
      31 => ValueType::BigInt,
      DIRECT_BIGINT64_ARRAY => ValueType::TypedArray(ElementKind::BigInt64, Direct),
      DIRECT_BIGUINT64_ARRAY => ValueType::TypedArray(ElementKind::BigUint64, Direct),
      34 => ValueType::ArrayBuffer(Interop),
      35..=45 => {
        ValueType::TypedArray(ElementKind::ALL[(tag - INTEROP_TYPED_ARRAY_FIRST) as usize], Interop)
      }
      _ => return None,
    })
  }

  pub fn tag(self) -> i32 {
    match self {
      ValueType::Undefined => 1,
      ValueType::Null => 2,
      ValueType::True => 3,
      ValueType::False => 4,
      ValueType::String => 5,
      ValueType::Number => 6,
      ValueType::External => 7,
      ValueType::Function => 8,
      ValueType::Array => 9,
      ValueType::Date => 10,
      ValueType::RegExp => 11,
      ValueType::Object => 12,
      ValueType::LazyString => 13,
      ValueType::ArrayBufferView => 14,
      ValueType::ArrayBuffer(BufferStorage::Direct) => 15,
      ValueType::Symbol => 16,
      ValueType::TypedArray(ElementKind::BigInt64, BufferStorage::Direct) => DIRECT_BIGINT64_ARRAY,
      ValueType::TypedArray(ElementKind::BigUint64, BufferStorage::Direct) => {
        DIRECT_BIGUINT64_ARRAY
      }
      ValueType::TypedArray(kind, BufferStorage::Direct) => DIRECT_TYPED_ARRAY_FIRST + element_index(kind),
      ValueType::Map => 26,
      ValueType::Set => 27,
      ValueType::Promise => 28,
      ValueType::Proxy => 29,
      ValueType::DataView => 30,
      ValueType::BigInt => 31,
      ValueType::ArrayBuffer(BufferStorage::Interop) => 34,
      ValueType::TypedArray(kind, BufferStorage::Interop) => {
        INTEROP_TYPED_ARRAY_FIRST + element_index(kind)
      }
    }
  }

  /// Whether `valueType(.., useSharedBuffer = true)` leaves byte length and byte offset in the
  /// scratch buffer for this type.
  pub fn is_view(self) -> bool {
    matches!(
      self,
      ValueType::ArrayBufferView | ValueType::TypedArray(..) | ValueType::DataView
    )
  }
}

fn element_index(kind: ElementKind) -> i32 {
  ElementKind::ALL
    .iter()
    .position(|k| *k == kind)
    .unwrap_or_default() as i32
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_known_tag_decodes_and_encodes_back() {
    for tag in 1..=45 {
      let ty = ValueType::from_tag(tag).unwrap_or_else(|| panic!("tag {tag} should be known"));
      assert_eq!(ty.tag(), tag, "{ty:?}");
    }
  }

  #[test]
  fn out_of_range_tags_are_unknown() {
    for tag in [i32::MIN, -1, 0, 46, 99, i32::MAX] {
      assert_eq!(ValueType::from_tag(tag), None);
    }
  }

  #[test]
  fn typed_array_families_line_up() {
    assert_eq!(
      ValueType::from_tag(17),
      Some(ValueType::TypedArray(ElementKind::Uint8, BufferStorage::Direct))
    );
    assert_eq!(
      ValueType::from_tag(25),
      Some(ValueType::TypedArray(ElementKind::Float64, BufferStorage::Direct))
    );
    assert_eq!(
      ValueType::from_tag(45),
      Some(ValueType::TypedArray(ElementKind::BigUint64, BufferStorage::Interop))
    );
    assert!(ValueType::DataView.is_view());
    assert!(!ValueType::ArrayBuffer(BufferStorage::Direct).is_view());
  }
}
