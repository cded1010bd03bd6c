//! The scratch buffer protocol.
//!
//! The managed side writes scalars into a shared region; the native side reads them back with a
//! cursor that is reset before every logical read sequence. Values use native byte order and are
//! read/written unaligned.

use core::cell::Cell;

use crate::foreign::RawRegion;
use crate::BridgeError;

pub struct ScratchBuffer {
  region: RawRegion,
  pos: Cell<usize>,
}

impl ScratchBuffer {
  pub fn new(region: RawRegion) -> Self {
    Self {
      region,
      pos: Cell::new(0),
    }
  }

  #[inline]
  pub fn position(&self) -> usize {
    self.pos.get()
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.region.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.region.is_empty()
  }

  #[inline]
  pub fn reset(&self) {
    self.pos.set(0);
  }

  fn advance(&self, width: usize) -> Result<*mut u8, BridgeError> {
    let position = self.pos.get();
    let len = self.region.len();
    if position.checked_add(width).map_or(true, |end| end > len) {
      return Err(BridgeError::ScratchBufferOverflow {
        position,
        width,
        len,
      });
    }
    self.pos.set(position + width);
    // SAFETY: `position + width <= len`, and the region is valid for `len` bytes.
    Ok(unsafe { self.region.ptr().as_ptr().add(position) })
  }

  fn read<const N: usize>(&self) -> Result<[u8; N], BridgeError> {
    let ptr = self.advance(N)?;
    // SAFETY: `advance` checked the bounds; the region is never borrowed as a Rust reference.
    Ok(unsafe { ptr.cast::<[u8; N]>().read_unaligned() })
  }

  fn write<const N: usize>(&self, bytes: [u8; N]) -> Result<(), BridgeError> {
    let ptr = self.advance(N)?;
    // SAFETY: as in `read`.
    unsafe { ptr.cast::<[u8; N]>().write_unaligned(bytes) };
    Ok(())
  }

  pub fn read_i32(&self) -> Result<i32, BridgeError> {
    self.read().map(i32::from_ne_bytes)
  }

  pub fn read_i64(&self) -> Result<i64, BridgeError> {
    self.read().map(i64::from_ne_bytes)
  }

  pub fn read_f64(&self) -> Result<f64, BridgeError> {
    self.read().map(f64::from_ne_bytes)
  }

  pub fn write_i32(&self, value: i32) -> Result<(), BridgeError> {
    self.write(value.to_ne_bytes())
  }

  pub fn write_i64(&self, value: i64) -> Result<(), BridgeError> {
    self.write(value.to_ne_bytes())
  }

  pub fn write_f64(&self, value: f64) -> Result<(), BridgeError> {
    self.write(value.to_ne_bytes())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::ptr::NonNull;

  fn buffer(storage: &mut [u64]) -> ScratchBuffer {
    let len = storage.len() * 8;
    let ptr = NonNull::new(storage.as_mut_ptr().cast::<u8>()).unwrap();
    ScratchBuffer::new(unsafe { RawRegion::new(ptr, len) })
  }

  #[test]
  fn mixed_widths_advance_the_cursor_by_their_size() {
    let mut storage = [0u64; 4];
    let buf = buffer(&mut storage);
    buf.write_i32(-7).unwrap();
    assert_eq!(buf.position(), 4);
    buf.write_i64(i64::MIN).unwrap();
    assert_eq!(buf.position(), 12);
    buf.write_f64(0.5).unwrap();
    assert_eq!(buf.position(), 20);

    buf.reset();
    assert_eq!(buf.read_i32().unwrap(), -7);
    assert_eq!(buf.read_i64().unwrap(), i64::MIN);
    assert_eq!(buf.read_f64().unwrap(), 0.5);
  }

  #[test]
  fn reading_past_the_end_is_an_error_and_keeps_the_cursor() {
    let mut storage = [0u64; 1];
    let buf = buffer(&mut storage);
    buf.read_i32().unwrap();
    let err = buf.read_i64().unwrap_err();
    assert_eq!(
      err,
      BridgeError::ScratchBufferOverflow {
        position: 4,
        width: 8,
        len: 8,
      }
    );
    assert_eq!(buf.position(), 4);
    assert_eq!(buf.read_i32().unwrap(), 0);
  }
}
