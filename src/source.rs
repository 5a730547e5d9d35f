//! Raw memory sources backing the heap.
//!
//! The allocator never talks to the platform directly; it asks a
//! [`HeapSource`] for more bytes and wraps whatever comes back into blocks.
//! A source hands out one contiguous, grow-only region: each successful
//! `grow` returns a range starting exactly where the previous one ended, and
//! nothing is ever given back.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use libc::{c_void, intptr_t, sbrk};

use crate::error::HeapError;
use crate::header::DSIZE;

/// A grow-only provider of raw heap memory.
pub trait HeapSource {
  /// Extends the managed region by `extra` bytes.
  ///
  /// Returns the start of the newly usable range, contiguous with all ranges
  /// returned before, or `None` when the platform limit is reached. A failed
  /// grow leaves the region exactly as it was.
  fn grow(
    &mut self,
    extra: usize,
  ) -> Option<NonNull<u8>>;
}

/// Memory source backed by the program break (`sbrk`).
///
/// The first grow pads the break up to the 16-byte grid so that every block
/// the allocator lays out lands on aligned addresses. Contiguity holds as
/// long as nothing else in the process moves the break.
pub struct SbrkSource {
  aligned: bool,
}

impl SbrkSource {
  pub fn new() -> Self {
    Self { aligned: false }
  }
}

impl Default for SbrkSource {
  fn default() -> Self {
    Self::new()
  }
}

impl HeapSource for SbrkSource {
  fn grow(
    &mut self,
    extra: usize,
  ) -> Option<NonNull<u8>> {
    unsafe {
      if !self.aligned {
        let brk = sbrk(0) as usize;
        let pad = brk.next_multiple_of(DSIZE) - brk;

        if pad != 0 && sbrk(pad as intptr_t) == usize::MAX as *mut c_void {
          return None;
        }

        self.aligned = true;
      }

      let address = sbrk(extra as intptr_t);

      if address == usize::MAX as *mut c_void {
        return None;
      }

      NonNull::new(address as *mut u8)
    }
  }
}

/// Memory source carved out of one up-front reservation.
///
/// Reserves `capacity` bytes from the global allocator and plays them out
/// through an internal break pointer. Growing never moves the region, so
/// block addresses stay valid for the life of the source. This is the
/// source used by the test suite; it also gives every heap instance its own
/// independent region, where `sbrk` is one per process.
pub struct ArenaSource {
  base: *mut u8,
  layout: Layout,
  brk: usize,
}

impl ArenaSource {
  /// Reserves a region of `capacity` bytes, rounded up to the block grid.
  pub fn new(capacity: usize) -> Result<Self, HeapError> {
    let capacity = crate::align!(capacity.max(DSIZE));

    let layout = Layout::from_size_align(capacity, DSIZE)
      .map_err(|_| HeapError::ReserveFailed { capacity })?;

    // SAFETY: layout has non-zero size.
    let base = unsafe { alloc::alloc(layout) };

    if base.is_null() {
      return Err(HeapError::ReserveFailed { capacity });
    }

    Ok(Self { base, layout, brk: 0 })
  }

  /// Bytes still available for growth.
  pub fn remaining(&self) -> usize {
    self.layout.size() - self.brk
  }
}

impl HeapSource for ArenaSource {
  fn grow(
    &mut self,
    extra: usize,
  ) -> Option<NonNull<u8>> {
    if extra > self.remaining() {
      return None;
    }

    // SAFETY: brk + extra stays inside the reserved layout.
    let start = unsafe { self.base.add(self.brk) };
    self.brk += extra;

    NonNull::new(start)
  }
}

impl Drop for ArenaSource {
  fn drop(&mut self) {
    // SAFETY: base came from alloc with this exact layout.
    unsafe { alloc::dealloc(self.base, self.layout) };
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_arena_grow_is_contiguous() {
    let mut source = ArenaSource::new(4096).unwrap();

    let first = source.grow(16).unwrap();
    let second = source.grow(64).unwrap();

    assert_eq!(second.as_ptr() as usize, first.as_ptr() as usize + 16);
    assert_eq!(first.as_ptr() as usize % DSIZE, 0);
  }

  #[test]
  fn test_arena_exhaustion_leaves_region_intact() {
    let mut source = ArenaSource::new(64).unwrap();

    assert!(source.grow(48).is_some());
    let left = source.remaining();

    assert!(source.grow(left + 1).is_none());
    assert_eq!(source.remaining(), left);
    assert!(source.grow(left).is_some());
  }

  #[test]
  fn test_sbrk_grow_is_aligned() {
    let mut source = SbrkSource::new();

    let range = source.grow(32).unwrap();
    assert_eq!(range.as_ptr() as usize % DSIZE, 0);

    // The range is usable memory.
    unsafe { range.as_ptr().write_bytes(0xAB, 32) };
  }
}
