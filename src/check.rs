//! Whole-heap consistency checking.
//!
//! `check_heap` cross-checks every invariant the allocator relies on: block
//! sizing and alignment, neighbor status bits, mandatory coalescing, sentinel
//! integrity, free-list membership and link symmetry, and the agreement
//! between the heap walk's free-block count and the index's contents. It
//! never repairs anything; the first violation is logged with expected and
//! actual values and the check reports failure.
//!
//! The allocator runs this as a debug-build pre/postcondition of every
//! public operation. It is diagnostic only and has no steady-state role.

use log::{debug, error};

use crate::block::BlockPtr;
use crate::header::{DSIZE, WSIZE, Word};
use crate::heap::SegAllocator;
use crate::list::FREE_LIST_SIZE;
use crate::source::HeapSource;

impl<S: HeapSource> SegAllocator<S> {
  /// Walks the heap and every free list, verifying all structural
  /// invariants. Returns false on the first violation, after logging it
  /// with `ctx` for attribution.
  pub fn check_heap(
    &self,
    ctx: &str,
  ) -> bool {
    unsafe { self.check_blocks(ctx) && self.check_index(ctx) }
  }

  unsafe fn check_blocks(
    &self,
    ctx: &str,
  ) -> bool {
    // The prologue footer: allocated, size 0, no predecessor.
    let prologue = unsafe { BlockPtr::new(self.heap_lo as *mut Word).header() };

    if prologue != crate::header::pack(0, true, false, false) {
      error!("{ctx}: bad prologue word {prologue:#x}");
      return false;
    }

    let mut cur = self.first;
    let mut prev_alloc = true;
    let mut prev_small = false;

    unsafe {
      while cur.size() > 0 {
        let size = cur.size();

        if cur.addr() + size > self.heap_hi - WSIZE {
          error!(
            "{ctx}: block at {:#x} of size {size} runs past the heap end {:#x}",
            cur.addr(),
            self.heap_hi
          );
          return false;
        }

        if size % DSIZE != 0 {
          error!("{ctx}: block at {:#x} has size {size}, not a multiple of {DSIZE}", cur.addr());
          return false;
        }

        if cur.payload() as usize % DSIZE != 0 {
          error!("{ctx}: payload at {:p} is not {DSIZE}-byte aligned", cur.payload());
          return false;
        }

        if cur.prev_alloc() != prev_alloc {
          error!(
            "{ctx}: block at {:#x} prev_alloc bit is {}, predecessor is actually {}",
            cur.addr(),
            cur.prev_alloc(),
            prev_alloc
          );
          return false;
        }

        if cur.prev_small() != prev_small {
          error!(
            "{ctx}: block at {:#x} prev_small bit is {}, predecessor is actually {}",
            cur.addr(),
            cur.prev_small(),
            prev_small
          );
          return false;
        }

        if !cur.alloc() {
          if !prev_alloc {
            error!("{ctx}: adjacent free blocks at {:#x}", cur.addr());
            return false;
          }

          if size > DSIZE && cur.footer() != cur.header() {
            error!(
              "{ctx}: block at {:#x} header {:#x} disagrees with footer {:#x}",
              cur.addr(),
              cur.header(),
              cur.footer()
            );
            return false;
          }
        }

        prev_alloc = cur.alloc();
        prev_small = cur.is_min();
        cur = cur.next();
      }

      // The walk ends on the epilogue header, which must be the last word.
      if cur.addr() != self.heap_hi - WSIZE {
        error!("{ctx}: epilogue at {:#x}, expected {:#x}", cur.addr(), self.heap_hi - WSIZE);
        return false;
      }

      if !cur.alloc() || cur.size() != 0 {
        error!("{ctx}: bad epilogue word {:#x}", cur.header());
        return false;
      }

      if cur.prev_alloc() != prev_alloc || cur.prev_small() != prev_small {
        error!(
          "{ctx}: epilogue neighbor bits ({}, {}) do not match last block ({}, {})",
          cur.prev_alloc(),
          cur.prev_small(),
          prev_alloc,
          prev_small
        );
        return false;
      }
    }

    true
  }

  unsafe fn check_index(
    &self,
    ctx: &str,
  ) -> bool {
    let heap_free = unsafe { self.count_free_blocks() };
    let mut listed = 0usize;

    unsafe {
      let mut cur = self.index.small_head();

      while let Some(block) = cur {
        listed += 1;

        if !self.within_heap(block) {
          error!("{ctx}: minimum-size list entry {:#x} lies outside the heap", block.addr());
          return false;
        }

        if block.alloc() {
          error!("{ctx}: minimum-size list entry {:#x} is allocated", block.addr());
          return false;
        }

        if block.size() != DSIZE {
          error!(
            "{ctx}: minimum-size list entry {:#x} has size {}, expected {DSIZE}",
            block.addr(),
            block.size()
          );
          return false;
        }

        cur = block.next_free();
      }

      for class in 0..FREE_LIST_SIZE {
        let mut cur = self.index.class_head(class);

        while let Some(block) = cur {
          listed += 1;

          if !self.within_heap(block) {
            error!("{ctx}: class {class} entry {:#x} lies outside the heap", block.addr());
            return false;
          }

          if block.alloc() {
            error!("{ctx}: class {class} entry {:#x} is allocated", block.addr());
            return false;
          }

          if block.footer() != block.header() {
            error!(
              "{ctx}: class {class} entry {:#x} header {:#x} disagrees with footer {:#x}",
              block.addr(),
              block.header(),
              block.footer()
            );
            return false;
          }

          let size = block.size();
          let lower = 1usize << (class + 4);

          let in_class = if class == FREE_LIST_SIZE - 1 {
            size >= lower
          } else {
            size >= lower && size < lower * 2
          };

          if !in_class {
            error!("{ctx}: class {class} entry {:#x} has out-of-class size {size}", block.addr());
            return false;
          }

          if let Some(next) = block.next_free() {
            if next.prev_free() != Some(block) {
              error!(
                "{ctx}: class {class} links broken between {:#x} and {:#x}",
                block.addr(),
                next.addr()
              );
              return false;
            }
          }

          cur = block.next_free();
        }
      }
    }

    if listed != heap_free {
      error!("{ctx}: heap walk found {heap_free} free blocks, the index holds {listed}");
      self.heap_dump();
      return false;
    }

    true
  }

  unsafe fn count_free_blocks(&self) -> usize {
    let mut count = 0;
    let mut cur = self.first;

    unsafe {
      while cur.size() > 0 {
        if !cur.alloc() {
          count += 1;
        }
        cur = cur.next();
      }
    }

    count
  }

  fn within_heap(
    &self,
    block: BlockPtr,
  ) -> bool {
    block.addr() >= self.first.addr() && block.addr() < self.heap_hi
  }

  /// Dumps every block and free-list entry at debug level.
  pub fn heap_dump(&self) {
    unsafe {
      let mut cur = self.first;

      debug!("heap {:#x}..{:#x}", self.heap_lo, self.heap_hi);

      while cur.size() > 0 {
        if cur.alloc() {
          debug!(
            "  block {:#x} size {} allocated prev_alloc {} prev_small {}",
            cur.addr(),
            cur.size(),
            cur.prev_alloc(),
            cur.prev_small()
          );
        } else if cur.is_min() {
          // No backward link word to read on a minimum-size block.
          debug!(
            "  block {:#x} size {} free next {:?}",
            cur.addr(),
            cur.size(),
            cur.next_free().map(BlockPtr::addr)
          );
        } else {
          debug!(
            "  block {:#x} size {} free next {:?} prev {:?}",
            cur.addr(),
            cur.size(),
            cur.next_free().map(BlockPtr::addr),
            cur.prev_free().map(BlockPtr::addr)
          );
        }

        cur = cur.next();
      }

      for class in 0..FREE_LIST_SIZE {
        let mut cur = self.index.class_head(class);

        while let Some(block) = cur {
          debug!("  class {class} entry {:#x} size {}", block.addr(), block.size());
          cur = block.next_free();
        }
      }

      let mut cur = self.index.small_head();

      while let Some(block) = cur {
        debug!("  minimum-size entry {:#x}", block.addr());
        cur = block.next_free();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::ArenaSource;

  fn heap() -> SegAllocator<ArenaSource> {
    SegAllocator::new(ArenaSource::new(1 << 16).unwrap()).unwrap()
  }

  #[test]
  fn test_fresh_heap_passes() {
    let heap = heap();
    assert!(heap.check_heap("fresh"));
  }

  #[test]
  fn test_detects_spoofed_allocation_bit() {
    let mut heap = heap();

    unsafe {
      let bp = heap.allocate(24);
      bp.write_bytes(0, 24);

      let block = BlockPtr::from_payload(bp);

      // Clear the allocation bit behind the allocator's back: the block is
      // now "free" but absent from the index and adjacent to the remainder.
      block.write_header(block.size(), false, block.prev_alloc(), block.prev_small());

      assert!(!heap.check_heap("spoofed alloc bit"));
    }
  }

  #[test]
  fn test_detects_misaligned_size() {
    let heap = heap();

    unsafe {
      let block = heap.first;

      // Knock the initial free block's size off the 16-byte grid.
      block.write_header(block.size() + WSIZE, false, true, false);

      assert!(!heap.check_heap("misaligned size"));
    }
  }

  #[test]
  fn test_detects_broken_neighbor_bits() {
    let mut heap = heap();

    unsafe {
      let bp = heap.allocate(24);
      let block = BlockPtr::from_payload(bp);

      // The successor's prev_alloc bit claims a free predecessor.
      let next = block.next();
      next.write_header(next.size(), next.alloc(), false, next.prev_small());

      assert!(!heap.check_heap("broken neighbor bits"));
    }
  }

  #[test]
  fn test_detects_index_count_mismatch() {
    let mut heap = heap();

    unsafe {
      let _left = heap.allocate(24);
      let bp = heap.allocate(24);
      let _right = heap.allocate(24);

      let block = BlockPtr::from_payload(bp);

      // Free the middle block by hand with a matching footer and fixed-up
      // successor bits, but never insert it into the index: only the
      // reconciliation count can catch this.
      let size = block.size();
      block.write_header(size, false, block.prev_alloc(), block.prev_small());
      block.write_footer(size, false, block.prev_alloc(), block.prev_small());

      let next = block.next();
      next.write_header(next.size(), next.alloc(), false, block.is_min());

      assert!(!heap.check_heap("uncounted free block"));
    }
  }
}
