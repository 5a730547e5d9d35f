//! The allocator itself: block placement, splitting, coalescing, growth.

use std::ptr;

use log::{debug, trace};

use crate::block::BlockPtr;
use crate::error::HeapError;
use crate::header::{CHUNK_SIZE, DSIZE, WSIZE, Word, pack};
use crate::list::FreeIndex;
use crate::source::{HeapSource, SbrkSource};

/// A segregated-list allocator over one contiguous, growable heap.
///
/// Each instance owns its memory source and free-list index outright, so
/// independent heaps can coexist (one per test, for example). The public
/// operations mirror the classic malloc surface: raw payload pointers out,
/// null for failure, and the caller is trusted to hand back only pointers
/// this instance produced.
pub struct SegAllocator<S: HeapSource = SbrkSource> {
  source: S,
  pub(crate) index: FreeIndex,
  /// First real block; fixed for the life of the heap.
  pub(crate) first: BlockPtr,
  /// Address of the prologue footer.
  pub(crate) heap_lo: usize,
  /// One past the epilogue header.
  pub(crate) heap_hi: usize,
}

impl<S: HeapSource> SegAllocator<S> {
  /// Sets up an empty heap on `source`: prologue and epilogue sentinels,
  /// then an initial extension of one chunk.
  ///
  /// Fails only if the source refuses to grow.
  pub fn new(mut source: S) -> Result<Self, HeapError> {
    let start = source
      .grow(DSIZE)
      .ok_or(HeapError::GrowFailed { requested: DSIZE })?;
    let words = start.as_ptr().cast::<Word>();

    // SAFETY: the source just handed us these two words.
    unsafe {
      words.write(pack(0, true, false, false)); // prologue footer
      words.add(1).write(pack(0, true, true, false)); // epilogue header
    }

    let mut heap = Self {
      source,
      index: FreeIndex::new(),
      first: BlockPtr::new(unsafe { words.add(1) }),
      heap_lo: words as usize,
      heap_hi: words as usize + DSIZE,
    };

    // SAFETY: sentinels are in place; extend keeps them consistent.
    if unsafe { heap.extend(CHUNK_SIZE) }.is_none() {
      return Err(HeapError::GrowFailed { requested: CHUNK_SIZE });
    }

    debug_assert!(heap.check_heap("new"));

    Ok(heap)
  }

  /// Allocates `size` bytes and returns the payload pointer, aligned to 16
  /// bytes. Returns null for a zero-size request or when the memory source
  /// is exhausted; existing allocations are never disturbed by failure.
  ///
  /// # Safety
  ///
  /// The returned memory is uninitialized. The pointer must only be released
  /// through [`deallocate`](Self::deallocate) or
  /// [`reallocate`](Self::reallocate) on this same instance.
  pub unsafe fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    debug_assert!(self.check_heap("allocate enter"));

    if size == 0 {
      return ptr::null_mut();
    }

    // A request this large can never be satisfied; bailing here also keeps
    // the rounding below from overflowing.
    if size > usize::MAX - 2 * DSIZE {
      return ptr::null_mut();
    }

    // Room for the header, rounded to the block grid.
    let asize = crate::align!(size + WSIZE);

    let block = match unsafe { self.index.find_fit(asize) } {
      Some(block) => block,
      None => {
        debug!("no fit for {asize} byte block, extending heap");

        let extend_size = asize.max(CHUNK_SIZE);

        match unsafe { self.extend(extend_size) } {
          Some(block) => block,
          None => return ptr::null_mut(),
        }
      }
    };

    unsafe {
      debug_assert!(!block.alloc());

      // Mark allocated; the neighbor bits carry over untouched.
      block.write_header(block.size(), true, block.prev_alloc(), block.prev_small());

      self.split(block, asize);

      let bp = block.payload();
      debug_assert!(self.check_heap("allocate exit"));
      bp
    }
  }

  /// Releases a payload pointer back to the heap.
  ///
  /// Null is a no-op, and so is a block that is already free: double frees
  /// are absorbed rather than corrupting the index.
  ///
  /// # Safety
  ///
  /// `bp` must be null or a payload pointer obtained from this instance and
  /// not used again after this call.
  pub unsafe fn deallocate(
    &mut self,
    bp: *mut u8,
  ) {
    debug_assert!(self.check_heap("deallocate enter"));

    if bp.is_null() {
      return;
    }

    let block = unsafe { BlockPtr::from_payload(bp) };

    if !unsafe { block.alloc() } {
      return;
    }

    unsafe {
      let size = block.size();

      block.write_header(size, false, block.prev_alloc(), block.prev_small());

      if size > DSIZE {
        block.write_footer(size, false, block.prev_alloc(), block.prev_small());
      }

      self.coalesce(block);
    }

    debug_assert!(self.check_heap("deallocate exit"));
  }

  /// Resizes an allocation, moving it. `size == 0` frees and returns null;
  /// a null `bp` is a plain allocation. A pointer that does not denote a
  /// live allocated block on this heap is rejected with null.
  ///
  /// The first `min(size, old payload capacity)` bytes are preserved. This
  /// always allocates fresh and copies, trading throughput for simplicity;
  /// it never grows in place.
  ///
  /// # Safety
  ///
  /// Same contract as [`allocate`](Self::allocate) and
  /// [`deallocate`](Self::deallocate): `bp` is null or came from this
  /// instance, and the old pointer is dead once a non-null pointer returns.
  pub unsafe fn reallocate(
    &mut self,
    bp: *mut u8,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      unsafe { self.deallocate(bp) };
      return ptr::null_mut();
    }

    if bp.is_null() {
      return unsafe { self.allocate(size) };
    }

    let block = unsafe { BlockPtr::from_payload(bp) };

    if !unsafe { self.owns(block) } {
      return ptr::null_mut();
    }

    let copy_size = unsafe { block.payload_size() }.min(size);

    let new_bp = unsafe { self.allocate(size) };

    // Exhaustion leaves the original allocation untouched.
    if new_bp.is_null() {
      return ptr::null_mut();
    }

    // SAFETY: distinct live blocks; copy_size fits both payloads.
    unsafe {
      ptr::copy_nonoverlapping(bp, new_bp, copy_size);
      self.deallocate(bp);
    }

    new_bp
  }

  /// Allocates an array of `count` elements of `elem_size` bytes each, with
  /// the payload zero-filled. Returns null when the element count and size
  /// multiply past `usize::MAX`, or on exhaustion.
  ///
  /// # Safety
  ///
  /// Same contract as [`allocate`](Self::allocate).
  pub unsafe fn zero_allocate(
    &mut self,
    count: usize,
    elem_size: usize,
  ) -> *mut u8 {
    let Some(total) = count.checked_mul(elem_size) else {
      return ptr::null_mut();
    };

    let bp = unsafe { self.allocate(total) };

    if !bp.is_null() {
      unsafe { ptr::write_bytes(bp, 0, total) };
    }

    bp
  }

  /// Grows the heap and wraps the new range as a free block.
  ///
  /// The old epilogue header becomes the new block's header, a fresh
  /// epilogue is written past it, and the block is coalesced with any free
  /// block that was sitting at the old heap end.
  unsafe fn extend(
    &mut self,
    size: usize,
  ) -> Option<BlockPtr> {
    let size = crate::align!(size);

    trace!("extending heap by {size} bytes");

    let bp = self.source.grow(size)?;

    unsafe {
      // The range starts where the old epilogue's payload would be, so the
      // epilogue header is reused as the new block's header.
      let block = BlockPtr::from_payload(bp.as_ptr());

      let prev_alloc = block.prev_alloc();
      let prev_small = block.prev_small();

      block.write_header(size, false, prev_alloc, prev_small);
      block.write_footer(size, false, prev_alloc, prev_small);

      let epilogue = block.next();
      epilogue.write_header(0, true, false, block.is_min());

      self.heap_hi += size;

      Some(self.coalesce(block))
    }
  }

  /// Carves the tail of an oversized allocated block into a free remainder.
  ///
  /// A remainder below the minimum block size stays with the allocation;
  /// otherwise the block shrinks to `asize` and the remainder re-enters the
  /// heap through the coalescing engine.
  unsafe fn split(
    &mut self,
    block: BlockPtr,
    asize: usize,
  ) {
    unsafe {
      debug_assert!(block.alloc());

      self.index.remove(block);

      let block_size = block.size();

      if block_size - asize < DSIZE {
        self.sync_next_bits(block);
        return;
      }

      block.write_header(asize, true, block.prev_alloc(), block.prev_small());

      let remainder = block.next();
      let remainder_size = block_size - asize;
      let prev_small = asize <= DSIZE;

      remainder.write_header(remainder_size, false, true, prev_small);

      if remainder_size > DSIZE {
        remainder.write_footer(remainder_size, false, true, prev_small);
      }

      self.coalesce(remainder);
    }
  }

  /// Merges a free block with its free neighbors, reinserts the survivor,
  /// and refreshes the successor's neighbor bits. Returns the surviving
  /// block, whose address is the previous block's when that side merged.
  unsafe fn coalesce(
    &mut self,
    block: BlockPtr,
  ) -> BlockPtr {
    unsafe {
      debug_assert!(!block.alloc());

      let next = block.next();
      let prev_alloc = block.prev_alloc();
      let next_alloc = next.alloc();

      let merged = if prev_alloc && next_alloc {
        block
      } else if prev_alloc && !next_alloc {
        let size = block.size() + next.size();

        self.index.remove(next);

        block.write_header(size, false, block.prev_alloc(), block.prev_small());
        block.write_footer(size, false, block.prev_alloc(), block.prev_small());

        block
      } else if !prev_alloc && next_alloc {
        let prev = block.prev();
        let size = block.size() + prev.size();

        self.index.remove(prev);

        prev.write_header(size, false, prev.prev_alloc(), prev.prev_small());
        prev.write_footer(size, false, prev.prev_alloc(), prev.prev_small());

        prev
      } else {
        let prev = block.prev();
        let size = block.size() + next.size() + prev.size();

        self.index.remove(prev);
        self.index.remove(next);

        prev.write_header(size, false, prev.prev_alloc(), prev.prev_small());
        prev.write_footer(size, false, prev.prev_alloc(), prev.prev_small());

        prev
      };

      self.index.insert(merged);
      self.sync_next_bits(merged);

      debug_assert!(!merged.alloc());

      merged
    }
  }

  /// Rewrites the successor's header so its `prev_alloc` and `prev_small`
  /// bits reflect `block` as it stands now.
  unsafe fn sync_next_bits(
    &mut self,
    block: BlockPtr,
  ) {
    unsafe {
      let next = block.next();
      next.write_header(next.size(), next.alloc(), block.alloc(), block.is_min());
    }
  }

  /// Whether `block` is a live allocated block on this heap.
  ///
  /// A bounds and grid check rejects foreign pointers cheaply; anything that
  /// survives is confirmed against the block chain itself, so the accepted
  /// set is exactly the chain's allocated blocks.
  unsafe fn owns(
    &self,
    block: BlockPtr,
  ) -> bool {
    let addr = block.addr();

    if addr < self.first.addr() || addr >= self.heap_hi {
      return false;
    }

    // Headers sit one word before a 16-byte payload boundary.
    if addr % DSIZE != WSIZE {
      return false;
    }

    let mut cur = self.first;

    while unsafe { cur.size() } > 0 {
      if cur == block {
        return unsafe { cur.alloc() };
      }

      cur = unsafe { cur.next() };
    }

    false
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::ArenaSource;

  fn heap() -> SegAllocator<ArenaSource> {
    SegAllocator::new(ArenaSource::new(1 << 20).unwrap()).unwrap()
  }

  /// Sizes of the free blocks found by a full heap walk.
  unsafe fn free_block_sizes<S: HeapSource>(heap: &SegAllocator<S>) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut cur = heap.first;

    unsafe {
      while cur.size() > 0 {
        if !cur.alloc() {
          sizes.push(cur.size());
        }
        cur = cur.next();
      }
    }

    sizes
  }

  #[test]
  fn test_allocate_rounds_to_block_grid() {
    // 24 bytes plus the header, rounded to the grid, is a 32-byte block.
    let mut heap = heap();

    unsafe {
      let bp = heap.allocate(24);
      assert!(!bp.is_null());

      let block = BlockPtr::from_payload(bp);
      assert!(block.alloc());
      assert_eq!(block.size(), 32);

      assert!(heap.check_heap("after allocate(24)"));
    }
  }

  #[test]
  fn test_free_coalesces_back_to_one_block() {
    // Allocate then free leaves the whole chunk as one free block again.
    let mut heap = heap();

    unsafe {
      let bp = heap.allocate(8);
      assert!(!bp.is_null());

      heap.deallocate(bp);

      assert_eq!(free_block_sizes(&heap), vec![CHUNK_SIZE]);
      assert!(heap.check_heap("after full coalesce"));
    }
  }

  #[test]
  fn test_first_fit_reuses_freed_block() {
    // Freeing the first of two large blocks and allocating the same size
    // again reuses the freed address instead of growing the heap.
    let mut heap = heap();

    unsafe {
      let first = heap.allocate(4000);
      let second = heap.allocate(4000);
      assert!(!first.is_null() && !second.is_null());

      let high_water = heap.heap_hi;

      heap.deallocate(first);

      let third = heap.allocate(4000);
      assert_eq!(third, first);
      assert_eq!(heap.heap_hi, high_water);
    }
  }

  #[test]
  fn test_zero_allocate_zero_fills() {
    let mut heap = heap();

    unsafe {
      let bp = heap.zero_allocate(1000, 8);
      assert!(!bp.is_null());

      for i in 0..8000 {
        assert_eq!(bp.add(i).read(), 0);
      }
    }
  }

  #[test]
  fn test_zero_allocate_rejects_overflow() {
    let mut heap = heap();

    unsafe {
      assert!(heap.zero_allocate(usize::MAX, 2).is_null());
      assert!(heap.check_heap("after overflow reject"));
    }
  }

  #[test]
  fn test_reallocate_null_and_zero_redirects() {
    // reallocate(null, n) allocates; reallocate(p, 0) frees and returns
    // null.
    let mut heap = heap();

    unsafe {
      let bp = heap.reallocate(ptr::null_mut(), 64);
      assert!(!bp.is_null());
      assert!(BlockPtr::from_payload(bp).alloc());

      assert!(heap.reallocate(bp, 0).is_null());
      assert_eq!(free_block_sizes(&heap), vec![CHUNK_SIZE]);
    }
  }

  #[test]
  fn test_reallocate_preserves_data() {
    let mut heap = heap();

    unsafe {
      let bp = heap.allocate(64);
      for i in 0..64 {
        bp.add(i).write(i as u8);
      }

      let grown = heap.reallocate(bp, 128);
      assert!(!grown.is_null());
      for i in 0..64 {
        assert_eq!(grown.add(i).read(), i as u8);
      }

      let shrunk = heap.reallocate(grown, 16);
      assert!(!shrunk.is_null());
      for i in 0..16 {
        assert_eq!(shrunk.add(i).read(), i as u8);
      }
    }
  }

  #[test]
  fn test_reallocate_rejects_foreign_pointer() {
    let mut heap = heap();
    let mut foreign = [0u8; 64];

    unsafe {
      assert!(heap.reallocate(foreign.as_mut_ptr().add(16), 32).is_null());

      // A freed pointer is no longer owned either.
      let bp = heap.allocate(32);
      heap.deallocate(bp);
      assert!(heap.reallocate(bp, 64).is_null());
    }
  }

  #[test]
  fn test_double_free_is_noop() {
    let mut heap = heap();

    unsafe {
      let bp = heap.allocate(32);
      heap.deallocate(bp);
      heap.deallocate(bp);

      assert_eq!(free_block_sizes(&heap), vec![CHUNK_SIZE]);
      assert!(heap.check_heap("after double free"));
    }
  }

  #[test]
  fn test_allocate_zero_is_null() {
    let mut heap = heap();

    unsafe {
      assert!(heap.allocate(0).is_null());
    }
  }

  #[test]
  fn test_payloads_are_double_word_aligned() {
    let mut heap = heap();

    unsafe {
      for size in [1, 8, 24, 100, 4000, 70000] {
        let bp = heap.allocate(size);
        assert!(!bp.is_null());
        assert_eq!(bp as usize % DSIZE, 0, "size {size}");
      }
    }
  }

  #[test]
  fn test_min_size_blocks_reused_from_small_list() {
    // Free a 16-byte block wedged between allocations: it cannot coalesce,
    // so it lands on the minimum-size list and serves the next request.
    let mut heap = heap();

    unsafe {
      let _left = heap.allocate(8);
      let middle = heap.allocate(8);
      let _right = heap.allocate(8);

      heap.deallocate(middle);
      assert_eq!(free_block_sizes(&heap).len(), 2);

      let again = heap.allocate(8);
      assert_eq!(again, middle);
    }
  }

  #[test]
  fn test_exhaustion_returns_null_and_preserves_heap() {
    let mut heap = SegAllocator::new(ArenaSource::new(8192).unwrap()).unwrap();

    unsafe {
      let bp = heap.allocate(64);
      assert!(!bp.is_null());
      bp.write_bytes(0x5A, 64);

      assert!(heap.allocate(1 << 20).is_null());

      for i in 0..64 {
        assert_eq!(bp.add(i).read(), 0x5A);
      }
      assert!(heap.check_heap("after exhaustion"));
    }
  }

  #[test]
  fn test_mixed_workload_keeps_invariants() {
    let mut heap = heap();

    unsafe {
      let mut live = Vec::new();

      for round in 0..6 {
        for size in [8, 24, 120, 500, 3000] {
          let bp = heap.allocate(size + round);
          assert!(!bp.is_null());
          live.push(bp);
        }

        // Free every other pointer to force coalescing in both directions.
        let mut i = 0;
        live.retain(|bp| {
          i += 1;
          if i % 2 == 0 {
            heap.deallocate(*bp);
            false
          } else {
            true
          }
        });

        assert!(heap.check_heap("mixed workload round"));
      }

      for bp in live {
        heap.deallocate(bp);
      }

      assert_eq!(free_block_sizes(&heap).len(), 1);
      assert!(heap.check_heap("mixed workload drained"));
    }
  }
}
