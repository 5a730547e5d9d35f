//! Segregated free-space index.
//!
//! Free blocks are reachable from one of two structures:
//!
//! - thirteen doubly-linked lists segregated by size class, where class `i`
//!   holds sizes in `[2^(i+4), 2^(i+5))` and the last class is a catch-all
//!   for everything of 2^16 bytes and up;
//! - a singly-linked list holding only minimum-size (16-byte) blocks, which
//!   have a single payload word and cannot store a backward link.
//!
//! Insertion is always at the head. Removal is O(1) for class lists via the
//! stored links; the minimum-size list pays a linear scan instead, the price
//! of the missing backward pointer.

use std::ptr;

use crate::block::BlockPtr;
use crate::header::{DSIZE, Word};

/// Number of size-class lists.
pub(crate) const FREE_LIST_SIZE: usize = 13;

// log2 of the smallest class boundary (2^4 = 16 bytes).
const MIN_SIZE_SHIFT: u32 = 4;

/// Heads of every free list. Null means an empty list.
pub(crate) struct FreeIndex {
  classes: [*mut Word; FREE_LIST_SIZE],
  small: *mut Word,
}

impl FreeIndex {
  pub fn new() -> Self {
    Self {
      classes: [ptr::null_mut(); FREE_LIST_SIZE],
      small: ptr::null_mut(),
    }
  }

  /// Maps a block size to its class index.
  pub fn class_of(size: usize) -> usize {
    debug_assert!(size >= DSIZE && size % DSIZE == 0);

    let class = (usize::BITS - 1 - size.leading_zeros() - MIN_SIZE_SHIFT) as usize;
    class.min(FREE_LIST_SIZE - 1)
  }

  pub fn class_head(
    &self,
    class: usize,
  ) -> Option<BlockPtr> {
    let head = self.classes[class];

    if head.is_null() { None } else { Some(BlockPtr::new(head)) }
  }

  pub fn small_head(&self) -> Option<BlockPtr> {
    if self.small.is_null() {
      None
    } else {
      Some(BlockPtr::new(self.small))
    }
  }

  /// Links a free block at the head of the list its size selects.
  pub unsafe fn insert(
    &mut self,
    block: BlockPtr,
  ) {
    let size = unsafe { block.size() };

    if size <= DSIZE {
      // Minimum-size blocks carry a forward link only.
      unsafe { block.set_next_free(self.small_head()) };
      self.small = block.as_ptr();
      return;
    }

    let class = Self::class_of(size);
    let head = self.class_head(class);

    unsafe {
      block.set_prev_free(None);
      block.set_next_free(head);
    }

    if let Some(head) = head {
      unsafe { head.set_prev_free(Some(block)) };
    }

    self.classes[class] = block.as_ptr();
  }

  /// Unlinks a free block from whichever list holds it.
  pub unsafe fn remove(
    &mut self,
    block: BlockPtr,
  ) {
    let size = unsafe { block.size() };

    if size <= DSIZE {
      unsafe { self.remove_small(block) };
      return;
    }

    let class = Self::class_of(size);
    let prev = unsafe { block.prev_free() };
    let next = unsafe { block.next_free() };

    match prev {
      Some(prev) => unsafe { prev.set_next_free(next) },
      None => self.classes[class] = next.map_or(ptr::null_mut(), BlockPtr::as_ptr),
    }

    if let Some(next) = next {
      unsafe { next.set_prev_free(prev) };
    }
  }

  unsafe fn remove_small(
    &mut self,
    block: BlockPtr,
  ) {
    let mut prev: Option<BlockPtr> = None;
    let mut cur = self.small_head();

    while let Some(node) = cur {
      if node == block {
        let next = unsafe { node.next_free() };

        match prev {
          Some(prev) => unsafe { prev.set_next_free(next) },
          None => self.small = next.map_or(ptr::null_mut(), BlockPtr::as_ptr),
        }

        return;
      }

      prev = cur;
      cur = unsafe { node.next_free() };
    }
  }

  /// First-fit search in ascending size-class order.
  ///
  /// A minimum-size request is served straight from the minimum-size list
  /// when it has a block; everything else scans the candidate class and all
  /// larger ones, taking the first block big enough. Not best-fit: within a
  /// class the head wins even when a later block matches more tightly.
  pub unsafe fn find_fit(
    &self,
    asize: usize,
  ) -> Option<BlockPtr> {
    if asize <= DSIZE {
      if let Some(head) = self.small_head() {
        return Some(head);
      }
    }

    for class in Self::class_of(asize)..FREE_LIST_SIZE {
      let mut cur = self.class_head(class);

      while let Some(block) = cur {
        if unsafe { block.size() } >= asize {
          return Some(block);
        }

        cur = unsafe { block.next_free() };
      }
    }

    None
  }
}
