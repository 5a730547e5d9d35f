//! Block header codec.
//!
//! A block's metadata is a single [`Word`] packing the block size together
//! with three status bits:
//!
//! ```text
//!   63                                    4   3   2     1     0
//!   ┌─────────────────────────────────────┬───┬─────┬───────┬───────┐
//!   │ size (always a multiple of 16)      │ - │prev │ prev  │ alloc │
//!   │                                     │   │small│ alloc │       │
//!   └─────────────────────────────────────┴───┴─────┴───────┴───────┘
//! ```
//!
//! Because block sizes are rounded to the 16-byte grid, the low 4 bits of the
//! size are always zero and can carry the flags. The same encoding is used
//! for headers and footers, so a footer is a byte-identical copy of its
//! block's header.

/// Raw storage unit for headers, footers and free-list links.
pub type Word = u64;

/// Size of one word in bytes, which is also the header size.
pub const WSIZE: usize = size_of::<Word>();

/// Double-word size in bytes: the block alignment and the minimum block size.
pub const DSIZE: usize = 2 * WSIZE;

/// Minimum number of bytes requested from the memory source per extension.
pub const CHUNK_SIZE: usize = 1 << 12;

// Header bit layout.
const ALLOC_MASK: Word = 0x1;
const PREV_ALLOC_MASK: Word = 0x2;
const PREV_SMALL_MASK: Word = 0x4;
const SIZE_MASK: Word = !(0xF as Word);

/// Packs a block size and its three status flags into one header word.
///
/// `size` must be a multiple of 16; the flags occupy the low bits the
/// alignment guarantees are free.
pub fn pack(
  size: usize,
  alloc: bool,
  prev_alloc: bool,
  prev_small: bool,
) -> Word {
  let mut word = size as Word;

  if alloc {
    word |= ALLOC_MASK;
  }

  if prev_alloc {
    word |= PREV_ALLOC_MASK;
  }

  if prev_small {
    word |= PREV_SMALL_MASK;
  }

  word
}

/// Returns the block size stored in a header word.
pub fn extract_size(word: Word) -> usize {
  (word & SIZE_MASK) as usize
}

/// Returns true when the header marks its block allocated.
pub fn extract_alloc(word: Word) -> bool {
  (word & ALLOC_MASK) != 0
}

/// Returns true when the header marks the previous block allocated.
pub fn extract_prev_alloc(word: Word) -> bool {
  (word & PREV_ALLOC_MASK) != 0
}

/// Returns true when the header marks the previous block as minimum-size.
///
/// Minimum-size blocks carry no footer, so this bit is the only way a block
/// can locate such a predecessor.
pub fn extract_prev_small(word: Word) -> bool {
  (word & PREV_SMALL_MASK) != 0
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn test_pack_flags() {
    let word = pack(32, true, false, true);

    assert_eq!(extract_size(word), 32);
    assert!(extract_alloc(word));
    assert!(!extract_prev_alloc(word));
    assert!(extract_prev_small(word));
  }

  #[test]
  fn test_pack_zero_size() {
    // Sentinel encoding: the prologue and epilogue are allocated size-0 words.
    let word = pack(0, true, true, false);

    assert_eq!(extract_size(word), 0);
    assert!(extract_alloc(word));
    assert!(extract_prev_alloc(word));
  }

  proptest! {
    #[test]
    fn roundtrip(
      blocks in 0usize..(1 << 40),
      alloc: bool,
      prev_alloc: bool,
      prev_small: bool,
    ) {
      let size = blocks * DSIZE;
      let word = pack(size, alloc, prev_alloc, prev_small);

      prop_assert_eq!(extract_size(word), size);
      prop_assert_eq!(extract_alloc(word), alloc);
      prop_assert_eq!(extract_prev_alloc(word), prev_alloc);
      prop_assert_eq!(extract_prev_small(word), prev_small);
    }
  }
}
