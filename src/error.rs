//! Allocator construction errors.

use std::error::Error;
use std::fmt;

/// Errors that can occur while setting up a heap.
///
/// Steady-state operations never return these: by contract, allocation
/// failure is a null pointer and deallocation cannot fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeapError {
  /// The memory source could not reserve its backing region.
  ReserveFailed {
    /// Number of bytes the reservation asked for.
    capacity: usize,
  },
  /// The memory source refused to extend the heap during initialization.
  GrowFailed {
    /// Number of bytes the extension asked for.
    requested: usize,
  },
}

impl fmt::Display for HeapError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Self::ReserveFailed { capacity } => {
        write!(f, "failed to reserve {capacity} bytes of backing memory")
      }
      Self::GrowFailed { requested } => {
        write!(f, "memory source refused to grow the heap by {requested} bytes")
      }
    }
  }
}

impl Error for HeapError {}
