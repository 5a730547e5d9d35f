//! # segalloc - A Segregated-List Memory Allocator
//!
//! This crate provides a **segregated free-list allocator** over a single
//! contiguous heap that grows on demand, by default through the `sbrk`
//! system call. It supports allocate, deallocate, resize and zeroed-array
//! allocation with 16-byte-aligned payloads and constant-time-ish placement.
//!
//! ## Overview
//!
//! ```text
//!   Heap Region:
//!
//!   ┌──────────┬─────────────┬──────────┬─────────────┬─────┬──────────┐
//!   │ prologue │ block       │ block    │ block       │ ... │ epilogue │
//!   │ (0, A)   │ (allocated) │ (free)   │ (allocated) │     │ (0, A)   │
//!   └──────────┴─────────────┴──────────┴─────────────┴─────┴──────────┘
//!        ▲                                                        ▲
//!        │                                                        │
//!   zero-size allocated sentinels bound the heap so every real block
//!   always has a neighbor on both sides.
//! ```
//!
//! All bookkeeping lives inside the managed memory itself. Each block starts
//! with a one-word header packing its size and three status bits; free
//! blocks additionally carry list links in the payload area and, above the
//! minimum size, a trailing footer copy of the header:
//!
//! ```text
//!   Allocated block             Free block (> 16 bytes)   Free block (16 bytes)
//!   ┌─────────────────┐         ┌─────────────────┐       ┌─────────────────┐
//!   │ header          │         │ header          │       │ header          │
//!   ├─────────────────┤         ├─────────────────┤       ├─────────────────┤
//!   │                 │         │ next free       │       │ next free       │
//!   │ payload         │         ├─────────────────┤       └─────────────────┘
//!   │ (returned to    │         │ prev free       │
//!   │  the caller)    │         ├─────────────────┤
//!   │                 │         │       ...       │
//!   │                 │         ├─────────────────┤
//!   │                 │         │ footer          │
//!   └─────────────────┘         └─────────────────┘
//! ```
//!
//! Free blocks are indexed by thirteen size-class lists (class `i` spans
//! sizes `[2^(i+4), 2^(i+5))`, the last class catches everything from 2^16
//! up) plus a dedicated singly-linked list for 16-byte blocks, which are too
//! small for a backward link or footer. Placement is first-fit in ascending
//! class order; freed blocks coalesce eagerly with both neighbors, so no two
//! free blocks are ever adjacent.
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Rounding macros (round_up!, align!)
//!   ├── header     - Header word codec (size + status bits)
//!   ├── block      - Block handles and neighbor navigation (internal)
//!   ├── list       - Segregated free-list index (internal)
//!   ├── heap       - SegAllocator: placement, splitting, coalescing, growth
//!   ├── check      - Whole-heap invariant checker
//!   └── source     - Memory sources (SbrkSource, ArenaSource)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use segalloc::{SbrkSource, SegAllocator};
//!
//! fn main() {
//!     let mut heap = SegAllocator::new(SbrkSource::new()).unwrap();
//!
//!     unsafe {
//!         // Allocate 24 bytes; the pointer is 16-byte aligned.
//!         let ptr = heap.allocate(24);
//!         ptr.write_bytes(0x2A, 24);
//!
//!         // Resize, preserving the payload.
//!         let ptr = heap.reallocate(ptr, 64);
//!
//!         // Free the memory.
//!         heap.deallocate(ptr);
//!     }
//! }
//! ```
//!
//! Heaps are explicit values, not process-wide state: each [`SegAllocator`]
//! owns its own [`HeapSource`] and free lists, so tests can run dozens of
//! independent heaps backed by [`ArenaSource`] reservations.
//!
//! ## How It Works
//!
//! A miss in the free lists extends the heap by at least one 4 KiB chunk:
//!
//! ```text
//!   Program Memory Layout (SbrkSource):
//!
//!   High Address ┌─────────────────────┐
//!                │       Stack         │ ↓ grows down
//!                │         │           │
//!                │         ▼           │
//!                │                     │
//!                │         ▲           │
//!                │         │           │
//!                │       Heap          │ ↑ grows up (sbrk)
//!                ├─────────────────────┤ ← Program Break
//!                │        ...          │
//!   Low Address  └─────────────────────┘
//! ```
//!
//! The new range is stitched on at the old epilogue, coalesced with any free
//! block that ended the heap, and placement retries against it. Oversized
//! placements split: the tail beyond the request becomes a new free block.
//!
//! ## Features
//!
//! - **In-place metadata**: headers, footers and list links live in the heap
//!   itself; no side tables to keep in sync
//! - **Segregated first-fit**: size-class lists bound search work without an
//!   exhaustive best-fit scan
//! - **Eager coalescing**: both neighbors merge on every free
//! - **Defensive surface**: double frees and foreign resize pointers are
//!   absorbed or rejected instead of corrupting the heap
//! - **Checkable**: [`SegAllocator::check_heap`] validates every invariant,
//!   and debug builds run it around each operation
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives; wrap the whole
//!   allocator in a lock or give each thread its own heap
//! - **The heap only grows**: memory is never returned to the platform
//! - **Fixed alignment**: payloads are 16-byte aligned, nothing stronger
//! - **Resize always copies**: no in-place growth
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory management.
//! All allocation and deallocation operations require `unsafe` blocks.

pub mod align;
mod block;
mod check;
mod error;
pub mod header;
mod heap;
mod list;
mod source;

pub use error::HeapError;
pub use heap::SegAllocator;
pub use source::{ArenaSource, HeapSource, SbrkSource};
