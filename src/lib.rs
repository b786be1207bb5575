//! # rmalloc - Boundary-Tag Memory Allocators
//!
//! This crate provides two classic dynamic memory allocators built on the
//! same **boundary-tag** block layout over an `sbrk`-style heap: an
//! explicit free-list allocator and a segregated free-list allocator.
//!
//! ## Overview
//!
//! The heap is a single contiguous region that grows one request at a
//! time and never shrinks. Every block carries a 4-byte header and an
//! identical 4-byte footer encoding its size and status, so both
//! neighbors of any block can be found in constant time:
//!
//! ```text
//!   +-------+------------+-------------------------------+----------+
//!   |  pad  |  prologue  |  header | payload | footer ... | epilogue |
//!   +-------+------------+-------------------------------+----------+
//!            left sentinel                                 right sentinel
//!
//!   free block:
//!   +--------+--------+--------+------------------+--------+
//!   | header |  pred  |  succ  |     (unused)     | footer |
//!   +--------+--------+--------+------------------+--------+
//!              4-byte offset links into the free index
//! ```
//!
//! Freed blocks are merged with free neighbors on the spot, then linked
//! into the free index:
//!
//! - [`ExplicitAllocator`] keeps a single doubly linked LIFO list and
//!   serves requests first-fit (or best-fit, see [`SearchMode`]).
//! - [`SegregatedAllocator`] keeps 20 size-class lists, sorted by
//!   ascending size, and additionally grows blocks **in place** on
//!   `realloc`, using a reservation tag to keep the successor block
//!   available for the next growth.
//!
//! ## Crate Structure
//!
//! ```text
//!   rmalloc
//!   ├── align       - align! macro (8-byte block granularity)
//!   ├── tag         - header/footer word codec
//!   ├── heap        - sbrk primitive, region and word access
//!   ├── explicit    - explicit free-list allocator
//!   └── segregated  - segregated free-list allocator
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rmalloc::{FixedArena, SegregatedAllocator};
//!
//! // A 1 MiB simulated heap; `SegregatedAllocator::new()` uses the
//! // real program break instead.
//! let mut allocator = SegregatedAllocator::with_memory(FixedArena::new(1 << 20)).unwrap();
//!
//! let ptr = allocator.malloc(64);
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     ptr.write_bytes(0x2A, 64);
//!     let bigger = allocator.realloc(ptr, 256);
//!     assert_eq!(bigger.read(), 0x2A);
//!     allocator.free(bigger);
//! }
//! ```
//!
//! ## Safety
//!
//! The payload pointers handed out are raw memory: writing through them
//! and releasing them are `unsafe`, with the usual contract: free only
//! what this allocator returned, exactly once, and never touch a block
//! after freeing it. The allocators do not detect violations.
//!
//! ## Limitations
//!
//! - **Single-threaded**: no synchronization; wrap an allocator in a
//!   `Mutex` if it must be shared.
//! - **Fixed alignment**: payloads are 8-byte aligned, nothing finer or
//!   coarser.
//! - **Memory is never returned to the OS**: freed blocks are recycled
//!   but the break only moves up.
//! - **Unix-only** when running on the real break ([`SystemBreak`]
//!   requires `libc::sbrk`); [`FixedArena`] works anywhere.

pub mod align;
mod explicit;
mod heap;
mod segregated;
pub mod tag;

pub use explicit::{ExplicitAllocator, MINIMUM, SearchMode};
pub use heap::{CHUNKSIZE, FixedArena, MAX_REQUEST, Sbrk, SystemBreak};
pub use segregated::{LISTLIMIT, REALLOC_BUFFER, SegregatedAllocator};
pub use tag::{DSIZE, HeaderWord, WSIZE};
