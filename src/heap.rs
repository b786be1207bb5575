//! Heap region management.
//!
//! The allocators see the heap as one contiguous run of bytes obtained
//! from an `sbrk`-style primitive and grown one request at a time, never
//! shrunk. Blocks are identified by the byte offset of their payload from
//! the start of the region, and the link words stored inside free blocks
//! are offsets too, so the whole structure is independent of where the
//! region happens to sit in the address space. Raw pointers only appear
//! at the public API boundary.
//!
//! Layout of a live heap:
//!
//! ```text
//!   offset 0                                        size
//!   +-------+------------+--- ... blocks ... ---+----------+
//!   |  pad  |  prologue  |  hdr | payload | ftr |  0/alloc |
//!   +-------+------------+--- ... --------------+----------+
//!    4 bytes  sentinel                            epilogue
//! ```
//!
//! The prologue is a minimal allocated block and the epilogue is a lone
//! allocated header of size zero. Together they guarantee that neighbor
//! lookups from any real block stay inside the region.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use libc::{c_void, intptr_t, sbrk};

use crate::tag::{DSIZE, HeaderWord, WSIZE};

/// Default heap-extension granularity in bytes.
pub const CHUNKSIZE: usize = 4096;

/// Offset used as the null link in free-list words. Offset zero is the
/// alignment pad at the bottom of the heap, never a payload.
pub const NIL: usize = 0;

/// Requests above this many bytes are refused outright. Sizes travel in
/// 4-byte header words, so the heap itself stays below the 32-bit range.
pub const MAX_REQUEST: usize = (u32::MAX as usize) / 2;

const MAX_HEAP: usize = (u32::MAX as usize) & !0x7;

/// The `sbrk`-style primitive the heap grows through.
///
/// `sbrk(incr)` must extend the break by exactly `incr` bytes and return
/// the start of the fresh region, or `None` once the underlying memory
/// is exhausted. Consecutive calls must return contiguous regions; the
/// heap refuses to grow otherwise.
pub trait Sbrk {
  fn sbrk(
    &mut self,
    incr: usize,
  ) -> Option<NonNull<u8>>;
}

/// The real program break, extended through `libc::sbrk`.
///
/// The first extension pads the break up to the 8-byte block granularity
/// so that every payload offset lands on a double-word boundary.
///
/// Only one allocator may own the break at a time, and nothing else in
/// the process may move it while the allocator is alive. [`FixedArena`]
/// is the safer choice for anything but a dedicated process.
pub struct SystemBreak {
  aligned: bool,
}

impl SystemBreak {
  pub fn new() -> Self {
    Self { aligned: false }
  }
}

impl Sbrk for SystemBreak {
  fn sbrk(
    &mut self,
    incr: usize,
  ) -> Option<NonNull<u8>> {
    let mut pad = 0;

    if !self.aligned {
      let brk = unsafe { sbrk(0) };
      if brk == usize::MAX as *mut c_void {
        // sbrk returns (void*)-1 on failure
        return None;
      }
      pad = (DSIZE - (brk as usize) % DSIZE) % DSIZE;
    }

    let old = unsafe { sbrk((incr + pad) as intptr_t) };
    if old == usize::MAX as *mut c_void {
      return None;
    }

    self.aligned = true;
    NonNull::new(unsafe { (old as *mut u8).add(pad) })
  }
}

/// A fixed-capacity arena that simulates the break inside a single
/// up-front reservation.
///
/// The region is reserved once from the global allocator and a private
/// break moves through it; extension fails once `capacity` is spent.
/// The region never moves, and exhaustion is reproducible, which is what
/// the tests run every allocator against.
pub struct FixedArena {
  base: NonNull<u8>,
  layout: Layout,
  brk: usize,
}

impl FixedArena {
  /// Reserves `capacity` bytes. Panics if the reservation itself fails.
  pub fn new(capacity: usize) -> Self {
    assert!(capacity > 0, "arena capacity must be non-zero");
    let layout = Layout::from_size_align(capacity, DSIZE).expect("arena layout");
    let base = NonNull::new(unsafe { alloc::alloc(layout) }).expect("arena reservation");
    Self { base, layout, brk: 0 }
  }

  /// Bytes not yet handed out.
  pub fn remaining(&self) -> usize {
    self.layout.size() - self.brk
  }
}

impl Sbrk for FixedArena {
  fn sbrk(
    &mut self,
    incr: usize,
  ) -> Option<NonNull<u8>> {
    if self.remaining() < incr {
      return None;
    }
    let old = unsafe { self.base.add(self.brk) };
    self.brk += incr;
    Some(old)
  }
}

impl Drop for FixedArena {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
  }
}

/// Offset of the header word of the block whose payload starts at `bp`.
pub fn hdr(bp: usize) -> usize {
  bp - WSIZE
}

/// A contiguous heap region addressed by byte offsets.
///
/// All word-level access goes through here: header/footer reads and
/// writes (tag-preserving or not), the free-list link words stored in
/// free payloads, and the neighbor arithmetic that boundary tags make
/// possible.
pub struct Heap<M: Sbrk> {
  mem: M,
  base: *mut u8,
  size: usize,
}

impl<M: Sbrk> Heap<M> {
  pub fn new(mem: M) -> Self {
    Self {
      mem,
      base: ptr::null_mut(),
      size: 0,
    }
  }

  /// Current break offset: one past the last byte of the region.
  pub fn size(&self) -> usize {
    self.size
  }

  /// Grows the region by exactly `bytes` and returns the offset the
  /// fresh bytes start at. No state changes when the primitive refuses
  /// or hands back a non-contiguous region.
  pub fn extend(
    &mut self,
    bytes: usize,
  ) -> Option<usize> {
    let new_size = self.size.checked_add(bytes)?;
    if new_size > MAX_HEAP {
      return None;
    }

    let fresh = self.mem.sbrk(bytes)?.as_ptr();
    if self.base.is_null() {
      self.base = fresh;
    } else if fresh as usize != self.base as usize + self.size {
      return None;
    }

    let old = self.size;
    self.size = new_size;
    Some(old)
  }

  fn word(
    &self,
    at: usize,
  ) -> u32 {
    debug_assert!(at % WSIZE == 0 && at + WSIZE <= self.size);
    unsafe { (self.base.add(at) as *const u32).read() }
  }

  fn set_word(
    &mut self,
    at: usize,
    value: u32,
  ) {
    debug_assert!(at % WSIZE == 0 && at + WSIZE <= self.size);
    unsafe { (self.base.add(at) as *mut u32).write(value) }
  }

  /// Reads the header or footer word at `at`.
  pub fn tag(
    &self,
    at: usize,
  ) -> HeaderWord {
    HeaderWord::from_raw(self.word(at))
  }

  /// Writes a header/footer word, keeping whatever reservation flag the
  /// previous contents carried.
  pub fn put(
    &mut self,
    at: usize,
    word: HeaderWord,
  ) {
    let word = if self.tag(at).reserved() {
      word.with_reserved(true)
    } else {
      word
    };
    self.set_word(at, word.raw());
  }

  /// Installs a header/footer word outright, discarding any reservation
  /// flag at `at`. Used when a block position is first populated.
  pub fn put_init(
    &mut self,
    at: usize,
    word: HeaderWord,
  ) {
    self.set_word(at, word.raw());
  }

  /// Sets the reservation flag at `at` in place.
  pub fn set_reserved(
    &mut self,
    at: usize,
  ) {
    let word = self.tag(at).with_reserved(true);
    self.set_word(at, word.raw());
  }

  /// Clears the reservation flag at `at` in place.
  pub fn clear_reserved(
    &mut self,
    at: usize,
  ) {
    let word = self.tag(at).with_reserved(false);
    self.set_word(at, word.raw());
  }

  /// Size of the block whose payload starts at `bp`.
  pub fn block_size(
    &self,
    bp: usize,
  ) -> usize {
    self.tag(hdr(bp)).size()
  }

  pub fn allocated(
    &self,
    bp: usize,
  ) -> bool {
    self.tag(hdr(bp)).allocated()
  }

  /// Offset of the footer word of the block at `bp`.
  pub fn ftr(
    &self,
    bp: usize,
  ) -> usize {
    bp + self.block_size(bp) - DSIZE
  }

  /// Payload offset of the block after `bp`.
  pub fn next_block(
    &self,
    bp: usize,
  ) -> usize {
    bp + self.block_size(bp)
  }

  /// Payload offset of the block before `bp`, read from the footer word
  /// sitting just below `bp`'s header.
  pub fn prev_block(
    &self,
    bp: usize,
  ) -> usize {
    bp - self.tag(bp - DSIZE).size()
  }

  /// Predecessor link of the free block at `bp` (first payload word).
  pub fn pred(
    &self,
    bp: usize,
  ) -> usize {
    self.word(bp) as usize
  }

  /// Successor link of the free block at `bp` (second payload word).
  pub fn succ(
    &self,
    bp: usize,
  ) -> usize {
    self.word(bp + WSIZE) as usize
  }

  pub fn set_pred(
    &mut self,
    bp: usize,
    to: usize,
  ) {
    self.set_word(bp, to as u32);
  }

  pub fn set_succ(
    &mut self,
    bp: usize,
    to: usize,
  ) {
    self.set_word(bp + WSIZE, to as u32);
  }

  /// Translates a block offset into the payload pointer handed to
  /// callers.
  pub fn payload_ptr(
    &self,
    bp: usize,
  ) -> *mut u8 {
    debug_assert!(bp <= self.size);
    unsafe { self.base.add(bp) }
  }

  /// Translates a payload pointer back into its block offset.
  ///
  /// # Safety
  ///
  /// `ptr` must be a payload pointer previously produced by this heap.
  pub unsafe fn offset_of(
    &self,
    ptr: *mut u8,
  ) -> usize {
    let off = ptr as usize - self.base as usize;
    debug_assert!(off <= self.size);
    off
  }

  /// Copies `len` payload bytes from block `from` to block `to`.
  pub fn copy_payload(
    &mut self,
    from: usize,
    to: usize,
    len: usize,
  ) {
    debug_assert!(from + len <= self.size && to + len <= self.size);
    unsafe {
      ptr::copy_nonoverlapping(self.base.add(from), self.base.add(to), len);
    }
  }
}
