//! # Explicit free-list allocator
//!
//! Boundary-tag allocator whose free blocks are threaded onto a single
//! doubly linked list, with new blocks pushed at the head (LIFO). The
//! list order carries no meaning; only membership does.
//!
//! ## Block and list layout
//!
//! ```text
//!   allocated block                  free block
//!   +--------+----------+--------+  +--------+------+------+-----+--------+
//!   | header | payload  | footer |  | header | pred | succ | ... | footer |
//!   +--------+----------+--------+  +--------+------+------+-----+--------+
//!    4 bytes              4 bytes              4-byte offset links
//!
//!   head --> [block] <--> [block] <--> [block] --> NIL
//! ```
//!
//! A freed block is merged with its free neighbors before it is linked
//! in, so no two free blocks are ever adjacent. The minimum block size
//! is 24 bytes.
//!
//! ## Allocation
//!
//! `malloc` rounds the request up to the block granularity, walks the
//! free list for the first (or best, see [`SearchMode`]) block that is
//! large enough, and splits the tail off as a new free block when the
//! remainder can stand alone. When the list has nothing suitable the
//! heap is extended by at least [`CHUNKSIZE`] and the fresh block is
//! used.
//!
//! `realloc` here always moves: allocate, copy the payload prefix, free.
//! The segregated allocator grows blocks in place instead.

use std::ptr;

use crate::align;
use crate::heap::{CHUNKSIZE, Heap, MAX_REQUEST, NIL, Sbrk, SystemBreak, hdr};
use crate::tag::{DSIZE, HeaderWord, WSIZE};

/// Minimum block size in bytes: header, two link words, footer, rounded
/// up to the block granularity.
pub const MINIMUM: usize = 24;

/// Payload offset of the prologue block.
const PROLOGUE: usize = DSIZE;

/// Fit policy for the free-list walk.
///
/// `FirstFit` takes the first block that is large enough, which keeps
/// the search short. `BestFit` walks the whole list for the tightest
/// block, trading search time for less fragmentation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SearchMode {
  FirstFit,
  BestFit,
}

/// A boundary-tag allocator with a single LIFO free list.
///
/// All bookkeeping lives inside the heap region itself; the allocator
/// struct only carries the region and the list head.
///
/// # Thread safety
///
/// Not thread-safe. Callers that share an allocator across threads must
/// provide their own synchronization.
pub struct ExplicitAllocator<M: Sbrk = SystemBreak> {
  heap: Heap<M>,

  /// Payload offset of the first free block, `NIL` when the list is
  /// empty.
  free_head: usize,

  mode: SearchMode,
}

impl ExplicitAllocator<SystemBreak> {
  /// Sets up an allocator on the real program break.
  ///
  /// Returns `None` when the break cannot be claimed or the initial
  /// extension fails.
  pub fn new() -> Option<Self> {
    Self::with_memory(SystemBreak::new())
  }
}

impl<M: Sbrk> ExplicitAllocator<M> {
  /// Sets up an allocator on the given memory primitive: installs the
  /// alignment pad, the prologue sentinel and the epilogue header, then
  /// extends the heap by one [`CHUNKSIZE`] so the first request finds a
  /// free block waiting.
  ///
  /// Initial heap state:
  ///
  /// ```text
  ///   padding   hdr    pred   succ   ftr  epilogue
  /// +---------+------+------+------+------+-----+
  /// | 4 bytes | 16/1 | NIL  | NIL  | 16/1 | 0/1 |
  /// +---------+------+------+------+------+-----+
  /// ```
  pub fn with_memory(mem: M) -> Option<Self> {
    let mut this = Self {
      heap: Heap::new(mem),
      free_head: NIL,
      mode: SearchMode::FirstFit,
    };

    this.heap.extend(6 * WSIZE)?;
    this.heap.put_init(0, HeaderWord::pack(0, false)); // alignment padding
    this.heap.put_init(WSIZE, HeaderWord::pack(2 * DSIZE, true)); // prologue header
    this.heap.set_pred(PROLOGUE, NIL);
    this.heap.set_succ(PROLOGUE, NIL);
    this.heap.put_init(4 * WSIZE, HeaderWord::pack(2 * DSIZE, true)); // prologue footer
    this.heap.put_init(5 * WSIZE, HeaderWord::pack(0, true)); // epilogue header

    this.extend_heap(CHUNKSIZE)?;
    Some(this)
  }

  /// Switches the fit policy. Takes effect on the next `malloc`.
  pub fn set_search_mode(
    &mut self,
    mode: SearchMode,
  ) {
    self.mode = mode;
  }

  /// Allocates a block of at least `size` bytes and returns its payload
  /// pointer, 8-byte aligned.
  ///
  /// Returns null when `size` is zero, absurdly large, or the heap
  /// cannot be grown any further. A failed call leaves the heap
  /// untouched.
  pub fn malloc(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 || size > MAX_REQUEST {
      return ptr::null_mut();
    }

    // Room for header and footer, rounded to the block granularity.
    let asize = if size <= MINIMUM - DSIZE {
      MINIMUM
    } else {
      align!(size + DSIZE)
    };

    let bp = match self.find_fit(asize) {
      Some(bp) => bp,
      None => match self.extend_heap(asize.max(CHUNKSIZE)) {
        Some(bp) => bp,
        None => return ptr::null_mut(),
      },
    };

    self.place(bp, asize);
    self.heap.payload_ptr(bp)
  }

  /// Releases a block back to the allocator, merging it with any free
  /// neighbor. A null `ptr` is a no-op.
  ///
  /// # Safety
  ///
  /// A non-null `ptr` must have been returned by this allocator's
  /// `malloc` or `realloc` and must not have been freed since.
  pub unsafe fn free(
    &mut self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }

    let bp = unsafe { self.heap.offset_of(ptr) };
    let size = self.heap.block_size(bp);

    self.heap.put(hdr(bp), HeaderWord::pack(size, false));
    let ftr = self.heap.ftr(bp);
    self.heap.put(ftr, HeaderWord::pack(size, false));

    self.coalesce(bp);
  }

  /// Resizes a block by allocating anew, copying the payload prefix and
  /// freeing the old block.
  ///
  /// A null `ptr` behaves like `malloc(size)`; a zero `size` frees the
  /// block and returns null. When no new block can be obtained the old
  /// one is left untouched and null is returned.
  ///
  /// # Safety
  ///
  /// A non-null `ptr` must have been returned by this allocator and not
  /// freed since.
  pub unsafe fn realloc(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    if ptr.is_null() {
      return self.malloc(size);
    }
    if size == 0 {
      unsafe { self.free(ptr) };
      return ptr::null_mut();
    }

    let new = self.malloc(size);
    if new.is_null() {
      return ptr::null_mut();
    }

    let old_bp = unsafe { self.heap.offset_of(ptr) };
    let new_bp = unsafe { self.heap.offset_of(new) };
    let old_payload = self.heap.block_size(old_bp) - DSIZE;
    self.heap.copy_payload(old_bp, new_bp, old_payload.min(size));

    unsafe { self.free(ptr) };
    new
  }

  /// Grows the heap by at least `bytes`, installs the fresh region as a
  /// free block and merges it with the last block when that one is
  /// free. Returns the payload offset of the resulting free block.
  fn extend_heap(
    &mut self,
    bytes: usize,
  ) -> Option<usize> {
    let size = align!(bytes).max(MINIMUM);

    let bp = self.heap.extend(size)?;
    self.heap.put_init(hdr(bp), HeaderWord::pack(size, false)); // free block header
    self.heap.put_init(bp + size - DSIZE, HeaderWord::pack(size, false)); // free block footer
    self.heap.put_init(hdr(bp + size), HeaderWord::pack(0, true)); // new epilogue header

    Some(self.coalesce(bp))
  }

  /// Walks the free list for a block that can hold `asize` bytes.
  fn find_fit(
    &self,
    asize: usize,
  ) -> Option<usize> {
    match self.mode {
      SearchMode::FirstFit => {
        let mut bp = self.free_head;
        while bp != NIL {
          if self.heap.block_size(bp) >= asize {
            return Some(bp);
          }
          bp = self.heap.succ(bp);
        }
        None
      }
      SearchMode::BestFit => {
        let mut best: Option<(usize, usize)> = None;
        let mut bp = self.free_head;
        while bp != NIL {
          let size = self.heap.block_size(bp);
          if size == asize {
            return Some(bp);
          }
          if size > asize && best.is_none_or(|(_, tightest)| size < tightest) {
            best = Some((bp, size));
          }
          bp = self.heap.succ(bp);
        }
        best.map(|(bp, _)| bp)
      }
    }
  }

  /// Converts the free block at `bp` into an allocated block of `asize`
  /// bytes, splitting the tail back into the free list when it is large
  /// enough to stand alone.
  fn place(
    &mut self,
    bp: usize,
    asize: usize,
  ) {
    let csize = self.heap.block_size(bp);
    self.remove(bp);

    if csize - asize >= MINIMUM {
      self.heap.put(hdr(bp), HeaderWord::pack(asize, true));
      let ftr = self.heap.ftr(bp);
      self.heap.put(ftr, HeaderWord::pack(asize, true));

      let tail = self.heap.next_block(bp);
      self.heap.put(hdr(tail), HeaderWord::pack(csize - asize, false));
      let tail_ftr = self.heap.ftr(tail);
      self.heap.put(tail_ftr, HeaderWord::pack(csize - asize, false));

      // The tail's neighbors cannot be free here: below sits the block
      // just allocated, above sits the unchanged right neighbor of the
      // original free block. This coalesce only links the tail in.
      self.coalesce(tail);
    } else {
      self.heap.put(hdr(bp), HeaderWord::pack(csize, true));
      let ftr = self.heap.ftr(bp);
      self.heap.put(ftr, HeaderWord::pack(csize, true));
    }
  }

  /// Merges `bp` with its free neighbors and links the surviving block
  /// into the free list. Returns the payload offset of the survivor.
  fn coalesce(
    &mut self,
    bp: usize,
  ) -> usize {
    let mut bp = bp;
    let mut size = self.heap.block_size(bp);

    let prev_alloc = self.heap.tag(bp - DSIZE).allocated(); // previous block's footer
    let next = self.heap.next_block(bp);
    let next_alloc = self.heap.tag(hdr(next)).allocated();

    match (prev_alloc, next_alloc) {
      (true, true) => {}

      (true, false) => {
        self.remove(next);
        size += self.heap.block_size(next);
        self.heap.put(hdr(bp), HeaderWord::pack(size, false));
        let ftr = self.heap.ftr(bp);
        self.heap.put(ftr, HeaderWord::pack(size, false));
      }

      (false, true) => {
        let prev = self.heap.prev_block(bp);
        self.remove(prev);
        size += self.heap.block_size(prev);
        let ftr = self.heap.ftr(bp);
        self.heap.put(ftr, HeaderWord::pack(size, false));
        self.heap.put(hdr(prev), HeaderWord::pack(size, false));
        bp = prev;
      }

      (false, false) => {
        let prev = self.heap.prev_block(bp);
        self.remove(prev);
        self.remove(next);
        size += self.heap.block_size(prev) + self.heap.block_size(next);
        let next_ftr = self.heap.ftr(next);
        self.heap.put(hdr(prev), HeaderWord::pack(size, false));
        self.heap.put(next_ftr, HeaderWord::pack(size, false));
        bp = prev;
      }
    }

    self.insert(bp);
    bp
  }

  /// Pushes a free block at the head of the list.
  fn insert(
    &mut self,
    bp: usize,
  ) {
    self.heap.set_succ(bp, self.free_head);
    self.heap.set_pred(bp, NIL);
    if self.free_head != NIL {
      self.heap.set_pred(self.free_head, bp);
    }
    self.free_head = bp;
  }

  /// Splices a block out of the list.
  fn remove(
    &mut self,
    bp: usize,
  ) {
    let pred = self.heap.pred(bp);
    let succ = self.heap.succ(bp);

    if pred != NIL {
      self.heap.set_succ(pred, succ);
    } else {
      self.free_head = succ;
    }
    if succ != NIL {
      self.heap.set_pred(succ, pred);
    }
  }

  /// Walks the whole heap and the free list, asserting every structural
  /// invariant: matching boundary tags, alignment, minimum sizes,
  /// complete coalescing, a well-formed block sequence between the
  /// sentinels, and a free list that covers exactly the free blocks.
  ///
  /// Panics on the first violation. Meant for tests and debugging.
  pub fn check_heap(&self) {
    let prologue = self.heap.tag(hdr(PROLOGUE));
    assert_eq!(prologue.size(), 2 * DSIZE, "prologue size is fixed");
    assert!(prologue.allocated(), "prologue must stay allocated");

    let mut blocks = 0usize;
    let mut free_blocks = 0usize;
    let mut prev_free = false;

    let mut bp = self.heap.next_block(PROLOGUE);
    while self.heap.block_size(bp) > 0 {
      let head = self.heap.tag(hdr(bp));
      let foot = self.heap.tag(self.heap.ftr(bp));

      assert_eq!(head.size(), foot.size(), "boundary tags disagree on size at {bp}");
      assert_eq!(
        head.allocated(),
        foot.allocated(),
        "boundary tags disagree on the alloc flag at {bp}"
      );
      assert_eq!(bp % DSIZE, 0, "payload misaligned at {bp}");
      assert_eq!(head.size() % DSIZE, 0, "block size not a multiple of 8 at {bp}");
      assert!(head.size() >= MINIMUM, "undersized block at {bp}");

      if !head.allocated() {
        assert!(!prev_free, "uncoalesced neighbors at {bp}");
        free_blocks += 1;
      }
      prev_free = !head.allocated();
      blocks += 1;

      bp = self.heap.next_block(bp);
    }

    // The forward walk must land exactly on the epilogue header.
    assert!(self.heap.tag(hdr(bp)).allocated(), "epilogue must stay allocated");
    assert_eq!(hdr(bp), self.heap.size() - WSIZE, "epilogue must close the region");

    // The backward walk must revisit the same number of blocks.
    let mut back = 0usize;
    let mut cursor = bp;
    while self.heap.prev_block(cursor) != PROLOGUE {
      cursor = self.heap.prev_block(cursor);
      back += 1;
    }
    assert_eq!(blocks, back, "forward and backward walks disagree");

    // List membership must match the set of free blocks.
    let mut listed = 0usize;
    let mut prev = NIL;
    let mut node = self.free_head;
    while node != NIL {
      assert!(!self.heap.allocated(node), "allocated block on the free list at {node}");
      assert_eq!(self.heap.pred(node), prev, "broken predecessor link at {node}");
      listed += 1;
      prev = node;
      node = self.heap.succ(node);
    }
    assert_eq!(free_blocks, listed, "free list does not cover every free block");
  }

  /// Prints one line per block, prologue to epilogue. Debug aid.
  pub fn dump(&self) {
    println!("{:>8}  {:>8}  state", "offset", "size");
    let mut bp = PROLOGUE;
    loop {
      let word = self.heap.tag(hdr(bp));
      println!(
        "{:>8}  {:>8}  {}",
        bp,
        word.size(),
        if word.allocated() { "allocated" } else { "free" },
      );
      if word.size() == 0 {
        break;
      }
      bp = self.heap.next_block(bp);
    }
  }
}
