//! # Segregated free-list allocator
//!
//! Boundary-tag allocator whose free blocks are indexed by an array of
//! 20 size classes, one doubly linked list per class. Class `k` holds
//! the blocks whose size lies in `[2^k, 2^(k+1))`; the last class
//! absorbs everything larger.
//!
//! ## Index layout
//!
//! ```text
//!   classes[4]  --> 16 <--> 24 <--> 24 --> NIL
//!   classes[5]  --> 32 --> NIL
//!   classes[6]  --> NIL
//!      ...
//!   classes[19] --> 524288 <--> 1048576 --> NIL
//!
//!   (head = smallest; the predecessor chain leads toward larger
//!    blocks, so a fit walk moves through ascending sizes)
//! ```
//!
//! Buckets stay sorted by ascending size, which makes the first fit
//! inside a bucket also the tightest fit that bucket can offer.
//!
//! ## Placement
//!
//! Splitting puts small allocations at the low end of their block and
//! large ones (100 bytes and up) at the high end. Large allocations
//! tend to persist, so keeping them out of the low addresses preserves
//! useful contiguous space for the small, short-lived ones.
//!
//! ## Reallocation
//!
//! `realloc` grows a block in place whenever a free successor covers
//! the growth, or the block runs to the end of the heap and the break
//! can be pushed further. Every reallocation also pads the block with a
//! 128-byte buffer; when the leftover buffer runs low, the successor
//! block is tagged as *reserved*:
//!
//! ```text
//!   +-------------------+----------------------+
//!   |  reallocated blk  |  successor (tagged)  |
//!   +-------------------+----------------------+
//!                          ^ invisible to the fit search, refused by
//!                            coalesce, kept for the next growth
//! ```
//!
//! A caller growing the same block by a small constant per call would
//! otherwise drag a heap extension out of every single call; the buffer
//! and the reservation tag amortize those growths. The tag is cleared
//! when the reserved block is consumed by a later reallocation, when
//! the heap is extended past it, or when the reallocated block is
//! freed.

use std::ptr;

use crate::align;
use crate::heap::{CHUNKSIZE, Heap, MAX_REQUEST, NIL, Sbrk, SystemBreak, hdr};
use crate::tag::{DSIZE, HeaderWord, WSIZE};

/// Number of size classes.
pub const LISTLIMIT: usize = 20;

/// Padding added to every reallocated block so the next small growth
/// stays in place.
pub const REALLOC_BUFFER: usize = 1 << 7;

/// First heap extension; kept small so light workloads stay light.
const INITCHUNKSIZE: usize = 1 << 6;

/// Minimum block size: header, two link words, footer.
const MIN_BLOCK: usize = 2 * DSIZE;

/// Split threshold: requests at least this large go to the high end of
/// their block.
const HIGH_SPLIT: usize = 100;

/// Payload offset of the prologue block.
const PROLOGUE: usize = DSIZE;

/// A boundary-tag allocator with 20 segregated, size-sorted free lists
/// and in-place reallocation.
///
/// # Thread safety
///
/// Not thread-safe. Callers that share an allocator across threads must
/// provide their own synchronization.
pub struct SegregatedAllocator<M: Sbrk = SystemBreak> {
  heap: Heap<M>,

  /// One list head per size class, `NIL` when the class is empty.
  classes: [usize; LISTLIMIT],
}

impl SegregatedAllocator<SystemBreak> {
  /// Sets up an allocator on the real program break.
  ///
  /// Returns `None` when the break cannot be claimed or the initial
  /// extension fails.
  pub fn new() -> Option<Self> {
    Self::with_memory(SystemBreak::new())
  }
}

impl<M: Sbrk> SegregatedAllocator<M> {
  /// Sets up an allocator on the given memory primitive: empty class
  /// array, alignment pad, prologue and epilogue sentinels, then a
  /// first extension of 64 bytes.
  pub fn with_memory(mem: M) -> Option<Self> {
    let mut this = Self {
      heap: Heap::new(mem),
      classes: [NIL; LISTLIMIT],
    };

    this.heap.extend(4 * WSIZE)?;
    this.heap.put_init(0, HeaderWord::pack(0, false)); // alignment padding
    this.heap.put_init(WSIZE, HeaderWord::pack(DSIZE, true)); // prologue header
    this.heap.put_init(2 * WSIZE, HeaderWord::pack(DSIZE, true)); // prologue footer
    this.heap.put_init(3 * WSIZE, HeaderWord::pack(0, true)); // epilogue header

    this.extend_heap(INITCHUNKSIZE)?;
    Some(this)
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
    let asize = if size <= DSIZE {
      2 * DSIZE
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

    let bp = self.place(bp, asize);
    self.heap.payload_ptr(bp)
  }

  /// Releases a block back to the allocator, merging it with any free
  /// neighbor. The successor loses its reservation tag, if it carried
  /// one: the growth the tag was protecting can no longer happen.
  /// A null `ptr` is a no-op.
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

    let next_hdr = hdr(self.heap.next_block(bp));
    self.heap.clear_reserved(next_hdr);

    self.heap.put(hdr(bp), HeaderWord::pack(size, false));
    let ftr = self.heap.ftr(bp);
    self.heap.put(ftr, HeaderWord::pack(size, false));

    self.coalesce(bp);
  }

  /// Resizes a block, preferring to grow it in place.
  ///
  /// The new size is padded with [`REALLOC_BUFFER`] bytes. A block that
  /// is already large enough is kept as is. Otherwise a free successor
  /// that covers the growth is absorbed where it stands, and when the
  /// span under the block runs all the way to the break (the successor
  /// is the epilogue, or a free block bordering it) the heap is
  /// extended to cover the shortfall; either way the block is rewritten
  /// in place without splitting. A block walled in behind the growth it
  /// needs moves through allocate-copy-free. After a successful resize
  /// the successor is tagged as reserved if the leftover buffer dropped
  /// below twice the padding.
  ///
  /// A null `ptr` behaves like `malloc(size)`; a zero `size` frees the
  /// block and returns null. When the heap cannot be grown the old
  /// block is left untouched and null is returned.
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
    if size > MAX_REQUEST {
      return ptr::null_mut();
    }

    let bp = unsafe { self.heap.offset_of(ptr) };

    let mut new_size = if size <= DSIZE {
      2 * DSIZE
    } else {
      align!(size + DSIZE)
    };
    new_size += REALLOC_BUFFER;

    let mut new_bp = bp;

    if self.heap.block_size(bp) < new_size {
      let next = self.heap.next_block(bp);
      let next_word = self.heap.tag(hdr(next));
      let next_is_epilogue = next_word.size() == 0;
      let next_is_free = !next_is_epilogue && !next_word.allocated();
      let span = self.heap.block_size(bp) + next_word.size();

      if next_is_free && span >= new_size {
        // The free successor alone covers the growth; absorb it where
        // it stands. No split: the whole span becomes the block.
        self.remove(next);
        self.heap.put_init(hdr(bp), HeaderWord::pack(span, true));
        let ftr = self.heap.ftr(bp);
        self.heap.put_init(ftr, HeaderWord::pack(span, true));
      } else if next_is_epilogue
        || (next_is_free && self.heap.block_size(self.heap.next_block(next)) == 0)
      {
        // The span under the block runs to the break, so the shortfall
        // can be covered by extending the heap: the fresh bytes land
        // right after the successor being absorbed. A free successor
        // anywhere else never reaches the break, and extending for it
        // would overrun whatever lives behind it; those blocks move
        // instead (the branch below).
        if next_is_free {
          // About to be consumed; drop any reservation so the fresh
          // region merges into it.
          self.heap.clear_reserved(hdr(next));
        }
        let extend = (new_size - span).max(CHUNKSIZE);
        if self.extend_heap(extend).is_none() {
          return ptr::null_mut();
        }

        // One free block now runs from the successor to the new break.
        let next = self.heap.next_block(bp);
        self.remove(next);

        // No split: the whole merged span becomes the block.
        let merged = self.heap.block_size(bp) + self.heap.block_size(next);
        self.heap.put_init(hdr(bp), HeaderWord::pack(merged, true));
        let ftr = self.heap.ftr(bp);
        self.heap.put_init(ftr, HeaderWord::pack(merged, true));
      } else {
        let new = self.malloc(new_size - DSIZE);
        if new.is_null() {
          return ptr::null_mut();
        }
        new_bp = unsafe { self.heap.offset_of(new) };
        let old_payload = self.heap.block_size(bp) - DSIZE;
        self.heap.copy_payload(bp, new_bp, old_payload.min(size));
        unsafe { self.free(ptr) };
      }
    }

    // Reserve the successor once the leftover growth buffer runs low.
    if self.heap.block_size(new_bp) - new_size < 2 * REALLOC_BUFFER {
      let next_hdr = hdr(self.heap.next_block(new_bp));
      self.heap.set_reserved(next_hdr);
    }

    self.heap.payload_ptr(new_bp)
  }

  /// Grows the heap by at least `bytes`, installs the fresh region as a
  /// free block and merges it with the last block when that one is free
  /// and unreserved. Returns the payload offset of the resulting free
  /// block. Writing the new block's header over the old epilogue also
  /// drops any reservation tag left there.
  fn extend_heap(
    &mut self,
    bytes: usize,
  ) -> Option<usize> {
    let size = align!(bytes).max(MIN_BLOCK);

    let bp = self.heap.extend(size)?;
    self.heap.put_init(hdr(bp), HeaderWord::pack(size, false)); // free block header
    self.heap.put_init(bp + size - DSIZE, HeaderWord::pack(size, false)); // free block footer
    self.heap.put_init(hdr(bp + size), HeaderWord::pack(0, true)); // new epilogue header

    Some(self.coalesce(bp))
  }

  /// Size class of a block: floor(log2(size)), capped at the last
  /// class. Sizes reaching this are always at least the minimum block
  /// size.
  fn class_of(mut size: usize) -> usize {
    let mut class = 0;
    while class < LISTLIMIT - 1 && size > 1 {
      size >>= 1;
      class += 1;
    }
    class
  }

  /// Walks the size classes for a block that can hold `asize` bytes,
  /// starting at the class `asize` belongs to. Within a bucket the walk
  /// moves toward larger blocks and skips any block carrying a
  /// reservation tag.
  fn find_fit(
    &self,
    asize: usize,
  ) -> Option<usize> {
    let mut searchsize = asize;

    for class in 0..LISTLIMIT {
      if class == LISTLIMIT - 1 || (searchsize <= 1 && self.classes[class] != NIL) {
        let mut bp = self.classes[class];
        while bp != NIL
          && (asize > self.heap.block_size(bp) || self.heap.tag(hdr(bp)).reserved())
        {
          bp = self.heap.pred(bp);
        }
        if bp != NIL {
          return Some(bp);
        }
      }
      searchsize >>= 1;
    }

    None
  }

  /// Converts the free block at `bp` into an allocated block of `asize`
  /// bytes and returns the payload offset of the allocation, which is
  /// the high end of the block for large requests.
  fn place(
    &mut self,
    bp: usize,
    asize: usize,
  ) -> usize {
    let csize = self.heap.block_size(bp);
    let remainder = csize - asize;

    self.remove(bp);

    if remainder < MIN_BLOCK {
      // Too little left over to stand alone; hand out the whole block.
      self.heap.put(hdr(bp), HeaderWord::pack(csize, true));
      let ftr = self.heap.ftr(bp);
      self.heap.put(ftr, HeaderWord::pack(csize, true));
      bp
    } else if asize >= HIGH_SPLIT {
      self.heap.put(hdr(bp), HeaderWord::pack(remainder, false));
      let ftr = self.heap.ftr(bp);
      self.heap.put(ftr, HeaderWord::pack(remainder, false));

      let high = bp + remainder;
      self.heap.put_init(hdr(high), HeaderWord::pack(asize, true));
      let high_ftr = self.heap.ftr(high);
      self.heap.put_init(high_ftr, HeaderWord::pack(asize, true));

      self.insert(bp, remainder);
      high
    } else {
      self.heap.put(hdr(bp), HeaderWord::pack(asize, true));
      let ftr = self.heap.ftr(bp);
      self.heap.put(ftr, HeaderWord::pack(asize, true));

      let tail = bp + asize;
      self.heap.put_init(hdr(tail), HeaderWord::pack(remainder, false));
      let tail_ftr = self.heap.ftr(tail);
      self.heap.put_init(tail_ftr, HeaderWord::pack(remainder, false));

      self.insert(tail, remainder);
      bp
    }
  }

  /// Merges `bp` with its free neighbors and links the surviving block
  /// into its class. A reserved predecessor is off limits, exactly as
  /// if it were still allocated. Returns the payload offset of the
  /// survivor.
  fn coalesce(
    &mut self,
    bp: usize,
  ) -> usize {
    let mut bp = bp;
    let mut size = self.heap.block_size(bp);

    let prev = self.heap.prev_block(bp);
    let prev_word = self.heap.tag(hdr(prev));
    let prev_alloc = prev_word.allocated() || prev_word.reserved();
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
        self.remove(prev);
        size += self.heap.block_size(prev);
        let ftr = self.heap.ftr(bp);
        self.heap.put(ftr, HeaderWord::pack(size, false));
        self.heap.put(hdr(prev), HeaderWord::pack(size, false));
        bp = prev;
      }

      (false, false) => {
        self.remove(prev);
        self.remove(next);
        size += self.heap.block_size(prev) + self.heap.block_size(next);
        let next_ftr = self.heap.ftr(next);
        self.heap.put(hdr(prev), HeaderWord::pack(size, false));
        self.heap.put(next_ftr, HeaderWord::pack(size, false));
        bp = prev;
      }
    }

    self.insert(bp, size);
    bp
  }

  /// Links a free block into its size class, keeping the bucket sorted
  /// by ascending size: the head stays the smallest block and the
  /// predecessor chain leads toward larger ones.
  fn insert(
    &mut self,
    bp: usize,
    size: usize,
  ) {
    let class = Self::class_of(size);

    // Find the first block at least as large as `size`, and the entry
    // just below it in the bucket.
    let mut above = self.classes[class];
    let mut below = NIL;
    while above != NIL && size > self.heap.block_size(above) {
      below = above;
      above = self.heap.pred(above);
    }

    self.heap.set_pred(bp, above);
    self.heap.set_succ(bp, below);
    if above != NIL {
      self.heap.set_succ(above, bp);
    }
    if below != NIL {
      self.heap.set_pred(below, bp);
    } else {
      self.classes[class] = bp;
    }
  }

  /// Splices a block out of its class.
  fn remove(
    &mut self,
    bp: usize,
  ) {
    let class = Self::class_of(self.heap.block_size(bp));
    let pred = self.heap.pred(bp);
    let succ = self.heap.succ(bp);

    if pred != NIL {
      self.heap.set_succ(pred, succ);
    }
    if succ != NIL {
      self.heap.set_pred(succ, pred);
    } else {
      self.classes[class] = pred;
    }
  }

  /// Walks the whole heap and every size class, asserting every
  /// structural invariant: matching boundary tags, alignment, minimum
  /// sizes, complete coalescing (with reserved blocks exempt), a
  /// well-formed block sequence between the sentinels, class membership
  /// and ascending order inside each bucket, and an index that covers
  /// exactly the free blocks.
  ///
  /// Panics on the first violation. Meant for tests and debugging.
  pub fn check_heap(&self) {
    let prologue = self.heap.tag(hdr(PROLOGUE));
    assert_eq!(prologue.size(), DSIZE, "prologue size is fixed");
    assert!(prologue.allocated(), "prologue must stay allocated");

    let mut blocks = 0usize;
    let mut free_blocks = 0usize;
    let mut prev_free = false;
    let mut prev_reserved = false;

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
      assert!(head.size() >= MIN_BLOCK, "undersized block at {bp}");

      if !head.allocated() {
        // Two free neighbors may only coexist when a reservation tag
        // kept the earlier one out of coalescing.
        assert!(!prev_free || prev_reserved, "uncoalesced neighbors at {bp}");
        free_blocks += 1;
      }
      prev_free = !head.allocated();
      prev_reserved = head.reserved();
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

    // Every bucket: free blocks only, of the right class, sorted
    // ascending, with intact links.
    let mut listed = 0usize;
    for (class, &head) in self.classes.iter().enumerate() {
      let mut below = NIL;
      let mut last_size = 0usize;
      let mut node = head;
      while node != NIL {
        let size = self.heap.block_size(node);
        assert!(!self.heap.allocated(node), "allocated block in class {class} at {node}");
        assert_eq!(Self::class_of(size), class, "block of size {size} in class {class}");
        assert!(size >= last_size, "class {class} not sorted at {node}");
        assert_eq!(self.heap.succ(node), below, "broken successor link at {node}");
        listed += 1;
        last_size = size;
        below = node;
        node = self.heap.pred(node);
      }
    }
    assert_eq!(free_blocks, listed, "index does not cover every free block");
  }

  /// Prints one line per block, prologue to epilogue. Debug aid.
  pub fn dump(&self) {
    println!("{:>8}  {:>8}  state", "offset", "size");
    let mut bp = PROLOGUE;
    loop {
      let word = self.heap.tag(hdr(bp));
      println!(
        "{:>8}  {:>8}  {}{}",
        bp,
        word.size(),
        if word.allocated() { "allocated" } else { "free" },
        if word.reserved() { " (reserved)" } else { "" },
      );
      if word.size() == 0 {
        break;
      }
      bp = self.heap.next_block(bp);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::heap::FixedArena;

  fn arena_allocator(capacity: usize) -> SegregatedAllocator<FixedArena> {
    SegregatedAllocator::with_memory(FixedArena::new(capacity)).unwrap()
  }

  /// Collects `(payload offset, size, allocated)` for every block
  /// between the sentinels.
  fn blocks(a: &SegregatedAllocator<FixedArena>) -> Vec<(usize, usize, bool)> {
    let mut out = Vec::new();
    let mut bp = a.heap.next_block(PROLOGUE);
    while a.heap.block_size(bp) > 0 {
      out.push((bp, a.heap.block_size(bp), a.heap.allocated(bp)));
      bp = a.heap.next_block(bp);
    }
    out
  }

  fn free_sizes(a: &SegregatedAllocator<FixedArena>) -> Vec<usize> {
    blocks(a)
      .into_iter()
      .filter(|&(_, _, allocated)| !allocated)
      .map(|(_, size, _)| size)
      .collect()
  }

  fn nonempty_classes(a: &SegregatedAllocator<FixedArena>) -> usize {
    a.classes.iter().filter(|&&head| head != NIL).count()
  }

  #[test]
  fn init_leaves_one_small_chunk_free() {
    let a = arena_allocator(1 << 20);
    a.check_heap();

    assert_eq!(blocks(&a), vec![(2 * DSIZE, INITCHUNKSIZE, false)]);
    assert_eq!(nonempty_classes(&a), 1);
  }

  #[test]
  fn class_of_is_floor_log2_capped() {
    assert_eq!(SegregatedAllocator::<FixedArena>::class_of(16), 4);
    assert_eq!(SegregatedAllocator::<FixedArena>::class_of(24), 4);
    assert_eq!(SegregatedAllocator::<FixedArena>::class_of(32), 5);
    assert_eq!(SegregatedAllocator::<FixedArena>::class_of(4096), 12);
    assert_eq!(SegregatedAllocator::<FixedArena>::class_of(1 << 19), 19);
    assert_eq!(SegregatedAllocator::<FixedArena>::class_of(1 << 25), 19);
  }

  #[test]
  fn malloc_zero_returns_null() {
    let mut a = arena_allocator(1 << 20);
    assert!(a.malloc(0).is_null());
    a.check_heap();
  }

  #[test]
  fn place_splits_the_tail() {
    let mut a = arena_allocator(1 << 20);

    // 32 bytes round up to 40; the 64-byte chunk splits into 40 + 24.
    let p = a.malloc(32);
    assert!(!p.is_null());
    a.check_heap();

    assert_eq!(
      blocks(&a),
      vec![(2 * DSIZE, 40, true), (2 * DSIZE + 40, 24, false)]
    );
  }

  #[test]
  fn large_requests_go_to_the_high_end() {
    let mut a = arena_allocator(1 << 20);

    // 100 bytes round up to 112; the initial 64 are too small, so the
    // heap grows by a chunk that merges into one 4160-byte block, and
    // the allocation lands at its high end.
    let p = a.malloc(100);
    assert!(!p.is_null());
    a.check_heap();

    let layout = blocks(&a);
    assert_eq!(layout.len(), 2);
    assert_eq!(layout[0], (2 * DSIZE, CHUNKSIZE + INITCHUNKSIZE - 112, false));
    assert_eq!(layout[1].1, 112);
    assert!(layout[1].2);
  }

  #[test]
  fn freeing_everything_coalesces_to_one_block() {
    let mut a = arena_allocator(1 << 20);

    let x = a.malloc(100);
    let y = a.malloc(100);
    let z = a.malloc(100);
    a.check_heap();

    unsafe {
      a.free(y);
      a.check_heap();
      a.free(x);
      a.check_heap();
      a.free(z);
      a.check_heap();
    }

    assert_eq!(free_sizes(&a), vec![CHUNKSIZE + INITCHUNKSIZE]);
    assert_eq!(nonempty_classes(&a), 1);
  }

  #[test]
  fn freeing_the_middle_merges_both_neighbors() {
    let mut a = arena_allocator(1 << 20);

    let x = a.malloc(64);
    let y = a.malloc(64);
    let z = a.malloc(64);

    unsafe {
      a.free(x);
      a.check_heap();
      a.free(z);
      a.check_heap();
      a.free(y);
      a.check_heap();
    }

    assert_eq!(free_sizes(&a), vec![CHUNKSIZE + INITCHUNKSIZE]);
  }

  #[test]
  fn buckets_stay_sorted_whatever_the_free_order() {
    let mut a = arena_allocator(1 << 20);

    // Two holes in the same class (72 and 104 both live in class 6),
    // with allocated guards so they cannot merge.
    let small = a.malloc(64);
    let _guard1 = a.malloc(8);
    let large = a.malloc(96);
    let _guard2 = a.malloc(8);

    unsafe {
      a.free(small);
      a.free(large);
    }
    a.check_heap();

    // 82 bytes round up to 96: too big for the 72-byte hole, so the
    // sorted walk must land on the 104-byte one.
    let p = a.malloc(82);
    assert_eq!(p, large);
    a.check_heap();
  }

  #[test]
  fn payloads_are_8_byte_aligned() {
    let mut a = arena_allocator(1 << 20);

    for size in [1, 7, 8, 13, 100, 1000] {
      let p = a.malloc(size);
      assert!(!p.is_null());
      assert_eq!(p as usize % DSIZE, 0, "allocation of {size} is misaligned");
      a.check_heap();
    }
  }

  #[test]
  fn free_and_malloc_restore_the_block_structure() {
    let mut a = arena_allocator(1 << 20);

    let before = blocks(&a);
    let p = a.malloc(32);
    unsafe { a.free(p) };
    a.check_heap();

    assert_eq!(blocks(&a), before);
  }

  #[test]
  fn realloc_shrink_stays_in_place() {
    let mut a = arena_allocator(1 << 20);

    let p = a.malloc(200);
    unsafe {
      for i in 0..50 {
        p.add(i).write(i as u8);
      }

      let q = a.realloc(p, 50);
      assert_eq!(q, p);
      a.check_heap();

      for i in 0..50 {
        assert_eq!(q.add(i).read(), i as u8);
      }

      // The block keeps at least the payload plus its overhead.
      let bp = a.heap.offset_of(q);
      assert!(a.heap.block_size(bp) >= 50 + DSIZE);
    }
  }

  #[test]
  fn realloc_grows_in_place_at_the_heap_end() {
    let mut a = arena_allocator(1 << 20);

    let p = a.malloc(100);
    unsafe {
      let filler = a.malloc(8);
      a.free(filler);
      a.check_heap();

      for i in 0..100 {
        p.add(i).write(i as u8);
      }

      let r = a.realloc(p, 200);
      assert_eq!(r, p);
      a.check_heap();

      for i in 0..100 {
        assert_eq!(r.add(i).read(), i as u8);
      }
    }
  }

  #[test]
  fn realloc_absorbs_a_free_successor() {
    let mut a = arena_allocator(1 << 20);

    // `p` takes the whole 64-byte chunk; the next malloc grows the
    // heap and leaves its low remainder free, right after `p`.
    let p = a.malloc(50);
    let w = a.malloc(3000);
    a.check_heap();

    unsafe {
      for i in 0..50 {
        p.add(i).write(!(i as u8));
      }

      let r = a.realloc(p, 700);
      assert_eq!(r, p);
      a.check_heap();

      for i in 0..50 {
        assert_eq!(r.add(i).read(), !(i as u8));
      }

      // The absorbed successor is gone: `p` now borders `w`.
      let bp = a.heap.offset_of(r);
      assert_eq!(a.heap.payload_ptr(a.heap.next_block(bp)), w);
    }
  }

  #[test]
  fn realloc_reserves_the_successor_and_free_releases_it() {
    let mut a = arena_allocator(1 << 20);

    let p = a.malloc(50);
    let w = a.malloc(3000);
    a.check_heap();

    unsafe {
      // Sized so the absorbed span leaves less than two buffers spare:
      // the successor gets tagged.
      let r = a.realloc(p, 764);
      assert_eq!(r, p);
      a.check_heap();

      let w_bp = a.heap.offset_of(w);
      assert!(a.heap.tag(hdr(w_bp)).reserved());

      // Freeing the reallocated block abandons the reservation.
      a.free(r);
      a.check_heap();
      assert!(!a.heap.tag(hdr(w_bp)).reserved());
    }
  }

  #[test]
  fn fit_search_skips_reserved_blocks() {
    let mut a = arena_allocator(1 << 20);

    let p = a.malloc(50);
    let w = a.malloc(3000);

    unsafe {
      let r = a.realloc(p, 764);
      assert_eq!(r, p);

      // `w` is tagged; freeing it keeps the tag on the now-free block.
      a.free(w);
      a.check_heap();
      let w_bp = a.heap.offset_of(w);
      assert!(!a.heap.allocated(w_bp));
      assert!(a.heap.tag(hdr(w_bp)).reserved());

      // Plenty big, but reserved: the search must look past it and
      // grow the heap instead.
      let size_before = a.heap.size();
      let q = a.malloc(2900);
      assert!(!q.is_null());
      assert_ne!(q, w);
      assert!(a.heap.size() > size_before);
      a.check_heap();
    }
  }

  #[test]
  fn realloc_moves_when_the_successor_is_allocated() {
    let mut a = arena_allocator(1 << 20);

    // `p` takes the whole first chunk; the small allocation after it
    // sits at the low end of the next chunk, walling `p` in.
    let p = a.malloc(50);
    let _wall = a.malloc(8);
    a.check_heap();

    unsafe {
      for i in 0..50 {
        p.add(i).write(i as u8);
      }

      let r = a.realloc(p, 4000);
      assert!(!r.is_null());
      assert_ne!(r, p);
      a.check_heap();

      for i in 0..50 {
        assert_eq!(r.add(i).read(), i as u8);
      }
    }
  }

  #[test]
  fn realloc_moves_when_the_free_successor_is_walled_in() {
    let mut a = arena_allocator(1 << 20);

    // `p` takes the whole first chunk. The next malloc goes to the
    // high end of the fresh chunk, so its low remainder sits free
    // between `p` and `x`: a free successor that does not reach the
    // break, too small for the growth below, with live data behind it.
    let p = a.malloc(50);
    let x = a.malloc(1000);
    a.check_heap();

    unsafe {
      for i in 0..50 {
        p.add(i).write(i as u8);
      }
      for i in 0..1000 {
        x.add(i).write((i % 251) as u8);
      }

      // Growing past what the free successor offers must not extend
      // the heap on its behalf; the block has to move.
      let r = a.realloc(p, 4000);
      assert!(!r.is_null());
      assert_ne!(r, p);
      a.check_heap();

      for i in 0..50 {
        assert_eq!(r.add(i).read(), i as u8);
      }
      // The block behind the free successor is untouched.
      for i in 0..1000 {
        assert_eq!(x.add(i).read(), (i % 251) as u8);
      }
      let x_bp = a.heap.offset_of(x);
      assert!(a.heap.allocated(x_bp));
      assert_eq!(a.heap.block_size(x_bp), 1008);
    }
  }

  #[test]
  fn realloc_extends_through_a_terminal_free_successor() {
    let mut a = arena_allocator(1 << 20);

    // Leave `p` directly below a free block that runs to the break.
    let p = a.malloc(50);
    let z = a.malloc(8);
    unsafe {
      a.free(z);
      a.check_heap();

      for i in 0..50 {
        p.add(i).write(i as u8);
      }

      // The successor covers part of the growth and borders the break,
      // so the rest comes from extending the heap, in place.
      let r = a.realloc(p, 5000);
      assert_eq!(r, p);
      a.check_heap();

      for i in 0..50 {
        assert_eq!(r.add(i).read(), i as u8);
      }
      let bp = a.heap.offset_of(r);
      assert!(a.heap.block_size(bp) >= 5000 + DSIZE);
    }
  }

  #[test]
  fn realloc_null_allocates() {
    let mut a = arena_allocator(1 << 20);

    let p = unsafe { a.realloc(ptr::null_mut(), 48) };
    assert!(!p.is_null());
    a.check_heap();
  }

  #[test]
  fn realloc_to_zero_frees() {
    let mut a = arena_allocator(1 << 20);

    let before = blocks(&a);
    let p = a.malloc(32);
    let q = unsafe { a.realloc(p, 0) };
    assert!(q.is_null());
    a.check_heap();
    assert_eq!(blocks(&a), before);
  }

  #[test]
  fn free_null_is_a_noop() {
    let mut a = arena_allocator(1 << 20);
    unsafe { a.free(ptr::null_mut()) };
    a.check_heap();
  }

  #[test]
  fn exhaustion_returns_null_and_keeps_the_heap_sound() {
    let mut a = arena_allocator(1 << 20);

    let mut live = Vec::new();
    loop {
      let p = a.malloc(128);
      if p.is_null() {
        break;
      }
      unsafe { p.write_bytes(0x5A, 128) };
      live.push(p);
    }
    assert!(!live.is_empty());
    a.check_heap();

    for p in &live {
      unsafe {
        assert_eq!(p.read(), 0x5A);
      }
    }

    for p in live {
      unsafe { a.free(p) };
    }
    a.check_heap();

    assert_eq!(free_sizes(&a), vec![a.heap.size() - 2 * DSIZE]);
    assert_eq!(nonempty_classes(&a), 1);
  }
}
