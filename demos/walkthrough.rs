use std::io::Read;
use std::ptr;

use libc::sbrk;
use rmalloc::SegregatedAllocator;

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `htop`, `gdb`, or just visually track how the program break moves.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via
/// brk/sbrk.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  // A segregated free-list allocator on the real program break. It
  // installs its sentinels and a first small chunk right away.
  let mut allocator = SegregatedAllocator::new().expect("failed to claim the program break");

  print_program_break("start");
  allocator.dump();
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Three 100-byte allocations. The first one outgrows the initial
  //    chunk, so the break moves up by a full chunk.
  // --------------------------------------------------------------------
  let a = allocator.malloc(100);
  let b = allocator.malloc(100);
  let c = allocator.malloc(100);
  println!("\n[1] a = {:?}, b = {:?}, c = {:?}", a, b, c);
  print_program_break("after three mallocs");
  allocator.dump();
  block_until_enter_pressed();

  unsafe {
    // ------------------------------------------------------------------
    // 2) Write through the middle block to show it is usable, then free
    //    it. Its neighbors are allocated, so it stays a lone free block.
    // ------------------------------------------------------------------
    ptr::write_bytes(b, 0xAB, 100);
    allocator.free(b);
    println!("\n[2] freed b (neighbors allocated, no merge)");
    allocator.dump();
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 3) Free the outer blocks. Each free merges with its free
    //    neighbors, leaving a single block at the end.
    // ------------------------------------------------------------------
    allocator.free(a);
    allocator.free(c);
    println!("\n[3] freed a and c (everything coalesced)");
    allocator.dump();
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 4) Grow a block in place, twice. The first growth extends the
    //    heap and pads the block generously; the second eats into that
    //    padding, so the successor gets reserved for the next growth --
    //    watch for the (reserved) marker on the epilogue line.
    // ------------------------------------------------------------------
    let p = allocator.malloc(2000);
    println!("\n[4] p = {:?}", p);
    ptr::write_bytes(p, 0x5A, 2000);

    let q = allocator.realloc(p, 3000);
    println!("[4] realloc(p, 3000) = {:?} (in place: {})", q, q == p);
    let q = allocator.realloc(q, 5900);
    println!("[4] realloc(p, 5900) = {:?} (in place: {})", q, q == p);
    assert_eq!(q.read(), 0x5A);
    allocator.dump();
    print_program_break("after realloc");
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 5) Done. The break never moves back down; the OS reclaims
    //    everything when the process exits.
    // ------------------------------------------------------------------
    allocator.free(q);
    println!("\n[5] freed p. End of walkthrough.");
    allocator.dump();
    print_program_break("end");
  }
}
