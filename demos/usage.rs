use std::io::Read;
use std::ptr;

use libc::sbrk;
use segalloc::{SbrkSource, SegAllocator};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `htop`, `gdb`, or just visually track how allocations change the program
/// break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  // A segregated-list heap over the program break. Building it lays down
  // the prologue/epilogue sentinels and claims one 4 KiB chunk.
  let mut heap = match SegAllocator::new(SbrkSource::new()) {
    Ok(heap) => heap,
    Err(err) => {
      eprintln!("failed to set up heap: {err}");
      return;
    }
  };

  unsafe {
    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Allocate 24 bytes. The block is rounded up to 32 bytes (payload
    //    plus header, on the 16-byte grid) and carved from the first chunk.
    // --------------------------------------------------------------------
    let first_block = heap.allocate(24);
    println!("\n[1] Allocate 24 bytes -> {:?}", first_block);
    println!("[1] payload % 16 = {}", first_block as usize % 16);

    first_block.write_bytes(0xAB, 24);
    println!("[1] Initialized first block with 0xAB");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Allocate and free a second block, then allocate the same size
    //    again: first-fit hands the freed slot straight back.
    // --------------------------------------------------------------------
    let second_block = heap.allocate(100);
    println!("\n[2] Allocate 100 bytes -> {:?}", second_block);

    heap.deallocate(second_block);
    let reused_block = heap.allocate(100);
    println!(
      "[2] Freed and re-allocated 100 bytes -> {:?} ({})",
      reused_block,
      if reused_block == second_block {
        "reused the freed block"
      } else {
        "allocated somewhere else"
      }
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Resize the first block. The payload moves but its bytes survive.
    // --------------------------------------------------------------------
    let resized = heap.reallocate(first_block, 200);
    println!("\n[3] Reallocate first block to 200 bytes -> {:?}", resized);
    println!("[3] first byte after move = 0x{:X}", resized.read());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Zeroed array allocation: 128 elements of 8 bytes, all zero.
    // --------------------------------------------------------------------
    let zeroed = heap.zero_allocate(128, 8);
    println!("\n[4] zero_allocate(128, 8) -> {:?}", zeroed);

    let all_zero = (0..1024).all(|i| zeroed.add(i).read() == 0);
    println!("[4] all 1024 bytes zero? {}", all_zero);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Allocate a large block to force heap growth: the program break
    //    moves up by at least the request.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");

    let big_block = heap.allocate(64 * 1024);
    println!("\n[5] Allocate 64 KiB -> {:?}", big_block);

    print_program_break("after large alloc");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Release everything and verify the heap against its invariants.
    // --------------------------------------------------------------------
    heap.deallocate(resized);
    heap.deallocate(reused_block);
    heap.deallocate(zeroed);
    heap.deallocate(big_block);
    heap.deallocate(ptr::null_mut()); // explicitly fine

    println!("\n[6] check_heap after releasing everything: {}", heap.check_heap("demo"));
    println!("[6] End of example. The heap region stays with the process until exit.");
  }
}
