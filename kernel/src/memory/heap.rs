//! Kernel Heap Allocator
//!
//! Global allocator over a contiguous run of frames taken from the PMM at
//! boot. The heap backs `alloc` collections (staging buffers, path strings,
//! FAT32 sector buffers); the task pool, pipes and FD tables are fixed-size
//! and never touch it.

use linked_list_allocator::LockedHeap;

use super::{HEAP_PAGES, PAGE_SIZE};

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Carve the heap out of the PMM. Must run after `pmm::init` and before the
/// first `alloc` use.
pub fn init() {
    let pages = HEAP_PAGES as usize;
    let base = super::pmm::alloc_pages(pages)
        .expect("heap: PMM could not provide a contiguous region");
    let size = pages * PAGE_SIZE as usize;
    unsafe {
        ALLOCATOR.lock().init(base as *mut u8, size);
    }
    crate::log!("[HEAP] {} KB at {:#x}", size / 1024, base);
}

/// Get used heap space in bytes
pub fn used() -> usize {
    ALLOCATOR.lock().used()
}

/// Get free heap space in bytes
pub fn free() -> usize {
    ALLOCATOR.lock().free()
}
