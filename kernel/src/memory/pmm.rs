//! Physical Memory Manager (Bitmap)
//!
//! Tracks 4 KB physical frames over one contiguous region via a bitmap:
//! bit set = allocated. Single-frame allocation is the hot path; contiguous
//! multi-frame runs are first-fit. Every operation runs with interrupts
//! disabled so a timer IRQ preempting a caller can never observe (or
//! double-allocate from) a half-updated bitmap.

use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;
use x86_64::instructions::interrupts;

use super::PAGE_SIZE;

/// Upper bound on tracked frames: 4 GiB of 4 KiB pages
const MAX_FRAMES: usize = 1 << 20;
const BITMAP_WORDS: usize = MAX_FRAMES / 64;

/// Statistics: total frames managed
static TOTAL_FRAMES: AtomicU64 = AtomicU64::new(0);
/// Statistics: allocated frames
static USED_FRAMES: AtomicU64 = AtomicU64::new(0);

struct PageAllocator {
    /// Each bit = one frame; set = allocated
    bitmap: [u64; BITMAP_WORDS],
    /// Lowest tracked physical address
    base: u64,
    /// Number of frames tracked
    total_frames: usize,
    /// Index of the last allocation word (speeds up the linear scan)
    next_hint: usize,
}

impl PageAllocator {
    const fn new() -> Self {
        Self {
            bitmap: [0; BITMAP_WORDS],
            base: 0,
            total_frames: 0,
            next_hint: 0,
        }
    }

    #[inline]
    fn test(&self, idx: usize) -> bool {
        self.bitmap[idx / 64] & (1 << (idx % 64)) != 0
    }

    #[inline]
    fn set(&mut self, idx: usize) {
        self.bitmap[idx / 64] |= 1 << (idx % 64);
    }

    #[inline]
    fn clear(&mut self, idx: usize) {
        self.bitmap[idx / 64] &= !(1 << (idx % 64));
    }

    fn alloc(&mut self) -> Option<u64> {
        let words = (self.total_frames + 63) / 64;
        for offset in 0..words {
            let word_idx = (self.next_hint + offset) % words;
            let word = self.bitmap[word_idx];
            if word == u64::MAX {
                continue;
            }
            let bit = (!word).trailing_zeros() as usize;
            let frame = word_idx * 64 + bit;
            if frame >= self.total_frames {
                continue;
            }
            self.set(frame);
            self.next_hint = word_idx;
            USED_FRAMES.fetch_add(1, Ordering::Relaxed);
            return Some(self.base + frame as u64 * PAGE_SIZE);
        }
        None
    }

    /// First-fit scan for `n` consecutive free frames. All-or-nothing:
    /// either the whole run is marked allocated or nothing changes.
    fn alloc_run(&mut self, n: usize) -> Option<u64> {
        if n == 0 {
            return None;
        }
        let mut run_start = 0usize;
        let mut run_len = 0usize;
        for frame in 0..self.total_frames {
            if self.test(frame) {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = frame;
            }
            run_len += 1;
            if run_len == n {
                for f in run_start..run_start + n {
                    self.set(f);
                }
                USED_FRAMES.fetch_add(n as u64, Ordering::Relaxed);
                return Some(self.base + run_start as u64 * PAGE_SIZE);
            }
        }
        None
    }

    fn free(&mut self, phys: u64) {
        if phys < self.base {
            return;
        }
        let frame = ((phys - self.base) / PAGE_SIZE) as usize;
        if frame >= self.total_frames {
            return;
        }
        if self.test(frame) {
            self.clear(frame);
            USED_FRAMES.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

static ALLOCATOR: Mutex<PageAllocator> = Mutex::new(PageAllocator::new());

/// Initialize the allocator over the physical range [start, end).
/// Addresses are rounded inward to page boundaries.
pub fn init(start: u64, end: u64) {
    let start = super::page_align_up(start);
    let end = super::page_align_down(end);
    if end <= start {
        crate::log_error!("[PMM] empty physical range {:#x}..{:#x}", start, end);
        return;
    }

    let mut total = ((end - start) / PAGE_SIZE) as usize;
    if total > MAX_FRAMES {
        total = MAX_FRAMES;
    }

    interrupts::without_interrupts(|| {
        let mut alloc = ALLOCATOR.lock();
        alloc.base = start;
        alloc.total_frames = total;
        alloc.next_hint = 0;
        for word in alloc.bitmap.iter_mut() {
            *word = 0;
        }
    });

    TOTAL_FRAMES.store(total as u64, Ordering::SeqCst);
    USED_FRAMES.store(0, Ordering::SeqCst);

    crate::log!(
        "[PMM] ready: {} frames ({} MB) at {:#x}",
        total,
        total * 4 / 1024,
        start
    );
}

/// Permanently mark the frames of [start, end) allocated. Used at boot to
/// keep the physical range shadowed by the per-process user window out of
/// circulation: a frame there would alias a remapped user page whenever
/// the kernel touches it through the identity map under a user CR3.
pub fn reserve_range(start: u64, end: u64) {
    let start = super::page_align_down(start);
    let end = super::page_align_up(end);
    interrupts::without_interrupts(|| {
        let mut alloc = ALLOCATOR.lock();
        let mut addr = start;
        let mut taken = 0u64;
        while addr < end {
            if addr >= alloc.base {
                let frame = ((addr - alloc.base) / PAGE_SIZE) as usize;
                if frame < alloc.total_frames && !alloc.test(frame) {
                    alloc.set(frame);
                    taken += 1;
                }
            }
            addr += PAGE_SIZE;
        }
        USED_FRAMES.fetch_add(taken, Ordering::Relaxed);
    });
}

/// Allocate a single 4 KB frame. Returns the page-aligned physical address.
pub fn alloc_page() -> Option<u64> {
    interrupts::without_interrupts(|| ALLOCATOR.lock().alloc())
}

/// Allocate `n` physically contiguous frames (first-fit) or nothing.
pub fn alloc_pages(n: usize) -> Option<u64> {
    interrupts::without_interrupts(|| ALLOCATOR.lock().alloc_run(n))
}

/// Allocate a zeroed frame (convenience wrapper; frames are identity-mapped)
pub fn alloc_page_zeroed() -> Option<u64> {
    let phys = alloc_page()?;
    unsafe {
        core::ptr::write_bytes(phys as *mut u8, 0, PAGE_SIZE as usize);
    }
    Some(phys)
}

/// Free a previously allocated frame. Out-of-range addresses are ignored:
/// teardown paths hand back identity-mapped addresses that were never
/// PMM-owned (framebuffer pages, boot structures).
pub fn free_page(phys: u64) {
    interrupts::without_interrupts(|| ALLOCATOR.lock().free(phys));
}

/// Free `n` consecutive frames starting at `phys`
pub fn free_pages(phys: u64, n: usize) {
    interrupts::without_interrupts(|| {
        let mut alloc = ALLOCATOR.lock();
        for i in 0..n {
            alloc.free(phys + i as u64 * PAGE_SIZE);
        }
    });
}

/// Return (total, used) frame counts
pub fn stats() -> (u64, u64) {
    (
        TOTAL_FRAMES.load(Ordering::Relaxed),
        USED_FRAMES.load(Ordering::Relaxed),
    )
}

/// Run self-tests. Returns (passed, failed).
pub fn self_test() -> (usize, usize) {
    let mut passed = 0usize;
    let mut failed = 0usize;

    // Basic allocation returns a page-aligned, in-range address
    match alloc_page() {
        Some(phys) => {
            let (total, _) = stats();
            let in_range = phys >= super::PMM_START && phys < super::PMM_START + total * PAGE_SIZE;
            if phys % PAGE_SIZE == 0 && in_range {
                crate::serial_println!("[PMM-TEST] alloc aligned+in-range: PASS");
                passed += 1;
            } else {
                crate::serial_println!("[PMM-TEST] alloc bad address {:#x}: FAIL", phys);
                failed += 1;
            }
            free_page(phys);
        }
        None => {
            crate::serial_println!("[PMM-TEST] alloc returned None: FAIL");
            failed += 1;
        }
    }

    // Round-trip: used count is restored after a burst of alloc/free
    let (_, used_before) = stats();
    let mut frames = [0u64; 32];
    let mut ok = true;
    for slot in frames.iter_mut() {
        match alloc_page() {
            Some(f) => *slot = f,
            None => {
                ok = false;
                break;
            }
        }
    }
    // Uniqueness inside the burst
    for i in 0..frames.len() {
        for j in i + 1..frames.len() {
            if frames[i] != 0 && frames[i] == frames[j] {
                ok = false;
            }
        }
    }
    for &f in frames.iter() {
        if f != 0 {
            free_page(f);
        }
    }
    let (_, used_after) = stats();
    if ok && used_after == used_before {
        crate::serial_println!("[PMM-TEST] round-trip of 32 unique frames: PASS");
        passed += 1;
    } else {
        crate::serial_println!(
            "[PMM-TEST] round-trip (before={} after={}): FAIL",
            used_before,
            used_after
        );
        failed += 1;
    }

    // Contiguous run allocation
    match alloc_pages(4) {
        Some(base) => {
            if base % PAGE_SIZE == 0 {
                crate::serial_println!("[PMM-TEST] alloc_pages(4) contiguous: PASS");
                passed += 1;
            } else {
                crate::serial_println!("[PMM-TEST] alloc_pages(4) misaligned: FAIL");
                failed += 1;
            }
            free_pages(base, 4);
        }
        None => {
            crate::serial_println!("[PMM-TEST] alloc_pages(4) returned None: FAIL");
            failed += 1;
        }
    }

    // Out-of-range free is a no-op
    let (_, before) = stats();
    free_page(0xFD00_0000);
    free_page(0);
    let (_, after) = stats();
    if before == after {
        crate::serial_println!("[PMM-TEST] out-of-range free ignored: PASS");
        passed += 1;
    } else {
        crate::serial_println!("[PMM-TEST] out-of-range free mutated state: FAIL");
        failed += 1;
    }

    (passed, failed)
}
