//! Memory Management Subsystem
//!
//! Physical bitmap allocator, kernel heap, and the four-level virtual
//! memory manager with per-process address spaces over an identity-mapped
//! kernel.

pub mod heap;
pub mod pmm;
pub mod vmm;

/// Page / frame size (4 KB)
pub const PAGE_SIZE: u64 = 4096;

/// Physical range handed to the PMM at boot: [2 MiB, 64 MiB).
/// Everything below 2 MiB belongs to the kernel image, boot structures
/// and legacy BIOS regions.
pub const PMM_START: u64 = 0x20_0000;
pub const PMM_END: u64 = 0x400_0000;

/// The bootstrap identity map covers [0, IDENTITY_MAP_END), so every frame
/// the PMM can hand out is directly addressable by the kernel.
pub const IDENTITY_MAP_END: u64 = 0x400_0000;

/// Fixed per-process user window: code/data at 16 MiB, stack top at 18 MiB.
pub const USER_VADDR_BASE: u64 = 0x100_0000;
pub const USER_STACK_TOP: u64 = 0x120_0000;
pub const USER_STACK_SIZE: u64 = 16 * 1024;

/// Kernel heap size (4 MiB, carved out of the PMM at boot)
pub const HEAP_PAGES: u64 = 1024;

/// Fixed user-virtual base where `fb_map` places the framebuffer
pub const FB_USER_BASE: u64 = 0x4000_0000;

#[inline]
pub const fn page_align_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE - 1)
}

#[inline]
pub const fn page_align_up(addr: u64) -> u64 {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}
