//! GDT - Global Descriptor Table for x86_64
//!
//! Six entries with Ring 0/3 separation and a TSS:
//! - 0x00: Null descriptor
//! - 0x08: Kernel Code (Ring 0)
//! - 0x10: Kernel Data (Ring 0)
//! - 0x18: User Data (Ring 3) - must be before User Code for SYSRET
//! - 0x20: User Code (Ring 3)
//! - 0x28: TSS (16 bytes)
//!
//! SYSRET in 64-bit mode loads CS = STAR[63:48] + 16 and SS = STAR[63:48] + 8
//! (RPL forced to 3), so with STAR[63:48] = 0x10 we get CS=0x23 and SS=0x1B.
//!
//! The TSS carries only RSP0, updated on every context switch so interrupts
//! taken in Ring 3 land on the running task's kernel stack.

use core::mem::size_of;

/// Segment selector for kernel code (Ring 0)
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
/// Segment selector for kernel data (Ring 0)
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
/// Segment selector for user data (Ring 3)
pub const USER_DATA_SELECTOR: u16 = 0x18 | 3;
/// Segment selector for user code (Ring 3)
pub const USER_CODE_SELECTOR: u16 = 0x20 | 3;
/// TSS selector
pub const TSS_SELECTOR: u16 = 0x28;

/// GDT entry (64-bit mode)
#[derive(Clone, Copy)]
#[repr(C, packed)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_middle: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_middle: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }

    const fn code_segment(ring: u8) -> Self {
        let access = if ring == 0 {
            0x9A // Present + DPL 0 + Code + Readable
        } else {
            0xFA // Present + DPL 3 + Code + Readable
        };
        Self {
            limit_low: 0xFFFF,
            base_low: 0,
            base_middle: 0,
            access,
            granularity: 0xAF, // Long mode + 4K granularity + limit high
            base_high: 0,
        }
    }

    const fn data_segment(ring: u8) -> Self {
        let access = if ring == 0 {
            0x92 // Present + DPL 0 + Data + Writable
        } else {
            0xF2 // Present + DPL 3 + Data + Writable
        };
        Self {
            limit_low: 0xFFFF,
            base_low: 0,
            base_middle: 0,
            access,
            granularity: 0xCF, // 4K granularity + limit high
            base_high: 0,
        }
    }
}

/// TSS entry in GDT (16 bytes for 64-bit TSS)
#[derive(Clone, Copy)]
#[repr(C, packed)]
struct TssEntry {
    length: u16,
    base_low: u16,
    base_middle: u8,
    flags1: u8,
    flags2: u8,
    base_high: u8,
    base_upper: u32,
    reserved: u32,
}

impl TssEntry {
    const fn null() -> Self {
        Self {
            length: 0,
            base_low: 0,
            base_middle: 0,
            flags1: 0,
            flags2: 0,
            base_high: 0,
            base_upper: 0,
            reserved: 0,
        }
    }

    fn new(tss_addr: u64) -> Self {
        Self {
            length: (size_of::<TaskStateSegment>() - 1) as u16,
            base_low: tss_addr as u16,
            base_middle: (tss_addr >> 16) as u8,
            flags1: 0x89, // Present + 64-bit TSS (available)
            flags2: 0x00,
            base_high: (tss_addr >> 24) as u8,
            base_upper: (tss_addr >> 32) as u32,
            reserved: 0,
        }
    }
}

/// Task State Segment (64-bit)
#[repr(C, packed)]
struct TaskStateSegment {
    reserved1: u32,
    /// Stack pointers for privilege levels 0-2
    rsp: [u64; 3],
    reserved2: u64,
    /// Interrupt Stack Table pointers
    ist: [u64; 7],
    reserved3: u64,
    reserved4: u16,
    /// I/O map base address
    iomap_base: u16,
}

impl TaskStateSegment {
    const fn new() -> Self {
        Self {
            reserved1: 0,
            rsp: [0; 3],
            reserved2: 0,
            ist: [0; 7],
            reserved3: 0,
            reserved4: 0,
            iomap_base: size_of::<TaskStateSegment>() as u16,
        }
    }
}

/// Complete GDT
#[repr(C, packed)]
struct Gdt {
    null: GdtEntry,
    kernel_code: GdtEntry,
    kernel_data: GdtEntry,
    user_data: GdtEntry,
    user_code: GdtEntry,
    tss: TssEntry,
}

impl Gdt {
    const fn new() -> Self {
        Self {
            null: GdtEntry::null(),
            kernel_code: GdtEntry::code_segment(0),
            kernel_data: GdtEntry::data_segment(0),
            user_data: GdtEntry::data_segment(3),
            user_code: GdtEntry::code_segment(3),
            tss: TssEntry::null(),
        }
    }
}

/// GDT pointer for LGDT
#[repr(C, packed)]
struct GdtPtr {
    limit: u16,
    base: u64,
}

static mut GDT: Gdt = Gdt::new();
static mut TSS: TaskStateSegment = TaskStateSegment::new();

/// Dedicated RSP0 stack for interrupts taken before the first context switch
const BOOT_RSP0_SIZE: usize = 16 * 1024;
static mut BOOT_RSP0_STACK: [u8; BOOT_RSP0_SIZE] = [0; BOOT_RSP0_SIZE];

/// Initialize GDT and TSS, replacing whatever the bootloader handed over
pub fn init() {
    unsafe {
        TSS.rsp[0] = core::ptr::addr_of!(BOOT_RSP0_STACK) as u64 + BOOT_RSP0_SIZE as u64;

        let tss_addr = core::ptr::addr_of!(TSS) as u64;
        GDT.tss = TssEntry::new(tss_addr);

        let gdt_ptr = GdtPtr {
            limit: (size_of::<Gdt>() - 1) as u16,
            base: core::ptr::addr_of!(GDT) as u64,
        };

        core::arch::asm!(
            "lgdt [{}]",
            in(reg) &gdt_ptr,
            options(readonly, nostack, preserves_flags)
        );

        // Reload code segment with a far return
        core::arch::asm!(
            "push {sel}",
            "lea {tmp}, [rip + 2f]",
            "push {tmp}",
            "retfq",
            "2:",
            sel = in(reg) KERNEL_CODE_SELECTOR as u64,
            tmp = lateout(reg) _,
            options(preserves_flags)
        );

        // Reload data segments
        core::arch::asm!(
            "mov ds, {0:x}",
            "mov es, {0:x}",
            "mov ss, {0:x}",
            in(reg) KERNEL_DATA_SELECTOR,
            options(nostack, preserves_flags)
        );

        // Load TSS
        core::arch::asm!(
            "ltr {0:x}",
            in(reg) TSS_SELECTOR,
            options(nostack, preserves_flags)
        );
    }

    crate::log_debug!("[GDT] loaded: ring 0/3 segments + TSS");
}

/// Update RSP0 in the TSS (called by the scheduler on context switch)
pub fn set_kernel_stack(stack_top: u64) {
    unsafe {
        TSS.rsp[0] = stack_top;
    }
}
