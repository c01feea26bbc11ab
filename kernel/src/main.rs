//! VoltOS kernel
//!
//! A small preemptive multitasking x86_64 kernel: ring-3 user programs
//! loaded from a FAT32 disk, round-robin scheduling off the PIT, and a
//! POSIX-flavoured syscall interface over SYSCALL/SYSRET.
//!
//! The bootloader leaves the CPU in 64-bit long mode with paging enabled,
//! interrupts disabled, a scratch GDT (replaced here), and a framebuffer
//! record at the well-known low-memory addresses the framebuffer driver
//! reads.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]

extern crate alloc;

mod serial;
mod logger;

mod drivers;
mod elf;
mod gdt;
mod interrupts;
mod memory;
mod pipe;
mod selftest;
mod syscall;
mod task;
mod tty;
mod usermode;
mod vfs;
mod vga;

use core::panic::PanicInfo;

/// Create the idle task at boot
const START_IDLE_TASK: bool = true;
/// Spawn the first user program after mount
const START_INIT_TASK: bool = true;
/// Run the subsystem self-tests before enabling interrupts
const RUN_SELF_TESTS: bool = false;

/// First user program
const INIT_PATH: &str = "/apps/init";

/// Directories guaranteed to exist after mount
const STANDARD_DIRS: [&str; 6] = ["/apps", "/core", "/users/root", "/cfg", "/temp", "/dev"];

#[cfg(not(test))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    kernel_main()
}

#[cfg(not(test))]
fn kernel_main() -> ! {
    serial::init();
    vga::clear();
    vga::println("VoltOS x86_64", vga::COLOR_DEFAULT);
    log!("VoltOS booting");

    // Memory: identity map, physical allocator, heap. The physical range
    // under the user window never enters circulation (see reserve_range).
    memory::vmm::init();
    memory::pmm::init(memory::PMM_START, memory::PMM_END);
    memory::pmm::reserve_range(memory::USER_VADDR_BASE, memory::USER_STACK_TOP);
    memory::heap::init();

    // Framebuffer: record from the bootloader, pixel range mapped
    // supervisor-writable in the kernel map
    drivers::framebuffer::init();
    if let Some((base, size)) = drivers::framebuffer::phys_range() {
        let root = memory::vmm::kernel_root();
        let start = memory::page_align_down(base);
        let end = memory::page_align_up(base + size);
        let mut addr = start;
        while addr < end {
            memory::vmm::map_kernel_page(
                root,
                addr,
                addr,
                memory::vmm::PageFlags::WRITABLE,
            );
            addr += memory::PAGE_SIZE;
        }
    }

    // Ring 3 may write the VGA text buffer directly for now
    memory::vmm::mark_user_region(0xB8000, memory::PAGE_SIZE);

    // Segments, scheduler bootstrap, terminal, input
    gdt::init();
    task::sched::bootstrap_current();
    tty::init();
    drivers::keyboard::init();

    // IDT, PIC remap, PIT; interrupts stay off until the end
    interrupts::init();

    // SYSCALL/SYSRET MSRs
    usermode::init();

    // Disk and filesystem
    drivers::ata::init();
    drivers::ata::select_drive(drivers::ata::Drive::Slave);
    match vfs::fat32::mount(0) {
        Ok(()) => {
            vga::println("FAT32 mounted", vga::COLOR_OK);
            for dir in STANDARD_DIRS {
                if vfs::ensure_path_exists(dir).is_err() {
                    log_warn!("[BOOT] could not ensure {}", dir);
                }
            }
        }
        Err(e) => {
            vga::println("FAT32 mount failed", vga::COLOR_ERROR);
            log_error!("[BOOT] FAT32 mount failed: {:?}", e);
        }
    }

    if START_IDLE_TASK {
        match task::sched::create_kernel(task::sched::idle_entry, true) {
            Some(pid) => log_debug!("[BOOT] idle task pid {}", pid),
            None => log_error!("[BOOT] idle task creation failed"),
        }
    }

    if RUN_SELF_TESTS {
        selftest::run_all();
    }

    if START_INIT_TASK {
        match task::spawn::spawn(INIT_PATH, &["init"], &[]) {
            Ok(pid) => {
                tty::set_foreground_pgid(pid);
                vga::println("init spawned", vga::COLOR_OK);
            }
            Err(e) => {
                vga::println("init missing", vga::COLOR_ERROR);
                log_warn!("[BOOT] {}", e);
            }
        }
    }

    task::sched::set_ready();
    interrupts::enable();
    log!("[BOOT] scheduler live, {} tasks", task::sched::task_count());

    // The boot thread becomes a kernel task parked here; the timer takes
    // over from this point.
    loop {
        x86_64::instructions::hlt();
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("!!! KERNEL PANIC !!!");
    serial_println!("{}", info);
    vga::print_at("KERNEL PANIC - halted", 0, 10, vga::COLOR_ERROR);
    halt_loop()
}

fn halt_loop() -> ! {
    x86_64::instructions::interrupts::disable();
    loop {
        x86_64::instructions::hlt();
    }
}
