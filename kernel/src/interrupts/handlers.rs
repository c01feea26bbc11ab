//! Exception and IRQ dispatch
//!
//! Everything arrives here from `trap_common` with the full trap frame on
//! the current kernel stack. Exceptions on a user-mode task kill that task;
//! exceptions in kernel mode display the fault on the VGA text buffer and
//! halt. The timer IRQ hands its frame to the scheduler and resumes
//! whatever frame the scheduler returns.

use super::pic::{self, PICS};
use super::stubs::TrapFrame;
use x86_64::instructions::port::Port;

const EXCEPTION_NAMES: [&str; 32] = [
    "Division by Zero",
    "Debug",
    "NMI",
    "Breakpoint",
    "Overflow",
    "Bound Range Exceeded",
    "Invalid Opcode",
    "Device Not Available",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid TSS",
    "Segment Not Present",
    "Stack Fault",
    "General Protection Fault",
    "Page Fault",
    "Reserved",
    "x87 FPU Error",
    "Alignment Check",
    "Machine Check",
    "SIMD Floating Point",
    "Virtualization",
    "Control Protection",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
];

fn read_cr2() -> u64 {
    let cr2: u64;
    unsafe {
        core::arch::asm!("mov {}, cr2", out(reg) cr2, options(nostack, preserves_flags));
    }
    cr2
}

/// Entry from `trap_common`. Returns the frame to resume.
#[no_mangle]
pub extern "C" fn trap_dispatch(int_no: u64, frame: *mut TrapFrame) -> *mut TrapFrame {
    if int_no < 32 {
        handle_exception(int_no, frame)
    } else {
        handle_irq(int_no, frame)
    }
}

fn handle_exception(int_no: u64, frame: *mut TrapFrame) -> ! {
    let f = unsafe { &*frame };
    let name = EXCEPTION_NAMES[(int_no & 31) as usize];
    let from_user = f.cs & 3 == 3;

    if from_user && crate::task::sched::is_ready() {
        let pid = crate::task::sched::current_id();
        crate::log_warn!(
            "[ISR] user fault '{}' pid={} rip={:#x} err={:#x}",
            name,
            pid,
            f.rip,
            f.err_code
        );
        crate::vga::print_at("USER FAULT: ", 0, 5, crate::vga::COLOR_ERROR);
        crate::vga::print_at(name, 12, 5, crate::vga::COLOR_ERROR);
        crate::vga::print_at("PID: ", 0, 6, crate::vga::COLOR_NOTE);
        crate::vga::print_hex_at(pid as u64, 5, 6, crate::vga::COLOR_NOTE);
        if int_no == 14 {
            crate::vga::print_at("CR2: ", 0, 7, crate::vga::COLOR_ERROR);
            crate::vga::print_hex_at(read_cr2(), 5, 7, crate::vga::COLOR_ERROR);
        }
        // Kill the task; waiters wake, the scheduler moves on at the next
        // tick and this frame is never resumed.
        crate::task::sched::exit_current(-1);
    }

    // Kernel-mode fault: unrecoverable
    crate::log_error!(
        "[ISR] kernel fault '{}' rip={:#x} err={:#x}",
        name,
        f.rip,
        f.err_code
    );
    crate::vga::print_at("EXCEPTION: ", 0, 5, crate::vga::COLOR_ERROR);
    crate::vga::print_at(name, 11, 5, crate::vga::COLOR_ERROR);
    crate::vga::print_at("RIP: ", 0, 6, crate::vga::COLOR_ERROR);
    crate::vga::print_hex_at(f.rip, 5, 6, crate::vga::COLOR_ERROR);
    if int_no == 14 {
        crate::vga::print_at("CR2: ", 0, 7, crate::vga::COLOR_ERROR);
        crate::vga::print_hex_at(read_cr2(), 5, 7, crate::vga::COLOR_ERROR);
        crate::vga::print_at("(faulting address)", 24, 7, crate::vga::COLOR_NOTE);
    }
    loop {
        x86_64::instructions::hlt();
    }
}

fn handle_irq(int_no: u64, frame: *mut TrapFrame) -> *mut TrapFrame {
    let mut out = frame;

    match int_no as u8 {
        pic::VECTOR_TIMER => {
            crate::logger::tick();
            if crate::task::sched::is_ready() {
                out = crate::task::sched::sched_tick(frame);
            }
        }
        pic::VECTOR_KEYBOARD => {
            let mut port: Port<u8> = Port::new(0x60);
            let scancode: u8 = unsafe { port.read() };
            crate::drivers::keyboard::handle_scancode(scancode);
        }
        pic::VECTOR_MOUSE => {
            // No PS/2 mouse driver; drain the byte so the controller
            // does not wedge.
            let mut port: Port<u8> = Port::new(0x60);
            let _: u8 = unsafe { port.read() };
        }
        _ => {}
    }

    unsafe {
        PICS.lock().notify_end_of_interrupt(int_no as u8);
    }

    out
}
