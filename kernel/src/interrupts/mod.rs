//! Interrupt Handling Subsystem
//!
//! IDT setup over the naked trap stubs, PIC remap and PIT programming.
//! Interrupts stay disabled until the very end of `kernel_main`.

pub mod handlers;
pub mod pic;
pub mod pit;
pub mod stubs;

pub use stubs::TrapFrame;

use lazy_static::lazy_static;
use x86_64::structures::idt::InterruptDescriptorTable;
use x86_64::VirtAddr;

fn stub_addr(f: extern "C" fn()) -> VirtAddr {
    VirtAddr::new(f as usize as u64)
}

lazy_static! {
    /// Interrupt Descriptor Table: CPU exceptions plus the remapped PIC IRQs
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        unsafe {
            idt.divide_error.set_handler_addr(stub_addr(stubs::exc0));
            idt.debug.set_handler_addr(stub_addr(stubs::exc1));
            idt.non_maskable_interrupt.set_handler_addr(stub_addr(stubs::exc2));
            idt.breakpoint.set_handler_addr(stub_addr(stubs::exc3));
            idt.overflow.set_handler_addr(stub_addr(stubs::exc4));
            idt.bound_range_exceeded.set_handler_addr(stub_addr(stubs::exc5));
            idt.invalid_opcode.set_handler_addr(stub_addr(stubs::exc6));
            idt.device_not_available.set_handler_addr(stub_addr(stubs::exc7));
            idt.double_fault.set_handler_addr(stub_addr(stubs::exc8));
            idt[9].set_handler_addr(stub_addr(stubs::exc9));
            idt.invalid_tss.set_handler_addr(stub_addr(stubs::exc10));
            idt.segment_not_present.set_handler_addr(stub_addr(stubs::exc11));
            idt.stack_segment_fault.set_handler_addr(stub_addr(stubs::exc12));
            idt.general_protection_fault.set_handler_addr(stub_addr(stubs::exc13));
            idt.page_fault.set_handler_addr(stub_addr(stubs::exc14));
            idt.x87_floating_point.set_handler_addr(stub_addr(stubs::exc16));
            idt.alignment_check.set_handler_addr(stub_addr(stubs::exc17));
            idt.machine_check.set_handler_addr(stub_addr(stubs::exc18));
            idt.simd_floating_point.set_handler_addr(stub_addr(stubs::exc19));
            idt.virtualization.set_handler_addr(stub_addr(stubs::exc20));

            idt[pic::VECTOR_TIMER as usize].set_handler_addr(stub_addr(stubs::irq32));
            idt[pic::VECTOR_KEYBOARD as usize].set_handler_addr(stub_addr(stubs::irq33));
            idt[pic::VECTOR_MOUSE as usize].set_handler_addr(stub_addr(stubs::irq44));
        }
        idt
    };
}

/// Load the IDT, remap the PIC and start the PIT. Does NOT enable
/// interrupts; `kernel_main` does that once the scheduler is live.
pub fn init() {
    IDT.load();
    unsafe {
        pic::PICS.lock().initialize();
    }
    pit::init();
    crate::log_debug!("[IDT] loaded, PIC remapped, PIT running");
}

/// Enable interrupts (end of boot)
pub fn enable() {
    x86_64::instructions::interrupts::enable();
}

/// Disable interrupts and run closure
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    x86_64::instructions::interrupts::without_interrupts(f)
}
