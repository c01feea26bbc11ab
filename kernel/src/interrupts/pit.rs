//! Programmable Interval Timer (8253/8254)
//!
//! Programs channel 0 for periodic interrupts at the scheduler tick rate.

use x86_64::instructions::port::Port;

/// Scheduler tick rate
pub const PIT_HZ: u32 = 100;
/// PIT input clock
const PIT_FREQ: u32 = 1_193_182;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

/// Program the PIT for PIT_HZ periodic ticks on IRQ0
pub fn init() {
    let divisor = (PIT_FREQ / PIT_HZ) as u16;
    let mut command: Port<u8> = Port::new(PIT_COMMAND);
    let mut channel0: Port<u8> = Port::new(PIT_CHANNEL0);
    unsafe {
        // Channel 0, lobyte/hibyte access, square wave mode
        command.write(0x36);
        channel0.write((divisor & 0xFF) as u8);
        channel0.write((divisor >> 8) as u8);
    }
    crate::log_debug!("[PIT] {} Hz (divisor {})", PIT_HZ, divisor);
}
