//! Programmable Interrupt Controller (8259 PIC)
//!
//! Remaps the legacy PIC pair away from the CPU exception range: master
//! vectors at 0x20 (IRQ0 timer = 32, IRQ1 keyboard = 33), slave at 0x28
//! (IRQ12 mouse = 44). Only the timer, keyboard and cascade lines are
//! unmasked at boot; the slave stays fully masked until a PS/2 mouse
//! driver asks for IRQ12.

use spin::Mutex;
use x86_64::instructions::port::Port;

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

/// End of interrupt command
const PIC_EOI: u8 = 0x20;

/// Master vector base
pub const PIC1_OFFSET: u8 = 0x20;
/// Slave vector base
pub const PIC2_OFFSET: u8 = 0x28;

/// Timer vector (IRQ0)
pub const VECTOR_TIMER: u8 = PIC1_OFFSET;
/// Keyboard vector (IRQ1)
pub const VECTOR_KEYBOARD: u8 = PIC1_OFFSET + 1;
/// Mouse vector (IRQ12 = slave IRQ4)
pub const VECTOR_MOUSE: u8 = PIC2_OFFSET + 4;

struct Pic {
    command: Port<u8>,
    data: Port<u8>,
    offset: u8,
}

impl Pic {
    const fn new(command: u16, data: u16, offset: u8) -> Self {
        Self {
            command: Port::new(command),
            data: Port::new(data),
            offset,
        }
    }
}

/// Chained master/slave controller
pub struct ChainedPics {
    pics: [Pic; 2],
}

impl ChainedPics {
    pub const fn new() -> Self {
        Self {
            pics: [
                Pic::new(PIC1_COMMAND, PIC1_DATA, PIC1_OFFSET),
                Pic::new(PIC2_COMMAND, PIC2_DATA, PIC2_OFFSET),
            ],
        }
    }

    /// Run the ICW init sequence and program the boot masks
    pub unsafe fn initialize(&mut self) {
        // ICW1: start initialization
        self.pics[0].command.write(0x11);
        self.pics[1].command.write(0x11);

        // ICW2: vector offsets
        self.pics[0].data.write(self.pics[0].offset);
        self.pics[1].data.write(self.pics[1].offset);

        // ICW3: cascade wiring
        self.pics[0].data.write(4); // slave on IRQ2
        self.pics[1].data.write(2); // cascade identity

        // ICW4: 8086 mode
        self.pics[0].data.write(0x01);
        self.pics[1].data.write(0x01);

        // Boot masks: timer (IRQ0), keyboard (IRQ1), cascade (IRQ2)
        self.pics[0].data.write(0b1111_1000);
        self.pics[1].data.write(0b1111_1111);
    }

    /// Unmask IRQ12; called by a PS/2 mouse driver when it initialises
    pub unsafe fn unmask_mouse(&mut self) {
        let mask: u8 = self.pics[1].data.read();
        self.pics[1].data.write(mask & !(1 << 4));
    }

    /// Acknowledge an interrupt on the vector that raised it
    pub unsafe fn notify_end_of_interrupt(&mut self, vector: u8) {
        if vector >= self.pics[1].offset {
            self.pics[1].command.write(PIC_EOI);
        }
        self.pics[0].command.write(PIC_EOI);
    }
}

/// Global PIC instance
pub static PICS: Mutex<ChainedPics> = Mutex::new(ChainedPics::new());
