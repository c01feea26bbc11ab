//! PS/2 keyboard driver
//!
//! Decodes scancode set 1 into key events with modifier state and queues
//! them in a bounded ring consumed by the console read path and the
//! `input_poll` syscall. In cooked TTY mode Ctrl-C never reaches the
//! queue: it is synthesised into SIGINT for the foreground process group.

use spin::Mutex;
use x86_64::instructions::interrupts;

// Special key codes (values above the ASCII range)
pub const KEY_UP: u8 = 0x80;
pub const KEY_DOWN: u8 = 0x81;
pub const KEY_LEFT: u8 = 0x82;
pub const KEY_RIGHT: u8 = 0x83;
pub const KEY_HOME: u8 = 0x84;
pub const KEY_END: u8 = 0x85;
pub const KEY_PGUP: u8 = 0x86;
pub const KEY_PGDN: u8 = 0x87;
pub const KEY_DELETE: u8 = 0x88;
pub const KEY_INSERT: u8 = 0x89;

// Modifier flags
pub const MOD_SHIFT: u8 = 0x01;
pub const MOD_CTRL: u8 = 0x02;
pub const MOD_ALT: u8 = 0x04;

/// Decoded key event, also the payload of the `input_poll` syscall
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct KeyEvent {
    /// ASCII char or one of the KEY_* codes
    pub key: u8,
    pub modifiers: u8,
    /// 1 = pressed (releases are not queued)
    pub pressed: u8,
    /// Raw scancode
    pub scancode: u8,
}

const QUEUE_SIZE: usize = 64;

struct Keyboard {
    queue: [KeyEvent; QUEUE_SIZE],
    head: usize,
    tail: usize,
    modifiers: u8,
    extended: bool,
}

const ZERO_EVENT: KeyEvent = KeyEvent {
    key: 0,
    modifiers: 0,
    pressed: 0,
    scancode: 0,
};

static KEYBOARD: Mutex<Keyboard> = Mutex::new(Keyboard {
    queue: [ZERO_EVENT; QUEUE_SIZE],
    head: 0,
    tail: 0,
    modifiers: 0,
    extended: false,
});

// Scancode set 1 -> ASCII, unshifted
const KEYMAP: [u8; 0x59] = [
    // 0x00-0x0F: esc row + backspace/tab
    0, 27, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 8, b'\t',
    // 0x10-0x1D: qwerty row, enter, ctrl
    b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n', 0,
    // 0x1E-0x29: home row, quote, backtick
    b'a', b's', b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`',
    // 0x2A-0x2B: lshift, backslash
    0, b'\\',
    // 0x2C-0x35: bottom row
    b'z', b'x', b'c', b'v', b'b', b'n', b'm', b',', b'.', b'/',
    // 0x36-0x3A: rshift, keypad *, alt, space, capslock
    0, b'*', 0, b' ', 0,
    // 0x3B-0x44: F1-F10
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    // 0x45-0x46: numlock, scrolllock
    0, 0,
    // 0x47-0x53: keypad
    b'7', b'8', b'9', b'-', b'4', b'5', b'6', b'+', b'1', b'2', b'3', b'0', b'.',
    // 0x54-0x58
    0, 0, 0, 0, 0,
];

// Scancode set 1 -> ASCII, shifted
const KEYMAP_SHIFT: [u8; 0x59] = [
    // 0x00-0x0F
    0, 27, b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', b'(', b')', b'_', b'+', 8, b'\t',
    // 0x10-0x1D
    b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', b'O', b'P', b'{', b'}', b'\n', 0,
    // 0x1E-0x29
    b'A', b'S', b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', b'"', b'~',
    // 0x2A-0x2B
    0, b'|',
    // 0x2C-0x35
    b'Z', b'X', b'C', b'V', b'B', b'N', b'M', b'<', b'>', b'?',
    // 0x36-0x3A
    0, b'*', 0, b' ', 0,
    // 0x3B-0x44
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    // 0x45-0x46
    0, 0,
    // 0x47-0x53
    b'7', b'8', b'9', b'-', b'4', b'5', b'6', b'+', b'1', b'2', b'3', b'0', b'.',
    // 0x54-0x58
    0, 0, 0, 0, 0,
];

const SC_LSHIFT: u8 = 0x2A;
const SC_RSHIFT: u8 = 0x36;
const SC_CTRL: u8 = 0x1D;
const SC_ALT: u8 = 0x38;
const SC_C: u8 = 0x2E;

pub fn init() {
    let mut kbd = KEYBOARD.lock();
    kbd.head = 0;
    kbd.tail = 0;
    kbd.modifiers = 0;
    kbd.extended = false;
    crate::log!("[KBD] scancode set 1 decoder ready");
}

fn push_event(kbd: &mut Keyboard, event: KeyEvent) {
    let next = (kbd.head + 1) % QUEUE_SIZE;
    if next == kbd.tail {
        // Queue full: drop the oldest event
        kbd.tail = (kbd.tail + 1) % QUEUE_SIZE;
    }
    kbd.queue[kbd.head] = event;
    kbd.head = next;
}

/// Feed one raw scancode from the IRQ handler
pub fn handle_scancode(scancode: u8) {
    let mut kbd = KEYBOARD.lock();

    if scancode == 0xE0 {
        kbd.extended = true;
        return;
    }

    let released = scancode & 0x80 != 0;
    let code = scancode & 0x7F;

    // Modifier tracking
    match code {
        SC_LSHIFT | SC_RSHIFT => {
            if released {
                kbd.modifiers &= !MOD_SHIFT;
            } else {
                kbd.modifiers |= MOD_SHIFT;
            }
            kbd.extended = false;
            return;
        }
        SC_CTRL => {
            if released {
                kbd.modifiers &= !MOD_CTRL;
            } else {
                kbd.modifiers |= MOD_CTRL;
            }
            kbd.extended = false;
            return;
        }
        SC_ALT => {
            if released {
                kbd.modifiers &= !MOD_ALT;
            } else {
                kbd.modifiers |= MOD_ALT;
            }
            kbd.extended = false;
            return;
        }
        _ => {}
    }

    // Ctrl-C in cooked mode: SIGINT to the foreground group, not a key
    if !released && kbd.modifiers & MOD_CTRL != 0 && code == SC_C {
        if crate::tty::mode() == crate::tty::TtyMode::Cooked {
            let fg = crate::tty::foreground_pgid();
            if fg != 0 {
                crate::task::signals::signal_pgid(fg, crate::task::signals::SIGINT);
            }
            kbd.extended = false;
            return;
        }
    }

    if released {
        kbd.extended = false;
        return;
    }

    let key = if kbd.extended {
        kbd.extended = false;
        match code {
            0x48 => KEY_UP,
            0x50 => KEY_DOWN,
            0x4B => KEY_LEFT,
            0x4D => KEY_RIGHT,
            0x47 => KEY_HOME,
            0x4F => KEY_END,
            0x49 => KEY_PGUP,
            0x51 => KEY_PGDN,
            0x53 => KEY_DELETE,
            0x52 => KEY_INSERT,
            _ => 0,
        }
    } else if (code as usize) < KEYMAP.len() {
        if kbd.modifiers & MOD_SHIFT != 0 {
            KEYMAP_SHIFT[code as usize]
        } else {
            KEYMAP[code as usize]
        }
    } else {
        0
    };

    if key == 0 {
        return;
    }

    let modifiers = kbd.modifiers;
    push_event(
        &mut kbd,
        KeyEvent {
            key,
            modifiers,
            pressed: 1,
            scancode,
        },
    );
}

/// Dequeue the next event, if any
pub fn poll_event() -> Option<KeyEvent> {
    interrupts::without_interrupts(|| {
        let mut kbd = KEYBOARD.lock();
        if kbd.tail == kbd.head {
            return None;
        }
        let event = kbd.queue[kbd.tail];
        kbd.tail = (kbd.tail + 1) % QUEUE_SIZE;
        Some(event)
    })
}

/// Whether an event is queued
pub fn has_event() -> bool {
    interrupts::without_interrupts(|| {
        let kbd = KEYBOARD.lock();
        kbd.tail != kbd.head
    })
}
