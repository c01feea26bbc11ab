//! TTY state
//!
//! Two scalars drive terminal job control: the foreground process group
//! (the target of keyboard-synthesised SIGINT) and the line-discipline
//! mode. In cooked mode Ctrl-C becomes a signal; in raw mode every key
//! passes through to `input_poll` untouched.

use spin::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtyMode {
    Cooked,
    Raw,
}

struct TtyState {
    foreground_pgid: u64,
    mode: TtyMode,
}

static TTY: Mutex<TtyState> = Mutex::new(TtyState {
    foreground_pgid: 0,
    mode: TtyMode::Cooked,
});

pub fn init() {
    let mut tty = TTY.lock();
    tty.foreground_pgid = 0;
    tty.mode = TtyMode::Cooked;
}

pub fn foreground_pgid() -> u64 {
    TTY.lock().foreground_pgid
}

pub fn set_foreground_pgid(pgid: u64) {
    TTY.lock().foreground_pgid = pgid;
}

pub fn mode() -> TtyMode {
    TTY.lock().mode
}

pub fn set_mode(mode: TtyMode) {
    TTY.lock().mode = mode;
}
