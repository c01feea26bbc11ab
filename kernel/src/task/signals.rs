//! Signals
//!
//! Level-triggered pending/blocked bitmaps per task plus a registered
//! handler table (reserved: this kernel applies default actions only).
//! SIGKILL acts synchronously; everything else is delivered when the
//! scheduler picks the task or when one of its syscalls returns.

use super::{fd, TaskState, TaskTable};

pub const SIGINT: u32 = 2;
pub const SIGKILL: u32 = 9;
pub const SIGTERM: u32 = 15;
pub const SIGCHLD: u32 = 17;
pub const SIGCONT: u32 = 18;
pub const SIGTSTP: u32 = 20;

/// Signal numbers run 1..NSIG
pub const NSIG: usize = 32;

/// Send `sig` to `pid`. SIGKILL short-circuits to an immediate Zombie with
/// waiters woken; other signals set the pending bit and coalesce.
pub fn send(pid: u64, sig: u32) -> i64 {
    if sig == 0 || sig as usize >= NSIG {
        return -1;
    }
    super::with_table(|table| send_locked(table, pid, sig))
}

pub(super) fn send_locked(table: &mut TaskTable, pid: u64, sig: u32) -> i64 {
    let Some(idx) = table.index_of_pid(pid) else {
        return -1;
    };
    if table.slots[idx].state == TaskState::Zombie {
        return -1;
    }
    if sig == SIGKILL {
        terminate_locked(table, idx, -1);
        return 0;
    }
    table.slots[idx].pending_signals |= 1 << sig;
    0
}

/// OR the signal into every member of the process group
pub fn signal_pgid(pgid: u64, sig: u32) {
    if sig == 0 || sig as usize >= NSIG {
        return;
    }
    super::with_table(|table| {
        for idx in 0..super::MAX_TASKS {
            let state = table.slots[idx].state;
            if state == TaskState::Unused || state == TaskState::Zombie {
                continue;
            }
            if table.slots[idx].pgid != pgid {
                continue;
            }
            if sig == SIGKILL {
                terminate_locked(table, idx, -1);
            } else {
                table.slots[idx].pending_signals |= 1 << sig;
            }
        }
    });
}

/// Deliver at most one pending, non-blocked signal to the task. Called
/// while the scheduler selects a new current and at the tail of a syscall.
/// SIGTERM/SIGINT terminate in place (Zombie, exit code -1, waiters woken);
/// other signals are cleared without action.
pub(super) fn deliver_locked(table: &mut TaskTable, idx: usize) {
    if table.slots[idx].state != TaskState::Runnable {
        return;
    }
    let pending = table.slots[idx].pending_signals;
    if pending == 0 {
        return;
    }
    let blocked = table.slots[idx].blocked_signals;
    for sig in 1..NSIG as u32 {
        let bit = 1u64 << sig;
        if pending & bit == 0 {
            continue;
        }
        if blocked & bit != 0 {
            // Stays pending until unblocked
            continue;
        }
        table.slots[idx].pending_signals &= !bit;
        if sig == SIGTERM || sig == SIGINT {
            terminate_locked(table, idx, -1);
        }
        // One signal per delivery pass
        return;
    }
}

/// Force a task into Zombie: release its descriptors and wake any waiter.
pub(super) fn terminate_locked(table: &mut TaskTable, idx: usize, code: i64) {
    let pid = table.slots[idx].id;
    table.slots[idx].state = TaskState::Zombie;
    table.slots[idx].exit_code = code;
    let mut fds = table.slots[idx].fds;
    fd::release_all(&mut fds);
    table.slots[idx].fds = fds;
    wake_waiters_locked(table, pid);
}

/// Make every task blocked on `pid` runnable again
pub(super) fn wake_waiters_locked(table: &mut TaskTable, pid: u64) {
    for t in table.slots.iter_mut() {
        if t.state == TaskState::Waiting && t.waiting_for == pid as i64 {
            t.state = TaskState::Runnable;
            t.waiting_for = -1;
        }
    }
}

/// Register a user handler slot (reserved). Returns the previous handler.
pub fn set_handler(sig: u32, handler: u64) -> i64 {
    if sig == 0 || sig as usize >= NSIG || sig == SIGKILL {
        return -1;
    }
    super::with_table(|table| {
        let cur = table.current;
        let old = table.slots[cur].signal_handlers[sig as usize];
        table.slots[cur].signal_handlers[sig as usize] = handler;
        old as i64
    })
}
