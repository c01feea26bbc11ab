//! Process-control syscalls
//!
//! fork/waitpid/exit live in the task module; the thin argument plumbing
//! and the process-group calls are here.

use crate::task::{self, sched, signals, TaskState};

pub fn sys_yield() -> i64 {
    sched::sched_yield();
    0
}

pub fn sys_kill(pid: u64, sig: u32) -> i64 {
    signals::send(pid, sig)
}

/// setpgid(pid, pgid): pid 0 means the caller, pgid 0 means "same as pid"
pub fn sys_setpgid(pid: u64, pgid: u64) -> i64 {
    task::with_table(|t| {
        let idx = if pid == 0 {
            t.current
        } else {
            match t.index_of_pid(pid) {
                Some(idx) => idx,
                None => return -1,
            }
        };
        if t.slots[idx].state == TaskState::Zombie {
            return -1;
        }
        let target = if pgid == 0 { t.slots[idx].id } else { pgid };
        t.slots[idx].pgid = target;
        0
    })
}

pub fn sys_tcsetpgrp(pgid: u64) -> i64 {
    crate::tty::set_foreground_pgid(pgid);
    0
}
