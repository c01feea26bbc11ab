//! Task Management
//!
//! Fixed pool of task descriptors plus the circular ready ring the
//! scheduler walks. The ring is an intrusive index-based list over the slot
//! array (`next: Option<usize>`); a task stays linked while Runnable,
//! Waiting or Zombie and is unlinked at reap.

pub mod fd;
pub mod sched;
pub mod signals;
pub mod spawn;

use spin::Mutex;

use self::fd::FdTable;
use crate::memory::PAGE_SIZE;

/// Size of the task pool
pub const MAX_TASKS: usize = 16;
/// Kernel stack: 4 contiguous frames
pub const KSTACK_PAGES: usize = 4;
pub const KSTACK_SIZE: u64 = KSTACK_PAGES as u64 * PAGE_SIZE;
/// User stack: 4 frames below USER_STACK_TOP
pub const USTACK_PAGES: usize = 4;

/// Task lifecycle states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Unused,
    Runnable,
    /// Blocked in waitpid on a live child
    Waiting,
    /// Exited, waiting for the parent to reap
    Zombie,
}

/// Fixed-size working-directory buffer (no heap in the task pool)
#[derive(Clone, Copy)]
pub struct CwdBuf {
    bytes: [u8; 256],
    len: usize,
}

impl CwdBuf {
    pub const fn root() -> Self {
        let mut bytes = [0u8; 256];
        bytes[0] = b'/';
        Self { bytes, len: 1 }
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or("/")
    }

    /// Replace the path; rejects anything that does not fit
    pub fn set(&mut self, path: &str) -> bool {
        let src = path.as_bytes();
        if src.is_empty() || src.len() > self.bytes.len() {
            return false;
        }
        self.bytes[..src.len()].copy_from_slice(src);
        self.len = src.len();
        true
    }
}

/// One task descriptor
pub struct Task {
    /// Monotone numeric id (pid); 0 only in Unused slots
    pub id: u64,
    pub parent: u64,
    /// Process group for bulk signal delivery
    pub pgid: u64,
    pub state: TaskState,
    /// Address-space root (CR3 value)
    pub cr3: u64,
    pub kernel_stack_base: u64,
    pub kernel_stack_top: u64,
    pub user_stack_top: u64,
    /// Saved kernel-visible stack pointer; points at a TrapFrame while the
    /// task is off-CPU
    pub rsp: u64,
    /// Entry point (informational)
    pub entry: u64,
    pub is_user: bool,
    pub is_idle: bool,
    /// Pid this task blocks on; meaningful only in Waiting
    pub waiting_for: i64,
    pub exit_code: i64,
    pub pending_signals: u64,
    pub blocked_signals: u64,
    /// Registered user handlers (reserved; delivery uses default actions)
    pub signal_handlers: [u64; signals::NSIG],
    pub fds: FdTable,
    pub cwd: CwdBuf,
    /// Ready-ring link
    pub next: Option<usize>,
}

impl Task {
    pub const fn empty() -> Self {
        Self {
            id: 0,
            parent: 0,
            pgid: 0,
            state: TaskState::Unused,
            cr3: 0,
            kernel_stack_base: 0,
            kernel_stack_top: 0,
            user_stack_top: 0,
            rsp: 0,
            entry: 0,
            is_user: false,
            is_idle: false,
            waiting_for: -1,
            exit_code: 0,
            pending_signals: 0,
            blocked_signals: 0,
            signal_handlers: [0; signals::NSIG],
            fds: fd::default_table(),
            cwd: CwdBuf::root(),
            next: None,
        }
    }
}

/// The task pool and ready ring
pub struct TaskTable {
    pub slots: [Task; MAX_TASKS],
    /// Some member of the ready ring, or None when the ring is empty
    pub runq: Option<usize>,
    /// Slot index of the task that owns the CPU
    pub current: usize,
    next_id: u64,
}

impl TaskTable {
    const fn new() -> Self {
        const EMPTY: Task = Task::empty();
        Self {
            slots: [EMPTY; MAX_TASKS],
            runq: None,
            current: 0,
            next_id: 1,
        }
    }

    /// Claim an Unused slot and reset it to defaults with a fresh id
    pub fn alloc_slot(&mut self) -> Option<usize> {
        for idx in 0..MAX_TASKS {
            if self.slots[idx].state == TaskState::Unused {
                let id = self.next_id;
                self.next_id += 1;
                self.slots[idx] = Task::empty();
                self.slots[idx].id = id;
                self.slots[idx].state = TaskState::Runnable;
                return Some(idx);
            }
        }
        None
    }

    pub fn index_of_pid(&self, pid: u64) -> Option<usize> {
        self.slots
            .iter()
            .position(|t| t.state != TaskState::Unused && t.id == pid)
    }

    /// Link a slot into the ready ring
    pub fn enqueue(&mut self, idx: usize) {
        match self.runq {
            None => {
                self.slots[idx].next = Some(idx);
                self.runq = Some(idx);
            }
            Some(rq) => {
                self.slots[idx].next = self.slots[rq].next;
                self.slots[rq].next = Some(idx);
            }
        }
    }

    /// Unlink a slot from the ready ring
    pub fn dequeue(&mut self, idx: usize) {
        let Some(rq) = self.runq else { return };
        if rq == idx && self.slots[idx].next == Some(idx) {
            self.runq = None;
            self.slots[idx].next = None;
            return;
        }
        let mut prev = rq;
        loop {
            let Some(nx) = self.slots[prev].next else { return };
            if nx == idx {
                self.slots[prev].next = self.slots[idx].next;
                if self.runq == Some(idx) {
                    self.runq = self.slots[idx].next;
                }
                self.slots[idx].next = None;
                return;
            }
            prev = nx;
            if prev == rq {
                return;
            }
        }
    }
}

/// Global task table. Structural changes and traversals happen with
/// interrupts disabled (`with_table`), so the timer IRQ can never observe a
/// half-linked ring.
static TASKS: Mutex<TaskTable> = Mutex::new(TaskTable::new());

/// Run `f` against the task table with interrupts off
pub fn with_table<R>(f: impl FnOnce(&mut TaskTable) -> R) -> R {
    x86_64::instructions::interrupts::without_interrupts(|| f(&mut TASKS.lock()))
}
