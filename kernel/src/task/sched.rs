//! Round-robin scheduler
//!
//! The timer IRQ hands its trap frame to `sched_tick`, which saves it into
//! the current task, walks the ready ring for the next Runnable non-idle
//! task (idle is the fallback), updates TSS.RSP0 / the SYSCALL stack
//! global / CR3 for the winner, delivers its pending signals, and returns
//! the winner's saved frame for the assembly epilogue to pop.
//!
//! `sched_yield` reuses the exact same machinery: it synthesizes a trap
//! frame on the caller's stack (resuming at the call site) and feeds it to
//! the selector, so a blocking path like waitpid suspends and resumes like
//! any preempted task.

use core::sync::atomic::{AtomicBool, Ordering};

use super::{fd, signals, Task, TaskState, TaskTable, KSTACK_PAGES, KSTACK_SIZE};
use crate::interrupts::TrapFrame;
use crate::memory::{pmm, vmm};

static SCHED_READY: AtomicBool = AtomicBool::new(false);

/// Whether the scheduler owns the CPU (checked by the timer IRQ)
pub fn is_ready() -> bool {
    SCHED_READY.load(Ordering::Relaxed)
}

/// Allow the timer to start scheduling; called at the end of boot
pub fn set_ready() {
    SCHED_READY.store(true, Ordering::SeqCst);
}

/// Wrap the already-running boot thread as the first task
pub fn bootstrap_current() {
    super::with_table(|table| {
        let Some(idx) = table.alloc_slot() else {
            return;
        };
        let id = table.slots[idx].id;
        table.slots[idx].cr3 = vmm::kernel_root();
        table.slots[idx].pgid = id;
        table.current = idx;
        table.enqueue(idx);
        crate::log_debug!("[SCHED] bootstrap task {}", id);
    });
}

/// Create a kernel-mode task. Its first dispatch is an ordinary
/// interrupt-return into `entry` with a fresh kernel stack.
pub fn create_kernel(entry: fn() -> !, is_idle: bool) -> Option<u64> {
    let kbase = pmm::alloc_pages(KSTACK_PAGES)?;
    vmm::mark_supervisor_region(kbase, KSTACK_SIZE);
    let ktop = kbase + KSTACK_SIZE;
    let frame = crate::usermode::write_kernel_frame(ktop, entry as usize as u64);

    let pid = super::with_table(|table| {
        let Some(idx) = table.alloc_slot() else {
            return None;
        };
        let id = table.slots[idx].id;
        let t = &mut table.slots[idx];
        t.cr3 = vmm::kernel_root();
        t.kernel_stack_base = kbase;
        t.kernel_stack_top = ktop;
        t.rsp = frame;
        t.entry = entry as usize as u64;
        t.is_idle = is_idle;
        t.pgid = id;
        table.enqueue(idx);
        Some(id)
    });

    if pid.is_none() {
        pmm::free_pages(kbase, KSTACK_PAGES);
    }
    pid
}

/// Pick the next Runnable task starting at `start`, preferring non-idle
/// tasks and remembering the first Runnable idle task as fallback.
fn pick_next(table: &TaskTable, start: usize) -> Option<usize> {
    let mut idle = None;
    let mut idx = start;
    loop {
        let t = &table.slots[idx];
        if t.state == TaskState::Runnable {
            if t.is_idle {
                if idle.is_none() {
                    idle = Some(idx);
                }
            } else {
                return Some(idx);
            }
        }
        idx = t.next?;
        if idx == start {
            break;
        }
    }
    idle
}

/// Core selection, shared by the timer IRQ and `sched_yield`.
///
/// With a null `frame` the current task's saved pointer is left untouched
/// (used only before the first preemption of the boot thread).
pub fn sched_tick(frame: *mut TrapFrame) -> *mut TrapFrame {
    tick_inner(frame)
}

fn tick_inner(frame: *mut TrapFrame) -> *mut TrapFrame {
    super::with_table(|table| {
        let cur = table.current;
        if !frame.is_null() {
            table.slots[cur].rsp = frame as u64;
        }

        let start = match table.slots[cur].next.or(table.runq) {
            Some(s) => s,
            None => return frame,
        };

        // Select, deliver signals, and re-select if delivery killed the
        // candidate. Terminates: each killed candidate leaves the Runnable
        // set, and the idle task (never signalled) remains pickable.
        let mut search = start;
        let next = loop {
            let Some(candidate) = pick_next(table, search) else {
                return frame;
            };
            signals::deliver_locked(table, candidate);
            if table.slots[candidate].state == TaskState::Runnable {
                break candidate;
            }
            search = table.slots[candidate].next.unwrap_or(start);
        };

        table.current = next;
        let kstack_top = table.slots[next].kernel_stack_top;
        if kstack_top != 0 {
            crate::gdt::set_kernel_stack(kstack_top);
            crate::usermode::set_current_kernel_rsp(kstack_top);
        }
        let cr3 = table.slots[next].cr3;
        if cr3 != 0 && cr3 != vmm::current_root() {
            unsafe { vmm::activate(cr3) };
        }

        table.slots[next].rsp as *mut TrapFrame
    })
}

#[no_mangle]
extern "C" fn sched_tick_entry(frame: *mut TrapFrame) -> *mut TrapFrame {
    tick_inner(frame)
}

/// Cooperative yield: synthesize a trap frame that resumes at the call
/// site, run the selector on it, and switch to whatever comes back. Only
/// callee-saved register state survives, which is what an extern "C"
/// caller expects.
#[unsafe(naked)]
pub extern "C" fn sched_yield() {
    core::arch::naked_asm!(
        "cli",
        "mov rax, rsp", // rax -> return address
        "push 0x10",    // ss: kernel data
        "lea rcx, [rax + 8]",
        "push rcx", // rsp after return
        "pushfq",
        "or qword ptr [rsp], 0x200", // resume with IF set
        "push 0x08",                 // cs: kernel code
        "push qword ptr [rax]",      // rip: return address
        "push 0",                    // err_code
        "push 0",                    // int_no
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "sub rsp, 8", // call alignment
        "call {tick}",
        "mov rsp, rax",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "add rsp, 16",
        "iretq",
        tick = sym sched_tick_entry,
    );
}

/// Terminate the current task: release descriptors, mark Zombie, wake any
/// waiter, then idle until the scheduler switches away for good.
pub fn exit_current(code: i64) -> ! {
    super::with_table(|table| {
        let cur = table.current;
        signals::terminate_locked(table, cur, code);
    });
    loop {
        x86_64::instructions::interrupts::enable_and_hlt();
    }
}

/// Current task's pid
pub fn current_id() -> u64 {
    super::with_table(|table| table.slots[table.current].id)
}

/// Current task's process group
pub fn current_pgid() -> u64 {
    super::with_table(|table| table.slots[table.current].pgid)
}

/// Block until task `pid` exits, then reap it: unlink from the ring, free
/// its address space and kernel stack, release the slot, and return its
/// exit code. Returns -1 for an unknown pid.
pub fn waitpid(pid: u64) -> i64 {
    loop {
        let outcome = super::with_table(|table| {
            let Some(idx) = table.index_of_pid(pid) else {
                return Some(-1);
            };
            if table.slots[idx].state == TaskState::Zombie {
                let code = table.slots[idx].exit_code;
                reap_locked(table, idx);
                return Some(code);
            }
            let cur = table.current;
            table.slots[cur].state = TaskState::Waiting;
            table.slots[cur].waiting_for = pid as i64;
            None
        });
        match outcome {
            Some(code) => return code,
            None => sched_yield(),
        }
    }
}

fn reap_locked(table: &mut TaskTable, idx: usize) {
    table.dequeue(idx);
    let cr3 = table.slots[idx].cr3;
    if cr3 != 0 && cr3 != vmm::kernel_root() {
        vmm::free_user_space(cr3);
    }
    let kbase = table.slots[idx].kernel_stack_base;
    if kbase != 0 {
        pmm::free_pages(kbase, KSTACK_PAGES);
    }
    let mut fds = table.slots[idx].fds;
    fd::release_all(&mut fds);
    table.slots[idx] = Task::empty();
}

/// Run the signal-delivery pass for the current task at the tail of a
/// syscall. Does not return if a delivered signal terminated the task.
pub fn deliver_signals_current() {
    let zombied = super::with_table(|table| {
        let cur = table.current;
        signals::deliver_locked(table, cur);
        table.slots[cur].state == TaskState::Zombie
    });
    if zombied {
        loop {
            x86_64::instructions::interrupts::enable_and_hlt();
        }
    }
}

/// The idle task: halt until the next interrupt, forever
pub fn idle_entry() -> ! {
    loop {
        x86_64::instructions::interrupts::enable_and_hlt();
    }
}

/// Count live (non-Unused) tasks
pub fn task_count() -> usize {
    super::with_table(|table| {
        table
            .slots
            .iter()
            .filter(|t| t.state != TaskState::Unused)
            .count()
    })
}

/// Debug dump over serial
pub fn dump() {
    super::with_table(|table| {
        for (i, t) in table.slots.iter().enumerate() {
            if t.state == TaskState::Unused {
                continue;
            }
            crate::serial_println!(
                "[SCHED] slot {} pid {} pgid {} state {:?} user={} idle={}",
                i,
                t.id,
                t.pgid,
                t.state,
                t.is_user,
                t.is_idle
            );
        }
    });
}
