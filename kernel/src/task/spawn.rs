//! User task creation: spawn and fork
//!
//! `spawn` builds a process from an on-disk ELF: fresh address space, code
//! pages from the loader, a mapped user stack carrying the argv image, and
//! a first-entry trap frame on a new kernel stack. `fork` duplicates the
//! calling task from the user context snapshotted at SYSCALL entry plus a
//! deep copy of its user pages.
//!
//! Both paths unwind everything they allocated on failure, in reverse
//! order, so a failed call leaves no partial state behind.

use super::{fd, TaskState, KSTACK_PAGES, KSTACK_SIZE, USTACK_PAGES};
use crate::memory::{pmm, vmm, PAGE_SIZE, USER_STACK_SIZE, USER_STACK_TOP};
use crate::vfs::{self, NodeKind};

fn alloc_user_stack(root: u64) -> Option<()> {
    for i in 0..USTACK_PAGES {
        let frame = pmm::alloc_page_zeroed()?;
        let vaddr = USER_STACK_TOP - USER_STACK_SIZE + i as u64 * PAGE_SIZE;
        if vmm::map_user_page(
            root,
            vaddr,
            frame,
            vmm::PageFlags::WRITABLE | vmm::PageFlags::USER,
        )
        .is_none()
        {
            pmm::free_page(frame);
            return None;
        }
    }
    Some(())
}

/// Load `path` and enqueue it as a new ring-3 task. The new task becomes
/// its own process-group leader. `fd_overrides` replaces descriptors from
/// fd 0 upward (used to wire redirections before first dispatch).
///
/// The whole construction runs with interrupts disabled: path resolution
/// and the ELF load go through driver state that must not be re-entered by
/// a preempting task.
pub fn spawn(path: &str, args: &[&str], fd_overrides: &[fd::FdEntry]) -> Result<u64, &'static str> {
    x86_64::instructions::interrupts::without_interrupts(|| spawn_inner(path, args, fd_overrides))
}

fn spawn_inner(path: &str, args: &[&str], fd_overrides: &[fd::FdEntry]) -> Result<u64, &'static str> {
    let node = vfs::resolve_path(path).map_err(|_| "spawn: path not found")?;
    if node.kind != NodeKind::File {
        return Err("spawn: not a regular file");
    }

    let root = vmm::new_user_space().ok_or("spawn: out of memory for address space")?;

    let result = (|| {
        let entry = crate::elf::load_into(root, &node).ok_or("spawn: ELF load failed")?;
        alloc_user_stack(root).ok_or("spawn: out of memory for user stack")?;
        let (user_sp, argc, argv) = crate::usermode::build_user_stack(root, args)
            .ok_or("spawn: user stack image failed")?;

        let kbase = pmm::alloc_pages(KSTACK_PAGES).ok_or("spawn: out of memory for kernel stack")?;
        vmm::mark_supervisor_region(kbase, KSTACK_SIZE);
        let ktop = kbase + KSTACK_SIZE;
        let frame = crate::usermode::write_user_frame(ktop, entry, user_sp, argc, argv);

        let pid = super::with_table(|table| {
            let idx = table.alloc_slot()?;
            let id = table.slots[idx].id;
            let parent_id = table.slots[table.current].id;
            let t = &mut table.slots[idx];
            t.parent = parent_id;
            t.pgid = id; // initial spawn leads its own group
            t.cr3 = root;
            t.kernel_stack_base = kbase;
            t.kernel_stack_top = ktop;
            t.user_stack_top = USER_STACK_TOP;
            t.rsp = frame;
            t.entry = entry;
            t.is_user = true;
            for (i, ov) in fd_overrides.iter().enumerate() {
                if i < fd::MAX_FDS {
                    t.fds[i] = *ov;
                }
            }
            table.enqueue(idx);
            Some(id)
        });

        match pid {
            Some(id) => Ok(id),
            None => {
                pmm::free_pages(kbase, KSTACK_PAGES);
                Err("spawn: out of task slots")
            }
        }
    })();

    match result {
        Ok(id) => {
            crate::log!("[SPAWN] pid {} from {}", id, path);
            Ok(id)
        }
        Err(e) => {
            vmm::free_user_space(root);
            Err(e)
        }
    }
}

/// Duplicate the calling user task. Returns the child pid to the parent;
/// the child's trap frame carries rax = 0. The child inherits the FD table
/// (deep copy, shared pipes), working directory and process group.
pub fn fork() -> i64 {
    let (parent_id, pgid, cwd, fds, parent_root, user_stack_top) = super::with_table(|table| {
        let cur = &table.slots[table.current];
        (
            cur.id,
            cur.pgid,
            cur.cwd,
            cur.fds,
            cur.cr3,
            cur.user_stack_top,
        )
    });

    let child_root = match vmm::new_user_space() {
        Some(r) => r,
        None => return -1,
    };

    if vmm::clone_user_pages(child_root, parent_root).is_none() {
        vmm::free_user_space(child_root);
        return -1;
    }

    let kbase = match pmm::alloc_pages(KSTACK_PAGES) {
        Some(b) => b,
        None => {
            vmm::free_user_space(child_root);
            return -1;
        }
    };
    vmm::mark_supervisor_region(kbase, KSTACK_SIZE);
    let ktop = kbase + KSTACK_SIZE;
    let frame = crate::usermode::write_fork_frame(ktop);

    let pid = super::with_table(|table| {
        let idx = table.alloc_slot()?;
        let id = table.slots[idx].id;
        let t = &mut table.slots[idx];
        t.parent = parent_id;
        t.pgid = pgid;
        t.cr3 = child_root;
        t.kernel_stack_base = kbase;
        t.kernel_stack_top = ktop;
        t.user_stack_top = user_stack_top;
        t.rsp = frame;
        t.is_user = true;
        t.fds = fds;
        t.cwd = cwd;
        t.state = TaskState::Runnable;
        fd::retain_all(&t.fds);
        table.enqueue(idx);
        Some(id)
    });

    match pid {
        Some(id) => {
            crate::log_debug!("[FORK] {} -> {}", parent_id, id);
            id as i64
        }
        None => {
            pmm::free_pages(kbase, KSTACK_PAGES);
            vmm::free_user_space(child_root);
            -1
        }
    }
}
