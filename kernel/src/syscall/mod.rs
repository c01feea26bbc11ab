//! System call interface
//!
//! Single dispatch over the numeric table in `abi`, arguments in the
//! Linux-compatible register order (the entry stub hands them over as
//! plain C arguments). Returns are non-negative on success and -1 on any
//! error; there is no errno channel. `exit` does not return; `fork`
//! returns twice.

pub mod abi;
mod file;
mod gfx;
mod process;

use alloc::string::String;

use crate::memory::vmm;

/// Dispatcher, reached from the SYSCALL entry stub
#[no_mangle]
pub extern "C" fn syscall_dispatch(
    num: u64,
    a1: u64,
    a2: u64,
    a3: u64,
    _a4: u64,
    _a5: u64,
) -> i64 {
    use abi::*;

    match num {
        SYS_EXIT => crate::task::sched::exit_current(a1 as i64),
        SYS_READ => file::sys_read(a1 as i32, a2, a3 as usize),
        SYS_WRITE => file::sys_write(a1 as i32, a2, a3 as usize),
        SYS_OPEN => file::sys_open(a1, a2 as u32),
        SYS_CLOSE => file::sys_close(a1 as i32),
        SYS_STAT => file::sys_stat(a1, a2),
        SYS_FSTAT => file::sys_fstat(a1 as i32, a2),
        SYS_MKDIR => file::sys_mkdir(a1),
        SYS_RMDIR => file::sys_rmdir(a1),
        SYS_UNLINK => file::sys_unlink(a1),
        SYS_READDIR => file::sys_readdir(a1 as i32, a2, a3 as u32),
        SYS_CHDIR => file::sys_chdir(a1),
        SYS_GETCWD => file::sys_getcwd(a1, a2 as usize),
        SYS_RENAME => file::sys_rename(a1, a2),
        SYS_TRUNCATE => file::sys_truncate(a1, a2 as u32),
        SYS_CREATE => file::sys_create(a1),
        SYS_SEEK => file::sys_seek(a1 as i32, a2 as i64, a3 as u32),
        SYS_YIELD => process::sys_yield(),
        SYS_PIPE => file::sys_pipe(a1),
        SYS_DUP2 => file::sys_dup2(a1 as i32, a2 as i32),
        SYS_FORK => crate::task::spawn::fork(),
        SYS_EXEC => -1, // reserved
        SYS_WAITPID => crate::task::sched::waitpid(a1),
        SYS_GETPID => crate::task::sched::current_id() as i64,
        SYS_KILL => process::sys_kill(a1, a2 as u32),
        SYS_SIGNAL => crate::task::signals::set_handler(a1 as u32, a2),
        SYS_SETPGID => process::sys_setpgid(a1, a2),
        SYS_TCSETPGRP => process::sys_tcsetpgrp(a1),
        SYS_TCGETPGRP => crate::tty::foreground_pgid() as i64,
        SYS_FB_INFO => gfx::sys_fb_info(a1),
        SYS_FB_PUTPIXEL => gfx::sys_fb_putpixel(a1 as u32, a2 as u32, a3 as u32),
        SYS_INPUT_POLL => gfx::sys_input_poll(a1),
        SYS_TICKS => crate::logger::ticks() as i64,
        SYS_FB_MAP => gfx::sys_fb_map(),
        SYS_FB_PRESENT => gfx::sys_fb_present(a1),
        _ => {
            crate::log_debug!("[SYSCALL] unknown number {}", num);
            -1
        }
    }
}

/// Validate a user pointer against the caller's address space
pub(crate) fn user_ok(ptr: u64, len: usize, write: bool) -> bool {
    ptr != 0 && vmm::user_access_ok(vmm::current_root(), ptr, len, write)
}

/// Borrow user memory as a byte slice after validation
pub(crate) fn user_slice<'a>(ptr: u64, len: usize) -> Option<&'a [u8]> {
    if !user_ok(ptr, len, false) {
        return None;
    }
    Some(unsafe { core::slice::from_raw_parts(ptr as *const u8, len) })
}

pub(crate) fn user_slice_mut<'a>(ptr: u64, len: usize) -> Option<&'a mut [u8]> {
    if !user_ok(ptr, len, true) {
        return None;
    }
    Some(unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len) })
}

/// Copy a NUL-terminated string out of user memory, checking each page as
/// the walk crosses it.
pub(crate) fn read_cstring(ptr: u64, max: usize) -> Option<String> {
    if ptr == 0 {
        return None;
    }
    let mut out = String::new();
    for i in 0..max as u64 {
        let addr = ptr + i;
        if !user_ok(addr, 1, false) {
            return None;
        }
        let byte = unsafe { *(addr as *const u8) };
        if byte == 0 {
            return Some(out);
        }
        out.push(byte as char);
    }
    None // unterminated
}
