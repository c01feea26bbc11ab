//! VoltOS userland syscall wrappers
//!
//! Thin typed wrappers over the SYSCALL instruction. Numbers and flag
//! values mirror the kernel's `syscall::abi` module; arguments travel in
//! rdi/rsi/rdx. Beyond the usual rcx/r11, the kernel entry path clobbers
//! the remaining argument registers, so the asm marks them dead.

#![no_std]

/// Syscall numbers
pub mod nr {
    pub const EXIT: u64 = 0;
    pub const READ: u64 = 1;
    pub const WRITE: u64 = 2;
    pub const OPEN: u64 = 3;
    pub const CLOSE: u64 = 4;
    pub const STAT: u64 = 5;
    pub const FSTAT: u64 = 6;
    pub const MKDIR: u64 = 7;
    pub const RMDIR: u64 = 8;
    pub const UNLINK: u64 = 9;
    pub const READDIR: u64 = 10;
    pub const CHDIR: u64 = 11;
    pub const GETCWD: u64 = 12;
    pub const RENAME: u64 = 13;
    pub const TRUNCATE: u64 = 14;
    pub const CREATE: u64 = 15;
    pub const SEEK: u64 = 16;
    pub const YIELD: u64 = 17;
    pub const PIPE: u64 = 18;
    pub const DUP2: u64 = 19;
    pub const FORK: u64 = 20;
    pub const EXEC: u64 = 21;
    pub const WAITPID: u64 = 22;
    pub const GETPID: u64 = 23;
    pub const KILL: u64 = 24;
    pub const SIGNAL: u64 = 25;
    pub const SETPGID: u64 = 26;
    pub const TCSETPGRP: u64 = 27;
    pub const TCGETPGRP: u64 = 28;
    pub const FB_INFO: u64 = 29;
    pub const FB_PUTPIXEL: u64 = 30;
    pub const INPUT_POLL: u64 = 31;
    pub const TICKS: u64 = 32;
    pub const FB_MAP: u64 = 33;
    pub const FB_PRESENT: u64 = 34;
}

/// Open flags
pub const O_RDONLY: u64 = 0x0000;
pub const O_WRONLY: u64 = 0x0001;
pub const O_RDWR: u64 = 0x0002;
pub const O_CREAT: u64 = 0x0100;
pub const O_TRUNC: u64 = 0x0200;
pub const O_APPEND: u64 = 0x0400;

/// Seek whence
pub const SEEK_SET: u64 = 0;
pub const SEEK_CUR: u64 = 1;
pub const SEEK_END: u64 = 2;

/// Signals
pub const SIGINT: u64 = 2;
pub const SIGKILL: u64 = 9;
pub const SIGTERM: u64 = 15;

/// stat payload
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct Stat {
    pub st_size: u32,
    pub st_mode: u32,
    pub st_ino: u32,
}

/// readdir payload
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Dirent {
    pub name: [u8; 256],
    pub entry_type: u32,
}

/// input_poll payload
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct KeyEvent {
    pub key: u8,
    pub modifiers: u8,
    pub pressed: u8,
    pub scancode: u8,
}

/// fb_info payload
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct FbInfo {
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
    pub pitch: u32,
}

#[inline]
unsafe fn syscall3(num: u64, a1: u64, a2: u64, a3: u64) -> i64 {
    let ret: i64;
    core::arch::asm!(
        "syscall",
        inlateout("rax") num => ret,
        inlateout("rdi") a1 => _,
        inlateout("rsi") a2 => _,
        inlateout("rdx") a3 => _,
        lateout("rcx") _,
        lateout("r8") _,
        lateout("r9") _,
        lateout("r10") _,
        lateout("r11") _,
        options(nostack),
    );
    ret
}

#[inline]
unsafe fn syscall2(num: u64, a1: u64, a2: u64) -> i64 {
    syscall3(num, a1, a2, 0)
}

#[inline]
unsafe fn syscall1(num: u64, a1: u64) -> i64 {
    syscall3(num, a1, 0, 0)
}

#[inline]
unsafe fn syscall0(num: u64) -> i64 {
    syscall3(num, 0, 0, 0)
}

/// Bounded stack copy of a &str with the NUL the kernel expects
fn with_cstr<R>(s: &str, f: impl FnOnce(*const u8) -> R) -> R {
    let mut buf = [0u8; 256];
    let n = s.len().min(255);
    buf[..n].copy_from_slice(&s.as_bytes()[..n]);
    f(buf.as_ptr())
}

pub fn exit(code: i32) -> ! {
    unsafe {
        syscall1(nr::EXIT, code as u64);
    }
    // The kernel tears this task down; nothing to run after
    loop {
        core::hint::spin_loop();
    }
}

pub fn read(fd: i32, buf: &mut [u8]) -> i64 {
    unsafe { syscall3(nr::READ, fd as u64, buf.as_mut_ptr() as u64, buf.len() as u64) }
}

pub fn write(fd: i32, buf: &[u8]) -> i64 {
    unsafe { syscall3(nr::WRITE, fd as u64, buf.as_ptr() as u64, buf.len() as u64) }
}

pub fn open(path: &str, flags: u64) -> i64 {
    with_cstr(path, |p| unsafe { syscall2(nr::OPEN, p as u64, flags) })
}

pub fn close(fd: i32) -> i64 {
    unsafe { syscall1(nr::CLOSE, fd as u64) }
}

pub fn stat(path: &str, out: &mut Stat) -> i64 {
    with_cstr(path, |p| unsafe {
        syscall2(nr::STAT, p as u64, out as *mut Stat as u64)
    })
}

pub fn fstat(fd: i32, out: &mut Stat) -> i64 {
    unsafe { syscall2(nr::FSTAT, fd as u64, out as *mut Stat as u64) }
}

pub fn mkdir(path: &str) -> i64 {
    with_cstr(path, |p| unsafe { syscall1(nr::MKDIR, p as u64) })
}

pub fn rmdir(path: &str) -> i64 {
    with_cstr(path, |p| unsafe { syscall1(nr::RMDIR, p as u64) })
}

pub fn unlink(path: &str) -> i64 {
    with_cstr(path, |p| unsafe { syscall1(nr::UNLINK, p as u64) })
}

pub fn readdir(fd: i32, out: &mut Dirent, index: u32) -> i64 {
    unsafe {
        syscall3(
            nr::READDIR,
            fd as u64,
            out as *mut Dirent as u64,
            index as u64,
        )
    }
}

pub fn chdir(path: &str) -> i64 {
    with_cstr(path, |p| unsafe { syscall1(nr::CHDIR, p as u64) })
}

pub fn getcwd(buf: &mut [u8]) -> i64 {
    unsafe { syscall2(nr::GETCWD, buf.as_mut_ptr() as u64, buf.len() as u64) }
}

pub fn rename(old: &str, new: &str) -> i64 {
    with_cstr(old, |o| {
        with_cstr(new, |n| unsafe { syscall2(nr::RENAME, o as u64, n as u64) })
    })
}

pub fn truncate(path: &str, size: u32) -> i64 {
    with_cstr(path, |p| unsafe { syscall2(nr::TRUNCATE, p as u64, size as u64) })
}

pub fn create(path: &str) -> i64 {
    with_cstr(path, |p| unsafe { syscall1(nr::CREATE, p as u64) })
}

pub fn seek(fd: i32, offset: i64, whence: u64) -> i64 {
    unsafe { syscall3(nr::SEEK, fd as u64, offset as u64, whence) }
}

pub fn yield_cpu() -> i64 {
    unsafe { syscall0(nr::YIELD) }
}

pub fn pipe(fds: &mut [i32; 2]) -> i64 {
    unsafe { syscall1(nr::PIPE, fds.as_mut_ptr() as u64) }
}

pub fn dup2(old_fd: i32, new_fd: i32) -> i64 {
    unsafe { syscall2(nr::DUP2, old_fd as u64, new_fd as u64) }
}

pub fn fork() -> i64 {
    unsafe { syscall0(nr::FORK) }
}

pub fn waitpid(pid: i64) -> i64 {
    unsafe { syscall1(nr::WAITPID, pid as u64) }
}

pub fn getpid() -> i64 {
    unsafe { syscall0(nr::GETPID) }
}

pub fn kill(pid: i64, sig: u64) -> i64 {
    unsafe { syscall2(nr::KILL, pid as u64, sig) }
}

pub fn signal(sig: u64, handler: u64) -> i64 {
    unsafe { syscall2(nr::SIGNAL, sig, handler) }
}

pub fn setpgid(pid: i64, pgid: i64) -> i64 {
    unsafe { syscall2(nr::SETPGID, pid as u64, pgid as u64) }
}

pub fn tcsetpgrp(pgid: i64) -> i64 {
    unsafe { syscall1(nr::TCSETPGRP, pgid as u64) }
}

pub fn tcgetpgrp() -> i64 {
    unsafe { syscall0(nr::TCGETPGRP) }
}

pub fn fb_info(out: &mut FbInfo) -> i64 {
    unsafe { syscall1(nr::FB_INFO, out as *mut FbInfo as u64) }
}

pub fn fb_putpixel(x: u32, y: u32, rgb: u32) -> i64 {
    unsafe { syscall3(nr::FB_PUTPIXEL, x as u64, y as u64, rgb as u64) }
}

pub fn input_poll(out: &mut KeyEvent) -> i64 {
    unsafe { syscall1(nr::INPUT_POLL, out as *mut KeyEvent as u64) }
}

pub fn ticks() -> i64 {
    unsafe { syscall0(nr::TICKS) }
}

pub fn fb_map() -> i64 {
    unsafe { syscall0(nr::FB_MAP) }
}

pub fn fb_present(buf: &[u8]) -> i64 {
    unsafe { syscall1(nr::FB_PRESENT, buf.as_ptr() as u64) }
}
