//! init - first user process
//!
//! Sanity-checks the kernel surface it depends on (fork, pipes, waitpid)
//! and then parks as the session anchor, draining keyboard input.

#![no_std]
#![no_main]

use core::panic::PanicInfo;
use voltos_syscall as sys;

#[no_mangle]
pub extern "C" fn _start(argc: u64, _argv: *const *const u8) -> ! {
    sys::write(1, b"init: VoltOS userland up\n");
    if argc == 0 {
        sys::write(2, b"init: missing argv\n");
        sys::exit(1);
    }

    pipe_smoke_test();

    // Session anchor: own the terminal, keep draining input
    let pid = sys::getpid();
    sys::setpgid(0, 0);
    sys::tcsetpgrp(pid);
    let mut ev = sys::KeyEvent::default();
    loop {
        if sys::input_poll(&mut ev) <= 0 {
            sys::yield_cpu();
        }
    }
}

/// Fork a child that ships six bytes through a pipe and exits; verify the
/// bytes, the EOF, and the exit code on the parent side.
fn pipe_smoke_test() {
    let mut fds = [0i32; 2];
    if sys::pipe(&mut fds) != 0 {
        sys::write(2, b"init: pipe failed\n");
        return;
    }

    let pid = sys::fork();
    if pid == 0 {
        sys::close(fds[0]);
        sys::write(fds[1], b"hello\n");
        sys::close(fds[1]);
        sys::exit(0);
    }
    if pid < 0 {
        sys::write(2, b"init: fork failed\n");
        sys::close(fds[0]);
        sys::close(fds[1]);
        return;
    }

    sys::close(fds[1]);
    let mut buf = [0u8; 8];
    let n = sys::read(fds[0], &mut buf);
    let eof = sys::read(fds[0], &mut buf);
    let status = sys::waitpid(pid);
    sys::close(fds[0]);

    if n == 6 && &buf[..6] == b"hello\n" && eof == 0 && status == 0 {
        sys::write(1, b"init: pipe round-trip ok\n");
    } else {
        sys::write(2, b"init: pipe round-trip FAILED\n");
    }
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    sys::write(2, b"init: panic\n");
    sys::exit(101)
}
