//! Pipes - bounded kernel ring buffers for IPC
//!
//! Fixed pool of unidirectional byte streams. Each pipe is a 512-byte ring
//! with read/write positions, a byte count, and per-end open counts that
//! descriptors (and their fork copies) hold references against.
//!
//! Writers never block: a full pipe accepts a short write, possibly zero
//! bytes. Readers yield while the pipe is empty and a writer remains, and
//! see end-of-file (0) once every write end is closed.

use spin::Mutex;
use x86_64::instructions::interrupts;

/// Ring capacity per pipe
pub const PIPE_CAPACITY: usize = 512;
/// Size of the pipe pool
pub const MAX_PIPES: usize = 16;

#[derive(Clone, Copy)]
struct Pipe {
    buf: [u8; PIPE_CAPACITY],
    read_pos: usize,
    write_pos: usize,
    count: usize,
    readers: u32,
    writers: u32,
    in_use: bool,
}

impl Pipe {
    const fn empty() -> Self {
        Self {
            buf: [0; PIPE_CAPACITY],
            read_pos: 0,
            write_pos: 0,
            count: 0,
            readers: 0,
            writers: 0,
            in_use: false,
        }
    }
}

static PIPES: Mutex<[Pipe; MAX_PIPES]> = Mutex::new([Pipe::empty(); MAX_PIPES]);

fn with_pipes<R>(f: impl FnOnce(&mut [Pipe; MAX_PIPES]) -> R) -> R {
    interrupts::without_interrupts(|| f(&mut PIPES.lock()))
}

/// Allocate a pipe with one reference on each end. Returns the pool index.
pub fn create() -> Option<usize> {
    with_pipes(|pipes| {
        for (id, pipe) in pipes.iter_mut().enumerate() {
            if !pipe.in_use {
                *pipe = Pipe::empty();
                pipe.in_use = true;
                pipe.readers = 1;
                pipe.writers = 1;
                return Some(id);
            }
        }
        None
    })
}

/// Add a reference to one end (descriptor duplicated by fork or dup2)
pub fn add_ref(id: usize, write_end: bool) {
    with_pipes(|pipes| {
        if id >= MAX_PIPES || !pipes[id].in_use {
            return;
        }
        if write_end {
            pipes[id].writers += 1;
        } else {
            pipes[id].readers += 1;
        }
    });
}

/// Drop a reference to one end; the pipe is recycled when both ends reach
/// zero.
pub fn close_end(id: usize, write_end: bool) {
    with_pipes(|pipes| {
        if id >= MAX_PIPES || !pipes[id].in_use {
            return;
        }
        let pipe = &mut pipes[id];
        if write_end {
            pipe.writers = pipe.writers.saturating_sub(1);
        } else {
            pipe.readers = pipe.readers.saturating_sub(1);
        }
        if pipe.readers == 0 && pipe.writers == 0 {
            *pipe = Pipe::empty();
        }
    });
}

/// Write into the pipe. Returns bytes accepted (short when the ring fills,
/// possibly 0), or -1 when the fd is stale or no reader remains.
pub fn write(id: usize, data: &[u8]) -> i64 {
    with_pipes(|pipes| {
        if id >= MAX_PIPES || !pipes[id].in_use {
            return -1;
        }
        let pipe = &mut pipes[id];
        if pipe.readers == 0 {
            return -1;
        }
        let space = PIPE_CAPACITY - pipe.count;
        let n = data.len().min(space);
        for &b in &data[..n] {
            pipe.buf[pipe.write_pos] = b;
            pipe.write_pos = (pipe.write_pos + 1) % PIPE_CAPACITY;
        }
        pipe.count += n;
        n as i64
    })
}

/// Read from the pipe. Blocks (yielding the CPU) while the pipe is empty
/// and a writer is still open; returns 0 at end-of-file.
pub fn read(id: usize, buf: &mut [u8]) -> i64 {
    if buf.is_empty() {
        return 0;
    }
    loop {
        let result = with_pipes(|pipes| {
            if id >= MAX_PIPES || !pipes[id].in_use {
                return Some(-1);
            }
            let pipe = &mut pipes[id];
            if pipe.count > 0 {
                let n = buf.len().min(pipe.count);
                for slot in buf[..n].iter_mut() {
                    *slot = pipe.buf[pipe.read_pos];
                    pipe.read_pos = (pipe.read_pos + 1) % PIPE_CAPACITY;
                }
                pipe.count -= n;
                return Some(n as i64);
            }
            if pipe.writers == 0 {
                return Some(0); // EOF
            }
            None
        });
        match result {
            Some(n) => return n,
            None => crate::task::sched::sched_yield(),
        }
    }
}

/// Number of pipes currently allocated
pub fn active_count() -> usize {
    with_pipes(|pipes| pipes.iter().filter(|p| p.in_use).count())
}

/// Run self-tests. Returns (passed, failed).
pub fn self_test() -> (usize, usize) {
    let mut passed = 0usize;
    let mut failed = 0usize;

    let Some(id) = create() else {
        crate::serial_println!("[PIPE-TEST] create failed: FAIL");
        return (0, 1);
    };

    // Short write at capacity: 600 offered, 512 accepted
    let big = [0x55u8; 600];
    let accepted = write(id, &big);
    if accepted == PIPE_CAPACITY as i64 {
        crate::serial_println!("[PIPE-TEST] full ring takes short write: PASS");
        passed += 1;
    } else {
        crate::serial_println!("[PIPE-TEST] short write returned {}: FAIL", accepted);
        failed += 1;
    }

    // Full pipe accepts zero more
    if write(id, &[1, 2, 3]) == 0 {
        crate::serial_println!("[PIPE-TEST] full ring takes zero: PASS");
        passed += 1;
    } else {
        crate::serial_println!("[PIPE-TEST] full ring takes zero: FAIL");
        failed += 1;
    }

    // Bytes come back in order and in total
    let mut out = [0u8; PIPE_CAPACITY];
    let got = read(id, &mut out);
    if got == PIPE_CAPACITY as i64 && out.iter().all(|&b| b == 0x55) {
        crate::serial_println!("[PIPE-TEST] byte conservation: PASS");
        passed += 1;
    } else {
        crate::serial_println!("[PIPE-TEST] byte conservation ({} bytes): FAIL", got);
        failed += 1;
    }

    // EOF after the write end closes
    close_end(id, true);
    let mut one = [0u8; 1];
    if read(id, &mut one) == 0 {
        crate::serial_println!("[PIPE-TEST] EOF after writer close: PASS");
        passed += 1;
    } else {
        crate::serial_println!("[PIPE-TEST] EOF after writer close: FAIL");
        failed += 1;
    }

    // Pool slot recycles once both ends are gone
    let before = active_count();
    close_end(id, false);
    if active_count() == before - 1 {
        crate::serial_println!("[PIPE-TEST] slot recycled: PASS");
        passed += 1;
    } else {
        crate::serial_println!("[PIPE-TEST] slot recycled: FAIL");
        failed += 1;
    }

    (passed, failed)
}
