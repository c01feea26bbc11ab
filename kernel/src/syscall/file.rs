//! File, directory and IPC syscalls
//!
//! Descriptor dispatch happens on a copy of the entry; offsets and node
//! sizes are written back to the caller's slot afterwards. Relative paths
//! resolve against the task's working directory before touching the VFS.

use alloc::string::String;

use super::abi::{self, UserDirent, UserStat};
use super::{read_cstring, user_ok, user_slice, user_slice_mut};
use crate::task::fd::{self, FdEntry};
use crate::vfs::{self, NodeKind, VfsError};

/// Snapshot a descriptor entry
fn get_fd(fd: i32) -> Option<FdEntry> {
    if fd < 0 || fd as usize >= fd::MAX_FDS {
        return None;
    }
    crate::task::with_table(|t| {
        let cur = t.current;
        Some(t.slots[cur].fds[fd as usize])
    })
}

/// Store a descriptor entry back
fn set_fd(fd: i32, entry: FdEntry) {
    crate::task::with_table(|t| {
        let cur = t.current;
        t.slots[cur].fds[fd as usize] = entry;
    });
}

/// Resolve a user-supplied path against the caller's cwd
fn abs_path(path_ptr: u64) -> Option<String> {
    let path = read_cstring(path_ptr, vfs::MAX_PATH)?;
    let cwd = crate::task::with_table(|t| t.slots[t.current].cwd);
    vfs::normalize(cwd.as_str(), &path).ok()
}

/// Blocking console read: at least one byte, then whatever is queued.
/// Arrow keys and other non-ASCII events are dropped here; `input_poll`
/// sees them.
fn console_read(buf: &mut [u8]) -> i64 {
    let mut written = 0usize;
    loop {
        while written < buf.len() {
            match crate::drivers::keyboard::poll_event() {
                Some(ev) if ev.key != 0 && ev.key < 0x80 => {
                    buf[written] = ev.key;
                    written += 1;
                }
                Some(_) => {}
                None => break,
            }
        }
        if written > 0 {
            return written as i64;
        }
        crate::task::sched::sched_yield();
    }
}

fn console_write(data: &[u8]) -> i64 {
    crate::vga::put_bytes(data);
    for &b in data {
        crate::serial_print!("{}", b as char);
    }
    data.len() as i64
}

pub fn sys_read(fd: i32, buf: u64, count: usize) -> i64 {
    if count == 0 {
        return 0;
    }
    let Some(slice) = user_slice_mut(buf, count) else {
        return -1;
    };
    match get_fd(fd) {
        Some(FdEntry::Console) => console_read(slice),
        Some(FdEntry::File {
            node,
            offset,
            flags,
        }) => {
            if flags & 3 == abi::O_WRONLY {
                return -1;
            }
            match vfs::read_node(&node, offset, slice) {
                Ok(n) => {
                    set_fd(
                        fd,
                        FdEntry::File {
                            node,
                            offset: offset + n as u32,
                            flags,
                        },
                    );
                    n as i64
                }
                Err(_) => -1,
            }
        }
        Some(FdEntry::Pipe {
            id,
            write_end: false,
        }) => crate::pipe::read(id, slice),
        _ => -1,
    }
}

pub fn sys_write(fd: i32, buf: u64, count: usize) -> i64 {
    if count == 0 {
        return 0;
    }
    let Some(slice) = user_slice(buf, count) else {
        return -1;
    };
    match get_fd(fd) {
        Some(FdEntry::Console) => console_write(slice),
        Some(FdEntry::File {
            mut node,
            offset,
            flags,
        }) => {
            if flags & 3 == abi::O_RDONLY {
                return -1;
            }
            let pos = if flags & abi::O_APPEND != 0 {
                node.size
            } else {
                offset
            };
            match vfs::write_node(&mut node, pos, slice) {
                Ok(n) => {
                    set_fd(
                        fd,
                        FdEntry::File {
                            node,
                            offset: pos + n as u32,
                            flags,
                        },
                    );
                    n as i64
                }
                Err(_) => -1,
            }
        }
        Some(FdEntry::Pipe {
            id,
            write_end: true,
        }) => crate::pipe::write(id, slice),
        _ => -1,
    }
}

pub fn sys_open(path_ptr: u64, flags: u32) -> i64 {
    let Some(path) = abs_path(path_ptr) else {
        return -1;
    };

    let node = match vfs::resolve_path(&path) {
        Ok(node) => node,
        Err(VfsError::NotFound) if flags & abi::O_CREAT != 0 => match vfs::create(&path) {
            Ok(node) => node,
            Err(_) => return -1,
        },
        Err(_) => return -1,
    };

    let entry = match node.kind {
        NodeKind::Directory => {
            if flags & 3 != abi::O_RDONLY {
                return -1;
            }
            FdEntry::Directory { node }
        }
        NodeKind::File => {
            let mut node = node;
            if flags & abi::O_TRUNC != 0 && flags & 3 != abi::O_RDONLY {
                if vfs::truncate(&path, 0).is_err() {
                    return -1;
                }
                node.size = 0;
            }
            FdEntry::File {
                node,
                offset: 0,
                flags,
            }
        }
    };

    crate::task::with_table(|t| {
        let cur = t.current;
        match fd::alloc_slot(&t.slots[cur].fds) {
            Some(slot) => {
                t.slots[cur].fds[slot] = entry;
                slot as i64
            }
            None => -1,
        }
    })
}

pub fn sys_close(fd: i32) -> i64 {
    if fd < 0 || fd as usize >= fd::MAX_FDS {
        return -1;
    }
    crate::task::with_table(|t| {
        let cur = t.current;
        let entry = &mut t.slots[cur].fds[fd as usize];
        if matches!(entry, FdEntry::Unused) {
            return -1;
        }
        fd::release_entry(entry);
        0
    })
}

fn write_stat(ptr: u64, stat: &vfs::NodeStat) -> i64 {
    let Some(out) = user_slice_mut(ptr, core::mem::size_of::<UserStat>()) else {
        return -1;
    };
    let user = UserStat {
        st_size: stat.size,
        st_mode: stat.mode,
        st_ino: stat.ino,
    };
    let bytes = unsafe {
        core::slice::from_raw_parts(
            &user as *const _ as *const u8,
            core::mem::size_of::<UserStat>(),
        )
    };
    out.copy_from_slice(bytes);
    0
}

pub fn sys_stat(path_ptr: u64, stat_ptr: u64) -> i64 {
    let Some(path) = abs_path(path_ptr) else {
        return -1;
    };
    match vfs::stat(&path) {
        Ok(stat) => write_stat(stat_ptr, &stat),
        Err(_) => -1,
    }
}

pub fn sys_fstat(fd: i32, stat_ptr: u64) -> i64 {
    match get_fd(fd) {
        Some(FdEntry::File { node, .. }) | Some(FdEntry::Directory { node }) => {
            write_stat(stat_ptr, &vfs::stat_node(&node))
        }
        Some(FdEntry::Console) | Some(FdEntry::Pipe { .. }) => {
            let stat = vfs::NodeStat {
                size: 0,
                mode: 0,
                ino: 0,
            };
            write_stat(stat_ptr, &stat)
        }
        _ => -1,
    }
}

pub fn sys_mkdir(path_ptr: u64) -> i64 {
    let Some(path) = abs_path(path_ptr) else {
        return -1;
    };
    match vfs::mkdir(&path) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

pub fn sys_rmdir(path_ptr: u64) -> i64 {
    let Some(path) = abs_path(path_ptr) else {
        return -1;
    };
    match vfs::rmdir(&path) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

pub fn sys_unlink(path_ptr: u64) -> i64 {
    let Some(path) = abs_path(path_ptr) else {
        return -1;
    };
    match vfs::unlink(&path) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

pub fn sys_readdir(fd: i32, dirent_ptr: u64, index: u32) -> i64 {
    let Some(FdEntry::Directory { node }) = get_fd(fd) else {
        return -1;
    };
    let Some(out) = user_slice_mut(dirent_ptr, core::mem::size_of::<UserDirent>()) else {
        return -1;
    };
    match vfs::readdir(&node, index) {
        Ok(info) => {
            let mut dirent = UserDirent {
                name: [0; 256],
                entry_type: if info.kind == NodeKind::Directory { 1 } else { 0 },
            };
            let name = info.name.as_str().as_bytes();
            let n = name.len().min(255);
            dirent.name[..n].copy_from_slice(&name[..n]);
            let bytes = unsafe {
                core::slice::from_raw_parts(
                    &dirent as *const _ as *const u8,
                    core::mem::size_of::<UserDirent>(),
                )
            };
            out.copy_from_slice(bytes);
            0
        }
        Err(_) => -1,
    }
}

pub fn sys_chdir(path_ptr: u64) -> i64 {
    let Some(path) = abs_path(path_ptr) else {
        return -1;
    };
    match vfs::resolve_path(&path) {
        Ok(node) if node.kind == NodeKind::Directory => crate::task::with_table(|t| {
            let cur = t.current;
            if t.slots[cur].cwd.set(&path) {
                0
            } else {
                -1
            }
        }),
        _ => -1,
    }
}

pub fn sys_getcwd(buf: u64, size: usize) -> i64 {
    let cwd = crate::task::with_table(|t| t.slots[t.current].cwd);
    let bytes = cwd.as_str().as_bytes();
    if size < bytes.len() + 1 {
        return -1;
    }
    let Some(out) = user_slice_mut(buf, bytes.len() + 1) else {
        return -1;
    };
    out[..bytes.len()].copy_from_slice(bytes);
    out[bytes.len()] = 0;
    bytes.len() as i64
}

pub fn sys_rename(old_ptr: u64, new_ptr: u64) -> i64 {
    let (Some(old), Some(new)) = (abs_path(old_ptr), abs_path(new_ptr)) else {
        return -1;
    };
    match vfs::rename(&old, &new) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

pub fn sys_truncate(path_ptr: u64, size: u32) -> i64 {
    let Some(path) = abs_path(path_ptr) else {
        return -1;
    };
    match vfs::truncate(&path, size) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

pub fn sys_create(path_ptr: u64) -> i64 {
    let Some(path) = abs_path(path_ptr) else {
        return -1;
    };
    match vfs::create(&path) {
        Ok(_) => 0,
        Err(_) => -1,
    }
}

pub fn sys_seek(fd: i32, off: i64, whence: u32) -> i64 {
    let Some(FdEntry::File {
        node,
        offset,
        flags,
    }) = get_fd(fd)
    else {
        return -1;
    };
    let base = match whence {
        abi::SEEK_SET => 0i64,
        abi::SEEK_CUR => offset as i64,
        abi::SEEK_END => node.size as i64,
        _ => return -1,
    };
    let new = base + off;
    if new < 0 || new > u32::MAX as i64 {
        return -1;
    }
    set_fd(
        fd,
        FdEntry::File {
            node,
            offset: new as u32,
            flags,
        },
    );
    new
}

pub fn sys_pipe(fds_ptr: u64) -> i64 {
    if !user_ok(fds_ptr, 8, true) {
        return -1;
    }
    let Some(id) = crate::pipe::create() else {
        return -1;
    };

    let slots = crate::task::with_table(|t| {
        let cur = t.current;
        let read_slot = fd::alloc_slot(&t.slots[cur].fds)?;
        t.slots[cur].fds[read_slot] = FdEntry::Pipe {
            id,
            write_end: false,
        };
        match fd::alloc_slot(&t.slots[cur].fds) {
            Some(write_slot) => {
                t.slots[cur].fds[write_slot] = FdEntry::Pipe {
                    id,
                    write_end: true,
                };
                Some((read_slot, write_slot))
            }
            None => {
                t.slots[cur].fds[read_slot] = FdEntry::Unused;
                None
            }
        }
    });

    match slots {
        Some((read_slot, write_slot)) => {
            unsafe {
                let out = fds_ptr as *mut i32;
                *out = read_slot as i32;
                *out.add(1) = write_slot as i32;
            }
            0
        }
        None => {
            crate::pipe::close_end(id, false);
            crate::pipe::close_end(id, true);
            -1
        }
    }
}

pub fn sys_dup2(old_fd: i32, new_fd: i32) -> i64 {
    if old_fd < 0
        || new_fd < 0
        || old_fd as usize >= fd::MAX_FDS
        || new_fd as usize >= fd::MAX_FDS
    {
        return -1;
    }
    if old_fd == new_fd {
        return new_fd as i64;
    }
    crate::task::with_table(|t| {
        let cur = t.current;
        let entry = t.slots[cur].fds[old_fd as usize];
        if matches!(entry, FdEntry::Unused) {
            return -1;
        }
        fd::release_entry(&mut t.slots[cur].fds[new_fd as usize]);
        if let FdEntry::Pipe { id, write_end } = entry {
            crate::pipe::add_ref(id, write_end);
        }
        t.slots[cur].fds[new_fd as usize] = entry;
        new_fd as i64
    })
}
