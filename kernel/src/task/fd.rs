//! Per-task file descriptor tables
//!
//! A bounded array of tagged entries; fds 0/1/2 default to the console.
//! Entries are plain values: a File carries its node handle, offset and
//! open flags, a Pipe carries the pool index and its end. Fork deep-copies
//! the table (the underlying pipe or on-disk file is shared).

use crate::vfs::VfsNode;

/// Descriptors per task
pub const MAX_FDS: usize = 16;

/// One descriptor slot
#[derive(Clone, Copy)]
pub enum FdEntry {
    Unused,
    /// Keyboard input / VGA+serial output
    Console,
    File {
        node: VfsNode,
        offset: u32,
        flags: u32,
    },
    Directory {
        node: VfsNode,
    },
    Pipe {
        id: usize,
        write_end: bool,
    },
}

pub type FdTable = [FdEntry; MAX_FDS];

/// Fresh table: stdin/stdout/stderr on the console
pub const fn default_table() -> FdTable {
    let mut table = [FdEntry::Unused; MAX_FDS];
    table[0] = FdEntry::Console;
    table[1] = FdEntry::Console;
    table[2] = FdEntry::Console;
    table
}

/// Lowest unused descriptor
pub fn alloc_slot(table: &FdTable) -> Option<usize> {
    table
        .iter()
        .position(|e| matches!(e, FdEntry::Unused))
}

/// Drop every entry, releasing pipe ends. Called on exit and when an entry
/// is replaced by dup2/close.
pub fn release_all(table: &mut FdTable) {
    for entry in table.iter_mut() {
        release_entry(entry);
    }
}

/// Release one entry and mark it Unused
pub fn release_entry(entry: &mut FdEntry) {
    if let FdEntry::Pipe { id, write_end } = *entry {
        crate::pipe::close_end(id, write_end);
    }
    *entry = FdEntry::Unused;
}

/// Bump shared-resource refcounts for a table copied across fork
pub fn retain_all(table: &FdTable) {
    for entry in table.iter() {
        if let FdEntry::Pipe { id, write_end } = *entry {
            crate::pipe::add_ref(id, write_end);
        }
    }
}
