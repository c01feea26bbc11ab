//! FAT32 filesystem driver
//!
//! Read/write FAT32 over the ATA PIO contract: BPB parse at mount, FAT
//! chain walking and allocation, 8.3 directory entries, and the node
//! operations the VFS dispatches (read, write, readdir, finddir, create,
//! mkdir, unlink, rmdir, rename, truncate).
//!
//! Layout reminders:
//! - Boot sector (BPB) at the partition LBA
//! - `reserved_sectors` later: the FATs (`num_fats` copies)
//! - Data region in clusters; cluster N sits at
//!   `data_start + (N - 2) * sectors_per_cluster`

use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use super::{DirEntryInfo, NameBuf, NodeKind, VfsError, VfsNode, VfsResult};
use crate::drivers::ata;

const SECTOR_SIZE: usize = 512;
const DIR_ENTRY_SIZE: usize = 32;

/// End-of-chain marker written when allocating
const FAT_EOC: u32 = 0x0FFF_FFFF;
/// FAT entries are 28-bit
const FAT_MASK: u32 = 0x0FFF_FFFF;

const ATTR_READ_ONLY: u8 = 0x01;
const ATTR_HIDDEN: u8 = 0x02;
const ATTR_SYSTEM: u8 = 0x04;
const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_ARCHIVE: u8 = 0x20;
const ATTR_LFN: u8 = 0x0F;

/// Boot sector / BPB
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct BootSector {
    jmp_boot: [u8; 3],
    oem_name: [u8; 8],
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    num_fats: u8,
    root_entry_count: u16,
    total_sectors_16: u16,
    media_type: u8,
    fat_size_16: u16,
    sectors_per_track: u16,
    num_heads: u16,
    hidden_sectors: u32,
    total_sectors_32: u32,
    fat_size_32: u32,
    ext_flags: u16,
    fs_version: u16,
    root_cluster: u32,
    fs_info: u16,
    backup_boot: u16,
    reserved: [u8; 12],
    drive_number: u8,
    reserved1: u8,
    boot_sig: u8,
    volume_id: u32,
    volume_label: [u8; 11],
    fs_type: [u8; 8],
}

/// On-disk directory entry (8.3). Every field sits on its natural
/// alignment, so plain repr(C) reproduces the on-disk layout (32 bytes).
#[repr(C)]
#[derive(Clone, Copy)]
struct RawDirEntry {
    name: [u8; 11],
    attr: u8,
    nt_reserved: u8,
    create_time_tenth: u8,
    create_time: u16,
    create_date: u16,
    access_date: u16,
    cluster_hi: u16,
    modify_time: u16,
    modify_date: u16,
    cluster_lo: u16,
    file_size: u32,
}

impl RawDirEntry {
    fn first_cluster(&self) -> u32 {
        (self.cluster_hi as u32) << 16 | self.cluster_lo as u32
    }

    fn set_first_cluster(&mut self, cluster: u32) {
        self.cluster_hi = (cluster >> 16) as u16;
        self.cluster_lo = cluster as u16;
    }

    fn is_end(&self) -> bool {
        self.name[0] == 0x00
    }

    fn is_deleted(&self) -> bool {
        self.name[0] == 0xE5
    }

    fn is_visible(&self) -> bool {
        !self.is_end()
            && !self.is_deleted()
            && self.attr & ATTR_LFN != ATTR_LFN
            && self.attr & ATTR_VOLUME_ID == 0
    }

    fn is_directory(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }
}

/// Mounted filesystem geometry
#[derive(Clone, Copy)]
struct Fat32Fs {
    fat_start_lba: u32,
    data_start_lba: u32,
    sectors_per_cluster: u32,
    bytes_per_cluster: u32,
    root_cluster: u32,
    fat_sectors: u32,
    num_fats: u32,
    total_clusters: u32,
}

static FS: Mutex<Option<Fat32Fs>> = Mutex::new(None);

fn geometry() -> VfsResult<Fat32Fs> {
    FS.lock().as_ref().copied().ok_or(VfsError::IoError)
}

/// Mount a FAT32 volume from the given LBA
pub fn mount(partition_lba: u32) -> VfsResult<()> {
    let mut sector = [0u8; SECTOR_SIZE];
    ata::read_sectors(partition_lba, 1, &mut sector).map_err(|_| VfsError::IoError)?;

    let bpb = unsafe { &*(sector.as_ptr() as *const BootSector) };
    let bytes_per_sector =
        unsafe { core::ptr::read_unaligned(core::ptr::addr_of!(bpb.bytes_per_sector)) };
    let reserved = unsafe { core::ptr::read_unaligned(core::ptr::addr_of!(bpb.reserved_sectors)) };
    let fat_size = unsafe { core::ptr::read_unaligned(core::ptr::addr_of!(bpb.fat_size_32)) };
    let root_cluster = unsafe { core::ptr::read_unaligned(core::ptr::addr_of!(bpb.root_cluster)) };
    let total_sectors =
        unsafe { core::ptr::read_unaligned(core::ptr::addr_of!(bpb.total_sectors_32)) };
    let sectors_per_cluster = bpb.sectors_per_cluster as u32;
    let num_fats = bpb.num_fats as u32;

    if bytes_per_sector as usize != SECTOR_SIZE
        || sectors_per_cluster == 0
        || !sectors_per_cluster.is_power_of_two()
        || reserved == 0
        || num_fats == 0
        || fat_size == 0
        || root_cluster < 2
    {
        crate::log_error!("[FAT32] invalid BPB at LBA {}", partition_lba);
        return Err(VfsError::Invalid);
    }

    let fat_start = partition_lba + reserved as u32;
    let data_start = fat_start + num_fats * fat_size;
    let data_sectors = total_sectors.saturating_sub(data_start - partition_lba);
    let total_clusters = data_sectors / sectors_per_cluster;

    *FS.lock() = Some(Fat32Fs {
        fat_start_lba: fat_start,
        data_start_lba: data_start,
        sectors_per_cluster,
        bytes_per_cluster: sectors_per_cluster * SECTOR_SIZE as u32,
        root_cluster,
        fat_sectors: fat_size,
        num_fats,
        total_clusters,
    });

    crate::log!(
        "[FAT32] mounted: {} clusters of {} bytes, root at cluster {}",
        total_clusters,
        sectors_per_cluster * SECTOR_SIZE as u32,
        root_cluster
    );
    Ok(())
}

/// Root directory node
pub fn root_node() -> VfsResult<VfsNode> {
    let fs = geometry()?;
    Ok(VfsNode {
        name: NameBuf::from_str("/").unwrap_or(NameBuf::empty()),
        kind: NodeKind::Directory,
        size: 0,
        first_cluster: fs.root_cluster,
        parent_cluster: 0,
    })
}

fn cluster_to_lba(fs: &Fat32Fs, cluster: u32) -> u32 {
    fs.data_start_lba + (cluster - 2) * fs.sectors_per_cluster
}

fn read_cluster(fs: &Fat32Fs, cluster: u32) -> VfsResult<Vec<u8>> {
    if cluster < 2 || cluster - 2 >= fs.total_clusters {
        return Err(VfsError::Invalid);
    }
    let mut buf = vec![0u8; fs.bytes_per_cluster as usize];
    ata::read_sectors(
        cluster_to_lba(fs, cluster),
        fs.sectors_per_cluster as u8,
        &mut buf,
    )
    .map_err(|_| VfsError::IoError)?;
    Ok(buf)
}

fn write_cluster(fs: &Fat32Fs, cluster: u32, buf: &[u8]) -> VfsResult<()> {
    if cluster < 2 || cluster - 2 >= fs.total_clusters {
        return Err(VfsError::Invalid);
    }
    ata::write_sectors(
        cluster_to_lba(fs, cluster),
        fs.sectors_per_cluster as u8,
        buf,
    )
    .map_err(|_| VfsError::IoError)
}

// ---------------------------------------------------------------------------
// FAT access
// ---------------------------------------------------------------------------

fn fat_read(fs: &Fat32Fs, cluster: u32) -> VfsResult<u32> {
    let offset = cluster as usize * 4;
    let sector = fs.fat_start_lba + (offset / SECTOR_SIZE) as u32;
    let within = offset % SECTOR_SIZE;
    let mut buf = [0u8; SECTOR_SIZE];
    ata::read_sectors(sector, 1, &mut buf).map_err(|_| VfsError::IoError)?;
    let raw = u32::from_le_bytes([buf[within], buf[within + 1], buf[within + 2], buf[within + 3]]);
    Ok(raw & FAT_MASK)
}

/// Write a FAT entry into every FAT copy, preserving the reserved top bits
fn fat_write(fs: &Fat32Fs, cluster: u32, value: u32) -> VfsResult<()> {
    let offset = cluster as usize * 4;
    let within = offset % SECTOR_SIZE;
    for copy in 0..fs.num_fats {
        let sector = fs.fat_start_lba + copy * fs.fat_sectors + (offset / SECTOR_SIZE) as u32;
        let mut buf = [0u8; SECTOR_SIZE];
        ata::read_sectors(sector, 1, &mut buf).map_err(|_| VfsError::IoError)?;
        let old = u32::from_le_bytes([
            buf[within],
            buf[within + 1],
            buf[within + 2],
            buf[within + 3],
        ]);
        let merged = (old & !FAT_MASK) | (value & FAT_MASK);
        buf[within..within + 4].copy_from_slice(&merged.to_le_bytes());
        ata::write_sectors(sector, 1, &buf).map_err(|_| VfsError::IoError)?;
    }
    Ok(())
}

fn is_eoc(value: u32) -> bool {
    value >= 0x0FFF_FFF8
}

fn next_cluster(fs: &Fat32Fs, cluster: u32) -> VfsResult<Option<u32>> {
    let value = fat_read(fs, cluster)?;
    if is_eoc(value) || value < 2 {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}

/// Allocate one free cluster, mark it end-of-chain, zero its data
fn alloc_cluster(fs: &Fat32Fs) -> VfsResult<u32> {
    for cluster in 2..2 + fs.total_clusters {
        if fat_read(fs, cluster)? == 0 {
            fat_write(fs, cluster, FAT_EOC)?;
            let zeros = vec![0u8; fs.bytes_per_cluster as usize];
            write_cluster(fs, cluster, &zeros)?;
            return Ok(cluster);
        }
    }
    Err(VfsError::NoSpace)
}

/// Free a whole chain starting at `first`
fn free_chain(fs: &Fat32Fs, first: u32) -> VfsResult<()> {
    let mut cluster = first;
    while cluster >= 2 && cluster - 2 < fs.total_clusters {
        let next = fat_read(fs, cluster)?;
        fat_write(fs, cluster, 0)?;
        if is_eoc(next) || next < 2 {
            break;
        }
        cluster = next;
    }
    Ok(())
}

/// Walk `index` links down a chain
fn chain_at(fs: &Fat32Fs, first: u32, index: u32) -> VfsResult<Option<u32>> {
    if first < 2 {
        return Ok(None);
    }
    let mut cluster = first;
    for _ in 0..index {
        match next_cluster(fs, cluster)? {
            Some(next) => cluster = next,
            None => return Ok(None),
        }
    }
    Ok(Some(cluster))
}

/// Last cluster of a chain
fn chain_tail(fs: &Fat32Fs, first: u32) -> VfsResult<u32> {
    let mut cluster = first;
    while let Some(next) = next_cluster(fs, cluster)? {
        cluster = next;
    }
    Ok(cluster)
}

/// Append one fresh cluster to the chain ending at `tail`
fn chain_append(fs: &Fat32Fs, tail: u32) -> VfsResult<u32> {
    let fresh = alloc_cluster(fs)?;
    fat_write(fs, tail, fresh)?;
    Ok(fresh)
}

// ---------------------------------------------------------------------------
// 8.3 names
// ---------------------------------------------------------------------------

fn valid_83_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'_' | b'-' | b'~' | b'!' | b'#' | b'$' | b'%' | b'&')
}

/// Encode a component into the padded 8.3 on-disk form
fn encode_83(name: &str) -> Option<[u8; 11]> {
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    let (stem, ext) = match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(pos) => (&name[..pos], &name[pos + 1..]),
    };
    if stem.is_empty() || stem.len() > 8 || ext.len() > 3 {
        return None;
    }
    let mut out = [b' '; 11];
    for (i, &c) in stem.as_bytes().iter().enumerate() {
        if !valid_83_char(c) {
            return None;
        }
        out[i] = c.to_ascii_uppercase();
    }
    for (i, &c) in ext.as_bytes().iter().enumerate() {
        if !valid_83_char(c) {
            return None;
        }
        out[8 + i] = c.to_ascii_uppercase();
    }
    Some(out)
}

/// Decode the padded 8.3 form into a lower-case display name
fn decode_83(raw: &[u8; 11]) -> NameBuf {
    let mut tmp = [0u8; 12];
    let mut len = 0usize;
    for &c in raw[..8].iter() {
        if c == b' ' {
            break;
        }
        tmp[len] = c.to_ascii_lowercase();
        len += 1;
    }
    let mut ext_len = 0usize;
    for &c in raw[8..].iter() {
        if c == b' ' {
            break;
        }
        ext_len += 1;
        tmp[len + ext_len] = c.to_ascii_lowercase();
    }
    if ext_len > 0 {
        tmp[len] = b'.';
        len += ext_len + 1;
    }
    // Entries for . and .. decode through the stem path
    if len == 0 {
        tmp[0] = b'?';
        len = 1;
    }
    NameBuf::from_str(core::str::from_utf8(&tmp[..len]).unwrap_or("?")).unwrap_or(NameBuf::empty())
}

// ---------------------------------------------------------------------------
// Directory scanning
// ---------------------------------------------------------------------------

/// Location of a directory entry on disk
#[derive(Clone, Copy)]
struct DirSlot {
    cluster: u32,
    offset: usize,
}

/// Walk a directory's entries. The callback returns true to stop early.
fn scan_dir(
    fs: &Fat32Fs,
    dir_cluster: u32,
    mut visit: impl FnMut(&RawDirEntry, DirSlot) -> bool,
) -> VfsResult<()> {
    let mut cluster = dir_cluster;
    loop {
        let buf = read_cluster(fs, cluster)?;
        for offset in (0..buf.len()).step_by(DIR_ENTRY_SIZE) {
            // The cluster buffer has byte alignment; copy the entry out
            let entry: RawDirEntry =
                unsafe { core::ptr::read_unaligned(buf[offset..].as_ptr() as *const RawDirEntry) };
            if entry.is_end() {
                return Ok(());
            }
            if visit(&entry, DirSlot { cluster, offset }) {
                return Ok(());
            }
        }
        match next_cluster(fs, cluster)? {
            Some(next) => cluster = next,
            None => return Ok(()),
        }
    }
}

fn find_entry(fs: &Fat32Fs, dir_cluster: u32, name: &str) -> VfsResult<(RawDirEntry, DirSlot)> {
    let target = encode_83(name).ok_or(VfsError::Invalid)?;
    let mut found: Option<(RawDirEntry, DirSlot)> = None;
    scan_dir(fs, dir_cluster, |entry, slot| {
        if entry.is_visible() && entry.name == target {
            found = Some((*entry, slot));
            true
        } else {
            false
        }
    })?;
    found.ok_or(VfsError::NotFound)
}

/// Find a reusable slot (deleted or end marker), extending the directory
/// chain with a zeroed cluster when it is full.
fn find_free_slot(fs: &Fat32Fs, dir_cluster: u32) -> VfsResult<DirSlot> {
    let mut free: Option<DirSlot> = None;
    scan_dir(fs, dir_cluster, |entry, slot| {
        if entry.is_deleted() {
            free = Some(slot);
            true
        } else {
            false
        }
    })?;
    if let Some(slot) = free {
        return Ok(slot);
    }

    // scan_dir stops silently at the end marker; find it by hand
    let mut cluster = dir_cluster;
    loop {
        let buf = read_cluster(fs, cluster)?;
        for offset in (0..buf.len()).step_by(DIR_ENTRY_SIZE) {
            if buf[offset] == 0x00 {
                return Ok(DirSlot { cluster, offset });
            }
        }
        match next_cluster(fs, cluster)? {
            Some(next) => cluster = next,
            None => {
                let fresh = chain_append(fs, cluster)?;
                return Ok(DirSlot {
                    cluster: fresh,
                    offset: 0,
                });
            }
        }
    }
}

fn write_slot(fs: &Fat32Fs, slot: DirSlot, entry: &RawDirEntry) -> VfsResult<()> {
    let mut buf = read_cluster(fs, slot.cluster)?;
    let bytes =
        unsafe { core::slice::from_raw_parts(entry as *const _ as *const u8, DIR_ENTRY_SIZE) };
    buf[slot.offset..slot.offset + DIR_ENTRY_SIZE].copy_from_slice(bytes);
    write_cluster(fs, slot.cluster, &buf)
}

fn node_from_entry(entry: &RawDirEntry, parent_cluster: u32) -> VfsNode {
    VfsNode {
        name: decode_83(&entry.name),
        kind: if entry.is_directory() {
            NodeKind::Directory
        } else {
            NodeKind::File
        },
        size: entry.file_size,
        first_cluster: entry.first_cluster(),
        parent_cluster,
    }
}

/// Re-locate a node's directory entry and patch size/first-cluster after a
/// write or truncate.
fn update_entry(fs: &Fat32Fs, node: &VfsNode) -> VfsResult<()> {
    let (mut entry, slot) = find_entry(fs, node.parent_cluster, node.name.as_str())?;
    entry.file_size = node.size;
    entry.set_first_cluster(node.first_cluster);
    write_slot(fs, slot, &entry)
}

// ---------------------------------------------------------------------------
// Node operations
// ---------------------------------------------------------------------------

/// Look up `name` inside a directory
pub fn finddir(dir: &VfsNode, name: &str) -> VfsResult<VfsNode> {
    if dir.kind != NodeKind::Directory {
        return Err(VfsError::NotDirectory);
    }
    let fs = geometry()?;
    let (entry, _) = find_entry(&fs, dir.first_cluster, name)?;
    Ok(node_from_entry(&entry, dir.first_cluster))
}

/// List the `index`-th visible entry
pub fn readdir(dir: &VfsNode, index: u32) -> VfsResult<DirEntryInfo> {
    let fs = geometry()?;
    let mut remaining = index;
    let mut found: Option<DirEntryInfo> = None;
    scan_dir(&fs, dir.first_cluster, |entry, _| {
        if !entry.is_visible() {
            return false;
        }
        if remaining == 0 {
            found = Some(DirEntryInfo {
                name: decode_83(&entry.name),
                kind: if entry.is_directory() {
                    NodeKind::Directory
                } else {
                    NodeKind::File
                },
            });
            true
        } else {
            remaining -= 1;
            false
        }
    })?;
    found.ok_or(VfsError::NotFound)
}

/// Read up to `buf.len()` bytes at `offset`; short reads at end of file
pub fn read(node: &VfsNode, offset: u32, buf: &mut [u8]) -> VfsResult<usize> {
    let fs = geometry()?;
    if offset >= node.size {
        return Ok(0);
    }
    let want = (buf.len() as u32).min(node.size - offset) as usize;
    let bpc = fs.bytes_per_cluster;

    let mut done = 0usize;
    while done < want {
        let pos = offset + done as u32;
        let Some(cluster) = chain_at(&fs, node.first_cluster, pos / bpc)? else {
            break;
        };
        let within = (pos % bpc) as usize;
        let chunk = (bpc as usize - within).min(want - done);
        let data = read_cluster(&fs, cluster)?;
        buf[done..done + chunk].copy_from_slice(&data[within..within + chunk]);
        done += chunk;
    }
    Ok(done)
}

/// Write at `offset`, allocating clusters (zero-filled) as needed; a write
/// past the current end extends the file. Updates the directory entry and
/// the node handle.
pub fn write(node: &mut VfsNode, offset: u32, data: &[u8]) -> VfsResult<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    let fs = geometry()?;
    let bpc = fs.bytes_per_cluster;
    let end = offset
        .checked_add(data.len() as u32)
        .ok_or(VfsError::Invalid)?;

    // Make sure the chain covers [0, end)
    let needed = (end + bpc - 1) / bpc;
    if node.first_cluster < 2 && needed > 0 {
        node.first_cluster = alloc_cluster(&fs)?;
    }
    let mut have = 1u32;
    let mut tail = chain_tail(&fs, node.first_cluster)?;
    {
        let mut cluster = node.first_cluster;
        while let Some(next) = next_cluster(&fs, cluster)? {
            cluster = next;
            have += 1;
        }
    }
    while have < needed {
        tail = chain_append(&fs, tail)?;
        have += 1;
    }

    let mut done = 0usize;
    while done < data.len() {
        let pos = offset + done as u32;
        let cluster = chain_at(&fs, node.first_cluster, pos / bpc)?.ok_or(VfsError::IoError)?;
        let within = (pos % bpc) as usize;
        let chunk = (bpc as usize - within).min(data.len() - done);
        let mut cbuf = read_cluster(&fs, cluster)?;
        cbuf[within..within + chunk].copy_from_slice(&data[done..done + chunk]);
        write_cluster(&fs, cluster, &cbuf)?;
        done += chunk;
    }

    if end > node.size {
        node.size = end;
    }
    update_entry(&fs, node)?;
    Ok(done)
}

/// Create an empty regular file in `dir`
pub fn create_file(dir: &VfsNode, name: &str) -> VfsResult<VfsNode> {
    if dir.kind != NodeKind::Directory {
        return Err(VfsError::NotDirectory);
    }
    let fs = geometry()?;
    if find_entry(&fs, dir.first_cluster, name).is_ok() {
        return Err(VfsError::Exists);
    }
    let raw_name = encode_83(name).ok_or(VfsError::Invalid)?;
    let slot = find_free_slot(&fs, dir.first_cluster)?;

    let mut entry: RawDirEntry = unsafe { core::mem::zeroed() };
    entry.name = raw_name;
    entry.attr = ATTR_ARCHIVE;
    write_slot(&fs, slot, &entry)?;

    Ok(node_from_entry(&entry, dir.first_cluster))
}

/// Create a subdirectory with its `.` and `..` entries
pub fn mkdir(dir: &VfsNode, name: &str) -> VfsResult<VfsNode> {
    if dir.kind != NodeKind::Directory {
        return Err(VfsError::NotDirectory);
    }
    let fs = geometry()?;
    if find_entry(&fs, dir.first_cluster, name).is_ok() {
        return Err(VfsError::Exists);
    }
    let raw_name = encode_83(name).ok_or(VfsError::Invalid)?;
    let cluster = alloc_cluster(&fs)?;

    // Seed the new directory with . and ..
    let mut buf = vec![0u8; fs.bytes_per_cluster as usize];
    let mut dot: RawDirEntry = unsafe { core::mem::zeroed() };
    dot.name = *b".          ";
    dot.attr = ATTR_DIRECTORY;
    dot.set_first_cluster(cluster);
    let mut dotdot: RawDirEntry = unsafe { core::mem::zeroed() };
    dotdot.name = *b"..         ";
    dotdot.attr = ATTR_DIRECTORY;
    // Root is recorded as cluster 0 in .. per the FAT spec
    dotdot.set_first_cluster(if dir.first_cluster == fs.root_cluster {
        0
    } else {
        dir.first_cluster
    });
    unsafe {
        core::ptr::copy_nonoverlapping(
            &dot as *const _ as *const u8,
            buf.as_mut_ptr(),
            DIR_ENTRY_SIZE,
        );
        core::ptr::copy_nonoverlapping(
            &dotdot as *const _ as *const u8,
            buf[DIR_ENTRY_SIZE..].as_mut_ptr(),
            DIR_ENTRY_SIZE,
        );
    }
    write_cluster(&fs, cluster, &buf)?;

    let slot = find_free_slot(&fs, dir.first_cluster)?;
    let mut entry: RawDirEntry = unsafe { core::mem::zeroed() };
    entry.name = raw_name;
    entry.attr = ATTR_DIRECTORY;
    entry.set_first_cluster(cluster);
    write_slot(&fs, slot, &entry)?;

    Ok(node_from_entry(&entry, dir.first_cluster))
}

/// Remove a regular file. The directory slot is invalidated and flushed
/// first; only then is the cluster chain returned to the FAT, so a crash
/// between the two writes can only leak clusters, never cross-link them.
pub fn unlink(dir: &VfsNode, name: &str) -> VfsResult<()> {
    let fs = geometry()?;
    let (entry, slot) = find_entry(&fs, dir.first_cluster, name)?;
    if entry.is_directory() {
        return Err(VfsError::IsDirectory);
    }

    let mut dead = entry;
    dead.name[0] = 0xE5;
    write_slot(&fs, slot, &dead)?;

    let first = entry.first_cluster();
    if first >= 2 && first != fs.root_cluster {
        free_chain(&fs, first)?;
    }
    Ok(())
}

/// Remove an empty directory
pub fn rmdir(dir: &VfsNode, name: &str) -> VfsResult<()> {
    let fs = geometry()?;
    let (entry, slot) = find_entry(&fs, dir.first_cluster, name)?;
    if !entry.is_directory() {
        return Err(VfsError::NotDirectory);
    }

    let mut populated = false;
    scan_dir(&fs, entry.first_cluster(), |e, _| {
        if e.is_visible() && e.name[0] != b'.' {
            populated = true;
            true
        } else {
            false
        }
    })?;
    if populated {
        return Err(VfsError::NotEmpty);
    }

    let mut dead = entry;
    dead.name[0] = 0xE5;
    write_slot(&fs, slot, &dead)?;

    let first = entry.first_cluster();
    if first >= 2 && first != fs.root_cluster {
        free_chain(&fs, first)?;
    }
    Ok(())
}

/// Move/rename: a new entry pointing at the same chain is written before
/// the old one is invalidated.
pub fn rename(
    old_dir: &VfsNode,
    old_name: &str,
    new_dir: &VfsNode,
    new_name: &str,
) -> VfsResult<()> {
    let fs = geometry()?;
    let raw_old = encode_83(old_name).ok_or(VfsError::Invalid)?;
    let raw_new = encode_83(new_name).ok_or(VfsError::Invalid)?;
    if raw_old == raw_new && old_dir.first_cluster == new_dir.first_cluster {
        return find_entry(&fs, old_dir.first_cluster, old_name).map(|_| ());
    }

    let (entry, old_slot) = find_entry(&fs, old_dir.first_cluster, old_name)?;
    if find_entry(&fs, new_dir.first_cluster, new_name).is_ok() {
        return Err(VfsError::Exists);
    }

    let slot = find_free_slot(&fs, new_dir.first_cluster)?;
    let mut moved = entry;
    moved.name = raw_new;
    write_slot(&fs, slot, &moved)?;

    let mut dead = entry;
    dead.name[0] = 0xE5;
    write_slot(&fs, old_slot, &dead)?;
    Ok(())
}

/// Shrink or zero-extend a file to `size`
pub fn truncate(node: &mut VfsNode, size: u32) -> VfsResult<()> {
    let fs = geometry()?;
    let bpc = fs.bytes_per_cluster;

    if size < node.size {
        let keep = (size + bpc - 1) / bpc;
        if keep == 0 {
            if node.first_cluster >= 2 {
                free_chain(&fs, node.first_cluster)?;
            }
            node.first_cluster = 0;
        } else if let Some(last) = chain_at(&fs, node.first_cluster, keep - 1)? {
            if let Some(extra) = next_cluster(&fs, last)? {
                fat_write(&fs, last, FAT_EOC)?;
                free_chain(&fs, extra)?;
            }
        }
        node.size = size;
        update_entry(&fs, node)?;
    } else if size > node.size {
        // Zero-extend: fresh clusters come back zeroed from alloc_cluster
        let needed = (size + bpc - 1) / bpc;
        if node.first_cluster < 2 {
            node.first_cluster = alloc_cluster(&fs)?;
        }
        let mut have = 1u32;
        let mut cluster = node.first_cluster;
        while let Some(next) = next_cluster(&fs, cluster)? {
            cluster = next;
            have += 1;
        }
        let mut tail = chain_tail(&fs, node.first_cluster)?;
        while have < needed {
            tail = chain_append(&fs, tail)?;
            have += 1;
        }
        node.size = size;
        update_entry(&fs, node)?;
    }
    Ok(())
}

/// Run name-conversion self-tests. Returns (passed, failed).
pub fn self_test() -> (usize, usize) {
    let mut passed = 0usize;
    let mut failed = 0usize;

    let cases: [(&str, Option<&[u8; 11]>); 5] = [
        ("init", Some(b"INIT       ")),
        ("kernel.elf", Some(b"KERNEL  ELF")),
        ("a.b", Some(b"A       B  ")),
        ("toolongname.txt", None),
        ("bad name", None),
    ];
    for (input, expected) in cases {
        let got = encode_83(input);
        let ok = match (got, expected) {
            (Some(g), Some(e)) => &g == e,
            (None, None) => true,
            _ => false,
        };
        if ok {
            crate::serial_println!("[FAT-TEST] encode '{}': PASS", input);
            passed += 1;
        } else {
            crate::serial_println!("[FAT-TEST] encode '{}': FAIL", input);
            failed += 1;
        }
    }

    let round = decode_83(b"KERNEL  ELF");
    if round.as_str() == "kernel.elf" {
        crate::serial_println!("[FAT-TEST] decode round-trip: PASS");
        passed += 1;
    } else {
        crate::serial_println!("[FAT-TEST] decode got '{}': FAIL", round.as_str());
        failed += 1;
    }

    (passed, failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_simple_names() {
        assert_eq!(encode_83("init").unwrap(), *b"INIT       ");
        assert_eq!(encode_83("kernel.elf").unwrap(), *b"KERNEL  ELF");
        assert_eq!(encode_83("A.B").unwrap(), *b"A       B  ");
    }

    #[test]
    fn encode_rejects_invalid() {
        assert!(encode_83("").is_none());
        assert!(encode_83(".").is_none());
        assert!(encode_83("..").is_none());
        assert!(encode_83("toolongname").is_none());
        assert!(encode_83("x.long").is_none());
        assert!(encode_83("sp ace").is_none());
    }

    #[test]
    fn decode_round_trip() {
        assert_eq!(decode_83(b"INIT       ").as_str(), "init");
        assert_eq!(decode_83(b"KERNEL  ELF").as_str(), "kernel.elf");
    }
}
