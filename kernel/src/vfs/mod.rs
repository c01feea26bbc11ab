//! Virtual File System
//!
//! Path resolution and a thin node model over the FAT32 backend. A node is
//! a plain value handle (name, kind, size, cluster location); capability
//! dispatch happens at the descriptor layer, where an entry is Console,
//! File, Directory or Pipe. Paths are POSIX-style with `/` separators,
//! 128-char components, 256-char absolute limit.

pub mod fat32;

use alloc::string::String;
use alloc::vec::Vec;

/// Absolute path limit
pub const MAX_PATH: usize = 256;
/// Single component limit
pub const MAX_NAME: usize = 128;

/// Fixed-size component/name buffer (keeps node handles heap-free)
#[derive(Clone, Copy)]
pub struct NameBuf {
    bytes: [u8; MAX_NAME],
    len: u8,
}

impl NameBuf {
    pub const fn empty() -> Self {
        Self {
            bytes: [0; MAX_NAME],
            len: 0,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let src = s.as_bytes();
        if src.is_empty() || src.len() > MAX_NAME {
            return None;
        }
        let mut buf = Self::empty();
        buf.bytes[..src.len()].copy_from_slice(src);
        buf.len = src.len() as u8;
        Some(buf)
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

/// What a node is; the FD layer adds Console and Pipe on top
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// Filesystem node handle. A snapshot of the on-disk state: `size` is
/// refreshed by the operations that change it and re-read on `stat`.
#[derive(Clone, Copy)]
pub struct VfsNode {
    pub name: NameBuf,
    pub kind: NodeKind,
    pub size: u32,
    /// First data cluster (0 for an empty file)
    pub first_cluster: u32,
    /// Cluster of the directory holding this node's entry (0 for the root)
    pub parent_cluster: u32,
}

/// Directory listing entry
#[derive(Clone, Copy)]
pub struct DirEntryInfo {
    pub name: NameBuf,
    pub kind: NodeKind,
}

/// Node metadata for stat/fstat
#[derive(Clone, Copy, Debug)]
pub struct NodeStat {
    pub size: u32,
    pub mode: u32,
    pub ino: u32,
}

/// Error taxonomy the core distinguishes; collapsed to -1 at the syscall
/// boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VfsError {
    NotFound,
    NotDirectory,
    IsDirectory,
    Exists,
    NotEmpty,
    Invalid,
    NoSpace,
    IoError,
}

pub type VfsResult<T> = Result<T, VfsError>;

/// Root directory node
pub fn root() -> VfsResult<VfsNode> {
    fat32::root_node()
}

/// Join `path` onto `cwd` (when relative) and collapse `.`, `..` and
/// duplicate separators into a canonical absolute path.
pub fn normalize(cwd: &str, path: &str) -> VfsResult<String> {
    if path.len() > MAX_PATH || cwd.len() > MAX_PATH {
        return Err(VfsError::Invalid);
    }

    let mut parts: Vec<&str> = Vec::new();
    let absolute = path.starts_with('/');
    let base = if absolute { "" } else { cwd };

    for component in base.split('/').chain(path.split('/')) {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => {
                if name.len() > MAX_NAME {
                    return Err(VfsError::Invalid);
                }
                parts.push(name);
            }
        }
    }

    let mut out = String::with_capacity(MAX_PATH);
    if parts.is_empty() {
        out.push('/');
    } else {
        for part in parts {
            out.push('/');
            out.push_str(part);
        }
    }
    if out.len() > MAX_PATH {
        return Err(VfsError::Invalid);
    }
    Ok(out)
}

/// Resolve an absolute path to a node. `.` and `..` are accepted here too
/// (via a parent stack), though callers normally pass normalized paths.
pub fn resolve_path(path: &str) -> VfsResult<VfsNode> {
    if !path.starts_with('/') {
        return Err(VfsError::Invalid);
    }
    let mut current = root()?;
    let mut stack: Vec<VfsNode> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                current = match stack.pop() {
                    Some(node) => node,
                    None => root()?,
                };
            }
            name => {
                if name.len() > MAX_NAME {
                    return Err(VfsError::Invalid);
                }
                if current.kind != NodeKind::Directory {
                    return Err(VfsError::NotDirectory);
                }
                stack.push(current);
                current = fat32::finddir(&current, name)?;
            }
        }
    }
    Ok(current)
}

/// Resolve the parent directory of `path` and return it with the final
/// component. Fails on the root itself.
pub fn split_parent(path: &str) -> VfsResult<(VfsNode, &str)> {
    if !path.starts_with('/') || path == "/" {
        return Err(VfsError::Invalid);
    }
    let trimmed = path.trim_end_matches('/');
    let (dir, name) = match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => return Err(VfsError::Invalid),
    };
    if name.is_empty() || name.len() > MAX_NAME {
        return Err(VfsError::Invalid);
    }
    let parent = resolve_path(dir)?;
    if parent.kind != NodeKind::Directory {
        return Err(VfsError::NotDirectory);
    }
    Ok((parent, name))
}

/// Read file bytes at `offset`
pub fn read_node(node: &VfsNode, offset: u32, buf: &mut [u8]) -> VfsResult<usize> {
    if node.kind != NodeKind::File {
        return Err(VfsError::IsDirectory);
    }
    fat32::read(node, offset, buf)
}

/// Write file bytes at `offset`, extending the file as needed. Updates the
/// node handle's size/cluster fields in place.
pub fn write_node(node: &mut VfsNode, offset: u32, data: &[u8]) -> VfsResult<usize> {
    if node.kind != NodeKind::File {
        return Err(VfsError::IsDirectory);
    }
    fat32::write(node, offset, data)
}

/// List entry `index` of a directory
pub fn readdir(node: &VfsNode, index: u32) -> VfsResult<DirEntryInfo> {
    if node.kind != NodeKind::Directory {
        return Err(VfsError::NotDirectory);
    }
    fat32::readdir(node, index)
}

/// Create an empty regular file
pub fn create(path: &str) -> VfsResult<VfsNode> {
    let (parent, name) = split_parent(path)?;
    fat32::create_file(&parent, name)
}

/// Create a directory
pub fn mkdir(path: &str) -> VfsResult<()> {
    let (parent, name) = split_parent(path)?;
    fat32::mkdir(&parent, name).map(|_| ())
}

/// Remove a regular file
pub fn unlink(path: &str) -> VfsResult<()> {
    let (parent, name) = split_parent(path)?;
    fat32::unlink(&parent, name)
}

/// Remove an empty directory
pub fn rmdir(path: &str) -> VfsResult<()> {
    let (parent, name) = split_parent(path)?;
    fat32::rmdir(&parent, name)
}

/// Rename/move within the filesystem
pub fn rename(old_path: &str, new_path: &str) -> VfsResult<()> {
    let (old_parent, old_name) = split_parent(old_path)?;
    let (new_parent, new_name) = split_parent(new_path)?;
    fat32::rename(&old_parent, old_name, &new_parent, new_name)
}

/// Truncate (or zero-extend) a file to `size`
pub fn truncate(path: &str, size: u32) -> VfsResult<()> {
    let mut node = resolve_path(path)?;
    if node.kind != NodeKind::File {
        return Err(VfsError::IsDirectory);
    }
    fat32::truncate(&mut node, size)
}

/// Node metadata
pub fn stat(path: &str) -> VfsResult<NodeStat> {
    let node = resolve_path(path)?;
    Ok(stat_node(&node))
}

pub fn stat_node(node: &VfsNode) -> NodeStat {
    NodeStat {
        size: node.size,
        mode: match node.kind {
            NodeKind::File => crate::syscall::abi::S_IFREG,
            NodeKind::Directory => crate::syscall::abi::S_IFDIR,
        },
        ino: node.first_cluster,
    }
}

/// Create every missing directory along an absolute path; returns the
/// final node. Used at boot for the standard directory set.
pub fn ensure_path_exists(path: &str) -> VfsResult<VfsNode> {
    if !path.starts_with('/') {
        return Err(VfsError::Invalid);
    }
    let mut current = root()?;
    for component in path.split('/') {
        if component.is_empty() || component == "." {
            continue;
        }
        current = match fat32::finddir(&current, component) {
            Ok(node) => node,
            Err(VfsError::NotFound) => fat32::mkdir(&current, component)?,
            Err(e) => return Err(e),
        };
        if current.kind != NodeKind::Directory {
            return Err(VfsError::NotDirectory);
        }
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(normalize("/", "/a/b/../c/./d").unwrap(), "/a/c/d");
        assert_eq!(normalize("/", "/../..").unwrap(), "/");
    }

    #[test]
    fn normalize_joins_relative() {
        assert_eq!(normalize("/users/root", "docs").unwrap(), "/users/root/docs");
        assert_eq!(normalize("/users/root", "../guest").unwrap(), "/users/guest");
        assert_eq!(normalize("/users", ".").unwrap(), "/users");
    }

    #[test]
    fn normalize_rejects_long_components() {
        let long = alloc::format!("/{}", "x".repeat(MAX_NAME + 1));
        assert!(normalize("/", &long).is_err());
    }

    #[test]
    fn namebuf_round_trip() {
        let name = NameBuf::from_str("kernel.elf").unwrap();
        assert_eq!(name.as_str(), "kernel.elf");
        assert!(NameBuf::from_str("").is_none());
    }
}
