//! ELF Executable Loader
//!
//! Parses and loads static ELF64 executables into a destination address
//! space. No relocations, no interpreter, no dynamic linking: the file is
//! staged into a heap buffer, validated, and every PT_LOAD segment is
//! copied page by page into freshly allocated frames mapped at p_vaddr.

use alloc::vec;

use crate::memory::{pmm, vmm, PAGE_SIZE};
use crate::vfs::{self, VfsNode};

/// ELF magic number
const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 62;
const PT_LOAD: u32 = 1;

/// Staging cap for executable images
const MAX_IMAGE_SIZE: usize = 512 * 1024;

/// ELF64 file header
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Elf64Header {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl Elf64Header {
    pub const SIZE: usize = 64;

    /// Parse and validate: magic, 64-bit, little-endian, static
    /// executable, x86_64.
    pub fn from_bytes(data: &[u8]) -> Option<&Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        let header = unsafe { &*(data.as_ptr() as *const Self) };
        if header.e_ident[0..4] != ELF_MAGIC {
            return None;
        }
        if header.e_ident[4] != ELFCLASS64 {
            return None;
        }
        if header.e_ident[5] != ELFDATA2LSB {
            return None;
        }
        if header.e_type != ET_EXEC {
            return None;
        }
        if header.e_machine != EM_X86_64 {
            return None;
        }
        Some(header)
    }
}

/// ELF64 program header
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Elf64Phdr {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

impl Elf64Phdr {
    pub const SIZE: usize = 56;

    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }
}

/// Quick magic check without full validation
pub fn is_elf(data: &[u8]) -> bool {
    data.len() >= 4 && data[0..4] == ELF_MAGIC
}

/// Load the executable behind `node` into the address space `root`.
/// Returns the entry point, or None on any validation or allocation
/// failure (pages already mapped stay in the space; the caller tears the
/// whole space down on error).
pub fn load_into(root: u64, node: &VfsNode) -> Option<u64> {
    let size = node.size as usize;
    if size < Elf64Header::SIZE || size > MAX_IMAGE_SIZE {
        return None;
    }

    let mut data = vec![0u8; size];
    let read = vfs::read_node(node, 0, &mut data).ok()?;
    if read < size {
        return None;
    }

    let header = Elf64Header::from_bytes(&data)?;
    let phoff = header.e_phoff as usize;
    let phentsize = header.e_phentsize as usize;
    let phnum = header.e_phnum as usize;
    if phentsize < Elf64Phdr::SIZE {
        return None;
    }

    for i in 0..phnum {
        let off = phoff.checked_add(i * phentsize)?;
        if off + Elf64Phdr::SIZE > data.len() {
            return None;
        }
        let phdr = unsafe { &*(data[off..].as_ptr() as *const Elf64Phdr) };
        if !phdr.is_load() {
            continue;
        }
        load_segment(root, &data, phdr)?;
    }

    Some(header.e_entry)
}

/// Copy one PT_LOAD segment. Pages already mapped are skipped, which is
/// how overlapping segments sharing a page stay consistent: the first
/// mapper wins and later segments only contribute their file bytes through
/// the copy of the page that mapped them.
fn load_segment(root: u64, data: &[u8], phdr: &Elf64Phdr) -> Option<()> {
    let file_start = phdr.p_offset as usize;
    let file_end = file_start.checked_add(phdr.p_filesz as usize)?;
    if file_end > data.len() {
        return None;
    }

    let seg_start = phdr.p_vaddr;
    let seg_end = seg_start.checked_add(phdr.p_memsz)?;
    let mut page = crate::memory::page_align_down(seg_start);

    while page < seg_end {
        if vmm::virt_to_phys(root, page).is_none() {
            let frame = pmm::alloc_page_zeroed()?;

            // Overlap of this page with the file-backed part of the segment
            let copy_start = page.max(seg_start);
            let copy_end = (page + PAGE_SIZE).min(seg_start + phdr.p_filesz);
            if copy_start < copy_end {
                let src = file_start + (copy_start - seg_start) as usize;
                let len = (copy_end - copy_start) as usize;
                let dst = frame + (copy_start - page);
                unsafe {
                    core::ptr::copy_nonoverlapping(data[src..].as_ptr(), dst as *mut u8, len);
                }
            }

            if vmm::map_user_page(
                root,
                page,
                frame,
                vmm::PageFlags::WRITABLE | vmm::PageFlags::USER,
            )
            .is_none()
            {
                pmm::free_page(frame);
                return None;
            }
        }
        page += PAGE_SIZE;
    }
    Some(())
}

/// Validation self-tests over in-memory images. Returns (passed, failed).
pub fn self_test() -> (usize, usize) {
    let mut passed = 0usize;
    let mut failed = 0usize;

    let mut image = [0u8; Elf64Header::SIZE];
    image[0..4].copy_from_slice(&ELF_MAGIC);
    image[4] = ELFCLASS64;
    image[5] = ELFDATA2LSB;
    image[16] = ET_EXEC as u8;
    image[18] = EM_X86_64 as u8;

    if Elf64Header::from_bytes(&image).is_some() {
        crate::serial_println!("[ELF-TEST] minimal valid header accepted: PASS");
        passed += 1;
    } else {
        crate::serial_println!("[ELF-TEST] minimal valid header accepted: FAIL");
        failed += 1;
    }

    let mut bad_magic = image;
    bad_magic[0] = 0x7E;
    let mut bad_class = image;
    bad_class[4] = 1;
    let mut bad_type = image;
    bad_type[16] = 3; // ET_DYN
    let mut bad_machine = image;
    bad_machine[18] = 0x3E + 1;

    for (name, img) in [
        ("bad magic", &bad_magic),
        ("32-bit class", &bad_class),
        ("non-EXEC type", &bad_type),
        ("wrong machine", &bad_machine),
    ] {
        if Elf64Header::from_bytes(img).is_none() {
            crate::serial_println!("[ELF-TEST] {} rejected: PASS", name);
            passed += 1;
        } else {
            crate::serial_println!("[ELF-TEST] {} rejected: FAIL", name);
            failed += 1;
        }
    }

    (passed, failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_header() -> [u8; Elf64Header::SIZE] {
        let mut image = [0u8; Elf64Header::SIZE];
        image[0..4].copy_from_slice(&ELF_MAGIC);
        image[4] = ELFCLASS64;
        image[5] = ELFDATA2LSB;
        image[16] = ET_EXEC as u8;
        image[18] = EM_X86_64 as u8;
        image
    }

    #[test]
    fn accepts_minimal_static_exec() {
        assert!(Elf64Header::from_bytes(&minimal_header()).is_some());
    }

    #[test]
    fn rejects_truncated_header() {
        let image = minimal_header();
        assert!(Elf64Header::from_bytes(&image[..32]).is_none());
    }

    #[test]
    fn rejects_shared_object() {
        let mut image = minimal_header();
        image[16] = 3; // ET_DYN
        assert!(Elf64Header::from_bytes(&image).is_none());
    }

    #[test]
    fn magic_probe() {
        assert!(is_elf(&minimal_header()));
        assert!(!is_elf(b"\x7fELG"));
        assert!(!is_elf(b"\x7f"));
    }
}
