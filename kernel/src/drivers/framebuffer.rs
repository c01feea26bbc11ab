//! Linear framebuffer driver
//!
//! The bootloader probes VESA and leaves a surface record at well-known
//! physical addresses: base (u32) at 0x5028, width (u16) at 0x5012,
//! height (u16) at 0x5014, bpp (u8) at 0x5019. The kernel maps the pixel
//! range and exposes putpixel plus full and rectangular present paths for
//! the presentation syscalls.

use spin::Mutex;

const BOOT_FB_WIDTH: u64 = 0x5012;
const BOOT_FB_HEIGHT: u64 = 0x5014;
const BOOT_FB_BPP: u64 = 0x5019;
const BOOT_FB_BASE: u64 = 0x5028;

/// Surface description, also the payload of the `fb_info` syscall
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct FbInfo {
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
    pub pitch: u32,
}

struct Surface {
    base: u64,
    info: FbInfo,
}

static FB: Mutex<Option<Surface>> = Mutex::new(None);

/// Read the bootloader's surface record
pub fn init() {
    let width = unsafe { (BOOT_FB_WIDTH as *const u16).read_volatile() } as u32;
    let height = unsafe { (BOOT_FB_HEIGHT as *const u16).read_volatile() } as u32;
    let mut bpp = unsafe { (BOOT_FB_BPP as *const u8).read_volatile() } as u32;
    let base = unsafe { (BOOT_FB_BASE as *const u32).read_volatile() } as u64;

    if base == 0 || width == 0 || height == 0 {
        crate::log_warn!("[FB] no framebuffer record from bootloader");
        return;
    }
    if bpp == 0 {
        bpp = 32;
    }
    let pitch = width * (bpp / 8);

    *FB.lock() = Some(Surface {
        base,
        info: FbInfo {
            width,
            height,
            bpp,
            pitch,
        },
    });
    crate::log!("[FB] {}x{} {}bpp at {:#x}", width, height, bpp, base);
}

/// Surface description, if a framebuffer exists
pub fn info() -> Option<FbInfo> {
    FB.lock().as_ref().map(|s| s.info)
}

/// Physical range of the pixel buffer: (base, size in bytes)
pub fn phys_range() -> Option<(u64, u64)> {
    FB.lock().as_ref().map(|s| {
        let bytes = s.info.height as u64 * s.info.pitch as u64;
        (s.base, bytes)
    })
}

/// Plot one pixel (32bpp fast path; other depths write the low bytes)
pub fn putpixel(x: u32, y: u32, rgb: u32) {
    let fb = FB.lock();
    let Some(s) = fb.as_ref() else { return };
    if x >= s.info.width || y >= s.info.height {
        return;
    }
    let off = y as u64 * s.info.pitch as u64 + x as u64 * (s.info.bpp / 8) as u64;
    unsafe {
        if s.info.bpp == 32 {
            ((s.base + off) as *mut u32).write_volatile(rgb);
        } else {
            let bytes = rgb.to_le_bytes();
            for i in 0..(s.info.bpp / 8) as usize {
                ((s.base + off) as *mut u8).add(i).write_volatile(bytes[i]);
            }
        }
    }
}

/// Copy a full frame from `src` (must be at least height*pitch bytes)
pub fn present(src: &[u8]) -> bool {
    let fb = FB.lock();
    let Some(s) = fb.as_ref() else { return false };
    let bytes = s.info.height as usize * s.info.pitch as usize;
    if src.len() < bytes {
        return false;
    }
    unsafe {
        core::ptr::copy_nonoverlapping(src.as_ptr(), s.base as *mut u8, bytes);
    }
    true
}

/// Copy a rectangle out of a full-frame source buffer
pub fn present_rect(src: &[u8], x: u32, y: u32, w: u32, h: u32) -> bool {
    let fb = FB.lock();
    let Some(s) = fb.as_ref() else { return false };
    let pitch = s.info.pitch as usize;
    let pixel = (s.info.bpp / 8) as usize;
    if x + w > s.info.width || y + h > s.info.height {
        return false;
    }
    if src.len() < s.info.height as usize * pitch {
        return false;
    }
    for row in y..y + h {
        let off = row as usize * pitch + x as usize * pixel;
        let len = w as usize * pixel;
        unsafe {
            core::ptr::copy_nonoverlapping(
                src[off..].as_ptr(),
                (s.base + off as u64) as *mut u8,
                len,
            );
        }
    }
    true
}
