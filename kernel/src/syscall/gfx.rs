//! Presentation syscalls
//!
//! Thin pass-throughs to the framebuffer surface and the keyboard event
//! queue. `fb_map` hands the caller the raw pixel memory: the physical
//! range is mapped user-writable at a fixed virtual base in the caller's
//! address space (without the teardown-ownership bit, since the frames
//! belong to the device, not the process).

use super::abi::{UserFbInfo, UserKeyEvent};
use super::{user_ok, user_slice, user_slice_mut};
use crate::drivers::framebuffer;
use crate::memory::{vmm, FB_USER_BASE, PAGE_SIZE};

pub fn sys_fb_info(ptr: u64) -> i64 {
    let Some(info) = framebuffer::info() else {
        return -1;
    };
    let Some(out) = user_slice_mut(ptr, core::mem::size_of::<UserFbInfo>()) else {
        return -1;
    };
    let user = UserFbInfo {
        width: info.width,
        height: info.height,
        bpp: info.bpp,
        pitch: info.pitch,
    };
    let bytes = unsafe {
        core::slice::from_raw_parts(
            &user as *const _ as *const u8,
            core::mem::size_of::<UserFbInfo>(),
        )
    };
    out.copy_from_slice(bytes);
    0
}

pub fn sys_fb_putpixel(x: u32, y: u32, rgb: u32) -> i64 {
    framebuffer::putpixel(x, y, rgb);
    0
}

pub fn sys_input_poll(ptr: u64) -> i64 {
    if !user_ok(ptr, core::mem::size_of::<UserKeyEvent>(), true) {
        return -1;
    }
    match crate::drivers::keyboard::poll_event() {
        Some(ev) => {
            let user = UserKeyEvent {
                key: ev.key,
                modifiers: ev.modifiers,
                pressed: ev.pressed,
                scancode: ev.scancode,
            };
            unsafe {
                (ptr as *mut UserKeyEvent).write(user);
            }
            1
        }
        None => 0,
    }
}

/// Map the framebuffer into the calling task's address space and return
/// the user virtual base.
pub fn sys_fb_map() -> i64 {
    let Some((base, size)) = framebuffer::phys_range() else {
        return -1;
    };
    let root = vmm::current_root();
    let pages = (size + PAGE_SIZE - 1) / PAGE_SIZE;
    for i in 0..pages {
        let off = i * PAGE_SIZE;
        if vmm::map_kernel_page(
            root,
            FB_USER_BASE + off,
            base + off,
            vmm::PageFlags::WRITABLE | vmm::PageFlags::USER | vmm::PageFlags::WRITE_THROUGH,
        )
        .is_none()
        {
            return -1;
        }
    }
    FB_USER_BASE as i64
}

pub fn sys_fb_present(buf: u64) -> i64 {
    let Some(info) = framebuffer::info() else {
        return -1;
    };
    let bytes = info.height as usize * info.pitch as usize;
    let Some(src) = user_slice(buf, bytes) else {
        return -1;
    };
    if framebuffer::present(src) {
        0
    } else {
        -1
    }
}
