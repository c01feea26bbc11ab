//! Ring-transition core
//!
//! Three jobs live here:
//! - MSR setup for SYSCALL/SYSRET (EFER.SCE, STAR, LSTAR, FMASK).
//! - The SYSCALL entry stub: switch to the per-task kernel stack published
//!   in `CURRENT_KERNEL_RSP`, snapshot the user context (fork reads it),
//!   call the dispatcher, run the signal check, SYSRET.
//! - First-entry frames: the user-stack image (exit stub, argv, alignment,
//!   return address) and the trap frames that make a task's first dispatch
//!   look exactly like returning from an interrupt.

use core::mem::size_of;

use crate::gdt;
use crate::interrupts::TrapFrame;
use crate::memory::{vmm, PAGE_SIZE, USER_STACK_TOP};

/// Kernel stack top of the current task, read by the SYSCALL entry stub.
/// Updated by the scheduler on every context switch. Kept as a plain
/// exported symbol so the assembly stub can address it directly.
#[no_mangle]
pub static mut CURRENT_KERNEL_RSP: u64 = 0;

// User context captured at SYSCALL entry; the only consumer is fork, which
// runs before the snapshot can be overwritten (interrupts stay masked from
// entry until the dispatcher's first blocking point).
#[no_mangle]
static mut USER_CTX_RSP: u64 = 0;
#[no_mangle]
static mut USER_CTX_RIP: u64 = 0;
#[no_mangle]
static mut USER_CTX_RFLAGS: u64 = 0;
#[no_mangle]
static mut USER_CTX_RBX: u64 = 0;
#[no_mangle]
static mut USER_CTX_RBP: u64 = 0;
#[no_mangle]
static mut USER_CTX_R12: u64 = 0;
#[no_mangle]
static mut USER_CTX_R13: u64 = 0;
#[no_mangle]
static mut USER_CTX_R14: u64 = 0;
#[no_mangle]
static mut USER_CTX_R15: u64 = 0;

/// Publish the current task's kernel stack top for the entry stub
pub fn set_current_kernel_rsp(top: u64) {
    unsafe {
        CURRENT_KERNEL_RSP = top;
    }
}

const MSR_STAR: u32 = 0xC000_0081;

/// Configure the SYSCALL/SYSRET MSRs. Must run after the GDT is live.
pub fn init() {
    use x86_64::registers::model_specific::{Efer, EferFlags, LStar, SFMask};
    use x86_64::registers::rflags::RFlags;
    use x86_64::VirtAddr;

    unsafe {
        let efer = Efer::read();
        Efer::write(efer | EferFlags::SYSTEM_CALL_EXTENSIONS);

        // STAR[47:32] = kernel base 0x08 (SYSCALL: CS=0x08, SS=0x10)
        // STAR[63:48] = 0x10 (SYSRET64: CS=0x10+16=0x23|RPL3, SS=0x10+8=0x1B|RPL3)
        let star: u64 = (0x10u64 << 48) | (0x08u64 << 32);
        core::arch::asm!(
            "wrmsr",
            in("ecx") MSR_STAR,
            in("eax") star as u32,
            in("edx") (star >> 32) as u32,
        );

        LStar::write(VirtAddr::new(syscall_entry as usize as u64));

        // FMASK = 0x200: clear IF at entry, nothing else
        SFMask::write(RFlags::INTERRUPT_FLAG);
    }

    crate::log!("[USERMODE] SYSCALL/SYSRET configured (STAR, LSTAR, FMASK)");
}

/// SYSCALL entry. On entry RCX holds the user RIP, R11 the user RFLAGS,
/// and we are still on the user stack.
///
/// The user RSP/RIP/RFLAGS and callee-saved registers go two places: into
/// the `USER_CTX_*` globals (the fork snapshot) and onto the kernel stack
/// (the per-task restore path, immune to other tasks' syscalls while this
/// one is blocked).
#[unsafe(naked)]
extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        "mov [rip + {u_rsp}], rsp",
        "mov rsp, [rip + {kernel_rsp}]",
        "mov [rip + {u_rip}], rcx",
        "mov [rip + {u_rflags}], r11",
        "mov [rip + {u_rbx}], rbx",
        "mov [rip + {u_rbp}], rbp",
        "mov [rip + {u_r12}], r12",
        "mov [rip + {u_r13}], r13",
        "mov [rip + {u_r14}], r14",
        "mov [rip + {u_r15}], r15",
        // Per-task copies for the return path
        "push rcx", // user RIP
        "push r11", // user RFLAGS
        "push rbx",
        "push rbp",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "push qword ptr [rip + {u_rsp}]",
        "sub rsp, 8", // call alignment
        // In: rax=num, rdi,rsi,rdx,r10,r8 = args (Linux order)
        // Out: dispatcher(num, a1, a2, a3, a4, a5) per SysV
        "mov r9, r8",
        "mov r8, r10",
        "mov rcx, rdx",
        "mov rdx, rsi",
        "mov rsi, rdi",
        "mov rdi, rax",
        "call {dispatch}",
        // Deliver pending signals; does not return if one terminated us
        "mov rbx, rax",
        "call {sig_check}",
        "mov rax, rbx",
        "add rsp, 8",
        "pop rdi", // user RSP
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbp",
        "pop rbx",
        "pop r11", // user RFLAGS
        "pop rcx", // user RIP
        "mov rsp, rdi",
        "sysretq",
        kernel_rsp = sym CURRENT_KERNEL_RSP,
        u_rsp = sym USER_CTX_RSP,
        u_rip = sym USER_CTX_RIP,
        u_rflags = sym USER_CTX_RFLAGS,
        u_rbx = sym USER_CTX_RBX,
        u_rbp = sym USER_CTX_RBP,
        u_r12 = sym USER_CTX_R12,
        u_r13 = sym USER_CTX_R13,
        u_r14 = sym USER_CTX_R14,
        u_r15 = sym USER_CTX_R15,
        dispatch = sym crate::syscall::syscall_dispatch,
        sig_check = sym syscall_signal_check,
    );
}

/// Tail-of-syscall signal pass, reached from the entry stub
#[no_mangle]
extern "C" fn syscall_signal_check() {
    crate::task::sched::deliver_signals_current();
}

/// Exit stub placed at USER_STACK_TOP - 32: `mov eax, SYS_EXIT(=0);
/// xor edi, edi; syscall`, falling through to HLT. Its address is the
/// return address under `main`, so a plain `ret` terminates cleanly.
const EXIT_STUB: [u8; 10] = [
    0xB8, 0x00, 0x00, 0x00, 0x00, // mov eax, 0
    0x31, 0xFF, // xor edi, edi
    0x0F, 0x05, // syscall
    0xF4, // hlt (not reached; syscall does not return)
];

/// Where the exit stub lives on every user stack
const EXIT_STUB_VADDR: u64 = USER_STACK_TOP - 32;

const MAX_ARGS: usize = 8;

/// Copy bytes into a user address range through the target address space
/// (the frames are identity-mapped for the kernel).
fn user_write(root: u64, vaddr: u64, bytes: &[u8]) -> Option<()> {
    let mut off = 0usize;
    while off < bytes.len() {
        let va = vaddr + off as u64;
        let pa = vmm::virt_to_phys(root, va)?;
        let page_rem = (PAGE_SIZE - (va & (PAGE_SIZE - 1))) as usize;
        let n = page_rem.min(bytes.len() - off);
        unsafe {
            core::ptr::copy_nonoverlapping(bytes[off..].as_ptr(), pa as *mut u8, n);
        }
        off += n;
    }
    Some(())
}

fn user_write_u64(root: u64, vaddr: u64, value: u64) -> Option<()> {
    user_write(root, vaddr, &value.to_le_bytes())
}

/// Build the self-contained first-entry stack image on the (already
/// mapped) user stack:
///
/// 1. exit stub at USER_STACK_TOP - 32
/// 2. argv strings
/// 3. argv array (null terminator, then pointers in reverse)
/// 4. pad so that at function entry (rsp + 8) % 16 == 0
/// 5. the exit stub's address as the pushed return address
///
/// Returns (user_sp, argc, argv pointer).
pub fn build_user_stack(root: u64, args: &[&str]) -> Option<(u64, u64, u64)> {
    if args.len() > MAX_ARGS {
        return None;
    }

    user_write(root, EXIT_STUB_VADDR, &EXIT_STUB)?;

    let mut sp = EXIT_STUB_VADDR;
    let mut arg_ptrs = [0u64; MAX_ARGS];

    for (i, arg) in args.iter().enumerate() {
        let bytes = arg.as_bytes();
        sp -= bytes.len() as u64 + 1;
        user_write(root, sp, bytes)?;
        user_write(root, sp + bytes.len() as u64, &[0u8])?;
        arg_ptrs[i] = sp;
    }

    sp &= !7;
    sp -= 8;
    user_write_u64(root, sp, 0)?; // argv[argc] = NULL
    for i in (0..args.len()).rev() {
        sp -= 8;
        user_write_u64(root, sp, arg_ptrs[i])?;
    }
    let argv_ptr = sp;

    // After the final push, rsp % 16 == 8 (the ABI state at function entry)
    sp &= !0xF;
    sp -= 8;
    user_write_u64(root, sp, EXIT_STUB_VADDR)?;

    Some((sp, args.len() as u64, argv_ptr))
}

/// Write a first-entry trap frame for a kernel task: the standard restore
/// epilogue pops it and `iretq` lands in `entry` at ring 0 with IF set.
pub fn write_kernel_frame(kstack_top: u64, entry: u64) -> u64 {
    let frame_addr = kstack_top - size_of::<TrapFrame>() as u64;
    unsafe {
        let f = frame_addr as *mut TrapFrame;
        *f = TrapFrame::zeroed();
        (*f).rip = entry;
        (*f).cs = gdt::KERNEL_CODE_SELECTOR as u64;
        (*f).rflags = 0x202;
        (*f).rsp = kstack_top;
        (*f).ss = gdt::KERNEL_DATA_SELECTOR as u64;
    }
    frame_addr
}

/// Write the first-entry trap frame for a user task: `iretq` drops to ring
/// 3 at `entry` with `rdi = argc`, `rsi = argv`.
pub fn write_user_frame(kstack_top: u64, entry: u64, user_sp: u64, argc: u64, argv: u64) -> u64 {
    let frame_addr = kstack_top - size_of::<TrapFrame>() as u64;
    unsafe {
        let f = frame_addr as *mut TrapFrame;
        *f = TrapFrame::zeroed();
        (*f).rip = entry;
        (*f).cs = gdt::USER_CODE_SELECTOR as u64;
        (*f).rflags = 0x202;
        (*f).rdi = argc;
        (*f).rsi = argv;
        (*f).rsp = user_sp;
        (*f).ss = gdt::USER_DATA_SELECTOR as u64;
    }
    frame_addr
}

/// Write the child-side frame for fork from the context the SYSCALL stub
/// snapshotted: same rip/rflags/rsp and callee-saved registers as the
/// parent, rax = 0 so the child sees fork() return zero.
pub fn write_fork_frame(kstack_top: u64) -> u64 {
    let frame_addr = kstack_top - size_of::<TrapFrame>() as u64;
    unsafe {
        let f = frame_addr as *mut TrapFrame;
        *f = TrapFrame::zeroed();
        (*f).rip = USER_CTX_RIP;
        (*f).rflags = USER_CTX_RFLAGS | 0x202;
        (*f).rsp = USER_CTX_RSP;
        (*f).rbx = USER_CTX_RBX;
        (*f).rbp = USER_CTX_RBP;
        (*f).r12 = USER_CTX_R12;
        (*f).r13 = USER_CTX_R13;
        (*f).r14 = USER_CTX_R14;
        (*f).r15 = USER_CTX_R15;
        (*f).rax = 0;
        (*f).cs = gdt::USER_CODE_SELECTOR as u64;
        (*f).ss = gdt::USER_DATA_SELECTOR as u64;
    }
    frame_addr
}
