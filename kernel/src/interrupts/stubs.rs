//! Trap entry stubs and the canonical saved-register frame
//!
//! Every control transfer into the kernel funnels through `trap_common`,
//! which pushes the full GPR set in a fixed order on top of what the CPU
//! (and the per-vector stub) already pushed. The resulting in-memory layout
//! is `TrapFrame`; the scheduler treats a task's saved stack pointer as a
//! pointer to one of these. The restore path is unconditional: pop the
//! GPRs, skip int_no/err_code, `iretq`.
//!
//! The dispatcher returns the frame pointer to resume, which is how the
//! timer IRQ performs a context switch: `trap_common` reloads RSP from the
//! returned value before popping.

/// Saved register block, low address first. Matches the push order in
/// `trap_common` exactly; the last five fields are pushed by the CPU
/// (SS:RSP are always pushed in 64-bit mode).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub int_no: u64,
    pub err_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    pub const fn zeroed() -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rbp: 0,
            rdi: 0,
            rsi: 0,
            rdx: 0,
            rcx: 0,
            rbx: 0,
            rax: 0,
            int_no: 0,
            err_code: 0,
            rip: 0,
            cs: 0,
            rflags: 0,
            rsp: 0,
            ss: 0,
        }
    }
}

/// Common save/dispatch/restore path. The per-vector stubs jump here after
/// normalising the stack to (int_no, err_code, rip, cs, rflags, rsp, ss).
#[unsafe(naked)]
pub extern "C" fn trap_common() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, [rsp + 120]", // int_no
        "mov rsi, rsp",
        "call {dispatch}",
        "mov rsp, rax",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "add rsp, 16", // int_no + err_code
        "iretq",
        dispatch = sym super::handlers::trap_dispatch,
    );
}

/// Vector without a CPU-pushed error code: push a zero placeholder
macro_rules! trap_stub {
    ($name:ident, $vector:expr) => {
        #[unsafe(naked)]
        pub extern "C" fn $name() {
            core::arch::naked_asm!(
                "push 0",
                concat!("push ", stringify!($vector)),
                "jmp {common}",
                common = sym trap_common,
            );
        }
    };
}

/// Vector where the CPU pushed an error code already
macro_rules! trap_stub_err {
    ($name:ident, $vector:expr) => {
        #[unsafe(naked)]
        pub extern "C" fn $name() {
            core::arch::naked_asm!(
                concat!("push ", stringify!($vector)),
                "jmp {common}",
                common = sym trap_common,
            );
        }
    };
}

// CPU exceptions
trap_stub!(exc0, 0); // Division by zero
trap_stub!(exc1, 1); // Debug
trap_stub!(exc2, 2); // NMI
trap_stub!(exc3, 3); // Breakpoint
trap_stub!(exc4, 4); // Overflow
trap_stub!(exc5, 5); // Bound range exceeded
trap_stub!(exc6, 6); // Invalid opcode
trap_stub!(exc7, 7); // Device not available
trap_stub_err!(exc8, 8); // Double fault
trap_stub!(exc9, 9); // Coprocessor segment overrun
trap_stub_err!(exc10, 10); // Invalid TSS
trap_stub_err!(exc11, 11); // Segment not present
trap_stub_err!(exc12, 12); // Stack fault
trap_stub_err!(exc13, 13); // General protection fault
trap_stub_err!(exc14, 14); // Page fault
trap_stub!(exc16, 16); // x87 FPU error
trap_stub_err!(exc17, 17); // Alignment check
trap_stub!(exc18, 18); // Machine check
trap_stub!(exc19, 19); // SIMD floating point
trap_stub!(exc20, 20); // Virtualization

// Hardware IRQs (after PIC remap)
trap_stub!(irq32, 32); // PIT timer
trap_stub!(irq33, 33); // PS/2 keyboard
trap_stub!(irq44, 44); // PS/2 mouse
