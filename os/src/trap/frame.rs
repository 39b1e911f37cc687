//! Saved register state handed to the dispatcher.

use static_assertions::const_assert_eq;

use crate::platform::Platform;

/// Register state pushed by an entry trampoline plus the CPU's own frame.
///
/// Field order mirrors the stack from lowest address up: general purpose
/// registers (last pushed first), the vector and error code pushed by the
/// stub, then the hardware frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterruptFrame {
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
    pub vector: u64,
    /// Zero for vectors where the CPU pushes none.
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

// 22 quadwords keeps the stack 16-byte aligned at the dispatcher call.
const_assert_eq!(core::mem::size_of::<InterruptFrame>(), 176);

impl InterruptFrame {
    /// Frame for `vector` with every other field zero.
    pub const fn for_vector(vector: u8) -> Self {
        let mut frame = Self::zeroed();
        frame.vector = vector as u64;
        frame
    }

    const fn zeroed() -> Self {
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
            vector: 0,
            error_code: 0,
            rip: 0,
            cs: 0,
            rflags: 0,
            rsp: 0,
            ss: 0,
        }
    }

    /// Trap raised while executing in ring 3.
    pub fn from_user(&self) -> bool {
        self.cs & 0x3 == 0x3
    }

    /// Address of the frame itself, i.e. the stack pointer at dispatch.
    pub fn address(&self) -> u64 {
        self as *const Self as u64
    }
}

pub fn dump_interrupt_frame(frame: &InterruptFrame) {
    log::error!("  vector {}  error code 0x{:x}", frame.vector, frame.error_code);
    log::error!(
        "  RIP 0x{:016x}  CS 0x{:04x}  RFLAGS 0x{:016x}",
        frame.rip,
        frame.cs,
        frame.rflags
    );
    log::error!("  RSP 0x{:016x}  SS 0x{:04x}", frame.rsp, frame.ss);
    log::error!(
        "  RAX 0x{:016x}  RBX 0x{:016x}  RCX 0x{:016x}  RDX 0x{:016x}",
        frame.rax,
        frame.rbx,
        frame.rcx,
        frame.rdx
    );
    log::error!(
        "  RSI 0x{:016x}  RDI 0x{:016x}  RBP 0x{:016x}",
        frame.rsi,
        frame.rdi,
        frame.rbp
    );
    log::error!(
        "  R8  0x{:016x}  R9  0x{:016x}  R10 0x{:016x}  R11 0x{:016x}",
        frame.r8,
        frame.r9,
        frame.r10,
        frame.r11
    );
    log::error!(
        "  R12 0x{:016x}  R13 0x{:016x}  R14 0x{:016x}  R15 0x{:016x}",
        frame.r12,
        frame.r13,
        frame.r14,
        frame.r15
    );
    if frame.from_user() {
        log::error!("  (raised in user mode)");
    }
}

pub fn dump_cpu_state<P: Platform>(platform: &P) {
    let regs = platform.control_registers();
    log::error!("  CR0 0x{:016x}  CR2 0x{:016x}", regs.cr0, regs.cr2);
    log::error!("  CR3 0x{:016x}  CR4 0x{:016x}", regs.cr3, regs.cr4);
    log::error!("  EFER 0x{:016x}", regs.efer);
}
