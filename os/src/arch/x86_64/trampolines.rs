//! Entry trampolines for the wired vectors.
//!
//! Each stub normalizes the stack to `[vector, error code, hardware frame]`
//! (pushing a zero error code where the CPU pushes none) and jumps to a common
//! tail that saves the general purpose registers, calls the dispatcher with
//! a pointer to the resulting [`InterruptFrame`](crate::trap::InterruptFrame)
//! and unwinds it again with `iretq`.
//!
//! `bastion_trap_table` lists the stub addresses for vectors 0-19 followed by
//! 32-47. It lives in `.data.rel.ro` because the kernel is position independent
//! and the loader patches the absolute addresses.

use core::arch::global_asm;

/// Number of entries in `bastion_trap_table`.
pub const TRAMPOLINE_COUNT: usize = 36;

extern "C" {
    static bastion_trap_table: [u64; TRAMPOLINE_COUNT];
}

/// Stub address for `vector`, if it is wired.
pub fn address(vector: u8) -> Option<u64> {
    let index = match vector {
        0..=19 => usize::from(vector),
        32..=47 => usize::from(vector) - 12,
        _ => return None,
    };
    // SAFETY: the table is immutable after relocation and `index` is in bounds.
    Some(unsafe { bastion_trap_table[index] })
}

global_asm!(
    r#"
.macro TRAP_STUB vector, has_error
    .if \has_error == 0
    push 0
    .endif
    push \vector
    jmp bastion_trap_common
.endm

.pushsection .text.bastion_traps, "ax"
.balign 16

bastion_trap_common:
    push rax
    push rbx
    push rcx
    push rdx
    push rsi
    push rdi
    push rbp
    push r8
    push r9
    push r10
    push r11
    push r12
    push r13
    push r14
    push r15
    mov rdi, rsp
    cld
    call {dispatch}
    pop r15
    pop r14
    pop r13
    pop r12
    pop r11
    pop r10
    pop r9
    pop r8
    pop rbp
    pop rdi
    pop rsi
    pop rdx
    pop rcx
    pop rbx
    pop rax
    add rsp, 16
    iretq

bastion_trap_stub_0:
    TRAP_STUB 0, 0
bastion_trap_stub_1:
    TRAP_STUB 1, 0
bastion_trap_stub_2:
    TRAP_STUB 2, 0
bastion_trap_stub_3:
    TRAP_STUB 3, 0
bastion_trap_stub_4:
    TRAP_STUB 4, 0
bastion_trap_stub_5:
    TRAP_STUB 5, 0
bastion_trap_stub_6:
    TRAP_STUB 6, 0
bastion_trap_stub_7:
    TRAP_STUB 7, 0
bastion_trap_stub_8:
    TRAP_STUB 8, 1
bastion_trap_stub_9:
    TRAP_STUB 9, 0
bastion_trap_stub_10:
    TRAP_STUB 10, 1
bastion_trap_stub_11:
    TRAP_STUB 11, 1
bastion_trap_stub_12:
    TRAP_STUB 12, 1
bastion_trap_stub_13:
    TRAP_STUB 13, 1
bastion_trap_stub_14:
    TRAP_STUB 14, 1
bastion_trap_stub_15:
    TRAP_STUB 15, 0
bastion_trap_stub_16:
    TRAP_STUB 16, 0
bastion_trap_stub_17:
    TRAP_STUB 17, 1
bastion_trap_stub_18:
    TRAP_STUB 18, 0
bastion_trap_stub_19:
    TRAP_STUB 19, 0
bastion_trap_stub_32:
    TRAP_STUB 32, 0
bastion_trap_stub_33:
    TRAP_STUB 33, 0
bastion_trap_stub_34:
    TRAP_STUB 34, 0
bastion_trap_stub_35:
    TRAP_STUB 35, 0
bastion_trap_stub_36:
    TRAP_STUB 36, 0
bastion_trap_stub_37:
    TRAP_STUB 37, 0
bastion_trap_stub_38:
    TRAP_STUB 38, 0
bastion_trap_stub_39:
    TRAP_STUB 39, 0
bastion_trap_stub_40:
    TRAP_STUB 40, 0
bastion_trap_stub_41:
    TRAP_STUB 41, 0
bastion_trap_stub_42:
    TRAP_STUB 42, 0
bastion_trap_stub_43:
    TRAP_STUB 43, 0
bastion_trap_stub_44:
    TRAP_STUB 44, 0
bastion_trap_stub_45:
    TRAP_STUB 45, 0
bastion_trap_stub_46:
    TRAP_STUB 46, 0
bastion_trap_stub_47:
    TRAP_STUB 47, 0
.popsection

.pushsection .data.rel.ro.bastion_trap_table, "aw"
.balign 8
.global bastion_trap_table
bastion_trap_table:
    .quad bastion_trap_stub_0
    .quad bastion_trap_stub_1
    .quad bastion_trap_stub_2
    .quad bastion_trap_stub_3
    .quad bastion_trap_stub_4
    .quad bastion_trap_stub_5
    .quad bastion_trap_stub_6
    .quad bastion_trap_stub_7
    .quad bastion_trap_stub_8
    .quad bastion_trap_stub_9
    .quad bastion_trap_stub_10
    .quad bastion_trap_stub_11
    .quad bastion_trap_stub_12
    .quad bastion_trap_stub_13
    .quad bastion_trap_stub_14
    .quad bastion_trap_stub_15
    .quad bastion_trap_stub_16
    .quad bastion_trap_stub_17
    .quad bastion_trap_stub_18
    .quad bastion_trap_stub_19
    .quad bastion_trap_stub_32
    .quad bastion_trap_stub_33
    .quad bastion_trap_stub_34
    .quad bastion_trap_stub_35
    .quad bastion_trap_stub_36
    .quad bastion_trap_stub_37
    .quad bastion_trap_stub_38
    .quad bastion_trap_stub_39
    .quad bastion_trap_stub_40
    .quad bastion_trap_stub_41
    .quad bastion_trap_stub_42
    .quad bastion_trap_stub_43
    .quad bastion_trap_stub_44
    .quad bastion_trap_stub_45
    .quad bastion_trap_stub_46
    .quad bastion_trap_stub_47
.popsection
"#,
    dispatch = sym crate::kernel::trap_dispatch,
);
