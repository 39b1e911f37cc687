//! Vector numbers and their classification.

pub const EXCEPTION_DIVIDE_ERROR: u8 = 0;
pub const EXCEPTION_DEBUG: u8 = 1;
pub const EXCEPTION_NMI: u8 = 2;
pub const EXCEPTION_BREAKPOINT: u8 = 3;
pub const EXCEPTION_OVERFLOW: u8 = 4;
pub const EXCEPTION_BOUND_RANGE: u8 = 5;
pub const EXCEPTION_INVALID_OPCODE: u8 = 6;
pub const EXCEPTION_DEVICE_NOT_AVAILABLE: u8 = 7;
pub const EXCEPTION_DOUBLE_FAULT: u8 = 8;
pub const EXCEPTION_INVALID_TSS: u8 = 10;
pub const EXCEPTION_SEGMENT_NOT_PRESENT: u8 = 11;
pub const EXCEPTION_STACK_SEGMENT_FAULT: u8 = 12;
pub const EXCEPTION_GENERAL_PROTECTION: u8 = 13;
pub const EXCEPTION_PAGE_FAULT: u8 = 14;
pub const EXCEPTION_X87_FPU: u8 = 16;
pub const EXCEPTION_ALIGNMENT_CHECK: u8 = 17;
pub const EXCEPTION_MACHINE_CHECK: u8 = 18;
pub const EXCEPTION_SIMD_FP: u8 = 19;

/// Architectural exceptions with a wired trampoline: `0..=19`.
pub const LAST_WIRED_EXCEPTION: u8 = 19;
/// Exception vectors, wired or reserved: `0..32`.
pub const EXCEPTION_VECTORS: usize = 32;

/// First hardware IRQ vector after PIC remapping.
pub const IRQ_BASE_VECTOR: u8 = 32;
/// Number of legacy IRQ lines wired to trampolines.
pub const IRQ_COUNT: u8 = 16;
/// One past the last wired IRQ vector.
pub const IRQ_END_VECTOR: u8 = IRQ_BASE_VECTOR + IRQ_COUNT;

/// Vector table size.
pub const VECTOR_COUNT: usize = 256;

/// Vectors whose handlers can never be replaced.
pub const CRITICAL_VECTORS: [u8; 3] = [EXCEPTION_DOUBLE_FAULT, EXCEPTION_MACHINE_CHECK, EXCEPTION_NMI];

/// Double fault, machine check and NMI signal corruption a test hook must
/// never be allowed to mask.
pub const fn is_critical(vector: u8) -> bool {
    matches!(vector, EXCEPTION_DOUBLE_FAULT | EXCEPTION_MACHINE_CHECK | EXCEPTION_NMI)
}

/// Whether `vector` has an entry trampoline.
pub const fn is_wired(vector: u8) -> bool {
    vector <= LAST_WIRED_EXCEPTION || (vector >= IRQ_BASE_VECTOR && vector < IRQ_END_VECTOR)
}

/// Human-readable vector name.
pub const fn get_exception_name(vector: u8) -> &'static str {
    match vector {
        0 => "Divide Error",
        1 => "Debug",
        2 => "Non-Maskable Interrupt",
        3 => "Breakpoint",
        4 => "Overflow",
        5 => "Bound Range Exceeded",
        6 => "Invalid Opcode",
        7 => "Device Not Available",
        8 => "Double Fault",
        9 => "Coprocessor Segment Overrun",
        10 => "Invalid TSS",
        11 => "Segment Not Present",
        12 => "Stack Segment Fault",
        13 => "General Protection Fault",
        14 => "Page Fault",
        15 => "Reserved",
        16 => "x87 FPU Error",
        17 => "Alignment Check",
        18 => "Machine Check",
        19 => "SIMD Floating-Point Exception",
        32..=47 => "Hardware IRQ",
        _ => "Unknown",
    }
}
