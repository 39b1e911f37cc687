//! Built-in exception handlers.

use crate::idt::vectors::{self, get_exception_name};
use crate::platform::Platform;
use crate::safe_stack::SafeStacks;

use super::frame::{dump_cpu_state, dump_interrupt_frame, InterruptFrame};

// Page-fault error code bits.
const PF_PRESENT: u64 = 1 << 0;
const PF_WRITE: u64 = 1 << 1;
const PF_USER: u64 = 1 << 2;
const PF_RESERVED_WRITE: u64 = 1 << 3;
const PF_INSTRUCTION_FETCH: u64 = 1 << 4;

/// Default handler bound to an exception vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultHandler {
    DivideError,
    Debug,
    Nmi,
    Breakpoint,
    Overflow,
    BoundRange,
    InvalidOpcode,
    DeviceNotAvailable,
    DoubleFault,
    InvalidTss,
    SegmentNotPresent,
    StackSegmentFault,
    GeneralProtection,
    PageFault,
    X87Fpu,
    AlignmentCheck,
    MachineCheck,
    SimdFloatingPoint,
    /// Reserved or otherwise unexpected exception; always halts.
    Unhandled,
}

impl DefaultHandler {
    /// Named default for `vector`, or [`DefaultHandler::Unhandled`].
    pub const fn for_vector(vector: u8) -> Self {
        use vectors::*;
        match vector {
            EXCEPTION_DIVIDE_ERROR => Self::DivideError,
            EXCEPTION_DEBUG => Self::Debug,
            EXCEPTION_NMI => Self::Nmi,
            EXCEPTION_BREAKPOINT => Self::Breakpoint,
            EXCEPTION_OVERFLOW => Self::Overflow,
            EXCEPTION_BOUND_RANGE => Self::BoundRange,
            EXCEPTION_INVALID_OPCODE => Self::InvalidOpcode,
            EXCEPTION_DEVICE_NOT_AVAILABLE => Self::DeviceNotAvailable,
            EXCEPTION_DOUBLE_FAULT => Self::DoubleFault,
            EXCEPTION_INVALID_TSS => Self::InvalidTss,
            EXCEPTION_SEGMENT_NOT_PRESENT => Self::SegmentNotPresent,
            EXCEPTION_STACK_SEGMENT_FAULT => Self::StackSegmentFault,
            EXCEPTION_GENERAL_PROTECTION => Self::GeneralProtection,
            EXCEPTION_PAGE_FAULT => Self::PageFault,
            EXCEPTION_X87_FPU => Self::X87Fpu,
            EXCEPTION_ALIGNMENT_CHECK => Self::AlignmentCheck,
            EXCEPTION_MACHINE_CHECK => Self::MachineCheck,
            EXCEPTION_SIMD_FP => Self::SimdFloatingPoint,
            _ => Self::Unhandled,
        }
    }

    /// Whether this handler ends in a halt.
    pub const fn is_fatal(self) -> bool {
        !matches!(
            self,
            Self::Debug
                | Self::Breakpoint
                | Self::Overflow
                | Self::BoundRange
                | Self::DeviceNotAvailable
                | Self::X87Fpu
                | Self::AlignmentCheck
                | Self::SimdFloatingPoint
        )
    }

    /// Message passed to the halt service.
    pub const fn panic_message(self) -> &'static str {
        match self {
            Self::DivideError => "Divide Error",
            Self::Nmi => "Non-Maskable Interrupt",
            Self::InvalidOpcode => "Invalid Opcode",
            Self::DoubleFault => "Double Fault",
            Self::InvalidTss => "Invalid TSS",
            Self::SegmentNotPresent => "Segment Not Present",
            Self::StackSegmentFault => "Stack Segment Fault",
            Self::GeneralProtection => "General Protection Fault",
            Self::PageFault => "Page Fault",
            Self::MachineCheck => "Machine Check",
            _ => "Unhandled exception",
        }
    }

    pub fn run<P: Platform>(self, frame: &mut InterruptFrame, platform: &P, stacks: &SafeStacks) {
        match self {
            Self::PageFault => page_fault(frame, platform, stacks),
            Self::Unhandled => {
                log::error!(
                    "EXCEPTION: unhandled vector {} ({})",
                    frame.vector,
                    get_exception_name(frame.vector as u8)
                );
                halt_with_dump(frame, platform, self.panic_message());
            }
            _ if self.is_fatal() => {
                log::error!("EXCEPTION: {} (vector {})", self.panic_message(), frame.vector);
                if self == Self::DoubleFault {
                    let safe_stack = stacks
                        .descriptor(vectors::EXCEPTION_DOUBLE_FAULT)
                        .filter(|stack| stack.is_registered());
                    match safe_stack {
                        Some(stack) => {
                            log::error!("  running on the {} safe stack (IST{})", stack.name(), stack.ist_slot())
                        }
                        None => log::error!("  no safe stack registered, running on the faulting stack"),
                    }
                }
                halt_with_dump(frame, platform, self.panic_message());
            }
            _ => {
                log::warn!(
                    "EXCEPTION: {} (vector {}) at 0x{:x}, resuming",
                    get_exception_name(frame.vector as u8),
                    frame.vector,
                    frame.rip
                );
                dump_interrupt_frame(frame);
            }
        }
    }
}

/// Fallback when no handler table is available.
pub fn default_panic<P: Platform>(frame: &mut InterruptFrame, platform: &P) -> ! {
    log::error!(
        "EXCEPTION: no handler for vector {} ({})",
        frame.vector,
        get_exception_name(frame.vector as u8)
    );
    halt_with_dump(frame, platform, DefaultHandler::Unhandled.panic_message())
}

fn halt_with_dump<P: Platform>(frame: &InterruptFrame, platform: &P, reason: &str) -> ! {
    dump_interrupt_frame(frame);
    dump_cpu_state(platform);
    platform.halt(reason)
}

fn page_fault<P: Platform>(frame: &mut InterruptFrame, platform: &P, stacks: &SafeStacks) {
    let address = platform.control_registers().cr2;

    if let Some(owner) = stacks.guard_fault(address) {
        log::error!("FATAL: Exception stack overflow detected via guard page");
        log::error!("  stack: {}  fault address: 0x{:x}", owner, address);
        halt_with_dump(frame, platform, "Exception stack overflow");
    }

    let code = frame.error_code;
    log::error!("EXCEPTION: Page Fault at 0x{:x} (rip 0x{:x})", address, frame.rip);
    log::error!(
        "  {} {} in {} mode{}{}",
        if code & PF_PRESENT != 0 { "protection violation" } else { "page not present" },
        if code & PF_WRITE != 0 { "on write" } else { "on read" },
        if code & PF_USER != 0 { "user" } else { "kernel" },
        if code & PF_RESERVED_WRITE != 0 { ", reserved bit set" } else { "" },
        if code & PF_INSTRUCTION_FETCH != 0 { ", instruction fetch" } else { "" },
    );
    halt_with_dump(frame, platform, DefaultHandler::PageFault.panic_message());
}
