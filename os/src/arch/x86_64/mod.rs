//! Real hardware behind [`Platform`].

pub mod pic;
pub mod trampolines;

use core::arch::global_asm;

use x86_64::instructions::segmentation::{Segment, CS, DS, ES, FS, GS, SS};
use x86_64::instructions::tables::{lgdt, lidt, load_tss};
use x86_64::instructions::{hlt, interrupts};
use x86_64::registers::control::{Cr0, Cr2, Cr3, Cr4};
use x86_64::registers::model_specific::Efer;
use x86_64::structures::DescriptorTablePointer;

use crate::gdt::Selectors;
use crate::platform::{ControlRegisters, CpuidLeaf, Platform};
use crate::verify::KERNEL_PROBE_MAGIC;

/// Kernel static read back by the memory-layout check.
#[used]
static KERNEL_PROBE: u64 = KERNEL_PROBE_MAGIC;

extern "C" {
    /// Returns the caller's stack pointer at the call instruction.
    fn bastion_caller_rsp() -> u64;
}

// rsp + 8 skips the return address, giving the caller's rsp before `call`,
// which the ABI keeps 16-byte aligned.
global_asm!(
    r#"
.pushsection .text.bastion_caller_rsp, "ax"
.global bastion_caller_rsp
bastion_caller_rsp:
    lea rax, [rsp + 8]
    ret
.popsection
"#
);

#[derive(Debug, Clone, Copy, Default)]
pub struct X86Platform;

impl Platform for X86Platform {
    fn control_registers(&self) -> ControlRegisters {
        ControlRegisters {
            cr0: Cr0::read_raw(),
            cr2: Cr2::read_raw(),
            cr3: Cr3::read().0.start_address().as_u64(),
            cr4: Cr4::read_raw(),
            efer: Efer::read_raw(),
        }
    }

    #[allow(unused_unsafe)]
    fn cpuid(&self, leaf: u32) -> CpuidLeaf {
        // SAFETY: cpuid is available on every x86_64 CPU.
        let result = unsafe { core::arch::x86_64::__cpuid(leaf) };
        CpuidLeaf {
            eax: result.eax,
            ebx: result.ebx,
            ecx: result.ecx,
            edx: result.edx,
        }
    }

    #[inline(never)]
    fn instruction_pointer(&self) -> u64 {
        x86_64::instructions::read_rip().as_u64()
    }

    fn stack_pointer(&self) -> u64 {
        // SAFETY: reads rsp, touches nothing else.
        unsafe { bastion_caller_rsp() }
    }

    fn read_kernel_probe(&self) -> u64 {
        // SAFETY: KERNEL_PROBE is a valid, aligned static.
        unsafe { core::ptr::read_volatile(&KERNEL_PROBE) }
    }

    fn trampoline(&self, vector: u8) -> Option<u64> {
        trampolines::address(vector)
    }

    unsafe fn load_segment_table(&self, table: &DescriptorTablePointer, selectors: &Selectors) {
        lgdt(table);
        CS::set_reg(selectors.code_selector);
        DS::set_reg(selectors.data_selector);
        ES::set_reg(selectors.data_selector);
        FS::set_reg(selectors.data_selector);
        GS::set_reg(selectors.data_selector);
        SS::set_reg(selectors.data_selector);
        load_tss(selectors.tss_selector);
    }

    unsafe fn load_vector_table(&self, table: &DescriptorTablePointer) {
        lidt(table);
    }

    fn halt(&self, reason: &str) -> ! {
        interrupts::disable();
        log::error!("HALT: {}", reason);
        loop {
            hlt();
        }
    }
}
