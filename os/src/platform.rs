//! Hardware access seam.
//!
//! Every privileged instruction the trap layer needs is a method here. The
//! kernel implements it with real instructions (`arch::x86_64::X86Platform`);
//! host tests implement it with plain data.

use x86_64::structures::DescriptorTablePointer;

use crate::gdt::Selectors;

/// Snapshot of the control registers relevant to trap handling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlRegisters {
    pub cr0: u64,
    /// Faulting linear address of the most recent page fault.
    pub cr2: u64,
    pub cr3: u64,
    pub cr4: u64,
    pub efer: u64,
}

/// Output registers of one `cpuid` leaf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuidLeaf {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

pub trait Platform: Sync {
    fn control_registers(&self) -> ControlRegisters;

    fn cpuid(&self, leaf: u32) -> CpuidLeaf;

    /// Address of the code currently executing.
    fn instruction_pointer(&self) -> u64;

    fn stack_pointer(&self) -> u64;

    /// Volatile read of a kernel static holding [`crate::verify::KERNEL_PROBE_MAGIC`].
    fn read_kernel_probe(&self) -> u64;

    /// Entry trampoline for `vector`, if one exists.
    fn trampoline(&self, vector: u8) -> Option<u64>;

    /// Load the segment table, reload every segment register and load the
    /// task register.
    ///
    /// # Safety
    /// `table` must describe a valid descriptor table that stays alive and in
    /// place for the rest of the kernel's lifetime, and `selectors` must index it.
    unsafe fn load_segment_table(&self, table: &DescriptorTablePointer, selectors: &Selectors);

    /// Load the vector table register.
    ///
    /// # Safety
    /// `table` must describe a valid, `'static` 256-entry gate table.
    unsafe fn load_vector_table(&self, table: &DescriptorTablePointer);

    /// Fatal-abort service. Never returns.
    fn halt(&self, reason: &str) -> !;
}
