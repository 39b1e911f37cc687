//! Segment descriptor table and task-state segment.
//!
//! Long mode ignores segment bases and limits for code and data, so the table
//! is minimal:
//! - null descriptor (index 0, required)
//! - kernel code segment (ring 0, 64-bit)
//! - kernel data segment (ring 0)
//! - task-state descriptor (16 bytes, occupies indices 3 and 4)
//!
//! The task-state block provides the ring-0 stack and the IST slots used by
//! the safe stacks.

pub mod descriptor;
pub mod stack;
pub mod tss;


use x86_64::structures::gdt::{Descriptor, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::structures::DescriptorTablePointer;
use x86_64::{PrivilegeLevel, VirtAddr};

use crate::platform::Platform;
use crate::sync::SyncUnsafeCell;

use self::descriptor::{DescriptorTable, SegmentEntries};
pub use self::tss::IstError;

/// Selectors for the fixed table layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selectors {
    pub code_selector: SegmentSelector,
    pub data_selector: SegmentSelector,
    pub tss_selector: SegmentSelector,
}

impl Selectors {
    pub const KERNEL: Self = Self {
        code_selector: SegmentSelector::new(1, PrivilegeLevel::Ring0),
        data_selector: SegmentSelector::new(2, PrivilegeLevel::Ring0),
        tss_selector: SegmentSelector::new(3, PrivilegeLevel::Ring0),
    };
}

/// Kernel code selector as written into every gate.
pub const KERNEL_CODE_SELECTOR: u16 = Selectors::KERNEL.code_selector.0;

/// Owner of the segment table and the task-state block.
///
/// Both live inside this object so the task-state descriptor can point at
/// the block's final address; the owner must therefore be `'static` before
/// [`SegmentTable::init`] runs.
pub struct SegmentTable {
    table: SyncUnsafeCell<DescriptorTable>,
    tss: SyncUnsafeCell<TaskStateSegment>,
}

impl SegmentTable {
    pub const fn new() -> Self {
        Self {
            table: SyncUnsafeCell::new(DescriptorTable::empty()),
            tss: SyncUnsafeCell::new(TaskStateSegment::new()),
        }
    }

    /// Build the table, install the ring-0 stack, and load everything into
    /// the CPU (GDTR, all segment registers, TR).
    pub fn init<P: Platform>(&'static self, platform: &P, kernel_stack_top: u64) {
        log::debug!("gdt: building segment table");

        // SAFETY: single-threaded boot; nothing has loaded these tables yet.
        let selectors = unsafe {
            let tss = &mut *self.tss.get();
            *tss = TaskStateSegment::new();
            tss.privilege_stack_table[0] = VirtAddr::new_truncate(kernel_stack_top);

            let table = &mut *self.table.get();
            *table = DescriptorTable::empty();
            Selectors {
                code_selector: table.append(Descriptor::kernel_code_segment()),
                data_selector: table.append(Descriptor::kernel_data_segment()),
                // The block lives in this 'static owner, so it outlives the descriptor.
                tss_selector: table.append(Descriptor::tss_segment_unchecked(self.tss.get())),
            }
        };
        debug_assert_eq!(selectors, Selectors::KERNEL);

        let pointer = self.pointer();
        // SAFETY: the table is 'static and fully populated; the selectors index it.
        unsafe { platform.load_segment_table(&pointer, &selectors) };

        self.log_info();
    }

    /// Install `stack_top` in IST slot `slot` (1..=7).
    ///
    /// Out-of-range slots are logged and ignored.
    pub fn set_ist(&self, slot: u8, stack_top: u64) -> Result<(), IstError> {
        // SAFETY: IST slots are only written by safe-stack init, with
        // interrupts disabled and no other writer.
        let result = unsafe { tss::write_ist(&mut *self.tss.get(), slot, stack_top) };
        if let Err(err) = result {
            log::warn!("gdt: ignoring IST update: {}", err);
        }
        result
    }

    /// Descriptor-table pointer for `lgdt`.
    pub fn pointer(&self) -> DescriptorTablePointer {
        // SAFETY: plain read of init-only data.
        let table = unsafe { &*self.table.get() };
        DescriptorTablePointer {
            limit: table.limit(),
            base: VirtAddr::new_truncate(table.entries().as_ptr() as u64),
        }
    }

    /// Copy of the current table contents.
    pub fn entries(&self) -> SegmentEntries {
        // SAFETY: plain read of init-only data.
        SegmentEntries::read(unsafe { (*self.table.get()).entries() })
    }

    /// Address of the live task-state block.
    pub fn tss_address(&self) -> u64 {
        self.tss.get() as u64
    }

    /// Ring-0 stack pointer stored in the task-state block.
    pub fn kernel_stack(&self) -> u64 {
        // SAFETY: plain read of init-only data.
        unsafe { (*self.tss.get()).privilege_stack_table[0].as_u64() }
    }

    /// Copy of the IST array; index 0 holds slot 1.
    pub fn ist_entries(&self) -> [u64; 7] {
        // SAFETY: plain read of init-only data.
        unsafe { tss::ist_entries(&*self.tss.get()) }
    }

    fn log_info(&self) {
        let selectors = Selectors::KERNEL;
        log::info!(
            "gdt: loaded at 0x{:x}, code 0x{:x}, data 0x{:x}, tss 0x{:x}",
            self.pointer().base.as_u64(),
            selectors.code_selector.0,
            selectors.data_selector.0,
            selectors.tss_selector.0
        );
        // SAFETY: plain read of init-only data.
        unsafe { tss::log_tss_info(&*self.tss.get()) };
    }
}

impl Default for SegmentTable {
    fn default() -> Self {
        Self::new()
    }
}
