//! Interrupt vector table.
//!
//! Every wired vector points at an assembly trampoline that builds an
//! [`crate::trap::InterruptFrame`] and enters the dispatcher; policy lives
//! there, not here. Requires the segment table (code selector) and, for
//! protected vectors, IST slots registered by the safe stacks.

pub mod gate;
pub mod vectors;

use x86_64::structures::DescriptorTablePointer;
use x86_64::VirtAddr;

use crate::gdt::{IstError, KERNEL_CODE_SELECTOR};
use crate::platform::Platform;
use crate::sync::SyncUnsafeCell;

pub use self::gate::{GateDescriptor, GateType};
use self::vectors::{EXCEPTION_BREAKPOINT, EXCEPTION_OVERFLOW, VECTOR_COUNT};

#[repr(C, align(16))]
struct GateTable([GateDescriptor; VECTOR_COUNT]);

/// Owner of the 256-entry gate table.
pub struct VectorTable {
    gates: SyncUnsafeCell<GateTable>,
}

impl VectorTable {
    pub const fn new() -> Self {
        Self {
            gates: SyncUnsafeCell::new(GateTable([GateDescriptor::missing(); VECTOR_COUNT])),
        }
    }

    /// Zero the table and install a gate for every wired vector.
    ///
    /// Returns the number of installed gates.
    pub fn init<P: Platform>(&'static self, platform: &P) -> usize {
        // SAFETY: the table is not loaded yet; raw byte fill leaves every gate
        // non-present, so uninstalled vectors fault cleanly.
        unsafe {
            core::ptr::write_bytes(self.gates.get().cast::<u8>(), 0, core::mem::size_of::<GateTable>());
        }

        let mut installed = 0;
        for vector in 0..=u8::MAX {
            if !vectors::is_wired(vector) {
                continue;
            }
            let Some(entry) = platform.trampoline(vector) else {
                log::warn!("idt: no trampoline for wired vector {}", vector);
                continue;
            };
            let gate_type = match vector {
                EXCEPTION_BREAKPOINT | EXCEPTION_OVERFLOW => GateType::Trap,
                _ => GateType::Interrupt,
            };
            self.set_gate(vector, entry, KERNEL_CODE_SELECTOR, gate_type);
            installed += 1;
        }

        let pointer = self.pointer();
        log::debug!(
            "idt: table at 0x{:x}, limit 0x{:x}",
            pointer.base.as_u64(),
            pointer.limit
        );
        installed
    }

    /// Overwrite the gate for `vector`. IST is reset to 0.
    pub fn set_gate(&self, vector: u8, handler: u64, selector: u16, gate_type: GateType) {
        // SAFETY: only called from init paths on a single core.
        unsafe {
            (*self.gates.get()).0[usize::from(vector)] = GateDescriptor::new(handler, selector, gate_type);
        }
    }

    /// Route `vector` through IST slot `ist_index` (0 disables IST).
    ///
    /// Indices above 7 are logged and ignored.
    pub fn set_ist(&self, vector: u8, ist_index: u8) -> Result<(), IstError> {
        if ist_index > 7 {
            log::warn!("idt: invalid IST index {} for vector {}", ist_index, vector);
            return Err(IstError::IndexOutOfRange { index: ist_index });
        }
        // SAFETY: single-core init path; the gate is a plain in-memory write.
        unsafe { (*self.gates.get()).0[usize::from(vector)].set_ist(ist_index) };
        Ok(())
    }

    /// Copy of the gate for `vector`.
    pub fn gate(&self, vector: u8) -> GateDescriptor {
        // SAFETY: plain read.
        unsafe { (*self.gates.get()).0[usize::from(vector)] }
    }

    pub fn pointer(&self) -> DescriptorTablePointer {
        DescriptorTablePointer {
            limit: (core::mem::size_of::<GateTable>() - 1) as u16,
            base: VirtAddr::new_truncate(self.gates.get() as u64),
        }
    }

    /// Activate the table. Run after every gate and IST field is final.
    pub fn load<P: Platform>(&'static self, platform: &P) {
        let pointer = self.pointer();
        // SAFETY: the table is 'static and populated.
        unsafe { platform.load_vector_table(&pointer) };
        log::info!("idt: loaded at 0x{:x}", pointer.base.as_u64());
    }
}

impl Default for VectorTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{leak, FakePlatform};

    fn initialized() -> (&'static VectorTable, FakePlatform, usize) {
        let table: &'static VectorTable = leak(VectorTable::new());
        let platform = FakePlatform::healthy();
        let installed = table.init(&platform);
        (table, platform, installed)
    }

    #[test]
    fn wires_exceptions_and_irqs_only() {
        let (table, platform, installed) = initialized();
        assert_eq!(installed, 36);

        for vector in 0..=u8::MAX {
            let gate = table.gate(vector);
            if vectors::is_wired(vector) {
                assert!(gate.is_present(), "vector {vector} should be present");
                assert_eq!(gate.selector(), KERNEL_CODE_SELECTOR);
                assert_eq!(Some(gate.handler_address()), platform.trampoline(vector));
                assert_eq!(gate.ist(), 0);
                assert_eq!(gate.dpl(), 0);
            } else {
                assert_eq!(gate, GateDescriptor::missing(), "vector {vector} should be empty");
            }
        }
    }

    #[test]
    fn breakpoint_and_overflow_use_trap_gates() {
        let (table, _, _) = initialized();
        assert_eq!(table.gate(3).gate_type(), Some(GateType::Trap));
        assert_eq!(table.gate(4).gate_type(), Some(GateType::Trap));
        assert_eq!(table.gate(14).gate_type(), Some(GateType::Interrupt));
        assert_eq!(table.gate(32).gate_type(), Some(GateType::Interrupt));
    }

    #[test]
    fn reinit_clears_stale_gates() {
        let (table, platform, _) = initialized();
        table.set_gate(200, 0xDEAD_0000, 0x08, GateType::Interrupt);
        table.set_ist(14, 4).unwrap();
        table.init(&platform);
        assert!(!table.gate(200).is_present());
        assert_eq!(table.gate(14).ist(), 0);
    }

    #[test]
    fn ist_index_is_validated() {
        let (table, _, _) = initialized();
        assert_eq!(table.set_ist(8, 1), Ok(()));
        assert_eq!(table.gate(8).ist(), 1);

        assert_eq!(table.set_ist(8, 9), Err(IstError::IndexOutOfRange { index: 9 }));
        assert_eq!(table.gate(8).ist(), 1);
    }

    #[test]
    fn load_passes_table_pointer() {
        let (table, platform, _) = initialized();
        table.load(&platform);
        assert_eq!(platform.loaded_vector_table(), Some(table.pointer().base.as_u64()));
        assert_eq!(table.pointer().limit, 4095);
    }
}
