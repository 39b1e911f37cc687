//! Task-state block helpers.
//!
//! On x86_64 the task-state block only carries stack pointers: the ring-0
//! stack used on privilege transitions and the seven IST slots the CPU
//! switches to for gates with a non-zero IST field.

use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

/// Highest IST slot number. Slot 0 means "no IST" and has no storage.
pub const IST_SLOTS: u8 = 7;

/// Reasons an IST slot write was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IstError {
    /// Slot outside `1..=7`.
    SlotOutOfRange { slot: u8 },
    /// IST index above 7 for a gate.
    IndexOutOfRange { index: u8 },
    /// Stack top is not a canonical address.
    NonCanonical { addr: u64 },
}

impl IstError {
    pub fn description(&self) -> &'static str {
        match self {
            Self::SlotOutOfRange { .. } => "IST slot outside 1..=7",
            Self::IndexOutOfRange { .. } => "IST index above 7",
            Self::NonCanonical { .. } => "stack top is not canonical",
        }
    }
}

impl core::fmt::Display for IstError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::SlotOutOfRange { slot } => write!(f, "{}: slot {}", self.description(), slot),
            Self::IndexOutOfRange { index } => write!(f, "{}: index {}", self.description(), index),
            Self::NonCanonical { addr } => write!(f, "{}: 0x{:x}", self.description(), addr),
        }
    }
}

/// Write `stack_top` into IST slot `slot` (1-based).
pub fn write_ist(tss: &mut TaskStateSegment, slot: u8, stack_top: u64) -> Result<(), IstError> {
    if slot == 0 || slot > IST_SLOTS {
        return Err(IstError::SlotOutOfRange { slot });
    }
    let top = VirtAddr::try_new(stack_top).map_err(|_| IstError::NonCanonical { addr: stack_top })?;
    tss.interrupt_stack_table[usize::from(slot - 1)] = top;
    Ok(())
}

/// Copy of the IST array (index 0 holds slot 1).
pub fn ist_entries(tss: &TaskStateSegment) -> [u64; 7] {
    let table = tss.interrupt_stack_table;
    table.map(VirtAddr::as_u64)
}

/// Log the ring-0 stack and every populated IST slot.
pub fn log_tss_info(tss: &TaskStateSegment) {
    let rsp0 = tss.privilege_stack_table[0];
    log::info!("tss: ring-0 stack 0x{:x}", rsp0.as_u64());
    for (index, top) in ist_entries(tss).iter().enumerate() {
        if *top != 0 {
            log::info!("tss: IST{} 0x{:x}", index + 1, top);
        }
    }
}
