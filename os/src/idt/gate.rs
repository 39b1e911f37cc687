//! 16-byte gate descriptors.

use static_assertions::const_assert_eq;

/// Present bit of the attribute byte.
const GATE_PRESENT: u8 = 0x80;

/// Gate kind in the low nibble of the attribute byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GateType {
    /// Clears IF on entry.
    Interrupt = 0xE,
    /// Leaves IF untouched; used for software-raised vectors.
    Trap = 0xF,
}

/// One vector-table entry in the CPU's layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateDescriptor {
    offset_low: u16,
    selector: u16,
    ist: u8,
    attributes: u8,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

const_assert_eq!(core::mem::size_of::<GateDescriptor>(), 16);

impl GateDescriptor {
    pub const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            ist: 0,
            attributes: 0,
            offset_mid: 0,
            offset_high: 0,
            reserved: 0,
        }
    }

    /// Present ring-0 gate with no IST.
    pub const fn new(handler: u64, selector: u16, gate_type: GateType) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector,
            ist: 0,
            attributes: GATE_PRESENT | gate_type as u8,
            offset_mid: ((handler >> 16) & 0xFFFF) as u16,
            offset_high: (handler >> 32) as u32,
            reserved: 0,
        }
    }

    pub fn handler_address(&self) -> u64 {
        u64::from(self.offset_low) | (u64::from(self.offset_mid) << 16) | (u64::from(self.offset_high) << 32)
    }

    pub fn selector(&self) -> u16 {
        self.selector
    }

    pub fn is_present(&self) -> bool {
        self.attributes & GATE_PRESENT != 0
    }

    pub fn gate_type(&self) -> Option<GateType> {
        match self.attributes & 0xF {
            0xE => Some(GateType::Interrupt),
            0xF => Some(GateType::Trap),
            _ => None,
        }
    }

    /// Descriptor privilege level (0 for every gate this crate installs).
    pub fn dpl(&self) -> u8 {
        (self.attributes >> 5) & 0x3
    }

    pub fn ist(&self) -> u8 {
        self.ist & 0x7
    }

    pub(super) fn set_ist(&mut self, index: u8) {
        self.ist = index & 0x7;
    }
}
