//! Segment descriptor table storage and read-back.
//!
//! The table itself is the `x86_64` crate's `GlobalDescriptorTable`; this
//! module sizes it for the fixed layout and decodes the raw entries again so
//! the installed base and limit can be inspected.

use static_assertions::const_assert_eq;
use x86_64::structures::gdt::{DescriptorFlags, Entry, GlobalDescriptorTable};
use x86_64::structures::tss::TaskStateSegment;

/// Entry count: null, code, data and the two halves of the task-state descriptor.
pub const GDT_ENTRIES: usize = 5;

pub type DescriptorTable = GlobalDescriptorTable<GDT_ENTRIES>;

pub const KERNEL_CODE_SEGMENT: u64 = DescriptorFlags::KERNEL_CODE64.bits();
pub const KERNEL_DATA_SEGMENT: u64 = DescriptorFlags::KERNEL_DATA.bits();

/// Type field of an available 64-bit task-state descriptor, with the present bit.
const ACCESS_TSS_AVAILABLE: u8 = 0x89;

const_assert_eq!(core::mem::size_of::<Entry>(), 8);
const_assert_eq!(core::mem::size_of::<TaskStateSegment>(), 104);

/// Decoded 16-byte system descriptor pointing at a task-state block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TssDescriptor {
    low: u64,
    high: u64,
}

impl TssDescriptor {
    pub const fn from_raw(low: u64, high: u64) -> Self {
        Self { low, high }
    }

    /// Reassemble the base address from its split fields.
    pub fn base(&self) -> u64 {
        let low = (self.low >> 16) & 0xFF_FFFF;
        let high = (self.low >> 56) & 0xFF;
        let upper = self.high & 0xFFFF_FFFF;
        low | (high << 24) | (upper << 32)
    }

    pub fn limit(&self) -> u32 {
        let low = (self.low & 0xFFFF) as u32;
        let high = ((self.low >> 48) & 0xF) as u32;
        low | (high << 16)
    }

    pub fn access(&self) -> u8 {
        (self.low >> 40) as u8
    }

    pub fn is_available_tss(&self) -> bool {
        self.access() == ACCESS_TSS_AVAILABLE
    }
}

/// Raw view of the installed table: null, kernel code, kernel data, task state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentEntries {
    pub null: u64,
    pub code: u64,
    pub data: u64,
    pub tss: TssDescriptor,
}

impl SegmentEntries {
    /// Read back the populated entries; missing ones read as zero.
    pub fn read(entries: &[Entry]) -> Self {
        let raw = |index: usize| entries.get(index).map_or(0, Entry::raw);
        Self {
            null: raw(0),
            code: raw(1),
            data: raw(2),
            tss: TssDescriptor::from_raw(raw(3), raw(4)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x86_64::structures::gdt::Descriptor;

    #[test]
    fn flat_segments_match_reference_encodings() {
        assert_eq!(KERNEL_CODE_SEGMENT, 0x00AF_9B00_0000_FFFF);
        assert_eq!(KERNEL_DATA_SEGMENT, 0x00CF_9300_0000_FFFF);
    }

    #[test]
    fn tss_descriptor_splits_base_and_limit() {
        static TSS: TaskStateSegment = TaskStateSegment::new();
        let Descriptor::SystemSegment(low, high) = Descriptor::tss_segment(&TSS) else {
            panic!("task-state descriptor must be a system segment");
        };
        let desc = TssDescriptor::from_raw(low, high);
        assert_eq!(desc.base(), &TSS as *const _ as u64);
        assert_eq!(desc.limit(), 103);
        assert!(desc.is_available_tss());
    }

    #[test]
    fn split_fields_reassemble() {
        let base = 0xFFFF_8000_1234_5678_u64;
        let low = 0x0067 | ((base & 0xFF_FFFF) << 16) | (0x89 << 40) | ((base >> 24) & 0xFF) << 56;
        let desc = TssDescriptor::from_raw(low, base >> 32);
        assert_eq!(desc.base(), base);
        assert_eq!(desc.limit(), 0x67);
        assert_eq!(desc.access(), 0x89);
    }

    #[test]
    fn short_tables_read_as_zero() {
        let table = DescriptorTable::empty();
        assert_eq!(SegmentEntries::read(table.entries()), SegmentEntries::default());
    }
}
