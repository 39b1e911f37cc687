//! Physical frame allocator
//!
//! Hands out 4 KiB frames from the `Usable` regions of the bootloader memory
//! map. Frames are never returned; the safe stacks and the page tables that
//! map them live for the whole kernel lifetime.

use bootloader_api::info::{MemoryRegion, MemoryRegionKind};
use x86_64::{
    addr::{align_down, align_up},
    structures::paging::{FrameAllocator, PageSize, PhysFrame, Size4KiB},
    PhysAddr,
};

const MAX_USABLE_RANGES: usize = 32;

/// Lowest physical address ever handed out (BIOS data, VGA, null page).
const LOW_MEMORY_END: u64 = 0x10_0000;

pub struct EarlyFrameAllocator {
    /// Remaining `(start, end)` ranges, page-aligned, end exclusive.
    ranges: [(u64, u64); MAX_USABLE_RANGES],
    len: usize,
    /// Range to try first on the next allocation.
    next: usize,
    allocated: u64,
}

impl EarlyFrameAllocator {
    /// Builds the allocator from the bootloader memory map.
    ///
    /// Everything below `reserved_end` (at least 1 MiB) is skipped. Ranges
    /// beyond the 32nd usable region are ignored.
    ///
    /// # Safety
    /// `memory_regions` must describe physical RAM accurately and every
    /// frame it marks usable must really be unused.
    pub unsafe fn new(memory_regions: &[MemoryRegion], reserved_end: u64) -> Self {
        let page_size = Size4KiB::SIZE;
        let reserved_end = reserved_end.max(LOW_MEMORY_END);
        let mut ranges = [(0u64, 0u64); MAX_USABLE_RANGES];
        let mut len = 0usize;

        for region in memory_regions {
            if region.kind != MemoryRegionKind::Usable {
                continue;
            }

            let start = align_up(region.start, page_size).max(reserved_end);
            let end = align_down(region.end, page_size);
            if start >= end {
                continue;
            }

            if len == MAX_USABLE_RANGES {
                log::warn!("paging: dropping usable region 0x{:x}-0x{:x}", start, end);
                continue;
            }
            ranges[len] = (start, end);
            len += 1;
        }

        Self {
            ranges,
            len,
            next: 0,
            allocated: 0,
        }
    }

    #[inline]
    pub fn range_count(&self) -> usize {
        self.len
    }

    /// Bytes still available.
    pub fn free_memory(&self) -> u64 {
        self.ranges[..self.len].iter().map(|(start, end)| end - start).sum()
    }

    /// Bytes handed out so far.
    pub fn allocated_memory(&self) -> u64 {
        self.allocated * Size4KiB::SIZE
    }
}

unsafe impl FrameAllocator<Size4KiB> for EarlyFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        let n = self.len;
        for j in 0..n {
            let i = (self.next + j) % n;
            let (start, end) = &mut self.ranges[i];
            if *start < *end {
                self.next = i;
                let addr = PhysAddr::new(*start);
                *start += Size4KiB::SIZE;
                self.allocated += 1;
                return Some(PhysFrame::containing_address(addr));
            }
        }
        None
    }
}
