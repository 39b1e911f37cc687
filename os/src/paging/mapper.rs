//! Page mapping utilities
//!
//! Low-level helpers for writing kernel mappings into the active tables.
//! Physical frames are only ever touched through the physical-memory offset.

use super::{PagingError, PagingResult};
use x86_64::{
    structures::paging::{
        mapper::MapToError, FrameAllocator, Mapper, Page, PageSize, PageTableFlags as Flags, PhysFrame,
        Size4KiB,
    },
    PhysAddr, VirtAddr,
};

/// Zeros a physical frame through the physical-memory window.
///
/// # Safety
/// - Frame must be valid and not currently in use
/// - `phys_offset` must map all of physical memory
#[inline]
pub unsafe fn zero_frame(frame: PhysAddr, phys_offset: VirtAddr) {
    let virt_addr = phys_offset.as_u64() + frame.as_u64();
    core::ptr::write_bytes(virt_addr as *mut u8, 0, Size4KiB::SIZE as usize);
}

/// Validates that an address is aligned to a 4 KiB page boundary.
#[inline]
pub fn validate_alignment(addr: u64) -> PagingResult<()> {
    if addr % Size4KiB::SIZE != 0 {
        return Err(PagingError::Misaligned {
            addr,
            required: Size4KiB::SIZE,
        });
    }
    Ok(())
}

/// Kernel mappings must be present and never user accessible.
#[inline]
pub fn validate_kernel_flags(flags: Flags) -> PagingResult<()> {
    if !flags.contains(Flags::PRESENT) || flags.contains(Flags::USER_ACCESSIBLE) {
        return Err(PagingError::InvalidFlags);
    }
    Ok(())
}

/// Maps one kernel page to `frame` and flushes its TLB entry.
///
/// # Safety
/// - `frame` must not be mapped anywhere else
/// - Must not race with other updates of the same tables
pub unsafe fn map_kernel_page<M>(
    mapper: &mut M,
    frame_allocator: &mut impl FrameAllocator<Size4KiB>,
    page: VirtAddr,
    frame: PhysAddr,
    flags: Flags,
) -> PagingResult<()>
where
    M: Mapper<Size4KiB>,
{
    validate_alignment(page.as_u64())?;
    validate_alignment(frame.as_u64())?;
    validate_kernel_flags(flags)?;

    let page = Page::<Size4KiB>::containing_address(page);
    let frame = PhysFrame::containing_address(frame);

    mapper
        .map_to(page, frame, flags, frame_allocator)
        .map_err(|err| match err {
            MapToError::FrameAllocationFailed => PagingError::OutOfFrames,
            MapToError::PageAlreadyMapped(_) => PagingError::AlreadyMapped {
                addr: page.start_address(),
            },
            MapToError::ParentEntryHugePage => PagingError::MapFailed,
        })?
        .flush();
    Ok(())
}
