use bootloader_api::info::Optional;
use bootloader_api::BootInfo;
use x86_64::registers::control::Cr3;
use x86_64::structures::paging::{FrameAllocator, OffsetPageTable, PageTable, PageTableFlags};
use x86_64::{PhysAddr, VirtAddr};

use super::mapper::{self, map_kernel_page, validate_alignment};
use super::{EarlyFrameAllocator, PagingError, PagingResult};
use crate::safe_stack::StackMemory;

/// The bootloader's address space plus a frame source, enough to map the
/// safe stacks.
pub struct KernelMemory {
    mapper: OffsetPageTable<'static>,
    frames: EarlyFrameAllocator,
    phys_offset: VirtAddr,
}

impl KernelMemory {
    pub fn frames(&self) -> &EarlyFrameAllocator {
        &self.frames
    }
}

/// Take over the bootloader's page tables.
///
/// # Safety
/// - Paging must be enabled and CR3 must point at the bootloader's PML4
/// - Must be called once; the returned mapper is the only writer of the tables
pub unsafe fn init(boot_info: &'static BootInfo) -> PagingResult<KernelMemory> {
    let kernel_start = boot_info.kernel_addr;
    let kernel_end = boot_info.kernel_addr + boot_info.kernel_len;

    let phys_offset = match boot_info.physical_memory_offset {
        Optional::Some(addr) => VirtAddr::new(addr),
        Optional::None => return Err(PagingError::NoPhysicalMemoryMap),
    };

    if boot_info.memory_regions.is_empty() {
        log::warn!("paging: bootloader reported no memory regions");
    }

    let frames = EarlyFrameAllocator::new(&boot_info.memory_regions, kernel_end);

    let (pml4_frame, _) = Cr3::read();
    let pml4_virt = phys_offset + pml4_frame.start_address().as_u64();
    let pml4 = &mut *pml4_virt.as_mut_ptr::<PageTable>();

    log::info!(
        "paging: kernel 0x{:x}-0x{:x}, physical window 0x{:x}, PML4 0x{:x}",
        kernel_start,
        kernel_end,
        phys_offset.as_u64(),
        pml4_frame.start_address().as_u64()
    );
    log::debug!(
        "paging: {} usable ranges, {} KiB free",
        frames.range_count(),
        frames.free_memory() / 1024
    );

    Ok(KernelMemory {
        mapper: OffsetPageTable::new(pml4, phys_offset),
        frames,
        phys_offset,
    })
}

impl StackMemory for KernelMemory {
    fn allocate_frame(&mut self) -> Option<PhysAddr> {
        self.frames.allocate_frame().map(|frame| frame.start_address())
    }

    fn zero_frame(&mut self, frame: PhysAddr) -> PagingResult<()> {
        validate_alignment(frame.as_u64())?;
        // SAFETY: the frame was just handed out by our allocator and the
        // bootloader maps all physical memory at `phys_offset`.
        unsafe { mapper::zero_frame(frame, self.phys_offset) };
        Ok(())
    }

    fn map_page(&mut self, page: VirtAddr, frame: PhysAddr, flags: PageTableFlags) -> PagingResult<()> {
        // SAFETY: frames come from our allocator and are never mapped twice;
        // boot is single-threaded.
        unsafe { map_kernel_page(&mut self.mapper, &mut self.frames, page, frame, flags) }
    }
}
