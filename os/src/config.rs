//! Compile-time configuration of the trap layer.

use log::LevelFilter;

/// Size of one page of the 4 KiB paging granularity used for safe stacks.
pub const PAGE_SIZE: u64 = 4096;

/// Maximum serial log level.
#[cfg(feature = "verbose-log")]
pub const LOG_LEVEL: LevelFilter = LevelFilter::Trace;
#[cfg(not(feature = "verbose-log"))]
pub const LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// Virtual placement of the guard-paged exception stacks.
///
/// Region `i` occupies `[region_base + i * region_stride, +guard_size + stack_size)`
/// with the guard at the bottom. [`SafeStackLayout::check`] lists the
/// constraints a layout must meet before any stack is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafeStackLayout {
    pub region_base: u64,
    pub region_stride: u64,
    pub guard_size: u64,
    pub stack_size: u64,
}

impl SafeStackLayout {
    /// Layout used by the kernel image: 4 KiB guard + 32 KiB stack per 64 KiB slot,
    /// in the top 2 GiB below the kernel image window.
    pub const KERNEL: Self = Self {
        region_base: 0xFFFF_FFFF_B000_0000,
        region_stride: 0x1_0000,
        guard_size: PAGE_SIZE,
        stack_size: 8 * PAGE_SIZE,
    };

    /// Number of 4 KiB pages backing one stack.
    pub const fn stack_pages(&self) -> u64 {
        self.stack_size / PAGE_SIZE
    }

    /// Reject layouts whose stack tops would not be backed by mapped pages.
    ///
    /// Every field must be page-aligned, the guard and the stack at least one
    /// page each, and a guard plus its stack must fit in one stride for all
    /// `regions` without wrapping the address space.
    pub const fn check(&self, regions: u64) -> Result<(), &'static str> {
        if self.region_base % PAGE_SIZE != 0 || self.region_stride % PAGE_SIZE != 0 {
            return Err("region base and stride must be page-aligned");
        }
        if self.guard_size % PAGE_SIZE != 0 || self.stack_size % PAGE_SIZE != 0 {
            return Err("guard and stack sizes must be whole pages");
        }
        if self.guard_size < PAGE_SIZE {
            return Err("guard must cover at least one page");
        }
        if self.stack_size < PAGE_SIZE {
            return Err("stack must cover at least one page");
        }
        match self.guard_size.checked_add(self.stack_size) {
            Some(span) if span <= self.region_stride => {}
            _ => return Err("guard and stack overflow the region stride"),
        }
        let end = match self.region_stride.checked_mul(regions) {
            Some(total) => self.region_base.checked_add(total),
            None => None,
        };
        if end.is_none() {
            return Err("regions wrap the address space");
        }
        Ok(())
    }
}

/// Address-space thresholds the environment verifier checks against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Lowest address considered part of the higher-half kernel.
    pub higher_half_base: u64,
    /// Stacks below this address are accepted as identity-mapped boot stacks.
    pub low_identity_ceiling: u64,
}

impl VerifierConfig {
    pub const KERNEL: Self = Self {
        higher_half_base: 0xFFFF_8000_0000_0000,
        low_identity_ceiling: 0x4000_0000,
    };
}

/// Bootloader configuration for the kernel image.
///
/// Physical memory must be mapped so safe-stack frames can be zeroed, and the
/// dynamic range starts in the higher half so the relocated kernel, its boot
/// stack and the boot info all pass the address-space checks.
pub static BOOTLOADER_CONFIG: bootloader_api::BootloaderConfig = {
    use bootloader_api::config::Mapping;

    let mut config = bootloader_api::BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config.mappings.dynamic_range_start = Some(VerifierConfig::KERNEL.higher_half_base);
    config.kernel_stack_size = 64 * 1024;
    config
};
