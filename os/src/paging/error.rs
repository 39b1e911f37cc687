//! Error types for paging operations

use x86_64::VirtAddr;

/// Paging operation errors with enough context to log a useful message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// Frame allocator has no more frames available
    OutOfFrames,

    /// The bootloader did not map physical memory, so frames cannot be zeroed
    NoPhysicalMemoryMap,

    /// Page table update failed (intermediate table allocation or bad parent entry)
    MapFailed,

    /// Flag combination not allowed for the target address range
    InvalidFlags,

    /// Page is already mapped to a frame
    AlreadyMapped {
        /// Start of the page that already has a mapping
        addr: VirtAddr,
    },

    /// Address is not aligned to page boundary
    Misaligned {
        /// The misaligned address
        addr: u64,
        /// Required alignment (4096 for 4 KiB pages)
        required: u64,
    },
}

impl PagingError {
    /// Returns a human-readable description of the error
    pub fn description(&self) -> &'static str {
        match self {
            Self::OutOfFrames => "physical memory exhausted",
            Self::NoPhysicalMemoryMap => "physical memory is not mapped by the bootloader",
            Self::MapFailed => "page mapping operation failed",
            Self::InvalidFlags => "invalid page table flags combination",
            Self::AlreadyMapped { .. } => "page is already mapped",
            Self::Misaligned { .. } => "address is not properly aligned",
        }
    }
}

/// Convenience type alias for Results with PagingError
pub type PagingResult<T> = Result<T, PagingError>;

impl core::fmt::Display for PagingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyMapped { addr } => {
                write!(f, "{}: page at 0x{:x}", self.description(), addr.as_u64())
            }
            Self::Misaligned { addr, required } => {
                write!(
                    f,
                    "{}: address 0x{:x} must be aligned to 0x{:x}",
                    self.description(),
                    addr,
                    required
                )
            }
            _ => write!(f, "{}", self.description()),
        }
    }
}
