//! Page-layer adapter for the safe stacks.
//!
//! The kernel does not own a page allocator of its own; this module wraps the
//! bootloader's page tables and memory map just far enough to back the
//! exception stacks:
//! - physical frames from the usable regions of the memory map
//! - zeroing through the bootloader's physical-memory window
//! - 4 KiB kernel mappings in the active address space

mod error;
mod frame_allocator;
mod init;
mod mapper;

pub use error::{PagingError, PagingResult};
pub use frame_allocator::EarlyFrameAllocator;
pub use init::{init, KernelMemory};
