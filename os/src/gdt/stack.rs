//! Static kernel stack installed as the ring-0 privilege stack.
//!
//! Lives in .bss, which the bootloader maps as part of the kernel image.

/// Kernel privilege stack size (32 KiB).
pub const KERNEL_STACK_SIZE: usize = 32 * 1024;

/// Stacks grow downward and must be 16-byte aligned.
#[repr(align(16))]
pub struct Stack(pub [u8; KERNEL_STACK_SIZE]);

impl Stack {
    /// Lowest address of the stack.
    pub const fn base_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }

    /// One past the highest address; the initial stack pointer.
    pub fn top_ptr(&self) -> *const u8 {
        self.0.as_ptr_range().end
    }
}

/// Stack used on privilege transitions into ring 0.
static mut KERNEL_STACK: Stack = Stack([0; KERNEL_STACK_SIZE]);

/// Top address of the kernel privilege stack.
pub fn kernel_stack_top() -> u64 {
    // SAFETY: only the address is taken; no reference to the mutable static escapes.
    unsafe { (*(&raw const KERNEL_STACK)).top_ptr() as u64 }
}

/// Base address of the kernel privilege stack.
pub fn kernel_stack_base() -> u64 {
    // SAFETY: as above.
    unsafe { (*(&raw const KERNEL_STACK)).base_ptr() as u64 }
}
