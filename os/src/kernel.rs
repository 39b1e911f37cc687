//! Boot sequence of the kernel image.

use bootloader_api::BootInfo;
use x86_64::instructions::{hlt, interrupts};

use crate::arch::x86_64::{pic, X86Platform};
use crate::config::{SafeStackLayout, VerifierConfig};
use crate::gdt::stack;
use crate::paging::{self, KernelMemory, PagingError};
use crate::trap::{InterruptFrame, TrapSubsystem};
use crate::{logger, verify};

/// The kernel's only trap subsystem. Every trampoline dispatches into it.
pub static TRAPS: TrapSubsystem<X86Platform> = TrapSubsystem::new(X86Platform, SafeStackLayout::KERNEL);

/// Called by the common trampoline tail with interrupts disabled.
pub(crate) extern "C" fn trap_dispatch(frame: &mut InterruptFrame) {
    TRAPS.dispatch(frame);
}

#[derive(Debug)]
pub enum KernelInitError {
    PagingInitFailed(PagingError),
}

impl core::fmt::Display for KernelInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::PagingInitFailed(err) => write!(f, "paging init failed: {}", err),
        }
    }
}

pub struct KernelState {
    pub memory: KernelMemory,
}

/// Verify the environment, arm the trap path and enable interrupts.
///
/// Verification and safe-stack failures halt inside; only paging setup
/// errors are returned.
pub fn early_init(boot_info: &'static BootInfo) -> Result<KernelState, KernelInitError> {
    logger::init();
    log::info!("bastion: kernel running, log level {}", logger::level());

    interrupts::disable();
    verify::complete_system_verification(TRAPS.platform(), &VerifierConfig::KERNEL);

    // SAFETY: paging is on (just verified) and this is the only caller.
    let mut memory = unsafe { paging::init(boot_info) }.map_err(KernelInitError::PagingInitFailed)?;

    TRAPS.init(&mut memory, stack::kernel_stack_top());
    log::info!(
        "paging: {} KiB left after safe stacks ({} KiB taken)",
        memory.frames().free_memory() / 1024,
        memory.frames().allocated_memory() / 1024
    );
    pic::init();
    interrupts::enable();
    log::info!("bastion: interrupts enabled");

    #[cfg(feature = "trap-selftest")]
    {
        let failures = crate::selftest::run(&TRAPS);
        if failures != 0 {
            crate::platform::Platform::halt(TRAPS.platform(), "trap self checks failed");
        }
    }

    Ok(KernelState { memory })
}

pub fn kernel_loop(_state: KernelState) -> ! {
    loop {
        hlt();
    }
}
