//! Boot environment verification.
//!
//! Runs before any descriptor table is touched. Checks are ordered so that a
//! failure is reported at the most basic level it occurs: control registers
//! first (address checks mean nothing with paging off), then the address
//! space, the stack, and finally CPUID feature bits.

use crate::config::VerifierConfig;
use crate::platform::Platform;

const CR0_PE: u64 = 1 << 0; // Protected mode
const CR0_PG: u64 = 1 << 31; // Paging
const CR4_PAE: u64 = 1 << 5; // Physical address extension
const EFER_LME: u64 = 1 << 8; // Long mode enable
const EFER_LMA: u64 = 1 << 10; // Long mode active

const CPUID_FEATURES: u32 = 0x1;
const CPUID_EXT_MAX: u32 = 0x8000_0000;
const CPUID_EXT_FEATURES: u32 = 0x8000_0001;

const FEATURE_PAE: u32 = 1 << 6;
const FEATURE_PGE: u32 = 1 << 13;
const EXT_FEATURE_NX: u32 = 1 << 20;
const EXT_FEATURE_LM: u32 = 1 << 29;

/// End of the user canonical half (exclusive).
pub const USER_SPACE_END: u64 = 0x0000_8000_0000_0000;

/// Value stored in the kernel probe symbol.
pub const KERNEL_PROBE_MAGIC: u64 = 0xB457_10B0_0757_CAFE;

/// Environment checks that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationError {
    PagingDisabled,
    ProtectedModeDisabled,
    PaeDisabled,
    LongModeNotEnabled,
    LongModeInactive,
    /// Kernel code executes from the user half of the address space.
    CodeInUserSpace { rip: u64 },
    /// Kernel code is canonical-high but below the configured kernel base.
    CodeBelowKernelBase { rip: u64 },
    /// Reading the probe symbol returned something other than the magic.
    KernelProbeMismatch { found: u64 },
    NullStack,
    MisalignedStack { rsp: u64 },
    StackOutOfRange { rsp: u64 },
    MissingPae,
    MissingGlobalPages,
    ExtendedLeafMissing { max_leaf: u32 },
    MissingLongMode,
}

impl VerificationError {
    pub fn description(&self) -> &'static str {
        match self {
            Self::PagingDisabled => "paging is disabled (CR0.PG clear)",
            Self::ProtectedModeDisabled => "protected mode is disabled (CR0.PE clear)",
            Self::PaeDisabled => "physical address extension is disabled (CR4.PAE clear)",
            Self::LongModeNotEnabled => "long mode is not enabled (EFER.LME clear)",
            Self::LongModeInactive => "long mode is not active (EFER.LMA clear)",
            Self::CodeInUserSpace { .. } => "kernel code runs in the user address range",
            Self::CodeBelowKernelBase { .. } => "kernel code runs below the higher-half base",
            Self::KernelProbeMismatch { .. } => "kernel probe symbol read back a wrong value",
            Self::NullStack => "stack pointer is null",
            Self::MisalignedStack { .. } => "stack pointer is not 16-byte aligned",
            Self::StackOutOfRange { .. } => "stack pointer is outside every known stack region",
            Self::MissingPae => "CPU does not support PAE",
            Self::MissingGlobalPages => "CPU does not support global pages",
            Self::ExtendedLeafMissing { .. } => "CPUID extended feature leaf is unavailable",
            Self::MissingLongMode => "CPU does not support long mode",
        }
    }
}

impl core::fmt::Display for VerificationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::CodeInUserSpace { rip } | Self::CodeBelowKernelBase { rip } => {
                write!(f, "{}: rip 0x{:x}", self.description(), rip)
            }
            Self::KernelProbeMismatch { found } => {
                write!(f, "{}: found 0x{:x}", self.description(), found)
            }
            Self::MisalignedStack { rsp } | Self::StackOutOfRange { rsp } => {
                write!(f, "{}: rsp 0x{:x}", self.description(), rsp)
            }
            Self::ExtendedLeafMissing { max_leaf } => {
                write!(f, "{}: max extended leaf 0x{:x}", self.description(), max_leaf)
            }
            _ => write!(f, "{}", self.description()),
        }
    }
}

pub type VerificationResult = Result<(), VerificationError>;

/// CR0, CR4 and EFER must describe 64-bit paged long mode.
pub fn check_cpu_state<P: Platform>(platform: &P) -> VerificationResult {
    let regs = platform.control_registers();

    if regs.cr0 & CR0_PG == 0 {
        return Err(VerificationError::PagingDisabled);
    }
    if regs.cr0 & CR0_PE == 0 {
        return Err(VerificationError::ProtectedModeDisabled);
    }
    if regs.cr4 & CR4_PAE == 0 {
        return Err(VerificationError::PaeDisabled);
    }
    if regs.efer & EFER_LME == 0 {
        return Err(VerificationError::LongModeNotEnabled);
    }
    if regs.efer & EFER_LMA == 0 {
        return Err(VerificationError::LongModeInactive);
    }
    Ok(())
}

/// Kernel code must execute from the higher half, and a kernel static must be
/// readable through the live page tables.
pub fn check_memory_layout<P: Platform>(platform: &P, config: &VerifierConfig) -> VerificationResult {
    let rip = platform.instruction_pointer();

    if rip < USER_SPACE_END {
        return Err(VerificationError::CodeInUserSpace { rip });
    }
    if rip < config.higher_half_base {
        return Err(VerificationError::CodeBelowKernelBase { rip });
    }

    let found = platform.read_kernel_probe();
    if found != KERNEL_PROBE_MAGIC {
        return Err(VerificationError::KernelProbeMismatch { found });
    }
    Ok(())
}

/// The current stack must be non-null, 16-byte aligned, and either in the
/// higher half or in the low identity-mapped window.
pub fn check_stack<P: Platform>(platform: &P, config: &VerifierConfig) -> VerificationResult {
    let rsp = platform.stack_pointer();

    if rsp == 0 {
        return Err(VerificationError::NullStack);
    }
    if rsp % 16 != 0 {
        return Err(VerificationError::MisalignedStack { rsp });
    }
    if rsp < config.higher_half_base && rsp >= config.low_identity_ceiling {
        return Err(VerificationError::StackOutOfRange { rsp });
    }
    Ok(())
}

/// PAE, PGE and long mode are required. A missing NX bit only warns.
pub fn check_cpu_features<P: Platform>(platform: &P) -> VerificationResult {
    let basic = platform.cpuid(CPUID_FEATURES);
    if basic.edx & FEATURE_PAE == 0 {
        return Err(VerificationError::MissingPae);
    }
    if basic.edx & FEATURE_PGE == 0 {
        return Err(VerificationError::MissingGlobalPages);
    }

    let max_leaf = platform.cpuid(CPUID_EXT_MAX).eax;
    if max_leaf < CPUID_EXT_FEATURES {
        return Err(VerificationError::ExtendedLeafMissing { max_leaf });
    }

    let extended = platform.cpuid(CPUID_EXT_FEATURES);
    if extended.edx & EXT_FEATURE_LM == 0 {
        return Err(VerificationError::MissingLongMode);
    }
    if extended.edx & EXT_FEATURE_NX == 0 {
        log::warn!("verify: CPU lacks execute-disable (NX) support");
    }
    Ok(())
}

fn fatal_on_error<P: Platform>(platform: &P, stage: &str, result: VerificationResult) {
    if let Err(err) = result {
        log::error!("verify: {} check failed: {}", stage, err);
        platform.halt(err.description());
    }
    log::debug!("verify: {} OK", stage);
}

pub fn verify_cpu_state<P: Platform>(platform: &P) {
    fatal_on_error(platform, "cpu state", check_cpu_state(platform));
}

pub fn verify_memory_layout<P: Platform>(platform: &P, config: &VerifierConfig) {
    fatal_on_error(platform, "memory layout", check_memory_layout(platform, config));
}

pub fn check_stack_health<P: Platform>(platform: &P, config: &VerifierConfig) {
    fatal_on_error(platform, "stack", check_stack(platform, config));
}

pub fn verify_cpu_features<P: Platform>(platform: &P) {
    fatal_on_error(platform, "cpu features", check_cpu_features(platform));
}

/// Run every check in order. Halts on the first failure.
pub fn complete_system_verification<P: Platform>(platform: &P, config: &VerifierConfig) {
    verify_cpu_state(platform);
    verify_memory_layout(platform, config);
    check_stack_health(platform, config);
    verify_cpu_features(platform);
    log::info!("verify: 64-bit higher-half environment confirmed");
}
