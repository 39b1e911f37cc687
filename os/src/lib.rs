//! Trap and exception layer for a freestanding x86_64 kernel.
//!
//! The crate verifies the boot environment, builds the segment and vector
//! tables, maps guard-paged stacks for the faults that must never land on a
//! broken kernel stack, and dispatches every trap through one protocol.
//!
//! Hardware access goes through [`platform::Platform`], so everything except
//! the `arch` and `kernel` modules also builds and runs as host unit tests.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod gdt;
pub mod idt;
pub mod logger;
pub mod paging;
pub mod platform;
pub mod safe_stack;
pub mod serial;
pub mod sync;
pub mod trap;
pub mod verify;

#[cfg(target_os = "none")]
pub mod arch;
#[cfg(target_os = "none")]
pub mod kernel;
#[cfg(all(target_os = "none", feature = "trap-selftest"))]
pub mod selftest;

#[cfg(test)]
mod testing;

pub use trap::TrapSubsystem;
