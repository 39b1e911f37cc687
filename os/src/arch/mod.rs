//! Target-specific code. Only built for the bare-metal target.

pub mod x86_64;
