//! Boot-time checks of the armed trap path, run with `trap-selftest`.

use core::sync::atomic::{AtomicU64, Ordering};

use x86_64::instructions::interrupts::int3;
use x86_64::instructions::segmentation::{Segment, CS};
use x86_64::instructions::tables::{sgdt, sidt};

use crate::arch::x86_64::X86Platform;
use crate::gdt::Selectors;
use crate::idt::vectors::EXCEPTION_BREAKPOINT;
use crate::trap::{ExceptionMode, InterruptFrame, OverridableVector, TrapSubsystem};

static PROBE_HITS: AtomicU64 = AtomicU64::new(0);

fn breakpoint_probe(frame: &mut InterruptFrame) {
    PROBE_HITS.fetch_add(1, Ordering::Relaxed);
    log::info!("selftest: breakpoint override hit at 0x{:x}", frame.rip);
}

fn task_register() -> u16 {
    let selector: u16;
    // SAFETY: `str` only reads the task register.
    unsafe {
        core::arch::asm!("str {0:x}", out(reg) selector, options(nomem, nostack, preserves_flags));
    }
    selector
}

fn check(name: &str, ok: bool, failures: &mut u32) {
    if ok {
        log::info!("selftest: {} ok", name);
    } else {
        log::error!("selftest: {} FAILED", name);
        *failures += 1;
    }
}

/// Run every check; returns the number of failures.
pub fn run(traps: &'static TrapSubsystem<X86Platform>) -> u32 {
    let mut failures = 0;
    log::info!("selftest: starting trap self checks");

    let gdtr = sgdt();
    let expected = traps.segments().pointer();
    check(
        "segment table register",
        gdtr.base == expected.base && gdtr.limit == expected.limit,
        &mut failures,
    );

    let idtr = sidt();
    let expected = traps.vectors().pointer();
    check(
        "vector table register",
        idtr.base == expected.base && idtr.limit == expected.limit,
        &mut failures,
    );

    let cs = CS::get_reg();
    let tr = task_register();
    log::info!("selftest: CS 0x{:x}, TR 0x{:x}", cs.0, tr);
    check("code selector", cs == Selectors::KERNEL.code_selector, &mut failures);
    check("task register", tr == Selectors::KERNEL.tss_selector.0, &mut failures);

    let before = traps.exception_count(EXCEPTION_BREAKPOINT);
    traps.set_mode(ExceptionMode::Test);
    let installed = traps
        .install_exception_handler(EXCEPTION_BREAKPOINT, Some(breakpoint_probe))
        .is_ok();
    int3();
    check(
        "breakpoint override",
        installed && PROBE_HITS.load(Ordering::Relaxed) == 1,
        &mut failures,
    );

    traps.set_mode(ExceptionMode::Normal);
    let cleared = OverridableVector::new(EXCEPTION_BREAKPOINT)
        .map_or(false, |vector| !traps.dispatcher().override_installed(vector));
    int3();
    check(
        "override cleared in normal mode",
        cleared && PROBE_HITS.load(Ordering::Relaxed) == 1,
        &mut failures,
    );
    check(
        "breakpoint counter",
        traps.exception_count(EXCEPTION_BREAKPOINT) == before + 2,
        &mut failures,
    );

    traps.safe_stacks().report();
    log::info!("selftest: finished, {} failure(s)", failures);
    failures
}
