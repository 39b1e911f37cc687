//! Trap subsystem tests: init ordering and the dispatch protocol.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use super::*;
use crate::gdt::stack::kernel_stack_top;
use crate::testing::{self, leak, FakeMemory, FakePlatform};

const LAYOUT: SafeStackLayout = SafeStackLayout {
    region_base: 0x1000,
    region_stride: 0x1_0000,
    guard_size: 0x1000,
    stack_size: 0x4000,
};

fn subsystem() -> &'static TrapSubsystem<FakePlatform> {
    leak(TrapSubsystem::new(FakePlatform::healthy(), LAYOUT))
}

fn armed() -> &'static TrapSubsystem<FakePlatform> {
    let traps = subsystem();
    traps.vector_table_init();
    traps
}

#[test]
fn init_routes_protected_vectors_through_ist() {
    let traps = subsystem();
    let mut memory = FakeMemory::with_frames(64);
    assert_eq!(traps.try_init(&mut memory, kernel_stack_top()), Ok(()));

    let gate = traps.vectors().gate(14);
    let page_fault_slot = traps.safe_stacks().descriptor(14).unwrap().ist_slot();
    assert!(gate.is_present());
    assert_eq!(gate.selector(), 0x08);
    assert_ne!(gate.ist(), 0);
    assert_eq!(gate.ist(), page_fault_slot);

    for vector in [8, 12, 13] {
        assert_ne!(traps.vectors().gate(vector).ist(), 0);
    }
    assert_eq!(traps.vectors().gate(3).ist(), 0);

    let ist = traps.segments().ist_entries();
    assert_eq!(ist[usize::from(page_fault_slot - 1)], 0x3_6000);

    assert_eq!(
        traps.platform().loaded_vector_table(),
        Some(traps.vectors().pointer().base.as_u64())
    );
    assert!(traps.platform().loaded_segment_table().is_some());
    assert!(traps.dispatcher().tables_initialized());
}

#[test]
#[should_panic(expected = "halt: out of physical frames for exception stack")]
fn safe_stack_failure_is_fatal() {
    let traps = subsystem();
    let mut memory = FakeMemory::with_frames(3);
    traps.init(&mut memory, kernel_stack_top());
}

#[test]
fn partial_page_stack_layout_halts_init() {
    testing::capture_logs();
    let layout = SafeStackLayout { stack_size: 0x4800, ..LAYOUT };
    let traps = leak(TrapSubsystem::new(FakePlatform::healthy(), layout));
    let mut memory = FakeMemory::with_frames(64);

    let result = catch_unwind(AssertUnwindSafe(|| traps.init(&mut memory, kernel_stack_top())));
    assert!(result.is_err());
    assert!(testing::logged("HALT: invalid exception stack layout"));
    assert!(memory.mapped.is_empty());
    assert_eq!(traps.platform().loaded_vector_table(), None);
}

static BREAKPOINT_HITS: AtomicU64 = AtomicU64::new(0);

fn count_breakpoint(frame: &mut InterruptFrame) {
    assert_eq!(frame.vector, 3);
    BREAKPOINT_HITS.fetch_add(1, Ordering::Relaxed);
}

#[test]
fn breakpoint_override_only_while_in_test_mode() {
    testing::capture_logs();
    let traps = armed();

    traps.set_mode(ExceptionMode::Test);
    assert_eq!(traps.install_exception_handler(3, Some(count_breakpoint)), Ok(()));
    traps.dispatch(&mut InterruptFrame::for_vector(3));
    assert_eq!(BREAKPOINT_HITS.load(Ordering::Relaxed), 1);
    assert!(!testing::logged("resuming"));

    traps.set_mode(ExceptionMode::Normal);
    traps.dispatch(&mut InterruptFrame::for_vector(3));
    assert_eq!(BREAKPOINT_HITS.load(Ordering::Relaxed), 1);
    assert!(testing::logged("Breakpoint (vector 3) at 0x0, resuming"));
    assert_eq!(traps.exception_count(3), 2);
}

#[test]
fn install_rejections_are_not_fatal() {
    let traps = armed();
    traps.set_mode(ExceptionMode::Test);
    for vector in [2, 8, 18] {
        assert_eq!(
            traps.install_exception_handler(vector, Some(count_breakpoint)),
            Err(InstallError::CriticalVector { vector })
        );
    }
    assert_eq!(
        traps.install_exception_handler(32, Some(count_breakpoint)),
        Err(InstallError::NotAnException { vector: 32 })
    );
    assert_eq!(traps.mode(), ExceptionMode::Test);
}

#[test]
fn irq_vectors_log_and_return() {
    testing::capture_logs();
    let traps = armed();
    traps.dispatch(&mut InterruptFrame::for_vector(33));
    assert!(testing::logged("no handler installed for IRQ 1"));
    assert_eq!(traps.exception_count(33), 0);
}

#[test]
fn vectors_past_irq_range_log_and_return() {
    testing::capture_logs();
    let traps = armed();
    traps.dispatch(&mut InterruptFrame::for_vector(48));
    traps.dispatch(&mut InterruptFrame::for_vector(255));
    assert!(testing::logged("spurious vector 48"));
    assert!(testing::logged("spurious vector 255"));
}

#[test]
#[should_panic(expected = "halt: Unhandled exception")]
fn reserved_exception_vectors_halt() {
    let traps = armed();
    traps.dispatch(&mut InterruptFrame::for_vector(21));
}

#[test]
#[should_panic(expected = "halt: Unhandled exception")]
fn missing_handler_tables_fall_back_to_default_panic() {
    let traps = subsystem();
    traps.dispatch(&mut InterruptFrame::for_vector(3));
}

#[test]
fn critical_vectors_are_reported_in_test_mode() {
    testing::capture_logs();
    let traps = armed();
    traps.set_mode(ExceptionMode::Test);

    let result = catch_unwind(AssertUnwindSafe(|| traps.dispatch(&mut InterruptFrame::for_vector(2))));
    assert!(result.is_err());
    assert!(testing::logged("critical vector 2 (Non-Maskable Interrupt)"));
}

#[test]
fn non_critical_vectors_are_quiet_in_test_mode() {
    testing::capture_logs();
    let traps = armed();
    traps.set_mode(ExceptionMode::Test);
    traps.dispatch(&mut InterruptFrame::for_vector(1));
    assert!(!testing::logged("trap: vector 1"));

    traps.set_mode(ExceptionMode::Normal);
    traps.dispatch(&mut InterruptFrame::for_vector(1));
    assert!(testing::logged("trap: vector 1 (Debug)"));
}

#[test]
fn usage_is_recorded_before_the_handler_runs() {
    testing::capture_logs();
    let traps = armed();
    let result = catch_unwind(AssertUnwindSafe(|| traps.dispatch(&mut InterruptFrame::for_vector(13))));
    assert!(result.is_err());

    let lines = testing::captured_lines();
    let usage = lines.iter().position(|l| l.contains("usage not tracked"));
    let halt = lines.iter().position(|l| l.contains("HALT: General Protection Fault"));
    assert!(usage.is_some() && halt.is_some(), "{lines:?}");
    assert!(usage < halt);
    assert_eq!(traps.exception_count(13), 1);
}
