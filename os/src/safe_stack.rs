//! Guard-paged exception stacks.
//!
//! Double fault, stack-segment fault, general protection fault and page fault
//! each switch to their own stack through an IST slot, so they still run
//! when the faulting kernel stack is exhausted or corrupt. Every stack sits
//! directly above an unmapped guard page; a page fault inside a guard is an
//! overflow of the owning stack.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use x86_64::structures::paging::PageTableFlags;
use x86_64::{PhysAddr, VirtAddr};

use crate::config::{SafeStackLayout, PAGE_SIZE};
use crate::gdt::{IstError, SegmentTable};
use crate::idt::vectors::{
    EXCEPTION_DOUBLE_FAULT, EXCEPTION_GENERAL_PROTECTION, EXCEPTION_PAGE_FAULT, EXCEPTION_STACK_SEGMENT_FAULT,
};
use crate::idt::VectorTable;
use crate::paging::{PagingError, PagingResult};

/// Page source for the safe stacks.
pub trait StackMemory {
    fn allocate_frame(&mut self) -> Option<PhysAddr>;

    fn zero_frame(&mut self, frame: PhysAddr) -> PagingResult<()>;

    fn map_page(&mut self, page: VirtAddr, frame: PhysAddr, flags: PageTableFlags) -> PagingResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeStackError {
    InvalidLayout { reason: &'static str },
    OutOfFrames { stack: &'static str },
    ZeroFailed { stack: &'static str, source: PagingError },
    MapFailed { stack: &'static str, page: u64, source: PagingError },
    /// Segment or vector table refused the IST registration.
    RegistrationFailed { stack: &'static str, source: IstError },
}

impl SafeStackError {
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidLayout { .. } => "invalid exception stack layout",
            Self::OutOfFrames { .. } => "out of physical frames for exception stack",
            Self::ZeroFailed { .. } => "failed to zero exception stack frame",
            Self::MapFailed { .. } => "failed to map exception stack page",
            Self::RegistrationFailed { .. } => "failed to register exception stack",
        }
    }
}

impl core::fmt::Display for SafeStackError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidLayout { reason } => write!(f, "{}: {}", self.description(), reason),
            Self::OutOfFrames { stack } => write!(f, "{} ({})", self.description(), stack),
            Self::ZeroFailed { stack, source } => write!(f, "{} ({}): {}", self.description(), stack, source),
            Self::MapFailed { stack, page, source } => {
                write!(f, "{} ({}, page 0x{:x}): {}", self.description(), stack, page, source)
            }
            Self::RegistrationFailed { stack, source } => {
                write!(f, "{} ({}): {}", self.description(), stack, source)
            }
        }
    }
}

/// Vectors served by a safe stack, in region order.
const PROTECTED: [(u8, &str); SAFE_STACK_COUNT] = [
    (EXCEPTION_DOUBLE_FAULT, "Double Fault"),
    (EXCEPTION_STACK_SEGMENT_FAULT, "Stack Segment Fault"),
    (EXCEPTION_GENERAL_PROTECTION, "General Protection Fault"),
    (EXCEPTION_PAGE_FAULT, "Page Fault"),
];

pub const SAFE_STACK_COUNT: usize = 4;

/// One guarded stack and its usage bookkeeping.
pub struct SafeStack {
    name: &'static str,
    vector: u8,
    ist_slot: u8,
    guard_start: u64,
    guard_end: u64,
    stack_base: u64,
    stack_top: u64,
    stack_size: u64,
    peak_usage: AtomicU64,
    out_of_bounds_reported: AtomicBool,
    registered: AtomicBool,
}

impl SafeStack {
    const fn new(index: usize, layout: &SafeStackLayout) -> Self {
        let (vector, name) = PROTECTED[index];
        // Wrapping: a bad layout is rejected by `SafeStacks::init`, not here.
        let guard_start = layout
            .region_base
            .wrapping_add((index as u64).wrapping_mul(layout.region_stride));
        let guard_end = guard_start.wrapping_add(layout.guard_size);
        Self {
            name,
            vector,
            ist_slot: index as u8 + 1,
            guard_start,
            guard_end,
            stack_base: guard_end,
            stack_top: guard_end.wrapping_add(layout.stack_size),
            stack_size: layout.stack_size,
            peak_usage: AtomicU64::new(0),
            out_of_bounds_reported: AtomicBool::new(false),
            registered: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn vector(&self) -> u8 {
        self.vector
    }

    pub fn ist_slot(&self) -> u8 {
        self.ist_slot
    }

    pub fn guard_start(&self) -> u64 {
        self.guard_start
    }

    pub fn guard_end(&self) -> u64 {
        self.guard_end
    }

    pub fn stack_base(&self) -> u64 {
        self.stack_base
    }

    pub fn stack_top(&self) -> u64 {
        self.stack_top
    }

    pub fn stack_size(&self) -> u64 {
        self.stack_size
    }

    pub fn peak_usage(&self) -> u64 {
        self.peak_usage.load(Ordering::Relaxed)
    }

    /// Whether the segment and vector tables both point at this stack.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Relaxed)
    }

    fn contains_guard(&self, address: u64) -> bool {
        address >= self.guard_start && address < self.guard_end
    }

    fn map<M: StackMemory>(&self, memory: &mut M, flags: PageTableFlags) -> Result<(), SafeStackError> {
        let stack = self.name;
        let pages = self.stack_size / PAGE_SIZE;
        for index in 0..pages {
            let page = self.stack_base + index * PAGE_SIZE;
            let frame = memory.allocate_frame().ok_or(SafeStackError::OutOfFrames { stack })?;
            memory
                .zero_frame(frame)
                .map_err(|source| SafeStackError::ZeroFailed { stack, source })?;
            memory
                .map_page(VirtAddr::new_truncate(page), frame, flags)
                .map_err(|source| SafeStackError::MapFailed { stack, page, source })?;
        }
        Ok(())
    }
}

/// The four safe stacks, laid out by a [`SafeStackLayout`].
pub struct SafeStacks {
    layout: SafeStackLayout,
    stacks: [SafeStack; SAFE_STACK_COUNT],
}

impl SafeStacks {
    pub const fn new(layout: SafeStackLayout) -> Self {
        Self {
            layout,
            stacks: [
                SafeStack::new(0, &layout),
                SafeStack::new(1, &layout),
                SafeStack::new(2, &layout),
                SafeStack::new(3, &layout),
            ],
        }
    }

    /// Map every stack and route its vector through it.
    ///
    /// Guard pages are never mapped. The vector table must already be
    /// populated; its gates receive the IST indices here. A layout that fails
    /// [`SafeStackLayout::check`] maps nothing.
    pub fn init<M: StackMemory>(
        &self,
        memory: &mut M,
        segments: &SegmentTable,
        vectors: &VectorTable,
    ) -> Result<(), SafeStackError> {
        self.layout
            .check(SAFE_STACK_COUNT as u64)
            .map_err(|reason| SafeStackError::InvalidLayout { reason })?;

        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;

        for stack in &self.stacks {
            stack.map(memory, flags)?;

            let registration = |source| SafeStackError::RegistrationFailed { stack: stack.name, source };
            segments.set_ist(stack.ist_slot, stack.stack_top).map_err(registration)?;
            vectors.set_ist(stack.vector, stack.ist_slot).map_err(registration)?;
            stack.registered.store(true, Ordering::Relaxed);

            log::info!(
                "safe stack: {} (vector {}) IST{} 0x{:x}-0x{:x}, guard 0x{:x}-0x{:x}",
                stack.name,
                stack.vector,
                stack.ist_slot,
                stack.stack_base,
                stack.stack_top,
                stack.guard_start,
                stack.guard_end
            );
        }
        Ok(())
    }

    pub fn layout(&self) -> SafeStackLayout {
        self.layout
    }

    pub fn descriptor(&self, vector: u8) -> Option<&SafeStack> {
        self.stacks.iter().find(|stack| stack.vector == vector)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SafeStack> {
        self.stacks.iter()
    }

    /// Track stack depth for a trap on `vector` whose frame sits at
    /// `frame_pointer`.
    pub fn record_usage(&self, vector: u64, frame_pointer: u64) {
        let Some(stack) = self.stacks.iter().find(|stack| u64::from(stack.vector) == vector) else {
            return;
        };

        if frame_pointer < stack.stack_base || frame_pointer > stack.stack_top {
            if !stack.out_of_bounds_reported.swap(true, Ordering::Relaxed) {
                log::warn!(
                    "safe stack: {} frame at 0x{:x} outside 0x{:x}-0x{:x}, usage not tracked",
                    stack.name,
                    frame_pointer,
                    stack.stack_base,
                    stack.stack_top
                );
            }
            return;
        }

        let usage = stack.stack_top - frame_pointer;
        let previous = stack.peak_usage.fetch_max(usage, Ordering::Relaxed);
        if usage <= previous {
            return;
        }
        log::info!("safe stack: {} peak usage {} of {} bytes", stack.name, usage, stack.stack_size);
        if stack.stack_size - usage < PAGE_SIZE {
            log::warn!(
                "safe stack: {} has less than one page of headroom ({} bytes left)",
                stack.name,
                stack.stack_size - usage
            );
        }
    }

    /// Owner of the guard page containing `address`, if any.
    pub fn guard_fault(&self, address: u64) -> Option<&'static str> {
        self.stacks
            .iter()
            .find(|stack| stack.contains_guard(address))
            .map(|stack| stack.name)
    }

    pub fn report(&self) {
        for stack in &self.stacks {
            let peak = stack.peak_usage();
            log::info!(
                "safe stack: {:<24} IST{} 0x{:x}-0x{:x} peak {} headroom {}",
                stack.name,
                stack.ist_slot,
                stack.stack_base,
                stack.stack_top,
                peak,
                stack.stack_size - peak
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idt::vectors::is_wired;
    use crate::testing::{self, leak, FakeMemory, FakePlatform};

    const SCENARIO: SafeStackLayout = SafeStackLayout {
        region_base: 0x1000,
        region_stride: 0x1_0000,
        guard_size: 0x1000,
        stack_size: 0x4000,
    };

    fn tables() -> (&'static SegmentTable, &'static VectorTable) {
        let platform = FakePlatform::healthy();
        let segments: &'static SegmentTable = leak(SegmentTable::new());
        let vectors: &'static VectorTable = leak(VectorTable::new());
        segments.init(&platform, crate::gdt::stack::kernel_stack_top());
        vectors.init(&platform);
        (segments, vectors)
    }

    #[test]
    fn scenario_layout() {
        let stacks = SafeStacks::new(SCENARIO);
        let first = stacks.descriptor(8).unwrap();
        assert_eq!(first.name(), "Double Fault");
        assert_eq!((first.guard_start(), first.guard_end()), (0x1000, 0x2000));
        assert_eq!((first.stack_base(), first.stack_top()), (0x2000, 0x6000));
        assert_eq!(first.ist_slot(), 1);

        let last = stacks.descriptor(14).unwrap();
        assert_eq!(last.guard_start(), 0x3_1000);
        assert_eq!(last.stack_top(), 0x3_6000);
        assert_eq!(last.ist_slot(), 4);
        assert!(stacks.descriptor(3).is_none());
    }

    #[test]
    fn guard_fault_matches_only_guard_ranges() {
        let stacks = SafeStacks::new(SCENARIO);
        assert_eq!(stacks.guard_fault(0x1500), Some("Double Fault"));
        assert_eq!(stacks.guard_fault(0x1000), Some("Double Fault"));
        assert_eq!(stacks.guard_fault(0x3000), None);
        assert_eq!(stacks.guard_fault(0x2000), None);
        assert_eq!(stacks.guard_fault(0x1_1000), Some("Stack Segment Fault"));
        assert_eq!(stacks.guard_fault(0x3_1fff), Some("Page Fault"));
        assert_eq!(stacks.guard_fault(0x3_2000), None);
        assert_eq!(stacks.guard_fault(0), None);
    }

    #[test]
    fn peak_usage_is_monotonic() {
        testing::capture_logs();
        let stacks = SafeStacks::new(SCENARIO);
        stacks.record_usage(13, 0x2_5000);
        assert_eq!(stacks.descriptor(13).unwrap().peak_usage(), 0x1000);

        stacks.record_usage(13, 0x2_5800);
        assert_eq!(stacks.descriptor(13).unwrap().peak_usage(), 0x1000);

        stacks.record_usage(13, 0x2_3000);
        assert_eq!(stacks.descriptor(13).unwrap().peak_usage(), 0x3000);
        assert!(testing::logged("peak usage 12288"));
        assert!(!testing::logged("headroom"));
    }

    #[test]
    fn low_headroom_warns() {
        testing::capture_logs();
        let stacks = SafeStacks::new(SCENARIO);
        stacks.record_usage(8, 0x2800);
        assert!(testing::logged("less than one page of headroom"));
    }

    #[test]
    fn out_of_bounds_is_reported_once() {
        testing::capture_logs();
        let stacks = SafeStacks::new(SCENARIO);
        stacks.record_usage(14, 0xFFFF_8000_0000_0000);
        stacks.record_usage(14, 0x10);
        let reports = testing::captured_lines()
            .iter()
            .filter(|line| line.contains("usage not tracked"))
            .count();
        assert_eq!(reports, 1);
        assert_eq!(stacks.descriptor(14).unwrap().peak_usage(), 0);

        // Another descriptor still reports its own.
        stacks.record_usage(12, 0x10);
        assert!(testing::captured_lines().iter().filter(|l| l.contains("usage not tracked")).count() == 2);
    }

    #[test]
    fn unknown_vectors_are_ignored() {
        testing::capture_logs();
        let stacks = SafeStacks::new(SCENARIO);
        stacks.record_usage(3, 0x10);
        stacks.record_usage(300, 0x10);
        assert!(testing::captured_lines().is_empty());
    }

    #[test]
    fn init_maps_stack_pages_and_registers_ist() {
        let (segments, vectors) = tables();
        let stacks = SafeStacks::new(SCENARIO);
        let mut memory = FakeMemory::with_frames(64);
        stacks.init(&mut memory, segments, vectors).unwrap();

        assert_eq!(memory.mapped.len(), 16);
        assert_eq!(memory.zeroed.len(), 16);
        for stack in stacks.iter() {
            assert!(!memory.is_mapped(stack.guard_start()));
            assert!(memory.is_mapped(stack.stack_base()));
            assert!(memory.is_mapped(stack.stack_top() - PAGE_SIZE));
            assert_eq!(segments.ist_entries()[usize::from(stack.ist_slot() - 1)], stack.stack_top());
            assert_eq!(vectors.gate(stack.vector()).ist(), stack.ist_slot());
            assert!(stack.is_registered());
        }
        assert!(memory
            .mapped
            .iter()
            .all(|&(_, _, flags)| flags == PageTableFlags::PRESENT | PageTableFlags::WRITABLE));

        for vector in (0..=u8::MAX).filter(|&v| is_wired(v) && stacks.descriptor(v).is_none()) {
            assert_eq!(vectors.gate(vector).ist(), 0);
        }
    }

    #[test]
    fn frame_exhaustion_is_reported() {
        let (segments, vectors) = tables();
        let stacks = SafeStacks::new(SCENARIO);
        let mut memory = FakeMemory::with_frames(6);
        assert_eq!(
            stacks.init(&mut memory, segments, vectors),
            Err(SafeStackError::OutOfFrames { stack: "Stack Segment Fault" })
        );
    }

    #[test]
    fn report_lists_every_stack_with_headroom() {
        testing::capture_logs();
        let stacks = SafeStacks::new(SCENARIO);
        stacks.record_usage(13, 0x2_5000);
        stacks.report();

        let lines = testing::captured_lines();
        let rows: Vec<_> = lines.iter().filter(|l| l.contains(" IST")).collect();
        assert_eq!(rows.len(), SAFE_STACK_COUNT, "{lines:?}");
        assert!(rows[0].contains("Double Fault") && rows[0].contains("IST1 0x2000-0x6000 peak 0 headroom 16384"));
        assert!(rows[2].contains("General Protection Fault") && rows[2].contains("peak 4096 headroom 12288"));
        assert!(rows[3].contains("IST4 0x32000-0x36000"));
    }

    #[test]
    fn partial_page_stack_is_rejected_before_mapping() {
        let (segments, vectors) = tables();
        let stacks = SafeStacks::new(SafeStackLayout { stack_size: 0x4800, ..SCENARIO });
        let mut memory = FakeMemory::with_frames(64);
        assert_eq!(
            stacks.init(&mut memory, segments, vectors),
            Err(SafeStackError::InvalidLayout { reason: "guard and stack sizes must be whole pages" })
        );
        assert!(memory.mapped.is_empty());
        assert_eq!(segments.ist_entries(), [0; 7]);
        assert_eq!(vectors.gate(8).ist(), 0);
    }

    #[test]
    fn overlapping_regions_are_rejected() {
        let (segments, vectors) = tables();
        let stacks = SafeStacks::new(SafeStackLayout { region_stride: 0x4000, ..SCENARIO });
        let mut memory = FakeMemory::with_frames(64);
        let err = stacks.init(&mut memory, segments, vectors).unwrap_err();
        assert_eq!(err.to_string(), "invalid exception stack layout: guard and stack overflow the region stride");
        assert!(memory.zeroed.is_empty());
    }

    #[test]
    fn map_failure_is_reported() {
        let (segments, vectors) = tables();
        let stacks = SafeStacks::new(SCENARIO);
        let mut memory = FakeMemory::with_frames(64);
        memory.fail_map_at = Some(0x2000);
        assert_eq!(
            stacks.init(&mut memory, segments, vectors),
            Err(SafeStackError::MapFailed {
                stack: "Double Fault",
                page: 0x2000,
                source: PagingError::MapFailed
            })
        );
    }
}
