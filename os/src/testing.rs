//! Host-side test doubles: a scriptable platform, an in-memory page source and
//! a per-thread capturing logger.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;

use x86_64::structures::paging::PageTableFlags;
use x86_64::structures::DescriptorTablePointer;
use x86_64::{PhysAddr, VirtAddr};

use crate::gdt::Selectors;
use crate::idt::vectors::is_wired;
use crate::paging::{PagingError, PagingResult};
use crate::platform::{ControlRegisters, CpuidLeaf, Platform};
use crate::safe_stack::StackMemory;
use crate::verify::KERNEL_PROBE_MAGIC;

/// Base address handed out for trampoline `v` (plus `v * 0x10`).
const TRAMPOLINE_BASE: u64 = 0xFFFF_FFFF_8010_0000;

pub fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

/// Platform backed by plain fields. `halt` panics with `"halt: <reason>"`.
pub struct FakePlatform {
    pub registers: ControlRegisters,
    pub rip: u64,
    pub probe: u64,
    pub leaf1_edx: u32,
    pub ext_max_leaf: u32,
    pub ext_edx: u32,
    rsp: AtomicU64,
    fault_address: AtomicU64,
    loaded_gdt: AtomicU64,
    loaded_idt: AtomicU64,
}

impl FakePlatform {
    /// A CPU that passes every environment check.
    pub fn healthy() -> Self {
        Self {
            registers: ControlRegisters {
                cr0: (1 << 31) | (1 << 16) | 1,
                cr2: 0,
                cr3: 0x1000,
                cr4: 1 << 5,
                efer: (1 << 8) | (1 << 10) | (1 << 11),
            },
            rip: 0xFFFF_FFFF_8000_2000,
            probe: KERNEL_PROBE_MAGIC,
            leaf1_edx: (1 << 6) | (1 << 13),
            ext_max_leaf: 0x8000_0008,
            ext_edx: (1 << 20) | (1 << 29),
            rsp: AtomicU64::new(0xFFFF_8000_0001_0000),
            fault_address: AtomicU64::new(0),
            loaded_gdt: AtomicU64::new(0),
            loaded_idt: AtomicU64::new(0),
        }
    }

    pub fn set_stack_pointer(&self, rsp: u64) {
        self.rsp.store(rsp, Ordering::Relaxed);
    }

    /// Value reported as CR2.
    pub fn set_fault_address(&self, address: u64) {
        self.fault_address.store(address, Ordering::Relaxed);
    }

    pub fn loaded_segment_table(&self) -> Option<u64> {
        Some(self.loaded_gdt.load(Ordering::Relaxed)).filter(|&base| base != 0)
    }

    pub fn loaded_vector_table(&self) -> Option<u64> {
        Some(self.loaded_idt.load(Ordering::Relaxed)).filter(|&base| base != 0)
    }
}

impl Platform for FakePlatform {
    fn control_registers(&self) -> ControlRegisters {
        ControlRegisters { cr2: self.fault_address.load(Ordering::Relaxed), ..self.registers }
    }

    fn cpuid(&self, leaf: u32) -> CpuidLeaf {
        match leaf {
            0x1 => CpuidLeaf { edx: self.leaf1_edx, ..CpuidLeaf::default() },
            0x8000_0000 => CpuidLeaf { eax: self.ext_max_leaf, ..CpuidLeaf::default() },
            0x8000_0001 => CpuidLeaf { edx: self.ext_edx, ..CpuidLeaf::default() },
            _ => CpuidLeaf::default(),
        }
    }

    fn instruction_pointer(&self) -> u64 {
        self.rip
    }

    fn stack_pointer(&self) -> u64 {
        self.rsp.load(Ordering::Relaxed)
    }

    fn read_kernel_probe(&self) -> u64 {
        self.probe
    }

    fn trampoline(&self, vector: u8) -> Option<u64> {
        is_wired(vector).then(|| TRAMPOLINE_BASE + u64::from(vector) * 0x10)
    }

    unsafe fn load_segment_table(&self, table: &DescriptorTablePointer, _selectors: &Selectors) {
        self.loaded_gdt.store(table.base.as_u64(), Ordering::Relaxed);
    }

    unsafe fn load_vector_table(&self, table: &DescriptorTablePointer) {
        self.loaded_idt.store(table.base.as_u64(), Ordering::Relaxed);
    }

    fn halt(&self, reason: &str) -> ! {
        log::error!("HALT: {}", reason);
        panic!("halt: {}", reason);
    }
}

/// Page source that records every call.
pub struct FakeMemory {
    frames_left: usize,
    next_frame: u64,
    pub zeroed: Vec<PhysAddr>,
    /// `(page, frame, flags)` in mapping order.
    pub mapped: Vec<(u64, PhysAddr, PageTableFlags)>,
    /// Page whose mapping fails with [`PagingError::MapFailed`].
    pub fail_map_at: Option<u64>,
    pages: BTreeMap<u64, PhysAddr>,
}

impl FakeMemory {
    pub fn with_frames(frames: usize) -> Self {
        Self {
            frames_left: frames,
            next_frame: 0x20_0000,
            zeroed: Vec::new(),
            mapped: Vec::new(),
            fail_map_at: None,
            pages: BTreeMap::new(),
        }
    }

    pub fn is_mapped(&self, page: u64) -> bool {
        self.pages.contains_key(&page)
    }
}

impl StackMemory for FakeMemory {
    fn allocate_frame(&mut self) -> Option<PhysAddr> {
        self.frames_left = self.frames_left.checked_sub(1)?;
        let frame = PhysAddr::new(self.next_frame);
        self.next_frame += 0x1000;
        Some(frame)
    }

    fn zero_frame(&mut self, frame: PhysAddr) -> PagingResult<()> {
        self.zeroed.push(frame);
        Ok(())
    }

    fn map_page(&mut self, page: VirtAddr, frame: PhysAddr, flags: PageTableFlags) -> PagingResult<()> {
        let page = page.as_u64();
        if self.fail_map_at == Some(page) {
            return Err(PagingError::MapFailed);
        }
        if self.pages.insert(page, frame).is_some() {
            return Err(PagingError::AlreadyMapped { addr: VirtAddr::new_truncate(page) });
        }
        self.mapped.push((page, frame, flags));
        Ok(())
    }
}

thread_local! {
    static CAPTURED: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

struct CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        CAPTURED.with(|captured| {
            if let Some(lines) = captured.borrow_mut().as_mut() {
                lines.push(format!("[{}] {}", record.level(), record.args()));
            }
        });
    }

    fn flush(&self) {}
}

static CAPTURE_LOGGER: CaptureLogger = CaptureLogger;
static INSTALL: Once = Once::new();

/// Start capturing log lines on this thread, dropping anything captured so far.
pub fn capture_logs() {
    INSTALL.call_once(|| {
        // Another logger only exists if a test installed one; capture then stays empty.
        if log::set_logger(&CAPTURE_LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    });
    CAPTURED.with(|captured| *captured.borrow_mut() = Some(Vec::new()));
}

pub fn captured_lines() -> Vec<String> {
    CAPTURED.with(|captured| captured.borrow().clone().unwrap_or_default())
}

/// Whether any captured line on this thread contains `needle`.
pub fn logged(needle: &str) -> bool {
    captured_lines().iter().any(|line| line.contains(needle))
}
