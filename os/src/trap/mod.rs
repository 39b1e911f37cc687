//! The trap subsystem: one object owning every table the CPU consults on a
//! trap, plus the dispatch protocol the entry trampolines call into.
//!
//! The kernel places a single [`TrapSubsystem`] in a `static`; its tables must
//! never move once loaded.

pub mod dispatch;
pub mod frame;
pub mod handlers;

#[cfg(test)]
mod tests;

use crate::config::SafeStackLayout;
use crate::gdt::SegmentTable;
use crate::idt::vectors::{self, get_exception_name, is_critical, IRQ_BASE_VECTOR, IRQ_END_VECTOR};
use crate::idt::VectorTable;
use crate::platform::Platform;
use crate::safe_stack::{SafeStackError, SafeStacks, StackMemory};

pub use self::dispatch::{
    ExceptionDispatcher, ExceptionHandler, ExceptionMode, InstallError, OverridableVector, Resolved,
};
pub use self::frame::{dump_cpu_state, dump_interrupt_frame, InterruptFrame};
pub use self::handlers::DefaultHandler;

pub struct TrapSubsystem<P: Platform> {
    segments: SegmentTable,
    vectors: VectorTable,
    dispatcher: ExceptionDispatcher,
    stacks: SafeStacks,
    platform: P,
}

impl<P: Platform> TrapSubsystem<P> {
    pub const fn new(platform: P, layout: SafeStackLayout) -> Self {
        Self {
            segments: SegmentTable::new(),
            vectors: VectorTable::new(),
            dispatcher: ExceptionDispatcher::new(),
            stacks: SafeStacks::new(layout),
            platform,
        }
    }

    pub fn segments(&self) -> &SegmentTable {
        &self.segments
    }

    pub fn vectors(&self) -> &VectorTable {
        &self.vectors
    }

    pub fn dispatcher(&self) -> &ExceptionDispatcher {
        &self.dispatcher
    }

    pub fn safe_stacks(&self) -> &SafeStacks {
        &self.stacks
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Arm the trap path. Halts if the safe stacks cannot be built.
    ///
    /// The environment must already be verified.
    pub fn init<M: StackMemory>(&'static self, memory: &mut M, kernel_stack_top: u64) {
        if let Err(err) = self.try_init(memory, kernel_stack_top) {
            log::error!("trap: safe stack setup failed: {}", err);
            self.platform.halt(err.description());
        }
    }

    /// Segment table, vector table, safe stacks, then load the vector table.
    ///
    /// The vector table is populated before the safe stacks write IST
    /// indices into it, since population clears every gate.
    pub fn try_init<M: StackMemory>(
        &'static self,
        memory: &mut M,
        kernel_stack_top: u64,
    ) -> Result<(), SafeStackError> {
        self.segments.init(&self.platform, kernel_stack_top);
        self.vector_table_init();
        self.stacks.init(memory, &self.segments, &self.vectors)?;
        self.vectors.load(&self.platform);
        log::info!("trap: subsystem armed");
        Ok(())
    }

    /// Populate the vector table and bind the default handlers.
    pub fn vector_table_init(&'static self) {
        let installed = self.vectors.init(&self.platform);
        self.dispatcher.initialize_handler_tables();
        log::info!("idt: {} vectors installed", installed);
    }

    pub fn install_exception_handler(
        &self,
        vector: u8,
        handler: Option<ExceptionHandler>,
    ) -> Result<(), InstallError> {
        self.dispatcher.install_exception_handler(vector, handler)
    }

    pub fn set_mode(&self, mode: ExceptionMode) {
        self.dispatcher.set_mode(mode);
    }

    pub fn mode(&self) -> ExceptionMode {
        self.dispatcher.mode()
    }

    pub fn exception_count(&self, vector: u8) -> u64 {
        self.dispatcher.exception_count(vector)
    }

    /// Entry point for every trampoline.
    pub fn dispatch(&self, frame: &mut InterruptFrame) {
        let vector = frame.vector;
        self.stacks.record_usage(vector, frame.address());

        let Ok(vector) = u8::try_from(vector) else {
            log::error!("trap: corrupt vector {} in frame", vector);
            return;
        };

        if vector >= IRQ_END_VECTOR {
            log::warn!("trap: spurious vector {}", vector);
            return;
        }
        if vector >= IRQ_BASE_VECTOR {
            log::warn!(
                "trap: no handler installed for IRQ {} (vector {})",
                vector - IRQ_BASE_VECTOR,
                vector
            );
            return;
        }

        self.dispatcher.count(vector);

        if vector > vectors::LAST_WIRED_EXCEPTION {
            log::error!("trap: unknown exception vector {}", vector);
            handlers::default_panic(frame, &self.platform);
        }

        if is_critical(vector) {
            log::error!("trap: critical vector {} ({})", vector, get_exception_name(vector));
        } else if self.dispatcher.mode() != ExceptionMode::Test {
            log::warn!("trap: vector {} ({})", vector, get_exception_name(vector));
        }

        match self.dispatcher.resolve(vector) {
            Resolved::Override(handler) => handler(frame),
            Resolved::Default(handler) => handler.run(frame, &self.platform, &self.stacks),
            Resolved::Missing => handlers::default_panic(frame, &self.platform),
        }
    }
}
