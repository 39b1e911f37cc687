//! Handler tables, exception mode and override slots.

use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU64, AtomicU8, Ordering};

use spin::Once;

use crate::idt::vectors::{is_critical, EXCEPTION_VECTORS};

use super::frame::InterruptFrame;
use super::handlers::DefaultHandler;

/// Override hook signature. Runs in place of the default handler.
pub type ExceptionHandler = fn(&mut InterruptFrame);

/// Whether test overrides are honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionMode {
    Normal = 0,
    /// Overrides installed for non-critical vectors replace the defaults.
    Test = 1,
}

/// Exception vector that may carry an override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverridableVector(u8);

impl OverridableVector {
    /// `None` for critical vectors and anything outside `0..32`.
    pub const fn new(vector: u8) -> Option<Self> {
        if (vector as usize) < EXCEPTION_VECTORS && !is_critical(vector) {
            Some(Self(vector))
        } else {
            None
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallError {
    /// Vector is not an exception vector.
    NotAnException { vector: u8 },
    /// Vector is double fault, machine check or NMI.
    CriticalVector { vector: u8 },
}

impl InstallError {
    pub fn description(&self) -> &'static str {
        match self {
            Self::NotAnException { .. } => "overrides only apply to exception vectors 0-31",
            Self::CriticalVector { .. } => "critical vectors cannot be overridden",
        }
    }
}

impl core::fmt::Display for InstallError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotAnException { vector } | Self::CriticalVector { vector } => {
                write!(f, "{} (vector {})", self.description(), vector)
            }
        }
    }
}

/// Handler chosen for one delivery.
#[derive(Debug, Clone, Copy)]
pub enum Resolved {
    Default(DefaultHandler),
    Override(ExceptionHandler),
    /// Handler tables were never initialized.
    Missing,
}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_SLOT: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());
#[allow(clippy::declare_interior_mutable_const)]
const ZERO: AtomicU64 = AtomicU64::new(0);

pub struct ExceptionDispatcher {
    mode: AtomicU8,
    defaults: Once<[DefaultHandler; EXCEPTION_VECTORS]>,
    overrides: [AtomicPtr<()>; EXCEPTION_VECTORS],
    counts: [AtomicU64; EXCEPTION_VECTORS],
}

impl ExceptionDispatcher {
    pub const fn new() -> Self {
        Self {
            mode: AtomicU8::new(ExceptionMode::Normal as u8),
            defaults: Once::new(),
            overrides: [EMPTY_SLOT; EXCEPTION_VECTORS],
            counts: [ZERO; EXCEPTION_VECTORS],
        }
    }

    /// Bind default handlers for 0..32 and clear every override.
    ///
    /// Later calls leave the default table untouched.
    pub fn initialize_handler_tables(&self) {
        self.defaults.call_once(|| {
            let mut table = [DefaultHandler::Unhandled; EXCEPTION_VECTORS];
            for (vector, slot) in table.iter_mut().enumerate() {
                *slot = DefaultHandler::for_vector(vector as u8);
            }
            table
        });
        self.clear_overrides();
    }

    pub fn tables_initialized(&self) -> bool {
        self.defaults.is_completed()
    }

    pub fn mode(&self) -> ExceptionMode {
        match self.mode.load(Ordering::Acquire) {
            1 => ExceptionMode::Test,
            _ => ExceptionMode::Normal,
        }
    }

    /// Switch mode. Entering `Normal` drops every override.
    pub fn set_mode(&self, mode: ExceptionMode) {
        self.mode.store(mode as u8, Ordering::Release);
        if mode == ExceptionMode::Normal {
            self.clear_overrides();
        }
        log::debug!("trap: exception mode {:?}", mode);
    }

    /// Install or clear (`None`) the override for `vector`.
    ///
    /// Clearing a critical vector is accepted since no override can exist there.
    pub fn install_exception_handler(
        &self,
        vector: u8,
        handler: Option<ExceptionHandler>,
    ) -> Result<(), InstallError> {
        if usize::from(vector) >= EXCEPTION_VECTORS {
            let err = InstallError::NotAnException { vector };
            log::warn!("trap: rejected override: {}", err);
            return Err(err);
        }
        let Some(slot) = OverridableVector::new(vector) else {
            if handler.is_none() {
                return Ok(());
            }
            let err = InstallError::CriticalVector { vector };
            log::warn!("trap: rejected override: {}", err);
            return Err(err);
        };

        let new = handler.map_or(ptr::null_mut(), |h| h as *mut ());
        let old = self.overrides[usize::from(slot.get())].swap(new, Ordering::AcqRel);
        if old != new {
            match handler {
                Some(_) => log::debug!("trap: override installed for vector {}", vector),
                None => log::debug!("trap: override cleared for vector {}", vector),
            }
        }
        Ok(())
    }

    pub fn override_installed(&self, vector: OverridableVector) -> bool {
        !self.overrides[usize::from(vector.get())].load(Ordering::Acquire).is_null()
    }

    /// Pick the handler for exception `vector` (`< 32`).
    pub fn resolve(&self, vector: u8) -> Resolved {
        let Some(defaults) = self.defaults.get() else {
            return Resolved::Missing;
        };
        if self.mode() == ExceptionMode::Test {
            if let Some(slot) = OverridableVector::new(vector) {
                let raw = self.overrides[usize::from(slot.get())].load(Ordering::Acquire);
                if !raw.is_null() {
                    // SAFETY: non-null slots only ever hold an `ExceptionHandler`
                    // stored by `install_exception_handler`.
                    let handler = unsafe { core::mem::transmute::<*mut (), ExceptionHandler>(raw) };
                    return Resolved::Override(handler);
                }
            }
        }
        defaults
            .get(usize::from(vector))
            .map_or(Resolved::Missing, |&handler| Resolved::Default(handler))
    }

    pub(super) fn count(&self, vector: u8) {
        if let Some(counter) = self.counts.get(usize::from(vector)) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Deliveries of exception `vector` since boot.
    pub fn exception_count(&self, vector: u8) -> u64 {
        self.counts
            .get(usize::from(vector))
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    fn clear_overrides(&self) {
        for slot in &self.overrides {
            slot.store(ptr::null_mut(), Ordering::Release);
        }
    }
}

impl Default for ExceptionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
