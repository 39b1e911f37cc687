//! Interior mutability for hardware-read tables.

use core::cell::UnsafeCell;

/// `UnsafeCell` that is `Sync`.
///
/// Holds structures the CPU reads directly from memory (segment table,
/// task-state block, vector table). They are written only during single-core
/// boot initialization, before the values are published to hardware, or by
/// narrowly scoped post-init calls (IST slots) that run with interrupts off.
#[repr(transparent)]
pub struct SyncUnsafeCell<T>(UnsafeCell<T>);

// SAFETY: writers are confined to single-threaded init code as documented on
// each owner; readers after init only perform plain loads.
unsafe impl<T> Sync for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    pub const fn new(val: T) -> Self {
        Self(UnsafeCell::new(val))
    }

    pub fn get(&self) -> *mut T {
        self.0.get()
    }
}
