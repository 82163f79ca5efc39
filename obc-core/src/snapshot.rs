use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// A lock-protected snapshot of `Copy` data shared between supervisor jobs.
///
/// Producers overwrite the whole value; consumers always see a coherent
/// snapshot. This is the leaf of the lock hierarchy: reading or writing a
/// cell never takes any other lock, which is what makes cells safe to touch
/// from telemetry generators and beacon assembly.
pub struct SnapshotCell<T: Copy> {
    inner: Mutex<CriticalSectionRawMutex, Cell<T>>,
}

impl<T: Copy> SnapshotCell<T> {
    pub const fn new(init: T) -> Self {
        Self {
            inner: Mutex::new(Cell::new(init)),
        }
    }

    pub fn get(&self) -> T {
        self.inner.lock(|cell| cell.get())
    }

    pub fn set(&self, value: T) {
        self.inner.lock(|cell| cell.set(value));
    }

    /// Read-modify-write under the lock.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.inner.lock(|cell| {
            let mut value = cell.get();
            f(&mut value);
            cell.set(value);
        });
    }
}
