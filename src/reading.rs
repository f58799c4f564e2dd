//! The shared temperature reading and the capability used to reach it.
use std::sync::{
    atomic::{AtomicI32, Ordering},
    Arc,
};

/// Temperature a freshly loaded provider starts out with.
pub const DEFAULT_READING: i32 = 42;

/// The single mock temperature register.
///
/// This is deliberately a plain atomic word and nothing more. Concurrent
/// writers race and the last store wins, readers see either value but never a
/// torn one.
#[derive(Debug)]
pub struct Reading {
    value: AtomicI32,
}

impl Reading {
    pub fn new(value: i32) -> Self {
        Self {
            value: AtomicI32::new(value),
        }
    }

    pub fn get(&self) -> i32 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn set(&self, value: i32) {
        self.value.store(value, Ordering::Relaxed)
    }
}

impl Default for Reading {
    fn default() -> Self {
        Self::new(DEFAULT_READING)
    }
}

/// The two entry points the provider exports to other modules.
///
/// Handed to [`crate::virtual_device::VirtualDevice`] when it is constructed,
/// which makes the load order dependency explicit: no provider, no `ReadingOps`,
/// no device.
///
/// Cloning is cheap, every clone refers to the same [`Reading`].
#[derive(Debug, Clone)]
pub struct ReadingOps {
    reading: Arc<Reading>,
}

impl ReadingOps {
    pub(crate) fn new(reading: Arc<Reading>) -> Self {
        Self { reading }
    }

    /// Current temperature. Always succeeds.
    pub fn get_reading(&self) -> i32 {
        self.reading.get()
    }

    /// Overwrite the temperature. Any `i32` is accepted.
    pub fn set_reading(&self, value: i32) {
        self.reading.set(value)
    }

    /// Whether `self` and `other` reach the same [`Reading`].
    #[cfg(test)]
    pub fn same_reading(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.reading, &other.reading)
    }
}
