//! Bounded-concurrency admission control for fallible external operations.
//!
//! The active count is an `AtomicU32` updated with a CAS loop, so a gate can be
//! shared with a multi-threaded host without an extra lock. Slots are handed
//! out as RAII [`SlotPermit`]s; dropping the permit releases the slot.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, error};

use crate::core::SchedulerError;

/// Limits how many operations may be in flight at once.
#[derive(Debug)]
pub struct ConcurrencyGate {
    name: String,
    max: u32,
    active: AtomicU32,
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `max` concurrent operations.
    pub fn new(name: impl Into<String>, max: u32) -> Result<Arc<Self>, SchedulerError> {
        let name = name.into();
        if max == 0 {
            return Err(SchedulerError::Validation(format!(
                "gate `{name}`: max concurrent must be greater than 0"
            )));
        }
        Ok(Arc::new(Self {
            name,
            max,
            active: AtomicU32::new(0),
        }))
    }

    /// Gate name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured maximum.
    #[must_use]
    pub const fn max(&self) -> u32 {
        self.max
    }

    /// Slots currently held.
    #[must_use]
    pub fn active(&self) -> u32 {
        self.active.load(Ordering::Acquire)
    }

    /// Slots currently free.
    #[must_use]
    pub fn available(&self) -> u32 {
        self.max.saturating_sub(self.active())
    }

    /// Take a slot if the active count is strictly below the maximum.
    ///
    /// Callers that get `None` retry on a later frame.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<SlotPermit> {
        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if current >= self.max {
                return None;
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    debug!(gate = %self.name, active = current + 1, "slot acquired");
                    return Some(SlotPermit {
                        gate: Arc::clone(self),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn release_slot(&self) {
        let released = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match released {
            Ok(prev) => debug!(gate = %self.name, active = prev - 1, "slot released"),
            Err(_) => error!(gate = %self.name, "slot released with no active slots"),
        }
        debug_assert!(released.is_ok(), "double release on gate `{}`", self.name);
    }
}

/// A held concurrency slot; released on drop.
#[derive(Debug)]
pub struct SlotPermit {
    gate: Arc<ConcurrencyGate>,
}

impl SlotPermit {
    /// Gate the slot belongs to.
    #[must_use]
    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    /// Release the slot now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.gate.release_slot();
    }
}
