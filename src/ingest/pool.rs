use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{CaptureError, CaptureResult};

/// Fixed set of hardware frame slots.
///
/// Mirrors a camera driver's `fb_count`: once every slot is checked out,
/// `checkout` blocks until a holder returns one or the timeout expires.
pub struct BufferPool {
    slots: Mutex<Vec<bool>>,
    available: Condvar,
    timeout: Duration,
}

impl BufferPool {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(vec![false; capacity.max(1)]),
            available: Condvar::new(),
            timeout,
        }
    }

    pub fn checkout(&self) -> CaptureResult<usize> {
        let guard = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut slots, wait) = self
            .available
            .wait_timeout_while(guard, self.timeout, |slots| slots.iter().all(|used| *used))
            .unwrap_or_else(PoisonError::into_inner);
        if wait.timed_out() && slots.iter().all(|used| *used) {
            return Err(CaptureError::hardware(format!(
                "no free frame buffer after {} ms",
                self.timeout.as_millis()
            )));
        }
        let slot = slots
            .iter()
            .position(|used| !*used)
            .ok_or_else(|| CaptureError::hardware("frame buffer pool exhausted"))?;
        slots[slot] = true;
        Ok(slot)
    }

    pub fn checkin(&self, slot: usize) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.get_mut(slot) {
            Some(used) if *used => {
                *used = false;
                self.available.notify_one();
            }
            Some(_) => log::warn!("frame buffer slot {} returned twice", slot),
            None => log::warn!("frame buffer slot {} out of range", slot),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn in_use(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|used| **used)
            .count()
    }
}
