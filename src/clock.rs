//! Time source for the uploader state machine.
//!
//! All delays in the upload path go through `Clock::sleep`, so tests can swap
//! in `ManualClock` and assert on the exact backoff sequence without waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

const SLEEP_SLICE: Duration = Duration::from_millis(50);

pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;

    /// Wait for `duration`. Returns `false` if the wait was cut short by shutdown.
    fn sleep(&self, duration: Duration) -> bool;
}

/// Wall-clock implementation. Sleeps in short slices so a shutdown request is
/// honoured within `SLEEP_SLICE`.
pub struct SystemClock {
    origin: Instant,
    shutdown: Arc<AtomicBool>,
}

impl SystemClock {
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Self {
            origin: Instant::now(),
            shutdown,
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Virtual clock: `sleep` records the request and advances time instantly.
#[derive(Default)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    sleeps: Vec<Duration>,
    stop_after: Option<usize>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report shutdown once `count` sleeps have been requested.
    pub fn stopping_after(count: usize) -> Self {
        let clock = Self::default();
        clock.lock().stop_after = Some(count);
        clock
    }

    pub fn advance(&self, by: Duration) {
        self.lock().now += by;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.lock().now
    }

    fn sleep(&self, duration: Duration) -> bool {
        let mut state = self.lock();
        state.sleeps.push(duration);
        state.now += duration;
        match state.stop_after {
            Some(limit) => state.sleeps.len() < limit,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_records_and_advances() {
        let clock = ManualClock::new();
        assert!(clock.sleep(Duration::from_millis(1000)));
        assert!(clock.sleep(Duration::from_millis(2000)));
        assert_eq!(clock.now(), Duration::from_millis(3000));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
    }

    #[test]
    fn manual_clock_signals_stop() {
        let clock = ManualClock::stopping_after(2);
        assert!(clock.sleep(Duration::from_millis(1)));
        assert!(!clock.sleep(Duration::from_millis(1)));
    }

    #[test]
    fn system_clock_aborts_on_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(true));
        let clock = SystemClock::new(shutdown);
        let started = Instant::now();
        assert!(!clock.sleep(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
