use std::time::Duration;

/// Doubling delay with a ceiling.
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Between live delivery attempts for one frame.
    pub fn live() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(15_000))
    }

    /// Between queue drains after a drain stopped on a failure.
    pub fn drain_cooldown() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(30_000))
    }

    /// Delay to wait now; the following call returns double, up to `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn peek(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_backoff_doubles_to_cap() {
        let mut backoff = Backoff::live();
        let delays: Vec<u64> = (0..7)
            .map(|_| backoff.next_delay().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 15_000, 15_000, 15_000]);
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut backoff = Backoff::drain_cooldown();
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.peek(), Duration::from_secs(30));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
