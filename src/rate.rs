//! Moving average of frame intervals, for diagnostics only.

use std::sync::{Arc, Mutex};

pub const DEFAULT_WINDOW: usize = 20;

/// Fixed-size circular window of millisecond intervals.
///
/// `count <= size` always holds, and `sum` equals the sum of the last `count`
/// observed values.
#[derive(Clone, Debug)]
pub struct RateFilter {
    values: Vec<u32>,
    index: usize,
    count: usize,
    sum: u64,
}

/// Process-wide filter shared by every live stream session.
pub type SharedRateFilter = Arc<Mutex<RateFilter>>;

impl RateFilter {
    pub fn new(size: usize) -> Self {
        Self {
            values: vec![0; size],
            index: 0,
            count: 0,
            sum: 0,
        }
    }

    pub fn shared(size: usize) -> SharedRateFilter {
        Arc::new(Mutex::new(Self::new(size)))
    }

    /// Record one interval and return the current average.
    pub fn observe(&mut self, interval_ms: u32) -> u32 {
        if self.values.is_empty() {
            return interval_ms;
        }
        self.sum -= u64::from(self.values[self.index]);
        self.values[self.index] = interval_ms;
        self.sum += u64::from(interval_ms);
        self.index = (self.index + 1) % self.values.len();
        if self.count < self.values.len() {
            self.count += 1;
        }
        (self.sum / self.count as u64) as u32
    }

    /// Last reported average, or `None` before the first sample.
    pub fn average(&self) -> Option<u32> {
        if self.count == 0 {
            None
        } else {
            Some((self.sum / self.count as u64) as u32)
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }
}

impl Default for RateFilter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_of_partial_window_is_plain_mean() {
        let mut filter = RateFilter::new(20);
        let samples = [10, 20, 30, 40, 50];
        let mut last = 0;
        for s in samples {
            last = filter.observe(s);
        }
        assert_eq!(last, 30);
        assert_eq!(filter.count(), 5);
    }

    #[test]
    fn full_window_drops_oldest_samples() {
        let mut filter = RateFilter::new(4);
        for s in [1000, 1000, 1000, 1000] {
            filter.observe(s);
        }
        // Four more samples push every 1000 out of the window.
        let mut last = 0;
        for s in [10, 20, 30, 40] {
            last = filter.observe(s);
        }
        assert_eq!(last, 25);
        assert_eq!(filter.count(), 4);
    }

    #[test]
    fn count_saturates_and_sum_tracks_window() {
        let mut filter = RateFilter::new(3);
        let samples: Vec<u32> = (1..=10).collect();
        for (i, s) in samples.iter().enumerate() {
            let avg = filter.observe(*s);
            let window = &samples[i.saturating_sub(2)..=i];
            let expected = window.iter().map(|v| u64::from(*v)).sum::<u64>() / window.len() as u64;
            assert_eq!(u64::from(avg), expected);
            assert!(filter.count() <= filter.size());
        }
    }

    #[test]
    fn empty_window_passes_value_through() {
        let mut filter = RateFilter::new(0);
        assert_eq!(filter.observe(42), 42);
        assert_eq!(filter.average(), None);
    }
}
