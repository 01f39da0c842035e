//! Sliding window of recent successful latencies for one target.

use std::collections::VecDeque;

/// Number of samples kept per target.
pub const HISTORY_CAPACITY: usize = 100;

/// Bounded FIFO of latency samples in milliseconds.
#[derive(Debug, Clone)]
pub struct LatencyHistory {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl Default for LatencyHistory {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl LatencyHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append a sample, evicting the oldest when full.
    pub fn record(&mut self, latency_ms: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
    }

    /// Arithmetic mean of the window, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn min(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::max)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_history() {
        let history = LatencyHistory::default();
        assert!(history.is_empty());
        assert_eq!(history.mean(), None);
        assert_eq!(history.min(), None);
        assert_eq!(history.max(), None);
    }

    #[test]
    fn test_mean_min_max() {
        let mut history = LatencyHistory::default();
        for ms in [10.0, 20.0, 30.0, 40.0] {
            history.record(ms);
        }
        assert_eq!(history.len(), 4);
        assert_eq!(history.mean(), Some(25.0));
        assert_eq!(history.min(), Some(10.0));
        assert_eq!(history.max(), Some(40.0));
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let mut history = LatencyHistory::default();
        for i in 0..250 {
            history.record(i as f64);
            assert!(history.len() <= HISTORY_CAPACITY);
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);
    }

    #[test]
    fn test_oldest_samples_are_evicted_first() {
        let mut history = LatencyHistory::default();
        for i in 0..105 {
            history.record(i as f64);
        }
        let samples: Vec<f64> = history.iter().collect();
        assert_eq!(samples.first(), Some(&5.0));
        assert_eq!(samples.last(), Some(&104.0));
        assert!(!samples.contains(&4.0));
        // mean of 5..=104
        assert_eq!(history.mean(), Some(54.5));
    }

    #[test]
    fn test_small_capacity() {
        let mut history = LatencyHistory::with_capacity(2);
        history.record(1.0);
        history.record(2.0);
        history.record(3.0);
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![2.0, 3.0]);
    }
}
