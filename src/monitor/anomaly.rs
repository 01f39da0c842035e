//! Hysteresis-based latency anomaly detection.

use super::LatencyHistory;

/// Samples required before any sample can be judged.
pub const MIN_SAMPLES: usize = 10;

/// Result of judging one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyVerdict {
    /// True only on the sample that completes a full streak
    pub is_anomaly: bool,
    /// Mean of the history, `None` while warming up
    pub rolling_mean_ms: Option<f64>,
}

/// Fires after `required_count` consecutive samples above
/// `mean * (1 + threshold_percent / 100)`.
///
/// One detector per target; the owning monitor is its only user.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    threshold_percent: f64,
    required_count: u32,
    consecutive: u32,
}

impl AnomalyDetector {
    pub fn new(threshold_percent: f64, required_count: u32) -> Self {
        Self {
            threshold_percent,
            required_count: required_count.max(1),
            consecutive: 0,
        }
    }

    /// Current length of the over-threshold streak.
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn required_count(&self) -> u32 {
        self.required_count
    }

    /// Judge `current_ms` against `history`.
    pub fn evaluate(&mut self, current_ms: f64, history: &LatencyHistory) -> AnomalyVerdict {
        let rolling_mean = match history.mean() {
            Some(mean) if history.len() >= MIN_SAMPLES => mean,
            _ => {
                return AnomalyVerdict {
                    is_anomaly: false,
                    rolling_mean_ms: None,
                }
            }
        };

        let threshold = rolling_mean * (1.0 + self.threshold_percent / 100.0);

        let is_anomaly = if current_ms > threshold {
            self.consecutive += 1;
            if self.consecutive >= self.required_count {
                self.consecutive = 0;
                true
            } else {
                false
            }
        } else {
            self.consecutive = 0;
            false
        };

        AnomalyVerdict {
            is_anomaly,
            rolling_mean_ms: Some(rolling_mean),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_of(samples: &[f64]) -> LatencyHistory {
        let mut history = LatencyHistory::default();
        for &ms in samples {
            history.record(ms);
        }
        history
    }

    #[test]
    fn test_cold_start_never_fires() {
        let mut detector = AnomalyDetector::new(30.0, 1);
        let history = history_of(&[10.0; 9]);
        for current in [0.0, 10.0, 1_000.0, 1e9] {
            let verdict = detector.evaluate(current, &history);
            assert_eq!(
                verdict,
                AnomalyVerdict {
                    is_anomaly: false,
                    rolling_mean_ms: None
                }
            );
        }
        assert_eq!(detector.consecutive(), 0);
    }

    #[test]
    fn test_over_threshold_increments_and_normal_resets() {
        // mean 20, threshold 26
        let history = history_of(&[20.0; 10]);
        let mut detector = AnomalyDetector::new(30.0, 5);

        detector.evaluate(27.0, &history);
        detector.evaluate(30.0, &history);
        assert_eq!(detector.consecutive(), 2);

        // equal to the threshold is not over it
        let verdict = detector.evaluate(26.0, &history);
        assert!(!verdict.is_anomaly);
        assert_eq!(verdict.rolling_mean_ms, Some(20.0));
        assert_eq!(detector.consecutive(), 0);
    }

    #[test]
    fn test_fires_on_nth_sample_and_resets() {
        let history = history_of(&[20.0; 10]);
        let mut detector = AnomalyDetector::new(30.0, 3);

        assert!(!detector.evaluate(40.0, &history).is_anomaly);
        assert!(!detector.evaluate(40.0, &history).is_anomaly);
        let verdict = detector.evaluate(40.0, &history);
        assert!(verdict.is_anomaly);
        assert_eq!(verdict.rolling_mean_ms, Some(20.0));
        assert_eq!(detector.consecutive(), 0);

        // a new streak has to start over
        assert!(!detector.evaluate(40.0, &history).is_anomaly);
        assert_eq!(detector.consecutive(), 1);
    }

    #[test]
    fn test_single_normal_sample_breaks_streak() {
        let history = history_of(&[20.0; 10]);
        let mut detector = AnomalyDetector::new(30.0, 3);

        detector.evaluate(40.0, &history);
        detector.evaluate(40.0, &history);
        detector.evaluate(20.0, &history);
        detector.evaluate(40.0, &history);
        assert!(!detector.evaluate(40.0, &history).is_anomaly);
        assert!(detector.evaluate(40.0, &history).is_anomaly);
    }

    #[test]
    fn test_count_of_one_fires_on_every_spike() {
        let history = history_of(&[10.0; 10]);
        let mut detector = AnomalyDetector::new(0.0, 1);
        assert!(detector.evaluate(10.5, &history).is_anomaly);
        assert!(detector.evaluate(10.5, &history).is_anomaly);
        assert!(!detector.evaluate(10.0, &history).is_anomaly);
    }
}
