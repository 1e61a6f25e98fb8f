//! Round-trip-time sampling and the adaptive receive timeout.
//!
//! Every acknowledged segment yields one sample, measured from that segment's
//! most recent (re)transmission.  Samples are kept in arrival order for the
//! run-end summary.  Once more than `window` samples exist the timeout is
//! recomputed as
//!
//! ```text
//!   timeout = multiplier × mean(last `window` samples)
//! ```
//!
//! Until then the configured initial timeout stays in force.

use std::time::Duration;

/// RTT sample log plus the timeout derived from it.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    samples: Vec<Duration>,
    timeout: Duration,
    window: usize,
    multiplier: u32,
}

impl RttEstimator {
    /// `window` must be in `1..=u32::MAX` and `multiplier` non-zero (enforced
    /// by [`crate::config::ClientConfig::validate`]).
    pub fn new(initial_timeout: Duration, window: usize, multiplier: u32) -> Self {
        Self {
            samples: Vec::new(),
            timeout: initial_timeout,
            window,
            multiplier,
        }
    }

    /// Append a sample and refresh the timeout if enough history exists.
    pub fn record(&mut self, sample: Duration) {
        self.samples.push(sample);
        if self.samples.len() > self.window {
            let recent = &self.samples[self.samples.len() - self.window..];
            let total: Duration = recent.iter().sum();
            let mean = total / u32::try_from(recent.len()).unwrap_or(u32::MAX);
            self.timeout = mean * self.multiplier;
        }
    }

    /// Receive timeout to use for the next blocking receive.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }

    /// Summary statistics over all samples, or `None` before the first one.
    pub fn summary(&self) -> Option<RttSummary> {
        RttSummary::from_samples(&self.samples)
    }
}

/// Max / min / mean / sample standard deviation of RTTs, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttSummary {
    pub max_ms: f64,
    pub min_ms: f64,
    pub mean_ms: f64,
    /// Bessel-corrected (n − 1); `0.0` for a single sample.
    pub std_dev_ms: f64,
}

impl RttSummary {
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let ms: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        let n = ms.len() as f64;
        let mean = ms.iter().sum::<f64>() / n;
        let max = ms.iter().copied().fold(f64::MIN, f64::max);
        let min = ms.iter().copied().fold(f64::MAX, f64::min);
        let std_dev = if ms.len() > 1 {
            let var = ms.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
            var.sqrt()
        } else {
            0.0
        };
        Some(Self {
            max_ms: max,
            min_ms: min,
            mean_ms: mean,
            std_dev_ms: std_dev,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn timeout_unchanged_until_window_exceeded() {
        let mut e = RttEstimator::new(ms(300), 5, 5);
        for _ in 0..5 {
            e.record(ms(10));
        }
        // Exactly `window` samples is not enough.
        assert_eq!(e.timeout(), ms(300));

        e.record(ms(10));
        assert_eq!(e.timeout(), ms(50));
    }

    #[test]
    fn timeout_uses_only_recent_samples() {
        let mut e = RttEstimator::new(ms(300), 5, 5);
        e.record(ms(1000)); // falls out of the window
        for v in [2, 4, 6, 8, 10] {
            e.record(ms(v));
        }
        // mean(2, 4, 6, 8, 10) = 6 → 30ms
        assert_eq!(e.timeout(), ms(30));
        assert_eq!(e.samples().len(), 6);
    }

    #[test]
    fn timeout_divides_by_recent_sample_count() {
        let mut e = RttEstimator::new(ms(300), 2, 3);
        for v in [100, 4, 8] {
            e.record(ms(v));
        }
        // mean(4, 8) = 6 → 18ms
        assert_eq!(e.timeout(), ms(18));
    }

    #[test]
    fn samples_keep_arrival_order() {
        let mut e = RttEstimator::new(ms(300), 5, 5);
        e.record(ms(3));
        e.record(ms(1));
        e.record(ms(2));
        assert_eq!(e.samples(), &[ms(3), ms(1), ms(2)]);
    }

    #[test]
    fn summary_absent_without_samples() {
        let e = RttEstimator::new(ms(300), 5, 5);
        assert!(e.summary().is_none());
    }

    #[test]
    fn summary_statistics() {
        let s = RttSummary::from_samples(&[ms(2), ms(4), ms(4), ms(4), ms(5), ms(5), ms(7), ms(9)])
            .unwrap();
        assert!((s.max_ms - 9.0).abs() < 1e-9);
        assert!((s.min_ms - 2.0).abs() < 1e-9);
        assert!((s.mean_ms - 5.0).abs() < 1e-9);
        // sum of squared deviations = 32, n - 1 = 7
        assert!((s.std_dev_ms - (32.0f64 / 7.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn single_sample_has_zero_spread() {
        let s = RttSummary::from_samples(&[ms(12)]).unwrap();
        assert_eq!(s.std_dev_ms, 0.0);
        assert!((s.mean_ms - 12.0).abs() < 1e-9);
    }
}
