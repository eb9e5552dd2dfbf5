use std::collections::VecDeque;
use std::time::Duration;

const MIN_SAMPLES: usize = 3;
const MIN_SPAN_MS: u64 = 10 * 60 * 1000;

/// Rolling window of battery readings used to project time-to-empty.
#[derive(Debug, Clone)]
pub struct RuntimeEstimator {
    samples: VecDeque<(u64, f64)>,
    window_ms: u64,
}

impl RuntimeEstimator {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window_ms: window.as_millis() as u64,
        }
    }

    /// Add a battery percentage observed at `ts_ms` (epoch millis).
    /// Out-of-order samples are dropped.
    pub fn record(&mut self, ts_ms: u64, pct: f64) {
        if !pct.is_finite() {
            return;
        }
        if let Some(&(last, _)) = self.samples.back() {
            if ts_ms < last {
                return;
            }
            if ts_ms == last {
                self.samples.pop_back();
            }
        }
        self.samples.push_back((ts_ms, pct));
        self.prune(ts_ms);
    }

    fn prune(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while let Some(&(ts, _)) = self.samples.front() {
            if ts < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Discharge rate in percent per hour (negative while discharging).
    pub fn rate_per_hour(&self) -> Option<f64> {
        if self.samples.len() < MIN_SAMPLES {
            return None;
        }
        let (first, _) = *self.samples.front()?;
        let (last, _) = *self.samples.back()?;
        if last - first < MIN_SPAN_MS {
            return None;
        }

        // Least-squares slope over hours since the first sample.
        let n = self.samples.len() as f64;
        let xs: Vec<f64> = self
            .samples
            .iter()
            .map(|(ts, _)| (ts - first) as f64 / 3_600_000.0)
            .collect();
        let mean_x = xs.iter().sum::<f64>() / n;
        let mean_y = self.samples.iter().map(|(_, p)| p).sum::<f64>() / n;
        let mut num = 0.0;
        let mut den = 0.0;
        for (x, (_, y)) in xs.iter().zip(self.samples.iter()) {
            num += (x - mean_x) * (y - mean_y);
            den += (x - mean_x) * (x - mean_x);
        }
        if den == 0.0 {
            return None;
        }
        Some(num / den)
    }

    /// Time until the battery reaches 0 % at the current discharge rate.
    pub fn time_to_empty(&self) -> Option<Duration> {
        let rate = self.rate_per_hour()?;
        if rate >= 0.0 {
            return None;
        }
        let (_, pct) = *self.samples.back()?;
        let hours = (pct.max(0.0) / -rate).min(24.0 * 365.0);
        Some(Duration::from_secs_f64(hours * 3600.0))
    }
}

impl Default for RuntimeEstimator {
    fn default() -> Self {
        Self::new(Duration::from_secs(6 * 3600))
    }
}

/// `3h 07m` style rendering of a duration in seconds.
pub fn format_hours_minutes(secs: f64) -> String {
    if !secs.is_finite() || secs < 0.0 {
        return "-".to_string();
    }
    let total_min = (secs / 60.0).round() as u64;
    format!("{}h {:02}m", total_min / 60, total_min % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: u64 = 60_000;

    #[test]
    fn test_steady_discharge() {
        let mut est = RuntimeEstimator::default();
        // 1 % every 6 minutes = 10 %/h
        for i in 0..5u64 {
            est.record(i * 6 * MIN, 50.0 - i as f64);
        }
        let rate = est.rate_per_hour().unwrap();
        assert!((rate + 10.0).abs() < 1e-9);
        let tte = est.time_to_empty().unwrap();
        // 46 % left at 10 %/h
        assert!((tte.as_secs_f64() - 4.6 * 3600.0).abs() < 1.0);
    }

    #[test]
    fn test_charging_has_no_estimate() {
        let mut est = RuntimeEstimator::default();
        for i in 0..4u64 {
            est.record(i * 10 * MIN, 40.0 + i as f64);
        }
        assert!(est.rate_per_hour().unwrap() > 0.0);
        assert!(est.time_to_empty().is_none());
    }

    #[test]
    fn test_needs_enough_history() {
        let mut est = RuntimeEstimator::default();
        est.record(0, 90.0);
        est.record(MIN, 89.0);
        assert!(est.time_to_empty().is_none());
        est.record(2 * MIN, 88.0);
        // three samples but only two minutes of span
        assert!(est.time_to_empty().is_none());
    }

    #[test]
    fn test_window_prunes_old_samples() {
        let mut est = RuntimeEstimator::new(Duration::from_secs(3600));
        est.record(0, 80.0);
        est.record(30 * MIN, 79.0);
        est.record(90 * MIN, 78.0);
        assert_eq!(est.len(), 2);
        est.record(80 * MIN, 10.0);
        assert_eq!(est.len(), 2);
    }

    #[test]
    fn test_format_hours_minutes() {
        assert_eq!(format_hours_minutes(0.0), "0h 00m");
        assert_eq!(format_hours_minutes(3.0 * 3600.0 + 7.0 * 60.0), "3h 07m");
        assert_eq!(format_hours_minutes(-1.0), "-");
    }
}
