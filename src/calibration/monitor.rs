//! Calibration Monitor
//!
//! Keeps a bounded window of recently served calibrated probabilities so
//! calibration drift can be inspected without touching request handling.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::{get_calibration_stats, CalibrationStats};

/// Default number of probabilities retained
pub const DEFAULT_WINDOW: usize = 10_000;

/// Rolling window of calibrated probabilities
#[derive(Debug)]
pub struct CalibrationMonitor {
    recent: Mutex<VecDeque<f64>>,
    max_history: usize,
}

impl CalibrationMonitor {
    pub fn new(max_history: usize) -> Self {
        let max_history = max_history.max(1);
        Self {
            recent: Mutex::new(VecDeque::with_capacity(max_history.min(DEFAULT_WINDOW))),
            max_history,
        }
    }

    /// Record a batch of served probabilities, evicting the oldest
    pub fn record(&self, probabilities: &[f64]) {
        let mut recent = self.recent.lock();
        for &p in probabilities {
            recent.push_back(p);
        }
        while recent.len() > self.max_history {
            recent.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.recent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summary of the current window
    pub fn stats(&self) -> CalibrationStats {
        let snapshot: Vec<f64> = self.recent.lock().iter().copied().collect();
        get_calibration_stats(&snapshot)
    }

    pub fn reset(&self) {
        self.recent.lock().clear();
    }
}

impl Default for CalibrationMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_evicts_oldest() {
        let monitor = CalibrationMonitor::new(3);
        monitor.record(&[0.1, 0.2]);
        monitor.record(&[0.3, 0.4]);

        assert_eq!(monitor.len(), 3);
        let stats = monitor.stats();
        assert_eq!(stats.min, 0.2);
        assert_eq!(stats.max, 0.4);
    }

    #[test]
    fn test_reset() {
        let monitor = CalibrationMonitor::default();
        monitor.record(&[0.5]);
        monitor.reset();
        assert!(monitor.is_empty());
        assert_eq!(monitor.stats().count, 0);
    }
}
