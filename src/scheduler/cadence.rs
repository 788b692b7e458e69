// Adaptive display cadence driven by reported scan results

use std::collections::VecDeque;
use std::time::Duration;

use crate::common::config::TransferConfig;
use crate::common::types::{MAX_VERSION, SCAN_WINDOW};

/// Average latency under this doubles into the next interval
const FAST_SCAN: Duration = Duration::from_millis(300);
/// Average latency over this is used as the interval directly
const SLOW_SCAN: Duration = Duration::from_millis(1000);

const LOW_SUCCESS: f64 = 0.7;
const HIGH_SUCCESS: f64 = 0.95;
const SLOWDOWN: f64 = 1.5;
const SPEEDUP: f64 = 0.8;
/// Share of the interval a maximally complex symbol adds
const COMPLEXITY_WEIGHT: f64 = 0.2;

/// How hard a symbol is to scan, in `[0, 1]`
///
/// # Arguments
/// * `payload_len` - Bytes embedded in the symbol
/// * `capacity` - Byte capacity of the symbol
/// * `version` - Symbol size class
pub fn symbol_complexity(payload_len: usize, capacity: usize, version: u8) -> f64 {
    let utilisation = if capacity == 0 {
        1.0
    } else {
        (payload_len as f64 / capacity as f64).min(1.0)
    };
    let size_factor = version as f64 / MAX_VERSION as f64;
    utilisation * 0.7 + size_factor * 0.3
}

/// Picks how long each symbol stays on screen
#[derive(Debug, Clone)]
pub struct CadenceController {
    adaptive: bool,
    default_interval: Duration,
    min_interval: Duration,
    max_interval: Duration,
    /// Base interval derived from the latency window
    base: Duration,
    latencies: VecDeque<Duration>,
    scans: u64,
    successes: u64,
}

impl CadenceController {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            adaptive: config.adaptive_sizing,
            default_interval: config.display_duration,
            min_interval: config.min_display,
            max_interval: config.max_display,
            base: config.display_duration,
            latencies: VecDeque::with_capacity(SCAN_WINDOW),
            scans: 0,
            successes: 0,
        }
    }

    /// Feed one externally observed scan
    pub fn record_scan(&mut self, latency: Duration, success: bool) {
        self.scans += 1;
        if success {
            self.successes += 1;
        }
        if self.latencies.len() == SCAN_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);

        if let Some(average) = self.average_latency() {
            self.base = if average < FAST_SCAN {
                (average * 2).max(self.min_interval)
            } else if average > SLOW_SCAN {
                average.min(self.max_interval)
            } else {
                self.default_interval
            };
        }
    }

    /// Fraction of reported scans that succeeded; 1.0 before any report
    pub fn success_rate(&self) -> f64 {
        if self.scans == 0 {
            return 1.0;
        }
        self.successes as f64 / self.scans as f64
    }

    /// Mean of the latency window
    pub fn average_latency(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let total: Duration = self.latencies.iter().sum();
        Some(total / self.latencies.len() as u32)
    }

    pub fn scans(&self) -> u64 {
        self.scans
    }

    /// Interval for a symbol of the given complexity
    pub fn next_interval(&self, complexity: f64) -> Duration {
        if !self.adaptive {
            return self.default_interval;
        }
        let mut ms = self.base.as_millis() as f64;
        let rate = self.success_rate();
        if rate < LOW_SUCCESS {
            ms *= SLOWDOWN;
        } else if rate > HIGH_SUCCESS {
            ms *= SPEEDUP;
        }
        ms *= 1.0 + complexity.clamp(0.0, 1.0) * COMPLEXITY_WEIGHT;

        Duration::from_millis(ms.round() as u64).clamp(self.min_interval, self.max_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_fixed_cadence_when_not_adaptive() {
        let mut config = TransferConfig::default();
        config.adaptive_sizing = false;
        let mut cadence = CadenceController::new(&config);
        for _ in 0..5 {
            cadence.record_scan(ms(100), false);
        }
        assert_eq!(cadence.next_interval(1.0), config.display_duration);
    }

    #[test]
    fn test_fast_scans_double_latency() {
        let config = TransferConfig::default();
        let mut cadence = CadenceController::new(&config);
        // 4 of 5 succeed: 0.8 is neither slow nor fast
        for success in [true, true, true, true, false] {
            cadence.record_scan(ms(200), success);
        }
        assert_eq!(cadence.average_latency(), Some(ms(200)));
        assert_eq!(cadence.next_interval(0.0), ms(400));
    }

    #[test]
    fn test_low_success_slows_down() {
        let config = TransferConfig::default();
        let mut cadence = CadenceController::new(&config);
        for success in [true, false, false, true] {
            cadence.record_scan(ms(500), success);
        }
        // Mid-range latency keeps the default 500 ms, then ×1.5
        assert_eq!(cadence.next_interval(0.0), ms(750));
    }

    #[test]
    fn test_high_success_speeds_up_and_clamps() {
        let config = TransferConfig::default();
        let mut cadence = CadenceController::new(&config);
        for _ in 0..10 {
            cadence.record_scan(ms(50), true);
        }
        // 2×50 is under the floor, 300 ×0.8 is too: clamped back to 300
        assert_eq!(cadence.next_interval(0.0), config.min_display);

        let mut slow = CadenceController::new(&config);
        for _ in 0..3 {
            slow.record_scan(ms(4000), false);
        }
        assert_eq!(slow.next_interval(1.0), config.max_display);
    }

    #[test]
    fn test_complexity_stretches_interval() {
        let config = TransferConfig::default();
        let cadence = CadenceController::new(&config);
        let plain = cadence.next_interval(0.0);
        let complex = cadence.next_interval(1.0);
        assert!(complex > plain);
        assert!(complex.as_millis() as f64 <= plain.as_millis() as f64 * 1.2 + 1.0);
    }

    #[test]
    fn test_window_is_bounded() {
        let config = TransferConfig::default();
        let mut cadence = CadenceController::new(&config);
        for _ in 0..SCAN_WINDOW {
            cadence.record_scan(ms(2000), true);
        }
        for _ in 0..SCAN_WINDOW {
            cadence.record_scan(ms(100), true);
        }
        assert_eq!(cadence.average_latency(), Some(ms(100)));
        assert_eq!(cadence.scans(), 2 * SCAN_WINDOW as u64);
    }

    #[test]
    fn test_symbol_complexity() {
        assert!((symbol_complexity(100, 100, 40) - 1.0).abs() < 1e-9);
        assert!((symbol_complexity(0, 100, 20) - 0.15).abs() < 1e-9);
        assert_eq!(symbol_complexity(10, 0, 0), 0.7);
    }
}
