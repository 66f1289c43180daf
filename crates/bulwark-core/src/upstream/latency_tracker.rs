//! Rolling window of recent call latencies for one endpoint.

use parking_lot::Mutex;
use std::{collections::VecDeque, time::Duration};
use tokio::time::Instant;

/// Default number of samples kept per endpoint.
pub const DEFAULT_WINDOW_SIZE: usize = 256;

#[derive(Debug)]
struct Window {
    samples: VecDeque<u64>,
    last_recorded: Option<Instant>,
}

/// Fixed-size rolling window of latency samples in milliseconds.
///
/// The oldest sample is evicted once the window is full. Percentiles sort a copy of the window,
/// which is cheap for the window sizes used here and keeps recording O(1).
#[derive(Debug)]
pub struct LatencyTracker {
    window: Mutex<Window>,
    capacity: usize,
}

/// Summary of the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencyStats {
    pub samples: usize,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub average_ms: Option<u64>,
}

impl LatencyTracker {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: Mutex::new(Window {
                samples: VecDeque::with_capacity(capacity),
                last_recorded: None,
            }),
            capacity,
        }
    }

    pub fn record(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let mut window = self.window.lock();
        if window.samples.len() == self.capacity {
            window.samples.pop_front();
        }
        window.samples.push_back(millis);
        window.last_recorded = Some(Instant::now());
    }

    fn sorted(&self) -> Vec<u64> {
        let mut sorted: Vec<u64> = self.window.lock().samples.iter().copied().collect();
        sorted.sort_unstable();
        sorted
    }

    fn pick(sorted: &[u64], quantile: f64) -> Option<u64> {
        if sorted.is_empty() || !(0.0..=1.0).contains(&quantile) {
            return None;
        }
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let index = ((sorted.len() as f64 - 1.0) * quantile).round() as usize;
        sorted.get(index).copied()
    }

    /// Latency at `quantile` (0.0..=1.0) over the window, in milliseconds.
    #[must_use]
    pub fn percentile(&self, quantile: f64) -> Option<u64> {
        Self::pick(&self.sorted(), quantile)
    }

    #[must_use]
    pub fn average(&self) -> Option<u64> {
        let window = self.window.lock();
        if window.samples.is_empty() {
            return None;
        }
        let sum: u128 = window.samples.iter().map(|&v| u128::from(v)).sum();
        u64::try_from(sum / window.samples.len() as u128).ok()
    }

    #[must_use]
    pub fn stats(&self) -> LatencyStats {
        let sorted = self.sorted();
        let average_ms = if sorted.is_empty() {
            None
        } else {
            let sum: u128 = sorted.iter().map(|&v| u128::from(v)).sum();
            u64::try_from(sum / sorted.len() as u128).ok()
        };
        LatencyStats {
            samples: sorted.len(),
            p50_ms: Self::pick(&sorted, 0.50),
            p95_ms: Self::pick(&sorted, 0.95),
            p99_ms: Self::pick(&sorted, 0.99),
            average_ms,
        }
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.window.lock().samples.len()
    }

    #[must_use]
    pub fn time_since_last_sample(&self) -> Option<Duration> {
        self.window.lock().last_recorded.map(|at| at.elapsed())
    }

    pub fn clear(&self) {
        let mut window = self.window.lock();
        window.samples.clear();
        window.last_recorded = None;
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}
