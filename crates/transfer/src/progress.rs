//! Transfer rate over a sliding window of acknowledged chunks.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const DEFAULT_CAPACITY: usize = 100;

/// Rate estimator fed by the scheduler each time a chunk is acknowledged.
///
/// Only samples younger than the window count, and at most `capacity` of
/// them are retained. Time comes from `tokio::time`, so paused-clock tests
/// see deterministic rates.
pub struct SpeedCalculator {
    window: Duration,
    capacity: usize,
    samples: Mutex<VecDeque<(Instant, u64)>>,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::with_window(DEFAULT_WINDOW, DEFAULT_CAPACITY)
    }
}

impl SpeedCalculator {
    pub fn with_window(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(2),
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Records `bytes` acknowledged now.
    pub fn record(&self, bytes: u64) {
        let now = Instant::now();
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples.push_back((now, bytes));
        while let Some(&(at, _)) = samples.front()
            && (now.duration_since(at) > self.window || samples.len() > self.capacity)
        {
            samples.pop_front();
        }
    }

    /// Bytes per second across the retained samples, or 0 until two samples
    /// at distinct instants exist.
    pub fn bytes_per_second(&self) -> f64 {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let (Some(&(first, _)), Some(&(last, _))) = (samples.front(), samples.back()) else {
            return 0.0;
        };
        let span = last.duration_since(first);
        if span.is_zero() {
            return 0.0;
        }
        let bytes: u64 = samples.iter().map(|&(_, b)| b).sum();
        bytes as f64 / span.as_secs_f64()
    }

    /// Time to move `remaining` bytes at the current rate; `None` while the
    /// rate is unknown.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        (rate > 0.0).then(|| Duration::from_secs_f64(remaining as f64 / rate))
    }
}
