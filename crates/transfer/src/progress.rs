use std::time::{Duration, Instant};

/// Default minimum spacing between two status updates.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Average transfer speed in bytes/second. Returns 0.0 for zero elapsed time.
pub fn transfer_speed(transferred: u64, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        return 0.0;
    }
    transferred as f64 / elapsed.as_secs_f64()
}

/// Decides when a progress update may be emitted.
///
/// An update passes when at least `min_interval` has elapsed since the last
/// emitted update, or when at least `min_bytes` were transferred since then.
/// The start instant counts as the first emission, so nothing is emitted
/// during the first interval. Either condition can be disabled with `None`.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    min_interval: Option<Duration>,
    min_bytes: Option<u64>,
    last_emit: Instant,
    last_bytes: u64,
}

impl ProgressThrottle {
    /// Creates a throttle anchored at `start`.
    ///
    /// If both limits are `None`, the interval defaults to 2 s.
    pub fn new(min_interval: Option<Duration>, min_bytes: Option<u64>, start: Instant) -> Self {
        let min_interval = match (min_interval, min_bytes) {
            (None, None) => Some(DEFAULT_INTERVAL),
            (interval, _) => interval,
        };
        Self {
            min_interval,
            min_bytes,
            last_emit: start,
            last_bytes: 0,
        }
    }

    /// Returns `true` (and records the emission) if an update for
    /// `transferred` bytes observed at `now` should go out.
    pub fn should_emit(&mut self, now: Instant, transferred: u64) -> bool {
        let interval_due = self
            .min_interval
            .is_some_and(|i| now.saturating_duration_since(self.last_emit) >= i);
        let bytes_due = self
            .min_bytes
            .is_some_and(|b| transferred.saturating_sub(self.last_bytes) >= b);

        if interval_due || bytes_due {
            self.last_emit = now;
            self.last_bytes = transferred;
            true
        } else {
            false
        }
    }

    pub fn min_interval(&self) -> Option<Duration> {
        self.min_interval
    }

    pub fn min_bytes(&self) -> Option<u64> {
        self.min_bytes
    }
}
