//! Per-client window counter and the window arithmetic behind it.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Estimate used when deciding whether a request fits under the limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowAlgorithm {
    /// Weighted sliding window: the previous window contributes in
    /// proportion to how much of it still overlaps the trailing interval.
    #[default]
    Sliding,
    /// Plain fixed window: only the current window's count matters.
    Fixed,
}

/// Fixed-size windows laid end to end from a monotonic epoch.
///
/// Every window starts at `epoch + k * size` for some integer `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    epoch: Instant,
    size: Duration,
}

impl WindowGeometry {
    /// Create a geometry anchored at `epoch`. A zero size is raised to one
    /// nanosecond.
    pub fn new(epoch: Instant, size: Duration) -> Self {
        Self {
            epoch,
            size: size.max(Duration::from_nanos(1)),
        }
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    pub fn size(&self) -> Duration {
        self.size
    }

    /// Start of the window containing `now`. Instants before the epoch map
    /// to the epoch.
    pub fn window_start(&self, now: Instant) -> Instant {
        let elapsed = now.saturating_duration_since(self.epoch).as_nanos();
        let aligned = elapsed - elapsed % self.size.as_nanos();
        self.epoch + Duration::from_nanos(aligned as u64)
    }

    /// Whether `instant` sits exactly on a window boundary.
    pub fn is_boundary(&self, instant: Instant) -> bool {
        instant
            .checked_duration_since(self.epoch)
            .map(|offset| offset.as_nanos() % self.size.as_nanos() == 0)
            .unwrap_or(false)
    }

    /// Fraction of the window containing `now` that has already elapsed,
    /// in `[0, 1)`.
    pub fn elapsed_fraction(&self, now: Instant) -> f64 {
        let into_window = now.saturating_duration_since(self.window_start(now));
        into_window.as_secs_f64() / self.size.as_secs_f64()
    }
}

/// A counter that is internally inconsistent and cannot be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CounterFault {
    #[error("window start {offset:?} after epoch is not a multiple of {size:?}")]
    Misaligned { offset: Duration, size: Duration },

    #[error("window start is later than the last observed request")]
    AheadOfLastSeen,
}

/// Admission accounting for a single client key.
///
/// Holds the admitted counts for the current and previous windows plus the
/// time the key was last seen. Not synchronised: callers must hold exclusive
/// access while calling the mutating methods.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowCounter {
    /// Start of the current window, always on a boundary
    window_start: Instant,
    /// Requests admitted since `window_start`
    current_count: u64,
    /// Requests admitted in the window before `window_start`
    previous_count: u64,
    /// Most recent request for this key, admitted or not
    last_seen: Instant,
}

impl WindowCounter {
    /// Create an empty counter for a key first seen at `now`.
    pub fn new(geometry: &WindowGeometry, now: Instant) -> Self {
        Self {
            window_start: geometry.window_start(now),
            current_count: 0,
            previous_count: 0,
            last_seen: now,
        }
    }

    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    pub fn current_count(&self) -> u64 {
        self.current_count
    }

    pub fn previous_count(&self) -> u64 {
        self.previous_count
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Move the counter forward to the window containing `now`.
    ///
    /// Crossing exactly one boundary shifts the current count into the
    /// previous slot. Crossing more than one clears both.
    pub fn roll(&mut self, geometry: &WindowGeometry, now: Instant) {
        let current_window = geometry.window_start(now);

        if current_window > self.window_start + geometry.size() {
            self.previous_count = 0;
            self.current_count = 0;
            self.window_start = current_window;
        } else if current_window > self.window_start {
            self.previous_count = self.current_count;
            self.current_count = 0;
            self.window_start = current_window;
        }
    }

    /// Estimated number of requests in the trailing window ending at `now`.
    ///
    /// Assumes the counter has already been rolled to `now`.
    pub fn estimate(&self, geometry: &WindowGeometry, now: Instant, algorithm: WindowAlgorithm) -> f64 {
        match algorithm {
            WindowAlgorithm::Fixed => self.current_count as f64,
            WindowAlgorithm::Sliding => {
                let elapsed = geometry.elapsed_fraction(now);
                self.previous_count as f64 * (1.0 - elapsed) + self.current_count as f64
            }
        }
    }

    /// Record a request at `now` and decide whether it is admitted.
    ///
    /// `now` never moves the counter backwards: a value older than the last
    /// recorded request is treated as that request's time. Rejected requests
    /// still refresh `last_seen` but do not consume budget.
    pub fn try_acquire(
        &mut self,
        geometry: &WindowGeometry,
        now: Instant,
        limit: u64,
        algorithm: WindowAlgorithm,
    ) -> bool {
        let now = now.max(self.last_seen);
        self.roll(geometry, now);

        let admitted = self.estimate(geometry, now, algorithm) < limit as f64;
        if admitted {
            self.current_count = self.current_count.saturating_add(1);
        }
        self.last_seen = now;

        admitted
    }

    /// How long the key has been quiet as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    /// Check the structural invariants of the counter.
    pub fn validate(&self, geometry: &WindowGeometry) -> Result<(), CounterFault> {
        if !geometry.is_boundary(self.window_start) {
            return Err(CounterFault::Misaligned {
                offset: self.window_start.saturating_duration_since(geometry.epoch()),
                size: geometry.size(),
            });
        }
        if self.window_start > self.last_seen {
            return Err(CounterFault::AheadOfLastSeen);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        window_start: Instant,
        current_count: u64,
        previous_count: u64,
        last_seen: Instant,
    ) -> Self {
        Self {
            window_start,
            current_count,
            previous_count,
            last_seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    fn geometry() -> (WindowGeometry, Instant) {
        let epoch = Instant::now();
        (WindowGeometry::new(epoch, WINDOW), epoch)
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_window_start_is_aligned() {
        let (geometry, epoch) = geometry();

        assert_eq!(geometry.window_start(epoch), epoch);
        assert_eq!(geometry.window_start(epoch + secs(59.9)), epoch);
        assert_eq!(geometry.window_start(epoch + secs(60.0)), epoch + WINDOW);
        assert_eq!(geometry.window_start(epoch + secs(150.0)), epoch + WINDOW * 2);
        assert!(geometry.is_boundary(epoch + WINDOW * 3));
        assert!(!geometry.is_boundary(epoch + secs(61.0)));
    }

    #[test]
    fn test_elapsed_fraction() {
        let (geometry, epoch) = geometry();

        assert_eq!(geometry.elapsed_fraction(epoch), 0.0);
        assert!((geometry.elapsed_fraction(epoch + secs(90.0)) - 0.5).abs() < 1e-9);
        assert!(geometry.elapsed_fraction(epoch + secs(119.999)) < 1.0);
    }

    #[test]
    fn test_new_counter_starts_on_boundary() {
        let (geometry, epoch) = geometry();
        let counter = WindowCounter::new(&geometry, epoch + secs(75.0));

        assert_eq!(counter.window_start(), epoch + WINDOW);
        assert_eq!(counter.current_count(), 0);
        assert_eq!(counter.previous_count(), 0);
        assert!(counter.validate(&geometry).is_ok());
    }

    #[test]
    fn test_admits_up_to_limit_within_window() {
        let (geometry, epoch) = geometry();
        let mut counter = WindowCounter::new(&geometry, epoch);

        for i in 0..5 {
            assert!(counter.try_acquire(&geometry, epoch + secs(i as f64), 5, WindowAlgorithm::Sliding));
        }
        assert!(!counter.try_acquire(&geometry, epoch + secs(10.0), 5, WindowAlgorithm::Sliding));
        assert_eq!(counter.current_count(), 5);
    }

    #[test]
    fn test_rejection_refreshes_last_seen_without_consuming() {
        let (geometry, epoch) = geometry();
        let mut counter = WindowCounter::new(&geometry, epoch);

        assert!(counter.try_acquire(&geometry, epoch, 1, WindowAlgorithm::Sliding));
        assert!(!counter.try_acquire(&geometry, epoch + secs(30.0), 1, WindowAlgorithm::Sliding));

        assert_eq!(counter.current_count(), 1);
        assert_eq!(counter.last_seen(), epoch + secs(30.0));
    }

    #[test]
    fn test_roll_one_window_keeps_previous() {
        let (geometry, epoch) = geometry();
        let mut counter = WindowCounter::new(&geometry, epoch);
        for _ in 0..3 {
            counter.try_acquire(&geometry, epoch, 10, WindowAlgorithm::Sliding);
        }

        counter.roll(&geometry, epoch + secs(65.0));

        assert_eq!(counter.window_start(), epoch + WINDOW);
        assert_eq!(counter.previous_count(), 3);
        assert_eq!(counter.current_count(), 0);
    }

    #[test]
    fn test_roll_after_long_idle_resets() {
        let (geometry, epoch) = geometry();
        let mut counter = WindowCounter::new(&geometry, epoch);
        for _ in 0..3 {
            counter.try_acquire(&geometry, epoch, 10, WindowAlgorithm::Sliding);
        }

        counter.roll(&geometry, epoch + secs(125.0));

        assert_eq!(counter.window_start(), epoch + WINDOW * 2);
        assert_eq!(counter.previous_count(), 0);
        assert_eq!(counter.current_count(), 0);
    }

    #[test]
    fn test_sliding_estimate_weights_previous_window() {
        let (geometry, epoch) = geometry();
        let counter = WindowCounter::from_parts(epoch + WINDOW, 10, 100, epoch + WINDOW);

        let quarter = counter.estimate(&geometry, epoch + secs(75.0), WindowAlgorithm::Sliding);
        assert!((quarter - 85.0).abs() < 1e-6, "got {}", quarter);

        let fixed = counter.estimate(&geometry, epoch + secs(75.0), WindowAlgorithm::Fixed);
        assert_eq!(fixed, 10.0);
    }

    #[test]
    fn test_stale_now_does_not_rewind() {
        let (geometry, epoch) = geometry();
        let mut counter = WindowCounter::new(&geometry, epoch);

        counter.try_acquire(&geometry, epoch + secs(70.0), 10, WindowAlgorithm::Sliding);
        counter.try_acquire(&geometry, epoch + secs(50.0), 10, WindowAlgorithm::Sliding);

        assert_eq!(counter.window_start(), epoch + WINDOW);
        assert_eq!(counter.current_count(), 2);
        assert_eq!(counter.last_seen(), epoch + secs(70.0));
    }

    #[test]
    fn test_validate_detects_faults() {
        let (geometry, epoch) = geometry();

        let misaligned = WindowCounter::from_parts(epoch + secs(1.0), 0, 0, epoch + secs(2.0));
        assert!(matches!(
            misaligned.validate(&geometry),
            Err(CounterFault::Misaligned { .. })
        ));

        let ahead = WindowCounter::from_parts(epoch + WINDOW, 0, 0, epoch);
        assert_eq!(ahead.validate(&geometry), Err(CounterFault::AheadOfLastSeen));
    }

    #[test]
    fn test_idle_for() {
        let (geometry, epoch) = geometry();
        let counter = WindowCounter::new(&geometry, epoch + secs(10.0));

        assert_eq!(counter.idle_for(epoch + secs(40.0)), secs(30.0));
        assert_eq!(counter.idle_for(epoch), Duration::ZERO);
    }
}
