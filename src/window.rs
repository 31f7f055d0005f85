/// Sliding-window detector for frenetic reset activity.
///
/// Keeps the timestamps of recent resets, oldest first. Entries older than the
/// observation timeframe are evicted lazily every time a new reset is recorded.
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Observation timeframe for reset activity.
pub const ACTIVITY_TIMEFRAME: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ActivityWindow {
    max_resets: usize,
    timeframe: Duration,
    resets: VecDeque<Instant>,
}

impl ActivityWindow {
    /// Create a window over the default 60 second timeframe.
    pub fn new(max_resets: usize) -> Self {
        Self::with_timeframe(max_resets, ACTIVITY_TIMEFRAME)
    }

    pub fn with_timeframe(max_resets: usize, timeframe: Duration) -> Self {
        Self {
            max_resets,
            timeframe,
            resets: VecDeque::new(),
        }
    }

    /// Record a reset at `now`, flush expired entries and report whether the
    /// activity is now frenetic (more resets than allowed within the timeframe).
    pub fn record(&mut self, now: Instant) -> bool {
        self.resets.push_back(now);
        self.is_frenetic(now)
    }

    /// Flush entries older than the timeframe and compare the remaining
    /// count against the limit.
    pub fn is_frenetic(&mut self, now: Instant) -> bool {
        self.evict(now);
        self.resets.len() > self.max_resets
    }

    fn evict(&mut self, now: Instant) {
        // An Instant earlier than `timeframe` ago cannot be represented right
        // after boot; in that case nothing can be old enough to evict.
        let Some(cutoff) = now.checked_sub(self.timeframe) else {
            return;
        };
        while self.resets.front().is_some_and(|&ts| ts < cutoff) {
            self.resets.pop_front();
        }
    }

    /// Number of resets currently inside the window.
    pub fn len(&self) -> usize {
        self.resets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resets.is_empty()
    }

    pub fn max_resets(&self) -> usize {
        self.max_resets
    }

    pub fn timeframe(&self) -> Duration {
        self.timeframe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_under_limit_is_not_frenetic() {
        let start = Instant::now();
        let mut window = ActivityWindow::new(3);
        assert!(!window.record(start));
        assert!(!window.record(start + secs(1)));
        assert!(!window.record(start + secs(2)));
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_exceeding_limit_trips_on_next_reset() {
        let start = Instant::now();
        let mut window = ActivityWindow::new(3);
        // 4 resets within 10s: trips on the 4th
        assert!(!window.record(start));
        assert!(!window.record(start + secs(3)));
        assert!(!window.record(start + secs(6)));
        assert!(window.record(start + secs(9)));
    }

    #[test]
    fn test_spread_resets_never_trip() {
        let start = Instant::now();
        let mut window = ActivityWindow::new(3);
        // 3 resets per 60s, evenly spread: one every 21s
        for i in 0..50 {
            assert!(!window.record(start + secs(21 * i)), "tripped at reset {i}");
        }
    }

    #[test]
    fn test_old_entries_are_evicted() {
        let start = Instant::now();
        let mut window = ActivityWindow::new(10);
        window.record(start);
        window.record(start + secs(1));
        window.record(start + secs(30));
        assert_eq!(window.len(), 3);

        // At t=62 the first two entries are older than 60s
        window.record(start + secs(62));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_entry_exactly_at_cutoff_is_kept() {
        let start = Instant::now();
        let mut window = ActivityWindow::new(10);
        window.record(start);
        window.record(start + secs(60));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_steady_rate_keeps_size_stable() {
        let start = Instant::now();
        let mut window = ActivityWindow::new(100);
        let mut sizes = Vec::new();
        // One reset every 5s for 10 minutes
        for i in 0..120 {
            window.record(start + secs(5 * i));
            sizes.push(window.len());
        }
        // Once the window is full, the size no longer grows
        let steady = &sizes[20..];
        assert!(steady.iter().all(|&s| s == steady[0]));
        assert_eq!(steady[0], 13);
    }

    #[test]
    fn test_repeated_checks_are_idempotent() {
        let start = Instant::now();
        let mut window = ActivityWindow::new(2);
        window.record(start);
        window.record(start + secs(1));
        let later = start + secs(120);
        assert!(!window.is_frenetic(later));
        assert!(!window.is_frenetic(later));
        assert!(window.is_empty());
    }

    #[test]
    fn test_custom_timeframe() {
        let start = Instant::now();
        let mut window = ActivityWindow::with_timeframe(1, secs(10));
        assert_eq!(window.timeframe(), secs(10));
        assert!(!window.record(start));
        assert!(!window.record(start + secs(11)));
        assert!(window.record(start + secs(12)));
    }
}
