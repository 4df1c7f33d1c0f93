use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall-clock time for history windows.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;

    /// Start of the window of length `window` ending now, clamped at the epoch.
    fn window_start(&self, window: Duration) -> SystemTime {
        self.now()
            .checked_sub(window)
            .filter(|start| *start >= UNIX_EPOCH)
            .unwrap_or(UNIX_EPOCH)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Milliseconds since the Unix epoch; times before the epoch map to 0.
pub fn unix_millis(ts: SystemTime) -> u64 {
    ts.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
