use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn get_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as i64
}

/// Source of wall-clock milliseconds for turn-time arithmetic.
pub trait TimeSource: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> i64 {
        get_timestamp()
    }
}

/// Settable clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: AtomicI64,
}

impl ManualTimeSource {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Converts a remaining-time value to a timer duration, clamping negatives to zero.
pub fn millis_to_duration(millis: i64) -> Duration {
    Duration::from_millis(millis.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_generation() {
        let timestamp1 = get_timestamp();
        std::thread::sleep(Duration::from_millis(2));
        let timestamp2 = get_timestamp();
        assert!(timestamp2 > timestamp1);
    }

    #[test]
    fn test_manual_time_source() {
        let clock = ManualTimeSource::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(5_000);
        assert_eq!(clock.now_millis(), 6_000);
        clock.set(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[test]
    fn test_millis_to_duration_clamps() {
        assert_eq!(millis_to_duration(-50), Duration::ZERO);
        assert_eq!(millis_to_duration(1_500), Duration::from_millis(1_500));
    }
}
