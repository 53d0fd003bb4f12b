//! Wall-clock source for entry ages and store expiry.
//!
//! Entry ages are persisted as unix milliseconds, so the cache needs wall time
//! rather than a monotonic instant. Tests swap in a manual clock to step time
//! deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use time::OffsetDateTime;

/// Shared wall clock.
#[derive(Debug, Clone)]
pub struct Clock(Arc<ClockState>);

#[derive(Debug)]
enum ClockState {
    System,
    Manual(AtomicI64),
}

impl Clock {
    /// Clock backed by the operating system time.
    pub fn system() -> Self {
        Self(Arc::new(ClockState::System))
    }

    /// Clock frozen at `start_ms` until advanced through the returned control.
    pub fn manual(start_ms: i64) -> (Self, ClockControl) {
        let clock = Self(Arc::new(ClockState::Manual(AtomicI64::new(start_ms))));
        let control = ClockControl(clock.clone());
        (clock, control)
    }

    /// Current time in unix milliseconds.
    pub fn now_ms(&self) -> i64 {
        match self.0.as_ref() {
            ClockState::System => {
                let now = OffsetDateTime::now_utc();
                (now.unix_timestamp_nanos() / 1_000_000) as i64
            }
            ClockState::Manual(ms) => ms.load(Ordering::SeqCst),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

/// Handle that moves a manual [`Clock`].
#[derive(Debug, Clone)]
pub struct ClockControl(Clock);

impl ClockControl {
    pub fn advance(&self, by: Duration) {
        if let ClockState::Manual(ms) = self.0.0.as_ref() {
            ms.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
        }
    }

    pub fn set_ms(&self, value: i64) {
        if let ClockState::Manual(ms) = self.0.0.as_ref() {
            ms.store(value, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let (clock, control) = Clock::manual(1_000);
        assert_eq!(clock.now_ms(), 1_000);

        control.advance(Duration::from_millis(1_500));
        assert_eq!(clock.now_ms(), 2_500);

        control.set_ms(10);
        assert_eq!(clock.clone().now_ms(), 10);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(Clock::system().now_ms() > 1_577_836_800_000);
    }
}
