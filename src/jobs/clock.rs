//! Time source for the engine
//!
//! Every component takes its notion of "now" from an injected [`Clock`], so
//! tests drive time explicitly through [`ManualClock`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: Timestamp) {
        if let Ok(mut now) = self.now.lock() {
            *now = at;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now = after(*now, by);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now
            .lock()
            .map(|now| *now)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

/// `at + delay`, saturating at the end of the representable range
pub fn after(at: Timestamp, delay: Duration) -> Timestamp {
    SignedDuration::try_from(delay)
        .ok()
        .and_then(|delay| at.checked_add(delay).ok())
        .unwrap_or(Timestamp::MAX)
}

/// `at - delay`, saturating at the start of the representable range
pub fn before(at: Timestamp, delay: Duration) -> Timestamp {
    SignedDuration::try_from(delay)
        .ok()
        .and_then(|delay| at.checked_sub(delay).ok())
        .unwrap_or(Timestamp::MIN)
}

/// Start of the fixed window of `window_seconds` that contains `now`
pub fn window_start(now: Timestamp, window_seconds: u64) -> Timestamp {
    let window = i64::try_from(window_seconds.max(1)).unwrap_or(i64::MAX);
    let second = now.as_second();
    Timestamp::from_second(second.div_euclid(window) * window).unwrap_or(now)
}

/// End of the window that starts at `start`
pub fn window_end(start: Timestamp, window_seconds: u64) -> Timestamp {
    let window = i64::try_from(window_seconds).unwrap_or(i64::MAX);
    start
        .checked_add(SignedDuration::from_secs(window))
        .unwrap_or(Timestamp::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = Timestamp::from_second(1_700_000_000).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now().as_second(), 1_700_000_090);

        let shared = clock.clone();
        shared.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_after_saturates() {
        assert_eq!(
            after(Timestamp::MAX, Duration::from_secs(1)),
            Timestamp::MAX
        );
        assert_eq!(
            before(Timestamp::MIN, Duration::from_secs(1)),
            Timestamp::MIN
        );
    }

    #[test]
    fn test_window_start_aligns_to_multiples() {
        let now = Timestamp::from_second(1_700_000_059).unwrap();
        assert_eq!(window_start(now, 60).as_second(), 1_699_999_980);
        assert_eq!(window_end(window_start(now, 60), 60).as_second(), 1_700_000_040);
    }

    proptest! {
        #[test]
        fn prop_window_contains_now(second in 0i64..4_000_000_000i64, window in 1u64..=86_400u64) {
            let now = Timestamp::from_second(second).unwrap();
            let start = window_start(now, window);
            let end = window_end(start, window);

            prop_assert!(start <= now);
            prop_assert!(now < end);
            prop_assert_eq!(start.as_second() % window as i64, 0);
        }
    }
}
