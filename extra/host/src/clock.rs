//! Host time base.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use vm_port::time::TimeSource;

use crate::HostKernel;

/// `Instant`-anchored time source with an application-time offset store.
///
/// System time counts milliseconds from the moment the clock is created.
/// The tick period must match the one the paired [`HostKernel`] was built
/// with; both default to [`HostKernel::DEFAULT_TICK`].
#[derive(Debug)]
pub struct HostClock {
    origin: Instant,
    app_offset_ms: AtomicI64,
    tick: Duration,
}

impl HostClock {
    /// Clock with the default tick period.
    pub fn new() -> Self {
        Self::with_tick(HostKernel::DEFAULT_TICK)
    }

    /// Clock with a custom tick period. Must be nonzero.
    pub fn with_tick(tick: Duration) -> Self {
        assert!(!tick.is_zero());
        HostClock {
            origin: Instant::now(),
            app_offset_ms: AtomicI64::new(0),
            tick,
        }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for HostClock {
    fn system_time_ms(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }

    fn application_time_ms(&self) -> i64 {
        self.system_time_ms() + self.app_offset_ms.load(Ordering::SeqCst)
    }

    fn set_application_time(&self, time_ms: i64) {
        self.app_offset_ms
            .store(time_ms - self.system_time_ms(), Ordering::SeqCst);
    }

    fn time_nanos(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }

    fn millis_to_ticks(&self, millis: i64) -> u64 {
        // Round up: an alarm must never fire before its deadline.
        let nanos = u128::try_from(millis).unwrap_or(0).saturating_mul(1_000_000);
        let per_tick = self.tick.as_nanos();
        ((nanos + per_tick - 1) / per_tick).min(u128::from(u64::MAX)) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_time_advances() {
        let clock = HostClock::new();
        let t1 = clock.system_time_ms();
        std::thread::sleep(Duration::from_millis(30));
        let t2 = clock.system_time_ms();
        assert!(t2 >= t1 + 20);
    }

    #[test]
    fn application_time_follows_the_offset() {
        let clock = HostClock::new();
        clock.set_application_time(1_700_000_000_000);
        let app = clock.application_time_ms();
        assert!((1_700_000_000_000..1_700_000_005_000).contains(&app));
        // System time is unaffected by the offset.
        assert!(clock.system_time_ms() < 5_000);
    }

    #[test]
    fn nanos_are_monotonic_and_advance() {
        let clock = HostClock::new();
        let n1 = clock.time_nanos();
        std::thread::sleep(Duration::from_millis(10));
        let n2 = clock.time_nanos();
        assert!(n2 - n1 >= 5_000_000);
    }

    #[test]
    fn tick_conversion_rounds_up() {
        let clock = HostClock::with_tick(Duration::from_millis(10));
        assert_eq!(clock.millis_to_ticks(25), 3);
        assert_eq!(clock.millis_to_ticks(30), 3);
        assert_eq!(clock.millis_to_ticks(1), 1);
        assert_eq!(clock.millis_to_ticks(0), 0);
    }

    #[test]
    fn millisecond_ticks_convert_one_to_one() {
        let clock = HostClock::new();
        assert_eq!(clock.millis_to_ticks(42), 42);
    }
}
