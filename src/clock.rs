use std::time::Instant;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Injectable source of wall-clock and monotonic time, so signal-age
/// checks, timeouts, and retry backoff can be driven deterministically in
/// tests instead of depending on real elapsed time.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
    fn monotonic_now(&self) -> Instant;
}

/// Real clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }
}

/// Generates unique identifiers for signals, executions, and orders.
/// Injectable for the same reason as [`Clock`]: deterministic tests.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// Deterministic clock for tests: wall time advances only when told to,
    /// monotonic time is derived from a fixed anchor plus an offset.
    pub struct FixedClock {
        wall: Mutex<DateTime<Utc>>,
        anchor: Instant,
        offset_ms: AtomicU64,
    }

    impl FixedClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                wall: Mutex::new(start),
                anchor: Instant::now(),
                offset_ms: AtomicU64::new(0),
            }
        }

        pub fn advance(&self, millis: u64) {
            let mut wall = self.wall.lock().unwrap();
            *wall += chrono::Duration::milliseconds(millis as i64);
            self.offset_ms.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now_utc(&self) -> DateTime<Utc> {
            *self.wall.lock().unwrap()
        }

        fn monotonic_now(&self) -> Instant {
            self.anchor + std::time::Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
        }
    }

    #[derive(Default)]
    pub struct SequentialIds {
        counter: AtomicU64,
        prefix: &'static str,
    }

    impl SequentialIds {
        pub fn new(prefix: &'static str) -> Self {
            Self {
                counter: AtomicU64::new(0),
                prefix,
            }
        }
    }

    impl IdGenerator for SequentialIds {
        fn next_id(&self) -> String {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            format!("{}-{n}", self.prefix)
        }
    }

    #[test]
    fn fixed_clock_advances_monotonically() {
        let clock = FixedClock::new(Utc::now());
        let t0 = clock.monotonic_now();
        clock.advance(50);
        let t1 = clock.monotonic_now();
        assert!(t1 > t0);
        assert!(t1.duration_since(t0) >= std::time::Duration::from_millis(50));
    }

    #[test]
    fn sequential_ids_are_unique_and_ordered() {
        let gen = SequentialIds::new("sig");
        let a = gen.next_id();
        let b = gen.next_id();
        assert_ne!(a, b);
        assert_eq!(a, "sig-0");
        assert_eq!(b, "sig-1");
    }
}
