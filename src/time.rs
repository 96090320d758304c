//! Monotonic nanosecond time with a pluggable source.
//!
//! Header timestamps are `u64` nanoseconds from an arbitrary epoch. The
//! default source is monotonic (first call fixes the epoch); tests can
//! substitute a deterministic source with [`set_source`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Nanosecond timestamp type used throughout the framework.
pub type Timestamp = u64;

/// A clock backend.
pub trait TimeSource: Send + Sync {
    /// Current time in nanoseconds since the source's epoch.
    fn now_ns(&self) -> Timestamp;
}

static OVERRIDE: RwLock<Option<Arc<dyn TimeSource>>> = RwLock::new(None);

static MONOTONIC_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Current time in nanoseconds.
pub fn now() -> Timestamp {
    let source = OVERRIDE.read().unwrap_or_else(PoisonError::into_inner);

    match source.as_ref() {
        Some(source) => source.now_ns(),
        None => monotonic_now(),
    }
}

fn monotonic_now() -> Timestamp {
    let epoch = MONOTONIC_EPOCH.get_or_init(Instant::now);

    // Saturates after ~584 years of uptime, which is fine.
    epoch.elapsed().as_nanos() as u64
}

/// Replace the process-wide time source. Intended for tests; call once at
/// startup, before any module threads are running.
pub fn set_source(source: Arc<dyn TimeSource>) {
    *OVERRIDE.write().unwrap_or_else(PoisonError::into_inner) = Some(source);
}

/// Restore the default monotonic source.
pub fn reset_source() {
    *OVERRIDE.write().unwrap_or_else(PoisonError::into_inner) = None;
}

/// Block the calling thread for `duration`.
pub fn sleep(duration: Duration) {
    std::thread::sleep(duration);
}

/// A hand-advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
}

impl ManualClock {
    /// Create a clock starting at `start_ns`.
    pub fn new(start_ns: Timestamp) -> Self {
        Self {
            now_ns: AtomicU64::new(start_ns),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, delta: Duration) {
        self.now_ns
            .fetch_add(delta.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute value.
    pub fn set(&self, now_ns: Timestamp) {
        self.now_ns.store(now_ns, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_ns(&self) -> Timestamp {
        self.now_ns.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_never_goes_backwards() {
        let a = now();
        let b = now();

        assert!(b >= a);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);

        clock.advance(Duration::from_nanos(500));

        assert_eq!(clock.now_ns(), 1_500);

        clock.set(10);

        assert_eq!(clock.now_ns(), 10);
    }
}
