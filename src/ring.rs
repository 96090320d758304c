//! Timestamped ring buffer with temporal lookup.
//!
//! The history behind every secondary input: a bounded FIFO of
//! `(timestamp, value)` entries pushed in non-decreasing timestamp order,
//! queried by a requested timestamp, a tolerance, and an interpolation mode.

use crate::time::Timestamp;
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Strategy for resolving a requested timestamp against stored entries.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum InterpolationMode {
    /// Entry minimising `|entry_ts - requested|`.
    #[default]
    Nearest,
    /// Newest entry with `entry_ts <= requested`.
    Before,
    /// Oldest entry with `entry_ts >= requested`.
    After,
    /// Reserved; currently falls back to `Nearest`.
    Interpolate,
}

/// One stored entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<T> {
    /// Timestamp the value was stored under (the producer's header time).
    pub timestamp_ns: Timestamp,
    /// The stored value.
    pub value: T,
}

struct Inner<T> {
    entries: VecDeque<Entry<T>>,
    // Cached bounds so lookups can reject out-of-range requests without
    // scanning.
    oldest_ts: Timestamp,
    newest_ts: Timestamp,
}

/// Bounded FIFO of timestamped values with lookup by time.
///
/// Entries must be pushed in non-decreasing timestamp order; a violation is
/// a producer bug (logged in debug builds) and leaves lookups undefined for
/// the entries involved. When full, `push` silently drops the oldest entry.
///
/// Many threads may call [`get_data`](Self::get_data) and
/// [`timestamp_range`](Self::timestamp_range) concurrently;
/// [`push`](Self::push) and [`clear`](Self::clear) take the write lock.
pub struct TimestampedRingBuffer<T> {
    inner: RwLock<Inner<T>>,
    capacity: usize,
    default_tolerance: Duration,
}

impl<T: Clone> TimestampedRingBuffer<T> {
    /// Create a buffer holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self::with_default_tolerance(capacity, Duration::from_millis(50))
    }

    /// Create a buffer with an explicit default lookup tolerance, used when
    /// [`get_data_default`](Self::get_data_default) is called.
    pub fn with_default_tolerance(capacity: usize, default_tolerance: Duration) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");

        Self {
            inner: RwLock::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                oldest_ts: 0,
                newest_ts: 0,
            }),
            capacity,
            default_tolerance,
        }
    }

    /// Append an entry, dropping the oldest when full.
    pub fn push(&self, timestamp_ns: Timestamp, value: T) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if !inner.entries.is_empty() && timestamp_ns < inner.newest_ts {
            log::debug!(
                "ring buffer timestamp order violation: {} < {}",
                timestamp_ns,
                inner.newest_ts
            );
        }

        if inner.entries.len() == self.capacity {
            inner.entries.pop_front();

            if let Some(front) = inner.entries.front() {
                inner.oldest_ts = front.timestamp_ns;
            }
        }

        if inner.entries.is_empty() {
            inner.oldest_ts = timestamp_ns;
        }

        inner.newest_ts = timestamp_ns;
        inner.entries.push_back(Entry {
            timestamp_ns,
            value,
        });
    }

    /// Look up the entry matching `requested` within `tolerance` under the
    /// given mode. Returns `None` when nothing qualifies.
    pub fn get_data(
        &self,
        requested: Timestamp,
        tolerance: Duration,
        mode: InterpolationMode,
    ) -> Option<Entry<T>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        if inner.entries.is_empty() {
            return None;
        }

        let tolerance_ns = tolerance.as_nanos().min(u128::from(u64::MAX)) as u64;

        // Quick rejection: the whole buffer is outside the window.
        if requested.saturating_add(tolerance_ns) < inner.oldest_ts
            || requested.saturating_sub(tolerance_ns) > inner.newest_ts
        {
            return None;
        }

        match mode {
            InterpolationMode::Before => inner.before(requested, tolerance_ns),
            InterpolationMode::After => inner.after(requested, tolerance_ns),
            InterpolationMode::Nearest | InterpolationMode::Interpolate => {
                inner.nearest(requested, tolerance_ns)
            }
        }
    }

    /// Like [`get_data`](Self::get_data) with the construction-time default
    /// tolerance.
    pub fn get_data_default(
        &self,
        requested: Timestamp,
        mode: InterpolationMode,
    ) -> Option<Entry<T>> {
        self.get_data(requested, self.default_tolerance, mode)
    }

    /// `(oldest, newest)` stored timestamps, or `(0, 0)` when empty.
    pub fn timestamp_range(&self) -> (Timestamp, Timestamp) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        if inner.entries.is_empty() {
            (0, 0)
        } else {
            (inner.oldest_ts, inner.newest_ts)
        }
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        inner.entries.clear();
        inner.oldest_ts = 0;
        inner.newest_ts = 0;
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> Inner<T> {
    /// Index of the first entry with `timestamp_ns > requested`; also the
    /// count of entries at or before `requested`.
    fn partition(&self, requested: Timestamp) -> usize {
        self.entries
            .partition_point(|e| e.timestamp_ns <= requested)
    }

    fn before(&self, requested: Timestamp, tolerance_ns: u64) -> Option<Entry<T>> {
        let split = self.partition(requested);

        let candidate = self.entries.get(split.checked_sub(1)?)?;

        (requested - candidate.timestamp_ns <= tolerance_ns).then(|| candidate.clone())
    }

    fn after(&self, requested: Timestamp, tolerance_ns: u64) -> Option<Entry<T>> {
        let split = self
            .entries
            .partition_point(|e| e.timestamp_ns < requested);

        let candidate = self.entries.get(split)?;

        (candidate.timestamp_ns - requested <= tolerance_ns).then(|| candidate.clone())
    }

    fn nearest(&self, requested: Timestamp, tolerance_ns: u64) -> Option<Entry<T>> {
        let split = self.partition(requested);

        let below = split.checked_sub(1).and_then(|i| self.entries.get(i));
        let above = self.entries.get(split);

        let candidate = match (below, above) {
            (Some(b), Some(a)) => {
                if requested - b.timestamp_ns <= a.timestamp_ns - requested {
                    b
                } else {
                    a
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };

        (candidate.timestamp_ns.abs_diff(requested) <= tolerance_ns).then(|| candidate.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn filled(capacity: usize, timestamps: &[Timestamp]) -> TimestampedRingBuffer<u32> {
        let ring = TimestampedRingBuffer::new(capacity);

        for (i, ts) in timestamps.iter().enumerate() {
            ring.push(*ts, i as u32);
        }

        ring
    }

    #[test]
    fn wrap_drops_oldest() {
        // Ten entries at 1000, 1100, ... 1900 into a capacity-5 buffer.
        let timestamps: Vec<_> = (0..10).map(|i| 1000 + i * 100).collect();
        let ring = filled(5, &timestamps);

        assert_eq!(ring.len(), 5);
        assert_eq!(ring.timestamp_range(), (1500, 1900));

        // 1400 fell off the buffer; a Before lookup inside a 100ns window
        // finds nothing.
        assert!(ring
            .get_data(1400, Duration::from_nanos(100), InterpolationMode::Before)
            .is_none());

        let hit = ring
            .get_data(1800, Duration::ZERO, InterpolationMode::Nearest)
            .unwrap();

        assert_eq!(hit.timestamp_ns, 1800);
    }

    #[test]
    fn before_picks_newest_at_or_under() {
        let ring = filled(8, &[100, 200, 300]);

        let hit = ring
            .get_data(250, Duration::from_nanos(100), InterpolationMode::Before)
            .unwrap();

        assert_eq!(hit.timestamp_ns, 200);

        // Exact match counts as "at or before".
        let hit = ring
            .get_data(200, Duration::ZERO, InterpolationMode::Before)
            .unwrap();

        assert_eq!(hit.timestamp_ns, 200);

        // Candidate exists but is out of tolerance.
        assert!(ring
            .get_data(250, Duration::from_nanos(10), InterpolationMode::Before)
            .is_none());
    }

    #[test]
    fn after_picks_oldest_at_or_over() {
        let ring = filled(8, &[100, 200, 300]);

        let hit = ring
            .get_data(150, Duration::from_nanos(100), InterpolationMode::After)
            .unwrap();

        assert_eq!(hit.timestamp_ns, 200);

        let hit = ring
            .get_data(300, Duration::ZERO, InterpolationMode::After)
            .unwrap();

        assert_eq!(hit.timestamp_ns, 300);

        assert!(ring
            .get_data(350, Duration::from_nanos(10), InterpolationMode::After)
            .is_none());
    }

    #[test]
    fn nearest_minimises_distance() {
        let ring = filled(8, &[100, 200, 300]);

        let hit = ring
            .get_data(140, Duration::from_nanos(100), InterpolationMode::Nearest)
            .unwrap();

        assert_eq!(hit.timestamp_ns, 100);

        let hit = ring
            .get_data(160, Duration::from_nanos(100), InterpolationMode::Nearest)
            .unwrap();

        assert_eq!(hit.timestamp_ns, 200);
    }

    #[test]
    fn interpolate_falls_back_to_nearest() {
        let ring = filled(4, &[100, 200]);

        let hit = ring
            .get_data(190, Duration::from_nanos(50), InterpolationMode::Interpolate)
            .unwrap();

        assert_eq!(hit.timestamp_ns, 200);
    }

    #[test]
    fn empty_and_cleared() {
        let ring: TimestampedRingBuffer<u32> = TimestampedRingBuffer::new(4);

        assert_eq!(ring.timestamp_range(), (0, 0));
        assert!(ring
            .get_data(100, Duration::from_secs(1), InterpolationMode::Nearest)
            .is_none());

        ring.push(10, 1);
        ring.clear();

        assert!(ring.is_empty());
        assert_eq!(ring.timestamp_range(), (0, 0));
    }

    #[test]
    fn quick_rejection_outside_range() {
        let ring = filled(4, &[1_000_000, 2_000_000]);

        assert!(ring
            .get_data(10, Duration::from_nanos(100), InterpolationMode::Nearest)
            .is_none());
        assert!(ring
            .get_data(5_000_000, Duration::from_nanos(100), InterpolationMode::Nearest)
            .is_none());
    }
}
