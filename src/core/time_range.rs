//! Half-open time ranges and the minimal ordered range set.
//!
//! `TimeRangeList` is the invalidated-range set used by the content cache and
//! the backend's cache queue. Intervals are kept sorted by in-point and never
//! overlap or touch: every insert absorbs its neighbours.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entities::rational::Rational;

/// `[in, out)`. `in == out` is an instant; `out == INFINITY` is unbounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    in_point: Rational,
    out_point: Rational,
}

impl TimeRange {
    /// Build a range, swapping the ends if they arrive reversed.
    pub fn new(a: Rational, b: Rational) -> Self {
        if a <= b {
            Self { in_point: a, out_point: b }
        } else {
            Self { in_point: b, out_point: a }
        }
    }

    pub fn instant(t: Rational) -> Self {
        Self { in_point: t, out_point: t }
    }

    pub fn unbounded_from(t: Rational) -> Self {
        Self { in_point: t, out_point: Rational::INFINITY }
    }

    pub fn in_point(&self) -> Rational {
        self.in_point
    }

    pub fn out_point(&self) -> Rational {
        self.out_point
    }

    pub fn length(&self) -> Rational {
        self.out_point - self.in_point
    }

    pub fn is_instant(&self) -> bool {
        self.in_point == self.out_point
    }

    pub fn is_unbounded(&self) -> bool {
        self.out_point.is_infinite()
    }

    /// Instants contain only their own point.
    pub fn contains(&self, t: Rational) -> bool {
        if self.is_instant() {
            t == self.in_point
        } else {
            self.in_point <= t && t < self.out_point
        }
    }

    /// True when the ranges share at least one point or meet end-to-start.
    pub fn touches(&self, other: &TimeRange) -> bool {
        self.in_point <= other.out_point && other.in_point <= self.out_point
    }

    /// True when the ranges share a span of non-zero length.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.in_point < other.out_point && other.in_point < self.out_point
    }

    pub fn union(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            in_point: self.in_point.min(other.in_point),
            out_point: self.out_point.max(other.out_point),
        }
    }

    pub fn intersection(&self, other: &TimeRange) -> Option<TimeRange> {
        let in_point = self.in_point.max(other.in_point);
        let out_point = self.out_point.min(other.out_point);
        (in_point < out_point).then_some(TimeRange { in_point, out_point })
    }

    pub fn shifted(&self, delta: Rational) -> TimeRange {
        TimeRange {
            in_point: self.in_point + delta,
            out_point: self.out_point + delta,
        }
    }

    /// Frame timestamps whose sample time falls inside the range.
    ///
    /// Unbounded ranges must be clamped by the caller first.
    pub fn timestamps(&self, timebase: Rational) -> std::ops::Range<i64> {
        let ceil = |t: Rational| -(-(t / timebase)).floor();
        let first = ceil(self.in_point);
        if self.is_instant() {
            let exact = (self.in_point / timebase).floor();
            return if Rational::from_int(exact) * timebase == self.in_point {
                exact..exact + 1
            } else {
                first..first
            };
        }
        first..ceil(self.out_point).max(first)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.in_point, self.out_point)
    }
}

/// Ordered set of disjoint, non-touching, non-empty half-open ranges.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRangeList {
    ranges: Vec<TimeRange>,
}

impl TimeRangeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `range` in. Empty ranges (instants included) are ignored;
    /// callers that mean "the frame at t" convert the instant first.
    pub fn insert(&mut self, range: TimeRange) {
        if range.in_point >= range.out_point {
            return;
        }

        let mut merged = range;
        let start = self.ranges.partition_point(|r| r.out_point < range.in_point);
        let mut end = start;
        while end < self.ranges.len() && self.ranges[end].in_point <= range.out_point {
            merged = merged.union(&self.ranges[end]);
            end += 1;
        }
        self.ranges.splice(start..end, std::iter::once(merged));
    }

    /// Subtract `range`, splitting any interval it cuts through.
    pub fn remove(&mut self, range: TimeRange) {
        if range.in_point >= range.out_point {
            return;
        }

        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for r in self.ranges.drain(..) {
            if !r.overlaps(&range) {
                kept.push(r);
                continue;
            }
            if r.in_point < range.in_point {
                kept.push(TimeRange::new(r.in_point, range.in_point));
            }
            if range.out_point < r.out_point {
                kept.push(TimeRange::new(range.out_point, r.out_point));
            }
        }
        self.ranges = kept;
    }

    pub fn contains(&self, t: Rational) -> bool {
        let idx = self.ranges.partition_point(|r| r.in_point <= t);
        idx > 0 && self.ranges[idx - 1].contains(t)
    }

    pub fn intersects(&self, range: &TimeRange) -> bool {
        if range.is_instant() {
            return self.contains(range.in_point);
        }
        self.ranges.iter().any(|r| r.overlaps(range))
    }

    /// Ripple edit: content at or after `from` moves to start at `to`.
    ///
    /// Moving forward opens a gap `[from, to)`, which is returned so the caller
    /// can decide what the new span means (the content cache invalidates it).
    /// Moving backward deletes `[to, from)` first.
    pub fn shift(&mut self, from: Rational, to: Rational) -> Option<TimeRange> {
        if from == to {
            return None;
        }
        let delta = to - from;

        if to < from {
            self.remove(TimeRange::new(to, from));
        }

        let mut shifted = TimeRangeList::new();
        for r in self.ranges.drain(..) {
            if r.out_point <= from {
                shifted.insert(r);
            } else if r.in_point >= from {
                shifted.insert(r.shifted(delta));
            } else {
                shifted.insert(TimeRange::new(r.in_point, from));
                shifted.insert(TimeRange::new(from, r.out_point).shifted(delta));
            }
        }
        *self = shifted;

        (to > from).then(|| TimeRange::new(from, to))
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Drop everything at or after `t`.
    pub fn truncate(&mut self, t: Rational) {
        self.remove(TimeRange::unbounded_from(t));
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimeRange> {
        self.ranges.iter()
    }

    pub fn first(&self) -> Option<&TimeRange> {
        self.ranges.first()
    }

    pub fn pop_first(&mut self) -> Option<TimeRange> {
        if self.ranges.is_empty() {
            None
        } else {
            Some(self.ranges.remove(0))
        }
    }
}

impl FromIterator<TimeRange> for TimeRangeList {
    fn from_iter<I: IntoIterator<Item = TimeRange>>(iter: I) -> Self {
        let mut list = TimeRangeList::new();
        for r in iter {
            list.insert(r);
        }
        list
    }
}

impl<'a> IntoIterator for &'a TimeRangeList {
    type Item = &'a TimeRange;
    type IntoIter = std::slice::Iter<'a, TimeRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}
