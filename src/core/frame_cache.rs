//! Content cache: time -> frame hash map plus invalidation tracking.
//!
//! Rendered frames live on disk at `<root>/<name>/<identity>/<hash>`, one
//! immutable file per content hash. This struct only knows which hash belongs
//! to which time and which times are stale; the files themselves are written
//! by workers and read back by cache-decode jobs.
//!
//! # Stale writes
//!
//! A render can be overtaken by an edit: the job is dispatched, the user
//! changes a parameter, the job finishes with pixels for the old graph.
//! Every invalidation bumps `epoch` and is recorded in a bounded history;
//! `set_hash` takes the epoch the job was dispatched at and refuses the write
//! if any later invalidation touched that time. Jobs older than the history
//! are refused too, and the frame is simply rendered again.
//!
//! # Instants
//!
//! `invalidate` with `in == out` means "the frame at t": it is widened to
//! `[t, next frame boundary)` so the set stays made of non-empty intervals.

use log::{debug, info, trace, warn};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::notify::{CacheEvent, Notifier};
use super::time_range::{TimeRange, TimeRangeList};
use crate::entities::frame::Frame;
use crate::entities::rational::Rational;
use crate::error::RenderError;

/// Hit/miss and production counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    rendered: AtomicU64,
    deduplicated: AtomicU64,
    stale_rejected: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rendered(&self) {
        self.rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    fn record_stale(&self) {
        self.stale_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn rendered(&self) -> u64 {
        self.rendered.load(Ordering::Relaxed)
    }

    pub fn deduplicated(&self) -> u64 {
        self.deduplicated.load(Ordering::Relaxed)
    }

    pub fn stale_rejected(&self) -> u64 {
        self.stale_rejected.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }

    pub fn reset(&self) {
        for counter in [&self.hits, &self.misses, &self.rendered, &self.deduplicated, &self.stale_rejected] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug)]
pub struct FrameHashCache {
    root: PathBuf,
    name: String,
    identity: Option<String>,
    timebase: Rational,
    length: Rational,
    hashes: BTreeMap<Rational, String>,
    invalidated: TimeRangeList,
    epoch: u64,
    history: VecDeque<(u64, TimeRange)>,
    history_len: usize,
    /// Jobs dispatched before this epoch can no longer be checked
    history_floor: u64,
    notifier: Notifier,
    stats: CacheStats,
}

impl FrameHashCache {
    pub fn new(root: impl Into<PathBuf>, name: impl Into<String>, timebase: Rational, notifier: Notifier) -> Self {
        Self {
            root: root.into(),
            name: name.into(),
            identity: None,
            timebase,
            length: Rational::ZERO,
            hashes: BTreeMap::new(),
            invalidated: TimeRangeList::new(),
            epoch: 0,
            history: VecDeque::new(),
            history_len: 256,
            history_floor: 0,
            notifier,
            stats: CacheStats::new(),
        }
    }

    pub fn with_history_len(mut self, len: usize) -> Self {
        self.history_len = len.max(1);
        self
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Switch to a new cache namespace. Everything known so far belongs to
    /// the old identity, so the map is cleared and the whole sequence
    /// invalidated.
    pub fn set_identity(&mut self, identity: &str) {
        if self.identity.as_deref() == Some(identity) {
            return;
        }
        info!("Cache identity -> {}", &identity[..identity.len().min(12)]);
        self.identity = Some(identity.to_string());
        self.hashes.clear();
        self.invalidate_all();
    }

    pub fn timebase(&self) -> Rational {
        self.timebase
    }

    pub fn set_timebase(&mut self, timebase: Rational) {
        self.timebase = timebase;
    }

    pub fn length(&self) -> Rational {
        self.length
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn invalidated(&self) -> &TimeRangeList {
        &self.invalidated
    }

    pub fn is_invalidated(&self, time: Rational) -> bool {
        self.invalidated.contains(time)
    }

    /// `<root>/<name>/<identity>`, once an identity is set.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.identity.as_ref().map(|id| self.root.join(&self.name).join(id))
    }

    pub fn path_for(&self, hash: &str) -> Option<PathBuf> {
        self.cache_dir().map(|dir| dir.join(hash))
    }

    /// Stored hash for `time`, or `None` if it is invalidated or was never
    /// rendered.
    pub fn get_hash(&self, time: Rational) -> Option<String> {
        let hash = if self.invalidated.contains(time) { None } else { self.hashes.get(&time).cloned() };
        match hash {
            Some(_) => self.stats.record_hit(),
            None => self.stats.record_miss(),
        }
        hash
    }

    pub fn frame_span(&self, time: Rational) -> TimeRange {
        let start = Rational::from_int((time / self.timebase).floor()) * self.timebase;
        TimeRange::new(time, start + self.timebase)
    }

    /// Record a finished frame. Returns false when the write is stale.
    pub fn set_hash(&mut self, time: Rational, hash: &str, dispatch_epoch: u64) -> bool {
        if dispatch_epoch < self.history_floor {
            trace!("set_hash {}: epoch {} predates history", time, dispatch_epoch);
            self.stats.record_stale();
            return false;
        }
        let span = self.frame_span(time);
        let stale = self
            .history
            .iter()
            .any(|(epoch, range)| *epoch > dispatch_epoch && range.overlaps(&span));
        if stale {
            trace!("set_hash {}: invalidated after epoch {}", time, dispatch_epoch);
            self.stats.record_stale();
            return false;
        }
        if time >= self.length {
            return false;
        }

        self.hashes.insert(time, hash.to_string());
        self.invalidated.remove(span);
        true
    }

    fn record(&mut self, range: TimeRange) {
        self.epoch += 1;
        self.history.push_back((self.epoch, range));
        while self.history.len() > self.history_len {
            if let Some((epoch, _)) = self.history.pop_front() {
                self.history_floor = epoch;
            }
        }
    }

    /// Mark `range` stale and notify. `in == out` invalidates the frame at
    /// that instant.
    pub fn invalidate(&mut self, range: TimeRange) {
        let range = if range.is_instant() { self.frame_span(range.in_point()) } else { range };
        debug!("Invalidate {}", range);

        self.invalidated.insert(range);
        let (lo, hi) = (range.in_point(), range.out_point());
        self.hashes.retain(|t, _| *t < lo || *t >= hi);
        self.record(range);
        self.notifier.emit(CacheEvent::Invalidated(range));
    }

    pub fn invalidate_all(&mut self) {
        if self.length > Rational::ZERO {
            self.invalidate(TimeRange::new(Rational::ZERO, self.length));
        }
    }

    /// Growing invalidates the new tail; shrinking forgets everything past
    /// the end.
    pub fn set_length(&mut self, length: Rational) {
        let old = self.length;
        if length == old {
            return;
        }
        self.length = length;
        if length > old {
            self.invalidate(TimeRange::new(old, length));
        } else {
            self.invalidated.truncate(length);
            self.hashes.retain(|t, _| *t < length);
            self.record(TimeRange::unbounded_from(length));
        }
    }

    /// Ripple edit: everything at or after `from` moves to `to`.
    ///
    /// Forward shifts invalidate the opened gap. Backward shifts drop
    /// `[to, from)`. Emits a single `Shifted`.
    pub fn shift(&mut self, from: Rational, to: Rational) {
        if from == to {
            return;
        }
        let delta = to - from;
        debug!("Shift {} -> {}", from, to);

        if to < from {
            self.hashes.retain(|t, _| *t < to || *t >= from);
        }
        let moved: Vec<(Rational, String)> = self
            .hashes
            .range(from..)
            .map(|(t, h)| (*t, h.clone()))
            .collect();
        for (t, _) in &moved {
            self.hashes.remove(t);
        }
        for (t, h) in moved {
            self.hashes.insert(t + delta, h);
        }

        if let Some(gap) = self.invalidated.shift(from, to) {
            self.invalidated.insert(gap);
        }
        self.length = (self.length + delta).max(from.min(to));

        // In-flight jobs for anything after the edit point are now wrong
        self.record(TimeRange::unbounded_from(from.min(to)));
        self.notifier.emit(CacheEvent::Shifted { from, to });
    }

    /// True if a frame with this content hash is already on disk.
    pub fn has_file(&self, hash: &str) -> bool {
        self.path_for(hash).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Read a cached frame. Blocks on disk I/O: call from a worker, never the
    /// interactive thread.
    pub fn load_cached_frame(path: &Path) -> Result<Frame, RenderError> {
        Frame::load(path).inspect_err(|e| warn!("Cached frame unusable: {}", e))
    }

    /// Snapshot of the map, for tests and the CLI report.
    pub fn entries(&self) -> impl Iterator<Item = (&Rational, &String)> {
        self.hashes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn t(v: i64) -> Rational {
        Rational::from_int(v)
    }

    fn cache() -> FrameHashCache {
        let mut c = FrameHashCache::new("/tmp/unused", "test", Rational::ONE, Notifier::new());
        c.set_identity("abc");
        c.set_length(t(100));
        c
    }

    /// Fill `[0, n)` with valid entries
    fn fill(c: &mut FrameHashCache, n: i64) {
        let epoch = c.epoch();
        for i in 0..n {
            assert!(c.set_hash(t(i), &format!("h{}", i), epoch));
        }
    }

    #[test]
    fn test_get_hash_empty_iff_invalidated() {
        let mut c = cache();
        fill(&mut c, 100);
        c.invalidate(TimeRange::new(t(10), t(20)));
        for i in 0..100 {
            let inside = (10..20).contains(&i);
            assert_eq!(c.get_hash(t(i)).is_none(), inside, "t={}", i);
            assert_eq!(c.is_invalidated(t(i)), inside);
        }
    }

    #[test]
    fn test_adjacent_invalidations_merge() {
        let mut c = cache();
        fill(&mut c, 100);
        c.invalidate(TimeRange::new(t(5), t(10)));
        c.invalidate(TimeRange::new(t(10), t(15)));
        assert_eq!(c.invalidated().iter().copied().collect::<Vec<_>>(), vec![TimeRange::new(t(5), t(15))]);
    }

    #[test]
    fn test_instant_invalidation_covers_one_frame() {
        let mut c = cache();
        fill(&mut c, 100);
        c.invalidate(TimeRange::instant(t(7)));
        assert!(c.get_hash(t(7)).is_none());
        assert!(c.get_hash(t(6)).is_some());
        assert!(c.get_hash(t(8)).is_some());
    }

    #[test]
    fn test_stale_write_is_rejected() {
        let mut c = cache();
        let dispatched = c.epoch();
        c.invalidate(TimeRange::new(t(3), t(4)));
        assert!(!c.set_hash(t(3), "old", dispatched));
        assert!(c.get_hash(t(3)).is_none());
        // Untouched frame from the same job generation is fine
        assert!(c.set_hash(t(50), "ok", dispatched));
        // Re-dispatched after the edit
        assert!(c.set_hash(t(3), "new", c.epoch()));
        assert_eq!(c.get_hash(t(3)).as_deref(), Some("new"));
    }

    #[test]
    fn test_history_overflow_rejects_old_jobs() {
        let mut c = cache().with_history_len(2);
        let ancient = c.epoch();
        for i in 0..5 {
            c.invalidate(TimeRange::new(t(90 + i), t(91 + i)));
        }
        assert!(!c.set_hash(t(0), "x", ancient));
        assert!(c.set_hash(t(0), "x", c.epoch()));
    }

    #[test]
    fn test_identity_change_clears_and_invalidates() {
        let mut c = cache();
        fill(&mut c, 100);
        assert!(c.invalidated().is_empty());
        c.set_identity("def");
        assert_eq!(c.entries().count(), 0);
        assert!(c.is_invalidated(t(0)) && c.is_invalidated(t(99)));
        assert!(c.path_for("h").unwrap().ends_with("test/def/h"));
    }

    #[test]
    fn test_length_grow_and_shrink() {
        let mut c = cache();
        fill(&mut c, 100);
        c.set_length(t(120));
        assert!(c.is_invalidated(t(110)));
        assert!(!c.is_invalidated(t(99)));

        c.set_length(t(50));
        assert!(c.get_hash(t(60)).is_none());
        assert!(!c.is_invalidated(t(60)));
        assert!(c.invalidated().is_empty());
        assert!(!c.set_hash(t(60), "past end", c.epoch()));
    }

    #[test]
    fn test_shift_forward_remaps_and_fires_once() {
        let mut c = cache();
        fill(&mut c, 100);
        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = Arc::clone(&events);
            c.notifier().subscribe(move |e| events.lock().unwrap().push(e.clone()));
        }

        c.shift(t(20), t(30));

        assert_eq!(c.get_hash(t(30)).as_deref(), Some("h20"));
        assert_eq!(c.get_hash(t(19)).as_deref(), Some("h19"));
        assert!(c.get_hash(t(25)).is_none());
        assert!(c.is_invalidated(t(20)) && c.is_invalidated(t(29)));
        assert_eq!(c.length(), t(110));

        let events = events.lock().unwrap();
        let shifted: Vec<_> = events.iter().filter(|e| matches!(e, CacheEvent::Shifted { .. })).collect();
        assert_eq!(shifted.len(), 1);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_shift_backward_drops_span() {
        let mut c = cache();
        fill(&mut c, 100);
        c.shift(t(30), t(20));
        assert_eq!(c.get_hash(t(20)).as_deref(), Some("h30"));
        assert_eq!(c.get_hash(t(19)).as_deref(), Some("h19"));
        assert_eq!(c.length(), t(90));
        assert!(c.invalidated().is_empty());
    }

    #[test]
    fn test_shift_makes_inflight_jobs_stale() {
        let mut c = cache();
        let dispatched = c.epoch();
        c.shift(t(20), t(30));
        assert!(!c.set_hash(t(40), "late", dispatched));
        assert!(c.set_hash(t(10), "early", dispatched));
    }

    #[test]
    fn test_stats_count_lookups() {
        let mut c = cache();
        fill(&mut c, 2);
        c.get_hash(t(0));
        c.get_hash(t(50));
        assert_eq!(c.stats().hits(), 1);
        assert_eq!(c.stats().misses(), 1);
    }

    #[test]
    fn test_load_cached_frame_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = FrameHashCache::new(dir.path(), "cache", Rational::ONE, Notifier::new());
        c.set_identity("id");
        let path = c.path_for("nope").unwrap();
        assert!(matches!(FrameHashCache::load_cached_frame(&path), Err(RenderError::CacheMiss(_))));
        assert!(!c.has_file("nope"));
    }
}
