//! Shared scheduling state across viewers and backends.
//!
//! One [`SchedulingContext`] is created by the application and handed to every
//! viewer. It holds:
//! - the single background cache task slot: starting a task cancels whichever
//!   task held the slot before, so at most one is ever live
//! - the busy-viewer count: while any viewer plays or scrubs, background
//!   caching is refused and a running task is cancelled
//!
//! Background caching competes with interactive requests for the same render
//! workers. Keeping the slot process-wide means two viewers on different
//! sequences cannot both fill the pool with cache ranges, and a busy viewer
//! anywhere pauses all of it. Viewers restart caching themselves once their
//! cache wait timer fires.
//!
//! Both claims are RAII handles. A [`BackgroundCacheTask`] frees its slot on
//! drop and a [`BusyGuard`] decrements the busy count on drop, so a viewer
//! that panics or is dropped mid-play cannot leave caching blocked.
//!
//! Cancellation is cooperative: the task's flag is shared with every range
//! job it dispatched, and workers check it between frames.

use log::debug;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::ticket::OwnerId;

#[derive(Debug, Default)]
struct Inner {
    active: Mutex<Option<(u64, OwnerId, Arc<AtomicBool>)>>, // (task id, owner, cancel flag)
    next_task: AtomicU64,
    busy_viewers: AtomicUsize,
}

/// Cheap to clone; all clones share one slot and one busy count.
///
/// # Example
/// ```ignore
/// let sched = SchedulingContext::new();
/// if let Some(task) = sched.start_background(owner) {
///     backend.start_background_cache(task);
/// }
/// let _busy = sched.viewer_busy(); // cancels the task above
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchedulingContext {
    inner: Arc<Inner>,
}

impl SchedulingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the background slot for `owner`. Refused while a viewer is busy.
    ///
    /// A task already in the slot is cancelled and replaced, whoever owns it.
    /// Returns `None` only when some viewer holds a [`BusyGuard`].
    pub fn start_background(&self, owner: OwnerId) -> Option<BackgroundCacheTask> {
        if self.busy_viewers() > 0 {
            debug!("Background caching deferred: {} busy viewers", self.busy_viewers());
            return None;
        }
        let id = self.inner.next_task.fetch_add(1, Ordering::Relaxed);
        let cancel = Arc::new(AtomicBool::new(false));
        let mut active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((old_id, old_owner, old_cancel)) = active.take() {
            debug!("Background task {} ({}) replaced by {} ({})", old_id, old_owner, id, owner);
            old_cancel.store(true, Ordering::Release);
        }
        *active = Some((id, owner, Arc::clone(&cancel)));
        Some(BackgroundCacheTask { ctx: self.clone(), id, owner, cancel })
    }

    /// Cancel whatever task holds the slot. The task handle stays alive with
    /// its flag raised; the backend notices and drops it on the next dispatch.
    pub fn cancel_background(&self) {
        let mut active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((id, _, cancel)) = active.take() {
            debug!("Background task {} cancelled", id);
            cancel.store(true, Ordering::Release);
        }
    }

    /// Owner of the live task, if any.
    pub fn background_owner(&self) -> Option<OwnerId> {
        let active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        active.as_ref().map(|(_, owner, _)| *owner)
    }

    pub fn background_active(&self) -> bool {
        self.background_owner().is_some()
    }

    /// Mark a viewer busy until the guard drops. Cancels background caching.
    ///
    /// Guards nest: two viewers playing at once hold two guards, and caching
    /// may restart only after both are dropped.
    pub fn viewer_busy(&self) -> BusyGuard {
        self.inner.busy_viewers.fetch_add(1, Ordering::AcqRel);
        self.cancel_background();
        BusyGuard { ctx: self.clone() }
    }

    pub fn busy_viewers(&self) -> usize {
        self.inner.busy_viewers.load(Ordering::Acquire)
    }
}

/// Live claim on the background slot. Dropping it frees the slot, unless a
/// newer task already took it.
#[derive(Debug)]
pub struct BackgroundCacheTask {
    ctx: SchedulingContext,
    id: u64,
    owner: OwnerId,
    cancel: Arc<AtomicBool>,
}

impl BackgroundCacheTask {
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Flag shared with the jobs this task dispatches
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }
}

impl Drop for BackgroundCacheTask {
    fn drop(&mut self) {
        let mut active = self.ctx.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(active.as_ref(), Some((id, _, _)) if *id == self.id) {
            *active = None;
        }
        self.cancel.store(true, Ordering::Release);
    }
}

/// Held by a viewer while it plays or scrubs.
#[derive(Debug)]
pub struct BusyGuard {
    ctx: SchedulingContext,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.ctx.inner.busy_viewers.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_background_task() {
        let ctx = SchedulingContext::new();
        let (a, b) = (OwnerId::next(), OwnerId::next());

        let first = ctx.start_background(a).unwrap();
        let second = ctx.start_background(b).unwrap();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(ctx.background_owner(), Some(b));

        // Dropping the stale task must not free the newer one's slot
        drop(first);
        assert_eq!(ctx.background_owner(), Some(b));
        drop(second);
        assert!(!ctx.background_active());
    }

    #[test]
    fn test_busy_viewer_defers_and_cancels() {
        let ctx = SchedulingContext::new();
        let owner = OwnerId::next();
        let task = ctx.start_background(owner).unwrap();

        let busy = ctx.viewer_busy();
        assert!(task.is_cancelled());
        assert!(ctx.start_background(owner).is_none());

        drop(busy);
        assert_eq!(ctx.busy_viewers(), 0);
        assert!(ctx.start_background(owner).is_some());
    }

    #[test]
    fn test_slot_shared_across_clones() {
        let ctx = SchedulingContext::new();
        let other = ctx.clone();
        let _task = ctx.start_background(OwnerId::next()).unwrap();
        assert!(other.background_active());
        let _busy = other.viewer_busy();
        assert!(!ctx.background_active());
    }
}
