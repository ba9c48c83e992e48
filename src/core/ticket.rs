//! Render tickets and watchers: the async result contract.
//!
//! A [`RenderTicket`] is created by the backend for every request and returned
//! to the caller immediately. It moves `Pending -> Running -> Finished` or
//! ends `Cancelled`, and is resolved exactly once, by the backend only.
//!
//! Callers observe tickets through a [`WatcherInbox`] owned by their thread.
//! Resolution pushes a delivery into the inbox from whatever thread resolved
//! the ticket; the owner drains the inbox on its own loop, so results are
//! always handled on the watcher's thread. Every watcher gets exactly one
//! delivery, including watchers attached after resolution.
//!
//! Cancellation is cooperative: [`RenderTicket::cancel`] raises a flag. A
//! ticket whose flag is up can only resolve as `Cancelled`, whatever the
//! worker produced.

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::trace;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use super::time_range::TimeRange;
use crate::entities::frame::{Frame, SampleBuffer};
use crate::entities::rational::Rational;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(Uuid);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Identifies the requesting context (one per viewer). Used to cancel "my
/// earlier requests" without touching anybody else's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

impl OwnerId {
    pub fn next() -> Self {
        Self(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketKind {
    /// Evaluate the graph for a frame
    RenderVideo,
    /// Read an already rendered frame back from the content cache
    DecodeCache,
    RenderAudio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketKey {
    Time(Rational),
    Range(TimeRange),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Pending,
    Running,
    Finished,
    Cancelled,
}

#[derive(Debug, Clone)]
pub enum RenderPayload {
    Video(Arc<Frame>),
    Audio(Arc<SampleBuffer>),
}

#[derive(Debug, Clone)]
pub enum TicketOutcome {
    Finished(RenderPayload),
    /// Finished without payload
    Failed(String),
    Cancelled,
}

impl TicketOutcome {
    pub fn frame(&self) -> Option<&Arc<Frame>> {
        match self {
            TicketOutcome::Finished(RenderPayload::Video(f)) => Some(f),
            _ => None,
        }
    }

    pub fn audio(&self) -> Option<&Arc<SampleBuffer>> {
        match self {
            TicketOutcome::Finished(RenderPayload::Audio(a)) => Some(a),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            TicketOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TicketOutcome::Cancelled)
    }
}

type WatchFn = Box<dyn FnOnce(&RenderTicket, &TicketOutcome) + Send>;

struct Resolution {
    state: TicketState,
    kind: TicketKind,
    outcome: Option<TicketOutcome>,
    watchers: Vec<WatchFn>,
}

struct TicketInner {
    id: TicketId,
    key: TicketKey,
    owner: Option<OwnerId>,
    cancel: AtomicBool,
    resolution: Mutex<Resolution>,
}

/// Shared handle; clones refer to the same ticket.
#[derive(Clone)]
pub struct RenderTicket(Arc<TicketInner>);

impl fmt::Debug for RenderTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderTicket")
            .field("id", &self.0.id)
            .field("kind", &self.kind())
            .field("key", &self.0.key)
            .field("state", &self.state())
            .finish()
    }
}

impl RenderTicket {
    pub fn new(kind: TicketKind, key: TicketKey, owner: Option<OwnerId>) -> Self {
        Self(Arc::new(TicketInner {
            id: TicketId(Uuid::new_v4()),
            key,
            owner,
            cancel: AtomicBool::new(false),
            resolution: Mutex::new(Resolution {
                state: TicketState::Pending,
                kind,
                outcome: None,
                watchers: Vec::new(),
            }),
        }))
    }

    pub fn id(&self) -> TicketId {
        self.0.id
    }

    pub fn key(&self) -> TicketKey {
        self.0.key
    }

    pub fn time(&self) -> Option<Rational> {
        match self.0.key {
            TicketKey::Time(t) => Some(t),
            TicketKey::Range(_) => None,
        }
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.0.owner
    }

    pub fn kind(&self) -> TicketKind {
        self.lock().kind
    }

    pub fn state(&self) -> TicketState {
        self.lock().state
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state(), TicketState::Finished | TicketState::Cancelled)
    }

    pub fn outcome(&self) -> Option<TicketOutcome> {
        self.lock().outcome.clone()
    }

    /// Request cancellation. Takes effect at the backend's next checkpoint.
    pub fn cancel(&self) {
        self.0.cancel.store(true, Ordering::Release);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.0.cancel.load(Ordering::Acquire)
    }

    pub fn ptr_eq(&self, other: &RenderTicket) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Resolution> {
        self.0.resolution.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pending -> Running. False if the ticket already left `Pending`.
    pub(crate) fn mark_running(&self) -> bool {
        let mut res = self.lock();
        if res.state != TicketState::Pending {
            return false;
        }
        res.state = TicketState::Running;
        true
    }

    /// Running -> Pending with a different kind. Used when a cache decode
    /// turns out to be a miss and the same ticket goes to the renderer.
    pub(crate) fn requeue_as(&self, kind: TicketKind) -> bool {
        let mut res = self.lock();
        if res.outcome.is_some() {
            return false;
        }
        res.kind = kind;
        res.state = TicketState::Pending;
        true
    }

    /// Resolve once and notify every watcher. Returns false if the ticket
    /// was already resolved, in which case `outcome` is dropped.
    pub(crate) fn resolve(&self, outcome: TicketOutcome) -> bool {
        let outcome = if self.is_cancel_requested() { TicketOutcome::Cancelled } else { outcome };

        let watchers = {
            let mut res = self.lock();
            if res.outcome.is_some() {
                return false;
            }
            res.state = if outcome.is_cancelled() { TicketState::Cancelled } else { TicketState::Finished };
            res.outcome = Some(outcome.clone());
            std::mem::take(&mut res.watchers)
        };

        trace!("Ticket {} resolved ({} watchers)", self.0.id, watchers.len());
        for w in watchers {
            w(self, &outcome);
        }
        true
    }

    /// Run `f` once with the outcome: later on the resolving thread, or now
    /// if the ticket is already resolved.
    fn on_resolved(&self, f: WatchFn) {
        let mut res = self.lock();
        match res.outcome.clone() {
            Some(outcome) => {
                drop(res);
                f(self, &outcome);
            }
            None => res.watchers.push(f),
        }
    }
}

/// One watcher's delivery, received on the inbox owner's thread.
#[derive(Debug, Clone)]
pub struct Delivery<T> {
    pub tag: T,
    pub ticket: RenderTicket,
    pub outcome: TicketOutcome,
    watcher: u64,
}

/// Handle to a registered watcher. Detaching makes the inbox drop its
/// delivery instead of returning it.
#[derive(Debug, Clone)]
pub struct Watcher {
    id: u64,
    active: Arc<AtomicBool>,
}

impl Watcher {
    pub fn detach(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_attached(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Per-thread mailbox for ticket results.
pub struct WatcherInbox<T> {
    tx: Sender<(Delivery<T>, Arc<AtomicBool>)>,
    rx: Receiver<(Delivery<T>, Arc<AtomicBool>)>,
    next_watcher: AtomicU64,
}

impl<T: Clone + Send + 'static> Default for WatcherInbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> WatcherInbox<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx, next_watcher: AtomicU64::new(1) }
    }

    /// Watch `ticket`; its outcome arrives here tagged with `tag`.
    pub fn watch(&self, ticket: &RenderTicket, tag: T) -> Watcher {
        let id = self.next_watcher.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let tx = self.tx.clone();
        let flag = Arc::clone(&active);
        ticket.on_resolved(Box::new(move |ticket, outcome| {
            let delivery = Delivery { tag, ticket: ticket.clone(), outcome: outcome.clone(), watcher: id };
            // Inbox gone means the owner is gone; nothing to deliver to
            let _ = tx.send((delivery, flag));
        }));
        Watcher { id, active }
    }

    /// Everything delivered so far, oldest first, minus detached watchers.
    pub fn drain(&self) -> Vec<Delivery<T>> {
        self.rx
            .try_iter()
            .filter(|(_, active)| active.load(Ordering::Acquire))
            .map(|(d, _)| d)
            .collect()
    }

    /// Block up to `timeout` for the next live delivery.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Delivery<T>> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(std::time::Instant::now());
            let (delivery, active) = self.rx.recv_timeout(left).ok()?;
            if active.load(Ordering::Acquire) {
                return Some(delivery);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Delivery<T> {
    /// True if this delivery came from `watcher`.
    pub fn is_from(&self, watcher: &Watcher) -> bool {
        self.watcher == watcher.id
    }
}
