//! Cache and pipeline notifications.
//!
//! Two kinds of subscription, picked by the subscriber:
//! - [`Notifier::subscribe`]: callback runs synchronously on the emitting
//!   thread, in subscription order. Keep it short and non-blocking.
//! - [`Notifier::subscribe_queued`]: events go into a channel the subscriber
//!   drains on its own thread (UI loops use this).
//!
//! Handles are cheap clones sharing one subscriber list.

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{trace, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::ticket::{TicketId, TicketKind};
use super::time_range::TimeRange;
use crate::entities::rational::Rational;

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// Frames in the range must be re-rendered
    Invalidated(TimeRange),
    /// Content at or after `from` now starts at `to`
    Shifted { from: Rational, to: Rational },
    /// A ticket was resolved
    Finished { ticket: TicketId, kind: TicketKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

enum Subscriber {
    Direct(Callback),
    Queued(Sender<CacheEvent>),
}

#[derive(Clone, Default)]
pub struct Notifier {
    subscribers: Arc<RwLock<Vec<(SubscriptionId, Subscriber)>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .finish()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, sub: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().unwrap_or_else(|e| e.into_inner()).push((id, sub));
        id
    }

    /// Callback invoked on the emitting thread.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.add(Subscriber::Direct(Arc::new(callback)))
    }

    /// Channel drained by the subscriber on its own thread.
    pub fn subscribe_queued(&self) -> (SubscriptionId, Receiver<CacheEvent>) {
        let (tx, rx) = unbounded();
        (self.add(Subscriber::Queued(tx)), rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner()).retain(|(sid, _)| *sid != id);
    }

    pub fn emit(&self, event: CacheEvent) {
        trace!("Notifier: {:?}", event);
        // Callbacks may subscribe/unsubscribe, so call them outside the lock
        let mut direct = Vec::new();
        let mut dead = Vec::new();
        {
            let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            for (id, sub) in subs.iter() {
                match sub {
                    Subscriber::Direct(cb) => direct.push(Arc::clone(cb)),
                    Subscriber::Queued(tx) => {
                        if tx.send(event.clone()).is_err() {
                            dead.push(*id);
                        }
                    }
                }
            }
        }
        for cb in direct {
            cb(&event);
        }
        if !dead.is_empty() {
            warn!("Notifier: dropping {} disconnected subscribers", dead.len());
            self.subscribers
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(id, _)| !dead.contains(id));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn range(a: i64, b: i64) -> TimeRange {
        TimeRange::new(Rational::from_int(a), Rational::from_int(b))
    }

    #[test]
    fn test_direct_callbacks_run_in_order() {
        let bus = Notifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |_| seen.lock().unwrap().push(tag));
        }
        bus.emit(CacheEvent::Invalidated(range(0, 1)));
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_queued_delivery_and_unsubscribe() {
        let bus = Notifier::new();
        let (id, rx) = bus.subscribe_queued();
        bus.emit(CacheEvent::Shifted { from: Rational::from_int(20), to: Rational::from_int(30) });
        assert_eq!(rx.try_iter().count(), 1);

        bus.unsubscribe(id);
        bus.emit(CacheEvent::Invalidated(range(0, 1)));
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let bus = Notifier::new();
        let (_, rx) = bus.subscribe_queued();
        drop(rx);
        bus.emit(CacheEvent::Invalidated(range(0, 1)));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
