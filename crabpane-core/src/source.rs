//! Demand-honoring source over in-memory elements.
//!
//! [`IterPublisher`] is the push side of the protocol for tests and demos:
//! elements flow only while the subscriber has outstanding demand, and a
//! re-entrant `request` from inside a delivery extends the drain already
//! running instead of recursing into a nested one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::demand::Demand;
use crate::protocol::{Publisher, Subscriber, Subscription};

/// Publisher that replays a fixed element sequence to each subscriber.
///
/// Every subscriber gets its own pass over the elements from the start and
/// completes once they are exhausted.
pub struct IterPublisher<T> {
    items: Vec<T>,
}

impl<T: Clone> IterPublisher<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Publisher<T> for IterPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let feed = Arc::new(IterFeed {
            subscriber: subscriber.clone(),
            queue: Mutex::new(self.items.iter().cloned().collect()),
            demand: Demand::new(),
            wip: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
        });
        subscriber.on_subscribe(feed.clone());
        // An empty sequence completes without waiting for demand.
        feed.drain();
    }
}

struct IterFeed<T> {
    subscriber: Arc<dyn Subscriber<T>>,
    queue: Mutex<VecDeque<T>>,
    demand: Demand,
    wip: AtomicU64,
    cancelled: AtomicBool,
    done: AtomicBool,
}

impl<T: Clone + Send + 'static> IterFeed<T> {
    /// Serialized drain loop.
    ///
    /// The `wip` counter turns a re-entrant call into one more pass of the
    /// loop already running further down the stack, keeping deliveries
    /// strictly sequential however deeply `request` recurses.
    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::SeqCst) != 0 {
            return;
        }
        let mut passes: u64 = 1;
        loop {
            loop {
                if self.cancelled.load(Ordering::SeqCst) {
                    self.queue.lock().expect("source queue poisoned").clear();
                    return;
                }
                let next = {
                    let mut queue = self.queue.lock().expect("source queue poisoned");
                    if queue.is_empty() || !self.demand.try_consume(1) {
                        None
                    } else {
                        queue.pop_front()
                    }
                };
                match next {
                    Some(value) => self.subscriber.on_next(value),
                    None => break,
                }
            }

            let exhausted = self.queue.lock().expect("source queue poisoned").is_empty();
            if exhausted
                && !self.cancelled.load(Ordering::SeqCst)
                && !self.done.swap(true, Ordering::SeqCst)
            {
                self.subscriber.on_complete();
            }

            let pending = self.wip.fetch_sub(passes, Ordering::SeqCst) - passes;
            if pending == 0 {
                return;
            }
            passes = pending;
        }
    }
}

impl<T: Clone + Send + 'static> Subscription for IterFeed<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            tracing::warn!("request(0) violates the protocol; ignored");
            return;
        }
        self.demand.add(n);
        self.drain();
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}
