//! Demand tracking and the subscriber base operators build on.
//!
//! [`DemandSubscriber`] implements the protocol bookkeeping every operator
//! needs: subscribe-exactly-once, saturating demand, and a single terminal
//! transition. Operator behavior plugs in through [`SignalHandler`] hooks;
//! the base owns the hook object and invokes it only while the subscriber
//! is live.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::protocol::{SignalError, Subscriber, Subscription};

/// Demand value treated as "effectively unbounded".
pub const UNBOUNDED: u64 = u64::MAX;

/// Saturating demand counter.
///
/// Accumulates `request(n)` amounts and hands them back out one consumption
/// at a time. Once the counter reaches [`UNBOUNDED`] it stays there and
/// consumption no longer decrements it.
#[derive(Debug)]
pub struct Demand {
    value: AtomicU64,
}

impl Demand {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Add `n`, saturating at [`UNBOUNDED`].
    pub fn add(&self, n: u64) {
        let mut current = self.value.load(Ordering::SeqCst);
        loop {
            if current == UNBOUNDED {
                return;
            }
            let next = current.saturating_add(n);
            match self
                .value
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Take `n` units of demand. Returns false when not enough is
    /// outstanding; [`UNBOUNDED`] demand always grants without decrementing.
    pub fn try_consume(&self, n: u64) -> bool {
        let mut current = self.value.load(Ordering::SeqCst);
        loop {
            if current == UNBOUNDED {
                return true;
            }
            if current < n {
                return false;
            }
            match self.value.compare_exchange(
                current,
                current - n,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Currently outstanding demand.
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

impl Default for Demand {
    fn default() -> Self {
        Self::new()
    }
}

const UNSUBSCRIBED: u8 = 0;
const ACTIVE: u8 = 1;
const TERMINATED: u8 = 2;

/// Shared lifecycle state of one demand-tracking subscriber.
///
/// Lifecycle runs Unsubscribed -> Active -> Terminated, and Terminated is
/// absorbing. The same core is shared by the subscriber base, the operator
/// behind it, and the subscription handed downstream, so every signal path
/// observes one consistent lifecycle.
pub struct SubscriberCore {
    state: AtomicU8,
    requested: Demand,
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
}

impl SubscriberCore {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(UNSUBSCRIBED),
            requested: Demand::new(),
            upstream: Mutex::new(None),
        }
    }

    /// Store the upstream subscription and go Active.
    ///
    /// The first subscription wins; any later one is cancelled, as the
    /// protocol requires, and false is returned.
    pub fn attach_upstream(&self, subscription: Arc<dyn Subscription>) -> bool {
        let mut slot = self.upstream.lock().expect("upstream slot poisoned");
        if self
            .state
            .compare_exchange(UNSUBSCRIBED, ACTIVE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *slot = Some(subscription);
            true
        } else {
            drop(slot);
            tracing::warn!("duplicate subscription attach; cancelling the newcomer");
            subscription.cancel();
            false
        }
    }

    /// Move to Terminated. Returns true only for the transition that won;
    /// every later caller gets false.
    pub fn terminate(&self) -> bool {
        self.state.swap(TERMINATED, Ordering::SeqCst) != TERMINATED
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::SeqCst) == ACTIVE
    }

    pub fn is_terminated(&self) -> bool {
        self.state.load(Ordering::SeqCst) == TERMINATED
    }

    /// Demand the downstream has signalled and this subscriber has not yet
    /// satisfied.
    pub fn requested(&self) -> &Demand {
        &self.requested
    }

    /// Forward a request to the upstream subscription, if attached.
    ///
    /// The subscription is cloned out of the slot before the call so a
    /// re-entrant request from inside a delivery cannot deadlock on it.
    pub fn request_upstream(&self, n: u64) {
        let upstream = self.upstream.lock().expect("upstream slot poisoned").clone();
        if let Some(upstream) = upstream {
            upstream.request(n);
        }
    }

    /// Detach and return the upstream subscription, if any.
    pub fn take_upstream(&self) -> Option<Arc<dyn Subscription>> {
        self.upstream.lock().expect("upstream slot poisoned").take()
    }
}

impl Default for SubscriberCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Operator hooks invoked by [`DemandSubscriber`].
///
/// The base guarantees: `on_subscribe_hook` runs at most once;
/// `on_next_hook` runs only between subscribe and terminal; exactly one of
/// `on_complete_hook` / `on_error_hook` runs, followed by
/// `on_terminate_hook`. Hooks run on the signalling caller's context and
/// must not block.
pub trait SignalHandler<T>: Send + Sync {
    fn on_subscribe_hook(&self) {}

    fn on_next_hook(&self, value: T);

    fn on_complete_hook(&self) {}

    fn on_error_hook(&self, error: SignalError) {
        let _ = error;
    }

    /// Runs after any terminal transition, including downstream-initiated
    /// cancellation. Resource cleanup belongs here.
    fn on_terminate_hook(&self) {}
}

/// Subscriber base: protocol bookkeeping in front of a [`SignalHandler`].
///
/// Signals arriving outside the active lifecycle are discarded silently,
/// so a terminated instance tolerates stragglers from a non-compliant or
/// concurrently-stopping upstream.
pub struct DemandSubscriber<T, H: SignalHandler<T>> {
    core: Arc<SubscriberCore>,
    handler: H,
    _element: PhantomData<fn(T)>,
}

impl<T, H: SignalHandler<T>> DemandSubscriber<T, H> {
    pub fn new(core: Arc<SubscriberCore>, handler: H) -> Self {
        Self {
            core,
            handler,
            _element: PhantomData,
        }
    }

    pub fn core(&self) -> &Arc<SubscriberCore> {
        &self.core
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}

impl<T, H: SignalHandler<T>> Subscriber<T> for DemandSubscriber<T, H> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.core.attach_upstream(subscription) {
            self.handler.on_subscribe_hook();
        }
    }

    fn on_next(&self, value: T) {
        if !self.core.is_active() {
            tracing::trace!("discarding element delivered outside the active lifecycle");
            return;
        }
        self.handler.on_next_hook(value);
    }

    fn on_complete(&self) {
        if self.core.terminate() {
            self.handler.on_complete_hook();
            self.handler.on_terminate_hook();
            self.core.take_upstream();
        }
    }

    fn on_error(&self, error: SignalError) {
        if self.core.terminate() {
            self.handler.on_error_hook(error);
            self.handler.on_terminate_hook();
            self.core.take_upstream();
        } else {
            tracing::trace!("discarding terminal error after termination: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::AtomicBool;

    struct NoopSubscription {
        cancelled: AtomicBool,
    }

    impl NoopSubscription {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                cancelled: AtomicBool::new(false),
            })
        }
    }

    impl Subscription for NoopSubscription {
        fn request(&self, _n: u64) {}

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingHandler {
        subscribes: AtomicU64,
        elements: AtomicU64,
        completes: AtomicU64,
        errors: AtomicU64,
        terminates: AtomicU64,
    }

    impl SignalHandler<i32> for Arc<CountingHandler> {
        fn on_subscribe_hook(&self) {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_next_hook(&self, _value: i32) {
            self.elements.fetch_add(1, Ordering::SeqCst);
        }

        fn on_complete_hook(&self) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error_hook(&self, _error: SignalError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_terminate_hook(&self) {
            self.terminates.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn make_subscriber() -> (Arc<CountingHandler>, DemandSubscriber<i32, Arc<CountingHandler>>) {
        let handler = Arc::new(CountingHandler::default());
        let subscriber = DemandSubscriber::new(Arc::new(SubscriberCore::new()), handler.clone());
        (handler, subscriber)
    }

    #[test]
    fn test_demand_accumulates_and_saturates() {
        let demand = Demand::new();
        demand.add(3);
        demand.add(4);
        assert_eq!(demand.current(), 7);

        demand.add(UNBOUNDED);
        assert_eq!(demand.current(), UNBOUNDED);

        // Unbounded demand grants without decrementing.
        assert!(demand.try_consume(1));
        assert_eq!(demand.current(), UNBOUNDED);
    }

    #[test]
    fn test_demand_consumption_stops_at_zero() {
        let demand = Demand::new();
        demand.add(2);

        assert!(demand.try_consume(1));
        assert!(demand.try_consume(1));
        assert!(!demand.try_consume(1));
        assert_eq!(demand.current(), 0);
    }

    #[test]
    fn test_second_subscription_is_cancelled() {
        let (handler, subscriber) = make_subscriber();
        let first = NoopSubscription::new();
        let second = NoopSubscription::new();

        subscriber.on_subscribe(first.clone());
        subscriber.on_subscribe(second.clone());

        assert_eq!(handler.subscribes.load(Ordering::SeqCst), 1);
        assert!(!first.cancelled.load(Ordering::SeqCst));
        assert!(second.cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_elements_require_active_lifecycle() {
        let (handler, subscriber) = make_subscriber();

        // Not yet subscribed: discarded.
        subscriber.on_next(1);
        assert_eq!(handler.elements.load(Ordering::SeqCst), 0);

        subscriber.on_subscribe(NoopSubscription::new());
        subscriber.on_next(2);
        assert_eq!(handler.elements.load(Ordering::SeqCst), 1);

        subscriber.on_complete();
        subscriber.on_next(3);
        assert_eq!(handler.elements.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exactly_one_terminal() {
        let (handler, subscriber) = make_subscriber();
        subscriber.on_subscribe(NoopSubscription::new());

        subscriber.on_complete();
        subscriber.on_complete();
        subscriber.on_error(SignalError::new(anyhow!("late failure")));

        assert_eq!(handler.completes.load(Ordering::SeqCst), 1);
        assert_eq!(handler.errors.load(Ordering::SeqCst), 0);
        assert_eq!(handler.terminates.load(Ordering::SeqCst), 1);
        assert!(subscriber.core().is_terminated());
    }

    #[test]
    fn test_error_before_complete_wins() {
        let (handler, subscriber) = make_subscriber();
        subscriber.on_subscribe(NoopSubscription::new());

        subscriber.on_error(SignalError::new(anyhow!("upstream failed")));
        subscriber.on_complete();

        assert_eq!(handler.errors.load(Ordering::SeqCst), 1);
        assert_eq!(handler.completes.load(Ordering::SeqCst), 0);
        assert_eq!(handler.terminates.load(Ordering::SeqCst), 1);
    }
}
