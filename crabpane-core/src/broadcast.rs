//! Hot multicast publisher backing each window.
//!
//! A [`Multicast`] forwards every pushed element to the consumers attached
//! at that moment. Nothing is buffered: a consumer that subscribes late
//! misses earlier elements, and a consumer without outstanding demand
//! misses elements while its demand is exhausted. The terminal signal is
//! the one thing remembered, so consumers attaching afterwards still learn
//! how the window ended.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::demand::Demand;
use crate::protocol::{Publisher, SignalError, Subscriber, Subscription};

/// Remembered terminal state.
#[derive(Clone)]
enum Terminal {
    Complete,
    Error(SignalError),
}

/// One attached consumer: its own demand and cancel flag.
struct ConsumerSlot<T> {
    subscriber: Arc<dyn Subscriber<T>>,
    demand: Demand,
    cancelled: AtomicBool,
}

impl<T> ConsumerSlot<T> {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl<T> Subscription for ConsumerSlot<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            tracing::warn!("request(0) violates the protocol; ignored");
            return;
        }
        self.demand.add(n);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

struct MulticastState<T> {
    slots: Vec<Arc<ConsumerSlot<T>>>,
    terminal: Option<Terminal>,
}

/// Hot multicast publisher.
///
/// Clones share the consumer set: the operator keeps one clone as the push
/// side while handing others downstream. Signal delivery happens outside the
/// internal lock, so consumer callbacks may freely subscribe, request, or
/// cancel without re-entering it.
pub struct Multicast<T> {
    state: Arc<Mutex<MulticastState<T>>>,
}

impl<T> Clone for Multicast<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> Multicast<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MulticastState {
                slots: Vec::new(),
                terminal: None,
            })),
        }
    }

    /// Push one element to every live consumer with outstanding demand.
    ///
    /// Consumers without demand miss the element. After a terminal the push
    /// is discarded entirely.
    pub fn push(&self, value: T) {
        let snapshot = {
            let mut state = self.state.lock().expect("multicast state poisoned");
            if state.terminal.is_some() {
                tracing::trace!("discarding element pushed after terminal");
                return;
            }
            state.slots.retain(|slot| !slot.is_cancelled());
            state.slots.clone()
        };

        let mut targets = Vec::with_capacity(snapshot.len());
        for slot in snapshot {
            if slot.demand.try_consume(1) {
                targets.push(slot);
            } else {
                tracing::trace!("consumer without outstanding demand misses an element");
            }
        }
        if let Some((last, rest)) = targets.split_last() {
            for slot in rest {
                slot.subscriber.on_next(value.clone());
            }
            last.subscriber.on_next(value);
        }
    }

    /// Complete all consumers. Idempotent.
    pub fn complete(&self) {
        self.terminate(Terminal::Complete);
    }

    /// Fail all consumers with `error`. Idempotent.
    pub fn fail(&self, error: SignalError) {
        self.terminate(Terminal::Error(error));
    }

    fn terminate(&self, terminal: Terminal) {
        let slots = {
            let mut state = self.state.lock().expect("multicast state poisoned");
            if state.terminal.is_some() {
                tracing::trace!("duplicate terminal ignored");
                return;
            }
            state.terminal = Some(terminal.clone());
            std::mem::take(&mut state.slots)
        };

        // Terminals ignore demand; every live consumer hears how it ended.
        for slot in slots {
            if slot.is_cancelled() {
                continue;
            }
            match &terminal {
                Terminal::Complete => slot.subscriber.on_complete(),
                Terminal::Error(error) => slot.subscriber.on_error(error.clone()),
            }
        }
    }

    /// True once a terminal signal was recorded.
    pub fn is_terminated(&self) -> bool {
        self.state
            .lock()
            .expect("multicast state poisoned")
            .terminal
            .is_some()
    }

    /// Number of currently attached consumers.
    pub fn consumer_count(&self) -> usize {
        self.state
            .lock()
            .expect("multicast state poisoned")
            .slots
            .len()
    }
}

impl<T: Clone + Send + 'static> Default for Multicast<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Publisher<T> for Multicast<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let slot = Arc::new(ConsumerSlot {
            subscriber: subscriber.clone(),
            demand: Demand::new(),
            cancelled: AtomicBool::new(false),
        });

        // on_subscribe first, so the consumer can request demand before any
        // element can reach its slot.
        subscriber.on_subscribe(slot.clone());

        let replay = {
            let mut state = self.state.lock().expect("multicast state poisoned");
            match &state.terminal {
                Some(terminal) => Some(terminal.clone()),
                None => {
                    state.slots.push(slot);
                    None
                }
            }
        };
        match replay {
            Some(Terminal::Complete) => subscriber.on_complete(),
            Some(Terminal::Error(error)) => subscriber.on_error(error),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::UNBOUNDED;
    use anyhow::anyhow;

    #[derive(Default)]
    struct Recording {
        elements: Mutex<Vec<i32>>,
        completes: Mutex<u32>,
        errors: Mutex<Vec<String>>,
        subscription: Mutex<Option<Arc<dyn Subscription>>>,
    }

    struct RecordingConsumer {
        recording: Arc<Recording>,
        initial_demand: u64,
    }

    impl RecordingConsumer {
        fn attach(multicast: &Multicast<i32>, initial_demand: u64) -> Arc<Recording> {
            let recording = Arc::new(Recording::default());
            multicast.subscribe(Arc::new(Self {
                recording: recording.clone(),
                initial_demand,
            }));
            recording
        }
    }

    impl Subscriber<i32> for RecordingConsumer {
        fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
            if self.initial_demand > 0 {
                subscription.request(self.initial_demand);
            }
            *self.recording.subscription.lock().unwrap() = Some(subscription);
        }

        fn on_next(&self, value: i32) {
            self.recording.elements.lock().unwrap().push(value);
        }

        fn on_complete(&self) {
            *self.recording.completes.lock().unwrap() += 1;
        }

        fn on_error(&self, error: SignalError) {
            self.recording.errors.lock().unwrap().push(error.to_string());
        }
    }

    #[test]
    fn test_all_consumers_receive_elements() {
        let multicast = Multicast::new();
        let first = RecordingConsumer::attach(&multicast, UNBOUNDED);
        let second = RecordingConsumer::attach(&multicast, UNBOUNDED);

        multicast.push(1);
        multicast.push(2);
        multicast.complete();

        assert_eq!(*first.elements.lock().unwrap(), vec![1, 2]);
        assert_eq!(*second.elements.lock().unwrap(), vec![1, 2]);
        assert_eq!(*first.completes.lock().unwrap(), 1);
        assert_eq!(*second.completes.lock().unwrap(), 1);
    }

    #[test]
    fn test_late_consumer_misses_earlier_elements() {
        let multicast = Multicast::new();
        let early = RecordingConsumer::attach(&multicast, UNBOUNDED);

        multicast.push(1);
        multicast.push(2);

        // Hot semantics: nothing is replayed to a late attacher.
        let late = RecordingConsumer::attach(&multicast, UNBOUNDED);
        multicast.push(3);

        assert_eq!(*early.elements.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(*late.elements.lock().unwrap(), vec![3]);
    }

    #[test]
    fn test_consumer_without_demand_misses_elements() {
        let multicast = Multicast::new();
        let starved = RecordingConsumer::attach(&multicast, 1);
        let hungry = RecordingConsumer::attach(&multicast, UNBOUNDED);

        multicast.push(1);
        multicast.push(2);

        assert_eq!(*starved.elements.lock().unwrap(), vec![1]);
        assert_eq!(*hungry.elements.lock().unwrap(), vec![1, 2]);

        // Fresh demand resumes delivery from the next element only.
        starved
            .subscription
            .lock()
            .unwrap()
            .as_ref()
            .unwrap()
            .request(1);
        multicast.push(3);
        assert_eq!(*starved.elements.lock().unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_terminal_replayed_to_late_consumer() {
        let multicast = Multicast::new();
        multicast.push(1);
        multicast.fail(SignalError::new(anyhow!("upstream failed")));

        let late = RecordingConsumer::attach(&multicast, UNBOUNDED);

        assert!(late.elements.lock().unwrap().is_empty());
        assert_eq!(*late.errors.lock().unwrap(), vec!["upstream failed"]);
    }

    #[test]
    fn test_terminal_is_idempotent() {
        let multicast = Multicast::new();
        let consumer = RecordingConsumer::attach(&multicast, UNBOUNDED);

        multicast.complete();
        multicast.complete();
        multicast.fail(SignalError::new(anyhow!("too late")));
        multicast.push(9);

        assert_eq!(*consumer.completes.lock().unwrap(), 1);
        assert!(consumer.errors.lock().unwrap().is_empty());
        assert!(consumer.elements.lock().unwrap().is_empty());
        assert!(multicast.is_terminated());
    }

    #[test]
    fn test_cancelled_consumer_stops_receiving() {
        let multicast = Multicast::new();
        let consumer = RecordingConsumer::attach(&multicast, UNBOUNDED);

        multicast.push(1);
        consumer
            .subscription
            .lock()
            .unwrap()
            .as_ref()
            .unwrap()
            .cancel();
        multicast.push(2);
        multicast.complete();

        assert_eq!(*consumer.elements.lock().unwrap(), vec![1]);
        assert_eq!(*consumer.completes.lock().unwrap(), 0);
        assert_eq!(multicast.consumer_count(), 0);
    }
}
