//! The push-based subscription protocol.
//!
//! Producers drive consumers: after a single `on_subscribe`, a subscriber
//! receives any number of `on_next` calls followed by at most one terminal
//! (`on_complete` or `on_error`). Flow control runs the other way through
//! [`Subscription::request`]; a producer may never deliver more elements
//! than the subscriber has requested.

use std::sync::Arc;

/// Link from a subscriber back to the producer it is attached to.
///
/// Both methods may be called from any thread, including re-entrantly from
/// inside a signal delivery.
pub trait Subscription: Send + Sync {
    /// Ask the producer for `n` more elements.
    ///
    /// Demand accumulates and saturates at [`UNBOUNDED`](crate::demand::UNBOUNDED).
    /// `n == 0` is a caller bug: implementations log and ignore it.
    fn request(&self, n: u64);

    /// Stop the producer. Idempotent.
    ///
    /// Signals already in flight may still arrive; the subscriber side
    /// discards them.
    fn cancel(&self);
}

/// Receiver of a push-based sequence.
///
/// The producer guarantees that calls on one subscriber do not overlap, so
/// implementations may keep per-subscriber state without their own locking.
pub trait Subscriber<T>: Send + Sync {
    /// First signal, delivered exactly once.
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);

    /// One element of the sequence.
    fn on_next(&self, value: T);

    /// The sequence ended normally. No further signals follow.
    fn on_complete(&self);

    /// The sequence ended with a failure. No further signals follow.
    fn on_error(&self, error: SignalError);
}

/// Producer end of the protocol.
pub trait Publisher<T>: Send + Sync {
    /// Attach `subscriber` and start signalling it.
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>);
}

/// Terminal error signal.
///
/// Wraps the underlying error in an `Arc` so one upstream failure can fan
/// out to every open window plus the downstream subscriber without a
/// `Clone` bound on the error itself.
#[derive(Clone)]
pub struct SignalError(Arc<anyhow::Error>);

impl SignalError {
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    /// The wrapped error.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for SignalError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error)
    }
}

impl std::fmt::Display for SignalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for SignalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
