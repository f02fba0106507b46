use super::*;

/// Identifier of one window within its engine.
///
/// Ids are assigned in creation order and never reused, so ordering ids
/// orders windows by age, and a stale id can never address a younger
/// window.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct WindowId(pub u64);

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "window#{}", self.0)
    }
}

/// Outcome of handing one element to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverOutcome {
    /// Accepted; the window stays open.
    Accepted,
    /// Accepted as the final element; the window completed itself and must
    /// leave the registry.
    Filled,
    /// The window was already closed; the element was discarded.
    Stale,
}

struct WindowGate {
    delivered: usize,
    open: bool,
}

/// One window: delivered-element counter plus the hot publisher its
/// consumers are attached to.
///
/// The gate mutex is the window's signal serialization point: whichever of
/// delivery, completion, failure, or cancellation closes the gate first
/// wins, and everything arriving afterwards is a no-op. Consumer callbacks
/// run outside the gate; the publisher's own terminal check discards an
/// element whose delivery lost that race.
pub struct WindowHandle<T> {
    id: WindowId,
    batch_size: usize,
    gate: Mutex<WindowGate>,
    output: Multicast<T>,
}

impl<T: Clone + Send + 'static> WindowHandle<T> {
    pub(crate) fn new(id: WindowId, batch_size: usize) -> Self {
        Self {
            id,
            batch_size,
            gate: Mutex::new(WindowGate {
                delivered: 0,
                open: true,
            }),
            output: Multicast::new(),
        }
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    /// The publisher half handed downstream.
    pub fn output(&self) -> Multicast<T> {
        self.output.clone()
    }

    /// Elements delivered so far.
    pub fn delivered(&self) -> usize {
        self.gate.lock().expect("window gate poisoned").delivered
    }

    pub fn is_open(&self) -> bool {
        self.gate.lock().expect("window gate poisoned").open
    }

    /// Hand one element to the window.
    ///
    /// The `batch_size`-th element closes the gate in the same acquisition
    /// that counts it, then completes the consumers; the caller removes a
    /// [`DeliverOutcome::Filled`] window from its registry.
    pub(crate) fn deliver(&self, value: T) -> DeliverOutcome {
        let outcome = {
            let mut gate = self.gate.lock().expect("window gate poisoned");
            if !gate.open {
                tracing::trace!("{} discarded an element after closing", self.id);
                return DeliverOutcome::Stale;
            }
            gate.delivered += 1;
            if gate.delivered >= self.batch_size {
                gate.open = false;
                DeliverOutcome::Filled
            } else {
                DeliverOutcome::Accepted
            }
        };
        self.output.push(value);
        if outcome == DeliverOutcome::Filled {
            tracing::debug!("{} filled after {} elements", self.id, self.batch_size);
            self.output.complete();
        }
        outcome
    }

    /// Complete the window's consumers. Idempotent.
    pub(crate) fn complete(&self) {
        let delivered = {
            let mut gate = self.gate.lock().expect("window gate poisoned");
            if !gate.open {
                return;
            }
            gate.open = false;
            gate.delivered
        };
        tracing::debug!("{} completed after {} elements", self.id, delivered);
        self.output.complete();
    }

    /// Propagate a terminal error to the window's consumers. Idempotent.
    pub(crate) fn fail(&self, error: SignalError) {
        {
            let mut gate = self.gate.lock().expect("window gate poisoned");
            if !gate.open {
                return;
            }
            gate.open = false;
        }
        tracing::debug!("{} failed: {}", self.id, error);
        self.output.fail(error);
    }

    /// Close without signalling consumers. Used when the downstream cancels
    /// the whole operator: its windows simply stop.
    pub(crate) fn cancel(&self) {
        self.gate.lock().expect("window gate poisoned").open = false;
    }
}
