use super::*;

// ── Timer events ──────────────────────────────────────────────────────────

/// Timer callback payload dispatched against the engine.
///
/// Timer contexts never touch engine state directly: a scheduled task hands
/// one of these to [`WindowShiftEngine::on_timer`], which re-checks the
/// lifecycle before acting. A `CloseWindow` whose id already left the
/// registry is a no-op, and ids are never reused, so a stale closure can
/// never hit a younger window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Open one window now. Fired periodically in time mode.
    OpenWindow,
    /// Close the window that was opened together with this registration.
    CloseWindow(WindowId),
}

// ── WindowShiftEngine ─────────────────────────────────────────────────────

/// Registry and counters shared by the upstream and timer contexts.
struct EngineState<T> {
    windows: BTreeMap<WindowId, Arc<WindowHandle<T>>>,
    next_window_id: u64,
    element_index: u64,
    shift_task: Option<TimerHandle>,
}

/// The window-shift operator behind one subscription.
///
/// Owns the registry of open windows and serves both signal paths: upstream
/// deliveries through its [`SignalHandler`] hooks and timer firings through
/// [`on_timer`](Self::on_timer). The registry mutex is the single exclusion
/// point for window membership; signal delivery happens outside it, with
/// each window's own gate serializing signals per window. No subscriber
/// callback ever runs while an engine lock is held.
///
/// In time mode the downstream observes window emissions on the timer
/// context and data-driven signals on the upstream context.
pub struct WindowShiftEngine<T> {
    batch_size: usize,
    skip: usize,
    timing: Option<(Duration, Duration)>,
    timer: Option<Arc<dyn Timer>>,
    downstream: Arc<dyn Subscriber<Multicast<T>>>,
    core: Arc<SubscriberCore>,
    state: Mutex<EngineState<T>>,
}

impl<T: Clone + Send + 'static> WindowShiftEngine<T> {
    pub(crate) fn new(
        config: WindowShiftConfig,
        timer: Option<Arc<dyn Timer>>,
        downstream: Arc<dyn Subscriber<Multicast<T>>>,
        core: Arc<SubscriberCore>,
    ) -> Self {
        Self {
            batch_size: config.batch_size,
            skip: config.skip,
            timing: config.timing(),
            timer,
            downstream,
            core,
            state: Mutex::new(EngineState {
                windows: BTreeMap::new(),
                next_window_id: 0,
                element_index: 0,
                shift_task: None,
            }),
        }
    }

    /// Number of currently open windows.
    pub fn open_windows(&self) -> usize {
        self.state.lock().expect("engine state poisoned").windows.len()
    }

    /// Dispatch a timer firing. Safe to call after termination: the event
    /// is then discarded.
    pub fn on_timer(self: Arc<Self>, event: TimerEvent) {
        match event {
            TimerEvent::OpenWindow => self.open_by_timer(),
            TimerEvent::CloseWindow(id) => self.close_by_timer(id),
        }
    }

    fn open_by_timer(self: Arc<Self>) {
        let handle = {
            let mut state = self.state.lock().expect("engine state poisoned");
            // Checked under the registry lock: a terminal drains the
            // registry after terminating, so a window can never slip in
            // behind the drain.
            if self.core.is_terminated() {
                return;
            }
            self.open_window(&mut state)
        };
        self.emit_window(&handle);

        if let (Some(timer), Some((timespan, _))) = (self.timer.as_ref(), self.timing) {
            let engine = Arc::clone(&self);
            let id = handle.id();
            // The handle is deliberately not retained: a closure firing
            // after the window is gone finds a stale id and does nothing.
            let _ = timer.submit(
                timespan,
                Box::new(move || {
                    engine.on_timer(TimerEvent::CloseWindow(id));
                }),
            );
        }
    }

    fn close_by_timer(&self, id: WindowId) {
        if self.core.is_terminated() {
            return;
        }
        if let Some(handle) = self.remove_window(id) {
            handle.complete();
        }
    }

    fn open_window(&self, state: &mut EngineState<T>) -> Arc<WindowHandle<T>> {
        let id = WindowId(state.next_window_id);
        state.next_window_id += 1;
        let handle = Arc::new(WindowHandle::new(id, self.batch_size));
        state.windows.insert(id, handle.clone());
        tracing::debug!("{} opened ({} now open)", id, state.windows.len());
        handle
    }

    fn emit_window(&self, handle: &Arc<WindowHandle<T>>) {
        if !self.core.requested().try_consume(1) {
            tracing::trace!("emitting {} without outstanding downstream demand", handle.id());
        }
        self.downstream.on_next(handle.output());
    }

    fn remove_window(&self, id: WindowId) -> Option<Arc<WindowHandle<T>>> {
        let mut state = self.state.lock().expect("engine state poisoned");
        let removed = state.windows.remove(&id);
        if removed.is_some() {
            tracing::debug!("{} left the registry ({} still open)", id, state.windows.len());
        }
        removed
    }

    /// Atomically empty the registry, returning the handles in creation
    /// order.
    fn drain_windows(&self) -> Vec<Arc<WindowHandle<T>>> {
        let mut state = self.state.lock().expect("engine state poisoned");
        std::mem::take(&mut state.windows).into_values().collect()
    }

    fn release_shift_task(&self) {
        let task = self
            .state
            .lock()
            .expect("engine state poisoned")
            .shift_task
            .take();
        if let Some(task) = task {
            task.cancel();
        }
    }

    /// Release everything the engine holds. Idempotent.
    fn shutdown(&self) {
        for handle in self.drain_windows() {
            handle.cancel();
        }
        self.release_shift_task();
    }
}

impl<T: Clone + Send + 'static> SignalHandler<T> for Arc<WindowShiftEngine<T>> {
    fn on_subscribe_hook(&self) {
        let subscription: Arc<dyn Subscription> = Arc::new(WindowShiftSubscription {
            engine: Arc::clone(self),
        });
        self.downstream.on_subscribe(subscription);

        if let (Some(timer), Some((_, timeshift))) = (self.timer.as_ref(), self.timing) {
            let engine = Arc::clone(self);
            let task = timer.schedule(
                timeshift,
                Box::new(move || {
                    Arc::clone(&engine).on_timer(TimerEvent::OpenWindow);
                }),
            );
            self.state.lock().expect("engine state poisoned").shift_task = Some(task);
        }
    }

    fn on_next_hook(&self, value: T) {
        let (created, snapshot) = {
            let mut state = self.state.lock().expect("engine state poisoned");
            let mut created = None;
            if self.timing.is_none() {
                // Count mode: the first element and every skip-th after it
                // open a window. Time mode leaves creation to the timer and
                // does not advance the index.
                if state.element_index % self.skip as u64 == 0 {
                    created = Some(self.open_window(&mut state));
                }
                state.element_index += 1;
            }
            let snapshot: Vec<Arc<WindowHandle<T>>> = state.windows.values().cloned().collect();
            (created, snapshot)
        };

        // The new window reaches the downstream before its first element,
        // so a synchronous consumer observes the full window contents.
        if let Some(handle) = created.as_ref() {
            self.emit_window(handle);
        }

        // Creation-order fan-out; a filled window leaves the registry
        // before the next one is visited.
        if let Some((last, rest)) = snapshot.split_last() {
            for handle in rest {
                if handle.deliver(value.clone()) == DeliverOutcome::Filled {
                    self.remove_window(handle.id());
                }
            }
            if last.deliver(value) == DeliverOutcome::Filled {
                self.remove_window(last.id());
            }
        }
    }

    fn on_complete_hook(&self) {
        let windows = self.drain_windows();
        tracing::debug!("upstream completed; closing {} open windows", windows.len());
        for handle in &windows {
            handle.complete();
        }
        self.downstream.on_complete();
    }

    fn on_error_hook(&self, error: SignalError) {
        let windows = self.drain_windows();
        tracing::debug!(
            "upstream failed ({}); failing {} open windows",
            error,
            windows.len()
        );
        for handle in &windows {
            handle.fail(error.clone());
        }
        self.downstream.on_error(error);
    }

    fn on_terminate_hook(&self) {
        self.shutdown();
    }
}

// ── Downstream subscription ───────────────────────────────────────────────

/// Subscription face the engine presents to its downstream subscriber.
struct WindowShiftSubscription<T> {
    engine: Arc<WindowShiftEngine<T>>,
}

impl<T: Clone + Send + 'static> Subscription for WindowShiftSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            tracing::warn!("request(0) violates the protocol; ignored");
            return;
        }
        // Downstream window demand maps one-to-one onto upstream element
        // demand.
        self.engine.core.requested().add(n);
        self.engine.core.request_upstream(n);
    }

    fn cancel(&self) {
        if !self.engine.core.terminate() {
            return;
        }
        tracing::debug!("downstream cancelled the window operator");
        if let Some(upstream) = self.engine.core.take_upstream() {
            upstream.cancel();
        }
        self.engine.shutdown();
    }
}
