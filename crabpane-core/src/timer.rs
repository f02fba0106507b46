//! Wall-clock timer collaborator.
//!
//! The windowing engine consumes scheduling through the [`Timer`] seam and
//! never owns threads itself. [`ThreadTimer`] is the thread-backed
//! implementation used by the demos and tests; embedders with their own
//! scheduler implement [`Timer`] instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

/// Task fired repeatedly by [`Timer::schedule`].
pub type PeriodicTask = Box<dyn FnMut() + Send>;

/// Task fired once by [`Timer::submit`].
pub type OneShotTask = Box<dyn FnOnce() + Send>;

/// Scheduling seam the windowing engine depends on.
///
/// `schedule` fires `task` at a fixed period, the first time one full
/// period after the call; `submit` fires once after `delay`. Tasks run on
/// the timer's execution context, concurrently with everything else.
pub trait Timer: Send + Sync {
    fn schedule(&self, period: Duration, task: PeriodicTask) -> TimerHandle;

    fn submit(&self, delay: Duration, task: OneShotTask) -> TimerHandle;
}

/// Cancellation handle for one scheduled task.
///
/// Cancelling is idempotent and suppresses every firing that has not
/// started yet; a firing already in progress is not interrupted. Dropping
/// the handle does NOT cancel the task.
#[derive(Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    waker: Option<Sender<()>>,
}

impl TimerHandle {
    /// Handle with no worker to wake; cancellation only flips the flag.
    /// For [`Timer`] implementations that poll [`is_cancelled`](Self::is_cancelled)
    /// on their own.
    pub fn detached() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            waker: None,
        }
    }

    fn with_waker(cancelled: Arc<AtomicBool>, waker: Sender<()>) -> Self {
        Self {
            cancelled,
            waker: Some(waker),
        }
    }

    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake the worker so it exits instead of sleeping out its delay.
        if let Some(waker) = &self.waker {
            let _ = waker.try_send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Timer backing each registration with a dedicated sleeper thread.
///
/// A registration holds its thread until it is cancelled (periodic) or has
/// fired (one-shot); cancellation wakes the thread immediately through a
/// channel rather than letting it sleep out the remaining delay.
#[derive(Debug, Default)]
pub struct ThreadTimer;

impl ThreadTimer {
    pub fn new() -> Self {
        Self
    }
}

impl Timer for ThreadTimer {
    fn schedule(&self, period: Duration, mut task: PeriodicTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (waker, wake) = bounded::<()>(1);
        let flag = Arc::clone(&cancelled);
        thread::spawn(move || {
            let mut next = Instant::now() + period;
            loop {
                if !sleep_until(&wake, next, &flag) {
                    return;
                }
                task();
                // Fixed-rate schedule: late firings do not shift later ones.
                next += period;
            }
        });
        TimerHandle::with_waker(cancelled, waker)
    }

    fn submit(&self, delay: Duration, task: OneShotTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (waker, wake) = bounded::<()>(1);
        let flag = Arc::clone(&cancelled);
        thread::spawn(move || {
            if sleep_until(&wake, Instant::now() + delay, &flag) {
                task();
            }
        });
        TimerHandle::with_waker(cancelled, waker)
    }
}

/// Wait for `deadline`. Returns true to fire, false when cancelled.
///
/// A disconnected waker means every handle was dropped, so no cancel can
/// arrive anymore; the worker then sleeps out the remainder and fires.
fn sleep_until(wake: &Receiver<()>, deadline: Instant, cancelled: &AtomicBool) -> bool {
    let now = Instant::now();
    if now < deadline {
        match wake.recv_timeout(deadline - now) {
            Ok(()) => return false,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                let now = Instant::now();
                if now < deadline {
                    thread::sleep(deadline - now);
                }
            }
        }
    }
    !cancelled.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_submit_fires_once_after_delay() {
        let timer = ThreadTimer::new();
        let (tx, rx) = unbounded();

        let started = Instant::now();
        timer.submit(
            Duration::from_millis(30),
            Box::new(move || {
                tx.send(started.elapsed()).unwrap();
            }),
        );

        let elapsed = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(elapsed >= Duration::from_millis(30));
        // One-shot: no second firing.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_submit_cancelled_before_delay_never_fires() {
        let timer = ThreadTimer::new();
        let (tx, rx) = unbounded();

        let handle = timer.submit(
            Duration::from_millis(50),
            Box::new(move || {
                tx.send(()).unwrap();
            }),
        );
        handle.cancel();
        handle.cancel();

        assert!(handle.is_cancelled());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_dropping_the_handle_does_not_cancel() {
        let timer = ThreadTimer::new();
        let (tx, rx) = unbounded();

        let handle = timer.submit(
            Duration::from_millis(30),
            Box::new(move || {
                tx.send(()).unwrap();
            }),
        );
        drop(handle);

        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_schedule_fires_repeatedly_until_cancelled() {
        let timer = ThreadTimer::new();
        let (tx, rx) = unbounded();

        let handle = timer.schedule(
            Duration::from_millis(20),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );

        // At least three periods fire.
        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(1)).unwrap();
        }
        handle.cancel();

        // One firing may already be in flight; after that, silence.
        thread::sleep(Duration::from_millis(50));
        while rx.try_recv().is_ok() {}
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
