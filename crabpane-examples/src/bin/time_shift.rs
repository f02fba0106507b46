use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};

use crabpane_core::broadcast::Multicast;
use crabpane_core::demand::UNBOUNDED;
use crabpane_core::protocol::{Publisher, SignalError, Subscriber, Subscription};
use crabpane_core::timer::ThreadTimer;
use crabpane_core::window::WindowShift;

/// The demo paces the stream itself, so upstream demand is ignored.
struct Unpaced;

impl Subscription for Unpaced {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {}
}

/// Accumulates one window and ships the finished batch over a channel.
struct BatchSender {
    id: u64,
    seen: Mutex<Vec<i64>>,
    done: Sender<(u64, Vec<i64>)>,
}

impl Subscriber<i64> for BatchSender {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        subscription.request(UNBOUNDED);
    }

    fn on_next(&self, value: i64) {
        self.seen.lock().unwrap().push(value);
    }

    fn on_complete(&self) {
        let batch = std::mem::take(&mut *self.seen.lock().unwrap());
        let _ = self.done.send((self.id, batch));
    }

    fn on_error(&self, _error: SignalError) {}
}

struct WindowFanout {
    next_id: AtomicU64,
    done: Sender<(u64, Vec<i64>)>,
}

impl Subscriber<Multicast<i64>> for WindowFanout {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        subscription.request(UNBOUNDED);
    }

    fn on_next(&self, window: Multicast<i64>) {
        window.subscribe(Arc::new(BatchSender {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            seen: Mutex::new(Vec::new()),
            done: self.done.clone(),
        }));
    }

    fn on_complete(&self) {}

    fn on_error(&self, _error: SignalError) {}
}

fn main() -> anyhow::Result<()> {
    let (done_tx, done_rx) = unbounded();

    // A window opens every 100ms and spans 300ms, so at any moment up to
    // three windows are collecting the same readings.
    let shift = WindowShift::timed(
        64,
        1,
        Duration::from_millis(300),
        Duration::from_millis(100),
        Arc::new(ThreadTimer::new()),
    )?;
    let subscriber = shift.subscriber(Arc::new(WindowFanout {
        next_id: AtomicU64::new(0),
        done: done_tx,
    }) as Arc<dyn Subscriber<Multicast<i64>>>);

    subscriber.on_subscribe(Arc::new(Unpaced));

    // Emit a reading every 25ms for half a second.
    for value in 0..20i64 {
        subscriber.on_next(value);
        thread::sleep(Duration::from_millis(25));
    }
    subscriber.on_complete();

    // A close that raced the final complete may still be in flight.
    let mut batches = Vec::new();
    while let Ok(batch) = done_rx.recv_timeout(Duration::from_millis(200)) {
        batches.push(batch);
    }
    batches.sort_by_key(|(id, _)| *id);

    for (id, batch) in batches {
        println!("window {}: {:?}", id, batch);
    }

    Ok(())
}
