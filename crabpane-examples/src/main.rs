use std::sync::{Arc, Mutex};

use crabpane_core::broadcast::Multicast;
use crabpane_core::demand::UNBOUNDED;
use crabpane_core::protocol::{Publisher, SignalError, Subscriber, Subscription};
use crabpane_core::source::IterPublisher;
use crabpane_core::window::WindowShift;

struct BatchWriter {
    batch: Arc<Mutex<Vec<i64>>>,
}

impl Subscriber<i64> for BatchWriter {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        subscription.request(UNBOUNDED);
    }

    fn on_next(&self, value: i64) {
        self.batch.lock().unwrap().push(value);
    }

    fn on_complete(&self) {}

    fn on_error(&self, _error: SignalError) {}
}

struct BatchSink {
    batches: Mutex<Vec<Arc<Mutex<Vec<i64>>>>>,
}

impl Subscriber<Multicast<i64>> for BatchSink {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        subscription.request(UNBOUNDED);
    }

    fn on_next(&self, window: Multicast<i64>) {
        let batch = Arc::new(Mutex::new(Vec::new()));
        window.subscribe(Arc::new(BatchWriter {
            batch: batch.clone(),
        }));
        self.batches.lock().unwrap().push(batch);
    }

    fn on_complete(&self) {}

    fn on_error(&self, _error: SignalError) {}
}

fn main() -> anyhow::Result<()> {
    // Ten temperature readings, batched three at a time. The shift of two
    // makes consecutive batches share one reading.
    let readings: Vec<i64> = vec![18, 19, 21, 24, 22, 20, 17, 16, 19, 23];

    let sink = Arc::new(BatchSink {
        batches: Mutex::new(Vec::new()),
    });
    let shift = WindowShift::count(3, 2)?;

    IterPublisher::new(readings)
        .subscribe(shift.subscriber(sink.clone() as Arc<dyn Subscriber<Multicast<i64>>>));

    for (i, batch) in sink.batches.lock().unwrap().iter().enumerate() {
        println!("batch {}: {:?}", i, batch.lock().unwrap());
    }

    Ok(())
}
