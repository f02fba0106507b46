//! Backpressure-aware window-shift operator.
//!
//! Splits one push-based sequence into bounded, possibly overlapping
//! windows, each exposed downstream as its own hot [`Multicast`] publisher:
//!
//! - [`WindowShift`] — validated configuration and entry point.
//! - [`WindowShiftEngine`] — open-window registry, element fan-out, and
//!   timer-event handling.
//! - [`WindowHandle`] / [`WindowId`] — one window's counter and signal gate.
//!
//! Count mode opens a window at every `skip`-th element; time mode opens
//! one every `timeshift` and closes each one `timespan` after it opened.
//! In either mode a window completes as soon as it holds `batch_size`
//! elements.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::broadcast::Multicast;
use crate::demand::{DemandSubscriber, SignalHandler, SubscriberCore};
use crate::protocol::{SignalError, Subscriber, Subscription};
use crate::timer::{Timer, TimerHandle};

mod engine;
mod handle;
mod operator;

pub use engine::*;
pub use handle::*;
pub use operator::*;

#[cfg(test)]
#[path = "tests/window_tests.rs"]
mod tests;
