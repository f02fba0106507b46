//! # CrabPane Core
//!
//! Backpressure-aware windowing for push-based element sequences.
//!
//! This crate provides the operator and the protocol substrate under it:
//!
//! - [`protocol`] — the push protocol: [`Publisher`](protocol::Publisher),
//!   [`Subscriber`](protocol::Subscriber), [`Subscription`](protocol::Subscription),
//!   [`SignalError`](protocol::SignalError).
//! - [`demand`] — demand tracking and the
//!   [`DemandSubscriber`](demand::DemandSubscriber) base operators build on.
//! - [`broadcast`] — the hot [`Multicast`](broadcast::Multicast) publisher
//!   behind each window.
//! - [`window`] — the [`WindowShift`](window::WindowShift) operator itself.
//! - [`timer`] — the [`Timer`](timer::Timer) seam and the thread-backed
//!   [`ThreadTimer`](timer::ThreadTimer).
//! - [`source`] — [`IterPublisher`](source::IterPublisher), a
//!   demand-honoring in-memory source.

pub mod broadcast;
pub mod demand;
pub mod protocol;
pub mod source;
pub mod timer;
pub mod window;
