//! # Filter Trait - One Bidirectional Protocol Stage
//!
//! The [`Filter`] trait is the building block of a [`Pipe`](crate::Pipe). A filter
//! transforms events moving in two directions:
//!
//! - **Upward** (`push_up`): wire-side input toward the application
//! - **Downward** (`push_down`): application-side input toward the wire
//!
//! A filter never references its neighbours. It consumes one event and returns
//! zero or more events; the pipe is the sole owner of filter ordering and hands
//! the returned events to the next filter in the direction of travel.
//!
//! ## Returning Zero, One or Many Events
//!
//! Protocol messages rarely align with I/O chunk boundaries, so a filter is free
//! to buffer input privately and return nothing ("needs more data"), or to return
//! several events at once ("reassembly completed several messages"). Waiting is
//! never a blocked call; it is an ordinary empty return, and the host calls again
//! when more input is available.
//!
//! ## Example: Uppercasing Filter
//!
//! ```rust
//! use bytes::Bytes;
//! use filterpipe::{Event, Filter, Result};
//!
//! struct Uppercase;
//!
//! impl Filter for Uppercase {
//!     fn name(&self) -> &str {
//!         "Uppercase"
//!     }
//!
//!     fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
//!         Ok(vec![match input {
//!             Event::Data { payload, meta } => Event::Data {
//!                 payload: Bytes::from(payload.to_ascii_uppercase()),
//!                 meta,
//!             },
//!             other => other,
//!         }])
//!     }
//!
//!     fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
//!         Ok(vec![input])
//!     }
//! }
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//!            Control(Close)          drained
//!   Open ───────────────────→ Closing ───────→ Closed
//!    │                           │
//!    └───────────┬───────────────┘
//!                ↓ ProtocolViolation / Control(Error)
//!             Faulted
//! ```
//!
//! The lifecycle is enforced by the pipe, not by each filter: once a filter is
//! `Closed` or `Faulted` the pipe rejects further input for it with
//! [`Error::State`](crate::Error::State) without calling into the filter.

use std::fmt;
use std::time::Instant;

use crate::error::Result;
use crate::event::Event;

/// Lifecycle state of a filter inside a pipe.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterState {
    /// Accepting input in both directions.
    #[default]
    Open,
    /// `Control(Close)` seen; still accepting input until drained.
    Closing,
    /// Fully closed, rejects input.
    Closed,
    /// Unrecoverable protocol fault, rejects input.
    Faulted,
}

impl FilterState {
    /// Whether input may still be pushed in this state.
    pub fn is_accepting(self) -> bool {
        matches!(self, FilterState::Open | FilterState::Closing)
    }
}

impl fmt::Display for FilterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterState::Open => "open",
            FilterState::Closing => "closing",
            FilterState::Closed => "closed",
            FilterState::Faulted => "faulted",
        };
        write!(f, "{s}")
    }
}

/// Events a filter releases when its timer fires, by direction of travel.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Released {
    /// Events for the filters above (or the application).
    pub up: Vec<Event>,
    /// Events for the filters below (or the transport).
    pub down: Vec<Event>,
}

impl Released {
    /// Events released toward the application only.
    pub fn upward(up: Vec<Event>) -> Self {
        Self { up, down: vec![] }
    }

    /// Events released toward the transport only.
    pub fn downward(down: Vec<Event>) -> Self {
        Self { up: vec![], down }
    }

    /// Whether nothing was released in either direction.
    pub fn is_empty(&self) -> bool {
        self.up.is_empty() && self.down.is_empty()
    }
}

/// A single bidirectional protocol-transformation stage.
///
/// Filters hold only private buffering state and must not perform I/O, start
/// timers or schedule work of their own; every method returns promptly using
/// already-available state.
///
/// # Faults
///
/// A filter that detects input it cannot interpret returns
/// `Err(Error::ProtocolViolation(..))` (or emits a `Control(Error)` event). The
/// pipe moves the filter to [`FilterState::Faulted`], shows `Control(Error)` to
/// every remaining filter in the direction of travel so they can release their
/// buffers, and surfaces the fault to the host.
pub trait Filter {
    /// Returns the filter's name, used in logs and state errors.
    fn name(&self) -> &str;

    /// Consumes one upward-moving event and returns the events for the next
    /// filter up (or the application, if this filter is topmost).
    fn push_up(&mut self, input: Event) -> Result<Vec<Event>>;

    /// Consumes one downward-moving event and returns the output units for the
    /// next filter down (or the transport, if this filter is bottommost).
    fn push_down(&mut self, input: Event) -> Result<Vec<Event>>;

    /// Forces emission of buffered-but-not-yet-required downward output.
    ///
    /// The default implementation has nothing buffered.
    fn flush_down(&mut self) -> Result<Vec<Event>> {
        Ok(vec![])
    }

    /// Whether all buffered partial data has been flushed or discarded.
    ///
    /// Consulted after a filter has seen `Control(Close)`: the filter moves from
    /// `Closing` to `Closed` as soon as this returns `true`. Filters that keep
    /// output buffered across a close (e.g. awaiting a final flush) return
    /// `false` until it has been emitted.
    fn is_drained(&self) -> bool {
        true
    }

    /// Updates `eto` (earliest timeout) if this filter needs
    /// [`handle_timeout`](Filter::handle_timeout) to be called earlier.
    ///
    /// The default implementation requests nothing.
    fn poll_timeout(&self, _eto: &mut Instant) {}

    /// Reacts to the host's clock reaching `now`, returning whatever this
    /// releases: downward output such as retransmits or keepalives, and upward
    /// events held back until a deadline.
    ///
    /// The default implementation produces nothing.
    fn handle_timeout(&mut self, _now: Instant) -> Result<Released> {
        Ok(Released::default())
    }
}

impl<F> Filter for Box<F>
where
    F: Filter + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
        (**self).push_up(input)
    }

    fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
        (**self).push_down(input)
    }

    fn flush_down(&mut self) -> Result<Vec<Event>> {
        (**self).flush_down()
    }

    fn is_drained(&self) -> bool {
        (**self).is_drained()
    }

    fn poll_timeout(&self, eto: &mut Instant) {
        (**self).poll_timeout(eto)
    }

    fn handle_timeout(&mut self, now: Instant) -> Result<Released> {
        (**self).handle_timeout(now)
    }
}
