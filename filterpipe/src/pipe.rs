//! # Pipe - An Ordered Stack of Filters Driven as One Duplex Unit
//!
//! A [`Pipe`] owns an ordered stack of [`Filter`]s, bottom (nearest the transport)
//! to top (nearest the application), and drives events through them in both
//! directions:
//!
//! ```text
//!                    application
//!                  ↑            │ feed_down()
//!     feed_up()    │            ↓
//!            ┌─────┴────────────┴─────┐
//!            │       Filter  N-1      │
//!            ├────────────────────────┤
//!            │          ...           │
//!            ├────────────────────────┤
//!            │       Filter  0        │
//!            └─────┬────────────┬─────┘
//!                  │            ↓ output units
//!              raw bytes
//!                    transport
//! ```
//!
//! The pipe performs no I/O. The host pushes transport-received bytes in with
//! [`Pipe::feed_up`], pushes application events in with [`Pipe::feed_down`], and
//! sends whatever comes back.
//!
//! ## Building a Pipe
//!
//! Filters can only be added while building, which keeps the relative order of
//! filters fixed for the whole session:
//!
//! ```rust
//! use filterpipe::{Event, Filter, Pipe, Result};
//!
//! struct Passthrough;
//!
//! impl Filter for Passthrough {
//!     fn name(&self) -> &str {
//!         "Passthrough"
//!     }
//!     fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
//!         Ok(vec![input])
//!     }
//!     fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
//!         Ok(vec![input])
//!     }
//! }
//!
//! let mut pipe = Pipe::builder().add_back(Passthrough).build();
//!
//! let events = pipe.feed_up(&b"hello"[..]).unwrap();
//! assert_eq!(events, vec![Event::data(&b"hello"[..])]);
//!
//! let output = pipe.feed_down(Event::data(&b"bye"[..])).unwrap();
//! assert_eq!(output, vec![Event::data(&b"bye"[..])]);
//! ```
//!
//! ## Ordering and Backpressure
//!
//! Within one call, events keep the order filters produced them in. The pipe keeps
//! nothing between calls: a filter that needs more data holds it in its own buffer,
//! so memory stays proportional to one round of pending output rather than to
//! session history. The only staged events the pipe drops are those queued behind
//! a `Close` for a filter that closed on it; they are counted in
//! [`PipeStats::rejected`].
//!
//! ## Thread Safety
//!
//! A pipe is `!Sync` by construction (filters are plain `Box<dyn Filter>`) and is
//! meant to be exclusively owned by one execution context. Hosts with several
//! sessions create one pipe per session.

use bytes::Bytes;
use std::time::Instant;

use crate::error::Result;
use crate::event::Event;
use crate::filter::{Filter, FilterState, Released};
use crate::filter_internal::Stage;
use crate::pipe_internal::PipeInternal;

/// The host-facing surface shared by [`Pipe`] and [`Router`](crate::Router).
///
/// The [`Driver`](crate::Driver) adapts any `Duplex` to the poll-based
/// [`Protocol`](crate::Protocol) interface.
pub trait Duplex {
    /// Pushes transport-received bytes in, returning application events.
    fn feed_up(&mut self, raw: Bytes) -> Result<Vec<Event>>;

    /// Pushes an application event in, returning output units for the transport.
    fn feed_down(&mut self, event: Event) -> Result<Vec<Event>>;

    /// Forces emission of buffered downward output.
    fn flush(&mut self) -> Result<Vec<Event>>;

    /// Initiates a graceful close, draining any final output.
    fn close(&mut self) -> Result<Vec<Event>>;

    /// Lets filters react to the clock reaching `now`, returning the events
    /// they release toward the application and the output units toward the
    /// transport.
    fn handle_timeout(&mut self, now: Instant) -> Result<Released>;

    /// Lowers `eto` to the earliest time any filter needs `handle_timeout`.
    fn poll_timeout(&self, eto: &mut Instant);

    /// Takes output units produced as a side effect of `feed_up`.
    ///
    /// A plain pipe never produces any; a router does when a peer-closed branch
    /// drains its final output.
    fn drain_transmits(&mut self) -> Vec<Event> {
        vec![]
    }
}

/// Counters describing how much work a pipe has done.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipeStats {
    /// Number of drive cycles (one per direction per call).
    pub drives: u64,
    /// Total number of `push_up`/`push_down`/flush calls into filters.
    pub filter_calls: u64,
    /// Largest batch ever staged between two adjacent filters.
    pub peak_batch: usize,
    /// Staged events dropped because the filter they were staged for had
    /// closed earlier in the same batch.
    pub rejected: u64,
}

/// Builds a [`Pipe`].
#[derive(Default)]
pub struct PipeBuilder {
    filters: Vec<Box<dyn Filter>>,
}

impl PipeBuilder {
    /// Creates a builder with no filters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter on top of the filters added so far.
    pub fn add_back(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Inserts a filter beneath the filters added so far.
    pub fn add_front(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.insert(0, Box::new(filter));
        self
    }

    /// Number of filters added so far.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether no filter has been added yet.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Finishes the pipe. Its filter order is fixed from here on.
    pub fn build(self) -> Pipe {
        Pipe {
            internal: PipeInternal::new(self.filters.into_iter().map(Stage::new).collect()),
        }
    }
}

/// An ordered stack of filters driven together as one duplex unit.
pub struct Pipe {
    internal: PipeInternal,
}

impl Pipe {
    /// Starts building a pipe.
    pub fn builder() -> PipeBuilder {
        PipeBuilder::new()
    }

    /// Number of filters in the pipe.
    pub fn len(&self) -> usize {
        self.internal.len()
    }

    /// Whether the pipe has no filters (events pass straight through).
    pub fn is_empty(&self) -> bool {
        self.internal.len() == 0
    }

    /// Filter names, bottom to top.
    pub fn names(&self) -> Vec<&str> {
        self.internal.names()
    }

    /// Aggregate state: `Faulted` if any filter faulted, `Closed` once closed,
    /// `Closing` while any filter is closing, `Open` otherwise.
    pub fn state(&self) -> FilterState {
        self.internal.state()
    }

    /// State of the filter at `index` (0 is the bottom).
    pub fn filter_state(&self, index: usize) -> Option<FilterState> {
        self.internal.stage_state(index)
    }

    /// Work counters.
    pub fn stats(&self) -> PipeStats {
        self.internal.stats()
    }

    /// Pushes transport-received bytes into the bottom filter and returns the
    /// events that emerge at the top, in order.
    ///
    /// Returns an empty vector when the filters need more data. If a filter
    /// faults, the single `Control(Error)` event is returned and the pipe rejects
    /// further input.
    pub fn feed_up(&mut self, raw: impl Into<Bytes>) -> Result<Vec<Event>> {
        self.feed_up_event(Event::data(raw))
    }

    /// Like [`feed_up`](Pipe::feed_up) but for an arbitrary event, e.g. a control
    /// signal decoded by an outer layer.
    pub fn feed_up_event(&mut self, event: Event) -> Result<Vec<Event>> {
        self.internal.ensure_accepting()?;
        self.internal.drive_up(0, vec![event])
    }

    /// Pushes an application event into the top filter and returns the output
    /// units that emerge at the bottom, in order.
    pub fn feed_down(&mut self, event: Event) -> Result<Vec<Event>> {
        self.internal.ensure_accepting()?;
        let top = self.internal.len();
        self.internal.drive_down(top, vec![event])
    }

    /// Makes every filter emit its buffered downward output and returns what
    /// reaches the bottom.
    ///
    /// The flush travels top to bottom, the same way as any downward event, so
    /// whatever an upper filter releases still passes through (and may be
    /// buffered again and released by) every filter beneath it. Filters that
    /// already closed let the flush through to the ones below.
    pub fn flush(&mut self) -> Result<Vec<Event>> {
        let mut output = self.feed_down(Event::flush())?;
        if output.last().is_some_and(|event| event.is_flush() && event.branch().is_none()) {
            output.pop();
        }
        Ok(output)
    }

    /// Flushes, then drives `Control(Close)` down through every filter. The pipe
    /// rejects further input afterwards.
    ///
    /// If the peer already closed the pipe from below, the flush finishes that
    /// close and no `Close` is sent down.
    pub fn close(&mut self) -> Result<Vec<Event>> {
        let mut output = self.flush()?;
        match self.state() {
            FilterState::Faulted => return Ok(output),
            FilterState::Closed => {
                self.internal.mark_closed();
                return Ok(output);
            }
            _ => {}
        }
        output.extend(self.feed_down(Event::close())?);
        if self.state() != FilterState::Faulted {
            self.internal.mark_closed();
        }
        Ok(output)
    }

    /// Runs filter timeout handlers, returning what they release once it has
    /// passed the rest of the pipe: application events in `up`, output units in
    /// `down`. Closed or faulted filters are skipped.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<Released> {
        self.internal.ensure_accepting()?;
        self.internal.handle_timeout(now)
    }

    /// Lowers `eto` to the earliest clock update any filter asked for.
    pub fn poll_timeout(&self, eto: &mut Instant) {
        self.internal.poll_timeout(eto);
    }
}

impl Duplex for Pipe {
    fn feed_up(&mut self, raw: Bytes) -> Result<Vec<Event>> {
        Pipe::feed_up(self, raw)
    }

    fn feed_down(&mut self, event: Event) -> Result<Vec<Event>> {
        Pipe::feed_down(self, event)
    }

    fn flush(&mut self) -> Result<Vec<Event>> {
        Pipe::flush(self)
    }

    fn close(&mut self) -> Result<Vec<Event>> {
        Pipe::close(self)
    }

    fn handle_timeout(&mut self, now: Instant) -> Result<Released> {
        Pipe::handle_timeout(self, now)
    }

    fn poll_timeout(&self, eto: &mut Instant) {
        Pipe::poll_timeout(self, eto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct Tag(&'static str);

    impl Filter for Tag {
        fn name(&self) -> &str {
            self.0
        }

        fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
            Ok(vec![match input {
                Event::Data { payload, meta } => {
                    let mut tagged = payload.to_vec();
                    tagged.extend_from_slice(self.0.as_bytes());
                    Event::Data {
                        payload: tagged.into(),
                        meta,
                    }
                }
                other => other,
            }])
        }

        fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
            self.push_up(input)
        }
    }

    #[test]
    fn test_empty_pipe_passes_through() {
        let mut pipe = Pipe::builder().build();
        assert!(pipe.is_empty());
        assert_eq!(pipe.feed_up(&b"x"[..]).unwrap(), vec![Event::data(&b"x"[..])]);
        assert_eq!(pipe.flush().unwrap(), vec![]);
    }

    #[test]
    fn test_traversal_order() {
        let mut pipe = Pipe::builder()
            .add_back(Tag("b"))
            .add_back(Tag("c"))
            .add_front(Tag("a"))
            .build();
        assert_eq!(pipe.names(), vec!["a", "b", "c"]);

        assert_eq!(
            pipe.feed_up(&b">"[..]).unwrap(),
            vec![Event::data(&b">abc"[..])]
        );
        assert_eq!(
            pipe.feed_down(Event::data(&b"<"[..])).unwrap(),
            vec![Event::data(&b"<cba"[..])]
        );
    }

    #[test]
    fn test_close_rejects_further_input() {
        let mut pipe = Pipe::builder().add_back(Tag("a")).build();
        let output = pipe.close().unwrap();
        assert_eq!(output, vec![Event::close()]);
        assert_eq!(pipe.state(), FilterState::Closed);
        assert_eq!(pipe.filter_state(0), Some(FilterState::Closed));

        let err = pipe.feed_up(&b"late"[..]).unwrap_err();
        assert_eq!(
            err,
            Error::State {
                target: "pipe".to_owned(),
                state: FilterState::Closed
            }
        );
        assert!(pipe.feed_down(Event::data(&b"late"[..])).is_err());
    }
}
