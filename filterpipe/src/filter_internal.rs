use log::{debug, trace};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::filter::{Filter, FilterState, Released};

/// What kind of input a stage just consumed, as far as its lifecycle is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seen {
    Close,
    Error,
    Other,
}

impl Seen {
    /// Only untagged controls address the filter itself; tagged ones belong to a
    /// branch and merely pass through.
    fn of(event: &Event) -> Self {
        if event.branch().is_some() {
            Seen::Other
        } else if event.is_close() {
            Seen::Close
        } else if event.is_error() {
            Seen::Error
        } else {
            Seen::Other
        }
    }
}

/// Whether `event` is a fault for the pipe it travels through.
pub(crate) fn is_fault(event: &Event) -> bool {
    event.is_error() && event.branch().is_none()
}

/// A filter together with the lifecycle state the pipe tracks for it.
pub(crate) struct Stage {
    filter: Box<dyn Filter>,
    state: FilterState,
}

impl Stage {
    pub(crate) fn new(filter: Box<dyn Filter>) -> Self {
        Self {
            filter,
            state: FilterState::Open,
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.filter.name()
    }

    pub(crate) fn state(&self) -> FilterState {
        self.state
    }

    pub(crate) fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
        self.ensure_accepting()?;
        trace!("{} push_up {}", self.name(), input);
        let seen = Seen::of(&input);
        let output = self.filter.push_up(input);
        self.settle(seen, output)
    }

    /// `Control(Flush)` is answered by the stage itself: the filter's buffered
    /// output is released ahead of the forwarded Flush.
    ///
    /// A closed stage lets an untagged `Flush` or `Close` pass untouched so the
    /// stages beneath it can still drain and finish closing.
    pub(crate) fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
        if self.state == FilterState::Closed
            && input.branch().is_none()
            && (input.is_flush() || input.is_close())
        {
            trace!("{} is closed, passing {}", self.name(), input);
            return Ok(vec![input]);
        }
        self.ensure_accepting()?;
        trace!("{} push_down {}", self.name(), input);
        if input.is_flush() && input.branch().is_none() {
            let output = self.filter.flush_down().map(|mut output| {
                output.push(input);
                output
            });
            return self.settle(Seen::Other, output);
        }
        let seen = Seen::of(&input);
        let output = self.filter.push_down(input);
        self.settle(seen, output)
    }

    /// A fault raised by the timer is reported on the downward side.
    pub(crate) fn handle_timeout(&mut self, now: Instant) -> Result<Released> {
        if !self.state.is_accepting() {
            return Ok(Released::default());
        }
        match self.filter.handle_timeout(now) {
            Ok(Released { up, down }) => {
                let down = self.settle(Seen::Other, Ok(down))?;
                let up = self.settle(Seen::Other, Ok(up))?;
                Ok(Released { up, down })
            }
            Err(err) => Ok(Released::downward(self.settle(Seen::Other, Err(err))?)),
        }
    }

    pub(crate) fn poll_timeout(&self, eto: &mut Instant) {
        if self.state.is_accepting() {
            self.filter.poll_timeout(eto);
        }
    }

    /// Shows a fault raised elsewhere in the pipe to this filter so it can
    /// release its buffers. Whatever the filter returns is discarded.
    pub(crate) fn absorb_fault(&mut self, fault: &Event, upward: bool) {
        if !self.state.is_accepting() {
            trace!("{} is {}, skipping fault cleanup", self.name(), self.state);
            return;
        }
        let _ = if upward {
            self.filter.push_up(fault.clone())
        } else {
            self.filter.push_down(fault.clone())
        };
        self.transition(FilterState::Faulted);
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.state.is_accepting() {
            Ok(())
        } else {
            Err(Error::state(self.name(), self.state))
        }
    }

    fn settle(&mut self, seen: Seen, output: Result<Vec<Event>>) -> Result<Vec<Event>> {
        let output = match output {
            Ok(output) => output,
            Err(Error::ProtocolViolation(reason)) => {
                debug!("{} protocol violation: {}", self.name(), reason);
                self.transition(FilterState::Faulted);
                return Ok(vec![Event::error(reason)]);
            }
            Err(err) => return Err(err),
        };

        if seen == Seen::Error || output.iter().any(is_fault) {
            self.transition(FilterState::Faulted);
            return Ok(output);
        }
        if seen == Seen::Close && self.state == FilterState::Open {
            self.transition(FilterState::Closing);
        }
        if self.state == FilterState::Closing && self.filter.is_drained() {
            self.transition(FilterState::Closed);
        }
        Ok(output)
    }

    fn transition(&mut self, next: FilterState) {
        if self.state != next {
            debug!("{}: {} -> {}", self.name(), self.state, next);
            self.state = next;
        }
    }
}
