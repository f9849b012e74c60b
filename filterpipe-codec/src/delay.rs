//! Fixed-latency delay of data in either direction.

use log::{debug, trace};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use filterpipe::{Event, Filter, Released, Result};

/// Data held back until its release time, oldest first.
struct Delayer {
    delay: Duration,
    in_flight: VecDeque<(Instant, Event)>,
}

impl Delayer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: VecDeque::new(),
        }
    }

    fn enqueue(&mut self, clock: Instant, event: Event) {
        self.in_flight.push_back((clock + self.delay, event));
    }

    /// Pops every event whose release time is at or before `now`.
    fn release(&mut self, now: Instant) -> Vec<Event> {
        let mut output = vec![];
        while let Some((due, _)) = self.in_flight.front() {
            if *due > now {
                break;
            }
            if let Some((_, event)) = self.in_flight.pop_front() {
                output.push(event);
            }
        }
        output
    }

    fn release_all(&mut self) -> Vec<Event> {
        self.in_flight.drain(..).map(|(_, event)| event).collect()
    }

    fn next_due(&self) -> Option<Instant> {
        self.in_flight.front().map(|(due, _)| *due)
    }
}

/// Holds data for a fixed time before passing it on: upward data for
/// `up_delay`, downward data for `down_delay`.
///
/// The filter keeps its own clock, starting at the instant given to
/// [`DelayFilter::new`] and advanced by every `handle_timeout`. Data is due
/// one delay after the clock reading at the time it arrived, so hosts should
/// report the time after each read, as the [`Driver`](filterpipe::Driver) loop
/// does.
///
/// Only data is delayed. A control event first releases the data held ahead of
/// it in its direction, so order is kept; `Control(Error)` discards everything
/// held. A flush releases held downward data at once.
pub struct DelayFilter {
    clock: Instant,
    up: Delayer,
    down: Delayer,
}

impl DelayFilter {
    /// Creates a filter whose clock starts at `start`.
    pub fn new(start: Instant, up_delay: Duration, down_delay: Duration) -> Self {
        Self {
            clock: start,
            up: Delayer::new(up_delay),
            down: Delayer::new(down_delay),
        }
    }

    /// Number of events currently held in either direction.
    pub fn pending(&self) -> usize {
        self.up.in_flight.len() + self.down.in_flight.len()
    }

    fn pass(clock: Instant, delayer: &mut Delayer, input: Event) -> Vec<Event> {
        if input.is_data() {
            delayer.enqueue(clock, input);
            return delayer.release(clock);
        }
        let mut output = delayer.release_all();
        output.push(input);
        output
    }

    fn discard(&mut self) {
        let held = self.pending();
        if held > 0 {
            debug!("discarding {} delayed events", held);
        }
        self.up.in_flight.clear();
        self.down.in_flight.clear();
    }
}

impl Filter for DelayFilter {
    fn name(&self) -> &str {
        "DelayFilter"
    }

    fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
        if input.is_error() {
            self.discard();
            return Ok(vec![input]);
        }
        Ok(Self::pass(self.clock, &mut self.up, input))
    }

    fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
        if input.is_error() {
            self.discard();
            return Ok(vec![input]);
        }
        Ok(Self::pass(self.clock, &mut self.down, input))
    }

    fn flush_down(&mut self) -> Result<Vec<Event>> {
        Ok(self.down.release_all())
    }

    fn is_drained(&self) -> bool {
        self.pending() == 0
    }

    fn poll_timeout(&self, eto: &mut Instant) {
        for due in [self.up.next_due(), self.down.next_due()].into_iter().flatten() {
            if due < *eto {
                *eto = due;
            }
        }
    }

    fn handle_timeout(&mut self, now: Instant) -> Result<Released> {
        if now > self.clock {
            self.clock = now;
        }
        let released = Released {
            up: self.up.release(self.clock),
            down: self.down.release(self.clock),
        };
        if !released.is_empty() {
            trace!(
                "released {} up, {} down",
                released.up.len(),
                released.down.len()
            );
        }
        Ok(released)
    }
}
