//! # Coupler - Two Pipes Joined at Their Bottoms
//!
//! A [`Coupler`] connects the transport sides of two [`Duplex`] stacks so that
//! output units leaving one bottom are fed straight into the other bottom, with
//! no I/O in between. It stands in for a network when exercising two peers of a
//! protocol against each other:
//!
//! ```text
//!      application A               application B
//!           ↑↓                          ↑↓
//!      ┌─────────┐                 ┌─────────┐
//!      │  pipe A │                 │  pipe B │
//!      └────┬────┘                 └────┬────┘
//!           └──────────  Coupler  ──────┘
//! ```

use log::trace;
use std::time::Instant;

use crate::error::Result;
use crate::event::Event;
use crate::pipe::Duplex;

/// Events that reached the application side of either end.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// Events that emerged at the top of side A
    pub at_a: Vec<Event>,
    /// Events that emerged at the top of side B
    pub at_b: Vec<Event>,
}

/// Joins two duplex stacks bottom to bottom.
pub struct Coupler<A, B> {
    a: A,
    b: B,
}

impl<A: Duplex, B: Duplex> Coupler<A, B> {
    /// Couples `a` and `b`.
    pub fn new(a: A, b: B) -> Self {
        Self { a, b }
    }

    /// Side A.
    pub fn a(&mut self) -> &mut A {
        &mut self.a
    }

    /// Side B.
    pub fn b(&mut self) -> &mut B {
        &mut self.b
    }

    /// Separates the two sides again.
    pub fn into_inner(self) -> (A, B) {
        (self.a, self.b)
    }

    /// Writes `event` into the top of side A and carries the result across.
    pub fn send_a(&mut self, event: Event) -> Result<Delivered> {
        let output = self.a.feed_down(event)?;
        self.carry(output, vec![])
    }

    /// Writes `event` into the top of side B and carries the result across.
    pub fn send_b(&mut self, event: Event) -> Result<Delivered> {
        let output = self.b.feed_down(event)?;
        self.carry(vec![], output)
    }

    /// Flushes both sides and carries the result across.
    pub fn flush(&mut self) -> Result<Delivered> {
        let from_a = self.a.flush()?;
        let from_b = self.b.flush()?;
        self.carry(from_a, from_b)
    }

    /// Advances both sides' clocks. Events released toward either application
    /// are delivered first, then output units are carried across.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<Delivered> {
        let from_a = self.a.handle_timeout(now)?;
        let from_b = self.b.handle_timeout(now)?;
        let carried = self.carry(from_a.down, from_b.down)?;
        let mut delivered = Delivered {
            at_a: from_a.up,
            at_b: from_b.up,
        };
        delivered.at_a.extend(carried.at_a);
        delivered.at_b.extend(carried.at_b);
        Ok(delivered)
    }

    /// Lowers `eto` to the earliest timeout either side asked for.
    pub fn poll_timeout(&self, eto: &mut Instant) {
        self.a.poll_timeout(eto);
        self.b.poll_timeout(eto);
    }

    /// Moves output units across until neither side produces any more.
    fn carry(&mut self, mut from_a: Vec<Event>, mut from_b: Vec<Event>) -> Result<Delivered> {
        let mut delivered = Delivered::default();
        while !from_a.is_empty() || !from_b.is_empty() {
            for unit in std::mem::take(&mut from_a) {
                match unit {
                    Event::Data { payload, .. } => {
                        delivered.at_b.extend(self.b.feed_up(payload)?);
                        from_b.extend(self.b.drain_transmits());
                    }
                    other => trace!("A -> B: not carrying {}", other),
                }
            }
            for unit in std::mem::take(&mut from_b) {
                match unit {
                    Event::Data { payload, .. } => {
                        delivered.at_a.extend(self.a.feed_up(payload)?);
                        from_a.extend(self.a.drain_transmits());
                    }
                    other => trace!("B -> A: not carrying {}", other),
                }
            }
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::Pipe;

    #[test]
    fn test_data_crosses_both_ways() {
        let mut coupler = Coupler::new(Pipe::builder().build(), Pipe::builder().build());

        let delivered = coupler.send_a(Event::data("hello")).unwrap();
        assert_eq!(delivered.at_b, vec![Event::data("hello")]);
        assert!(delivered.at_a.is_empty());

        let delivered = coupler.send_b(Event::data("world")).unwrap();
        assert_eq!(delivered.at_a, vec![Event::data("world")]);
    }

    #[test]
    fn test_controls_stay_on_their_side() {
        let mut coupler = Coupler::new(Pipe::builder().build(), Pipe::builder().build());
        let delivered = coupler.send_a(Event::flush()).unwrap();
        assert_eq!(delivered, Delivered::default());
    }
}
