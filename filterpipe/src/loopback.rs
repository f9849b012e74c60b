//! # Loopback - Echoing a Stack Back on Itself
//!
//! Loopbacks close one end of a [`Duplex`] stack onto itself, which is handy for
//! exercising a protocol stack without a peer:
//!
//! ```text
//!        ┌── TopLoopback ──┐                application
//!        ↑                 ↓                  ↓      ↑
//!   ┌─────────────────────────┐         ┌─────────────────────────┐
//!   │          stack          │         │          stack          │
//!   └─────────────────────────┘         └─────────────────────────┘
//!        ↑                 ↓                 ↓         ↑
//!   handle_read()    output units           └─ Bottom ─┘
//!                                              Loopback
//! ```
//!
//! A [`TopLoopback`] plays an application that writes back every data event it
//! receives, so a remote peer sees an echo server. A [`BottomLoopback`] plays a
//! transport that feeds every output unit straight back in, so the application
//! receives what it wrote after a full round trip through the stack.
//!
//! Filters only emit in the direction they were driven, so the turnaround lives
//! here rather than in a filter.

use bytes::Bytes;
use log::trace;

use crate::error::Result;
use crate::event::Event;
use crate::pipe::Duplex;

/// Echoes data arriving at the top of a stack back down through it.
pub struct TopLoopback<D> {
    inner: D,
}

impl<D: Duplex> TopLoopback<D> {
    /// Wraps `inner`.
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    /// Gets a reference to the wrapped stack.
    pub fn get_ref(&self) -> &D {
        &self.inner
    }

    /// Gets a mutable reference to the wrapped stack.
    pub fn get_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    /// Consumes the loopback, returning the wrapped stack.
    pub fn into_inner(self) -> D {
        self.inner
    }

    /// Pushes transport-received bytes up, writes every data event that emerges
    /// back down, and returns the output units for the transport.
    pub fn feed_up(&mut self, raw: Bytes) -> Result<Vec<Event>> {
        let events = self.inner.feed_up(raw)?;
        let mut transmits = self.inner.drain_transmits();
        for event in events {
            if event.is_data() {
                transmits.extend(self.inner.feed_down(event)?);
            } else {
                trace!("not echoing {}", event);
            }
        }
        Ok(transmits)
    }
}

/// Feeds data leaving the bottom of a stack back into it.
pub struct BottomLoopback<D> {
    inner: D,
}

impl<D: Duplex> BottomLoopback<D> {
    /// Wraps `inner`.
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    /// Gets a reference to the wrapped stack.
    pub fn get_ref(&self) -> &D {
        &self.inner
    }

    /// Gets a mutable reference to the wrapped stack.
    pub fn get_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    /// Consumes the loopback, returning the wrapped stack.
    pub fn into_inner(self) -> D {
        self.inner
    }

    /// Pushes an application event down and returns the application events its
    /// output units produce once fed back up.
    pub fn feed_down(&mut self, event: Event) -> Result<Vec<Event>> {
        let output = self.inner.feed_down(event)?;
        self.turn_around(output)
    }

    /// Flushes the stack and feeds what it releases back up.
    pub fn flush(&mut self) -> Result<Vec<Event>> {
        let output = self.inner.flush()?;
        self.turn_around(output)
    }

    fn turn_around(&mut self, mut units: Vec<Event>) -> Result<Vec<Event>> {
        let mut delivered = vec![];
        while !units.is_empty() {
            for unit in std::mem::take(&mut units) {
                match unit {
                    Event::Data { payload, .. } => {
                        delivered.extend(self.inner.feed_up(payload)?);
                        units.extend(self.inner.drain_transmits());
                    }
                    other => trace!("not looping back {}", other),
                }
            }
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::filter::Filter;
    use crate::pipe::Pipe;

    /// Prefixes downward data with `#` and strips it going up.
    struct Hash;

    impl Filter for Hash {
        fn name(&self) -> &str {
            "Hash"
        }

        fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
            match input {
                Event::Data { payload, meta } => match payload.strip_prefix(b"#") {
                    Some(rest) => {
                        Ok(vec![Event::data(Bytes::copy_from_slice(rest)).with_meta(meta)])
                    }
                    None => Err(Error::protocol_violation("missing #")),
                },
                control => Ok(vec![control]),
            }
        }

        fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
            match input {
                Event::Data { payload, meta } => {
                    let mut framed = b"#".to_vec();
                    framed.extend_from_slice(&payload);
                    Ok(vec![Event::data(framed).with_meta(meta)])
                }
                control => Ok(vec![control]),
            }
        }
    }

    #[test]
    fn test_top_loopback_echoes_data() {
        let mut echo = TopLoopback::new(Pipe::builder().add_back(Hash).build());
        assert_eq!(
            echo.feed_up(Bytes::from_static(b"#ping")).unwrap(),
            vec![Event::data("#ping")]
        );

        let transmits = echo.feed_up(Bytes::from_static(b"oops")).unwrap();
        assert_eq!(transmits, vec![]);
        assert!(echo.feed_up(Bytes::from_static(b"#late")).is_err());
    }

    #[test]
    fn test_bottom_loopback_round_trips() {
        let mut wire = BottomLoopback::new(Pipe::builder().add_back(Hash).build());
        assert_eq!(
            wire.feed_down(Event::data("hello")).unwrap(),
            vec![Event::data("hello")]
        );
        assert_eq!(wire.flush().unwrap(), vec![]);
    }
}
