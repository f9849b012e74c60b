//! # Protocol - The Poll-Based Host Surface
//!
//! The [`Protocol`] trait is the interface a host event loop drives. Input is
//! pushed with the `handle_*` methods and output is pulled with the matching
//! `poll_*` methods until they return `None`:
//!
//! ```text
//!         handle_write(Event)         poll_read() -> Event
//!                 ↓                           ↑
//!          ┌──────────────────────────────────────┐
//!          │               Driver                 │
//!          │      (Pipe or Router underneath)     │
//!          └──────────────────────────────────────┘
//!                 ↓                           ↑
//!         poll_write() -> Bytes       handle_read(Bytes)
//! ```
//!
//! [`Driver`] implements it for anything that is [`Duplex`], queueing results so
//! the host may poll at its own pace. Data output units become the bytes returned
//! by `poll_write`; a `Control(Close)` reaching the transport marks the driver
//! closed; a `Control(Error)` is surfaced through `poll_read` so the host notices
//! it wherever it is looking.
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use filterpipe::{Driver, Event, Pipe, Protocol};
//!
//! let mut driver = Driver::new(Pipe::builder().build());
//!
//! driver.handle_read(Bytes::from_static(b"ping")).unwrap();
//! assert_eq!(driver.poll_read(), Some(Event::data(&b"ping"[..])));
//! assert_eq!(driver.poll_read(), None);
//!
//! driver.handle_write(Event::data(&b"pong"[..])).unwrap();
//! assert_eq!(driver.poll_write().as_deref(), Some(&b"pong"[..]));
//! ```

use bytes::Bytes;
use log::{debug, warn};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::filter::FilterState;
use crate::pipe::Duplex;

const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365);

/// A sans-io protocol driven by a host event loop.
pub trait Protocol {
    /// Associated input message type for `handle_read`
    type Rin;
    /// Associated output message type for `poll_read`
    type Rout;
    /// Associated input message type for `handle_write`
    type Win;
    /// Associated output message type for `poll_write`
    type Wout;
    /// Associated error type
    type Error;

    /// Handles input read from the transport.
    fn handle_read(&mut self, msg: Self::Rin) -> std::result::Result<(), Self::Error>;

    /// Polls output for the application.
    fn poll_read(&mut self) -> Option<Self::Rout>;

    /// Handles input written by the application.
    fn handle_write(&mut self, msg: Self::Win) -> std::result::Result<(), Self::Error>;

    /// Polls output for the transport.
    fn poll_write(&mut self) -> Option<Self::Wout>;

    /// Handles timeout
    fn handle_timeout(&mut self, _now: Instant) -> std::result::Result<(), Self::Error> {
        Ok(())
    }

    /// Polls timeout
    fn poll_timeout(&mut self) -> Option<Instant> {
        None
    }

    /// Closes protocol
    fn close(&mut self) -> std::result::Result<(), Self::Error> {
        Ok(())
    }
}

impl<P> Protocol for &mut P
where
    P: Protocol + ?Sized,
{
    type Rin = P::Rin;
    type Rout = P::Rout;
    type Win = P::Win;
    type Wout = P::Wout;
    type Error = P::Error;

    fn handle_read(&mut self, msg: P::Rin) -> std::result::Result<(), P::Error> {
        (**self).handle_read(msg)
    }

    fn poll_read(&mut self) -> Option<P::Rout> {
        (**self).poll_read()
    }

    fn handle_write(&mut self, msg: P::Win) -> std::result::Result<(), P::Error> {
        (**self).handle_write(msg)
    }

    fn poll_write(&mut self) -> Option<P::Wout> {
        (**self).poll_write()
    }

    fn handle_timeout(&mut self, now: Instant) -> std::result::Result<(), P::Error> {
        (**self).handle_timeout(now)
    }

    fn poll_timeout(&mut self) -> Option<Instant> {
        (**self).poll_timeout()
    }

    fn close(&mut self) -> std::result::Result<(), P::Error> {
        (**self).close()
    }
}

impl<P> Protocol for Box<P>
where
    P: Protocol + ?Sized,
{
    type Rin = P::Rin;
    type Rout = P::Rout;
    type Win = P::Win;
    type Wout = P::Wout;
    type Error = P::Error;

    fn handle_read(&mut self, msg: P::Rin) -> std::result::Result<(), P::Error> {
        (**self).handle_read(msg)
    }

    fn poll_read(&mut self) -> Option<P::Rout> {
        (**self).poll_read()
    }

    fn handle_write(&mut self, msg: P::Win) -> std::result::Result<(), P::Error> {
        (**self).handle_write(msg)
    }

    fn poll_write(&mut self) -> Option<P::Wout> {
        (**self).poll_write()
    }

    fn handle_timeout(&mut self, now: Instant) -> std::result::Result<(), P::Error> {
        (**self).handle_timeout(now)
    }

    fn poll_timeout(&mut self) -> Option<Instant> {
        (**self).poll_timeout()
    }

    fn close(&mut self) -> std::result::Result<(), P::Error> {
        (**self).close()
    }
}

/// Adapts a [`Pipe`](crate::Pipe) or [`Router`](crate::Router) to [`Protocol`].
pub struct Driver<D> {
    inner: D,
    routs: VecDeque<Event>,
    wouts: VecDeque<Bytes>,
    closed: bool,
}

impl<D: Duplex> Driver<D> {
    /// Wraps `inner`.
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            routs: VecDeque::new(),
            wouts: VecDeque::new(),
            closed: false,
        }
    }

    /// Gets a reference to the wrapped pipe or router.
    pub fn get_ref(&self) -> &D {
        &self.inner
    }

    /// Gets a mutable reference to the wrapped pipe or router.
    pub fn get_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    /// Consumes the driver, returning the wrapped pipe or router. Queued output
    /// is dropped.
    pub fn into_inner(self) -> D {
        self.inner
    }

    /// Whether a `Control(Close)` has reached the transport.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::state("driver", FilterState::Closed))
        } else {
            Ok(())
        }
    }

    fn enqueue_transmits(&mut self, output: Vec<Event>) {
        for event in output {
            match event {
                Event::Data { payload, meta } => {
                    if let Some(key) = meta.branch {
                        warn!("data for branch {} reached the transport unframed", key);
                    }
                    self.wouts.push_back(payload);
                }
                event if event.is_close() && event.branch().is_none() => {
                    debug!("close reached the transport");
                    self.closed = true;
                }
                event if event.is_error() => self.routs.push_back(event),
                event => warn!("dropping {} at the transport boundary", event),
            }
        }
    }
}

impl<D: Duplex> Protocol for Driver<D> {
    type Rin = Bytes;
    type Rout = Event;
    type Win = Event;
    type Wout = Bytes;
    type Error = Error;

    fn handle_read(&mut self, msg: Bytes) -> Result<()> {
        self.ensure_open()?;
        let events = self.inner.feed_up(msg)?;
        self.routs.extend(events);
        let transmits = self.inner.drain_transmits();
        self.enqueue_transmits(transmits);
        Ok(())
    }

    fn poll_read(&mut self) -> Option<Event> {
        self.routs.pop_front()
    }

    fn handle_write(&mut self, msg: Event) -> Result<()> {
        self.ensure_open()?;
        let output = self.inner.feed_down(msg)?;
        self.enqueue_transmits(output);
        Ok(())
    }

    fn poll_write(&mut self) -> Option<Bytes> {
        self.wouts.pop_front()
    }

    fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let released = self.inner.handle_timeout(now)?;
        self.routs.extend(released.up);
        self.enqueue_transmits(released.down);
        Ok(())
    }

    fn poll_timeout(&mut self) -> Option<Instant> {
        if self.closed {
            return None;
        }
        let far = Instant::now() + FAR_FUTURE;
        let mut eto = far;
        self.inner.poll_timeout(&mut eto);
        (eto < far).then_some(eto)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let output = self.inner.close()?;
        self.enqueue_transmits(output);
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, Released};
    use crate::pipe::Pipe;

    /// Emits a keepalive once the clock passes its deadline.
    struct Keepalive {
        deadline: Instant,
    }

    impl Filter for Keepalive {
        fn name(&self) -> &str {
            "Keepalive"
        }

        fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
            Ok(vec![input])
        }

        fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
            Ok(vec![input])
        }

        fn poll_timeout(&self, eto: &mut Instant) {
            if self.deadline < *eto {
                *eto = self.deadline;
            }
        }

        fn handle_timeout(&mut self, now: Instant) -> Result<Released> {
            if now < self.deadline {
                return Ok(Released::default());
            }
            self.deadline = now + Duration::from_secs(30);
            Ok(Released::downward(vec![Event::data("keepalive")]))
        }
    }

    #[test]
    fn test_close_stops_driver() {
        let mut driver = Driver::new(Pipe::builder().build());
        driver.close().unwrap();
        assert!(driver.is_closed());
        assert_eq!(driver.poll_write(), None);
        assert!(driver.handle_read(Bytes::from_static(b"late")).is_err());
        assert!(driver.handle_write(Event::data("late")).is_err());
        assert_eq!(driver.poll_timeout(), None);
    }

    #[test]
    fn test_fault_surfaces_on_read_side() {
        let mut driver = Driver::new(Pipe::builder().build());
        driver.handle_write(Event::error("boom")).unwrap();
        assert_eq!(driver.poll_write(), None);
        assert_eq!(driver.poll_read(), Some(Event::error("boom")));
    }

    #[test]
    fn test_timeouts() {
        let now = Instant::now();
        let deadline = now + Duration::from_secs(5);
        let mut driver = Driver::new(Pipe::builder().add_back(Keepalive { deadline }).build());

        assert_eq!(driver.poll_timeout(), Some(deadline));
        driver.handle_timeout(now).unwrap();
        assert_eq!(driver.poll_write(), None);

        driver.handle_timeout(deadline).unwrap();
        assert_eq!(driver.poll_write().as_deref(), Some(&b"keepalive"[..]));
        assert_eq!(driver.poll_timeout(), Some(deadline + Duration::from_secs(30)));
    }
}
