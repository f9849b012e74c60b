//! # Router - Branching One Connection Into Many Logical Sub-Streams
//!
//! A [`Router`] sits on top of a shared [`Pipe`] whose filters speak some
//! multiplexing framing. Events coming out of the shared pipe are tagged with a
//! branch key (see [`Meta`](crate::Meta)); the router hands each to the branch's
//! own pipe, created lazily from a factory on `BranchOpen`:
//!
//! ```text
//!        application (events tagged with their branch key)
//!          ↑↓              ↑↓              ↑↓
//!     ┌──────────┐    ┌──────────┐    ┌──────────┐
//!     │ branch 1 │    │ branch 2 │    │ branch 3 │   one Pipe per branch
//!     └──────────┘    └──────────┘    └──────────┘
//!          ↑↓              ↑↓              ↑↓
//!     ┌────────────────────────────────────────────┐
//!     │                   Router                   │   route_up / route_down
//!     └────────────────────────────────────────────┘
//!                          ↑↓
//!     ┌────────────────────────────────────────────┐
//!     │     shared Pipe (multiplexing framer)      │
//!     └────────────────────────────────────────────┘
//!                          ↑↓
//!                      transport
//! ```
//!
//! Branch pipes see untagged events: the router strips the key on the way in and
//! tags everything a branch produces on the way out. A branch-level `Close`
//! leaving a branch becomes `BranchClose(key)` before it enters the shared pipe,
//! so closing one branch never closes the shared filters.
//!
//! ## Fault Isolation
//!
//! A fault inside one branch faults only that branch's pipe. Its `Control(Error)`
//! is returned to the host tagged with the branch key; sibling branches keep
//! working. `DuplicateBranch` and `UnknownBranch` errors are likewise reported
//! as tagged `Control(Error)` events by [`Router::feed_up`] without touching any
//! other branch.
//!
//! ## Ordering Across Branches
//!
//! The router keeps each branch's downward output in order and forwards each
//! event into the shared pipe as a whole. It imposes no interleaving policy
//! between branches beyond that; whether a frame may be split or interleaved at
//! the transport boundary is up to the multiplexing filter below.

use bytes::Bytes;
use log::{debug, trace, warn};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::event::{BranchKey, Control, Event, Meta};
use crate::filter::{FilterState, Released};
use crate::pipe::{Duplex, Pipe};

/// Creates the pipe for a newly opened branch.
pub type PipeFactoryFn = Box<dyn Fn(BranchKey) -> Pipe>;

/// Where an upward event coming out of the shared pipe goes.
enum Route {
    Open(BranchKey),
    Close(BranchKey),
    Branch(BranchKey),
    Connection,
}

impl Route {
    fn of(event: &Event) -> Self {
        match (event.kind(), event.branch()) {
            (Some(Control::BranchOpen(key)), _) => Route::Open(*key),
            (Some(Control::BranchClose(key)), _) => Route::Close(*key),
            (_, Some(key)) => Route::Branch(key),
            (_, None) => Route::Connection,
        }
    }

    fn key(&self) -> Option<BranchKey> {
        match self {
            Route::Open(key) | Route::Close(key) | Route::Branch(key) => Some(*key),
            Route::Connection => None,
        }
    }
}

/// Demultiplexes upward events into per-branch pipes and multiplexes their
/// downward output back onto one shared pipe.
pub struct Router {
    shared: Pipe,
    branches: BTreeMap<BranchKey, Pipe>,
    factory: PipeFactoryFn,

    /// Transport output produced while routing upward (e.g. a branch draining
    /// its final output after the peer closed it)
    transmits: Vec<Event>,
}

impl Router {
    /// Creates a router over `shared`, building branch pipes with `factory`.
    pub fn new(shared: Pipe, factory: impl Fn(BranchKey) -> Pipe + 'static) -> Self {
        Self {
            shared,
            branches: BTreeMap::new(),
            factory: Box::new(factory),
            transmits: vec![],
        }
    }

    /// The shared transport-side pipe.
    pub fn shared(&self) -> &Pipe {
        &self.shared
    }

    /// Keys of the currently open branches, ascending.
    pub fn branch_keys(&self) -> Vec<BranchKey> {
        self.branches.keys().copied().collect()
    }

    /// Whether a branch with `key` is open.
    pub fn contains(&self, key: BranchKey) -> bool {
        self.branches.contains_key(&key)
    }

    /// Aggregate state of the branch pipe for `key`.
    pub fn branch_state(&self, key: BranchKey) -> Option<FilterState> {
        self.branches.get(&key).map(Pipe::state)
    }

    /// Takes the transport output produced as a side effect of upward routing.
    pub fn drain_transmits(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.transmits)
    }

    /// Pushes transport-received bytes through the shared pipe and routes every
    /// resulting event. Routing errors are reported in-band as `Control(Error)`
    /// events tagged with the offending branch key.
    pub fn feed_up(&mut self, raw: impl Into<Bytes>) -> Result<Vec<Event>> {
        let events = self.shared.feed_up(raw)?;
        Ok(self.route_all(events))
    }

    /// Routes events coming out of the shared pipe, reporting routing errors
    /// in-band.
    fn route_all(&mut self, events: Vec<Event>) -> Vec<Event> {
        let mut delivered = Vec::with_capacity(events.len());
        for event in events {
            let key = Route::of(&event).key();
            match self.route_up(event) {
                Ok(output) => delivered.extend(output),
                Err(err) => {
                    warn!("routing failed: {}", err);
                    let report = Event::error(err.to_string());
                    delivered.push(match key {
                        Some(key) => report.with_branch(key),
                        None => report,
                    });
                }
            }
        }
        delivered
    }

    /// Routes one upward event coming out of the shared pipe, returning the
    /// application events it produces.
    pub fn route_up(&mut self, event: Event) -> Result<Vec<Event>> {
        trace!("route_up {}", event);
        match Route::of(&event) {
            Route::Open(key) => self.accept_branch(key, event),
            Route::Close(key) => self.finish_branch(key),
            Route::Branch(key) => {
                let pipe = self.branches.get_mut(&key).ok_or(Error::UnknownBranch(key))?;
                let output = pipe.feed_up_event(untagged(event))?;
                Ok(tag(key, output))
            }
            Route::Connection => self.route_connection_up(event),
        }
    }

    /// Feeds an application event into branch `key` and returns the transport
    /// output it produces after passing through the shared pipe.
    pub fn route_down(&mut self, key: BranchKey, event: Event) -> Result<Vec<Event>> {
        let pipe = self.branches.get_mut(&key).ok_or(Error::UnknownBranch(key))?;
        let output = pipe.feed_down(untagged(event))?;
        let closed = pipe.state() == FilterState::Closed;
        let transmits = self.forward_down(key, output)?;
        if closed {
            debug!("branch {} closed locally", key);
            self.branches.remove(&key);
        }
        Ok(transmits)
    }

    /// Opens branch `key` locally and announces it down the shared pipe.
    pub fn open_branch(&mut self, key: BranchKey) -> Result<Vec<Event>> {
        if self.branches.contains_key(&key) {
            return Err(Error::DuplicateBranch(key));
        }
        self.branches.insert(key, (self.factory)(key));
        debug!("branch {} opened locally", key);
        self.shared
            .feed_down(Event::control(Control::BranchOpen(key)).with_branch(key))
    }

    /// Closes branch `key` locally, draining its final output and announcing the
    /// close down the shared pipe.
    pub fn close_branch(&mut self, key: BranchKey) -> Result<Vec<Event>> {
        let mut pipe = self.branches.remove(&key).ok_or(Error::UnknownBranch(key))?;
        debug!("closing branch {}", key);
        if pipe.state().is_accepting() {
            let output = pipe.close()?;
            self.forward_down(key, output)
        } else {
            self.shared
                .feed_down(Event::control(Control::BranchClose(key)).with_branch(key))
        }
    }

    /// Closes every still-open branch, then the shared pipe.
    ///
    /// A branch that fails to close is still forgotten; its error is reported
    /// in the output as a `Control(Error)` tagged with its key, and the
    /// remaining branches and the shared pipe are closed regardless.
    pub fn close(&mut self) -> Result<Vec<Event>> {
        let mut transmits = self.drain_transmits();
        let keys = self.branch_keys();
        for key in keys {
            if !self.shared.state().is_accepting() {
                break;
            }
            match self.close_branch(key) {
                Ok(output) => transmits.extend(output),
                Err(err) => {
                    warn!("closing branch {} failed: {}", key, err);
                    transmits.push(Event::error(err.to_string()).with_branch(key));
                }
            }
        }
        self.branches.clear();
        if self.shared.state().is_accepting() {
            transmits.extend(self.shared.close()?);
        }
        Ok(transmits)
    }

    /// Flushes every branch, then the shared pipe.
    pub fn flush(&mut self) -> Result<Vec<Event>> {
        let mut transmits = self.drain_transmits();
        for key in self.branch_keys() {
            if let Some(pipe) = self.branches.get_mut(&key) {
                if !pipe.state().is_accepting() {
                    continue;
                }
                let output = pipe.flush()?;
                transmits.extend(self.forward_down(key, output)?);
            }
        }
        transmits.extend(self.shared.flush()?);
        Ok(transmits)
    }

    fn accept_branch(&mut self, key: BranchKey, open: Event) -> Result<Vec<Event>> {
        if self.branches.contains_key(&key) {
            return Err(Error::DuplicateBranch(key));
        }
        let mut pipe = (self.factory)(key);
        debug!("branch {} opened by peer", key);
        let output = pipe.feed_up_event(untagged(open))?;
        self.branches.insert(key, pipe);
        Ok(tag(key, output))
    }

    /// Delivers the peer's close to branch `key`, lets it drain whatever downward
    /// output it still holds, and forgets it.
    fn finish_branch(&mut self, key: BranchKey) -> Result<Vec<Event>> {
        let mut pipe = self.branches.remove(&key).ok_or(Error::UnknownBranch(key))?;
        debug!("branch {} closed by peer", key);

        let mut delivered = vec![];
        if pipe.state().is_accepting() {
            delivered = tag(key, pipe.feed_up_event(Event::close())?);
        }
        if pipe.state().is_accepting() {
            let output = pipe.flush()?;
            let transmits = self.forward_down(key, output)?;
            self.transmits.extend(transmits);
        }
        if delivered.is_empty() {
            delivered.push(Event::control(Control::BranchClose(key)).with_branch(key));
        }
        Ok(delivered)
    }

    fn route_connection_up(&mut self, event: Event) -> Result<Vec<Event>> {
        match event.kind() {
            Some(Control::Close) => {
                debug!("connection closed, closing {} branches", self.branches.len());
                let mut delivered = vec![];
                for (key, mut pipe) in std::mem::take(&mut self.branches) {
                    if pipe.state().is_accepting() {
                        delivered.extend(tag(key, pipe.feed_up_event(Event::close())?));
                    }
                }
                delivered.push(event);
                Ok(delivered)
            }
            Some(Control::Error(_)) => {
                for pipe in self.branches.values_mut() {
                    if pipe.state().is_accepting() {
                        let _ = pipe.feed_up_event(event.clone());
                    }
                }
                Ok(vec![event])
            }
            Some(_) => Ok(vec![event]),
            None => Err(Error::protocol_violation(
                "data without a branch key reached the router",
            )),
        }
    }

    /// Tags a branch's downward output and feeds it through the shared pipe.
    ///
    /// A branch fault is returned to the host directly instead of entering the
    /// shared pipe, where it would fault every branch.
    fn forward_down(&mut self, key: BranchKey, output: Vec<Event>) -> Result<Vec<Event>> {
        let mut transmits = vec![];
        let mut flush = false;
        for event in output {
            if event.is_error() {
                transmits.push(event.with_branch(key));
                continue;
            }
            if event.is_flush() {
                flush = true;
                continue;
            }
            let event = if event.is_close() {
                Event::control(Control::BranchClose(key))
            } else {
                event
            };
            transmits.extend(self.shared.feed_down(event.with_branch(key))?);
        }
        if flush {
            transmits.extend(self.shared.flush()?);
        }
        Ok(transmits)
    }
}

fn untagged(event: Event) -> Event {
    event.with_meta(Meta::default())
}

fn tag(key: BranchKey, events: Vec<Event>) -> Vec<Event> {
    events.into_iter().map(|event| event.with_branch(key)).collect()
}

impl Duplex for Router {
    fn feed_up(&mut self, raw: Bytes) -> Result<Vec<Event>> {
        Router::feed_up(self, raw)
    }

    /// Tagged events go to their branch; untagged `Close` and `Flush` apply to
    /// the whole router; other untagged events go straight to the shared pipe.
    fn feed_down(&mut self, event: Event) -> Result<Vec<Event>> {
        match event.branch() {
            Some(key) => self.route_down(key, event),
            None if event.is_close() => Router::close(self),
            None if event.is_flush() => Router::flush(self),
            None => self.shared.feed_down(event),
        }
    }

    fn flush(&mut self) -> Result<Vec<Event>> {
        Router::flush(self)
    }

    fn close(&mut self) -> Result<Vec<Event>> {
        Router::close(self)
    }

    /// Branch output released downward enters the shared pipe; events the
    /// shared pipe releases upward are routed like any other.
    fn handle_timeout(&mut self, now: Instant) -> Result<Released> {
        let mut released = Released::default();
        for key in self.branch_keys() {
            if let Some(pipe) = self.branches.get_mut(&key) {
                if !pipe.state().is_accepting() {
                    continue;
                }
                let Released { up, down } = pipe.handle_timeout(now)?;
                released.up.extend(tag(key, up));
                released.down.extend(self.forward_down(key, down)?);
            }
        }
        if self.shared.state().is_accepting() {
            let Released { up, down } = self.shared.handle_timeout(now)?;
            released.down.extend(down);
            released.up.extend(self.route_all(up));
        }
        Ok(released)
    }

    fn poll_timeout(&self, eto: &mut Instant) {
        self.shared.poll_timeout(eto);
        for pipe in self.branches.values() {
            pipe.poll_timeout(eto);
        }
    }

    fn drain_transmits(&mut self) -> Vec<Event> {
        Router::drain_transmits(self)
    }
}
