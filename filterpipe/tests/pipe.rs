use bytes::{Bytes, BytesMut};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use filterpipe::{Control, Error, Event, Filter, FilterState, Pipe, Released, Result};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Forwards everything unchanged.
struct Passthrough;

impl Filter for Passthrough {
    fn name(&self) -> &str {
        "Passthrough"
    }

    fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
        Ok(vec![input])
    }

    fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
        Ok(vec![input])
    }
}

/// Holds upward bytes until a `!` arrives, then releases them as one event.
#[derive(Default)]
struct UntilBang {
    buf: BytesMut,
}

impl Filter for UntilBang {
    fn name(&self) -> &str {
        "UntilBang"
    }

    fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
        match input {
            Event::Data { payload, .. } => {
                self.buf.extend_from_slice(&payload);
                if self.buf.ends_with(b"!") {
                    Ok(vec![Event::data(self.buf.split().freeze())])
                } else {
                    Ok(vec![])
                }
            }
            control => Ok(vec![control]),
        }
    }

    fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
        Ok(vec![input])
    }
}

/// Splits upward data on `|`.
struct Split;

impl Filter for Split {
    fn name(&self) -> &str {
        "Split"
    }

    fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
        match input.payload() {
            Some(payload) => Ok(payload
                .split(|b| *b == b'|')
                .map(|part| Event::data(Bytes::copy_from_slice(part)))
                .collect()),
            None => Ok(vec![input]),
        }
    }

    fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
        Ok(vec![input])
    }
}

/// Faults on the payload `bad`.
struct Strict;

impl Filter for Strict {
    fn name(&self) -> &str {
        "Strict"
    }

    fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
        if input.payload().is_some_and(|p| &p[..] == b"bad") {
            return Err(Error::protocol_violation("bad payload"));
        }
        Ok(vec![input])
    }

    fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
        Ok(vec![input])
    }
}

/// Records every event it is shown.
struct Recorder(Rc<RefCell<Vec<Event>>>);

impl Filter for Recorder {
    fn name(&self) -> &str {
        "Recorder"
    }

    fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
        self.0.borrow_mut().push(input.clone());
        Ok(vec![input])
    }

    fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
        self.0.borrow_mut().push(input.clone());
        Ok(vec![input])
    }
}

/// Holds downward data until flushed, appending its tag to what it releases.
struct Coalesce {
    tag: &'static [u8],
    buf: BytesMut,
}

impl Coalesce {
    fn new(tag: &'static [u8]) -> Self {
        Self {
            tag,
            buf: BytesMut::new(),
        }
    }
}

impl Filter for Coalesce {
    fn name(&self) -> &str {
        "Coalesce"
    }

    fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
        Ok(vec![input])
    }

    fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
        match input {
            Event::Data { payload, .. } => {
                self.buf.extend_from_slice(&payload);
                Ok(vec![])
            }
            control => Ok(vec![control]),
        }
    }

    fn flush_down(&mut self) -> Result<Vec<Event>> {
        if self.buf.is_empty() {
            return Ok(vec![]);
        }
        self.buf.extend_from_slice(self.tag);
        Ok(vec![Event::data(self.buf.split().freeze())])
    }

    fn is_drained(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Emits `ping` downward every `interval`.
struct Heartbeat {
    interval: Duration,
    next: Instant,
}

impl Filter for Heartbeat {
    fn name(&self) -> &str {
        "Heartbeat"
    }

    fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
        Ok(vec![input])
    }

    fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
        Ok(vec![input])
    }

    fn poll_timeout(&self, eto: &mut Instant) {
        if self.next < *eto {
            *eto = self.next;
        }
    }

    fn handle_timeout(&mut self, now: Instant) -> Result<Released> {
        if now < self.next {
            return Ok(Released::default());
        }
        self.next = now + self.interval;
        Ok(Released::downward(vec![Event::data(&b"ping"[..])]))
    }
}

/// Holds upward data until the next timeout.
#[derive(Default)]
struct Defer {
    held: Vec<Event>,
}

impl Filter for Defer {
    fn name(&self) -> &str {
        "Defer"
    }

    fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
        if input.is_data() {
            self.held.push(input);
            return Ok(vec![]);
        }
        Ok(vec![input])
    }

    fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
        Ok(vec![input])
    }

    fn handle_timeout(&mut self, _now: Instant) -> Result<Released> {
        Ok(Released::upward(std::mem::take(&mut self.held)))
    }
}

/// Answers the payload `burst` with data, a close and more data.
struct Burst;

impl Filter for Burst {
    fn name(&self) -> &str {
        "Burst"
    }

    fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
        if input.payload().is_some_and(|p| &p[..] == b"burst") {
            return Ok(vec![
                Event::data(&b"a"[..]),
                Event::control(Control::Close),
                Event::data(&b"b"[..]),
            ]);
        }
        Ok(vec![input])
    }

    fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
        Ok(vec![input])
    }
}

#[test]
fn test_buffering_filter_stops_the_drive() {
    init_logger();
    let mut pipe = Pipe::builder()
        .add_back(UntilBang::default())
        .add_back(Passthrough)
        .add_back(Passthrough)
        .add_back(Passthrough)
        .build();

    for _ in 0..10 {
        assert_eq!(pipe.feed_up(&b"ab"[..]).unwrap(), vec![]);
    }
    let stats = pipe.stats();
    assert_eq!(stats.drives, 10);
    assert_eq!(stats.filter_calls, 10);

    let events = pipe.feed_up(&b"!"[..]).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload().map(|p| p.len()), Some(21));
    assert_eq!(pipe.stats().filter_calls, 10 + pipe.len() as u64);
}

#[test]
fn test_fault_drops_batch_and_reaches_filters_above() {
    init_logger();
    let seen = Rc::new(RefCell::new(vec![]));
    let mut pipe = Pipe::builder()
        .add_back(Split)
        .add_back(Strict)
        .add_back(Recorder(seen.clone()))
        .build();

    let events = pipe.feed_up(&b"a|bad|c"[..]).unwrap();
    assert_eq!(events, vec![Event::error("bad payload")]);
    assert_eq!(*seen.borrow(), vec![Event::error("bad payload")]);

    assert_eq!(pipe.state(), FilterState::Faulted);
    assert_eq!(pipe.filter_state(0), Some(FilterState::Open));
    assert_eq!(pipe.filter_state(1), Some(FilterState::Faulted));
    assert_eq!(pipe.filter_state(2), Some(FilterState::Faulted));

    assert!(matches!(
        pipe.feed_up(&b"c"[..]),
        Err(Error::State {
            state: FilterState::Faulted,
            ..
        })
    ));
}

#[test]
fn test_closing_until_drained() {
    init_logger();
    let mut pipe = Pipe::builder().add_back(Coalesce::new(b"")).build();

    assert_eq!(pipe.feed_down(Event::data(&b"bye"[..])).unwrap(), vec![]);
    assert_eq!(
        pipe.feed_up_event(Event::close()).unwrap(),
        vec![Event::close()]
    );
    assert_eq!(pipe.state(), FilterState::Closing);

    assert_eq!(pipe.flush().unwrap(), vec![Event::data(&b"bye"[..])]);
    assert_eq!(pipe.state(), FilterState::Closed);
    assert!(pipe.flush().is_err());
}

#[test]
fn test_flush_runs_top_to_bottom() {
    init_logger();
    let mut pipe = Pipe::builder()
        .add_back(Coalesce::new(b"<low"))
        .add_back(Coalesce::new(b"<high"))
        .build();

    assert_eq!(pipe.feed_down(Event::data(&b"x"[..])).unwrap(), vec![]);
    assert_eq!(
        pipe.flush().unwrap(),
        vec![Event::data(&b"x<high<low"[..])]
    );
}

#[test]
fn test_close_drains_before_closing() {
    init_logger();
    let mut pipe = Pipe::builder().add_back(Coalesce::new(b"")).build();
    pipe.feed_down(Event::data(&b"last"[..])).unwrap();
    assert_eq!(
        pipe.close().unwrap(),
        vec![Event::data(&b"last"[..]), Event::close()]
    );
    assert_eq!(pipe.state(), FilterState::Closed);
}

#[test]
fn test_timeout_output_passes_filters_below() {
    init_logger();
    let now = Instant::now();
    let mut pipe = Pipe::builder()
        .add_back(Coalesce::new(b"+"))
        .add_back(Heartbeat {
            interval: Duration::from_secs(10),
            next: now + Duration::from_secs(1),
        })
        .build();

    let mut eto = now + Duration::from_secs(60);
    pipe.poll_timeout(&mut eto);
    assert_eq!(eto, now + Duration::from_secs(1));

    assert_eq!(pipe.handle_timeout(now).unwrap(), Released::default());
    assert_eq!(pipe.handle_timeout(eto).unwrap(), Released::default());
    assert_eq!(pipe.flush().unwrap(), vec![Event::data(&b"ping+"[..])]);

    let mut eto = now + Duration::from_secs(60);
    pipe.poll_timeout(&mut eto);
    assert_eq!(eto, now + Duration::from_secs(11));
}

#[test]
fn test_timeout_output_passes_filters_above() {
    init_logger();
    let mut pipe = Pipe::builder()
        .add_back(Defer::default())
        .add_back(Split)
        .build();

    assert_eq!(pipe.feed_up(&b"a|b"[..]).unwrap(), vec![]);
    let released = pipe.handle_timeout(Instant::now()).unwrap();
    assert_eq!(
        released.up,
        vec![Event::data(&b"a"[..]), Event::data(&b"b"[..])]
    );
    assert!(released.down.is_empty());
}

#[test]
fn test_peer_close_then_flush_drains_lower_filter() {
    init_logger();
    let mut pipe = Pipe::builder()
        .add_back(Coalesce::new(b""))
        .add_back(Passthrough)
        .build();

    assert_eq!(pipe.feed_down(Event::data(&b"tail"[..])).unwrap(), vec![]);
    assert_eq!(
        pipe.feed_up_event(Event::close()).unwrap(),
        vec![Event::close()]
    );
    assert_eq!(pipe.filter_state(0), Some(FilterState::Closing));
    assert_eq!(pipe.filter_state(1), Some(FilterState::Closed));
    assert_eq!(pipe.state(), FilterState::Closing);

    assert_eq!(pipe.flush().unwrap(), vec![Event::data(&b"tail"[..])]);
    assert_eq!(pipe.state(), FilterState::Closed);
}

#[test]
fn test_close_after_peer_close_finishes_every_filter() {
    init_logger();
    let mut pipe = Pipe::builder()
        .add_back(Coalesce::new(b"!"))
        .add_back(Passthrough)
        .add_back(Passthrough)
        .build();

    pipe.feed_down(Event::data(&b"tail"[..])).unwrap();
    pipe.feed_up_event(Event::close()).unwrap();

    assert_eq!(pipe.close().unwrap(), vec![Event::data(&b"tail!"[..])]);
    assert_eq!(pipe.state(), FilterState::Closed);
    assert!(pipe.feed_down(Event::data(&b"late"[..])).is_err());
}

#[test]
fn test_events_staged_behind_close_are_dropped() {
    init_logger();
    let mut pipe = Pipe::builder().add_back(Burst).add_back(Passthrough).build();

    assert_eq!(
        pipe.feed_up(&b"burst"[..]).unwrap(),
        vec![Event::data(&b"a"[..]), Event::close()]
    );
    assert_eq!(pipe.stats().rejected, 1);
    assert_eq!(pipe.filter_state(0), Some(FilterState::Open));
    assert_eq!(pipe.filter_state(1), Some(FilterState::Closed));
}
