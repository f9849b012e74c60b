//! Branch multiplexing framing.
//!
//! Carries many branches over one byte stream. Every frame names its branch:
//!
//! ```text
//! +------+-------------+-------------+-------------------+
//! | kind | branch key  |   length    |      payload      |
//! |  1B  |  4B (BE)    |   4B (BE)   |   length bytes    |
//! +------+-------------+-------------+-------------------+
//!
//! kind: 0 = data, 1 = branch open, 2 = branch close
//! ```
//!
//! Frames are emitted whole, one output unit per frame, so output from different
//! branches never interleaves inside a frame.

use bytes::{Buf, BufMut, BytesMut};
use log::{debug, trace};

use filterpipe::{BranchKey, Control, Error, Event, Filter, HexBytes, Result};

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 9;

/// Default upper bound on a single frame's payload.
pub const DEFAULT_MAX_PAYLOAD_LENGTH: usize = 1024 * 1024;

const KIND_DATA: u8 = 0;
const KIND_OPEN: u8 = 1;
const KIND_CLOSE: u8 = 2;

/// Turns mux frames into branch-tagged events and back.
///
/// Goes at the top of a router's shared pipe, so events leaving it upward carry
/// the branch key the router dispatches on.
pub struct MuxFramer {
    max_payload_length: usize,
    buf: BytesMut,
}

impl Default for MuxFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl MuxFramer {
    /// Creates a framer with the default payload limit.
    pub fn new() -> Self {
        Self {
            max_payload_length: DEFAULT_MAX_PAYLOAD_LENGTH,
            buf: BytesMut::new(),
        }
    }

    /// Sets the largest accepted payload, capped by what the 4-byte length field
    /// can express.
    pub fn with_max_payload_length(mut self, max_payload_length: usize) -> Self {
        self.max_payload_length = max_payload_length.min(u32::MAX as usize);
        self
    }

    fn frame(&self, kind: u8, key: BranchKey, payload: &[u8]) -> Result<Event> {
        if payload.len() > self.max_payload_length {
            return Err(Error::protocol_violation(format!(
                "payload of {} bytes for branch {} exceeds limit of {}",
                payload.len(),
                key,
                self.max_payload_length
            )));
        }
        let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
        frame.put_u8(kind);
        frame.put_u32(key);
        frame.put_u32(payload.len() as u32);
        frame.put_slice(payload);
        Ok(Event::data(frame.freeze()))
    }

    fn decode(&mut self) -> Result<Option<Event>> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = &self.buf[..HEADER_LEN];
        let kind = header.get_u8();
        let key = header.get_u32();
        let len = header.get_u32() as usize;

        if kind > KIND_CLOSE {
            return Err(Error::protocol_violation(format!("unknown frame kind {kind}")));
        }
        if len > self.max_payload_length {
            return Err(Error::protocol_violation(format!(
                "frame for branch {} announces {} bytes, limit is {}",
                key, len, self.max_payload_length
            )));
        }
        if kind != KIND_DATA && len != 0 {
            return Err(Error::protocol_violation(format!(
                "control frame for branch {key} carries a payload"
            )));
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(len).freeze();
        let event = match kind {
            KIND_DATA => Event::data(payload),
            KIND_OPEN => Event::control(Control::BranchOpen(key)),
            _ => Event::control(Control::BranchClose(key)),
        };
        Ok(Some(event.with_branch(key)))
    }
}

impl Filter for MuxFramer {
    fn name(&self) -> &str {
        "MuxFramer"
    }

    fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
        let payload = match input {
            Event::Data { payload, .. } => payload,
            control => {
                if control.is_close() || control.is_error() {
                    if !self.buf.is_empty() {
                        debug!("discarding {} bytes of an incomplete frame", self.buf.len());
                    }
                    self.buf.clear();
                }
                return Ok(vec![control]);
            }
        };

        self.buf.extend_from_slice(&payload);
        let mut output = vec![];
        while let Some(event) = self.decode()? {
            trace!("decoded {}", event);
            output.push(event);
        }
        Ok(output)
    }

    fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
        let frame = match (&input, input.branch()) {
            (Event::Data { payload, .. }, Some(key)) => {
                trace!("framing {} for branch {}", HexBytes::new(payload), key);
                Some(self.frame(KIND_DATA, key, payload)?)
            }
            (Event::Data { .. }, None) => {
                return Err(Error::protocol_violation(
                    "data without a branch key cannot be multiplexed",
                ));
            }
            (Event::Control { kind: Control::BranchOpen(key), .. }, _) => {
                Some(self.frame(KIND_OPEN, *key, &[])?)
            }
            (Event::Control { kind: Control::BranchClose(key), .. }, _) => {
                Some(self.frame(KIND_CLOSE, *key, &[])?)
            }
            (Event::Control { kind: Control::Close, .. }, Some(key)) => {
                Some(self.frame(KIND_CLOSE, key, &[])?)
            }
            _ => None,
        };
        Ok(vec![frame.unwrap_or(input)])
    }
}
