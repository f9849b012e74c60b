//! Length-prefixed framing.
//!
//! Each frame on the wire is a big-endian unsigned length followed by that many
//! payload bytes:
//!
//! ```text
//! +--------+----------------+
//! | length |    payload     |
//! | 1/2/4B |  length bytes  |
//! +--------+----------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::{debug, trace};

use filterpipe::{Error, Event, Filter, HexBytes, Result};

/// Default upper bound on a single frame's payload.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Width of the length prefix.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PrefixWidth {
    /// One byte, frames up to 255 bytes
    U8,
    /// Two bytes, frames up to 65535 bytes
    U16,
    /// Four bytes
    #[default]
    U32,
}

impl PrefixWidth {
    /// Number of prefix bytes.
    pub fn size(self) -> usize {
        match self {
            PrefixWidth::U8 => 1,
            PrefixWidth::U16 => 2,
            PrefixWidth::U32 => 4,
        }
    }

    /// Largest length the prefix can express.
    pub fn max_len(self) -> usize {
        match self {
            PrefixWidth::U8 => u8::MAX as usize,
            PrefixWidth::U16 => u16::MAX as usize,
            PrefixWidth::U32 => u32::MAX as usize,
        }
    }

    fn get(self, buf: &mut impl Buf) -> usize {
        match self {
            PrefixWidth::U8 => buf.get_u8() as usize,
            PrefixWidth::U16 => buf.get_u16() as usize,
            PrefixWidth::U32 => buf.get_u32() as usize,
        }
    }

    fn put(self, buf: &mut BytesMut, len: usize) -> Result<()> {
        let too_long = |_| {
            Error::protocol_violation(format!(
                "frame length {} does not fit a {}-byte prefix",
                len,
                self.size()
            ))
        };
        match self {
            PrefixWidth::U8 => buf.put_u8(u8::try_from(len).map_err(too_long)?),
            PrefixWidth::U16 => buf.put_u16(u16::try_from(len).map_err(too_long)?),
            PrefixWidth::U32 => buf.put_u32(u32::try_from(len).map_err(too_long)?),
        }
        Ok(())
    }
}

/// Splits an upward byte stream into length-prefixed frames and prefixes
/// downward payloads.
///
/// With coalescing enabled, downward frames are accumulated and only released
/// by a `Control(Flush)` or `Control(Close)`, so several small writes leave as
/// one output unit.
pub struct LengthPrefixFramer {
    width: PrefixWidth,
    max_frame_length: usize,
    coalesce: bool,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl LengthPrefixFramer {
    /// Creates a framer with the given prefix width.
    pub fn new(width: PrefixWidth) -> Self {
        Self {
            width,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH.min(width.max_len()),
            coalesce: false,
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
        }
    }

    /// Sets the largest accepted payload, capped by what the prefix can express.
    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length.min(self.width.max_len());
        self
    }

    /// Holds downward frames until flushed.
    pub fn with_coalescing(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    fn check_length(&self, len: usize) -> Result<()> {
        if len > self.max_frame_length {
            return Err(Error::protocol_violation(format!(
                "frame length {} exceeds limit of {}",
                len, self.max_frame_length
            )));
        }
        Ok(())
    }

    fn decode(&mut self, output: &mut Vec<Event>) -> Result<()> {
        let size = self.width.size();
        while self.read_buf.len() >= size {
            let len = self.width.get(&mut &self.read_buf[..size]);
            self.check_length(len)?;
            if self.read_buf.len() < size + len {
                trace!("need {} more bytes", size + len - self.read_buf.len());
                break;
            }
            self.read_buf.advance(size);
            let frame = self.read_buf.split_to(len).freeze();
            trace!("decoded frame {}", HexBytes::new(&frame));
            output.push(Event::data(frame));
        }
        Ok(())
    }

    fn encode(&self, payload: &[u8]) -> Result<BytesMut> {
        let mut frame = BytesMut::with_capacity(self.width.size() + payload.len());
        self.width.put(&mut frame, payload.len())?;
        frame.put_slice(payload);
        Ok(frame)
    }

    fn take_buffered(&mut self) -> Option<Event> {
        if self.write_buf.is_empty() {
            None
        } else {
            Some(Event::data(self.write_buf.split().freeze()))
        }
    }
}

impl Filter for LengthPrefixFramer {
    fn name(&self) -> &str {
        "LengthPrefixFramer"
    }

    fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
        match input {
            Event::Data { payload, .. } => {
                self.read_buf.extend_from_slice(&payload);
                let mut output = vec![];
                self.decode(&mut output)?;
                Ok(output)
            }
            control => {
                if (control.is_close() || control.is_error()) && !self.read_buf.is_empty() {
                    debug!(
                        "discarding {} bytes of an incomplete frame",
                        self.read_buf.len()
                    );
                    self.read_buf.clear();
                }
                if control.is_error() {
                    self.write_buf.clear();
                }
                Ok(vec![control])
            }
        }
    }

    fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
        match input {
            Event::Data { payload, meta } => {
                self.check_length(payload.len())?;
                let frame = self.encode(&payload)?;
                if self.coalesce {
                    self.write_buf.extend_from_slice(&frame);
                    Ok(vec![])
                } else {
                    Ok(vec![Event::data(frame.freeze()).with_meta(meta)])
                }
            }
            control if control.is_close() => {
                let mut output: Vec<Event> = self.take_buffered().into_iter().collect();
                output.push(control);
                Ok(output)
            }
            control => {
                if control.is_error() {
                    self.write_buf.clear();
                }
                Ok(vec![control])
            }
        }
    }

    fn flush_down(&mut self) -> Result<Vec<Event>> {
        Ok(self.take_buffered().into_iter().collect())
    }

    fn is_drained(&self) -> bool {
        self.write_buf.is_empty()
    }
}

/// Prefixes `payload` the way a [`LengthPrefixFramer`] with `width` would.
///
/// Fails with a protocol violation if the payload is longer than the prefix can
/// express.
pub fn encode_frame(width: PrefixWidth, payload: &[u8]) -> Result<Bytes> {
    LengthPrefixFramer::new(width)
        .with_max_frame_length(usize::MAX)
        .encode(payload)
        .map(BytesMut::freeze)
}
