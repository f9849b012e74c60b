//! Separator-delimited chunking of a byte stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::{debug, trace};

use filterpipe::{Error, Event, Filter, HexBytes, Result};

/// Default upper bound on an unterminated chunk.
pub const DEFAULT_MAX_CHUNK_LENGTH: usize = 64 * 1024;

/// Discretizes an upward byte stream into chunks ending with a separator, and
/// delimits downward payloads the same way.
///
/// When `begin_separator` is set, downward chunks are also preceded by the
/// separator, which lets a receiver resynchronize after joining mid-stream.
/// Empty chunks are omitted in both directions.
pub struct DelimitedChunker {
    separator: Bytes,
    begin_separator: bool,
    max_chunk_length: usize,
    buf: BytesMut,
}

impl Default for DelimitedChunker {
    fn default() -> Self {
        Self::new(Bytes::from_static(b"\0"))
    }
}

impl DelimitedChunker {
    /// Creates a chunker splitting on `separator`, with a leading separator.
    ///
    /// # Panics
    ///
    /// Panics if `separator` is empty.
    pub fn new(separator: impl Into<Bytes>) -> Self {
        let separator = separator.into();
        assert!(!separator.is_empty(), "chunk separator must not be empty");
        Self {
            separator,
            begin_separator: true,
            max_chunk_length: DEFAULT_MAX_CHUNK_LENGTH,
            buf: BytesMut::new(),
        }
    }

    /// Whether downward chunks are preceded by the separator.
    pub fn with_begin_separator(mut self, begin_separator: bool) -> Self {
        self.begin_separator = begin_separator;
        self
    }

    /// Sets the longest chunk accepted before a separator must appear.
    pub fn with_max_chunk_length(mut self, max_chunk_length: usize) -> Self {
        self.max_chunk_length = max_chunk_length;
        self
    }

    fn check_length(&self, len: usize) -> Result<()> {
        if len > self.max_chunk_length {
            return Err(Error::protocol_violation(format!(
                "chunk exceeds {} bytes",
                self.max_chunk_length
            )));
        }
        Ok(())
    }

    fn find_separator(&self) -> Option<usize> {
        self.buf
            .windows(self.separator.len())
            .position(|window| window == &self.separator[..])
    }
}

impl Filter for DelimitedChunker {
    fn name(&self) -> &str {
        "DelimitedChunker"
    }

    fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
        let payload = match input {
            Event::Data { payload, .. } => payload,
            control => {
                if control.is_close() || control.is_error() {
                    if !self.buf.is_empty() {
                        debug!("discarding {} bytes of an unterminated chunk", self.buf.len());
                    }
                    self.buf.clear();
                }
                return Ok(vec![control]);
            }
        };

        self.buf.extend_from_slice(&payload);
        let mut output = vec![];
        while let Some(pos) = self.find_separator() {
            self.check_length(pos)?;
            let chunk = self.buf.split_to(pos).freeze();
            self.buf.advance(self.separator.len());
            if chunk.is_empty() {
                continue;
            }
            trace!("chunk {}", HexBytes::new(&chunk));
            output.push(Event::data(chunk));
        }
        // The tail may end in a partial separator; once it holds a full
        // separator's worth beyond the limit, the chunk is too long however the
        // stream continues.
        if self.buf.len() >= self.max_chunk_length + self.separator.len() {
            self.check_length(self.buf.len())?;
        }
        Ok(output)
    }

    fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
        let (payload, meta) = match input {
            Event::Data { payload, meta } => (payload, meta),
            control => return Ok(vec![control]),
        };
        if payload.is_empty() {
            return Ok(vec![]);
        }
        if payload
            .windows(self.separator.len())
            .any(|window| window == &self.separator[..])
        {
            return Err(Error::protocol_violation("chunk contains the separator"));
        }

        let mut chunk = BytesMut::with_capacity(payload.len() + 2 * self.separator.len());
        if self.begin_separator {
            chunk.put_slice(&self.separator);
        }
        chunk.put_slice(&payload);
        chunk.put_slice(&self.separator);
        Ok(vec![Event::data(chunk.freeze()).with_meta(meta)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_across_reads() {
        let mut chunker = DelimitedChunker::default();
        assert_eq!(chunker.push_up(Event::data(&b"\0ab"[..])).unwrap(), vec![]);
        assert_eq!(
            chunker.push_up(Event::data(&b"c\0\0d\0"[..])).unwrap(),
            vec![Event::data(&b"abc"[..]), Event::data(&b"d"[..])]
        );
    }

    #[test]
    fn test_multi_byte_separator() {
        let mut chunker = DelimitedChunker::new(&b"\r\n"[..]).with_begin_separator(false);
        assert_eq!(
            chunker.push_up(Event::data(&b"one\r\ntwo\r"[..])).unwrap(),
            vec![Event::data(&b"one"[..])]
        );
        assert_eq!(
            chunker.push_up(Event::data(&b"\n"[..])).unwrap(),
            vec![Event::data(&b"two"[..])]
        );
        assert_eq!(
            chunker.push_down(Event::data(&b"three"[..])).unwrap(),
            vec![Event::data(&b"three\r\n"[..])]
        );
    }

    #[test]
    fn test_downward_framing() {
        let mut chunker = DelimitedChunker::default();
        assert_eq!(
            chunker.push_down(Event::data(&b"hi"[..])).unwrap(),
            vec![Event::data(&b"\0hi\0"[..])]
        );
        assert_eq!(chunker.push_down(Event::data(Bytes::new())).unwrap(), vec![]);
        assert!(chunker.push_down(Event::data(&b"a\0b"[..])).is_err());
    }

    #[test]
    fn test_chunk_limit_holds_however_the_chunk_arrives() {
        let mut whole = DelimitedChunker::default().with_max_chunk_length(4);
        assert!(matches!(
            whole.push_up(Event::data(&b"abcde\0"[..])),
            Err(Error::ProtocolViolation(_))
        ));

        let mut split = DelimitedChunker::default().with_max_chunk_length(4);
        assert!(matches!(
            split.push_up(Event::data(&b"abcde"[..])),
            Err(Error::ProtocolViolation(_))
        ));

        let mut exact = DelimitedChunker::default().with_max_chunk_length(4);
        assert_eq!(
            exact.push_up(Event::data(&b"abcd\0"[..])).unwrap(),
            vec![Event::data(&b"abcd"[..])]
        );
    }

    #[test]
    fn test_partial_separator_does_not_count_toward_the_limit() {
        let mut chunker = DelimitedChunker::new(&b"\r\n"[..]).with_max_chunk_length(4);
        assert_eq!(chunker.push_up(Event::data(&b"abcd\r"[..])).unwrap(), vec![]);
        assert_eq!(
            chunker.push_up(Event::data(&b"\n"[..])).unwrap(),
            vec![Event::data(&b"abcd"[..])]
        );
        assert!(chunker.push_up(Event::data(&b"abcdef"[..])).is_err());
    }

    #[test]
    fn test_unterminated_chunk_limit() {
        let mut chunker = DelimitedChunker::default().with_max_chunk_length(4);
        assert!(chunker.push_up(Event::data(&b"abcd"[..])).is_ok());
        assert!(matches!(
            chunker.push_up(Event::data(&b"e"[..])),
            Err(Error::ProtocolViolation(_))
        ));
    }
}
