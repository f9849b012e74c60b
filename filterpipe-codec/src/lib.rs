//! # filterpipe-codec - Reusable Filters for filterpipe
//!
//! `filterpipe-codec` provides ready-made [`Filter`](filterpipe::Filter)s for
//! common stream protocols.
//!
//! ## Features
//!
//! - **Length-Prefixed Framing**: 1, 2 or 4 byte big-endian length prefixes,
//!   with optional coalescing of downward frames until flushed
//! - **Delimited Chunking**: separator-terminated chunks, optionally also
//!   separator-started
//! - **UTF-8 Validation**: faults the pipe on invalid text
//! - **Branch Multiplexing**: frames that carry many branches over one stream,
//!   for use under a [`Router`](filterpipe::Router)
//! - **Delay**: holds data for a fixed time in each direction, driven by the
//!   pipe's timeout hooks
//!
//! ## Building a Pipe with Codecs
//!
//! ```rust
//! use filterpipe::{Event, Pipe};
//! use filterpipe_codec::{LengthPrefixFramer, PrefixWidth, Utf8Validator};
//!
//! let mut pipe = Pipe::builder()
//!     .add_back(LengthPrefixFramer::new(PrefixWidth::U8))
//!     .add_back(Utf8Validator::new())
//!     .build();
//!
//! assert_eq!(pipe.feed_up(&b"\x05he"[..]).unwrap(), vec![]);
//! assert_eq!(
//!     pipe.feed_up(&b"llo"[..]).unwrap(),
//!     vec![Event::data(&b"hello"[..])]
//! );
//! ```
//!
//! ## Multiplexing Branches
//!
//! ```rust
//! use filterpipe::{Control, Event, Pipe, Router};
//! use filterpipe_codec::{LengthPrefixFramer, MuxFramer, PrefixWidth};
//!
//! let shared = Pipe::builder().add_back(MuxFramer::new()).build();
//! let mut router = Router::new(shared, |_key| {
//!     Pipe::builder()
//!         .add_back(LengthPrefixFramer::new(PrefixWidth::U16))
//!         .build()
//! });
//!
//! let wire = router.open_branch(1).unwrap();
//! assert_eq!(wire.len(), 1);
//! assert!(router.contains(1));
//! ```

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

/// Fixed-latency delay
pub mod delay;

/// Separator-delimited chunking
pub mod delimited;

/// Length-prefixed framing
pub mod length_prefix;

/// Branch multiplexing framing
pub mod mux;

/// UTF-8 validation
pub mod utf8;

// Re-export commonly used types
pub use delay::DelayFilter;
pub use delimited::DelimitedChunker;
pub use length_prefix::{LengthPrefixFramer, PrefixWidth};
pub use mux::MuxFramer;
pub use utf8::Utf8Validator;
