//! # filterpipe - IO-Free Bidirectional Filter Pipelines
//!
//! `filterpipe` composes protocol stages into a stack that transforms data in
//! both directions without ever touching a socket, a timer or a thread. The host
//! owns all I/O: it pushes bytes it read into the pipe, pushes application events
//! into the pipe, and sends whatever comes out.
//!
//! ## Core Concepts
//!
//! ### Event
//!
//! An [`Event`] is either a chunk of [`Bytes`](bytes::Bytes) or a [`Control`]
//! signal (`Close`, `Error`, `Flush`, `BranchOpen`, `BranchClose`), plus [`Meta`]
//! carrying the branch key on multiplexed connections.
//!
//! ### Filter
//!
//! A [`Filter`] is one protocol stage: framing, validation, encoding, a
//! multiplexing header, ... It consumes one event and returns zero or more.
//! Filters never reference each other.
//!
//! **Best Practice:** Keep filters focused on a single responsibility. If a
//! filter does multiple things, split it into separate filters.
//!
//! ### Pipe
//!
//! A [`Pipe`] is an ordered stack of filters, built once with a [`PipeBuilder`]
//! and driven as one duplex unit. It tracks each filter's [`FilterState`] and
//! isolates faults to the pipe they happen in.
//!
//! ### Router
//!
//! A [`Router`] splits one shared pipe into many logical branches, each with its
//! own pipe created by a factory, keyed by [`BranchKey`].
//!
//! ### Protocol
//!
//! The [`Protocol`] trait is the poll-based surface a host event loop drives;
//! [`Driver`] implements it for any [`Duplex`] (a pipe or a router).
//!
//! ## Event Flow
//!
//! ```text
//!                                                       | feed_down()
//!   +---------------------------------------------------+---------------+
//!   |                             Pipe                  |               |
//!   |                                                  \|/              |
//!   |    +----------+----------+------------+-----------+----------+    |
//!   |    |                       Filter  N-1                       |    |
//!   |    +----------+----------+------------+-----------+----------+    |
//!   |              /|\                                  |               |
//!   |               |           push_up / push_down     |               |
//!   |               |                                  \|/              |
//!   |    +----------+----------+------------+-----------+----------+    |
//!   |    |                       Filter  0                         |    |
//!   |    +----------+----------+------------+-----------+----------+    |
//!   |              /|\                                  |               |
//!   +---------------+-----------------------------------+---------------+
//!                   | feed_up()                         | output units
//!                   |                                  \|/
//!   +---------------+-----------------------------------+---------------+
//!   |             Host-owned transport (sockets, files, ...)            |
//!   +-------------------------------------------------------------------+
//! ```
//!
//! ## Example: Driving a Pipe From an Event Loop
//!
//! ```ignore
//! fn run(socket: UdpSocket, pipe: Pipe) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut driver = Driver::new(pipe);
//!     let mut buf = vec![0; 2000];
//!     loop {
//!         while let Some(transmit) = driver.poll_write() {
//!             socket.send(&transmit)?;
//!         }
//!         while let Some(event) = driver.poll_read() {
//!             println!("received {}", event);
//!         }
//!         if driver.is_closed() {
//!             break;
//!         }
//!
//!         let eto = driver
//!             .poll_timeout()
//!             .unwrap_or(Instant::now() + Duration::from_millis(100));
//!         let delay_from_now = eto
//!             .checked_duration_since(Instant::now())
//!             .unwrap_or(Duration::from_secs(0));
//!         if delay_from_now.is_zero() {
//!             driver.handle_timeout(Instant::now())?;
//!             continue;
//!         }
//!
//!         socket.set_read_timeout(Some(delay_from_now))?;
//!         if let Ok(n) = socket.recv(&mut buf) {
//!             driver.handle_read(Bytes::copy_from_slice(&buf[..n]))?;
//!         }
//!         driver.handle_timeout(Instant::now())?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

// ========================================
// Module Declarations
// ========================================

/// Events and control signals
pub(crate) mod event;

/// Error types
pub(crate) mod error;

/// Hex rendering of payloads for logs
pub(crate) mod hex;

/// The filter trait and lifecycle states
pub(crate) mod filter;

/// Per-filter lifecycle tracking (not part of public API)
pub(crate) mod filter_internal;

/// Pipes of filters
pub(crate) mod pipe;

/// Internal pipe drive cycle (not part of public API)
pub(crate) mod pipe_internal;

/// Branch routing over a shared pipe
pub(crate) mod router;

/// Poll-based host surface
pub(crate) mod protocol;

/// Bottom-to-bottom coupling of two pipes
pub(crate) mod coupler;

/// Stacks looped back on themselves
pub(crate) mod loopback;

// ========================================
// Public Exports
// ========================================

pub use coupler::{Coupler, Delivered};
pub use error::{Error, Result};
pub use event::{BranchKey, Control, Event, Meta};
pub use filter::{Filter, FilterState, Released};
pub use hex::HexBytes;
pub use loopback::{BottomLoopback, TopLoopback};
pub use pipe::{Duplex, Pipe, PipeBuilder, PipeStats};
pub use protocol::{Driver, Protocol};
pub use router::{PipeFactoryFn, Router};
