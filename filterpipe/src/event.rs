//! # Event - The Unit Exchanged Between Filters
//!
//! Every filter consumes and produces [`Event`]s. An event is either a chunk of
//! data or a control signal, plus a small amount of [`Meta`]data (currently the
//! branch key the event belongs to, when it travels through a multiplexed pipe).
//!
//! Events are moved from producer to consumer and never mutated in place: the
//! only "modification" available is [`Event::with_branch`], which consumes the
//! event and returns a new one.

use bytes::Bytes;
use std::fmt;

use crate::hex::HexBytes;

/// Identifies a logical sub-stream (branch) multiplexed over one pipe.
pub type BranchKey = u32;

/// Control signals carried alongside data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Control {
    /// Graceful close of the session (or of a single branch when tagged).
    Close,
    /// Unrecoverable fault, with a human readable reason.
    Error(String),
    /// Request to emit buffered-but-not-yet-required output now.
    Flush,
    /// A new branch with the given key is being opened.
    BranchOpen(BranchKey),
    /// The branch with the given key is being closed.
    BranchClose(BranchKey),
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Control::Close => write!(f, "Close"),
            Control::Error(reason) => write!(f, "Error({reason})"),
            Control::Flush => write!(f, "Flush"),
            Control::BranchOpen(key) => write!(f, "BranchOpen({key})"),
            Control::BranchClose(key) => write!(f, "BranchClose({key})"),
        }
    }
}

/// Metadata attached to an event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Meta {
    /// Branch this event belongs to, if it travels through a multiplexed pipe.
    pub branch: Option<BranchKey>,
}

/// The atomic unit exchanged between filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A chunk of opaque payload bytes.
    Data {
        /// Payload
        payload: Bytes,
        /// Metadata
        meta: Meta,
    },
    /// A control signal.
    Control {
        /// Kind of control signal
        kind: Control,
        /// Metadata
        meta: Meta,
    },
}

impl Event {
    /// Creates an untagged data event.
    pub fn data(payload: impl Into<Bytes>) -> Self {
        Event::Data {
            payload: payload.into(),
            meta: Meta::default(),
        }
    }

    /// Creates an untagged control event.
    pub fn control(kind: Control) -> Self {
        Event::Control {
            kind,
            meta: Meta::default(),
        }
    }

    /// Shorthand for `Event::control(Control::Close)`.
    pub fn close() -> Self {
        Event::control(Control::Close)
    }

    /// Shorthand for `Event::control(Control::Error(reason))`.
    pub fn error(reason: impl Into<String>) -> Self {
        Event::control(Control::Error(reason.into()))
    }

    /// Shorthand for `Event::control(Control::Flush)`.
    pub fn flush() -> Self {
        Event::control(Control::Flush)
    }

    /// Returns a new event carrying the same content, tagged with `key`.
    pub fn with_branch(self, key: BranchKey) -> Self {
        self.with_meta(Meta { branch: Some(key) })
    }

    /// Returns a new event carrying the same content with `meta` replaced.
    pub fn with_meta(self, meta: Meta) -> Self {
        match self {
            Event::Data { payload, .. } => Event::Data { payload, meta },
            Event::Control { kind, .. } => Event::Control { kind, meta },
        }
    }

    /// Returns the event metadata.
    pub fn meta(&self) -> &Meta {
        match self {
            Event::Data { meta, .. } | Event::Control { meta, .. } => meta,
        }
    }

    /// Returns the branch key this event is tagged with.
    pub fn branch(&self) -> Option<BranchKey> {
        self.meta().branch
    }

    /// Returns the payload of a data event.
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Event::Data { payload, .. } => Some(payload),
            Event::Control { .. } => None,
        }
    }

    /// Returns the control kind of a control event.
    pub fn kind(&self) -> Option<&Control> {
        match self {
            Event::Control { kind, .. } => Some(kind),
            Event::Data { .. } => None,
        }
    }

    /// Whether this is a data event.
    pub fn is_data(&self) -> bool {
        matches!(self, Event::Data { .. })
    }

    /// Whether this is a `Control(Close)` event.
    pub fn is_close(&self) -> bool {
        matches!(self.kind(), Some(Control::Close))
    }

    /// Whether this is a `Control(Error)` event.
    pub fn is_error(&self) -> bool {
        matches!(self.kind(), Some(Control::Error(_)))
    }

    /// Whether this is a `Control(Flush)` event.
    pub fn is_flush(&self) -> bool {
        matches!(self.kind(), Some(Control::Flush))
    }

    /// Returns the fault reason of a `Control(Error)` event.
    pub fn error_reason(&self) -> Option<&str> {
        match self.kind() {
            Some(Control::Error(reason)) => Some(reason.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Data { payload, .. } => write!(f, "Data[{}]", HexBytes::new(payload))?,
            Event::Control { kind, .. } => write!(f, "Control[{kind}]")?,
        }
        if let Some(key) = self.branch() {
            write!(f, " on branch {key}")?;
        }
        Ok(())
    }
}
