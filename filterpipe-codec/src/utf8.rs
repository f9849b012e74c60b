//! UTF-8 validation.

use filterpipe::{Error, Event, Filter, Result};

/// Faults the pipe when upward data is not valid UTF-8. Downward data passes
/// through unchecked.
///
/// Place it above a framer: a multi-byte character split across two raw reads
/// would otherwise be reported as invalid.
#[derive(Debug, Default)]
pub struct Utf8Validator;

impl Utf8Validator {
    /// Creates a validator.
    pub fn new() -> Self {
        Self
    }
}

impl Filter for Utf8Validator {
    fn name(&self) -> &str {
        "Utf8Validator"
    }

    fn push_up(&mut self, input: Event) -> Result<Vec<Event>> {
        if let Some(payload) = input.payload() {
            if let Err(err) = std::str::from_utf8(payload) {
                return Err(Error::protocol_violation(format!(
                    "invalid UTF-8 after {} bytes",
                    err.valid_up_to()
                )));
            }
        }
        Ok(vec![input])
    }

    fn push_down(&mut self, input: Event) -> Result<Vec<Event>> {
        Ok(vec![input])
    }
}
