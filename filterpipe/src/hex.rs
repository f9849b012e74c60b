use std::fmt;

/// Default number of bytes rendered before truncating.
pub const DEFAULT_TRUNCATE: usize = 10;

/// Renders a byte slice as space separated hex for logging, e.g.
/// `0x68 0x65 0x6c ...(2 more bytes)`.
pub struct HexBytes<'a> {
    bytes: &'a [u8],
    truncate: Option<usize>,
}

impl<'a> HexBytes<'a> {
    /// Renders at most the first 10 bytes.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            truncate: Some(DEFAULT_TRUNCATE),
        }
    }

    /// Renders at most `truncate` bytes, or all of them when `None`.
    pub fn with_truncate(bytes: &'a [u8], truncate: Option<usize>) -> Self {
        Self { bytes, truncate }
    }
}

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bytes.is_empty() {
            return write!(f, "(0 bytes)");
        }

        let shown = match self.truncate {
            Some(limit) => self.bytes.len().min(limit),
            None => self.bytes.len(),
        };
        for (i, b) in self.bytes[..shown].iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "0x{b:02x}")?;
        }

        let remaining = self.bytes.len() - shown;
        if remaining > 0 {
            let unit = if remaining == 1 { "byte" } else { "bytes" };
            if shown > 0 {
                write!(f, " ...({remaining} more {unit})")?;
            } else {
                write!(f, "({remaining} {unit})")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(HexBytes::new(&[]).to_string(), "(0 bytes)");
    }

    #[test]
    fn test_truncation() {
        assert_eq!(
            HexBytes::with_truncate(b"hello", Some(2)).to_string(),
            "0x68 0x65 ...(3 more bytes)"
        );
        assert_eq!(
            HexBytes::with_truncate(b"hi", Some(1)).to_string(),
            "0x68 ...(1 more byte)"
        );
        assert_eq!(HexBytes::with_truncate(b"hi", Some(0)).to_string(), "(2 bytes)");
        assert_eq!(HexBytes::with_truncate(b"hi", None).to_string(), "0x68 0x69");
    }
}
