//! Frame delimiter resolution.
//!
//! A listener frames its input either on a single delimiter byte or, when no
//! delimiter is configured, on the end of the stream. The byte comes from a
//! custom hex string when one is set, otherwise from one of the named
//! delimiters.
//!
//! Hex codes for control characters: <http://www.columbia.edu/kermit/ascii.html>

use crate::error::ConfigError;
use std::fmt;
use tracing::debug;

/// Setting value for carriage return.
pub const CARRIAGE_RETURN: &str = "Carriage Return (CR)";
/// Setting value for line feed.
pub const LINE_FEED: &str = "Line Feed (LF)";
/// Setting value for form feed.
pub const FORM_FEED: &str = "Form Feed (FF)";

/// Separator used to join replies when the listener has no delimiter.
pub const STREAM_REPLY_SEPARATOR: u8 = b'\n';

/// Framing policy for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedDelimiter {
    /// Frames end at this byte, which is stripped from the frame.
    Byte(u8),
    /// One frame per connection: everything until the peer closes.
    None,
}

impl ResolvedDelimiter {
    /// The delimiter byte, if any.
    pub fn byte(self) -> Option<u8> {
        match self {
            ResolvedDelimiter::Byte(b) => Some(b),
            ResolvedDelimiter::None => None,
        }
    }

    /// Byte placed between replies of one outbound frame.
    pub fn reply_separator(self) -> u8 {
        self.byte().unwrap_or(STREAM_REPLY_SEPARATOR)
    }
}

impl fmt::Display for ResolvedDelimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedDelimiter::Byte(b) => write!(f, "Decimal [{b}] or Hex [{b:x}]"),
            ResolvedDelimiter::None => write!(f, "none (read until close)"),
        }
    }
}

/// Map a named delimiter setting to its byte. Unknown names, including the
/// empty string, have no byte.
pub fn named_byte(name: &str) -> Option<u8> {
    match name {
        CARRIAGE_RETURN => Some(b'\r'),
        LINE_FEED => Some(b'\n'),
        FORM_FEED => Some(0x0c),
        _ => None,
    }
}

/// Resolve the framing delimiter from the custom and named settings.
///
/// A non-empty `custom_hex` wins. Its decoded bytes are read as UTF-8 and the
/// first code point is narrowed to its low byte, so non-ASCII custom
/// delimiters do not survive intact. A delimiter that narrows to zero means
/// no delimiter.
pub fn resolve(custom_hex: &str, named: &str) -> Result<ResolvedDelimiter, ConfigError> {
    if !custom_hex.is_empty() {
        let bytes =
            hex::decode(custom_hex).map_err(|source| ConfigError::InvalidCustomDelimiter {
                value: custom_hex.to_string(),
                source,
            })?;
        let resolved = match first_code_point(&bytes) {
            Some(c) if (c as u32 as u8) != 0 => ResolvedDelimiter::Byte(c as u32 as u8),
            _ => ResolvedDelimiter::None,
        };
        debug!(delimiter = %resolved, "Custom delimiter is set");
        return Ok(resolved);
    }

    let resolved = named_byte(named)
        .map(ResolvedDelimiter::Byte)
        .unwrap_or(ResolvedDelimiter::None);
    debug!(delimiter = %resolved, "Delimiter is set");
    Ok(resolved)
}

/// First code point of `bytes`; an invalid leading sequence decodes as U+FFFD.
fn first_code_point(bytes: &[u8]) -> Option<char> {
    let prefix = &bytes[..bytes.len().min(4)];
    String::from_utf8_lossy(prefix).chars().next()
}
