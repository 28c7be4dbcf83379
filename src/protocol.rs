//! HELLO handshake wire codec.
//!
//! A message is the literal prefix `HELLO `, a decimal sequence number,
//! and a terminating NUL byte. The NUL counts towards the wire length.
//!
//! ```text
//! Peer:   HELLO 5\0
//! Server: HELLO 6\0
//! Peer:   HELLO 7\0
//! ```
//!
//! No message on the wire is longer than [`MAX_LINE`] bytes.

use clap::ValueEnum;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Literal prefix every handshake message starts with.
pub const PREFIX: &[u8] = b"HELLO ";

/// Maximum wire length of a message, terminating NUL included.
pub const MAX_LINE: usize = 20;

/// Message terminator.
pub const TERMINATOR: u8 = b'\0';

/// Handshake sequence number.
pub type Sequence = i64;

/// Errors produced while parsing a handshake message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("message does not start with \"HELLO \"")]
    MissingPrefix,
    #[error("invalid sequence number {0:?}")]
    InvalidSequence(String),
}

/// How the sequence field of a message is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// `atoi` semantics: non-numeric input yields 0.
    #[default]
    Lenient,
    /// The field must be an optionally signed decimal integer and nothing else.
    Strict,
}

impl ParseMode {
    /// Parse a message (without its terminator) according to this mode.
    pub fn parse(self, input: &[u8]) -> Result<Sequence, ParseError> {
        match self {
            ParseMode::Lenient => parse_hello(input),
            ParseMode::Strict => parse_hello_strict(input),
        }
    }
}

/// Parse a `HELLO <n>` message leniently.
///
/// Leading whitespace is skipped, an optional sign is accepted and digits are
/// consumed up to the first non-digit. A field with no digits parses as 0 and
/// out-of-range values saturate.
pub fn parse_hello(input: &[u8]) -> Result<Sequence, ParseError> {
    let field = input.strip_prefix(PREFIX).ok_or(ParseError::MissingPrefix)?;
    Ok(atoi(field))
}

/// Parse a `HELLO <n>` message, rejecting anything but a well-formed integer.
pub fn parse_hello_strict(input: &[u8]) -> Result<Sequence, ParseError> {
    let field = input.strip_prefix(PREFIX).ok_or(ParseError::MissingPrefix)?;
    let invalid = || ParseError::InvalidSequence(String::from_utf8_lossy(field).into_owned());

    std::str::from_utf8(field)
        .map_err(|_| invalid())?
        .parse::<Sequence>()
        .map_err(|_| invalid())
}

fn atoi(field: &[u8]) -> Sequence {
    let field = field.trim_ascii_start();
    let (negative, digits) = match field {
        [b'-', rest @ ..] => (true, rest),
        [b'+', rest @ ..] => (false, rest),
        _ => (false, field),
    };

    digits
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0, |acc: Sequence, &b| {
            let digit = Sequence::from(b - b'0');
            if negative {
                acc.saturating_mul(10).saturating_sub(digit)
            } else {
                acc.saturating_mul(10).saturating_add(digit)
            }
        })
}

/// A formatted handshake message, NUL-terminated and at most [`MAX_LINE`] bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HelloMessage {
    buf: [u8; MAX_LINE],
    len: usize,
}

impl HelloMessage {
    /// Wire bytes, terminator included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Message bytes without the terminator.
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.len - 1]
    }
}

impl fmt::Debug for HelloMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HelloMessage")
            .field(&String::from_utf8_lossy(self.payload()))
            .finish()
    }
}

/// Format `HELLO <sequence>` followed by a NUL.
///
/// Output that would not fit in [`MAX_LINE`] bytes is truncated so that the
/// last byte on the wire is always the terminator.
pub fn format_hello(sequence: Sequence) -> HelloMessage {
    let text = format!("HELLO {sequence}");
    let len = text.len().min(MAX_LINE - 1);

    let mut buf = [0u8; MAX_LINE];
    buf[..len].copy_from_slice(&text.as_bytes()[..len]);
    buf[len] = TERMINATOR;

    HelloMessage { buf, len: len + 1 }
}

/// Find the first complete message in `input`.
///
/// Returns the message without its terminator and the number of bytes it
/// occupies in `input` (terminator included), or `None` if no terminator has
/// arrived yet.
pub fn next_message(input: &[u8]) -> Option<(&[u8], usize)> {
    input
        .iter()
        .position(|&b| b == TERMINATOR)
        .map(|pos| (&input[..pos], pos + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hello() {
        assert_eq!(parse_hello(b"HELLO 5"), Ok(5));
        assert_eq!(parse_hello(b"HELLO 0"), Ok(0));
        assert_eq!(parse_hello(b"HELLO 1234567"), Ok(1234567));
    }

    #[test]
    fn test_parse_missing_prefix() {
        assert_eq!(parse_hello(b"HELO 5"), Err(ParseError::MissingPrefix));
        assert_eq!(parse_hello(b"hello 5"), Err(ParseError::MissingPrefix));
        assert_eq!(parse_hello(b"HELLO"), Err(ParseError::MissingPrefix));
        assert_eq!(parse_hello(b""), Err(ParseError::MissingPrefix));
    }

    #[test]
    fn test_parse_lenient_atoi() {
        // Non-numeric yields 0
        assert_eq!(parse_hello(b"HELLO abc"), Ok(0));
        assert_eq!(parse_hello(b"HELLO "), Ok(0));
        // Stops at the first non-digit
        assert_eq!(parse_hello(b"HELLO 42abc"), Ok(42));
        // Whitespace and sign
        assert_eq!(parse_hello(b"HELLO   7"), Ok(7));
        assert_eq!(parse_hello(b"HELLO -3"), Ok(-3));
        assert_eq!(parse_hello(b"HELLO +9"), Ok(9));
        // Saturates instead of overflowing
        assert_eq!(
            parse_hello(b"HELLO 99999999999999999999999"),
            Ok(Sequence::MAX)
        );
    }

    #[test]
    fn test_parse_strict() {
        assert_eq!(parse_hello_strict(b"HELLO 5"), Ok(5));
        assert_eq!(parse_hello_strict(b"HELLO -5"), Ok(-5));
        assert!(matches!(
            parse_hello_strict(b"HELLO abc"),
            Err(ParseError::InvalidSequence(field)) if field == "abc"
        ));
        assert!(parse_hello_strict(b"HELLO ").is_err());
        assert!(parse_hello_strict(b"HELLO 42abc").is_err());
        assert!(parse_hello_strict(b"HELLO  7").is_err());
        assert_eq!(parse_hello_strict(b"GOODBYE 1"), Err(ParseError::MissingPrefix));
    }

    #[test]
    fn test_parse_mode_dispatch() {
        assert_eq!(ParseMode::default(), ParseMode::Lenient);
        assert_eq!(ParseMode::Lenient.parse(b"HELLO x"), Ok(0));
        assert!(ParseMode::Strict.parse(b"HELLO x").is_err());
    }

    #[test]
    fn test_format_hello() {
        let msg = format_hello(6);
        assert_eq!(msg.as_bytes(), b"HELLO 6\0");
        assert_eq!(msg.as_bytes().len(), 8);
        assert_eq!(msg.payload(), b"HELLO 6");

        assert_eq!(format_hello(-1).as_bytes(), b"HELLO -1\0");
    }

    #[test]
    fn test_format_truncates_at_max_line() {
        let msg = format_hello(Sequence::MIN);
        assert_eq!(msg.as_bytes().len(), MAX_LINE);
        assert_eq!(msg.as_bytes()[MAX_LINE - 1], TERMINATOR);
        assert_eq!(msg.payload(), b"HELLO -922337203685");

        // 13 digits is the longest that fits untruncated
        let msg = format_hello(9_999_999_999_999);
        assert_eq!(msg.as_bytes().len(), MAX_LINE);
        assert_eq!(msg.payload(), b"HELLO 9999999999999");
    }

    #[test]
    fn test_round_trip_within_wire_limit() {
        for n in [0, 1, 2, 41, 65535, 2_147_483_647, 9_999_999_999_999, -999_999_999_999] {
            let msg = format_hello(n);
            assert_eq!(parse_hello(msg.payload()), Ok(n), "n = {n}");
            assert_eq!(parse_hello_strict(msg.payload()), Ok(n), "n = {n}");
        }
    }

    #[test]
    fn test_next_message() {
        assert_eq!(next_message(b"HELLO 5\0"), Some((&b"HELLO 5"[..], 8)));
        assert_eq!(next_message(b"HELLO 5\0HELLO 7\0"), Some((&b"HELLO 5"[..], 8)));
        assert_eq!(next_message(b"HELLO "), None);
        assert_eq!(next_message(b""), None);
        assert_eq!(next_message(b"\0"), Some((&b""[..], 1)));
    }
}
