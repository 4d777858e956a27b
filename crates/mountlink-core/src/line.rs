//! Line framing for the mount-control wire format.
//!
//! Every command and response is one ASCII line. Commands are sent with a
//! `\r\n` terminator; received lines may end in `\n` or `\r\n`. Mount
//! protocol replies additionally carry a trailing `#` sentinel before the
//! line terminator.

/// Line terminator appended to every outgoing line.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Sentinel character that closes mount-protocol replies.
pub const SENTINEL: char = '#';

/// Reply sent by the controller for a command it does not recognise.
pub const UNKNOWN_COMMAND_RESPONSE: &str = "Unknown command#";

/// Lines longer than this are treated as line noise and dropped.
pub const MAX_LINE_LEN: usize = 8192;

/// Result of attempting to decode one line from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineDecode {
    /// A complete line was decoded.
    Line {
        /// Line text with the terminator and surrounding whitespace removed.
        text: String,
        /// Number of bytes consumed from the input buffer.
        consumed: usize,
    },

    /// No terminator yet. More data is needed.
    Incomplete,
}

/// Append the line terminator to `text`.
pub fn encode_line(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + LINE_TERMINATOR.len());
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(LINE_TERMINATOR.as_bytes());
    out
}

/// Decode the first complete line from `buf`.
///
/// Non-UTF-8 bytes are replaced rather than rejected; the device speaks
/// ASCII and stray bytes are reported as part of a mismatch instead of
/// aborting the exchange.
pub fn decode_line(buf: &[u8]) -> LineDecode {
    let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
        return LineDecode::Incomplete;
    };

    let text = String::from_utf8_lossy(&buf[..pos]).trim().to_string();
    LineDecode::Line {
        text,
        consumed: pos + 1,
    }
}
