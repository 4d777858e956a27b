//! Reply decoding for the mount-control protocol.
//!
//! Replies come in three shapes: mount replies closed by the `#` sentinel
//! (`Idle#`, `+45.0000#`), single-line JSON objects for structured data, and
//! bare text (echo). [`Reply::parse`] tells them apart.

use serde_json::{Map, Value};

use mountlink_core::error::{Error, Result};
pub use mountlink_core::line::{
    decode_line, encode_line, LineDecode, LINE_TERMINATOR, SENTINEL, UNKNOWN_COMMAND_RESPONSE,
};

/// Whether `line` ends with the `#` sentinel.
pub fn has_sentinel(line: &str) -> bool {
    line.trim_end().ends_with(SENTINEL)
}

/// Remove one trailing `#` sentinel, if present.
pub fn strip_sentinel(line: &str) -> &str {
    let trimmed = line.trim_end();
    trimmed.strip_suffix(SENTINEL).unwrap_or(trimmed)
}

/// Whether `line` is the controller's unknown-command reply.
pub fn is_unknown_command(line: &str) -> bool {
    line.trim() == UNKNOWN_COMMAND_RESPONSE
}

/// Decode a single-line JSON object reply.
pub fn parse_json_payload(line: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(line.trim()) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::Protocol(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(Error::Protocol(format!("malformed JSON reply {line:?}: {e}"))),
    }
}

/// Decode a signed decimal angle reply such as `+45.0000#` or `180.0000#`.
pub fn parse_angle(line: &str) -> Result<f64> {
    let body = strip_sentinel(line);
    body.parse::<f64>()
        .map_err(|_| Error::Protocol(format!("malformed angle reply {line:?}")))
}

/// A reply line, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A `#`-terminated mount reply, sentinel removed.
    Mount(String),
    /// A structured JSON reply.
    Json(Map<String, Value>),
    /// The controller did not recognise the command.
    Unknown,
    /// Anything else, verbatim.
    Text(String),
}

impl Reply {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if is_unknown_command(line) {
            return Reply::Unknown;
        }
        if has_sentinel(line) {
            return Reply::Mount(strip_sentinel(line).to_string());
        }
        if line.starts_with('{') {
            if let Ok(map) = parse_json_payload(line) {
                return Reply::Json(map);
            }
        }
        Reply::Text(line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_helpers() {
        assert!(has_sentinel("Idle#"));
        assert!(has_sentinel("Idle# "));
        assert!(!has_sentinel("test"));
        assert_eq!(strip_sentinel("HB3.2.1#"), "HB3.2.1");
        assert_eq!(strip_sentinel("test"), "test");
        assert_eq!(strip_sentinel("##"), "#");
    }

    #[test]
    fn unknown_command() {
        assert!(is_unknown_command("Unknown command#"));
        assert!(!is_unknown_command("Idle#"));
    }

    #[test]
    fn json_payload() {
        let map = parse_json_payload(r#"{"status":"Connected","signal_strength":-45}"#).unwrap();
        assert_eq!(map["status"], "Connected");
        assert_eq!(map["signal_strength"], -45);

        assert!(matches!(parse_json_payload("[1,2]"), Err(Error::Protocol(_))));
        assert!(matches!(parse_json_payload("{oops"), Err(Error::Protocol(_))));
    }

    #[test]
    fn angles() {
        assert_eq!(parse_angle("+45.0000#").unwrap(), 45.0);
        assert_eq!(parse_angle("180.0000#").unwrap(), 180.0);
        assert_eq!(parse_angle("-12.5000#").unwrap(), -12.5);
        assert!(parse_angle("Unknown command#").is_err());
    }

    #[test]
    fn reply_shapes() {
        assert_eq!(Reply::parse("Idle#"), Reply::Mount("Idle".into()));
        assert_eq!(Reply::parse("Unknown command#"), Reply::Unknown);
        assert_eq!(Reply::parse("test"), Reply::Text("test".into()));
        match Reply::parse(r#"{"relay":"OFF"}"#) {
            Reply::Json(map) => assert_eq!(map["relay"], "OFF"),
            other => panic!("expected JSON, got {other:?}"),
        }
        assert_eq!(Reply::parse("{broken"), Reply::Text("{broken".into()));
    }
}
