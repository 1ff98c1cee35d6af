//! Checksum framing for the line-numbered wire protocol.
//!
//! A frame is `N<line_number> <command>*<checksum>`, where the checksum is
//! the XOR of every byte of `N<line_number> <command>`.

use gcodelink_core::{ProtocolError, Result};
use gcodelink_gcode::COMMENT_SYMBOL;
use gcodelink_settings::WireEncoding;

/// XOR-fold of all bytes
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Cut `text` at the comment symbol and trim it.
pub fn strip_comment(text: &str) -> &str {
    text.split_once(COMMENT_SYMBOL)
        .map_or(text, |(code, _)| code)
        .trim()
}

/// Build the checksummed frame for `command` at `line_number`.
///
/// `command` should already be free of comments.
pub fn frame(command: &str, line_number: i64) -> String {
    let prefixed = format!("N{} {}", line_number, command);
    let sum = checksum(prefixed.as_bytes());
    format!("{}*{}", prefixed, sum)
}

/// Encode a line for the wire: comment stripped, trimmed, newline terminated.
pub fn format_for_wire(text: &str, encoding: WireEncoding) -> Result<Vec<u8>> {
    let code = strip_comment(text);
    if code.is_empty() {
        return Err(ProtocolError::EmptyFrame.into());
    }
    if encoding == WireEncoding::Ascii && !code.is_ascii() {
        return Err(ProtocolError::Encoding {
            encoding: encoding.to_string(),
            text: code.to_string(),
        }
        .into());
    }
    let mut bytes = Vec::with_capacity(code.len() + 1);
    bytes.extend_from_slice(code.as_bytes());
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcodelink_core::Error;

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(b""), 0);
        assert_eq!(checksum(b"N1 G28"), 18);
    }

    #[test]
    fn test_frame() {
        assert_eq!(frame("G28", 1), "N1 G28*18");
        assert_eq!(frame("M110", -1), "N-1 M110*15");
        assert_eq!(frame("G1 X10 Y10", 12), "N12 G1 X10 Y10*26");
    }

    #[test]
    fn test_format_for_wire() {
        assert_eq!(
            format_for_wire("  G28 ; home all\r\n", WireEncoding::Ascii).unwrap(),
            b"G28\n".to_vec()
        );
        assert_eq!(
            format_for_wire("N1 G28*18", WireEncoding::Ascii).unwrap(),
            b"N1 G28*18\n".to_vec()
        );
    }

    #[test]
    fn test_format_for_wire_rejects_empty() {
        assert!(matches!(
            format_for_wire("   ; nothing", WireEncoding::Ascii),
            Err(Error::Protocol(ProtocolError::EmptyFrame))
        ));
    }

    #[test]
    fn test_format_for_wire_encoding() {
        assert!(matches!(
            format_for_wire("M117 héllo", WireEncoding::Ascii),
            Err(Error::Protocol(ProtocolError::Encoding { .. }))
        ));
        assert_eq!(
            format_for_wire("M117 héllo", WireEncoding::Utf8).unwrap(),
            "M117 héllo\n".as_bytes().to_vec()
        );
    }
}
