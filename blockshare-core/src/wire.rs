//! Framing: one JSON object per line, newline-terminated.

use crate::protocol::Message;

/// Longest accepted line (a 256 KiB block is ~350 KiB once Base64-encoded).
pub const MAX_LINE_LEN: usize = 16 * 1024 * 1024; // 16 MiB

/// Encode a message as a single line, without the terminator.
pub fn encode_line(msg: &Message) -> Result<String, WireError> {
    let line = serde_json::to_string(msg).map_err(WireError::Encode)?;
    if line.len() > MAX_LINE_LEN {
        return Err(WireError::TooLarge);
    }
    Ok(line)
}

/// Decode one line. Surrounding whitespace (including a trailing `\r`) is ignored.
pub fn decode_line(line: &str) -> Result<Message, WireError> {
    if line.len() > MAX_LINE_LEN {
        return Err(WireError::TooLarge);
    }
    serde_json::from_str(line.trim()).map_err(WireError::Decode)
}

/// Error encoding or decoding a line.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("line too large")]
    TooLarge,
}
