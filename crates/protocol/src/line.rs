use std::io::Write;

use serde::Serialize;

use crate::ProtocolError;
use crate::messages::Request;

/// Parses one request line. Surrounding whitespace is ignored.
pub fn decode_line(line: &str) -> Result<Request, ProtocolError> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Serializes `message` as a single line ending in `\n`.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Writes `message` as one line and flushes, so git-lfs sees it at once.
pub fn write_message<W: Write + ?Sized, T: Serialize>(
    out: &mut W,
    message: &T,
) -> Result<(), ProtocolError> {
    out.write_all(encode_line(message)?.as_bytes())?;
    out.flush()?;
    Ok(())
}
