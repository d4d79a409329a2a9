//! Codec for encoding and decoding notifications.
//!
//! Frame format: one JSON document per line.
//! ```text
//! {"type":"moduleListUpdated","componentId":64,...}\n
//! {"type":"moduleDownloaded","componentId":64,...}\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::types::Notification;

/// Maximum accepted line length (64 MB). Modules are at most 256 KB,
/// base64 and JSON overhead stay well below this.
pub const MAX_LINE_SIZE: usize = 64 * 1024 * 1024;

/// Encode a notification as a single newline-terminated JSON line.
pub fn encode_notification(msg: &Notification) -> Result<Bytes, ProtocolError> {
    let json = serde_json::to_vec(msg).map_err(|e| ProtocolError::EncodeError(e.to_string()))?;

    let mut buf = BytesMut::with_capacity(json.len() + 1);
    buf.put_slice(&json);
    buf.put_u8(b'\n');
    Ok(buf.freeze())
}

/// Decode a notification from one line (trailing CR/LF is ignored).
pub fn decode_notification(line: &[u8]) -> Result<Notification, ProtocolError> {
    if line.len() > MAX_LINE_SIZE {
        return Err(ProtocolError::LineTooLarge(line.len(), MAX_LINE_SIZE));
    }

    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }

    serde_json::from_slice(&line[..end]).map_err(|e| ProtocolError::DecodeError(e.to_string()))
}
