//! Typed payloads and frame constructors for the control and clipboard streams.

use serde::{Deserialize, Serialize};

use crate::protocol::frame::{Frame, MsgType, StreamId};
use crate::{Error, Result};

/// HELLO payload: announces identity and capabilities right after the
/// handshake. Unknown JSON fields are ignored so future versions can extend
/// the schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub peer_id: String,
    pub name: String,
    #[serde(default)]
    pub caps: Vec<String>,
}

impl Hello {
    pub fn new(peer_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            name: name.into(),
            caps: vec!["clip-text".to_string()],
        }
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(Error::Serialization)
    }

    pub fn into_frame(self, seq: u64) -> Result<Frame> {
        let payload = serde_json::to_vec(&self)?;
        Ok(Frame::new(MsgType::Hello, StreamId::Control, seq, payload))
    }
}

/// Build a PING frame carrying an opaque token the peer must mirror.
pub fn ping_frame(seq: u64, token: u64) -> Frame {
    Frame::new(
        MsgType::Ping,
        StreamId::Control,
        seq,
        token.to_be_bytes().to_vec(),
    )
}

/// Build a PONG frame mirroring a PING token.
pub fn pong_frame(seq: u64, token: u64) -> Frame {
    Frame::new(
        MsgType::Pong,
        StreamId::Control,
        seq,
        token.to_be_bytes().to_vec(),
    )
}

/// Read the token from a PING/PONG payload. Empty payloads carry token 0.
pub fn keepalive_token(payload: &[u8]) -> Result<u64> {
    if payload.is_empty() {
        return Ok(0);
    }
    let bytes: [u8; 8] = payload
        .try_into()
        .map_err(|_| Error::InvalidFrame("keep-alive token must be empty or 8 bytes".to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Build a CLIP_TEXT frame. The payload is the raw UTF-8 text.
pub fn clip_text_frame(seq: u64, text: &str) -> Frame {
    Frame::new(
        MsgType::ClipText,
        StreamId::Clipboard,
        seq,
        text.as_bytes().to_vec(),
    )
}

/// Read the text from a CLIP_TEXT payload.
pub fn clip_text(payload: &[u8]) -> Result<String> {
    String::from_utf8(payload.to_vec())
        .map_err(|_| Error::InvalidFrame("CLIP_TEXT payload is not valid UTF-8".to_string()))
}
