//! Typed frame codec
//!
//! Wire layout (big-endian):
//! `ver(1) | type(1) | stream(4) | seq(8) | len(4) | bytes(len)`.
//!
//! The codec is transport-agnostic; `sync::framing` moves encoded frames over
//! a reliable byte stream.

use crate::protocol::constants::{MAX_FRAME, PROTOCOL_VERSION};
use crate::{Error, Result};

/// Frame header size in bytes.
pub const HEADER_LEN: usize = 1 + 1 + 4 + 8 + 4;

/// Logical stream IDs (application-level multiplexing).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamId {
    Control = 1,
    Clipboard = 2,
    File = 3,
}

/// Message types carried in the frame header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Hello = 0x01,
    Ping = 0x02,
    Pong = 0x03,

    ClipText = 0x10,

    FileOffer = 0x20,
    FileAccept = 0x21,
    FileReject = 0x22,
    FileChunk = 0x23,
    FileDone = 0x24,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0x01 => Ok(Self::Hello),
            0x02 => Ok(Self::Ping),
            0x03 => Ok(Self::Pong),
            0x10 => Ok(Self::ClipText),
            0x20 => Ok(Self::FileOffer),
            0x21 => Ok(Self::FileAccept),
            0x22 => Ok(Self::FileReject),
            0x23 => Ok(Self::FileChunk),
            0x24 => Ok(Self::FileDone),
            _ => Err(Error::InvalidFrame(format!("unknown msg type {:#04x}", v))),
        }
    }
}

/// One typed, sequenced, length-prefixed unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub msg_type: u8,
    pub stream_id: u32,
    pub seq: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: MsgType, stream_id: StreamId, seq: u64, payload: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            msg_type: msg_type as u8,
            stream_id: stream_id as u32,
            seq,
            payload,
        }
    }

    /// Encode to the wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.push(self.version);
        out.push(self.msg_type);
        out.extend_from_slice(&self.stream_id.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode from the wire layout.
    ///
    /// Fails with `InvalidFrame` on version mismatch, oversized length, or
    /// truncation.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::InvalidFrame(format!(
                "truncated header: {} bytes",
                bytes.len()
            )));
        }

        let version = bytes[0];
        if version != PROTOCOL_VERSION {
            return Err(Error::InvalidFrame(format!(
                "unsupported version {}",
                version
            )));
        }

        let msg_type = bytes[1];
        let stream_id = u32::from_be_bytes(bytes[2..6].try_into().expect("4-byte slice"));
        let seq = u64::from_be_bytes(bytes[6..14].try_into().expect("8-byte slice"));
        let len = u32::from_be_bytes(bytes[14..18].try_into().expect("4-byte slice")) as usize;

        if len > MAX_FRAME {
            return Err(Error::InvalidFrame(format!(
                "payload too large: {} bytes (max {})",
                len, MAX_FRAME
            )));
        }
        if bytes.len() < HEADER_LEN + len {
            return Err(Error::InvalidFrame("payload truncated".to_string()));
        }

        Ok(Self {
            version,
            msg_type,
            stream_id,
            seq,
            payload: bytes[HEADER_LEN..HEADER_LEN + len].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::new(MsgType::ClipText, StreamId::Clipboard, 42, b"hello".to_vec());
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let frame = Frame::new(MsgType::Ping, StreamId::Control, 0, Vec::new());
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut encoded = Frame::new(MsgType::Ping, StreamId::Control, 1, Vec::new()).encode();
        encoded[0] = 9;
        assert!(matches!(
            Frame::decode(&encoded),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_header() {
        assert!(Frame::decode(&[0u8; 5]).is_err());
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let encoded = Frame::new(MsgType::Hello, StreamId::Control, 1, vec![1, 2, 3, 4]).encode();
        assert!(Frame::decode(&encoded[..encoded.len() - 2]).is_err());
    }

    #[test]
    fn test_rejects_oversized_length() {
        let mut encoded = Frame::new(MsgType::Hello, StreamId::Control, 1, Vec::new()).encode();
        // Claim a payload larger than MAX_FRAME.
        encoded[14..18].copy_from_slice(&(u32::MAX).to_be_bytes());
        assert!(Frame::decode(&encoded).is_err());
    }

    #[test]
    fn test_msg_type_from_u8() {
        assert_eq!(MsgType::from_u8(0x10).unwrap(), MsgType::ClipText);
        assert!(MsgType::from_u8(0x7f).is_err());
    }
}
