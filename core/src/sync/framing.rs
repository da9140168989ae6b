//! Wire records
//!
//! Everything on a session's byte stream is one record: a big-endian u32
//! length followed by that many bytes. Handshake documents travel as JSON
//! records before the channel keys exist; established traffic as sealed
//! frame records. The length is validated before any allocation happens.

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::constants::MAX_FRAME;
use crate::{Error, Result};

// Frame header, sequence prefix, and AEAD tag all fit in this slack.
const MAX_RECORD: usize = MAX_FRAME + 256;

/// Read one record.
pub async fn read_record<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let len = reader
        .read_u32()
        .await
        .map_err(|e| Error::Network(e.to_string()))? as usize;
    if len > MAX_RECORD {
        return Err(Error::InvalidFrame(format!(
            "record length {} exceeds bound {}",
            len, MAX_RECORD
        )));
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;
    Ok(buf)
}

/// Write one record and flush.
pub async fn write_record<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    if bytes.len() > MAX_RECORD {
        return Err(Error::InvalidFrame(format!(
            "record length {} exceeds bound {}",
            bytes.len(),
            MAX_RECORD
        )));
    }

    writer
        .write_u32(bytes.len() as u32)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;
    writer
        .write_all(bytes)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Network(e.to_string()))
}

/// Read one JSON document record (handshake phase).
pub async fn read_json<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let bytes = read_record(reader).await?;
    serde_json::from_slice(&bytes).map_err(Error::Serialization)
}

/// Write one JSON document record (handshake phase).
pub async fn write_json<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    write_record(writer, &serde_json::to_vec(value)?).await
}
