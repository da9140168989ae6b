use thiserror::Error;

/// OpenClipboard error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("address already in use: {0}")]
    AddressInUse(String),

    #[error("identity file not found: {0}")]
    IdentityNotFound(String),

    #[error("corrupt identity file: {0}")]
    CorruptIdentity(String),

    #[error("malformed pairing payload: {0}")]
    MalformedPairing(String),

    #[error("pairing nonce mismatch between init and resp payloads")]
    NonceMismatch,

    #[error("untrusted peer: {0}")]
    UntrustedPeer(String),

    #[error("HELLO peer id does not match handshake identity: {0}")]
    IdentityMismatch(String),

    #[error("bad frame sequence: got {got}, last seen {last}")]
    BadSequence { got: u64, last: u64 },

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("failed to serialize/deserialize: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("discovery error: {0}")]
    Discovery(String),

    #[error("clipboard error: {0}")]
    Clipboard(String),
}

pub type Result<T> = std::result::Result<T, Error>;
