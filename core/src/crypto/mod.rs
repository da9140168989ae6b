//! Session-channel cryptography
//!
//! Ed25519 identity keys live in [`crate::identity`]; this module covers the
//! per-session side: ephemeral X25519 agreement and the AES-256-GCM record
//! channel derived from it.

mod cipher;
pub mod serde_utils;

pub use cipher::{ChannelKeys, DirectionCipher, EphemeralKey, HandshakeRole};
