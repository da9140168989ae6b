//! Base64 serialization utilities for serde
//!
//! Reusable serde modules for serializing/deserializing byte arrays and
//! vectors as base64 strings in JSON documents.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Deserializer, Serializer};

/// Serialize/deserialize a `Vec<u8>` as a base64 string.
///
/// Usage:
/// ```ignore
/// #[serde(with = "crate::crypto::serde_utils::base64_bytes")]
/// pub field: Vec<u8>,
/// ```
pub mod base64_bytes {
    use super::*;

    pub fn serialize<S>(data: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        BASE64.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Serialize/deserialize a `[u8; 32]` array as a base64 string.
/// Used for keys and nonces.
///
/// Usage:
/// ```ignore
/// #[serde(with = "crate::crypto::serde_utils::base64_array_32")]
/// pub nonce: [u8; 32],
/// ```
pub mod base64_array_32 {
    use super::*;

    pub fn serialize<S>(data: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        let bytes = BASE64.decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid length: expected 32 bytes"))
    }
}
