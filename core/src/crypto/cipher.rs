//! Ephemeral key agreement and the per-direction session channel
//!
//! Each handshake burns one X25519 ephemeral key pair per side. The shared
//! secret fans out into two AES-256-GCM keys, one per direction, so a replayed
//! record can never be confused with traffic the local side sent. The record
//! sequence number doubles as the AEAD nonce and as associated data.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public, SharedSecret};

use crate::protocol::constants::{CHANNEL_INFO_I2R, CHANNEL_INFO_R2I};
use crate::{Error, Result};

/// One X25519 key pair, used for exactly one handshake.
pub struct EphemeralKey {
    secret: EphemeralSecret,
}

impl EphemeralKey {
    pub fn generate() -> Self {
        Self {
            secret: EphemeralSecret::random_from_rng(OsRng),
        }
    }

    /// Raw public key to put on the wire.
    pub fn public_bytes(&self) -> [u8; 32] {
        X25519Public::from(&self.secret).to_bytes()
    }

    /// Run ECDH against the peer's raw ephemeral key. Consumes the secret so
    /// it cannot be reused for a second agreement.
    pub fn agree(self, peer_public: &[u8; 32]) -> SharedSecret {
        self.secret.diffie_hellman(&X25519Public::from(*peer_public))
    }
}

/// Which side of the handshake this endpoint played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Initiator,
    Responder,
}

/// One direction of the encrypted channel.
#[derive(Clone)]
pub struct DirectionCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for DirectionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectionCipher").finish_non_exhaustive()
    }
}

impl DirectionCipher {
    fn from_key_bytes(key: &[u8]) -> Self {
        let cipher = Aes256Gcm::new_from_slice(key).expect("SHA256 always produces 32 bytes");
        Self { cipher }
    }

    /// Seal `plaintext` under sequence number `seq`.
    pub fn seal(&self, seq: u64, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce_bytes = seq_nonce(seq);
        let nonce = Nonce::from_slice(&nonce_bytes);
        self.cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: &seq.to_be_bytes(),
                },
            )
            .map_err(|e| Error::Crypto(format!("encryption failed: {}", e)))
    }

    /// Open a record sealed under sequence number `seq`.
    pub fn open(&self, seq: u64, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce_bytes = seq_nonce(seq);
        let nonce = Nonce::from_slice(&nonce_bytes);
        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: &seq.to_be_bytes(),
                },
            )
            .map_err(|e| Error::Crypto(format!("decryption failed: {}", e)))
    }
}

/// Both directions of a session channel.
#[derive(Debug, Clone)]
pub struct ChannelKeys {
    pub send: DirectionCipher,
    pub recv: DirectionCipher,
}

impl ChannelKeys {
    /// Derive directional keys from the ECDH shared secret.
    ///
    /// `k_i2r = SHA256(shared || CHANNEL_INFO_I2R)` carries initiator-to-responder
    /// traffic; `k_r2i` the reverse. The role decides which one this endpoint
    /// sends with.
    pub fn derive(shared: &SharedSecret, role: HandshakeRole) -> Self {
        let i2r = derive_key(shared, CHANNEL_INFO_I2R);
        let r2i = derive_key(shared, CHANNEL_INFO_R2I);
        match role {
            HandshakeRole::Initiator => Self {
                send: DirectionCipher::from_key_bytes(&i2r),
                recv: DirectionCipher::from_key_bytes(&r2i),
            },
            HandshakeRole::Responder => Self {
                send: DirectionCipher::from_key_bytes(&r2i),
                recv: DirectionCipher::from_key_bytes(&i2r),
            },
        }
    }
}

fn derive_key(shared: &SharedSecret, info: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(shared.as_bytes());
    hasher.update(info);
    hasher.finalize().into()
}

fn seq_nonce(seq: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&seq.to_be_bytes());
    nonce
}
