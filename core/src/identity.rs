//! Long-term device identity: Ed25519 keypair plus the stable PeerId.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::{Error, Result};

/// On-disk form of the identity file. Rejects length-mismatched keys and
/// non-base64 at parse time.
#[derive(Serialize, Deserialize)]
struct IdentityFile {
    /// base64 signing key seed (32 bytes)
    #[serde(with = "crate::crypto::serde_utils::base64_array_32")]
    sk: [u8; 32],
    /// base64 public key (32 bytes)
    #[serde(with = "crate::crypto::serde_utils::base64_array_32")]
    pk: [u8; 32],
}

/// Device identity. Immutable once written to disk; destroyed only by an
/// explicit reset.
#[derive(Clone)]
pub struct Identity {
    signing: SigningKey,
    peer_id: String,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("peer_id", &self.peer_id)
            .finish()
    }
}

impl Identity {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        Self::from_seed(SigningKey::generate(&mut OsRng).to_bytes())
    }

    /// Rebuild an identity from its signing-key seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&seed);
        let peer_id = peer_id_from_public_key(&signing.verifying_key().to_bytes());
        Self { signing, peer_id }
    }

    /// Load from disk. Fails with `IdentityNotFound` when the file is absent
    /// and `CorruptIdentity` when it cannot be parsed or is inconsistent.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::IdentityNotFound(path.display().to_string()))
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let file: IdentityFile = serde_json::from_str(&data)
            .map_err(|e| Error::CorruptIdentity(e.to_string()))?;

        let identity = Self::from_seed(file.sk);
        if identity.public_key_bytes() != file.pk {
            return Err(Error::CorruptIdentity(
                "public key does not match signing key".to_string(),
            ));
        }

        Ok(identity)
    }

    /// Persist to disk atomically (write temp, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = IdentityFile {
            sk: self.signing.to_bytes(),
            pk: self.public_key_bytes(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load an existing identity, or generate and persist one.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(identity) => Ok(identity),
            Err(Error::IdentityNotFound(_)) => {
                let identity = Self::generate();
                identity.save(path)?;
                Ok(identity)
            }
            Err(e) => Err(e),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn public_key_b64(&self) -> String {
        BASE64.encode(self.public_key_bytes())
    }

    /// Sign a message with the long-term key.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }
}

/// Verify `signature` over `message` under a raw identity public key.
pub fn verify_detached(public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<()> {
    let key = VerifyingKey::from_bytes(public_key).map_err(|e| Error::Crypto(e.to_string()))?;
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| Error::Crypto("invalid signature length".to_string()))?;
    key.verify(message, &Signature::from_bytes(&sig_bytes))
        .map_err(|e| Error::Crypto(e.to_string()))
}

/// Derive the PeerId for an identity public key:
/// `hex(sha256(public_key)[0..16])`.
pub fn peer_id_from_public_key(public_key: &[u8; 32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key);
    let hash = hasher.finalize();
    hash[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn test_peer_id_derivation() {
        let identity = Identity::generate();

        let mut hasher = Sha256::new();
        hasher.update(identity.public_key_bytes());
        let hash = hasher.finalize();
        let expected: String = hash[..16].iter().map(|b| format!("{:02x}", b)).collect();

        assert_eq!(identity.peer_id(), expected);
        assert_eq!(identity.peer_id().len(), 32);
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let identity = Identity::generate();
        let sig = identity.sign(b"hello world");
        assert!(verify_detached(&identity.public_key_bytes(), b"hello world", &sig).is_ok());
        assert!(verify_detached(&identity.public_key_bytes(), b"tampered", &sig).is_err());
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let identity = Identity::generate();
        let other = Identity::generate();
        let sig = identity.sign(b"message");
        assert!(verify_detached(&other.public_key_bytes(), b"message", &sig).is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let identity = Identity::generate();
        identity.save(&path).unwrap();

        let loaded = Identity::load(&path).unwrap();
        assert_eq!(loaded.peer_id(), identity.peer_id());
        assert_eq!(loaded.public_key_bytes(), identity.public_key_bytes());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Identity::load(&dir.path().join("missing.json"));
        assert!(matches!(result, Err(Error::IdentityNotFound(_))));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        std::fs::write(&path, "not json at all").unwrap();
        assert!(matches!(
            Identity::load(&path),
            Err(Error::CorruptIdentity(_))
        ));
    }

    #[test]
    fn test_load_rejects_short_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        std::fs::write(&path, r#"{"sk":"AQID","pk":"AQID"}"#).unwrap();
        assert!(matches!(
            Identity::load(&path),
            Err(Error::CorruptIdentity(_))
        ));
    }

    #[test]
    fn test_load_rejects_mismatched_keypair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let a = Identity::generate();
        let b = Identity::generate();
        let file = serde_json::json!({
            "sk": base64::engine::general_purpose::STANDARD.encode(a.signing.to_bytes()),
            "pk": b.public_key_b64(),
        });
        std::fs::write(&path, file.to_string()).unwrap();

        assert!(matches!(
            Identity::load(&path),
            Err(Error::CorruptIdentity(_))
        ));
    }

    #[test]
    fn test_load_or_generate_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let first = Identity::load_or_generate(&path).unwrap();
        let second = Identity::load_or_generate(&path).unwrap();
        assert_eq!(first.peer_id(), second.peer_id());
    }
}
