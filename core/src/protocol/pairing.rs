//! Pairing payloads, confirmation codes, and the explicit two-string flow.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine as _};
use sha2::{Digest, Sha256};

use crate::identity::Identity;
use crate::protocol::constants::{PAIRING_URL_SCHEME, PAIRING_VERSION};
use crate::trust::TrustRecord;
use crate::{Error, Result};

/// Record exchanged once per peer pair to bootstrap mutual trust.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingPayload {
    pub version: u8,
    pub peer_id: String,
    pub name: String,
    pub identity_pk: [u8; 32],
    pub lan_port: u16,
    pub nonce: [u8; 32],
    pub lan_addrs: Vec<String>,
}

impl PairingPayload {
    pub fn new(
        peer_id: impl Into<String>,
        name: impl Into<String>,
        identity_pk: [u8; 32],
        lan_port: u16,
        nonce: [u8; 32],
        lan_addrs: Vec<String>,
    ) -> Self {
        Self {
            version: PAIRING_VERSION,
            peer_id: peer_id.into(),
            name: name.into(),
            identity_pk,
            lan_port,
            nonce,
            lan_addrs,
        }
    }

    /// Encode as a URL for QR display.
    pub fn to_qr_string(&self) -> String {
        let mut url = format!(
            "{}v={}&pid={}&n={}&pk={}&p={}&nonce={}",
            PAIRING_URL_SCHEME,
            self.version,
            self.peer_id,
            BASE64URL.encode(self.name.as_bytes()),
            BASE64URL.encode(self.identity_pk),
            self.lan_port,
            BASE64URL.encode(self.nonce),
        );
        if !self.lan_addrs.is_empty() {
            url.push_str("&a=");
            url.push_str(&self.lan_addrs.join(","));
        }
        url
    }

    /// Parse from a scanned QR string.
    ///
    /// Leading/trailing whitespace is tolerated; unknown query keys are
    /// ignored.
    pub fn from_qr_string(s: &str) -> Result<Self> {
        let s = s.trim();
        let query = s
            .strip_prefix(PAIRING_URL_SCHEME)
            .ok_or_else(|| Error::MalformedPairing("unknown scheme".to_string()))?;

        let mut version = None;
        let mut peer_id = None;
        let mut name = None;
        let mut identity_pk = None;
        let mut lan_port = None;
        let mut nonce = None;
        let mut lan_addrs = Vec::new();

        for part in query.split('&') {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::MalformedPairing(format!("bad query param: {}", part)))?;

            match key {
                "v" => {
                    version = Some(
                        value
                            .parse::<u8>()
                            .map_err(|_| Error::MalformedPairing("bad version".to_string()))?,
                    )
                }
                "pid" => peer_id = Some(value.to_string()),
                "n" => {
                    let bytes = BASE64URL
                        .decode(value)
                        .map_err(|_| Error::MalformedPairing("bad name encoding".to_string()))?;
                    name = Some(String::from_utf8(bytes).map_err(|_| {
                        Error::MalformedPairing("name is not valid UTF-8".to_string())
                    })?);
                }
                "pk" => identity_pk = Some(decode_32(value, "pk")?),
                "p" => {
                    lan_port = Some(
                        value
                            .parse::<u16>()
                            .map_err(|_| Error::MalformedPairing("bad port".to_string()))?,
                    )
                }
                "nonce" => nonce = Some(decode_32(value, "nonce")?),
                "a" => {
                    lan_addrs = value
                        .split(',')
                        .filter(|a| !a.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                _ => {}
            }
        }

        let version =
            version.ok_or_else(|| Error::MalformedPairing("missing version".to_string()))?;
        if version != PAIRING_VERSION {
            return Err(Error::MalformedPairing(format!(
                "unsupported version {}",
                version
            )));
        }

        Ok(Self {
            version,
            peer_id: peer_id
                .ok_or_else(|| Error::MalformedPairing("missing peer id".to_string()))?,
            name: name.ok_or_else(|| Error::MalformedPairing("missing name".to_string()))?,
            identity_pk: identity_pk
                .ok_or_else(|| Error::MalformedPairing("missing identity key".to_string()))?,
            lan_port: lan_port
                .ok_or_else(|| Error::MalformedPairing("missing port".to_string()))?,
            nonce: nonce.ok_or_else(|| Error::MalformedPairing("missing nonce".to_string()))?,
            lan_addrs,
        })
    }

    /// Render the payload as a QR code SVG for embedders with a display.
    pub fn to_qr_svg(&self) -> Result<String> {
        use qrcode::{render::svg, QrCode};

        let url = self.to_qr_string();
        let code = QrCode::new(url.as_bytes())
            .map_err(|e| Error::Crypto(format!("QR generation failed: {}", e)))?;

        let svg = code
            .render::<svg::Color>()
            .min_dimensions(200, 200)
            .build();

        Ok(svg)
    }

    /// Addresses to try when dialing the displayed peer: each advertised
    /// address (joined with `lan_port` when bare) in order.
    pub fn dial_candidates(&self) -> Vec<String> {
        self.lan_addrs
            .iter()
            .map(|a| {
                if a.parse::<std::net::SocketAddr>().is_ok() {
                    a.clone()
                } else if let Ok(ip) = a.parse::<std::net::IpAddr>() {
                    std::net::SocketAddr::new(ip, self.lan_port).to_string()
                } else {
                    format!("{}:{}", a, self.lan_port)
                }
            })
            .collect()
    }

    fn trust_record(&self) -> TrustRecord {
        TrustRecord::new(
            self.peer_id.clone(),
            self.identity_pk.to_vec(),
            self.name.clone(),
        )
    }
}

fn decode_32(value: &str, field: &str) -> Result<[u8; 32]> {
    let bytes = BASE64URL
        .decode(value)
        .map_err(|_| Error::MalformedPairing(format!("bad {} encoding", field)))?;
    bytes
        .try_into()
        .map_err(|_| Error::MalformedPairing(format!("{} must be exactly 32 bytes", field)))
}

/// Derive the 6-digit confirmation code shown to both users.
///
/// `code = decimal_truncate6(SHA256(nonce || initiator_peer_id || responder_peer_id))`
/// where `decimal_truncate6` takes the first four hash bytes as a big-endian
/// u32 modulo 1 000 000, zero-padded.
pub fn derive_confirmation_code(nonce: &[u8], initiator_id: &str, responder_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(initiator_id.as_bytes());
    hasher.update(responder_id.as_bytes());
    let hash = hasher.finalize();

    let n = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
    format!("{:06}", n % 1_000_000)
}

/// Build the initiator payload for the explicit two-string flow.
pub fn pairing_init(
    identity: &Identity,
    name: impl Into<String>,
    lan_port: u16,
    nonce: [u8; 32],
    lan_addrs: Vec<String>,
) -> PairingPayload {
    PairingPayload::new(
        identity.peer_id(),
        name,
        identity.public_key_bytes(),
        lan_port,
        nonce,
        lan_addrs,
    )
}

/// Respond to an initiator QR string. Returns the responder payload (re-using
/// the initiator's nonce) and the confirmation code both users should see.
pub fn pairing_respond(
    init_qr: &str,
    identity: &Identity,
    name: impl Into<String>,
    lan_port: u16,
    lan_addrs: Vec<String>,
) -> Result<(PairingPayload, String)> {
    let init = PairingPayload::from_qr_string(init_qr)?;
    let resp = PairingPayload::new(
        identity.peer_id(),
        name,
        identity.public_key_bytes(),
        lan_port,
        init.nonce,
        lan_addrs,
    );
    let code = derive_confirmation_code(&init.nonce, &init.peer_id, &resp.peer_id);
    Ok((resp, code))
}

/// Finalize the exchange on the initiator side. Validates the nonce and
/// returns the confirmation code plus the two trust records to write once
/// the user confirms the codes match.
pub fn pairing_finalize(init_qr: &str, resp_qr: &str) -> Result<(String, [TrustRecord; 2])> {
    let init = PairingPayload::from_qr_string(init_qr)?;
    let resp = PairingPayload::from_qr_string(resp_qr)?;

    if init.nonce != resp.nonce {
        return Err(Error::NonceMismatch);
    }

    let code = derive_confirmation_code(&init.nonce, &init.peer_id, &resp.peer_id);
    Ok((code, [init.trust_record(), resp.trust_record()]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> PairingPayload {
        PairingPayload::new(
            "00112233445566778899aabbccddeeff",
            "Alice's Mac",
            [0x01; 32],
            18455,
            [0x07; 32],
            vec!["192.168.1.10:18455".to_string()],
        )
    }

    #[test]
    fn test_qr_url_roundtrip() {
        let payload = sample_payload();
        let url = payload.to_qr_string();
        assert!(url.starts_with("openclipboard://pair?v=1&"));

        let parsed = PairingPayload::from_qr_string(&url).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_parse_tolerates_whitespace() {
        let payload = sample_payload();
        let padded = format!("  {}\n\n", payload.to_qr_string());
        assert_eq!(PairingPayload::from_qr_string(&padded).unwrap(), payload);
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        assert!(matches!(
            PairingPayload::from_qr_string("otherapp://pair?v=1"),
            Err(Error::MalformedPairing(_))
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_version() {
        let url = sample_payload().to_qr_string().replace("v=1", "v=2");
        assert!(matches!(
            PairingPayload::from_qr_string(&url),
            Err(Error::MalformedPairing(_))
        ));
    }

    #[test]
    fn test_parse_rejects_missing_nonce() {
        let url = "openclipboard://pair?v=1&pid=ab&n=QWxpY2U&pk=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA&p=18455";
        assert!(matches!(
            PairingPayload::from_qr_string(url),
            Err(Error::MalformedPairing(_))
        ));
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let url = format!("{}&future=xyz", sample_payload().to_qr_string());
        assert!(PairingPayload::from_qr_string(&url).is_ok());
    }

    #[test]
    fn test_empty_addr_list_omitted() {
        let mut payload = sample_payload();
        payload.lan_addrs.clear();
        let url = payload.to_qr_string();
        assert!(!url.contains("&a="));
        assert_eq!(PairingPayload::from_qr_string(&url).unwrap(), payload);
    }

    #[test]
    fn test_confirmation_code_shape() {
        let code = derive_confirmation_code(&[42u8; 32], "peer-a", "peer-b");
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(code, derive_confirmation_code(&[42u8; 32], "peer-a", "peer-b"));
    }

    #[test]
    fn test_confirmation_code_depends_on_inputs() {
        let nonce = [42u8; 32];
        let c1 = derive_confirmation_code(&nonce, "peer-a", "peer-b");
        let c2 = derive_confirmation_code(&nonce, "peer-a", "peer-c");
        let c3 = derive_confirmation_code(&[43u8; 32], "peer-a", "peer-b");
        assert_ne!(c1, c2);
        assert_ne!(c1, c3);
    }

    #[test]
    fn test_two_string_flow() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let nonce = [0x07; 32];

        let init = pairing_init(&alice, "Alice", 18455, nonce, Vec::new());
        let init_qr = init.to_qr_string();

        let (resp, code_b) =
            pairing_respond(&init_qr, &bob, "Bob", 18455, Vec::new()).unwrap();
        assert_eq!(resp.nonce, nonce);

        let (code_a, records) = pairing_finalize(&init_qr, &resp.to_qr_string()).unwrap();
        assert_eq!(code_a, code_b);

        let ids: Vec<_> = records.iter().map(|r| r.peer_id.clone()).collect();
        assert!(ids.contains(&alice.peer_id().to_string()));
        assert!(ids.contains(&bob.peer_id().to_string()));
    }

    #[test]
    fn test_finalize_rejects_nonce_mismatch() {
        let alice = Identity::generate();
        let bob = Identity::generate();

        let init_qr = pairing_init(&alice, "Alice", 1, [1u8; 32], Vec::new()).to_qr_string();
        let stray_qr = pairing_init(&bob, "Bob", 2, [2u8; 32], Vec::new()).to_qr_string();

        assert!(matches!(
            pairing_finalize(&init_qr, &stray_qr),
            Err(Error::NonceMismatch)
        ));
    }
}
