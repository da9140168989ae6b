//! Pairing flows: the explicit two-string exchange and QR auto-trust over a
//! real loopback connection.

use std::sync::Arc;
use std::time::Duration;

use openclipboard_core::{
    derive_confirmation_code, pairing_finalize, EventSink, Node, PairingPayload,
};
use tokio::sync::mpsc;

struct QuietSink {
    tx: mpsc::UnboundedSender<String>,
}

impl EventSink for QuietSink {
    fn on_clipboard_text(&self, _peer_id: String, _text: String, _ts_ms: u64) {}
    fn on_peer_connected(&self, peer_id: String) {
        let _ = self.tx.send(peer_id);
    }
    fn on_peer_disconnected(&self, _peer_id: String) {}
    fn on_error(&self, message: String) {
        eprintln!("sink error: {}", message);
    }
}

#[test]
fn two_string_round_trip() {
    let init = PairingPayload::new("peerA", "Alice", [0x01; 32], 18455, [0x07; 32], Vec::new());
    let resp = PairingPayload::new("peerB", "Bob", [0x02; 32], 18455, init.nonce, Vec::new());

    // The responder echoes the initiator's nonce.
    assert_eq!(resp.nonce, init.nonce);

    let (code, records) =
        pairing_finalize(&init.to_qr_string(), &resp.to_qr_string()).unwrap();
    assert_eq!(code, derive_confirmation_code(&init.nonce, "peerA", "peerB"));
    assert_eq!(records[0].peer_id, "peerA");
    assert_eq!(records[1].peer_id, "peerB");
}

#[test]
fn qr_parse_tolerates_padding() {
    let payload = PairingPayload::new("peerA", "Alice", [0x01; 32], 18455, [0x07; 32], Vec::new());
    let padded = format!("  {}\n\n", payload.to_qr_string());
    assert_eq!(PairingPayload::from_qr_string(&padded).unwrap(), payload);
}

#[tokio::test(flavor = "multi_thread")]
async fn qr_auto_trust_completes_symmetric_trust() {
    let dir = tempfile::tempdir().unwrap();

    let alice = Node::new(
        &dir.path().join("alice_identity.json"),
        &dir.path().join("alice_trust.json"),
    )
    .unwrap();
    let bob = Node::new(
        &dir.path().join("bob_identity.json"),
        &dir.path().join("bob_trust.json"),
    )
    .unwrap();

    let (tx, mut connected_rx) = mpsc::unbounded_channel();
    let port = alice
        .start_listener(0, Arc::new(QuietSink { tx }))
        .await
        .unwrap();

    // Alice displays a pairing code and opens the auto-trust window.
    alice.enable_qr_pairing_listener();
    let displayed = PairingPayload::new(
        alice.peer_id(),
        "Alice",
        alice.public_key_bytes(),
        port,
        [9u8; 32],
        vec!["127.0.0.1".to_string()],
    );

    // Bob scans it: writes Alice to his store and dials her.
    bob.pair_via_qr(&displayed.to_qr_string()).await.unwrap();

    assert!(bob.trust_store().is_trusted(alice.peer_id()));
    let record = bob.trust_store().get(alice.peer_id()).unwrap();
    assert_eq!(record.display_name, "Alice");

    // Alice's side auto-trusted Bob before reporting the session.
    let connected = tokio::time::timeout(Duration::from_secs(5), connected_rx.recv())
        .await
        .expect("no inbound session on Alice")
        .unwrap();
    assert_eq!(connected, bob.peer_id());
    assert!(alice.trust_store().is_trusted(bob.peer_id()));

    // The window is one-shot.
    let eve = Node::new(
        &dir.path().join("eve_identity.json"),
        &dir.path().join("eve_trust.json"),
    )
    .unwrap();
    eve.trust_store()
        .add(alice.peer_id(), &alice.public_key_b64(), "Alice")
        .unwrap();
    let result = eve
        .connect_and_send_text(&format!("127.0.0.1:{}", port), "intrusion")
        .await;
    assert!(result.is_err());
    assert!(!alice.trust_store().is_trusted(eve.peer_id()));

    alice.stop().await;
    bob.stop().await;
    eve.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn pair_via_qr_rejects_malformed_payload() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::new(
        &dir.path().join("identity.json"),
        &dir.path().join("trust.json"),
    )
    .unwrap();

    assert!(node.pair_via_qr("not a pairing url").await.is_err());
    assert!(node
        .pair_via_qr("openclipboard://pair?v=1&pid=onlyid")
        .await
        .is_err());
}
