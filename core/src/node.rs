//! Node façade: the single top-level object platform clients embed.
//!
//! A `Node` stitches identity, trust, sessions, discovery, the mesh engine,
//! and history together behind the operations the embedder calls. Callbacks
//! to the embedder are serialised through one dispatcher task.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::RngCore;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::clipboard::Clipboard;
use crate::discovery::{get_local_ips, Discovery, DiscoveryEvent, LocalAdvert, MdnsDiscovery, PeerInfo};
use crate::events::{DiscoverySink, EventSink, NodeEvent};
use crate::history::{HistoryEntry, HistoryStore};
use crate::identity::{peer_id_from_public_key, Identity};
use crate::mesh::MeshEngine;
use crate::protocol::constants::{DEFAULT_HISTORY_LIMIT, DEFAULT_POLL_INTERVAL_MS, HANDSHAKE_TIMEOUT_SECS};
use crate::protocol::{pairing_init, PairingPayload};
use crate::sync::listener::{self, dial, Listener};
use crate::sync::session::{establish_initiator, QrPairingGate};
use crate::trust::{TrustRecord, TrustStore};
use crate::{Error, Result};

/// A peer currently visible on the LAN, with the trust overlay applied.
#[derive(Debug, Clone)]
pub struct NearbyPeer {
    pub peer_id: String,
    pub name: String,
    pub addr: String,
    pub is_trusted: bool,
}

/// The embeddable OpenClipboard node.
pub struct Node {
    identity: Identity,
    trust: Arc<TrustStore>,
    history: Arc<HistoryStore>,
    gate: Arc<QrPairingGate>,

    engine: Mutex<Option<Arc<MeshEngine>>>,
    discovery_backend: Mutex<Option<Arc<dyn Discovery>>>,
    nearby: Arc<Mutex<HashMap<String, PeerInfo>>>,
    listen_port: Mutex<Option<u16>>,

    stop_tx: watch::Sender<bool>,
    aux_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Load or generate the identity at `id_path` and open the trust store
    /// at `trust_path`.
    pub fn new(id_path: &Path, trust_path: &Path) -> Result<Self> {
        let identity = Identity::load_or_generate(id_path)?;
        let trust = Arc::new(TrustStore::open(trust_path.to_path_buf())?);
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            identity,
            trust,
            history: Arc::new(HistoryStore::with_limit(DEFAULT_HISTORY_LIMIT)),
            gate: Arc::new(QrPairingGate::new()),
            engine: Mutex::new(None),
            discovery_backend: Mutex::new(None),
            nearby: Arc::new(Mutex::new(HashMap::new())),
            listen_port: Mutex::new(None),
            stop_tx,
            aux_tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn peer_id(&self) -> &str {
        self.identity.peer_id()
    }

    pub fn public_key_b64(&self) -> String {
        self.identity.public_key_b64()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.identity.public_key_bytes()
    }

    pub fn trust_store(&self) -> &TrustStore {
        &self.trust
    }

    /// Replace the discovery backend. Must be called before any `start_*`
    /// operation; tests and simulators use this to share an in-process LAN.
    pub fn set_discovery_backend(&self, backend: Arc<dyn Discovery>) {
        *self
            .discovery_backend
            .lock()
            .expect("discovery backend mutex poisoned") = Some(backend);
    }

    /// Start accepting inbound sessions on `port` (0 picks an ephemeral
    /// port). Returns the bound port.
    pub async fn start_listener(&self, port: u16, sink: Arc<dyn EventSink>) -> Result<u16> {
        let engine = self.ensure_engine(local_device_name(), sink);
        let listener = Listener::bind(port).await?;
        let bound = listener.port();
        *self.listen_port.lock().expect("listen port mutex poisoned") = Some(bound);
        engine.start_accept_loop(listener);
        Ok(bound)
    }

    /// Advertise `name` and observe peers. Safe to call repeatedly; each
    /// call refreshes the advertisement (network-change recovery).
    pub fn start_discovery(&self, name: &str, sink: Arc<dyn DiscoverySink>) -> Result<()> {
        self.run_discovery(name, Some(sink))
    }

    /// Start listener, discovery, and the clipboard mesh in one call.
    ///
    /// A bind collision is reported through the event sink rather than
    /// failing the whole start: the mesh can still dial out.
    pub async fn start_mesh(
        &self,
        port: u16,
        device_name: &str,
        sink: Arc<dyn EventSink>,
        clipboard: Arc<dyn Clipboard>,
        poll_interval_ms: Option<u64>,
    ) -> Result<()> {
        let engine = self.ensure_engine(device_name.to_string(), sink);

        match Listener::bind(port).await {
            Ok(listener) => {
                *self.listen_port.lock().expect("listen port mutex poisoned") =
                    Some(listener.port());
                engine.start_accept_loop(listener);
            }
            Err(e @ Error::AddressInUse(_)) => {
                tracing::warn!("{}", e);
                engine.report_error(e.to_string());
            }
            Err(e) => return Err(e),
        }

        self.run_discovery(device_name, None)?;

        let poll_interval =
            Duration::from_millis(poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS));
        engine.start_poll_loop(clipboard, poll_interval);

        Ok(())
    }

    /// Opportunistic one-shot: dial, handshake, send one CLIP_TEXT, close.
    pub async fn connect_and_send_text(&self, addr: &str, text: &str) -> Result<()> {
        let name = self
            .engine
            .lock()
            .expect("engine mutex poisoned")
            .as_ref()
            .map(|e| e.device_name().to_string())
            .unwrap_or_else(local_device_name);

        let mut stop_rx = self.stop_tx.subscribe();
        tokio::select! {
            _ = stop_rx.changed() => Err(Error::Cancelled),
            result = listener::connect_and_send_text(addr, text, &self.identity, &self.trust, &name) => {
                result.map(|_| ())
            }
        }
    }

    /// Broadcast to every connected trusted peer, best-effort.
    pub fn send_clipboard_text(&self, text: &str) {
        if let Some(engine) = self.engine.lock().expect("engine mutex poisoned").as_ref() {
            engine.broadcast(text);
        }
    }

    /// Open the one-shot auto-trust window for QR pairing.
    pub fn enable_qr_pairing_listener(&self) {
        self.gate.enable();
    }

    /// Close the auto-trust window.
    pub fn disable_qr_pairing_listener(&self) {
        self.gate.disable();
    }

    /// Build a pairing payload for this node with a fresh nonce, advertising
    /// our LAN addresses.
    pub fn create_pairing_payload(&self, name: &str) -> PairingPayload {
        let mut nonce = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let port = self
            .listen_port
            .lock()
            .expect("listen port mutex poisoned")
            .unwrap_or(crate::protocol::constants::DEFAULT_PORT);

        let addrs = get_local_ips().iter().map(|ip| ip.to_string()).collect();
        pairing_init(&self.identity, name, port, nonce, addrs)
    }

    /// Scan-side QR pairing: parse the payload, trust the displayed peer,
    /// and dial its advertised address. With the remote auto-trust window
    /// open, the handshake completes symmetric trust.
    pub async fn pair_via_qr(&self, qr: &str) -> Result<()> {
        let payload = PairingPayload::from_qr_string(qr)?;

        if peer_id_from_public_key(&payload.identity_pk) != payload.peer_id {
            return Err(Error::MalformedPairing(
                "peer id does not derive from identity key".to_string(),
            ));
        }

        self.trust.add_record(TrustRecord::new(
            payload.peer_id.clone(),
            payload.identity_pk.to_vec(),
            payload.name.clone(),
        ))?;

        let name = self
            .engine
            .lock()
            .expect("engine mutex poisoned")
            .as_ref()
            .map(|e| e.device_name().to_string())
            .unwrap_or_else(local_device_name);

        let mut last_err = Error::Network("no addresses advertised".to_string());
        for candidate in payload.dial_candidates() {
            match self.dial_and_establish(&candidate, &payload.peer_id, &name).await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    async fn dial_and_establish(&self, addr: &str, peer_id: &str, name: &str) -> Result<()> {
        let stream = dial(addr).await?;
        let session = tokio::time::timeout(
            Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
            establish_initiator(stream, &self.identity, &self.trust, name, Some(peer_id)),
        )
        .await
        .map_err(|_| Error::Timeout(format!("handshake with {}", addr)))??;

        // With the mesh running, keep the session; otherwise pairing is done
        // and the connection can drop.
        if let Some(engine) = self.engine.lock().expect("engine mutex poisoned").as_ref() {
            engine.adopt_session(session);
        }
        Ok(())
    }

    /// Recent clipboard history, newest first.
    pub fn get_clipboard_history(&self, limit: usize) -> Vec<HistoryEntry> {
        self.history.list(limit)
    }

    /// Recent clipboard history from one source peer, newest first.
    pub fn get_clipboard_history_for_peer(&self, source_name: &str, limit: usize) -> Vec<HistoryEntry> {
        self.history.list_for_peer(source_name, limit)
    }

    /// Case-insensitive substring search over history.
    pub fn search_clipboard_history(
        &self,
        needle: &str,
        source_name: Option<&str>,
        limit: usize,
    ) -> Vec<HistoryEntry> {
        self.history.search(needle, source_name, limit)
    }

    /// Change the history capacity (clamped to the supported range).
    pub fn set_history_limit(&self, limit: usize) {
        self.history.set_limit(limit);
    }

    /// Write a history entry back to the clipboard without broadcasting.
    ///
    /// The text is marked in the echo-suppression FIFO first so the poll
    /// loop does not re-broadcast it.
    pub fn recall_from_history(&self, entry_id: &str) -> Result<()> {
        let entry = self
            .history
            .find(entry_id)
            .ok_or_else(|| Error::NotFound(format!("history entry {}", entry_id)))?;

        let engine = self
            .engine
            .lock()
            .expect("engine mutex poisoned")
            .as_ref()
            .cloned()
            .ok_or_else(|| Error::Clipboard("mesh is not running".to_string()))?;

        engine.note_remote_write(&entry.content);
        engine.write_clipboard(&entry.content)
    }

    /// Peers currently visible on the LAN, with the trust flag applied.
    pub fn list_nearby(&self) -> Vec<NearbyPeer> {
        let nearby = self.nearby.lock().expect("nearby table mutex poisoned");
        nearby
            .values()
            .map(|p| NearbyPeer {
                peer_id: p.peer_id.clone(),
                name: p.name.clone(),
                addr: p.addr.clone(),
                is_trusted: self.trust.is_trusted(&p.peer_id),
            })
            .collect()
    }

    /// PeerIds with a live session right now.
    pub fn connected_peers(&self) -> Vec<String> {
        self.engine
            .lock()
            .expect("engine mutex poisoned")
            .as_ref()
            .map(|e| e.connected_peers())
            .unwrap_or_default()
    }

    /// Stop listener, discovery, and mesh; drain all session tasks.
    /// Idempotent.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);

        if let Some(backend) = self
            .discovery_backend
            .lock()
            .expect("discovery backend mutex poisoned")
            .as_ref()
        {
            backend.stop();
        }

        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self.aux_tasks.lock().expect("aux task mutex poisoned");
            tasks.drain(..).collect()
        };
        for task in tasks {
            task.abort();
            let _ = task.await;
        }

        let engine = self.engine.lock().expect("engine mutex poisoned").clone();
        if let Some(engine) = engine {
            engine.stop().await;
        }
    }

    fn ensure_engine(&self, device_name: String, sink: Arc<dyn EventSink>) -> Arc<MeshEngine> {
        let mut slot = self.engine.lock().expect("engine mutex poisoned");
        if let Some(engine) = slot.as_ref() {
            return Arc::clone(engine);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<NodeEvent>();
        let engine = MeshEngine::new(
            self.identity.clone(),
            device_name,
            Arc::clone(&self.trust),
            Arc::clone(&self.history),
            Arc::clone(&self.gate),
            tx,
        );

        // Single dispatcher: callbacks reach the sink in channel order.
        let dispatcher = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                event.dispatch(&*sink);
            }
        });
        self.aux_tasks
            .lock()
            .expect("aux task mutex poisoned")
            .push(dispatcher);

        *slot = Some(Arc::clone(&engine));
        engine
    }

    fn run_discovery(&self, name: &str, sink: Option<Arc<dyn DiscoverySink>>) -> Result<()> {
        let backend = {
            let mut slot = self
                .discovery_backend
                .lock()
                .expect("discovery backend mutex poisoned");
            match slot.as_ref() {
                Some(backend) => Arc::clone(backend),
                None => {
                    let backend: Arc<dyn Discovery> = Arc::new(MdnsDiscovery::new()?);
                    *slot = Some(Arc::clone(&backend));
                    backend
                }
            }
        };

        let port = self
            .listen_port
            .lock()
            .expect("listen port mutex poisoned")
            .unwrap_or(crate::protocol::constants::DEFAULT_PORT);

        let mut rx = backend.start(LocalAdvert {
            peer_id: self.identity.peer_id().to_string(),
            name: name.to_string(),
            port,
        })?;

        let nearby = Arc::clone(&self.nearby);
        let engine = self.engine.lock().expect("engine mutex poisoned").clone();
        let mut stop_rx = self.stop_tx.subscribe();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        match event {
                            DiscoveryEvent::PeerFound(peer) => {
                                nearby
                                    .lock()
                                    .expect("nearby table mutex poisoned")
                                    .insert(peer.peer_id.clone(), peer.clone());
                                if let Some(sink) = sink.as_ref() {
                                    sink.on_peer_discovered(
                                        peer.peer_id.clone(),
                                        peer.name.clone(),
                                        peer.addr.clone(),
                                    );
                                }
                                if let Some(engine) = engine.as_ref() {
                                    engine.ensure_dialing(peer);
                                }
                            }
                            DiscoveryEvent::PeerLost(peer_id) => {
                                nearby
                                    .lock()
                                    .expect("nearby table mutex poisoned")
                                    .remove(&peer_id);
                                if let Some(sink) = sink.as_ref() {
                                    sink.on_peer_lost(peer_id);
                                }
                            }
                        }
                    }
                }
            }
        });
        self.aux_tasks
            .lock()
            .expect("aux task mutex poisoned")
            .push(task);

        Ok(())
    }
}

/// Default device name: the machine hostname.
pub fn local_device_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "openclipboard-device".to_string())
}
