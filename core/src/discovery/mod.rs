//! LAN service discovery
//!
//! The contract is backend-agnostic: advertise a `{peer_id, name, port}`
//! record under the OpenClipboard service type, observe other instances, and
//! emit found/lost events. A peer observing its own PeerId suppresses the
//! event. The mDNS backend is the production path; [`MockDiscovery`] gives
//! tests and simulators a shared in-process registry.

mod mdns;

use std::net::IpAddr;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::Result;

pub use mdns::MdnsDiscovery;

/// A peer observed on the LAN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_id: String,
    pub name: String,
    /// `ip:port` of the peer's listener.
    pub addr: String,
}

/// The local advertisement.
#[derive(Debug, Clone)]
pub struct LocalAdvert {
    pub peer_id: String,
    pub name: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    PeerFound(PeerInfo),
    PeerLost(String),
}

/// Discovery backend.
pub trait Discovery: Send + Sync {
    /// Begin advertising `local` and observing peers. Returns the event
    /// stream. Calling again is idempotent: the advertisement is refreshed
    /// (embedders use this for network-change recovery) and a fresh stream
    /// replaces the previous one.
    fn start(&self, local: LocalAdvert) -> Result<mpsc::UnboundedReceiver<DiscoveryEvent>>;

    /// Stop advertising and observing.
    fn stop(&self);
}

type Subscriber = (String, mpsc::UnboundedSender<DiscoveryEvent>);

#[derive(Default)]
struct MockRegistry {
    peers: Vec<PeerInfo>,
    subscribers: Vec<Subscriber>,
}

/// In-process discovery backed by a registry shared between handles.
///
/// Each node under test holds its own handle (`clone_shared`) onto one
/// registry, mirroring how real peers share one LAN.
pub struct MockDiscovery {
    registry: std::sync::Arc<Mutex<MockRegistry>>,
}

impl MockDiscovery {
    pub fn new_shared() -> Self {
        Self {
            registry: std::sync::Arc::new(Mutex::new(MockRegistry::default())),
        }
    }

    /// Create a second handle onto the same shared registry.
    pub fn clone_shared(&self) -> Self {
        Self {
            registry: std::sync::Arc::clone(&self.registry),
        }
    }
}

impl Discovery for MockDiscovery {
    fn start(&self, local: LocalAdvert) -> Result<mpsc::UnboundedReceiver<DiscoveryEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry.lock().expect("mock discovery mutex poisoned");

        let info = PeerInfo {
            peer_id: local.peer_id.clone(),
            name: local.name.clone(),
            addr: format!("127.0.0.1:{}", local.port),
        };

        // Replay the registry to the new subscriber, suppressing self.
        for peer in &registry.peers {
            if peer.peer_id != local.peer_id {
                let _ = tx.send(DiscoveryEvent::PeerFound(peer.clone()));
            }
        }

        // Announce to everyone else.
        for (sub_id, sub_tx) in &registry.subscribers {
            if *sub_id != local.peer_id {
                let _ = sub_tx.send(DiscoveryEvent::PeerFound(info.clone()));
            }
        }

        registry.peers.retain(|p| p.peer_id != local.peer_id);
        registry.peers.push(info);
        registry
            .subscribers
            .retain(|(id, sub_tx)| *id != local.peer_id && !sub_tx.is_closed());
        registry.subscribers.push((local.peer_id, tx));

        Ok(rx)
    }

    fn stop(&self) {
        let mut registry = self.registry.lock().expect("mock discovery mutex poisoned");
        // Without a per-handle id we cannot tell which advert was ours, so a
        // stopped handle simply stops receiving; adverts expire when their
        // subscriber channel closes.
        registry.subscribers.retain(|(_, tx)| !tx.is_closed());
    }
}

/// Non-loopback local interface addresses, for pairing payloads.
pub fn get_local_ips() -> Vec<IpAddr> {
    let mut ips = Vec::new();

    if let Ok(interfaces) = get_if_addrs::get_if_addrs() {
        for iface in interfaces {
            if !iface.is_loopback() {
                ips.push(iface.ip());
            }
        }
    }

    ips
}
