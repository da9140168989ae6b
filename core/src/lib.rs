//! OpenClipboard Core - Shared node runtime for cross-device clipboard sync
//!
//! This library provides the node runtime every platform client embeds:
//! long-term identity and trust, an authenticated framed wire protocol over
//! TCP, LAN discovery, explicit and QR pairing, a clipboard mesh with echo
//! suppression, and an in-memory clipboard history.

pub mod clipboard;
pub mod crypto;
pub mod discovery;
pub mod events;
pub mod history;
pub mod identity;
pub mod mesh;
pub mod node;
pub mod protocol;
pub mod sync;
pub mod trust;

mod error;

pub use error::{Error, Result};

// Re-export the embedder-facing surface for convenience.
pub use clipboard::{Clipboard, MockClipboard, SystemClipboard};
pub use discovery::{Discovery, MdnsDiscovery, MockDiscovery};
pub use events::{DiscoverySink, EventSink};
pub use history::HistoryEntry;
pub use identity::Identity;
pub use mesh::EchoSuppressor;
pub use node::{local_device_name, NearbyPeer, Node};
pub use protocol::{
    derive_confirmation_code, pairing_finalize, pairing_init, pairing_respond, PairingPayload,
};
pub use trust::{TrustRecord, TrustStore};
