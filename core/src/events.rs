//! Embedder-facing callback interfaces.
//!
//! All core tasks funnel their callbacks through one internal channel, so a
//! sink sees events in the order the core serialised them and never needs to
//! be re-entrant.

/// Callbacks for session and clipboard activity.
pub trait EventSink: Send + Sync {
    fn on_clipboard_text(&self, peer_id: String, text: String, ts_ms: u64);
    /// Reserved for small-blob delivery.
    fn on_file_received(&self, _peer_id: String, _name: String, _data_path: String) {}
    fn on_peer_connected(&self, peer_id: String);
    fn on_peer_disconnected(&self, peer_id: String);
    fn on_error(&self, message: String);
}

/// Callbacks for LAN discovery.
pub trait DiscoverySink: Send + Sync {
    fn on_peer_discovered(&self, peer_id: String, name: String, addr: String);
    fn on_peer_lost(&self, peer_id: String);
}

/// Event as serialised through the internal channel before reaching a sink.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    ClipboardText {
        peer_id: String,
        text: String,
        ts_ms: u64,
    },
    PeerConnected {
        peer_id: String,
    },
    PeerDisconnected {
        peer_id: String,
    },
    Error {
        message: String,
    },
}

impl NodeEvent {
    /// Deliver this event to a sink.
    pub fn dispatch(self, sink: &dyn EventSink) {
        match self {
            NodeEvent::ClipboardText {
                peer_id,
                text,
                ts_ms,
            } => sink.on_clipboard_text(peer_id, text, ts_ms),
            NodeEvent::PeerConnected { peer_id } => sink.on_peer_connected(peer_id),
            NodeEvent::PeerDisconnected { peer_id } => sink.on_peer_disconnected(peer_id),
            NodeEvent::Error { message } => sink.on_error(message),
        }
    }
}
