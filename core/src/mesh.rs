//! Mesh engine: clipboard poll loop, connection set, fanout, echo suppression.
//!
//! The engine owns the connected-peer table and every session task. Session
//! tasks get a command channel back into their peer entry and a stop signal;
//! they never hold the engine. All embedder callbacks funnel through one
//! event channel so the sink sees them in the order the core serialised them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::clipboard::Clipboard;
use crate::discovery::PeerInfo;
use crate::events::NodeEvent;
use crate::history::HistoryStore;
use crate::identity::Identity;
use crate::protocol::constants::{
    BACKOFF_INITIAL_MS, BACKOFF_MAX_MS, ECHO_SUPPRESSOR_CAPACITY, HANDSHAKE_TIMEOUT_SECS,
    PING_INTERVAL_SECS, PONG_TIMEOUT_SECS,
};
use crate::protocol::{clip_text, keepalive_token, MsgType};
use crate::sync::listener::{dial, Listener};
use crate::sync::session::{
    establish_initiator, establish_responder, EstablishedSession, QrPairingGate,
};
use crate::trust::TrustStore;
use crate::{Error, Result};

/// Bounded FIFO of recently remotely-written texts.
///
/// Consulted before broadcasting a local clipboard change so a remote write
/// observed by the poll loop is not reflected back. The bound keeps the
/// suppressor from permanently blinding the mesh when the same text is
/// legitimately copied again much later.
#[derive(Debug)]
pub struct EchoSuppressor {
    cap: usize,
    recent: VecDeque<String>,
}

impl EchoSuppressor {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            recent: VecDeque::new(),
        }
    }

    /// Note a text just written due to a remote update. Consecutive
    /// duplicates are collapsed.
    pub fn note_remote_write(&mut self, text: &str) {
        if self.recent.back().is_some_and(|t| t == text) {
            return;
        }
        self.recent.push_back(text.to_string());
        while self.recent.len() > self.cap {
            self.recent.pop_front();
        }
    }

    /// True iff `text` is currently in the FIFO.
    pub fn should_ignore_local(&self, text: &str) -> bool {
        self.recent.iter().any(|t| t == text)
    }
}

/// Per-address exponential reconnect backoff.
#[derive(Debug, Clone)]
struct Backoff {
    cur_ms: u64,
}

impl Backoff {
    fn new() -> Self {
        Self {
            cur_ms: BACKOFF_INITIAL_MS,
        }
    }

    fn reset(&mut self) {
        self.cur_ms = BACKOFF_INITIAL_MS;
    }

    fn next_delay(&mut self) -> Duration {
        let d = Duration::from_millis(self.cur_ms);
        self.cur_ms = (self.cur_ms * 2).min(BACKOFF_MAX_MS);
        d
    }
}

enum SessionCommand {
    SendText(String),
}

struct PeerHandle {
    outbound_tx: mpsc::Sender<SessionCommand>,
}

/// The mesh: all open sessions with trusted peers plus the poll loop that
/// feeds them.
pub struct MeshEngine {
    identity: Identity,
    device_name: String,
    trust: Arc<TrustStore>,
    history: Arc<HistoryStore>,
    gate: Arc<QrPairingGate>,
    events: mpsc::UnboundedSender<NodeEvent>,

    echo: Mutex<EchoSuppressor>,
    connected: Mutex<HashMap<String, PeerHandle>>,
    dialing: Mutex<HashSet<String>>,
    clipboard: Mutex<Option<Arc<dyn Clipboard>>>,

    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MeshEngine {
    pub fn new(
        identity: Identity,
        device_name: String,
        trust: Arc<TrustStore>,
        history: Arc<HistoryStore>,
        gate: Arc<QrPairingGate>,
        events: mpsc::UnboundedSender<NodeEvent>,
    ) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            identity,
            device_name,
            trust,
            history,
            gate,
            events,
            echo: Mutex::new(EchoSuppressor::new(ECHO_SUPPRESSOR_CAPACITY)),
            connected: Mutex::new(HashMap::new()),
            dialing: Mutex::new(HashSet::new()),
            clipboard: Mutex::new(None),
            stop_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// PeerIds with a live session right now.
    pub fn connected_peers(&self) -> Vec<String> {
        self.connected
            .lock()
            .expect("connected table mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn emit(&self, event: NodeEvent) {
        let _ = self.events.send(event);
    }

    fn emit_error(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Error {
            message: message.into(),
        });
    }

    /// Surface an error to the embedder through the event channel.
    pub fn report_error(&self, message: String) {
        self.emit_error(message);
    }

    /// Write through the injected clipboard capability, if any.
    pub fn write_clipboard(&self, text: &str) -> Result<()> {
        let clipboard = self
            .clipboard_ref()
            .ok_or_else(|| Error::Clipboard("no clipboard capability".to_string()))?;
        clipboard.write_text(text)
    }

    /// Mark a text as written by the mesh so the poll loop ignores it.
    pub fn note_remote_write(&self, text: &str) {
        self.echo
            .lock()
            .expect("echo suppressor mutex poisoned")
            .note_remote_write(text);
    }

    /// Spawn the accept loop on an already-bound listener.
    pub fn start_accept_loop(self: &Arc<Self>, listener: Listener) {
        let engine = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    accepted = listener.accept() => {
                        let (stream, addr) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                engine.emit_error(format!("accept failed: {}", e));
                                continue;
                            }
                        };
                        tracing::debug!("incoming connection from {}", addr);

                        let engine2 = Arc::clone(&engine);
                        let handler = tokio::spawn(async move {
                            engine2.handle_inbound(stream).await;
                        });
                        engine
                            .tasks
                            .lock()
                            .expect("task list mutex poisoned")
                            .push(handler);
                    }
                }
            }
            // Dropping the listener here releases the socket.
        });

        self.tasks.lock().expect("task list mutex poisoned").push(task);
    }

    async fn handle_inbound(self: Arc<Self>, stream: TcpStream) {
        let session = tokio::time::timeout(
            Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
            establish_responder(
                stream,
                &self.identity,
                &self.trust,
                &self.device_name,
                Some(&self.gate),
            ),
        )
        .await
        .map_err(|_| Error::Timeout("inbound handshake".to_string()))
        .and_then(|r| r);

        match session {
            Ok(session) => self.adopt_session(session),
            Err(e) => self.emit_error(format!("inbound handshake failed: {}", e)),
        }
    }

    /// Register an established session and spawn its I/O task. A second
    /// session for an already-connected peer is dropped.
    pub(crate) fn adopt_session(self: &Arc<Self>, session: EstablishedSession<TcpStream>) {
        if *self.stop_tx.borrow() {
            return;
        }
        let peer_id = session.peer_id.clone();
        let (tx, rx) = mpsc::channel::<SessionCommand>(32);

        {
            let mut connected = self.connected.lock().expect("connected table mutex poisoned");
            if connected.contains_key(&peer_id) {
                tracing::debug!(peer = %peer_id, "duplicate session dropped");
                return;
            }
            connected.insert(peer_id.clone(), PeerHandle { outbound_tx: tx });
        }

        self.emit(NodeEvent::PeerConnected {
            peer_id: peer_id.clone(),
        });

        let engine = Arc::clone(self);
        let stop_rx = self.stop_tx.subscribe();
        let task = tokio::spawn(async move {
            engine.run_session(session, rx, stop_rx).await;
        });
        self.tasks.lock().expect("task list mutex poisoned").push(task);
    }

    async fn run_session(
        self: Arc<Self>,
        session: EstablishedSession<TcpStream>,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let EstablishedSession {
            peer_id,
            peer_name,
            mut reader,
            mut writer,
            ..
        } = session;

        // Dedicated receive task: frames forwarded through a channel keep
        // the select loop below cancel-safe (a partial frame read must never
        // be abandoned mid-stream).
        let (frame_tx, mut frame_rx) = mpsc::channel::<Result<crate::protocol::Frame>>(32);
        let read_task = tokio::spawn(async move {
            loop {
                let result = reader.recv().await;
                let failed = result.is_err();
                if frame_tx.send(result).await.is_err() || failed {
                    break;
                }
            }
        });

        let mut ping_interval =
            tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut ping_token: u64 = 0;
        let mut pong_deadline: Option<std::pin::Pin<Box<tokio::time::Sleep>>> = None;

        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,

                _ = ping_interval.tick() => {
                    if pong_deadline.is_none() {
                        ping_token += 1;
                        if let Err(e) = writer.send_ping(ping_token).await {
                            self.emit_error(format!("ping to {} failed: {}", peer_id, e));
                            break;
                        }
                        pong_deadline = Some(Box::pin(tokio::time::sleep(
                            Duration::from_secs(PONG_TIMEOUT_SECS),
                        )));
                    }
                }

                _ = async { pong_deadline.as_mut().expect("guarded by condition").await },
                    if pong_deadline.is_some() =>
                {
                    self.emit_error(format!("keep-alive timeout from {}", peer_id));
                    break;
                }

                cmd = cmd_rx.recv() => {
                    let Some(SessionCommand::SendText(text)) = cmd else {
                        break;
                    };
                    if let Err(e) = writer.send_clip_text(&text).await {
                        self.emit_error(format!("send to {} failed: {}", peer_id, e));
                        break;
                    }
                }

                frame = frame_rx.recv() => {
                    let frame = match frame {
                        Some(Ok(f)) => f,
                        Some(Err(e)) => {
                            match e {
                                // A peer going away is unremarkable.
                                Error::Network(_) => {
                                    tracing::debug!(peer = %peer_id, "connection closed");
                                }
                                e => self.emit_error(format!("recv from {} failed: {}", peer_id, e)),
                            }
                            break;
                        }
                        None => break,
                    };

                    match MsgType::from_u8(frame.msg_type) {
                        Ok(MsgType::ClipText) => match clip_text(&frame.payload) {
                            Ok(text) => self.on_remote_text(&peer_id, &peer_name, text),
                            Err(e) => {
                                self.emit_error(format!("bad CLIP_TEXT from {}: {}", peer_id, e));
                                break;
                            }
                        },
                        Ok(MsgType::Ping) => {
                            let token = keepalive_token(&frame.payload).unwrap_or(0);
                            if writer.send_pong(token).await.is_err() {
                                break;
                            }
                        }
                        Ok(MsgType::Pong) => {
                            if matches!(keepalive_token(&frame.payload), Ok(t) if t == ping_token) {
                                pong_deadline = None;
                            }
                        }
                        // HELLO repeats and reserved file types are tolerated.
                        Ok(other) => {
                            tracing::debug!(peer = %peer_id, "ignoring {:?} frame", other);
                        }
                        Err(_) => {
                            tracing::debug!(peer = %peer_id, msg_type = frame.msg_type, "ignoring unknown frame type");
                        }
                    }
                }
            }
        }

        read_task.abort();
        let _ = read_task.await;

        self.connected
            .lock()
            .expect("connected table mutex poisoned")
            .remove(&peer_id);
        self.emit(NodeEvent::PeerDisconnected { peer_id });
    }

    /// Handle one inbound CLIP_TEXT: suppress future echo, apply, record,
    /// notify.
    fn on_remote_text(&self, peer_id: &str, peer_name: &str, text: String) {
        self.note_remote_write(&text);

        if let Some(clipboard) = self.clipboard_ref() {
            if let Err(e) = clipboard.write_text(&text) {
                tracing::warn!("clipboard write failed: {}", e);
            }
        }

        self.history.record(text.clone(), peer_name.to_string());
        self.emit(NodeEvent::ClipboardText {
            peer_id: peer_id.to_string(),
            text,
            ts_ms: now_ms(),
        });
    }

    /// Broadcast a text to every connected trusted peer, best-effort. The
    /// text is noted in the echo suppressor first so the poll loop does not
    /// send it a second time.
    pub fn broadcast(&self, text: &str) {
        self.note_remote_write(text);
        self.fan_out(text);
    }

    /// Start dialing a discovered peer if it is trusted and not already
    /// connected. The peer with the smaller PeerId dials; the other only
    /// accepts, so two trusted peers never race to duplicate sessions.
    pub fn ensure_dialing(self: &Arc<Self>, peer: PeerInfo) {
        if peer.peer_id == self.identity.peer_id() {
            return;
        }
        if !self.trust.is_trusted(&peer.peer_id) {
            return;
        }
        if self.identity.peer_id() >= peer.peer_id.as_str() {
            return;
        }
        {
            let connected = self.connected.lock().expect("connected table mutex poisoned");
            if connected.contains_key(&peer.peer_id) {
                return;
            }
        }
        {
            let mut dialing = self.dialing.lock().expect("dialing set mutex poisoned");
            if !dialing.insert(peer.peer_id.clone()) {
                return;
            }
        }

        let engine = Arc::clone(self);
        let stop_rx = self.stop_tx.subscribe();
        let task = tokio::spawn(async move {
            engine.dial_loop(peer, stop_rx).await;
        });
        self.tasks.lock().expect("task list mutex poisoned").push(task);
    }

    /// Keep one session to `peer` alive: dial with exponential backoff,
    /// re-dial after the session drops, exit when the peer loses trust or
    /// the mesh stops.
    async fn dial_loop(self: Arc<Self>, peer: PeerInfo, mut stop_rx: watch::Receiver<bool>) {
        let mut backoff = Backoff::new();

        loop {
            if *stop_rx.borrow() {
                break;
            }
            if !self.trust.is_trusted(&peer.peer_id) {
                break;
            }

            let already_connected = {
                let connected = self.connected.lock().expect("connected table mutex poisoned");
                connected.contains_key(&peer.peer_id)
            };
            if already_connected {
                // Re-check after a quiet interval; the session task handles
                // the live connection.
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(Duration::from_millis(BACKOFF_INITIAL_MS)) => {}
                }
                continue;
            }

            let attempt = async {
                let stream = dial(&peer.addr).await?;
                tokio::time::timeout(
                    Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
                    establish_initiator(
                        stream,
                        &self.identity,
                        &self.trust,
                        &self.device_name,
                        Some(&peer.peer_id),
                    ),
                )
                .await
                .map_err(|_| Error::Timeout(format!("handshake with {}", peer.addr)))?
            };

            match attempt.await {
                Ok(session) => {
                    backoff.reset();
                    self.adopt_session(session);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::debug!(
                        peer = %peer.peer_id,
                        "dial {} failed: {}; retrying in {:?}",
                        peer.addr, e, delay
                    );
                    tokio::select! {
                        _ = stop_rx.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.dialing
            .lock()
            .expect("dialing set mutex poisoned")
            .remove(&peer.peer_id);
    }

    /// Spawn the clipboard poll loop.
    pub fn start_poll_loop(
        self: &Arc<Self>,
        clipboard: Arc<dyn Clipboard>,
        poll_interval: Duration,
    ) {
        self.set_clipboard(Arc::clone(&clipboard));

        let engine = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();

        let task = tokio::spawn(async move {
            let mut last: Option<String> = None;

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }

                let current = match clipboard.read_text() {
                    Ok(Some(text)) => text,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!("clipboard read failed: {}", e);
                        continue;
                    }
                };

                if last.as_deref() == Some(current.as_str()) {
                    continue;
                }

                let suppress = {
                    let echo = engine.echo.lock().expect("echo suppressor mutex poisoned");
                    echo.should_ignore_local(&current)
                };
                if suppress {
                    last = Some(current);
                    continue;
                }

                last = Some(current.clone());
                engine
                    .history
                    .record(current.clone(), engine.device_name.clone());
                engine.fan_out(&current);
            }
        });

        self.tasks.lock().expect("task list mutex poisoned").push(task);
    }

    /// Fan a locally observed change out to every connected peer. Unlike
    /// [`broadcast`](Self::broadcast) this does not touch the suppressor:
    /// the change originated here.
    fn fan_out(&self, text: &str) {
        let handles: Vec<(String, mpsc::Sender<SessionCommand>)> = {
            let connected = self.connected.lock().expect("connected table mutex poisoned");
            connected
                .iter()
                .map(|(id, h)| (id.clone(), h.outbound_tx.clone()))
                .collect()
        };

        for (peer_id, tx) in handles {
            if tx.try_send(SessionCommand::SendText(text.to_string())).is_err() {
                tracing::warn!(peer = %peer_id, "outbound queue full, dropping clipboard update");
            }
        }
    }

    /// Stop the accept loop, every session task, and the poll loop. Returns
    /// once every task has observed the cancellation and released its
    /// socket. Idempotent.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);

        // Tasks can spawn further tasks (accept loop -> handshake handler),
        // so drain until the list stays empty.
        loop {
            let tasks: Vec<JoinHandle<()>> = {
                let mut tasks = self.tasks.lock().expect("task list mutex poisoned");
                tasks.drain(..).collect()
            };
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                task.abort();
                let _ = task.await;
            }
        }

        self.connected
            .lock()
            .expect("connected table mutex poisoned")
            .clear();
        self.dialing
            .lock()
            .expect("dialing set mutex poisoned")
            .clear();
    }

    fn set_clipboard(&self, clipboard: Arc<dyn Clipboard>) {
        *self
            .clipboard
            .lock()
            .expect("clipboard slot mutex poisoned") = Some(clipboard);
    }

    fn clipboard_ref(&self) -> Option<Arc<dyn Clipboard>> {
        self.clipboard
            .lock()
            .expect("clipboard slot mutex poisoned")
            .clone()
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_suppressor_tracks_recent() {
        let mut s = EchoSuppressor::new(3);
        s.note_remote_write("a");
        s.note_remote_write("b");
        assert!(s.should_ignore_local("a"));
        assert!(!s.should_ignore_local("c"));

        s.note_remote_write("c");
        s.note_remote_write("d");
        // cap=3, so "a" was evicted.
        assert!(!s.should_ignore_local("a"));
        assert!(s.should_ignore_local("b"));
        assert!(s.should_ignore_local("c"));
        assert!(s.should_ignore_local("d"));
    }

    #[test]
    fn test_echo_suppressor_dedupes_bursts() {
        let mut s = EchoSuppressor::new(3);
        s.note_remote_write("a");
        s.note_remote_write("a");
        s.note_remote_write("a");
        s.note_remote_write("b");
        // The repeated "a" collapsed into one slot, so both survive.
        assert!(s.should_ignore_local("a"));
        assert!(s.should_ignore_local("b"));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut b = Backoff::new();
        assert_eq!(b.next_delay(), Duration::from_millis(1_000));
        assert_eq!(b.next_delay(), Duration::from_millis(2_000));
        assert_eq!(b.next_delay(), Duration::from_millis(4_000));
        b.cur_ms = 20_000;
        assert_eq!(b.next_delay(), Duration::from_millis(20_000));
        assert_eq!(b.next_delay(), Duration::from_millis(30_000));
        assert_eq!(b.next_delay(), Duration::from_millis(30_000));
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(1_000));
    }
}
