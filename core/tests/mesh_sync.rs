//! Three-node mesh: clipboard fanout over real TCP with the in-process
//! discovery and clipboard backends.

use std::sync::Arc;
use std::time::Duration;

use openclipboard_core::{Clipboard, EventSink, MockClipboard, MockDiscovery, Node};
use tokio::sync::mpsc;

#[derive(Debug)]
enum SinkEvent {
    Connected(String),
    Text { peer_id: String, text: String },
    Error(String),
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl EventSink for ChannelSink {
    fn on_clipboard_text(&self, peer_id: String, text: String, _ts_ms: u64) {
        let _ = self.tx.send(SinkEvent::Text { peer_id, text });
    }
    fn on_peer_connected(&self, peer_id: String) {
        let _ = self.tx.send(SinkEvent::Connected(peer_id));
    }
    fn on_peer_disconnected(&self, _peer_id: String) {}
    fn on_error(&self, message: String) {
        let _ = self.tx.send(SinkEvent::Error(message));
    }
}

struct TestNode {
    node: Node,
    clipboard: Arc<MockClipboard>,
    rx: mpsc::UnboundedReceiver<SinkEvent>,
}

async fn start_mesh_trio(dir: &tempfile::TempDir) -> Vec<TestNode> {
    let lan = MockDiscovery::new_shared();

    let nodes: Vec<Node> = (0..3)
        .map(|i| {
            let node = Node::new(
                &dir.path().join(format!("id_{}.json", i)),
                &dir.path().join(format!("trust_{}.json", i)),
            )
            .unwrap();
            node.set_discovery_backend(Arc::new(lan.clone_shared()));
            node
        })
        .collect();

    // Full-mesh trust: everyone trusts everyone else.
    for i in 0..3 {
        for j in 0..3 {
            if i == j {
                continue;
            }
            nodes[i]
                .trust_store()
                .add(
                    nodes[j].peer_id(),
                    &nodes[j].public_key_b64(),
                    &format!("node_{}", j),
                )
                .unwrap();
        }
    }

    let mut out = Vec::new();
    for (i, node) in nodes.into_iter().enumerate() {
        let clipboard = Arc::new(MockClipboard::new());
        let (tx, rx) = mpsc::unbounded_channel();
        node.start_mesh(
            0,
            &format!("node_{}", i),
            Arc::new(ChannelSink { tx }),
            Arc::clone(&clipboard) as Arc<dyn openclipboard_core::Clipboard>,
            Some(50),
        )
        .await
        .unwrap();
        out.push(TestNode {
            node,
            clipboard,
            rx,
        });
    }
    out
}

async fn wait_connections(node: &mut TestNode, want: usize, label: &str) {
    let mut connected = 0;
    while connected < want {
        let event = tokio::time::timeout(Duration::from_secs(10), node.rx.recv())
            .await
            .unwrap_or_else(|_| panic!("{}: only {} connections", label, connected))
            .expect("event channel closed");
        match event {
            SinkEvent::Connected(_) => connected += 1,
            SinkEvent::Error(e) => eprintln!("[{}] error while connecting: {}", label, e),
            other => panic!("{}: unexpected event {:?}", label, other),
        }
    }
}

async fn wait_text(node: &mut TestNode, label: &str) -> (String, String) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), node.rx.recv())
            .await
            .unwrap_or_else(|_| panic!("{}: no clipboard text received", label))
            .expect("event channel closed");
        match event {
            SinkEvent::Text { peer_id, text } => return (peer_id, text),
            SinkEvent::Error(e) => eprintln!("[{}] error: {}", label, e),
            _ => {}
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn three_node_clipboard_fanout() {
    let dir = tempfile::tempdir().unwrap();
    let mut trio = start_mesh_trio(&dir).await;

    for (i, node) in trio.iter_mut().enumerate() {
        wait_connections(node, 2, &format!("node_{}", i)).await;
    }

    let sender_id = trio[0].node.peer_id().to_string();
    trio[0].clipboard.simulate_copy("mesh-hello");

    for i in [1, 2] {
        let label = format!("node_{}", i);
        let (from, text) = wait_text(&mut trio[i], &label).await;
        assert_eq!(text, "mesh-hello");
        assert_eq!(from, sender_id);
        // The text was written through the clipboard capability.
        assert_eq!(
            trio[i].clipboard.read_text().unwrap(),
            Some("mesh-hello".to_string())
        );
        // And recorded to history under the sender's display name.
        let history = trio[i].node.get_clipboard_history_for_peer("node_0", 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "mesh-hello");
    }

    for t in &trio {
        t.node.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn no_echo_back_to_sender() {
    let dir = tempfile::tempdir().unwrap();
    let mut trio = start_mesh_trio(&dir).await;

    for (i, node) in trio.iter_mut().enumerate() {
        wait_connections(node, 2, &format!("node_{}", i)).await;
    }

    trio[0].clipboard.simulate_copy("no-echo");
    let (_, text) = wait_text(&mut trio[1], "node_1").await;
    assert_eq!(text, "no-echo");

    // The receivers' poll loops see the remote write; the suppressor must
    // keep them from reflecting it back to the sender.
    let echo = tokio::time::timeout(Duration::from_millis(800), async {
        loop {
            match trio[0].rx.recv().await {
                Some(SinkEvent::Text { text, .. }) => return text,
                Some(_) => continue,
                None => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(echo.is_err(), "sender got its own text back: {:?}", echo);

    for t in &trio {
        t.node.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn recall_does_not_rebroadcast() {
    let dir = tempfile::tempdir().unwrap();
    let mut trio = start_mesh_trio(&dir).await;

    for (i, node) in trio.iter_mut().enumerate() {
        wait_connections(node, 2, &format!("node_{}", i)).await;
    }

    // Two updates from A land in B's history.
    trio[0].clipboard.simulate_copy("first entry");
    let (_, text) = wait_text(&mut trio[1], "node_1").await;
    assert_eq!(text, "first entry");
    trio[0].clipboard.simulate_copy("second entry");
    let (_, text) = wait_text(&mut trio[1], "node_1").await;
    assert_eq!(text, "second entry");

    // B recalls the older entry back onto its clipboard.
    let history = trio[1].node.get_clipboard_history(10);
    let older = history
        .iter()
        .find(|e| e.content == "first entry")
        .expect("older entry in history");
    trio[1].node.recall_from_history(&older.id).unwrap();
    assert_eq!(
        trio[1].clipboard.read_text().unwrap(),
        Some("first entry".to_string())
    );
    assert!(trio[1].node.recall_from_history("no-such-id").is_err());

    // The recalled text must not fan back out to A or C.
    let echo = tokio::time::timeout(Duration::from_millis(800), async {
        loop {
            match trio[0].rx.recv().await {
                Some(SinkEvent::Text { text, .. }) => return text,
                Some(_) => continue,
                None => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(echo.is_err(), "recall was re-broadcast: {:?}", echo);

    for t in &trio {
        t.node.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn explicit_broadcast_reaches_all_peers() {
    let dir = tempfile::tempdir().unwrap();
    let mut trio = start_mesh_trio(&dir).await;

    for (i, node) in trio.iter_mut().enumerate() {
        wait_connections(node, 2, &format!("node_{}", i)).await;
    }

    trio[0].node.send_clipboard_text("pushed");

    for i in [1, 2] {
        let (_, text) = wait_text(&mut trio[i], &format!("node_{}", i)).await;
        assert_eq!(text, "pushed");
    }

    for t in &trio {
        t.node.stop().await;
    }
}
