//! Run command implementation.

use std::sync::Arc;

use openclipboard_core::{DiscoverySink, EventSink, Node, SystemClipboard};

use crate::paths::StoragePaths;
use crate::process::kill_previous_instances;
use crate::ui::{print_banner, print_qr_code};

struct TerminalSink;

impl EventSink for TerminalSink {
    fn on_clipboard_text(&self, peer_id: String, text: String, _ts_ms: u64) {
        println!(
            "\x1b[1;34m📋\x1b[0m Received from {}: \"{}\"",
            &peer_id[..8.min(peer_id.len())],
            preview(&text)
        );
    }

    fn on_peer_connected(&self, peer_id: String) {
        println!("\x1b[1;32m⬤\x1b[0m Connected: {}", peer_id);
    }

    fn on_peer_disconnected(&self, peer_id: String) {
        println!("\x1b[1;31m⬤\x1b[0m Disconnected: {}", peer_id);
    }

    fn on_error(&self, message: String) {
        eprintln!("\x1b[1;31m✗\x1b[0m Error: {}", message);
    }
}

impl DiscoverySink for TerminalSink {
    fn on_peer_discovered(&self, peer_id: String, name: String, addr: String) {
        println!(
            "\x1b[1;32m⬤\x1b[0m Found: \x1b[1m{}\x1b[0m ({}) at {}",
            name,
            &peer_id[..8.min(peer_id.len())],
            addr
        );
    }

    fn on_peer_lost(&self, peer_id: String) {
        println!("\x1b[1;31m⬤\x1b[0m Lost: {}", peer_id);
    }
}

/// Run the clipboard mesh until Ctrl+C.
pub async fn run_mesh(
    paths: StoragePaths,
    device_name: String,
    port: u16,
    pair: bool,
) -> anyhow::Result<()> {
    kill_previous_instances();
    print_banner();

    let node = Node::new(&paths.identity, &paths.trust)?;

    println!("\x1b[1mDevice:\x1b[0m {}", device_name);
    println!("\x1b[1mID:\x1b[0m     {}", node.peer_id());
    println!("\x1b[1mKey:\x1b[0m    {}", node.public_key_b64());

    node.start_mesh(
        port,
        &device_name,
        Arc::new(TerminalSink),
        Arc::new(SystemClipboard::new()),
        None,
    )
    .await?;
    node.start_discovery(&device_name, Arc::new(TerminalSink))?;

    if pair {
        node.enable_qr_pairing_listener();
        let payload = node.create_pairing_payload(&device_name);
        let url = payload.to_qr_string();

        println!("\n\x1b[1;33mScan this QR code on the other device to pair:\x1b[0m\n");
        print_qr_code(&url);
        println!("\n\x1b[2mOr enter manually: {}\x1b[0m\n", url);
    }

    println!("\x1b[1;32m✓\x1b[0m Syncing clipboard with trusted peers...");
    println!("\x1b[2mPress Ctrl+C to stop.\x1b[0m\n");

    // Handle Ctrl+C gracefully.
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.blocking_send(());
    })?;

    let _ = rx.recv().await;
    println!("\n\x1b[1;33mShutting down...\x1b[0m");
    node.stop().await;

    Ok(())
}

/// Shorten long clipboard text for display.
fn preview(text: &str) -> String {
    const MAX_PREVIEW_LEN: usize = 50;

    if text.chars().count() > MAX_PREVIEW_LEN {
        let cut: String = text.chars().take(MAX_PREVIEW_LEN).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}
