//! Send command implementation.

use openclipboard_core::Node;

use crate::paths::StoragePaths;

/// One-shot: send a text to a trusted peer and exit.
pub async fn send_text(paths: StoragePaths, addr: String, text: String) -> anyhow::Result<()> {
    let node = Node::new(&paths.identity, &paths.trust)?;
    node.connect_and_send_text(&addr, &text).await?;
    println!("\x1b[1;32m✓\x1b[0m Sent to {}", addr);
    Ok(())
}
