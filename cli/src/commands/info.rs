//! Info command implementation.

use openclipboard_core::{discovery, Node};

use crate::paths::StoragePaths;

/// Display device information.
pub fn show_info(paths: StoragePaths, device_name: String) -> anyhow::Result<()> {
    let node = Node::new(&paths.identity, &paths.trust)?;

    println!("\n\x1b[1mOpenClipboard Device Info\x1b[0m");
    println!("═══════════════════════════════════════");
    println!("\x1b[1mName:\x1b[0m {}", device_name);
    println!("\x1b[1mID:\x1b[0m   {}", node.peer_id());
    println!("\x1b[1mKey:\x1b[0m  {}", node.public_key_b64());

    let trusted = node.trust_store().list();
    println!("\n\x1b[1mTrusted peers:\x1b[0m {}", trusted.len());
    for record in trusted {
        println!("  • {} ({})", record.display_name, record.peer_id);
    }

    println!("\n\x1b[1mLocal IPs:\x1b[0m");
    for ip in discovery::get_local_ips() {
        println!("  • {}", ip);
    }
    println!();

    Ok(())
}
