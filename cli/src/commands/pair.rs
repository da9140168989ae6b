//! Explicit two-string pairing over copy-paste.

use std::io::{self, BufRead, Write};

use clap::Subcommand;
use rand::RngCore;

use openclipboard_core::{pairing_finalize, pairing_respond, Identity, Node, PairingPayload};

use crate::paths::StoragePaths;
use crate::ui::print_qr_code;

#[derive(Subcommand)]
pub enum PairFlow {
    /// Produce an init payload to show the other device
    Init {
        /// Listening port to advertise
        #[arg(short, long, default_value_t = 18455)]
        port: u16,
    },
    /// Respond to an init payload; prints the resp payload and the code
    Respond {
        /// The init payload string from the other device
        init_qr: String,
        /// Listening port to advertise
        #[arg(short, long, default_value_t = 18455)]
        port: u16,
    },
    /// Finalize with both payloads; writes the trust records
    Finalize {
        init_qr: String,
        resp_qr: String,
    },
}

pub fn run_pairing(paths: StoragePaths, device_name: String, flow: PairFlow) -> anyhow::Result<()> {
    match flow {
        PairFlow::Init { port } => {
            let identity = Identity::load_or_generate(&paths.identity)?;
            let mut nonce = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut nonce);

            let addrs = openclipboard_core::discovery::get_local_ips()
                .iter()
                .map(|ip| ip.to_string())
                .collect();
            let payload =
                openclipboard_core::pairing_init(&identity, device_name, port, nonce, addrs);
            let url = payload.to_qr_string();

            println!("\n\x1b[1;33mShow this to the other device:\x1b[0m\n");
            print_qr_code(&url);
            println!("\n{}\n", url);
            println!("\x1b[2mThen run `openclipboard pair finalize <init> <resp>` with its reply.\x1b[0m");
        }
        PairFlow::Respond { init_qr, port } => {
            let identity = Identity::load_or_generate(&paths.identity)?;
            let addrs = openclipboard_core::discovery::get_local_ips()
                .iter()
                .map(|ip| ip.to_string())
                .collect();
            let (resp, code) = pairing_respond(&init_qr, &identity, device_name, port, addrs)?;
            let url = resp.to_qr_string();

            println!("\n\x1b[1;33mSend this back to the other device:\x1b[0m\n");
            print_qr_code(&url);
            println!("\n{}\n", url);

            // Trust is only written after the user verifies the code against
            // the other device's screen.
            if !confirm_code(&code)? {
                println!("\x1b[1;31m✗\x1b[0m Pairing aborted; nothing was trusted.");
                return Ok(());
            }

            let init = PairingPayload::from_qr_string(&init_qr)?;
            let node = Node::new(&paths.identity, &paths.trust)?;
            node.trust_store().add(
                &init.peer_id,
                &base64_encode(&init.identity_pk),
                &init.name,
            )?;
            println!(
                "\x1b[1;32m✓\x1b[0m Trusted: {} ({})",
                init.name, init.peer_id
            );
        }
        PairFlow::Finalize { init_qr, resp_qr } => {
            let (code, records) = pairing_finalize(&init_qr, &resp_qr)?;

            if !confirm_code(&code)? {
                println!("\x1b[1;31m✗\x1b[0m Pairing aborted; nothing was trusted.");
                return Ok(());
            }

            let node = Node::new(&paths.identity, &paths.trust)?;
            let own_id = node.peer_id().to_string();
            for record in records {
                if record.peer_id != own_id {
                    println!(
                        "\x1b[1;32m✓\x1b[0m Trusted: {} ({})",
                        record.display_name, record.peer_id
                    );
                    node.trust_store().add_record(record)?;
                }
            }
        }
    }
    Ok(())
}

/// Show the derived code and ask the user to check it against the other
/// device. Anything but an explicit yes declines.
fn confirm_code(code: &str) -> anyhow::Result<bool> {
    println!("\x1b[1mConfirmation code:\x1b[0m {}", code);
    print!("Does the other device show the same code? [y/N] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.encode(bytes)
}
