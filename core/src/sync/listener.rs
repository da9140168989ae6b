//! TCP listener and dialer.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

use crate::identity::Identity;
use crate::protocol::constants::{DIAL_TIMEOUT_SECS, HANDSHAKE_TIMEOUT_SECS};
use crate::sync::session::establish_initiator;
use crate::trust::TrustStore;
use crate::{Error, Result};

/// Bound listening socket. Accepted connections are handed to session tasks
/// by the mesh engine.
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind `0.0.0.0:port`. A bind collision surfaces as `AddressInUse`.
    pub async fn bind(port: u16) -> Result<Self> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let inner = TcpListener::bind(addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                Error::AddressInUse(addr.to_string())
            } else {
                Error::Io(e)
            }
        })?;

        let local_addr = inner.local_addr().map_err(Error::Io)?;
        tracing::info!("listening on {}", local_addr);

        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        self.inner
            .accept()
            .await
            .map_err(|e| Error::Network(e.to_string()))
    }
}

/// Open a TCP connection with the dial deadline applied.
pub async fn dial(addr: &str) -> Result<TcpStream> {
    let stream = tokio::time::timeout(
        Duration::from_secs(DIAL_TIMEOUT_SECS),
        TcpStream::connect(addr),
    )
    .await
    .map_err(|_| Error::Timeout(format!("dial {}", addr)))?
    .map_err(|e| Error::Network(format!("dial {}: {}", addr, e)))?;

    Ok(stream)
}

/// Opportunistic one-shot: dial `addr`, run the client-role handshake, send
/// one CLIP_TEXT frame, and close. Returns the responder's PeerId.
pub async fn connect_and_send_text(
    addr: &str,
    text: &str,
    identity: &Identity,
    trust: &TrustStore,
    local_name: &str,
) -> Result<String> {
    let stream = dial(addr).await?;

    let mut session = tokio::time::timeout(
        Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
        establish_initiator(stream, identity, trust, local_name, None),
    )
    .await
    .map_err(|_| Error::Timeout(format!("handshake with {}", addr)))??;

    session.writer.send_clip_text(text).await?;
    Ok(session.peer_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_collision_is_address_in_use() {
        let first = Listener::bind(0).await.unwrap();
        let port = first.port();

        let second = Listener::bind(port).await;
        assert!(matches!(second, Err(Error::AddressInUse(_))));
    }

    #[tokio::test]
    async fn test_dial_times_out_or_refuses() {
        // Nothing listens here; either a fast refusal or the dial deadline.
        let result = dial("127.0.0.1:1").await;
        assert!(result.is_err());
    }
}
