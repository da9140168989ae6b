//! mDNS discovery backend.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};

use super::{Discovery, DiscoveryEvent, LocalAdvert, PeerInfo};
use crate::protocol::constants::SERVICE_TYPE;
use crate::{Error, Result};

/// mDNS discovery via a shared service daemon.
///
/// Advertises under `_openclipboard._tcp` with TXT keys `peer_id`, `name`,
/// and `port`, and browses the same type.
pub struct MdnsDiscovery {
    daemon: ServiceDaemon,
    registered: Mutex<Option<String>>,
}

impl MdnsDiscovery {
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| Error::Discovery(e.to_string()))?;
        Ok(Self {
            daemon,
            registered: Mutex::new(None),
        })
    }
}

impl Discovery for MdnsDiscovery {
    fn start(&self, local: LocalAdvert) -> Result<mpsc::UnboundedReceiver<DiscoveryEvent>> {
        let instance_name = format!("{}-{}", local.name, &local.peer_id[..8.min(local.peer_id.len())]);

        let mut properties = HashMap::new();
        properties.insert("peer_id".to_string(), local.peer_id.clone());
        properties.insert("name".to_string(), local.name.clone());
        properties.insert("port".to_string(), local.port.to_string());

        let host = format!(
            "{}.local.",
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "openclipboard".to_string())
        );

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &instance_name,
            &host,
            (),
            local.port,
            properties,
        )
        .map_err(|e| Error::Discovery(e.to_string()))?
        .enable_addr_auto();

        self.daemon
            .register(service)
            .map_err(|e| Error::Discovery(e.to_string()))?;
        *self
            .registered
            .lock()
            .expect("mdns registration mutex poisoned") = Some(instance_name.clone());

        tracing::info!("registered mDNS service: {}", instance_name);

        let receiver = self
            .daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| Error::Discovery(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let our_id = local.peer_id;

        tokio::task::spawn_blocking(move || {
            // fullname -> peer_id, so removals can be mapped back.
            let mut seen: HashMap<String, String> = HashMap::new();

            while let Ok(event) = receiver.recv() {
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let props = info.get_properties();
                        let Some(peer_id) =
                            props.get("peer_id").map(|v| v.val_str().to_string())
                        else {
                            continue;
                        };
                        // Don't discover ourselves.
                        if peer_id == our_id {
                            continue;
                        }

                        let name = props
                            .get("name")
                            .map(|v| v.val_str().to_string())
                            .unwrap_or_else(|| "Unknown".to_string());

                        let Some(ip) = info.get_addresses().iter().next().copied() else {
                            continue;
                        };

                        seen.insert(info.get_fullname().to_string(), peer_id.clone());

                        let peer = PeerInfo {
                            peer_id,
                            name,
                            addr: format!("{}:{}", ip, info.get_port()),
                        };
                        if tx.send(DiscoveryEvent::PeerFound(peer)).is_err() {
                            break;
                        }
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        if let Some(peer_id) = seen.remove(&fullname) {
                            if tx.send(DiscoveryEvent::PeerLost(peer_id)).is_err() {
                                break;
                            }
                        }
                    }
                    _ => {}
                }
            }
        });

        Ok(rx)
    }

    fn stop(&self) {
        if let Some(fullname) = self
            .registered
            .lock()
            .expect("mdns registration mutex poisoned")
            .take()
        {
            let _ = self
                .daemon
                .unregister(&format!("{}.{}", fullname, SERVICE_TYPE));
        }
    }
}
