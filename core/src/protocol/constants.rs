//! Centralized protocol constants
//!
//! All protocol-level constants are defined here to ensure consistency
//! across the codebase and make configuration easier.

/// Default TCP port for the sync listener
pub const DEFAULT_PORT: u16 = 18455;

/// mDNS service type for discovery
pub const SERVICE_TYPE: &str = "_openclipboard._tcp.local.";

/// URL scheme prefix for pairing QR codes
pub const PAIRING_URL_SCHEME: &str = "openclipboard://pair?";

/// Wire protocol version carried in every frame header
pub const PROTOCOL_VERSION: u8 = 0;

/// Pairing payload version
pub const PAIRING_VERSION: u8 = 1;

/// Maximum frame payload size (8 MiB)
pub const MAX_FRAME: usize = 8 * 1024 * 1024;

/// Info string for the initiator-to-responder channel key
pub const CHANNEL_INFO_I2R: &[u8] = b"openclipboard i2r";

/// Info string for the responder-to-initiator channel key
pub const CHANNEL_INFO_R2I: &[u8] = b"openclipboard r2i";

/// Context prefix signed during the session handshake
pub const HANDSHAKE_CONTEXT: &[u8] = b"openclipboard-hs-v0";

/// Clipboard polling interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Echo-suppression FIFO capacity
pub const ECHO_SUPPRESSOR_CAPACITY: usize = 20;

/// Default clipboard history limit (tunable 10–200)
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Total handshake deadline in seconds
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Outbound dial deadline in seconds
pub const DIAL_TIMEOUT_SECS: u64 = 5;

/// Keep-alive PING interval in seconds
pub const PING_INTERVAL_SECS: u64 = 15;

/// PONG response deadline in seconds
pub const PONG_TIMEOUT_SECS: u64 = 10;

/// Initial reconnect backoff in milliseconds
pub const BACKOFF_INITIAL_MS: u64 = 1_000;

/// Reconnect backoff cap in milliseconds
pub const BACKOFF_MAX_MS: u64 = 30_000;
