//! TCP transport: record framing, authenticated sessions, listener/dialer.

pub mod framing;
pub mod listener;
pub mod session;

pub use listener::{connect_and_send_text, dial, Listener};
pub use session::{
    establish_initiator, establish_responder, EstablishedSession, QrPairingGate, SessionReader,
    SessionWriter,
};
