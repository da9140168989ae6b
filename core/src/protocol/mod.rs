//! Wire protocol: frame codec, typed messages, and pairing payloads.

pub mod constants;
mod frame;
mod messages;
mod pairing;

pub use frame::{Frame, MsgType, StreamId, HEADER_LEN};
pub use messages::{clip_text, clip_text_frame, keepalive_token, ping_frame, pong_frame, Hello};
pub use pairing::{
    derive_confirmation_code, pairing_finalize, pairing_init, pairing_respond, PairingPayload,
};
