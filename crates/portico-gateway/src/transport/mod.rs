//! Transport layer (WebSocket).
//!
//! Exposes the WS upgrade handler, the decode-once codec, and the socket
//! handle every other component addresses clients through.

pub mod codec;
pub mod socket;
pub mod ws;

pub use socket::{Socket, SocketId};
