//! Decode-once codec for the transport layer.
//!
//! Text frames become validated envelopes before any handler sees them;
//! WS-level control frames are surfaced for lifecycle handling. The gateway
//! protocol has no binary lane.

use axum::extract::ws::Message;
use portico_core::error::{GatewayError, Result};
use portico_core::protocol::{validate, Envelope};

#[derive(Debug)]
pub enum Inbound {
    Envelope(Envelope),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

pub fn decode(msg: Message) -> Result<Inbound> {
    match msg {
        Message::Text(s) => Ok(Inbound::Envelope(validate::parse_envelope(&s)?)),
        Message::Binary(_) => Err(GatewayError::InvalidMessage(
            "binary frames are not part of the gateway protocol".into(),
        )),
        Message::Ping(v) => Ok(Inbound::Ping(v)),
        Message::Pong(v) => Ok(Inbound::Pong(v)),
        Message::Close(_) => Ok(Inbound::Close),
    }
}
