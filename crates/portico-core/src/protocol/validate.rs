//! Inbound validation: parse once, check the type against the closed enum,
//! then decode the full envelope. The ordering matters for error codes: bad
//! JSON and schema misses are `INVALID_MESSAGE`, a well-formed frame with an
//! unrecognized `type` is `UNKNOWN_MESSAGE_TYPE`.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::protocol::envelope::{Envelope, MessageType};

pub fn parse_envelope(raw: &str) -> Result<Envelope> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| GatewayError::InvalidMessage(format!("invalid json: {e}")))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidMessage("missing type".into()))?;
    if MessageType::parse(kind).is_none() {
        return Err(GatewayError::UnknownMessageType(kind.to_string()));
    }

    serde_json::from_value(value)
        .map_err(|e| GatewayError::InvalidMessage(format!("invalid envelope: {e}")))
}

/// Decode an envelope's `payload` into the typed struct for its message type.
pub fn payload<T: DeserializeOwned>(env: &Envelope) -> Result<T> {
    let value = env.payload.clone().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| {
        GatewayError::InvalidRequest(format!("invalid {} payload: {e}", env.kind.as_str()))
    })
}
