//! Wire protocol for the gateway.
//!
//! Every frame in either direction is a JSON [`Envelope`]. The `type` field is
//! a closed enum; `payload` is free-form JSON interpreted per type by the
//! structs in [`payloads`] and [`agent`].

pub mod agent;
pub mod envelope;
pub mod payloads;
pub mod validate;

pub use agent::{AgentCancelPayload, AgentRequestPayload, Attachment, RoutingHints};
pub use envelope::{now_millis, AuthPayload, ClientInfo, ClientType, Envelope, MessageType};
pub use payloads::{GroupPayload, RegisterPayload, SubscribePayload};
