//! Shared error type across portico crates.

use thiserror::Error;

/// Client-facing error codes (stable protocol surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed frame or envelope.
    InvalidMessage,
    /// Handshake envelope missing required fields.
    InvalidConnect,
    /// Well-formed envelope, invalid payload for its type.
    InvalidRequest,
    /// Operation attempted before a successful handshake.
    AuthRequired,
    /// Credentials rejected.
    AuthFailed,
    /// Caller does not own the addressed resource.
    Forbidden,
    /// Operation requires a registered node on this connection.
    NotRegistered,
    /// `type` is not part of the protocol.
    UnknownMessageType,
    /// Node exceeded its message window.
    RateLimited,
    /// Registration cap hit.
    MaxNodesReached,
    /// Group id or name did not resolve.
    GroupNotFound,
    /// Target node id did not resolve.
    NodeNotFound,
    /// Internal server error.
    Internal,
}

impl ErrorCode {
    /// String representation used in JSON error envelopes.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::InvalidConnect => "INVALID_CONNECT",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotRegistered => "NOT_REGISTERED",
            ErrorCode::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::MaxNodesReached => "MAX_NODES_REACHED",
            ErrorCode::GroupNotFound => "GROUP_NOT_FOUND",
            ErrorCode::NodeNotFound => "NODE_NOT_FOUND",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Unified error type used by core and gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("invalid connect: {0}")]
    InvalidConnect(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("authentication required")]
    AuthRequired,
    #[error("authentication failed")]
    AuthFailed,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("no node registered on this connection")]
    NotRegistered,
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
    #[error("rate limited")]
    RateLimited,
    #[error("maximum node count reached ({0})")]
    MaxNodesReached(usize),
    #[error("group not found: {0}")]
    GroupNotFound(String),
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Map internal error to a stable client-facing code.
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::InvalidMessage(_) => ErrorCode::InvalidMessage,
            GatewayError::InvalidConnect(_) => ErrorCode::InvalidConnect,
            GatewayError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            GatewayError::AuthRequired => ErrorCode::AuthRequired,
            GatewayError::AuthFailed => ErrorCode::AuthFailed,
            GatewayError::Forbidden(_) => ErrorCode::Forbidden,
            GatewayError::NotRegistered => ErrorCode::NotRegistered,
            GatewayError::UnknownMessageType(_) => ErrorCode::UnknownMessageType,
            GatewayError::RateLimited => ErrorCode::RateLimited,
            GatewayError::MaxNodesReached(_) => ErrorCode::MaxNodesReached,
            GatewayError::GroupNotFound(_) => ErrorCode::GroupNotFound,
            GatewayError::NodeNotFound(_) => ErrorCode::NodeNotFound,
            GatewayError::Internal(_) => ErrorCode::Internal,
        }
    }
}
